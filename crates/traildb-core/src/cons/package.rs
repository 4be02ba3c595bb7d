// crates/traildb-core/src/cons/package.rs
//
// Single-file packaging: a GNU-tar-compatible archive whose entries are
// the directory files byte for byte, plus a `tar.toc` index file. The two
// header files (version, info) each fit one 512-byte block, so the toc's
// data always starts at byte 2560; readers seek there directly and never
// parse tar headers. The toc is pre-allocated at its worst-case size and
// rewritten in place once all offsets are known.

use std::fs;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, TdbError};

pub const TOC_FILE_OFFSET: u64 = 2560; /* = (len(HEADER_FILES) * 2 + 1) * 512 */
pub const TAR_TOC_MAGIC: &str = "TAR TOC FOR TDB VER 1";

/* Do NOT reorder HEADER_FILES: the fixed toc offset depends on them. */
const HEADER_FILES: [&str; 2] = ["version", "info"];
const DATA_FILES: [&str; 5] = ["fields", "trails.codebook", "trails.toc", "trails.data", "uuids"];
const TOC_FILE: &str = "tar.toc";

const TAR_BLOCK: u64 = 512;
/* = len(' %d\n' % 2**64); every toc line has two of these after the name */
const VALUE_SIZE: u64 = 22;

fn write_octal(dst: &mut [u8], val: u64, digits: usize) {
    let s = format!("{val:0digits$o}");
    dst[..digits].copy_from_slice(s.as_bytes());
}

fn write_tar_header(out: &mut File, name: &str, size: u64) -> Result<()> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() > 100 {
        return Err(TdbError::InvalidPackage(format!("entry name too long: {name}")));
    }
    if size > 0o77_777_777_777 {
        // 11 octal digits is the classic header's size ceiling
        return Err(TdbError::InvalidPackage(format!("entry too large: {name}")));
    }

    let mut h = [0u8; TAR_BLOCK as usize];
    h[..name_bytes.len()].copy_from_slice(name_bytes);
    write_octal(&mut h[100..], 0o644, 7); // mode
    write_octal(&mut h[108..], 0, 7); // uid
    write_octal(&mut h[116..], 0, 7); // gid
    write_octal(&mut h[124..], size, 11);
    h[135] = b' ';
    write_octal(&mut h[136..], 0, 11); // mtime 0 keeps archives deterministic
    h[147] = b' ';
    h[148..156].copy_from_slice(b"        "); // checksum counts as spaces
    h[156] = b'0'; // regular file
    h[257..265].copy_from_slice(b"ustar  \0");

    let sum: u32 = h.iter().map(|&b| b as u32).sum();
    write_octal(&mut h[148..], sum as u64, 6);
    h[154] = 0;
    h[155] = b' ';

    out.write_all(&h)?;
    Ok(())
}

fn block_pad(out: &mut File, data_size: u64) -> Result<u64> {
    let rem = data_size % TAR_BLOCK;
    if rem != 0 {
        let pad = TAR_BLOCK - rem;
        out.write_all(&vec![0u8; pad as usize])?;
        Ok(pad)
    } else {
        Ok(0)
    }
}

struct Packager {
    out: File,
    pos: u64,
    toc_lines: String,
}

impl Packager {
    fn append_file(&mut self, root: &Path, name: &str) -> Result<()> {
        let path = root.join(name);
        let mut src = File::open(&path)?;
        let size = src.metadata()?.len();

        write_tar_header(&mut self.out, name, size)?;
        self.pos += TAR_BLOCK;
        self.toc_lines
            .push_str(&format!("{name} {} {size}\n", self.pos));

        let copied = std::io::copy(&mut src, &mut self.out)?;
        if copied != size {
            return Err(TdbError::InvalidPackage(format!("short copy of {name}")));
        }
        self.pos += size + block_pad(&mut self.out, size)?;

        // the archive now owns these bytes; drop the source to save space
        drop(src);
        fs::remove_file(&path)?;
        Ok(())
    }
}

/// Archive the finalized directory `root` into `<root>.tdb` and remove the
/// directory. Returns the package path.
pub fn cons_package(root: &Path, ofield_names: &[String]) -> Result<PathBuf> {
    // Worst-case toc size; the toc entry is padded to this, so a generous
    // estimate only costs archive bytes.
    let mut toc_max = (TAR_TOC_MAGIC.len() + 1) as u64 + TOC_FILE.len() as u64 + 2 * VALUE_SIZE;
    for name in HEADER_FILES.iter().chain(DATA_FILES.iter()) {
        toc_max += name.len() as u64 + 2 * VALUE_SIZE;
    }
    for name in ofield_names {
        toc_max += "lexicon.".len() as u64 + name.len() as u64 + 2 * VALUE_SIZE;
    }
    toc_max += 1; // the blank line marking the end

    let parent = root.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".tdb.pack.")
        .tempfile_in(parent)?;

    let mut p = Packager {
        out: tmp.as_file().try_clone()?,
        pos: 0,
        toc_lines: format!("{TAR_TOC_MAGIC}\n"),
    };

    for name in HEADER_FILES {
        p.append_file(root, name)?;
    }

    // reserve the toc entry; its data must land at the fixed offset
    write_tar_header(&mut p.out, TOC_FILE, toc_max)?;
    p.pos += TAR_BLOCK;
    if p.pos != TOC_FILE_OFFSET {
        return Err(TdbError::InvalidPackage(format!(
            "toc landed at offset {}",
            p.pos
        )));
    }
    let toc_data_offset = p.pos;
    p.toc_lines
        .push_str(&format!("{TOC_FILE} {toc_data_offset} {toc_max}\n"));
    p.out.write_all(&vec![0u8; toc_max as usize])?;
    p.pos += toc_max + block_pad(&mut p.out, toc_max)?;

    for name in ofield_names {
        p.append_file(root, &format!("lexicon.{name}"))?;
    }
    for name in DATA_FILES {
        p.append_file(root, name)?;
    }

    // end-of-archive marker
    p.out.write_all(&[0u8; 2 * TAR_BLOCK as usize])?;

    // rewind and fill in the actual toc
    p.toc_lines.push('\n');
    if p.toc_lines.len() as u64 > toc_max {
        return Err(TdbError::InvalidPackage(format!(
            "toc overflow: {} > {toc_max}",
            p.toc_lines.len()
        )));
    }
    p.out.seek(SeekFrom::Start(toc_data_offset))?;
    p.out.write_all(p.toc_lines.as_bytes())?;
    p.out.sync_all()?;
    drop(p);

    let mut package_path = root.as_os_str().to_os_string();
    package_path.push(".tdb");
    let package_path = PathBuf::from(package_path);
    tmp.persist(&package_path).map_err(|e| e.error)?;

    // Leftovers from an earlier failed build are harmless; removal is
    // best-effort.
    let _ = fs::remove_dir(root);

    debug!(path = %package_path.display(), "package written");
    Ok(package_path)
}
