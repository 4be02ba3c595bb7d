// crates/traildb-core/src/db/package.rs
//
// Reading side of the single-file package. The whole archive is mapped
// once; the toc at the fixed offset names each member's byte range, and
// file views are sub-slices of the shared map. Tar headers are never
// parsed.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::cons::package::{TAR_TOC_MAGIC, TOC_FILE_OFFSET};
use crate::error::{Result, TdbError};

pub(crate) struct Package {
    map: Arc<Mmap>,
    entries: Vec<TocEntry>,
}

struct TocEntry {
    name: String,
    offset: u64,
    size: u64,
}

impl Package {
    pub fn open(path: &Path) -> Result<Package> {
        let file = File::open(path)?;
        if file.metadata()?.len() <= TOC_FILE_OFFSET {
            return Err(TdbError::InvalidPackage("file too small".into()));
        }
        let map = Arc::new(unsafe { Mmap::map(&file)? });
        let entries = parse_toc(&map)?;
        Ok(Package { map, entries })
    }

    pub fn get(&self, name: &str) -> Option<(Arc<Mmap>, u64, u64)> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| (Arc::clone(&self.map), e.offset, e.size))
    }
}

fn parse_toc(bytes: &[u8]) -> Result<Vec<TocEntry>> {
    let mut region = &bytes[TOC_FILE_OFFSET as usize..];

    let magic = next_line(&mut region)
        .ok_or_else(|| TdbError::InvalidPackage("missing toc".into()))?;
    if magic != TAR_TOC_MAGIC.as_bytes() {
        return Err(TdbError::InvalidPackage("bad toc magic".into()));
    }

    let mut entries = Vec::new();
    loop {
        let line = next_line(&mut region)
            .ok_or_else(|| TdbError::InvalidPackage("unterminated toc".into()))?;
        if line.is_empty() {
            break;
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| TdbError::InvalidPackage("non-ascii toc line".into()))?;
        let mut parts = line.split_whitespace();
        let entry = (|| {
            let name = parts.next()?.to_string();
            let offset = parts.next()?.parse().ok()?;
            let size = parts.next()?.parse().ok()?;
            Some(TocEntry { name, offset, size })
        })()
        .ok_or_else(|| TdbError::InvalidPackage(format!("bad toc line: {line}")))?;
        if entry.offset + entry.size > bytes.len() as u64 {
            return Err(TdbError::InvalidPackage(format!(
                "{} out of range",
                entry.name
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn next_line<'a>(region: &mut &'a [u8]) -> Option<&'a [u8]> {
    let nl = region.iter().position(|&b| b == b'\n')?;
    let line = &region[..nl];
    *region = &region[nl + 1..];
    Some(line)
}
