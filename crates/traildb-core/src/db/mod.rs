// crates/traildb-core/src/db/mod.rs
//
// The reader half. A TrailDb owns read-only mappings of the store's files
// (or sub-ranges of one package mapping) and hands out cursors that borrow
// it. Cursors own their decode scratch; the reader itself is immutable
// once options are set, which is why option setters take &mut self: the
// borrow checker then rules out changing a filter under a live cursor.

pub mod cursor;
pub mod filter;
pub mod multi_cursor;
pub mod package;

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Result, TdbError};
use crate::huffman::{FieldStats, CODEBOOK_ENTRY_SIZE, CODEBOOK_SIZE};
use crate::item::{Field, Item, Val};
use crate::limits::{
    DEFAULT_CURSOR_EVENT_BUFFER_SIZE, TDB_VERSION_LATEST, TDB_VERSION_V0,
};
use crate::Uuid;

use cursor::Cursor;
use filter::EventFilter;
use package::Package;

/// A read-only byte range backed by an mmap, possibly shared with other
/// views of the same package file.
pub(crate) struct FileView {
    map: Arc<Mmap>,
    off: usize,
    len: usize,
}

impl FileView {
    fn open(path: &Path) -> Result<FileView> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(TdbError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("empty file: {}", path.display()),
            )));
        }
        let map = Arc::new(unsafe { Mmap::map(&file)? });
        Ok(FileView { map, off: 0, len })
    }

    fn slice(map: Arc<Mmap>, off: u64, len: u64) -> FileView {
        FileView {
            map,
            off: off as usize,
            len: len as usize,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.map[self.off..self.off + self.len]
    }
}

pub struct TrailDb {
    root: PathBuf,
    version: u64,
    num_trails: u64,
    num_events: u64,
    min_timestamp: u64,
    max_timestamp: u64,
    max_timedelta: u64,
    num_fields: u64,
    field_names: Vec<String>,

    uuids: Option<FileView>,
    codebook: Option<FileView>,
    trails: Option<FileView>,
    toc: Option<FileView>,
    toc_wide: bool,
    lexicons: Vec<FileView>,

    field_stats: FieldStats,

    only_diff: bool,
    filter: Option<EventFilter>,
    trail_filters: HashMap<u64, EventFilter>,
    cursor_event_buffer_size: usize,

    package: Option<Package>,
}

impl TrailDb {
    /// Open a store rooted at `root`: a directory, or a package file.
    pub fn open(root: impl AsRef<Path>) -> Result<TrailDb> {
        let root = root.as_ref().to_path_buf();
        let package = if root.is_file() {
            Some(Package::open(&root)?)
        } else {
            None
        };

        let info = read_small(&root, package.as_ref(), "info")?
            .ok_or(TdbError::InvalidInfoFile)?;
        let info = parse_counts(&info, 5).ok_or(TdbError::InvalidInfoFile)?;
        let (num_trails, num_events, min_timestamp, max_timestamp, max_timedelta) =
            (info[0], info[1], info[2], info[3], info[4]);

        let version = match read_small(&root, package.as_ref(), "version")? {
            None => TDB_VERSION_V0,
            Some(bytes) => parse_counts(&bytes, 1)
                .ok_or(TdbError::InvalidVersionFile)?[0],
        };
        if version > TDB_VERSION_LATEST {
            return Err(TdbError::IncompatibleVersion(version));
        }

        let fields_bytes = read_small(&root, package.as_ref(), "fields")?
            .ok_or(TdbError::InvalidFieldsFile)?;
        let fields_str =
            std::str::from_utf8(&fields_bytes).map_err(|_| TdbError::InvalidFieldsFile)?;
        let mut field_names = vec!["time".to_string()];
        for line in fields_str.lines() {
            if line.is_empty() {
                return Err(TdbError::InvalidFieldsFile);
            }
            field_names.push(line.to_string());
        }
        let num_fields = field_names.len() as u64;

        let (uuids, codebook, trails, toc, toc_wide) = if num_trails > 0 {
            let uuids = map_file(&root, package.as_ref(), "uuids")?;
            if (uuids.bytes().len() as u64) < num_trails * 16 {
                return Err(TdbError::InvalidUuidsFile);
            }
            let codebook = map_file(&root, package.as_ref(), "trails.codebook")?;
            if codebook.bytes().len() < CODEBOOK_SIZE * CODEBOOK_ENTRY_SIZE {
                return Err(TdbError::InvalidCodebookFile);
            }
            let trails = map_file(&root, package.as_ref(), "trails.data")?;
            let toc = map_file(&root, package.as_ref(), "trails.toc")?;
            let toc_wide = trails.bytes().len() as u64 >= u32::MAX as u64;
            let entry = if toc_wide { 8 } else { 4 };
            if (toc.bytes().len() as u64) < (num_trails + 1) * entry {
                return Err(TdbError::InvalidTrailsFile);
            }
            (Some(uuids), Some(codebook), Some(trails), Some(toc), toc_wide)
        } else {
            (None, None, None, None, false)
        };

        let mut lexicons = Vec::with_capacity(field_names.len() - 1);
        for name in &field_names[1..] {
            let view = map_file(&root, package.as_ref(), &format!("lexicon.{name}"))?;
            if view.bytes().len() < 8 {
                return Err(TdbError::InvalidLexiconFile(name.clone()));
            }
            lexicons.push(view);
        }

        let mut field_cardinalities = Vec::with_capacity(lexicons.len());
        for (name, lex) in field_names[1..].iter().zip(lexicons.iter()) {
            let bytes = lex.bytes();
            let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u64;
            if 4 + (count + 1) * 4 > bytes.len() as u64 {
                return Err(TdbError::InvalidLexiconFile(name.clone()));
            }
            field_cardinalities.push(count);
        }
        let field_stats = FieldStats::new(&field_cardinalities, max_timedelta);

        debug!(
            root = %root.display(),
            num_trails,
            num_events,
            version,
            packaged = package.is_some(),
            "opened"
        );

        Ok(TrailDb {
            root,
            version,
            num_trails,
            num_events,
            min_timestamp,
            max_timestamp,
            max_timedelta,
            num_fields,
            field_names,
            uuids,
            codebook,
            trails,
            toc,
            toc_wide,
            lexicons,
            field_stats,
            only_diff: false,
            filter: None,
            trail_filters: HashMap::new(),
            cursor_event_buffer_size: DEFAULT_CURSOR_EVENT_BUFFER_SIZE,
            package,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_packaged(&self) -> bool {
        self.package.is_some()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn num_trails(&self) -> u64 {
        self.num_trails
    }

    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    pub fn num_fields(&self) -> u64 {
        self.num_fields
    }

    pub fn min_timestamp(&self) -> u64 {
        self.min_timestamp
    }

    pub fn max_timestamp(&self) -> u64 {
        self.max_timestamp
    }

    pub fn max_timedelta(&self) -> u64 {
        self.max_timedelta
    }

    pub(crate) fn field_stats(&self) -> &FieldStats {
        &self.field_stats
    }

    /* field and value lookups */

    pub fn get_field(&self, name: &str) -> Option<Field> {
        self.field_names
            .iter()
            .position(|n| n == name)
            .map(|i| i as Field)
    }

    pub fn get_field_name(&self, field: Field) -> Option<&str> {
        self.field_names.get(field as usize).map(|s| s.as_str())
    }

    /// Number of distinct values of `field`, the implicit NULL included.
    pub fn lexicon_size(&self, field: Field) -> u64 {
        match self.lexicon_num_values(field) {
            Ok(n) => n + 1,
            Err(_) => 0,
        }
    }

    pub(crate) fn lexicon_num_values(&self, field: Field) -> Result<u64> {
        if field == 0 || field as u64 >= self.num_fields {
            return Err(TdbError::UnknownField(format!("field {field}")));
        }
        let bytes = self.lexicons[field as usize - 1].bytes();
        Ok(u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u64)
    }

    /// The interned bytes of value id `val` of `field`. Id 0 is the NULL
    /// value and decodes to the empty string.
    pub fn get_value(&self, field: Field, val: Val) -> Option<&[u8]> {
        if field == 0 || field as u64 >= self.num_fields {
            return None;
        }
        if val == 0 {
            return Some(b"");
        }
        let bytes = self.lexicons[field as usize - 1].bytes();
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u64;
        if val > count {
            return None;
        }
        lexicon_get(bytes, self.version, val - 1)
    }

    pub fn get_item_value(&self, item: Item) -> Option<&[u8]> {
        self.get_value(item.field(), item.val())
    }

    /// Find the item of `field` whose interned bytes equal `value`; an
    /// empty `value` names the field's NULL item.
    pub fn get_item(&self, field: Field, value: &[u8]) -> Option<Item> {
        if field == 0 || field as u64 >= self.num_fields {
            return None;
        }
        if value.is_empty() {
            return Some(Item::new(field, 0));
        }
        let bytes = self.lexicons[field as usize - 1].bytes();
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u64;
        for i in 0..count {
            if lexicon_get(bytes, self.version, i) == Some(value) {
                return Some(Item::new(field, i + 1));
            }
        }
        None
    }

    /* uuid lookups */

    pub fn get_uuid(&self, trail_id: u64) -> Option<Uuid> {
        if trail_id >= self.num_trails {
            return None;
        }
        let at = trail_id as usize * 16;
        let bytes = self.uuids.as_ref()?.bytes();
        bytes[at..at + 16].try_into().ok()
    }

    /// Trail id of `uuid`, by binary search over the sorted uuid array.
    pub fn get_trail_id(&self, uuid: &Uuid) -> Option<u64> {
        let bytes = self.uuids.as_ref()?.bytes();
        let mut lo = 0u64;
        let mut hi = self.num_trails;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let at = mid as usize * 16;
            match bytes[at..at + 16].cmp(uuid.as_slice()) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /* read options */

    /// In only-diff mode cursors yield only the items that changed at each
    /// event instead of the full reconstructed tuple. Incompatible with
    /// event filters.
    pub fn set_only_diff_items(&mut self, on: bool) -> Result<()> {
        if on && (self.filter.is_some() || !self.trail_filters.is_empty()) {
            return Err(TdbError::OnlyDiffFilter);
        }
        self.only_diff = on;
        Ok(())
    }

    pub fn only_diff_items(&self) -> bool {
        self.only_diff
    }

    /// Install a reader-wide event filter. Per-trail filters and
    /// cursor-level filters take precedence over it.
    pub fn set_event_filter(&mut self, filter: EventFilter) -> Result<()> {
        if self.only_diff {
            return Err(TdbError::OnlyDiffFilter);
        }
        self.filter = Some(filter);
        Ok(())
    }

    pub fn unset_event_filter(&mut self) {
        self.filter = None;
    }

    pub fn get_event_filter(&self) -> Option<&EventFilter> {
        self.filter.as_ref()
    }

    pub fn set_trail_event_filter(&mut self, trail_id: u64, filter: EventFilter) -> Result<()> {
        if self.only_diff {
            return Err(TdbError::OnlyDiffFilter);
        }
        if trail_id >= self.num_trails {
            return Err(TdbError::InvalidTrailId(trail_id));
        }
        self.trail_filters.insert(trail_id, filter);
        Ok(())
    }

    pub fn unset_trail_event_filter(&mut self, trail_id: u64) {
        self.trail_filters.remove(&trail_id);
    }

    pub fn set_cursor_event_buffer_size(&mut self, events: usize) -> Result<()> {
        if events == 0 {
            return Err(TdbError::InvalidOptionValue("buffer size 0".into()));
        }
        self.cursor_event_buffer_size = events;
        Ok(())
    }

    /* cursors */

    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self, self.only_diff, self.cursor_event_buffer_size)
    }

    /// Cursor that always reconstructs full events; append() uses this to
    /// read sources regardless of their only-diff setting.
    pub(crate) fn cursor_full(&self) -> Cursor<'_> {
        Cursor::new(self, false, self.cursor_event_buffer_size)
    }

    /// The filter get_trail resolves for `trail_id` when the cursor has
    /// none of its own: per-trail override first, then the reader-wide
    /// filter.
    pub(crate) fn resolve_filter(&self, trail_id: u64) -> Option<&EventFilter> {
        self.trail_filters.get(&trail_id).or(self.filter.as_ref())
    }

    /* decode-side accessors */

    pub(crate) fn trails_bytes(&self) -> &[u8] {
        self.trails.as_ref().map(|v| v.bytes()).unwrap_or(&[])
    }

    pub(crate) fn codebook_bytes(&self) -> &[u8] {
        self.codebook.as_ref().map(|v| v.bytes()).unwrap_or(&[])
    }

    pub(crate) fn trail_offs(&self, trail_id: u64) -> u64 {
        let bytes = match &self.toc {
            Some(v) => v.bytes(),
            None => return 0,
        };
        if self.toc_wide {
            let at = trail_id as usize * 8;
            u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
        } else {
            let at = trail_id as usize * 4;
            u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as u64
        }
    }
}

fn lexicon_get(bytes: &[u8], version: u64, idx: u64) -> Option<&[u8]> {
    let toc_at = 4 + idx as usize * 4;
    let start = u32::from_le_bytes(bytes.get(toc_at..toc_at + 4)?.try_into().ok()?) as usize;
    if version == TDB_VERSION_V0 {
        // v0 compatibility: values are NUL-terminated
        let tail = bytes.get(start..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..end])
    } else {
        let end =
            u32::from_le_bytes(bytes.get(toc_at + 4..toc_at + 8)?.try_into().ok()?) as usize;
        bytes.get(start..end)
    }
}

fn parse_counts(bytes: &[u8], n: usize) -> Option<Vec<u64>> {
    let s = std::str::from_utf8(bytes).ok()?;
    let vals: Vec<u64> = s
        .split_whitespace()
        .map(|t| t.parse().ok())
        .collect::<Option<Vec<u64>>>()?;
    if vals.len() != n {
        return None;
    }
    Some(vals)
}

fn read_small(root: &Path, package: Option<&Package>, name: &str) -> Result<Option<Vec<u8>>> {
    match package {
        Some(pkg) => match pkg.get(name) {
            Some((map, off, len)) => {
                Ok(Some(map[off as usize..(off + len) as usize].to_vec()))
            }
            None => Ok(None),
        },
        None => {
            let path = root.join(name);
            match std::fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
    }
}

fn map_file(root: &Path, package: Option<&Package>, name: &str) -> Result<FileView> {
    match package {
        Some(pkg) => {
            let (map, off, len) = pkg.get(name).ok_or_else(|| {
                TdbError::InvalidPackage(format!("missing package member: {name}"))
            })?;
            Ok(FileView::slice(map, off, len))
        }
        None => FileView::open(&root.join(name)),
    }
}
