// crates/traildb-core/src/cons/arena.rs
//
// Append-only arenas of fixed-size records. Records accumulate in memory
// until the configured threshold, then the whole arena moves to an
// anonymous temp file inside the output root; the grouping pass reads the
// finished arena back through a single mmap.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::Result;

pub struct Arena {
    record_size: usize,
    spill_threshold: u64,
    mem: Vec<u8>,
    spill: Option<BufWriter<File>>,
    root: PathBuf,
    num_records: u64,
}

impl Arena {
    pub fn new(root: &Path, record_size: usize, spill_threshold: u64) -> Arena {
        Arena {
            record_size,
            spill_threshold,
            mem: Vec::new(),
            spill: None,
            root: root.to_path_buf(),
            num_records: 0,
        }
    }

    pub fn push(&mut self, record: &[u8]) -> Result<()> {
        debug_assert_eq!(record.len(), self.record_size);
        if self.spill.is_none() && (self.mem.len() + self.record_size) as u64 > self.spill_threshold
        {
            let file = tempfile::tempfile_in(&self.root)?;
            let mut w = BufWriter::new(file);
            w.write_all(&self.mem)?;
            self.mem = Vec::new();
            self.spill = Some(w);
        }
        match &mut self.spill {
            Some(w) => w.write_all(record)?,
            None => self.mem.extend_from_slice(record),
        }
        self.num_records += 1;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// Flush and freeze the arena for reading.
    pub fn finish(self) -> Result<ArenaView> {
        match self.spill {
            Some(w) => {
                let file = w.into_inner().map_err(|e| e.into_error())?;
                file.sync_data()?;
                let map = unsafe { Mmap::map(&file)? };
                Ok(ArenaView::Mapped(map))
            }
            None => Ok(ArenaView::Mem(self.mem)),
        }
    }
}

pub enum ArenaView {
    Mem(Vec<u8>),
    Mapped(Mmap),
}

impl ArenaView {
    pub fn bytes(&self) -> &[u8] {
        match self {
            ArenaView::Mem(v) => v,
            ArenaView::Mapped(m) => m,
        }
    }
}

/// Read-only view over the item arena: item `j` is a little-endian u64 at
/// byte offset j * 8.
pub struct ItemsView<'a> {
    bytes: &'a [u8],
}

impl<'a> ItemsView<'a> {
    pub fn new(bytes: &'a [u8]) -> ItemsView<'a> {
        ItemsView { bytes }
    }

    #[inline]
    pub fn get(&self, idx: u64) -> u64 {
        let at = (idx * 8) as usize;
        u64::from_le_bytes(self.bytes[at..at + 8].try_into().unwrap())
    }
}
