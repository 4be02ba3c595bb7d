// crates/traildb-core/src/cons/grouper.rs
//
// Turns the ingest-order event arena into a grouped scratch file: one batch
// of events per UUID, in ascending UUID order (which fixes trail ids),
// each batch sorted by timestamp with timestamps rewritten as delta items.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, TdbError};
use crate::item::Item;
use crate::limits::{MAX_TIMEDELTA, MAX_TRAIL_LENGTH};

use super::arena::ArenaView;

/// Ingest-side event record, 32 bytes. `prev_event_idx` is a 1-based back
/// link forming a per-UUID list through the arena; 0 terminates it.
#[derive(Debug, Copy, Clone)]
pub struct ConsEvent {
    pub item_zero: u64,
    pub num_items: u64,
    pub timestamp: u64,
    pub prev_event_idx: u64,
}

impl ConsEvent {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.item_zero.to_le_bytes());
        buf[8..16].copy_from_slice(&self.num_items.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[24..32].copy_from_slice(&self.prev_event_idx.to_le_bytes());
        buf
    }

    pub fn read(bytes: &[u8], idx: u64) -> ConsEvent {
        let at = idx as usize * Self::SIZE;
        ConsEvent {
            item_zero: read_u64(bytes, at),
            num_items: read_u64(bytes, at + 8),
            timestamp: read_u64(bytes, at + 16),
            prev_event_idx: read_u64(bytes, at + 24),
        }
    }
}

/// Grouped event record, 32 bytes. The timestamp slot now holds a
/// delta-encoded field-0 item.
#[derive(Debug, Copy, Clone)]
pub struct GroupedEvent {
    pub item_zero: u64,
    pub num_items: u64,
    pub tstamp_item: u64,
    pub trail_id: u64,
}

impl GroupedEvent {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.item_zero.to_le_bytes());
        buf[8..16].copy_from_slice(&self.num_items.to_le_bytes());
        buf[16..24].copy_from_slice(&self.tstamp_item.to_le_bytes());
        buf[24..32].copy_from_slice(&self.trail_id.to_le_bytes());
        buf
    }

    pub fn read(bytes: &[u8], idx: u64) -> GroupedEvent {
        let at = idx as usize * Self::SIZE;
        GroupedEvent {
            item_zero: read_u64(bytes, at),
            num_items: read_u64(bytes, at + 8),
            tstamp_item: read_u64(bytes, at + 16),
            trail_id: read_u64(bytes, at + 24),
        }
    }
}

#[inline]
fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

pub struct Grouped {
    map: Option<Mmap>,
    pub num_trails: u64,
    pub num_events: u64,
    pub max_timestamp: u64,
    pub max_timedelta: u64,
}

impl Grouped {
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

pub fn group_by_uuid(
    root: &Path,
    trails: &BTreeMap<u128, u64>,
    events: &ArenaView,
    min_timestamp: u64,
) -> Result<Grouped> {
    // The first delta is taken against min_timestamp itself.
    if !trails.is_empty() && min_timestamp >= MAX_TIMEDELTA {
        return Err(TdbError::TimestampTooLarge);
    }

    let event_bytes = events.bytes();
    let file = tempfile::tempfile_in(root)?;
    let mut out = BufWriter::new(file);

    let mut buf: Vec<GroupedEvent> = Vec::new();
    let mut num_events = 0u64;
    let mut max_timestamp = 0u64;
    let mut max_timedelta = 0u64;

    for (trail_id, (_uuid, &last_event_idx)) in trails.iter().enumerate() {
        let trail_id = trail_id as u64;
        buf.clear();

        // Walk the back-links; this yields reverse insertion order.
        let mut idx = last_event_idx;
        while idx != 0 {
            let ev = ConsEvent::read(event_bytes, idx - 1);
            buf.push(GroupedEvent {
                item_zero: ev.item_zero,
                num_items: ev.num_items,
                tstamp_item: ev.timestamp,
                trail_id,
            });
            if buf.len() as u64 == MAX_TRAIL_LENGTH {
                return Err(TdbError::TrailTooLong);
            }
            idx = ev.prev_event_idx;
        }

        sort_events(&mut buf);

        // Delta-encode timestamps against the previous event (the file-wide
        // minimum for the first one) and rewrite them as field-0 items.
        let mut prev_timestamp = min_timestamp;
        for ev in buf.iter_mut() {
            let timestamp = ev.tstamp_item;
            let delta = timestamp - prev_timestamp;
            if delta >= MAX_TIMEDELTA {
                return Err(TdbError::TimestampTooLarge);
            }
            if timestamp > max_timestamp {
                max_timestamp = timestamp;
            }
            if delta > max_timedelta {
                max_timedelta = delta;
            }
            prev_timestamp = timestamp;
            ev.tstamp_item = Item::new(0, delta).raw();
        }

        for ev in buf.iter() {
            out.write_all(&ev.to_bytes())?;
        }
        num_events += buf.len() as u64;
    }

    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_data()?;
    let map = if num_events > 0 {
        Some(unsafe { Mmap::map(&file)? })
    } else {
        None
    };

    Ok(Grouped {
        map,
        num_trails: trails.len() as u64,
        num_events,
        max_timestamp,
        max_timedelta,
    })
}

/// Sort one trail's events by timestamp, preserving insertion order within
/// equal timestamps. The buffer arrives in reverse insertion order from the
/// back-link walk, so a stable ascending sort leaves ties reversed; instead
/// of reversing the whole buffer up front (which would fight the sort's
/// affinity for presorted runs), reverse each equal-timestamp run after the
/// fact.
pub fn sort_events(buf: &mut [GroupedEvent]) {
    buf.sort_by_key(|ev| ev.tstamp_item);
    let n = buf.len();
    let mut i = 0;
    while i + 1 < n {
        let mut j = i + 1;
        if buf[j].tstamp_item == buf[i].tstamp_item {
            while j < n && buf[j].tstamp_item == buf[i].tstamp_item {
                j += 1;
            }
            buf[i..j].reverse();
            i = j;
        } else {
            i += 1;
        }
    }
}
