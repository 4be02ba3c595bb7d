// crates/traildb-core/src/db/cursor.rs
//
// Random-access trail decoding. A cursor decodes one trail at a time into
// a batch of fully assembled events; edge encoding means an event only
// stores the items that changed, so the cursor carries the current item of
// every field across events and snapshots it when an event closes.
//
// Malformed grams are treated as end-of-trail: the cursor stops and yields
// no error. Strict input is guaranteed by the builder, not assumed by the
// reader.

use crate::error::{Result, TdbError};
use crate::huffman::decode_gram;
use crate::item::{gram_first, gram_other, Item};

use super::filter::EventFilter;
use super::TrailDb;

/// One decoded event: a timestamp and its items. In the default mode
/// `items` holds one item per non-time field, in field order; in only-diff
/// mode it holds just the items that changed at this event.
#[derive(Debug, Copy, Clone)]
pub struct Event<'a> {
    pub timestamp: u64,
    pub items: &'a [Item],
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct EventMeta {
    pub timestamp: u64,
    start: usize,
    len: usize,
}

pub struct Cursor<'db> {
    db: &'db TrailDb,
    only_diff: bool,
    batch_size: usize,

    /* current trail */
    trail_selected: bool,
    data_start: usize,
    offs: u64,
    size: u64,
    tstamp: u64,
    prev_items: Vec<u64>,
    first_satisfying: bool,
    filter: Option<EventFilter>,
    cursor_filter: Option<EventFilter>,

    /* assembled batch */
    ev_items: Vec<Item>,
    ev_meta: Vec<EventMeta>,
    next_ev: usize,
    changed: Vec<Item>,
}

impl<'db> Cursor<'db> {
    pub(crate) fn new(db: &'db TrailDb, only_diff: bool, batch_size: usize) -> Cursor<'db> {
        Cursor {
            db,
            only_diff,
            batch_size,
            trail_selected: false,
            data_start: 0,
            offs: 0,
            size: 0,
            tstamp: 0,
            prev_items: vec![0; db.num_fields() as usize],
            first_satisfying: true,
            filter: None,
            cursor_filter: None,
            ev_items: Vec::new(),
            ev_meta: Vec::new(),
            next_ev: 0,
            changed: Vec::new(),
        }
    }

    pub fn db(&self) -> &'db TrailDb {
        self.db
    }

    /// Install a cursor-level filter, overriding the reader's filters for
    /// trails selected afterwards.
    pub fn set_event_filter(&mut self, filter: &EventFilter) -> Result<()> {
        if self.only_diff {
            return Err(TdbError::OnlyDiffFilter);
        }
        self.cursor_filter = Some(filter.clone());
        Ok(())
    }

    pub fn unset_event_filter(&mut self) {
        self.cursor_filter = None;
    }

    /// Position the cursor at the start of `trail_id`.
    pub fn get_trail(&mut self, trail_id: u64) -> Result<()> {
        if trail_id >= self.db.num_trails() {
            return Err(TdbError::InvalidTrailId(trail_id));
        }

        let filter = match &self.cursor_filter {
            Some(f) => Some(f.clone()),
            None => self.db.resolve_filter(trail_id).cloned(),
        };
        if self.only_diff && filter.is_some() {
            return Err(TdbError::OnlyDiffFilter);
        }

        let data_len = self.db.trails_bytes().len() as u64;
        let start = self.db.trail_offs(trail_id).min(data_len);
        let end = self.db.trail_offs(trail_id + 1).min(data_len).max(start);
        self.data_start = start as usize;

        // The 8-byte pad must sit past the trail or the bit reader could
        // run off the mapping; a toc violating that is treated as empty.
        let trail_size = end - start;
        if trail_size == 0 || end + 8 > data_len {
            self.offs = 0;
            self.size = 0;
        } else {
            let data = &self.db.trails_bytes()[self.data_start..];
            let residual = crate::huffman::bits::read_bits(data, 0, 3);
            self.size = 8 * trail_size - residual;
            self.offs = 3;
        }

        self.tstamp = self.db.min_timestamp();
        self.prev_items[0] = 0;
        for field in 1..self.db.num_fields() {
            self.prev_items[field as usize] = Item::new(field as u32, 0).raw();
        }
        self.first_satisfying = true;
        self.filter = filter;
        self.ev_items.clear();
        self.ev_meta.clear();
        self.next_ev = 0;
        self.trail_selected = true;
        Ok(())
    }

    /// Yield the next event of the current trail.
    pub fn next(&mut self) -> Option<Event<'_>> {
        let meta = self.advance()?;
        Some(Event {
            timestamp: meta.timestamp,
            items: self.items_of(&meta),
        })
    }

    /// The next event, without consuming it.
    pub fn peek(&mut self) -> Option<Event<'_>> {
        self.ensure_buffered()?;
        let meta = self.ev_meta[self.next_ev];
        Some(Event {
            timestamp: meta.timestamp,
            items: self.items_of(&meta),
        })
    }

    /// Decode the rest of the trail and count its events.
    pub fn get_trail_length(&mut self) -> u64 {
        let mut n = 0u64;
        while self.advance().is_some() {
            n += 1;
        }
        n
    }

    /* batch internals, shared with the multi-cursor */

    pub(crate) fn buffered_events(&self) -> usize {
        self.ev_meta.len() - self.next_ev
    }

    /// Timestamp of the buffered head event; never refills.
    pub(crate) fn buffered_timestamp(&self) -> Option<u64> {
        self.ev_meta.get(self.next_ev).map(|m| m.timestamp)
    }

    /// Refill if needed and report whether an event is buffered. May
    /// invalidate previously returned events.
    pub(crate) fn ensure_buffered(&mut self) -> Option<()> {
        if self.next_ev >= self.ev_meta.len() {
            if self.offs >= self.size {
                return None;
            }
            self.fill_batch();
            if self.ev_meta.is_empty() {
                return None;
            }
        }
        Some(())
    }

    /// Consume the buffered head event. Callers check buffered_events()
    /// first; the returned meta stays valid until the next refill.
    pub(crate) fn take_buffered(&mut self) -> EventMeta {
        let meta = self.ev_meta[self.next_ev];
        self.next_ev += 1;
        meta
    }

    pub(crate) fn items_of(&self, meta: &EventMeta) -> &[Item] {
        &self.ev_items[meta.start..meta.start + meta.len]
    }

    fn advance(&mut self) -> Option<EventMeta> {
        self.ensure_buffered()?;
        Some(self.take_buffered())
    }

    /// Decode events until the batch is full or the stream ends.
    fn fill_batch(&mut self) {
        self.ev_items.clear();
        self.ev_meta.clear();
        self.next_ev = 0;
        if !self.trail_selected {
            return;
        }

        let codebook = self.db.codebook_bytes();
        let fstats = self.db.field_stats();
        let num_fields = self.db.num_fields() as usize;
        let trails = self.db.trails_bytes();
        let data = &trails[self.data_start..];

        while self.ev_meta.len() < self.batch_size && self.offs < self.size {
            // every event opens with a timestamp delta, possibly as the
            // first half of a bigram
            let Some(gram) = decode_gram(codebook, data, &mut self.offs, fstats) else {
                self.offs = self.size;
                break;
            };
            let first = gram_first(gram);
            if first.field() != 0 {
                self.offs = self.size;
                break;
            }
            self.tstamp += first.val();
            self.changed.clear();

            let mut malformed = false;
            if let Some(other) = gram_other(gram) {
                let f = other.field() as usize;
                if f == 0 || f >= num_fields {
                    malformed = true;
                } else {
                    self.prev_items[f] = other.raw();
                    self.changed.push(other);
                }
            }

            // remaining grams of this event, until the next timestamp
            while !malformed && self.offs < self.size {
                let prev_offs = self.offs;
                let Some(gram) = decode_gram(codebook, data, &mut self.offs, fstats) else {
                    malformed = true;
                    break;
                };
                let item = gram_first(gram);
                let f = item.field() as usize;
                if f == 0 {
                    // the next event; step back
                    self.offs = prev_offs;
                    break;
                }
                if f >= num_fields {
                    malformed = true;
                    break;
                }
                self.prev_items[f] = item.raw();
                self.changed.push(item);
                if let Some(other) = gram_other(gram) {
                    let fo = other.field() as usize;
                    if fo == 0 || fo >= num_fields {
                        malformed = true;
                        break;
                    }
                    self.prev_items[fo] = other.raw();
                    self.changed.push(other);
                }
            }
            if malformed {
                self.offs = self.size;
                break;
            }

            let pass = match &self.filter {
                None => true,
                Some(f) => f.matches(self.tstamp, &self.prev_items),
            };
            if pass {
                let start = self.ev_items.len();
                if !self.only_diff || self.first_satisfying {
                    for f in 1..num_fields {
                        self.ev_items.push(Item::from_raw(self.prev_items[f]));
                    }
                } else {
                    self.ev_items.extend_from_slice(&self.changed);
                }
                self.ev_meta.push(EventMeta {
                    timestamp: self.tstamp,
                    start,
                    len: self.ev_items.len() - start,
                });
                self.first_satisfying = false;
            }
        }
    }
}
