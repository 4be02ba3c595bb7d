// crates/traildb-core/src/db/multi_cursor.rs
//
// Merges events from K cursors into one time-ordered stream on the fly,
// driven by a small indexed min-heap. Merging is zero-copy: returned
// events borrow the underlying cursors' batch buffers, which is also why
// an exhausted cursor cannot be refilled eagerly - the refill would
// invalidate events already handed out. Such a cursor is parked in
// `popped` and reinserted at the next call.
//
// Heap keys are (timestamp, registration index), so cursors registered
// first win timestamp ties.

use crate::item::Item;

use super::cursor::Cursor;

#[derive(Debug, Copy, Clone)]
pub struct MultiEvent<'a> {
    pub timestamp: u64,
    pub items: &'a [Item],
    /// Which registered cursor produced this event.
    pub cursor_idx: u64,
}

/// Binary min-heap over node ids with keyed reprioritization, the shape
/// the merge needs: peek, pop, insert, and change_priority in O(log n).
struct IndexedHeap {
    heap: Vec<usize>,
    pos: Vec<usize>,
    keys: Vec<(u64, u64)>,
}

const ABSENT: usize = usize::MAX;

impl IndexedHeap {
    fn new(n: usize) -> IndexedHeap {
        IndexedHeap {
            heap: Vec::with_capacity(n),
            pos: vec![ABSENT; n],
            keys: vec![(0, 0); n],
        }
    }

    fn clear(&mut self) {
        self.heap.clear();
        for p in self.pos.iter_mut() {
            *p = ABSENT;
        }
    }

    fn peek(&self) -> Option<usize> {
        self.heap.first().copied()
    }

    fn peek_key(&self) -> Option<(u64, u64)> {
        self.peek().map(|id| self.keys[id])
    }

    fn insert(&mut self, id: usize, key: (u64, u64)) {
        debug_assert_eq!(self.pos[id], ABSENT);
        self.keys[id] = key;
        self.pos[id] = self.heap.len();
        self.heap.push(id);
        self.sift_up(self.heap.len() - 1);
    }

    fn pop(&mut self) -> Option<usize> {
        let top = self.peek()?;
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        self.pos[self.heap[0]] = 0;
        self.heap.pop();
        self.pos[top] = ABSENT;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(top)
    }

    fn change_priority(&mut self, id: usize, key: (u64, u64)) {
        debug_assert_ne!(self.pos[id], ABSENT);
        self.keys[id] = key;
        let i = self.pos[id];
        self.sift_up(i);
        self.sift_down(self.pos[id]);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.keys[self.heap[i]] < self.keys[self.heap[parent]] {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut min = i;
            if left < self.heap.len() && self.keys[self.heap[left]] < self.keys[self.heap[min]] {
                min = left;
            }
            if right < self.heap.len() && self.keys[self.heap[right]] < self.keys[self.heap[min]] {
                min = right;
            }
            if min == i {
                break;
            }
            self.swap(i, min);
            i = min;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos[self.heap[a]] = a;
        self.pos[self.heap[b]] = b;
    }
}

pub struct MultiCursor<'db> {
    cursors: Vec<Cursor<'db>>,
    heap: IndexedHeap,
    /// Cursor whose batch was drained by an emit; it is reinserted (and
    /// refilled) lazily at the next call.
    popped: Option<usize>,
}

impl<'db> MultiCursor<'db> {
    /// Take ownership of positioned cursors. Registration order is the
    /// tie-break order for equal timestamps.
    pub fn new(cursors: Vec<Cursor<'db>>) -> MultiCursor<'db> {
        let n = cursors.len();
        let mut mc = MultiCursor {
            cursors,
            heap: IndexedHeap::new(n),
            popped: None,
        };
        mc.reset();
        mc
    }

    pub fn num_cursors(&self) -> usize {
        self.cursors.len()
    }

    /// Direct access to a registered cursor, e.g. to select another trail.
    /// Call reset() afterwards to rebuild the merge state.
    pub fn cursor_mut(&mut self, idx: usize) -> &mut Cursor<'db> {
        &mut self.cursors[idx]
    }

    pub fn into_cursors(self) -> Vec<Cursor<'db>> {
        self.cursors
    }

    /// Re-peek every cursor and rebuild the heap. Required after any
    /// underlying cursor was repositioned out-of-band.
    pub fn reset(&mut self) {
        self.heap.clear();
        for i in 0..self.cursors.len() {
            if self.cursors[i].ensure_buffered().is_some() {
                if let Some(ts) = self.cursors[i].buffered_timestamp() {
                    self.heap.insert(i, (ts, i as u64));
                }
            }
        }
        self.popped = None;
    }

    fn reinsert_popped(&mut self) {
        if let Some(i) = self.popped.take() {
            if self.cursors[i].ensure_buffered().is_some() {
                if let Some(ts) = self.cursors[i].buffered_timestamp() {
                    self.heap.insert(i, (ts, i as u64));
                }
            }
        }
    }

    /// The next event to be returned, without consuming it.
    pub fn peek(&mut self) -> Option<MultiEvent<'_>> {
        self.reinsert_popped();
        let id = self.peek_live()?;
        let ev = self.cursors[id].peek()?;
        Some(MultiEvent {
            timestamp: ev.timestamp,
            items: ev.items,
            cursor_idx: id as u64,
        })
    }

    /// Return the next event in merged timestamp order.
    pub fn next(&mut self) -> Option<MultiEvent<'_>> {
        self.reinsert_popped();
        let id = self.peek_live()?;
        let meta = self.cursors[id].take_buffered();

        if self.cursors[id].buffered_events() > 0 {
            if let Some(ts) = self.cursors[id].buffered_timestamp() {
                self.heap.change_priority(id, (ts, id as u64));
            }
        } else {
            // buffer drained; refilling now would invalidate the event we
            // are about to return
            self.heap.pop();
            self.popped = Some(id);
        }

        let cursor = &self.cursors[id];
        Some(MultiEvent {
            timestamp: meta.timestamp,
            items: cursor.items_of(&meta),
            cursor_idx: id as u64,
        })
    }

    /// Batched merge: while one cursor's run of timestamps stays at or
    /// below every other cursor's next timestamp, consume it without
    /// touching the heap. Emits at most `max_events` events through `f`
    /// and returns how many; a return short of `max_events` with events
    /// still pending just means a buffer boundary was hit - call again.
    pub fn next_batch<F>(&mut self, max_events: usize, mut f: F) -> usize
    where
        F: FnMut(MultiEvent<'_>),
    {
        self.reinsert_popped();
        let mut n = 0usize;

        while n < max_events {
            let Some(current) = self.heap.pop() else { break };
            let next_key = self.heap.peek_key();

            loop {
                if self.cursors[current].buffered_events() > 0 {
                    let Some(ts) = self.cursors[current].buffered_timestamp() else {
                        break;
                    };
                    let key = (ts, current as u64);
                    if n < max_events && next_key.map_or(true, |nk| key <= nk) {
                        let meta = self.cursors[current].take_buffered();
                        let cursor = &self.cursors[current];
                        f(MultiEvent {
                            timestamp: meta.timestamp,
                            items: cursor.items_of(&meta),
                            cursor_idx: current as u64,
                        });
                        n += 1;
                    } else {
                        // someone else is due; back into the heap
                        self.heap.insert(current, key);
                        break;
                    }
                } else {
                    // buffer boundary: park and stop so already-emitted
                    // events stay valid
                    self.popped = Some(current);
                    return n;
                }
            }
        }
        n
    }

    /// Top of the heap, skipping entries whose cursor was repositioned
    /// without a reset() and holds nothing.
    fn peek_live(&mut self) -> Option<usize> {
        loop {
            let id = self.heap.peek()?;
            if self.cursors[id].buffered_events() > 0 {
                return Some(id);
            }
            self.heap.pop();
        }
    }
}
