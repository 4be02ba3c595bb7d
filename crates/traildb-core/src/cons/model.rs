// crates/traildb-core/src/cons/model.rs
//
// Two-pass gram model over the grouped events: unigram frequencies first,
// then bigram frequencies over frequent ("candidate") unigrams, and
// finally the frequencies of the grams actually chosen per event. The last
// distribution is what the Huffman codebook is built from. This is a very
// simple rendition of the Apriori frequent-set idea, limited to pairs.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::item::{gram_bigram, Item};

use super::arena::ItemsView;
use super::grouper::{Grouped, GroupedEvent};

const RANDOM_SEED: u64 = 238713;
const UNIGRAM_SUPPORT: f64 = 0.00001;

/// Emit the items of `ev` that differ from the previous event of the same
/// trail, updating `prev_items` as it goes. The caller resets `prev_items`
/// to zero at every trail boundary, so the first event emits everything.
pub fn edge_encode_items(
    items: &ItemsView,
    ev: &GroupedEvent,
    prev_items: &mut [u64],
    encoded: &mut Vec<Item>,
) {
    encoded.clear();
    for j in ev.item_zero..ev.item_zero + ev.num_items {
        let raw = items.get(j);
        let field = Item::from_raw(raw).field() as usize;
        if prev_items[field] != raw {
            prev_items[field] = raw;
            encoded.push(Item::from_raw(raw));
        }
    }
}

fn lcg_next(x: &mut u64) -> u64 {
    // deterministic, not crypto
    *x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
    *x
}

/// Stream every trail in the grouped file, sample whole UUIDs (edge
/// encoding is stateful within a trail, so sampling single events is not
/// an option), and call `op` with each sampled event's edge-encoded items
/// and its timestamp-delta item. The first UUID is always included so the
/// model never ends up empty.
fn event_fold<F>(grouped: &Grouped, items: &ItemsView, num_fields: usize, sample_rate: f64, mut op: F)
where
    F: FnMut(&[Item], u64),
{
    let bytes = grouped.bytes();
    let num_events = grouped.num_events;
    let sample_threshold = (sample_rate * u32::MAX as f64) as u64;

    let mut prev_items = vec![0u64; num_fields];
    let mut encoded: Vec<Item> = Vec::new();
    let mut rand_state = RANDOM_SEED;

    let mut i = 0u64;
    while i < num_events {
        let ev = GroupedEvent::read(bytes, i);
        let trail_id = ev.trail_id;

        if i == 0 || (lcg_next(&mut rand_state) >> 32) < sample_threshold {
            for p in prev_items.iter_mut() {
                *p = 0;
            }
            while i < num_events {
                let ev = GroupedEvent::read(bytes, i);
                if ev.trail_id != trail_id {
                    break;
                }
                edge_encode_items(items, &ev, &mut prev_items, &mut encoded);
                op(&encoded, ev.tstamp_item);
                i += 1;
            }
        } else {
            while i < num_events && GroupedEvent::read(bytes, i).trail_id == trail_id {
                i += 1;
            }
        }
    }
}

/// Pass 1: frequencies of all edge-encoded items, timestamp deltas
/// included.
pub fn collect_unigrams(
    grouped: &Grouped,
    items: &ItemsView,
    num_fields: usize,
    sample_rate: f64,
) -> BTreeMap<u64, u64> {
    let mut freqs: BTreeMap<u64, u64> = BTreeMap::new();
    event_fold(grouped, items, num_fields, sample_rate, |encoded, tstamp_item| {
        for it in encoded {
            *freqs.entry(it.raw()).or_insert(0) += 1;
        }
        *freqs.entry(tstamp_item).or_insert(0) += 1;
    });
    debug!(unigrams = freqs.len(), "collected unigram frequencies");
    freqs
}

/// Unigrams frequent enough to participate in bigrams. Only narrow items
/// qualify: a bigram packs both halves into one u64.
fn find_candidates(unigram_freqs: &BTreeMap<u64, u64>) -> BTreeSet<u64> {
    let total: u64 = unigram_freqs.values().sum();
    let support = (total as f64 * UNIGRAM_SUPPORT) as u64;

    unigram_freqs
        .iter()
        .filter(|&(&item, &freq)| freq > support && Item::from_raw(item).is_narrow())
        .map(|(&item, _)| item)
        .collect()
}

/// Scratch buffers for the per-event cover selection, sized once.
pub struct GramBufs {
    chosen: Vec<u64>,
    scores: Vec<u64>,
    covered: Vec<bool>,
}

impl GramBufs {
    pub fn new(num_fields: usize) -> GramBufs {
        GramBufs {
            chosen: Vec::with_capacity(num_fields * num_fields),
            scores: Vec::with_capacity(num_fields * num_fields),
            covered: vec![false; num_fields],
        }
    }
}

/// Cover one event's edge-encoded items with non-overlapping unigrams and
/// bigrams, greedy by descending bigram frequency (a small Weighted Exact
/// Cover). The timestamp item must come first in the output; a bigram that
/// contains it replaces the placeholder at position 0.
pub fn choose_grams(
    encoded: &[Item],
    tstamp_item: u64,
    gram_freqs: &BTreeMap<u64, u64>,
    g: &mut GramBufs,
    grams: &mut Vec<u64>,
) {
    grams.clear();
    g.chosen.clear();
    g.scores.clear();
    for c in g.covered.iter_mut() {
        *c = false;
    }

    // All candidate bigrams occurring in this event. Only narrow pairs
    // compose valid bigram keys; anything else stays a unigram.
    for i in 0..=encoded.len() {
        let first = if i == 0 {
            tstamp_item
        } else {
            encoded[i - 1].raw()
        };
        if !Item::from_raw(first).is_narrow() {
            continue;
        }
        for second in encoded.iter().skip(i) {
            if !second.is_narrow() {
                continue;
            }
            let bigram = first | (second.raw() << 32);
            if let Some(&freq) = gram_freqs.get(&bigram) {
                g.chosen.push(bigram);
                g.scores.push(freq);
            }
        }
    }

    // The timestamp placeholder; may be replaced by a bigram below.
    grams.push(tstamp_item);

    loop {
        let mut max_idx = 0usize;
        let mut max_score = 0u64;
        for (i, &score) in g.scores.iter().enumerate() {
            let first = Item::from_raw(g.chosen[i] & u32::MAX as u64);
            let second = Item::from_raw(g.chosen[i] >> 32);
            if !g.covered[first.field() as usize]
                && !g.covered[second.field() as usize]
                && score > max_score
            {
                max_score = score;
                max_idx = i;
            }
        }
        if max_score == 0 {
            break;
        }
        let chosen = g.chosen[max_idx];
        let first = Item::from_raw(chosen & u32::MAX as u64);
        let second = Item::from_raw(chosen >> 32);
        g.covered[first.field() as usize] = true;
        g.covered[second.field() as usize] = true;
        if first.field() == 0 {
            // keep the timestamp as the first gram
            grams[0] = chosen;
        } else {
            grams.push(chosen);
        }
    }

    // Remaining unigrams not covered by any chosen bigram.
    for it in encoded {
        if !g.covered[it.field() as usize] {
            grams.push(it.raw());
        }
    }
}

/// Passes 2a and 2b: bigram frequencies over candidate pairs, then the
/// frequencies of the grams the cover actually picks per event. The
/// returned map holds unigrams and bigrams with their non-overlapping
/// counts; both the codebook and the encode-time cover work from it.
pub fn make_grams(
    grouped: &Grouped,
    items: &ItemsView,
    num_fields: usize,
    sample_rate: f64,
    unigram_freqs: &BTreeMap<u64, u64>,
) -> BTreeMap<u64, u64> {
    let candidates = find_candidates(unigram_freqs);
    debug!(candidates = candidates.len(), "bigram candidate unigrams");

    let mut bigram_freqs: BTreeMap<u64, u64> = BTreeMap::new();
    event_fold(grouped, items, num_fields, sample_rate, |encoded, tstamp_item| {
        for i in 0..=encoded.len() {
            let first = if i == 0 {
                tstamp_item
            } else {
                encoded[i - 1].raw()
            };
            if !candidates.contains(&first) {
                continue;
            }
            for second in encoded.iter().skip(i) {
                if candidates.contains(&second.raw()) {
                    let bigram = gram_bigram(Item::from_raw(first), *second);
                    *bigram_freqs.entry(bigram).or_insert(0) += 1;
                }
            }
        }
    });

    let mut final_freqs: BTreeMap<u64, u64> = BTreeMap::new();
    let mut gbufs = GramBufs::new(num_fields);
    let mut grams: Vec<u64> = Vec::with_capacity(num_fields);
    event_fold(grouped, items, num_fields, sample_rate, |encoded, tstamp_item| {
        choose_grams(encoded, tstamp_item, &bigram_freqs, &mut gbufs, &mut grams);
        for &gram in grams.iter() {
            *final_freqs.entry(gram).or_insert(0) += 1;
        }
    });

    debug!(
        bigrams = bigram_freqs.len(),
        final_grams = final_freqs.len(),
        "gram model complete"
    );
    final_freqs
}
