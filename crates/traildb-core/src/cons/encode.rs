// crates/traildb-core/src/cons/encode.rs
//
// Serialize grouped events into trails.data / trails.toc and write the
// codebook and info files.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TdbError};
use crate::huffman::bits::write_bits;
use crate::huffman::{encode_gram, encoded_max_bits, Codeword, FieldStats};

use super::arena::ItemsView;
use super::grouper::{Grouped, GroupedEvent};
use super::model::{choose_grams, edge_encode_items, GramBufs};

const INITIAL_ENCODING_BUF_BITS: u64 = 8 * 1024 * 1024;

/// Write per-trail bit streams plus the offset TOC.
///
/// Every trail starts with a 3-bit length residual: trail lengths are
/// measured in bytes but the last byte may be short, and the residual says
/// how many trailing bits to ignore. The stream ends with 8 zero bytes so
/// the decoder's 64-bit loads can overshoot safely.
pub fn encode_trails(
    items: &ItemsView,
    grouped: &Grouped,
    num_fields: usize,
    codemap: &HashMap<u64, Codeword>,
    gram_freqs: &BTreeMap<u64, u64>,
    fstats: &FieldStats,
    data_path: &Path,
    toc_path: &Path,
) -> Result<()> {
    let bytes = grouped.bytes();
    let num_events = grouped.num_events;
    let num_trails = grouped.num_trails;

    let mut out = BufWriter::new(File::create(data_path)?);
    let mut buf = vec![0u8; (INITIAL_ENCODING_BUF_BITS / 8 + 8) as usize];
    let mut buf_bits = INITIAL_ENCODING_BUF_BITS;
    let mut prev_items = vec![0u64; num_fields];
    let mut encoded = Vec::new();
    let mut grams = Vec::with_capacity(num_fields);
    let mut gbufs = GramBufs::new(num_fields);
    let mut toc: Vec<u64> = Vec::with_capacity(num_trails as usize + 1);
    let mut file_offs = 0u64;

    let mut i = 0u64;
    while i < num_events {
        // encode the trail for one UUID (multiple events)
        let trail_id = GroupedEvent::read(bytes, i).trail_id;
        let mut offs = 3u64;

        debug_assert_eq!(toc.len() as u64, trail_id);
        toc.push(file_offs);
        for p in prev_items.iter_mut() {
            *p = 0;
        }

        while i < num_events {
            let ev = GroupedEvent::read(bytes, i);
            if ev.trail_id != trail_id {
                break;
            }

            // 1) edge-encode this event's items
            edge_encode_items(items, &ev, &mut prev_items, &mut encoded);

            // 2) cover them with unigrams and bigrams
            choose_grams(&encoded, ev.tstamp_item, gram_freqs, &mut gbufs, &mut grams);

            let bits_needed = offs + encoded_max_bits(grams.len() as u64);
            if bits_needed >= u32::MAX as u64 {
                return Err(TdbError::TrailTooLong);
            }
            if bits_needed > buf_bits {
                buf_bits = bits_needed * 2;
                buf.resize((buf_bits / 8 + 8) as usize, 0);
            }

            // 3) huffman-encode the grams
            for &gram in grams.iter() {
                encode_gram(codemap, gram, &mut buf, &mut offs, fstats);
            }
            i += 1;
        }

        // write the length residual
        let trail_size = if offs & 7 != 0 {
            write_bits(&mut buf, 0, 8 - (offs & 7));
            offs / 8 + 1
        } else {
            offs / 8
        };

        out.write_all(&buf[..trail_size as usize])?;
        file_offs += trail_size;
        for b in buf[..trail_size as usize].iter_mut() {
            *b = 0;
        }
    }

    // the redundant last offset makes toc[i + 1] - toc[i] the trail length
    toc.push(file_offs);
    debug_assert_eq!(toc.len() as u64, num_trails + 1);

    // extra 8 null bytes: decoding may read up to 7 bytes ahead
    out.write_all(&[0u8; 8])?;
    file_offs += 8;
    out.flush()?;

    let mut toc_out = BufWriter::new(File::create(toc_path)?);
    if file_offs < u32::MAX as u64 {
        for &o in toc.iter() {
            toc_out.write_all(&(o as u32).to_le_bytes())?;
        }
    } else {
        for &o in toc.iter() {
            toc_out.write_all(&o.to_le_bytes())?;
        }
    }
    toc_out.flush()?;

    debug!(num_trails, data_bytes = file_offs, "trails encoded");
    Ok(())
}

pub fn store_info(
    path: &Path,
    num_trails: u64,
    num_events: u64,
    min_timestamp: u64,
    max_timestamp: u64,
    max_timedelta: u64,
) -> Result<()> {
    let mut out = File::create(path)?;
    writeln!(
        out,
        "{} {} {} {} {}",
        num_trails, num_events, min_timestamp, max_timestamp, max_timedelta
    )?;
    Ok(())
}

pub fn store_codebook(codebook: &[u8], path: &Path) -> Result<()> {
    let mut out = File::create(path)?;
    out.write_all(codebook)?;
    Ok(())
}
