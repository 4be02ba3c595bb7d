// crates/traildb-core/src/cons/mod.rs
//
// The builder half: ingest events into append-only arenas, then finalize
// into the on-disk artifact. All ingest state lives in the Constructor
// value; finalize consumes it, so a finalized builder cannot be reused.

pub mod arena;
pub mod encode;
pub mod grouper;
pub mod lexicon;
pub mod model;
pub mod package;

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::db::TrailDb;
use crate::error::{Result, TdbError};
use crate::huffman;
use crate::huffman::FieldStats;
use crate::item::{Field, Item, Val};
use crate::limits::*;
use crate::Uuid;

use arena::{Arena, ItemsView};
use grouper::ConsEvent;
use lexicon::LexiconBuilder;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Dir,
    Package,
}

#[derive(Debug, Clone)]
pub struct ConsOptions {
    pub output_format: OutputFormat,
    /// Fraction of UUIDs the gram-model passes look at.
    pub sample_rate: f64,
    /// Skip bigram modeling; the codebook is built from unigrams alone.
    pub no_bigrams: bool,
    /// Bytes an arena holds in memory before spilling to a temp file.
    pub spill_threshold: u64,
}

impl Default for ConsOptions {
    fn default() -> ConsOptions {
        ConsOptions {
            output_format: OutputFormat::Dir,
            sample_rate: 0.1,
            no_bigrams: false,
            spill_threshold: DEFAULT_ARENA_SPILL_BYTES,
        }
    }
}

impl ConsOptions {
    /// Environment overrides, applied at finalize: TDB_SAMPLE_SIZE,
    /// TDB_CONS_NO_BIGRAMS, TDB_CONS_OUTPUT_FORMAT.
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("TDB_SAMPLE_SIZE") {
            let rate: f64 = v
                .parse()
                .map_err(|_| TdbError::InvalidOptionValue(format!("TDB_SAMPLE_SIZE={v}")))?;
            if !(0.01..=1.0).contains(&rate) {
                return Err(TdbError::InvalidOptionValue(format!("TDB_SAMPLE_SIZE={v}")));
            }
            self.sample_rate = rate;
        }
        if std::env::var_os("TDB_CONS_NO_BIGRAMS").is_some() {
            self.no_bigrams = true;
        }
        if let Ok(v) = std::env::var("TDB_CONS_OUTPUT_FORMAT") {
            self.output_format = match v.as_str() {
                "dir" => OutputFormat::Dir,
                "pkg" | "package" => OutputFormat::Package,
                _ => {
                    return Err(TdbError::InvalidOptionValue(format!(
                        "TDB_CONS_OUTPUT_FORMAT={v}"
                    )))
                }
            };
        }
        Ok(())
    }
}

pub struct Constructor {
    root: PathBuf,
    ofield_names: Vec<String>,
    lexicons: Vec<LexiconBuilder>,
    events: Arena,
    items: Arena,
    /// uuid -> 1-based index of its latest event; the event records chain
    /// backwards from there.
    trails: BTreeMap<u128, u64>,
    min_timestamp: u64,
    opts: ConsOptions,
}

impl std::fmt::Debug for Constructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constructor")
            .field("root", &self.root)
            .field("ofield_names", &self.ofield_names)
            .field("trails_len", &self.trails.len())
            .field("min_timestamp", &self.min_timestamp)
            .field("opts", &self.opts)
            .finish()
    }
}

fn is_fieldname_invalid(name: &str) -> bool {
    name == "time"
        || name.is_empty()
        || name.len() > MAX_FIELDNAME_LENGTH
        || name.chars().any(|c| !FIELDNAME_CHARS.contains(c))
}

impl Constructor {
    pub fn new(root: impl AsRef<Path>, ofield_names: &[&str]) -> Result<Constructor> {
        Constructor::with_options(root, ofield_names, ConsOptions::default())
    }

    pub fn with_options(
        root: impl AsRef<Path>,
        ofield_names: &[&str],
        opts: ConsOptions,
    ) -> Result<Constructor> {
        let root = root.as_ref().to_path_buf();

        if ofield_names.len() as u64 > MAX_NUM_FIELDS {
            return Err(TdbError::TooManyFields);
        }
        for (i, name) in ofield_names.iter().enumerate() {
            if is_fieldname_invalid(name) {
                return Err(TdbError::InvalidFieldname(name.to_string()));
            }
            if ofield_names[..i].contains(name) {
                return Err(TdbError::DuplicateFields(name.to_string()));
            }
        }

        fs::create_dir_all(&root)?;

        let lexicons = ofield_names.iter().map(|_| LexiconBuilder::new()).collect();
        let events = Arena::new(&root, ConsEvent::SIZE, opts.spill_threshold);
        let items = Arena::new(&root, 8, opts.spill_threshold);

        Ok(Constructor {
            root,
            ofield_names: ofield_names.iter().map(|s| s.to_string()).collect(),
            lexicons,
            events,
            items,
            trails: BTreeMap::new(),
            min_timestamp: u64::MAX,
            opts,
        })
    }

    pub fn num_ofields(&self) -> usize {
        self.ofield_names.len()
    }

    pub fn num_events(&self) -> u64 {
        self.events.len()
    }

    /// Add one event. `values` must hold one byte string per non-time
    /// field, in field order; an empty value means NULL.
    pub fn add(&mut self, uuid: &Uuid, timestamp: u64, values: &[&[u8]]) -> Result<()> {
        if values.len() != self.ofield_names.len() {
            return Err(TdbError::FieldCountMismatch);
        }
        for v in values {
            if v.len() as u64 > MAX_VALUE_SIZE {
                return Err(TdbError::ValueTooLong(v.len() as u64));
            }
        }

        let mut items = Vec::with_capacity(values.len());
        for (i, v) in values.iter().enumerate() {
            let val = self.lexicons[i].insert(v)?;
            items.push(Item::new(i as Field + 1, val));
        }
        self.push_event(u128::from_be_bytes(*uuid), timestamp, &items)
    }

    fn push_event(&mut self, uuid_key: u128, timestamp: u64, items: &[Item]) -> Result<()> {
        let item_zero = self.items.len();
        for it in items {
            self.items.push(&it.raw().to_le_bytes())?;
        }

        let entry = self.trails.entry(uuid_key).or_insert(0);
        let ev = ConsEvent {
            item_zero,
            num_items: items.len() as u64,
            timestamp,
            prev_event_idx: *entry,
        };
        self.events.push(&ev.to_bytes())?;
        *entry = self.events.len();

        if timestamp < self.min_timestamp {
            self.min_timestamp = timestamp;
        }
        Ok(())
    }

    /// Rewrite every event of `db` into this builder, translating value
    /// ids through the destination lexicons. The source's field set must
    /// match exactly. Source filters (reader-global and per-trail) apply:
    /// only matching events are copied, and a trail whose every event is
    /// filtered out is skipped entirely.
    pub fn append(&mut self, db: &TrailDb) -> Result<()> {
        if self.ofield_names.len() as u64 + 1 != db.num_fields() {
            return Err(TdbError::AppendFieldsMismatch);
        }
        for (i, name) in self.ofield_names.iter().enumerate() {
            if db.get_field_name(i as Field + 1) != Some(name.as_str()) {
                return Err(TdbError::AppendFieldsMismatch);
            }
        }

        if db.num_events() > 0 && db.min_timestamp() < self.min_timestamp {
            self.min_timestamp = db.min_timestamp();
        }

        // Per-field value-id remap: intern every source lexicon entry.
        let mut maps: Vec<Vec<Val>> = Vec::with_capacity(self.ofield_names.len());
        for field in 0..self.ofield_names.len() {
            let size = db.lexicon_num_values(field as Field + 1)?;
            let mut map = Vec::with_capacity(size as usize);
            for id in 1..=size {
                let value = db
                    .get_value(field as Field + 1, id)
                    .ok_or_else(|| TdbError::InvalidLexiconFile(self.ofield_names[field].clone()))?;
                map.push(self.lexicons[field].insert(value)?);
            }
            maps.push(map);
        }

        let mut cursor = db.cursor_full();
        let mut items = Vec::with_capacity(self.ofield_names.len());
        for trail_id in 0..db.num_trails() {
            cursor.get_trail(trail_id)?;
            let uuid = db
                .get_uuid(trail_id)
                .ok_or(TdbError::InvalidTrailId(trail_id))?;
            let uuid_key = u128::from_be_bytes(uuid);

            loop {
                let Some(ev) = cursor.next() else { break };
                items.clear();
                for it in ev.items {
                    let field = it.field();
                    let mut val = it.val();
                    if val != 0 {
                        val = maps[field as usize - 1][val as usize - 1];
                    }
                    items.push(Item::new(field, val));
                }
                let timestamp = ev.timestamp;
                self.push_event(uuid_key, timestamp, &items)?;
            }
        }
        Ok(())
    }

    /// Consume the builder and emit the artifact.
    pub fn finalize(self) -> Result<()> {
        let Constructor {
            root,
            ofield_names,
            lexicons,
            events,
            items,
            trails,
            min_timestamp,
            mut opts,
        } = self;
        opts.apply_env()?;

        let num_events = events.len();
        let num_fields = ofield_names.len() + 1;
        debug!(num_events, num_trails = trails.len(), "finalizing");

        let events_view = events.finish()?;
        let items_store = items.finish()?;
        let items_view = ItemsView::new(items_store.bytes());

        // lexicons and the fields file
        {
            let mut fields_out = BufWriter::new(File::create(root.join("fields"))?);
            for (name, lex) in ofield_names.iter().zip(lexicons.iter()) {
                lex.store(&root.join(format!("lexicon.{name}")))?;
                writeln!(fields_out, "{name}")?;
            }
            fields_out.flush()?;
        }

        // uuids, sorted ascending; index in this file is the trail id
        if trails.len() as u64 > MAX_NUM_TRAILS {
            return Err(TdbError::TooManyTrails);
        }
        {
            let mut uuids_out = BufWriter::new(File::create(root.join("uuids"))?);
            for key in trails.keys() {
                uuids_out.write_all(&key.to_be_bytes())?;
            }
            uuids_out.flush()?;
        }

        {
            let mut version_out = File::create(root.join("version"))?;
            write!(version_out, "{TDB_VERSION_LATEST}")?;
        }

        // group by uuid, sort by time, delta-encode
        let min_timestamp = if num_events == 0 { 0 } else { min_timestamp };
        let grouped = grouper::group_by_uuid(&root, &trails, &events_view, min_timestamp)?;
        drop(events_view);
        drop(trails);

        encode::store_info(
            &root.join("info"),
            grouped.num_trails,
            num_events,
            min_timestamp,
            grouped.max_timestamp,
            grouped.max_timedelta,
        )?;

        let field_cardinalities: Vec<u64> = lexicons.iter().map(|l| l.num_values()).collect();
        let fstats = FieldStats::new(&field_cardinalities, grouped.max_timedelta);

        // two-pass gram model, then the codebook
        let unigram_freqs =
            model::collect_unigrams(&grouped, &items_view, num_fields, opts.sample_rate);
        let gram_freqs = if opts.no_bigrams {
            unigram_freqs
        } else {
            model::make_grams(
                &grouped,
                &items_view,
                num_fields,
                opts.sample_rate,
                &unigram_freqs,
            )
        };

        let codemap = huffman::create_codemap(&gram_freqs);

        encode::encode_trails(
            &items_view,
            &grouped,
            num_fields,
            &codemap,
            &gram_freqs,
            &fstats,
            &root.join("trails.data"),
            &root.join("trails.toc"),
        )?;

        encode::store_codebook(&huffman::create_codebook(&codemap), &root.join("trails.codebook"))?;

        if opts.output_format == OutputFormat::Package {
            package::cons_package(&root, &ofield_names)?;
        }

        debug!("finalize complete");
        Ok(())
    }
}
