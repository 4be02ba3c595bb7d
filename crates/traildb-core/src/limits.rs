// crates/traildb-core/src/limits.rs

/// Latest on-disk format version. Version 0 stores lexicon values as
/// NUL-terminated strings; version 1 uses the offset table.
pub const TDB_VERSION_V0: u64 = 0;
pub const TDB_VERSION_V0_1: u64 = 1;
pub const TDB_VERSION_LATEST: u64 = TDB_VERSION_V0_1;

pub const MAX_FIELDNAME_LENGTH: usize = 512;

/// MAX_NUM_TRAILS * 16 must fit in a signed 64-bit file offset.
pub const MAX_NUM_TRAILS: u64 = (1 << 59) - 1;

/// Trail offsets are bit-level. Each item takes at most 64 bits, so the
/// theoretical max is 2^58 events; 2^50 leaves a safety margin.
pub const MAX_TRAIL_LENGTH: u64 = (1 << 50) - 1;

/// One field is always the special 'time' field.
pub const MAX_NUM_FIELDS: u64 = (1 << 14) - 2;

/// One value is always the special NULL value.
pub const MAX_NUM_VALUES: u64 = (1 << 40) - 2;

/// Timestamp deltas get less future-proofing than values, see item.rs.
pub const MAX_TIMEDELTA: u64 = (1 << 47) - 1;

pub const MAX_VALUE_SIZE: u64 = 1 << 10;

/// Lexicon offsets are 32-bit.
pub const MAX_LEXICON_SIZE: u64 = u32::MAX as u64;

/// Field names end up in filenames, so the character set is restricted to
/// characters that urlencode trivially.
pub const FIELDNAME_CHARS: &str =
    "_-%abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Events decoded per cursor batch unless overridden on the reader.
pub const DEFAULT_CURSOR_EVENT_BUFFER_SIZE: usize = 1000;

/// Records buffered in a builder arena before it spills to a temp file.
pub const DEFAULT_ARENA_SPILL_BYTES: u64 = 128 * 1024 * 1024;
