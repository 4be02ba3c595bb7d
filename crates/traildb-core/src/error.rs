// crates/traildb-core/src/error.rs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TdbError>;

#[derive(Debug, Error)]
pub enum TdbError {
    /* input validation */
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("duplicate field name: {0}")]
    DuplicateFields(String),

    #[error("invalid field name: {0}")]
    InvalidFieldname(String),

    #[error("too many fields")]
    TooManyFields,

    #[error("too many trails")]
    TooManyTrails,

    #[error("trail too long")]
    TrailTooLong,

    #[error("value too long ({0} bytes)")]
    ValueTooLong(u64),

    #[error("lexicon too large: {0}")]
    LexiconTooLarge(String),

    #[error("timestamp delta too large")]
    TimestampTooLarge,

    #[error("wrong number of values for this store")]
    FieldCountMismatch,

    /* I/O */
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid package: {0}")]
    InvalidPackage(String),

    #[error("invalid info file")]
    InvalidInfoFile,

    #[error("invalid version file")]
    InvalidVersionFile,

    #[error("incompatible version: {0}")]
    IncompatibleVersion(u64),

    #[error("invalid fields file")]
    InvalidFieldsFile,

    #[error("invalid uuids file")]
    InvalidUuidsFile,

    #[error("invalid codebook file")]
    InvalidCodebookFile,

    #[error("invalid trails file")]
    InvalidTrailsFile,

    #[error("invalid lexicon file: {0}")]
    InvalidLexiconFile(String),

    /* configuration */
    #[error("unknown option")]
    UnknownOption,

    #[error("invalid option value: {0}")]
    InvalidOptionValue(String),

    /* queries */
    #[error("invalid trail id: {0}")]
    InvalidTrailId(u64),

    #[error("only-diff mode conflicts with event filters")]
    OnlyDiffFilter,

    #[error("no such filter term")]
    NoSuchItem,

    #[error("filter term has a different type")]
    IncorrectTermType,

    /* append */
    #[error("append: source fields do not match destination fields")]
    AppendFieldsMismatch,
}

impl TdbError {
    /// Stable numeric code, compatible with the classic TrailDB C ABI.
    pub fn code(&self) -> i32 {
        use TdbError::*;
        match self {
            UnknownField(_) => -4,
            InvalidTrailId(_) => -6,
            UnknownOption => -9,
            InvalidOptionValue(_) => -10,
            Io(_) => -65,
            InvalidInfoFile => -129,
            InvalidVersionFile => -130,
            IncompatibleVersion(_) => -131,
            InvalidFieldsFile => -132,
            InvalidUuidsFile => -133,
            InvalidCodebookFile => -134,
            InvalidTrailsFile => -135,
            InvalidLexiconFile(_) => -136,
            InvalidPackage(_) => -137,
            TooManyFields => -257,
            DuplicateFields(_) => -258,
            InvalidFieldname(_) => -259,
            TooManyTrails => -260,
            ValueTooLong(_) => -261,
            AppendFieldsMismatch => -262,
            LexiconTooLarge(_) => -263,
            TimestampTooLarge => -264,
            TrailTooLong => -265,
            NoSuchItem => -266,
            IncorrectTermType => -267,
            FieldCountMismatch => -268,
            OnlyDiffFilter => -513,
        }
    }
}
