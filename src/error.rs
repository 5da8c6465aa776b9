//! Error types for the arriba library.

use thiserror::Error;

/// Top-level error type for archive operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Selector and view resolution errors.
    #[error("selection error: {0}")]
    Select(#[from] SelectError),

    /// Errors while encoding documents into an archive.
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Errors while reading an archive.
    #[error("read error: {0}")]
    Read(#[from] ReadError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised when resolving selectors and views.
#[derive(Error, Debug)]
pub enum SelectError {
    /// No tagger in the archive matches the selector.
    #[error("no tagger matches selector {0}")]
    NoMatch(String),

    /// More than one tagger matches the selector.
    #[error("selector {0} matches {1} taggers")]
    Ambiguous(String, usize),

    /// Two view entries export the same name.
    #[error("name clash on '{0}'")]
    NameClash(String),

    /// Multiple taggers produce the same tag name and no view was given.
    #[error("{0} taggers with conflicting tag names in this archive, supply a view")]
    AmbiguousTags(usize),

    /// The requested tag name is not part of the active view.
    #[error("document has no tag '{0}'")]
    UnknownTag(String),
}

/// Errors raised while encoding a document.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The same `(tagger, name)` pair was registered twice for one document.
    #[error("duplicate code '{name}' in document")]
    DuplicateCode { name: String },

    /// A span exceeds the document text.
    #[error("span [{start}, {end}) out of range for text of {len} bytes")]
    OutOfRange { start: u64, end: u64, len: u64 },

    /// A parent reference points outside the tag list.
    #[error("parent index {0} out of range")]
    InvalidParent(i64),

    /// A column value exceeds the widest permitted element width.
    #[error("column value {max} exceeds the widest permitted width")]
    ColumnOverflow { max: u64 },

    /// The number of vector rows does not match the number of tags.
    #[error("expected {expected} vector rows, got {got}")]
    VectorCount { expected: usize, got: usize },

    /// Vector rows have inconsistent dimensions.
    #[error("inconsistent vector dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: u32, got: u32 },
}

/// Errors raised while opening or decoding an archive.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The archive was written with an unknown format version.
    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u64),

    /// The archive header or a document record is unreadable or inconsistent.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
