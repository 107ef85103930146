use std::io;

use thiserror::Error;

/// Any error produced while reading or writing a track file.
///
/// The taxonomy is deliberately flat: callers almost always either bubble
/// the error up or match on a single variant (`NoSuchElement` for lookup
/// misses being the common case).
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid {0}")]
    Format(&'static str),
    #[error("read past the end of the buffer region")]
    Truncated,
    #[error("unsupported file version: {0}")]
    UnsupportedVersion(u16),
    #[error("unsupported compression")]
    UnsupportedCompression,
    #[error("magic does not match in either byte order")]
    BadSignature,
    #[error("input out of order: {0}")]
    SortOrder(String),
    #[error("duplicate chromosome: {0}")]
    DuplicateKey(String),
    #[error("no such element: {0}")]
    NoSuchElement(String),
}

pub type Result<T> = std::result::Result<T, TrackError>;
