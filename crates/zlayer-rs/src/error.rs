//! Error types for the zlayer-rs library.
//!
//! This module defines the error types used throughout the library. All
//! operations that can fail return a [`Result<T>`] which is an alias for
//! `Result<T, LayerError>`.
//!
//! # Error Categories
//!
//! Errors are organized into several categories:
//!
//! - **Lifecycle errors**: [`Closed`]
//! - **Lookup errors**: [`NotFound`], [`NotRegularFile`]
//! - **Read errors**: [`InvalidOffset`], [`ShortRead`], [`Extract`]
//! - **Verification errors**: [`VerificationFailed`], [`InvalidChunkDigest`]
//! - **Ingest errors**: [`Ingest`], [`IdExhausted`]
//! - **System errors**: [`Db`], [`Io`]
//!
//! [`Closed`]: LayerError::Closed
//! [`NotFound`]: LayerError::NotFound
//! [`NotRegularFile`]: LayerError::NotRegularFile
//! [`InvalidOffset`]: LayerError::InvalidOffset
//! [`ShortRead`]: LayerError::ShortRead
//! [`Extract`]: LayerError::Extract
//! [`VerificationFailed`]: LayerError::VerificationFailed
//! [`InvalidChunkDigest`]: LayerError::InvalidChunkDigest
//! [`Ingest`]: LayerError::Ingest
//! [`IdExhausted`]: LayerError::IdExhausted
//! [`Db`]: LayerError::Db
//! [`Io`]: LayerError::Io
//!
//! # Conversion Traits
//!
//! The error type implements `From` conversions for common error types:
//! - `std::io::Error` → `LayerError::Io`
//! - `jammdb::Error` → `LayerError::Db`
//!
//! This allows the `?` operator to work seamlessly with these error types.

/// Result type alias for operations that may return a [`LayerError`].
pub type Result<T> = std::result::Result<T, LayerError>;

/// Error types for layer reader and metadata store operations.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// Operation attempted on a reader or gate that was already closed.
    #[error("reader is already closed")]
    Closed,

    /// An inode, bucket, child entry, or namespace is missing.
    /// The payload names the operation and the id or path involved.
    #[error("not found: {0}")]
    NotFound(String),

    /// `open_file` was called on an inode that is not a regular file.
    #[error("inode {0} is not a regular file")]
    NotRegularFile(u32),

    /// A read was requested at a negative offset.
    #[error("invalid offset {0}")]
    InvalidOffset(i64),

    /// The span manager returned fewer bytes than the extent required.
    /// Fatal to the current read, not to the reader.
    #[error("unexpected copied data size for on-demand fetch. read = {read}, expected = {expected}")]
    ShortRead {
        /// Number of bytes actually copied into the caller's buffer.
        read: u64,
        /// Number of bytes the extent descriptor required.
        expected: u64,
    },

    /// File extraction from the compressed layer failed.
    #[error("extract failed: {0}")]
    Extract(String),

    /// A chunk digest mismatch was observed during warming and latched
    /// after `verify_toc` armed the prohibition.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// A digest string did not parse as `sha256:<64 hex chars>`.
    #[error("invalid chunk digest: {0}")]
    InvalidChunkDigest(String),

    /// Ingest of a ZTOC into the metadata store failed, including
    /// filesystem-id collision exhaustion.
    #[error("metadata ingest failed: {0}")]
    Ingest(String),

    /// The inode id sequence would overflow 32 bits.
    #[error("sequence id too large")]
    IdExhausted,

    /// Error from the embedded metadata database.
    #[error("metadata db error: {0}")]
    Db(#[from] jammdb::Error),

    /// I/O error occurred while reading layer bytes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Several errors accumulated during close.
    #[error("multiple errors: {0}")]
    Multi(String),
}

impl LayerError {
    /// Fold a list of errors into at most one.
    ///
    /// Returns `None` for an empty list, the sole error for a single-element
    /// list, and a [`LayerError::Multi`] joining the messages otherwise.
    pub fn aggregate(mut errors: Vec<LayerError>) -> Option<LayerError> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => {
                let joined = errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                Some(LayerError::Multi(joined))
            }
        }
    }
}
