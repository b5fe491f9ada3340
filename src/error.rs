//! Error types for zipper

use std::io;
use thiserror::Error;

/// Result type for low-level ZIP operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Errors raised while reading or writing ZIP structures
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid ZIP format or structure
    #[error("Invalid ZIP format: {0}")]
    InvalidFormat(String),
    /// Entry not found in ZIP archive
    #[error("Entry not found: {0}")]
    EntryNotFound(String),
    /// Entry name cannot be stored
    #[error("Invalid entry name: {0}")]
    InvalidEntryName(String),
    /// Unsupported compression method
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),
    /// Entry uses a ZIP feature this codec does not handle (encryption, patches, ...)
    #[error("Unsupported ZIP feature: {0}")]
    UnsupportedFeature(String),
    /// Decompressed data does not match the stored CRC-32
    #[error("CRC-32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Decompressed data does not match the stored size
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Failure of [`compress`](crate::compress)
///
/// Both variants are terminal: the sink may hold a truncated archive and the caller
/// has to start over with a fresh one.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The local file header could not be emitted
    #[error("failed to write entry header")]
    HeaderWriteFailed(#[source] ZipError),
    /// Reading the source or writing the sink failed after the header was written
    #[error("failed to copy source into archive")]
    CopyFailed(#[source] ZipError),
}

/// Failure of [`decompress`](crate::decompress)
///
/// A failed decode may leave part of the payload in the sink.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Reading the source failed with something other than end-of-stream
    #[error("failed to read archive input")]
    ReadFailed(#[source] io::Error),
    /// The buffered input is not a valid ZIP archive
    #[error("malformed archive")]
    MalformedContainer(#[source] ZipError),
    /// The buffered input grew past the configured maximum archive size
    #[error("archive exceeds the {limit} byte limit")]
    ContainerTooLarge { limit: u64 },
    /// An entry's local header or body could not be opened
    #[error("failed to open entry '{name}'")]
    EntryOpenFailed {
        name: String,
        #[source]
        source: ZipError,
    },
    /// An entry could not be decompressed into the sink
    #[error("failed to extract entry '{name}'")]
    EntryCopyFailed {
        name: String,
        #[source]
        source: ZipError,
    },
}
