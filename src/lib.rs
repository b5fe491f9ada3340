//! # zipper: Streaming single-entry ZIP codec
//!
//! `zipper` turns a byte stream into a ZIP archive holding one DEFLATE entry, and
//! turns ZIP archives back into the concatenation of their entries' payloads.
//! Both directions work on plain forward streams (`Read` in, `Write` out); nothing
//! is ever seeked.
//!
//! - **Compress**: constant memory. Data goes through a fixed copy buffer and a
//!   bounded compressed buffer; sizes and CRC-32 follow each entry in a data
//!   descriptor, so the sink never has to be rewound.
//! - **Decompress**: the ZIP directory lives at the end of the stream, so input is
//!   accumulated chunk by chunk until the trailer can be found. Payloads are then
//!   streamed out entry by entry and checked against their CRC-32.
//!
//! ## Quick Start
//!
//! ```
//! use zipper::{compress, decompress};
//!
//! let mut archive = Vec::new();
//! compress(&b"Hello, World!"[..], &mut archive, "hello.txt")?;
//!
//! let mut restored = Vec::new();
//! decompress(&archive[..], &mut restored)?;
//! assert_eq!(restored, b"Hello, World!");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Inspecting an archive
//!
//! ```
//! use zipper::{compress, ZipArchive};
//!
//! let mut archive = Vec::new();
//! compress(&b"data"[..], &mut archive, "logs/today.txt")?;
//!
//! let zip = ZipArchive::new(&archive)?;
//! assert_eq!(zip.entries()[0].name, "logs/today.txt");
//! assert_eq!(zip.read_entry_by_name("logs/today.txt")?, b"data");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod decoder;
pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use decoder::{decompress, DecodeStrategy, DecodeSummary, Decoder};
pub use error::{DecodeError, EncodeError, Result, ZipError};
pub use format::CompressionMethod;
pub use reader::{EntryReader, ZipArchive, ZipEntry};
pub use writer::{compress, EncodeSummary, Encoder, StreamingZipWriter};
