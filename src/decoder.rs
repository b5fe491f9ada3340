//! Streaming archive decoder
//!
//! A ZIP archive's directory sits at the very end of the stream, so the decoder
//! accumulates the input chunk by chunk, locates every archive's trailer from the
//! tail once the source is exhausted, parses all directories, and only then streams
//! entry payloads to the sink in directory order.

use crate::error::{DecodeError, ZipError};
use crate::reader::{find_archives, open_entry, ZipArchive, ZipEntry};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::ops::Range;

/// Default number of bytes pulled from the source per read
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// How input bytes are grouped into archives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Buffer the whole input, then locate archives from its tail.
    ///
    /// Handles archives of any size up to the decoder's `max_archive_size`.
    #[default]
    Accumulate,
    /// Treat every `chunk_size` block of input as self-contained.
    ///
    /// Memory stays at one chunk, but each archive must start on a chunk boundary
    /// and fit inside a single chunk. An archive straddling a boundary fails with
    /// [`DecodeError::MalformedContainer`].
    PerChunk,
}

/// What a finished [`Decoder::decompress`] call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub archives: usize,
    pub entries: usize,
    /// Archive bytes pulled from the source
    pub bytes_read: u64,
    /// Payload bytes written to the sink
    pub bytes_written: u64,
}

enum State {
    Reading,
    ScanningForTrailer,
    HaveDirectory(Vec<Range<usize>>),
    StreamingEntries(VecDeque<(Range<usize>, ZipEntry)>),
    Done,
}

/// Archive decoder writing every entry's payload, in order, to one sink
///
/// ```
/// use zipper::{compress, Decoder};
///
/// let mut archive = Vec::new();
/// compress(&b"payload"[..], &mut archive, "p.txt")?;
///
/// let mut out = Vec::new();
/// let summary = Decoder::new()
///     .chunk_size(16)
///     .decompress(&archive[..], &mut out)?;
/// assert_eq!(out, b"payload");
/// assert_eq!(summary.entries, 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct Decoder {
    chunk_size: usize,
    max_archive_size: Option<u64>,
    strategy: DecodeStrategy,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_archive_size: None,
            strategy: DecodeStrategy::Accumulate,
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes requested from the source per read (at least 1)
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Refuse to buffer more than `limit` bytes of archive input
    pub fn max_archive_size(mut self, limit: u64) -> Self {
        self.max_archive_size = Some(limit);
        self
    }

    pub fn strategy(mut self, strategy: DecodeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Decode every archive in `source`, writing entry payloads to `sink`
    pub fn decompress<R: Read, W: Write>(
        &self,
        mut source: R,
        mut sink: W,
    ) -> Result<DecodeSummary, DecodeError> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut copy_buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut summary = DecodeSummary::default();
        let mut exhausted = false;
        let mut state = State::Reading;

        loop {
            state = match state {
                State::Reading => {
                    // Never pull more than one byte past the size limit
                    let chunk = u64::try_from(self.chunk_size).unwrap_or(u64::MAX);
                    let want = match self.max_archive_size {
                        Some(limit) => {
                            let room = limit.saturating_sub(buffer.len() as u64);
                            chunk.min(room.saturating_add(1))
                        }
                        None => chunk,
                    };
                    let n = read_chunk(&mut source, &mut buffer, want)? as u64;
                    summary.bytes_read += n;
                    exhausted = n < want;

                    if let Some(limit) = self.max_archive_size {
                        if buffer.len() as u64 > limit {
                            return Err(DecodeError::ContainerTooLarge { limit });
                        }
                    }

                    if exhausted || self.strategy == DecodeStrategy::PerChunk {
                        State::ScanningForTrailer
                    } else {
                        State::Reading
                    }
                }
                State::ScanningForTrailer => {
                    if buffer.is_empty() {
                        State::Done
                    } else {
                        let ranges =
                            find_archives(&buffer).map_err(DecodeError::MalformedContainer)?;
                        log::debug!(
                            "located {} archive(s) in {} buffered bytes",
                            ranges.len(),
                            buffer.len()
                        );
                        State::HaveDirectory(ranges)
                    }
                }
                State::HaveDirectory(ranges) => {
                    // Every directory is parsed before the first payload byte goes out
                    let mut queue = VecDeque::new();
                    for range in ranges {
                        let archive = ZipArchive::new(&buffer[range.clone()])
                            .map_err(DecodeError::MalformedContainer)?;
                        summary.archives += 1;
                        queue.extend(
                            archive
                                .into_entries()
                                .into_iter()
                                .map(|entry| (range.clone(), entry)),
                        );
                    }
                    State::StreamingEntries(queue)
                }
                State::StreamingEntries(mut queue) => match queue.pop_front() {
                    Some((range, entry)) => {
                        summary.bytes_written +=
                            copy_entry(&buffer[range], &entry, &mut sink, &mut copy_buf)?;
                        summary.entries += 1;
                        State::StreamingEntries(queue)
                    }
                    None if exhausted => State::Done,
                    None => {
                        buffer.clear();
                        State::Reading
                    }
                },
                State::Done => break,
            };
        }

        log::debug!(
            "decoded {} entries from {} archive(s), {} bytes written",
            summary.entries,
            summary.archives,
            summary.bytes_written
        );
        Ok(summary)
    }
}

/// Append up to `max` bytes from `source` to `buffer`.
///
/// Returns the number of bytes appended; fewer than `max` means the source hit
/// end-of-stream, and whatever arrived before it is kept. The buffer only grows as
/// bytes arrive, so a large chunk size costs nothing on a short input.
fn read_chunk<R: Read>(
    source: &mut R,
    buffer: &mut Vec<u8>,
    max: u64,
) -> Result<usize, DecodeError> {
    // read_to_end retries Interrupted and keeps what it read before an error
    source
        .by_ref()
        .take(max)
        .read_to_end(buffer)
        .map_err(DecodeError::ReadFailed)
}

/// Stream one entry's payload into `sink`, then verify and flush it
fn copy_entry<W: Write>(
    archive: &[u8],
    entry: &ZipEntry,
    sink: &mut W,
    buf: &mut [u8],
) -> Result<u64, DecodeError> {
    let mut reader = open_entry(archive, entry).map_err(|source| DecodeError::EntryOpenFailed {
        name: entry.name.clone(),
        source,
    })?;
    let copy_failed = |source: ZipError| DecodeError::EntryCopyFailed {
        name: entry.name.clone(),
        source,
    };

    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(copy_failed(e.into())),
        };
        sink.write_all(&buf[..n])
            .map_err(|e| copy_failed(e.into()))?;
    }

    reader.verify().map_err(copy_failed)?;
    sink.flush().map_err(|e| copy_failed(e.into()))?;

    log::trace!("extracted '{}' ({} bytes)", entry.name, reader.bytes_read());
    Ok(reader.bytes_read())
}

/// Decode a ZIP stream, writing the payload of every entry, in order, to `sink`
///
/// The whole archive is buffered before its directory can be read; payloads are
/// then streamed out entry by entry. Empty input decodes to empty output.
pub fn decompress<R: Read, W: Write>(source: R, sink: W) -> Result<(), DecodeError> {
    Decoder::new().decompress(source, sink).map(|_| ())
}
