//! Streaming ZIP writer that compresses data on-the-fly into a forward-only sink
//!
//! Sizes and CRC-32 are unknown when a local header goes out, so every entry sets
//! the data-descriptor flag and is followed by a descriptor record. Offsets for the
//! central directory are tracked by counting written bytes; the sink is never
//! seeked, so files, pipes, sockets and `Vec<u8>` all work.

use crate::error::{EncodeError, Result, ZipError};
use crate::format::{
    extended_timestamp_field, CompressionMethod, DosDateTime, CENTRAL_DIRECTORY_SIGNATURE,
    DATA_DESCRIPTOR_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, EXTENDED_TIMESTAMP_EXTRA_LEN,
    FLAG_DATA_DESCRIPTOR, FLAG_UTF8, LOCAL_FILE_HEADER_SIGNATURE, VERSION_DEFAULT, VERSION_ZIP64,
    ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE, ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE,
    ZIP64_EXTRA_ID,
};
use chrono::{DateTime, Local, Utc};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, ErrorKind, Read, Write};

/// Default DEFLATE level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Default size of the buffer used to pull bytes from the source
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Compressed bytes held back before they are drained to the sink
const FLUSH_THRESHOLD: usize = 256 * 1024;

/// Entry already written, kept for the central directory
struct ZipEntry {
    name: String,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    flags: u16,
    dos_time: DosDateTime,
    modified: DateTime<Utc>,
}

impl ZipEntry {
    fn needs_zip64(&self) -> bool {
        self.uncompressed_size >= u32::MAX as u64
            || self.compressed_size >= u32::MAX as u64
            || self.local_header_offset >= u32::MAX as u64
    }
}

struct CurrentEntry {
    name: String,
    local_header_offset: u64,
    flags: u16,
    dos_time: DosDateTime,
    modified: DateTime<Utc>,
    encoder: DeflateEncoder<CompressedBuffer>,
    counter: CrcCounter,
}

/// Metadata tracker for CRC and byte counts
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Holding area for deflate output between drains to the sink
struct CompressedBuffer {
    buffer: Vec<u8>,
}

impl CompressedBuffer {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(32 * 1024),
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= FLUSH_THRESHOLD
    }
}

impl Write for CompressedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink wrapper that knows how many bytes went through it
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming ZIP writer that DEFLATE-compresses entries into any `Write`
pub struct StreamingZipWriter<W: Write> {
    output: CountingWriter<W>,
    entries: Vec<ZipEntry>,
    current_entry: Option<CurrentEntry>,
    compression_level: u32,
}

impl<W: Write> StreamingZipWriter<W> {
    /// Create a writer with the default compression level (6)
    pub fn new(writer: W) -> Self {
        Self::with_compression(writer, DEFAULT_COMPRESSION_LEVEL)
    }

    /// Create a writer with a custom compression level (0-9)
    pub fn with_compression(writer: W, compression_level: u32) -> Self {
        Self {
            output: CountingWriter {
                inner: writer,
                written: 0,
            },
            entries: Vec::new(),
            current_entry: None,
            compression_level: compression_level.min(9),
        }
    }

    /// Bytes emitted to the sink so far
    pub fn bytes_written(&self) -> u64 {
        self.output.written
    }

    /// Start a new entry stamped with the current local time
    pub fn start_entry(&mut self, name: &str) -> Result<()> {
        self.start_entry_at(name, Local::now())
    }

    /// Start a new entry with an explicit modification time
    ///
    /// The previous entry, if any, is finished first. The name is stored verbatim
    /// and must be non-empty and at most 65535 bytes long.
    pub fn start_entry_at(&mut self, name: &str, modified: DateTime<Local>) -> Result<()> {
        if name.is_empty() {
            return Err(ZipError::InvalidEntryName("name is empty".to_string()));
        }
        if name.len() > u16::MAX as usize {
            return Err(ZipError::InvalidEntryName(format!(
                "name is {} bytes, the limit is {}",
                name.len(),
                u16::MAX
            )));
        }

        self.finish_current_entry()?;

        let local_header_offset = self.output.written;
        let flags = if name.is_ascii() {
            FLAG_DATA_DESCRIPTOR
        } else {
            FLAG_DATA_DESCRIPTOR | FLAG_UTF8
        };
        let dos_time = DosDateTime::from_naive(&modified.naive_local());
        let modified = modified.with_timezone(&Utc);

        self.output
            .write_all(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes())?;
        self.output.write_all(&VERSION_DEFAULT.to_le_bytes())?; // version needed
        self.output.write_all(&flags.to_le_bytes())?;
        self.output
            .write_all(&CompressionMethod::Deflate.to_zip_method().to_le_bytes())?;
        self.output.write_all(&dos_time.time.to_le_bytes())?;
        self.output.write_all(&dos_time.date.to_le_bytes())?;
        self.output.write_all(&0u32.to_le_bytes())?; // crc32, in data descriptor
        self.output.write_all(&0u32.to_le_bytes())?; // compressed size, in data descriptor
        self.output.write_all(&0u32.to_le_bytes())?; // uncompressed size, in data descriptor
        self.output.write_all(&(name.len() as u16).to_le_bytes())?;
        self.output
            .write_all(&(EXTENDED_TIMESTAMP_EXTRA_LEN as u16).to_le_bytes())?;
        self.output.write_all(name.as_bytes())?;
        self.output.write_all(&extended_timestamp_field(&modified))?;

        self.current_entry = Some(CurrentEntry {
            name: name.to_string(),
            local_header_offset,
            flags,
            dos_time,
            modified,
            encoder: DeflateEncoder::new(
                CompressedBuffer::new(),
                Compression::new(self.compression_level),
            ),
            counter: CrcCounter::new(),
        });

        Ok(())
    }

    /// Write uncompressed data to the current entry
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current_entry
            .as_mut()
            .ok_or_else(|| ZipError::InvalidFormat("No entry started".to_string()))?;

        entry.counter.update_uncompressed(data);
        entry.encoder.write_all(data)?;

        let buffer = entry.encoder.get_mut();
        if buffer.should_flush() {
            let compressed_data = buffer.take();
            self.output.write_all(&compressed_data)?;
            entry.counter.add_compressed(compressed_data.len() as u64);
        }

        Ok(())
    }

    /// Finish current entry and write its data descriptor
    fn finish_current_entry(&mut self) -> Result<()> {
        let Some(mut entry) = self.current_entry.take() else {
            return Ok(());
        };

        let mut buffer = entry.encoder.finish()?;
        let remaining_data = buffer.take();
        if !remaining_data.is_empty() {
            self.output.write_all(&remaining_data)?;
            entry.counter.add_compressed(remaining_data.len() as u64);
        }

        let crc = entry.counter.finalize();
        let compressed_size = entry.counter.compressed_count;
        let uncompressed_size = entry.counter.uncompressed_count;

        self.output
            .write_all(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes())?;
        self.output.write_all(&crc.to_le_bytes())?;
        // ZIP64 data descriptor whenever the central directory will defer to ZIP64 sizes
        if compressed_size >= u32::MAX as u64 || uncompressed_size >= u32::MAX as u64 {
            self.output.write_all(&compressed_size.to_le_bytes())?;
            self.output.write_all(&uncompressed_size.to_le_bytes())?;
        } else {
            self.output
                .write_all(&(compressed_size as u32).to_le_bytes())?;
            self.output
                .write_all(&(uncompressed_size as u32).to_le_bytes())?;
        }

        self.entries.push(ZipEntry {
            name: entry.name,
            local_header_offset: entry.local_header_offset,
            crc32: crc,
            compressed_size,
            uncompressed_size,
            flags: entry.flags,
            dos_time: entry.dos_time,
            modified: entry.modified,
        });
        Ok(())
    }

    /// Finish the last entry and write the central directory and trailer
    fn write_trailer(&mut self) -> Result<()> {
        self.finish_current_entry()?;

        let central_dir_offset = self.output.written;

        for entry in &self.entries {
            let zip64 = entry.needs_zip64();
            let version = if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

            // ZIP64 extra: only the fields whose 32-bit slot is saturated, in APPNOTE order
            let mut zip64_data: Vec<u8> = Vec::new();
            if entry.uncompressed_size >= u32::MAX as u64 {
                zip64_data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
            }
            if entry.compressed_size >= u32::MAX as u64 {
                zip64_data.extend_from_slice(&entry.compressed_size.to_le_bytes());
            }
            if entry.local_header_offset >= u32::MAX as u64 {
                zip64_data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
            }

            let mut extra_field: Vec<u8> = Vec::new();
            if zip64 {
                extra_field.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
                extra_field.extend_from_slice(&(zip64_data.len() as u16).to_le_bytes());
                extra_field.extend_from_slice(&zip64_data);
            }
            extra_field.extend_from_slice(&extended_timestamp_field(&entry.modified));

            self.output
                .write_all(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
            self.output.write_all(&version.to_le_bytes())?; // version made by
            self.output.write_all(&version.to_le_bytes())?; // version needed
            self.output.write_all(&entry.flags.to_le_bytes())?;
            self.output
                .write_all(&CompressionMethod::Deflate.to_zip_method().to_le_bytes())?;
            self.output.write_all(&entry.dos_time.time.to_le_bytes())?;
            self.output.write_all(&entry.dos_time.date.to_le_bytes())?;
            self.output.write_all(&entry.crc32.to_le_bytes())?;
            self.output
                .write_all(&saturate_u32(entry.compressed_size).to_le_bytes())?;
            self.output
                .write_all(&saturate_u32(entry.uncompressed_size).to_le_bytes())?;
            self.output
                .write_all(&(entry.name.len() as u16).to_le_bytes())?;
            self.output
                .write_all(&(extra_field.len() as u16).to_le_bytes())?;
            self.output.write_all(&0u16.to_le_bytes())?; // file comment len
            self.output.write_all(&0u16.to_le_bytes())?; // disk number start
            self.output.write_all(&0u16.to_le_bytes())?; // internal attrs
            self.output.write_all(&0u32.to_le_bytes())?; // external attrs
            self.output
                .write_all(&saturate_u32(entry.local_header_offset).to_le_bytes())?;
            self.output.write_all(entry.name.as_bytes())?;
            self.output.write_all(&extra_field)?;
        }

        let central_dir_size = self.output.written - central_dir_offset;

        let need_zip64 = self.entries.len() >= u16::MAX as usize
            || central_dir_size >= u32::MAX as u64
            || central_dir_offset >= u32::MAX as u64;

        if need_zip64 {
            let zip64_eocd_offset = self.output.written;

            self.output
                .write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
            // size of the remaining record: fixed fields only, no extensible data
            self.output.write_all(&44u64.to_le_bytes())?;
            self.output.write_all(&VERSION_ZIP64.to_le_bytes())?; // version made by
            self.output.write_all(&VERSION_ZIP64.to_le_bytes())?; // version needed
            self.output.write_all(&0u32.to_le_bytes())?; // disk number
            self.output.write_all(&0u32.to_le_bytes())?; // disk where central dir starts
            self.output
                .write_all(&(self.entries.len() as u64).to_le_bytes())?; // entries on disk
            self.output
                .write_all(&(self.entries.len() as u64).to_le_bytes())?; // total entries
            self.output.write_all(&central_dir_size.to_le_bytes())?;
            self.output.write_all(&central_dir_offset.to_le_bytes())?;

            self.output
                .write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE.to_le_bytes())?;
            self.output.write_all(&0u32.to_le_bytes())?; // disk with ZIP64 EOCD
            self.output.write_all(&zip64_eocd_offset.to_le_bytes())?;
            self.output.write_all(&1u32.to_le_bytes())?; // total number of disks
        }

        let entry_count = if self.entries.len() >= u16::MAX as usize {
            u16::MAX
        } else {
            self.entries.len() as u16
        };

        self.output
            .write_all(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // disk number
        self.output.write_all(&0u16.to_le_bytes())?; // disk with central dir
        self.output.write_all(&entry_count.to_le_bytes())?; // entries on disk
        self.output.write_all(&entry_count.to_le_bytes())?; // total entries
        self.output
            .write_all(&saturate_u32(central_dir_size).to_le_bytes())?;
        self.output
            .write_all(&saturate_u32(central_dir_offset).to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // comment len

        self.output.flush()?;
        Ok(())
    }

    /// Finish the ZIP (central directory + trailer) and return the sink
    pub fn finish(mut self) -> Result<W> {
        self.write_trailer()?;
        Ok(self.output.inner)
    }
}

/// 32-bit header value, or the 0xFFFFFFFF marker that defers to the ZIP64 field
fn saturate_u32(value: u64) -> u32 {
    if value >= u32::MAX as u64 {
        u32::MAX
    } else {
        value as u32
    }
}

/// Byte counts of a finished [`Encoder::compress`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Bytes pulled from the source
    pub bytes_read: u64,
    /// Archive bytes written to the sink
    pub bytes_written: u64,
}

/// Single-entry archive encoder
///
/// ```
/// use zipper::Encoder;
///
/// let mut archive = Vec::new();
/// let summary = Encoder::new()
///     .compression_level(9)
///     .compress(&b"hello hello hello"[..], &mut archive, "greeting.txt")?;
/// assert_eq!(summary.bytes_read, 17);
/// assert_eq!(summary.bytes_written, archive.len() as u64);
/// # Ok::<(), zipper::EncodeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Encoder {
    compression_level: u32,
    buffer_size: usize,
    modified: Option<DateTime<Local>>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            modified: None,
        }
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// DEFLATE level, clamped to 0-9
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Size of the copy buffer between source and compressor
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Fixed modification time instead of the time of the call
    pub fn modified(mut self, at: DateTime<Local>) -> Self {
        self.modified = Some(at);
        self
    }

    /// Compress `source` into a single-entry archive named `name` written to `sink`
    pub fn compress<R: Read, W: Write>(
        &self,
        mut source: R,
        sink: W,
        name: &str,
    ) -> std::result::Result<EncodeSummary, EncodeError> {
        let mut writer = StreamingZipWriter::with_compression(sink, self.compression_level);
        let modified = self.modified.unwrap_or_else(Local::now);

        writer
            .start_entry_at(name, modified)
            .map_err(EncodeError::HeaderWriteFailed)?;
        log::trace!("opened entry '{}'", name);

        let mut buf = vec![0u8; self.buffer_size];
        let mut bytes_read = 0u64;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EncodeError::CopyFailed(ZipError::Io(e))),
            };
            bytes_read += n as u64;
            writer
                .write_data(&buf[..n])
                .map_err(EncodeError::CopyFailed)?;
        }

        writer.write_trailer().map_err(EncodeError::CopyFailed)?;
        let summary = EncodeSummary {
            bytes_read,
            bytes_written: writer.bytes_written(),
        };
        log::debug!(
            "compressed {} bytes into a {} byte archive",
            summary.bytes_read,
            summary.bytes_written
        );
        Ok(summary)
    }
}

/// Compress `source` into a single-entry ZIP archive written to `sink`
///
/// The entry is DEFLATE-compressed, named `name` and stamped with the current time.
/// Memory use does not depend on the size of the source.
pub fn compress<R: Read, W: Write>(
    source: R,
    sink: W,
    name: &str,
) -> std::result::Result<(), EncodeError> {
    Encoder::new().compress(source, sink, name).map(|_| ())
}
