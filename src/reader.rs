//! ZIP reader over an in-memory archive
//!
//! The archive bytes are borrowed, not copied: the end of central directory record
//! is located from the tail, the ZIP64 locator is followed when the classic record
//! is saturated, and the central directory is parsed into [`ZipEntry`] values.
//! Entry bodies are decompressed lazily through [`EntryReader`].

use crate::error::{Result, ZipError};
use crate::format::{
    parse_extended_timestamp, CompressionMethod, DosDateTime, ExtraFields, FieldReader,
    CENTRAL_DIRECTORY_HEADER_LEN, CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_LEN,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, EXTENDED_TIMESTAMP_EXTRA_ID, FLAG_ENCRYPTED, FLAG_UTF8,
    LOCAL_FILE_HEADER_SIGNATURE, MAX_COMMENT_LEN, ZIP64_END_OF_CENTRAL_DIRECTORY_LEN,
    ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN, ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE,
    ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE, ZIP64_EXTRA_ID,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use std::io::Read;
use std::ops::Range;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub crc32: u32,
    pub flags: u16,
    /// Local header offset, relative to the start of the archive
    pub offset: u64,
    /// Wall-clock time from the MS-DOS date/time fields
    pub modified: Option<NaiveDateTime>,
    /// UTC modification time from the extended timestamp extra field, when present
    pub mtime: Option<DateTime<Utc>>,
}

impl ZipEntry {
    /// Compression method, if it is one this crate can decode
    pub fn method(&self) -> Result<CompressionMethod> {
        CompressionMethod::from_zip_method(self.compression_method)
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Location of an archive's central directory, from its trailer records
struct Trailer {
    archive_start: usize,
    cd_start: usize,
    cd_end: usize,
    end: usize,
    total_entries: u64,
}

/// Read-only view over a complete ZIP archive held in memory
pub struct ZipArchive<'a> {
    data: &'a [u8],
    base: usize,
    entries: Vec<ZipEntry>,
}

impl<'a> ZipArchive<'a> {
    /// Parse the trailer and central directory of `data`
    ///
    /// Bytes before the archive (a self-extractor stub) and after the trailer's
    /// comment are tolerated.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let trailer = match read_trailer(data, true) {
            Ok(trailer) => trailer,
            Err(_) => read_trailer(data, false)?,
        };
        let entries = read_central_directory(data, &trailer)?;

        Ok(ZipArchive {
            data: &data[..trailer.end],
            base: trailer.archive_start,
            entries,
        })
    }

    /// Get list of all entries in the ZIP
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ZipEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry's decompressed data into a vector, verifying CRC-32 and size
    pub fn read_entry(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let mut reader = self.read_entry_streaming(entry)?;
        let mut data = Vec::with_capacity(entry.uncompressed_size.min(1 << 20) as usize);
        reader.read_to_end(&mut data)?;
        reader.verify()?;
        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?;
        self.read_entry(entry)
    }

    /// Get a streaming reader for an entry
    ///
    /// Data is decompressed on the fly; call [`EntryReader::verify`] after reading
    /// to end to check the stored CRC-32 and size.
    pub fn read_entry_streaming(&self, entry: &ZipEntry) -> Result<EntryReader<'a>> {
        let data: &'a [u8] = self.data;
        open_entry(&data[self.base..], entry)
    }
}

/// Decompressing reader over one entry's body
pub struct EntryReader<'a> {
    inner: Box<dyn Read + 'a>,
    crc: Crc32,
    bytes_read: u64,
    expected_crc: u32,
    expected_size: u64,
}

impl EntryReader<'_> {
    /// Decompressed bytes produced so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Check what was read against the central directory's size and CRC-32
    pub fn verify(&self) -> Result<()> {
        if self.bytes_read != self.expected_size {
            return Err(ZipError::SizeMismatch {
                expected: self.expected_size,
                actual: self.bytes_read,
            });
        }
        let actual = self.crc.clone().finalize();
        if actual != self.expected_crc {
            return Err(ZipError::ChecksumMismatch {
                expected: self.expected_crc,
                actual,
            });
        }
        Ok(())
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Open an entry's body inside `archive`, which must start at the archive's first byte
pub(crate) fn open_entry<'a>(archive: &'a [u8], entry: &ZipEntry) -> Result<EntryReader<'a>> {
    if entry.flags & FLAG_ENCRYPTED != 0 {
        return Err(ZipError::UnsupportedFeature(
            "encrypted entries".to_string(),
        ));
    }
    let method = entry.method()?;

    let offset = usize::try_from(entry.offset)
        .map_err(|_| ZipError::InvalidFormat("local header offset out of range".to_string()))?;
    let mut fields = FieldReader::at(archive, offset);

    let signature = fields.read_u32()?;
    if signature != LOCAL_FILE_HEADER_SIGNATURE {
        return Err(ZipError::InvalidFormat(
            "Invalid local file header signature".to_string(),
        ));
    }

    // version, flags, method, time, date, crc32, sizes: the central directory is authoritative
    fields.skip(22)?;
    let filename_len = fields.read_u16()? as usize;
    let extra_len = fields.read_u16()? as usize;
    fields.skip(filename_len + extra_len)?;

    let compressed_len = usize::try_from(entry.compressed_size)
        .map_err(|_| ZipError::InvalidFormat("compressed size out of range".to_string()))?;
    let body = fields.read_bytes(compressed_len).map_err(|_| {
        ZipError::InvalidFormat(format!(
            "data of '{}' extends past the end of the archive",
            entry.name
        ))
    })?;

    // One byte past the declared size is enough for verify() to report the mismatch
    let limit = entry.uncompressed_size.saturating_add(1);
    let inner: Box<dyn Read + 'a> = match method {
        CompressionMethod::Stored => Box::new(body.take(limit)),
        CompressionMethod::Deflate => Box::new(DeflateDecoder::new(body).take(limit)),
    };

    Ok(EntryReader {
        inner,
        crc: Crc32::new(),
        bytes_read: 0,
        expected_crc: entry.crc32,
        expected_size: entry.uncompressed_size,
    })
}

/// Split a buffer holding one or more back-to-back archives into per-archive
/// ranges, in stream order.
///
/// Archives are peeled from the tail: each trailer must end exactly where the
/// following archive starts. Stray bytes after the last archive are ignored, and
/// leading bytes that hold no archive (a self-extractor stub) are skipped.
pub(crate) fn find_archives(buf: &[u8]) -> Result<Vec<Range<usize>>> {
    let mut ranges = Vec::new();
    let last = match read_trailer(buf, true) {
        Ok(trailer) => trailer,
        Err(_) => read_trailer(buf, false)?,
    };
    ranges.push(last.archive_start..last.end);

    let mut end = last.archive_start;
    while end > 0 {
        match read_trailer(&buf[..end], true) {
            Ok(trailer) => {
                ranges.push(trailer.archive_start..end);
                end = trailer.archive_start;
            }
            Err(err) => {
                log::debug!(
                    "skipping {} leading bytes before the first archive: {}",
                    end,
                    err
                );
                break;
            }
        }
    }
    ranges.reverse();
    Ok(ranges)
}

/// Find the end of central directory record by scanning back from the end of `data`
///
/// With `exact_end`, the record plus its comment must finish at the last byte.
fn find_eocd(data: &[u8], exact_end: bool) -> Result<usize> {
    if data.len() < END_OF_CENTRAL_DIRECTORY_LEN {
        return Err(ZipError::InvalidFormat(format!(
            "{} bytes is too short for an end of central directory record",
            data.len()
        )));
    }

    let last = data.len() - END_OF_CENTRAL_DIRECTORY_LEN;
    let first = last.saturating_sub(MAX_COMMENT_LEN);
    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();

    for pos in (first..=last).rev() {
        if data[pos..pos + 4] != signature {
            continue;
        }
        let comment_len = u16::from_le_bytes([data[pos + 20], data[pos + 21]]) as usize;
        let record_end = pos + END_OF_CENTRAL_DIRECTORY_LEN + comment_len;
        if record_end == data.len() || (!exact_end && record_end < data.len()) {
            return Ok(pos);
        }
    }

    Err(ZipError::InvalidFormat(
        "End of central directory not found".to_string(),
    ))
}

fn read_trailer(data: &[u8], exact_end: bool) -> Result<Trailer> {
    let eocd_offset = find_eocd(data, exact_end)?;
    let mut fields = FieldReader::at(data, eocd_offset + 4);

    let disk_number = fields.read_u16()?;
    let cd_disk = fields.read_u16()?;
    let _entries_on_disk = fields.read_u16()?;
    // These values may be placeholder 0xFFFF/0xFFFFFFFF when ZIP64 is used
    let total_entries_16 = fields.read_u16()?;
    let cd_size_32 = fields.read_u32()?;
    let cd_offset_32 = fields.read_u32()?;
    let comment_len = fields.read_u16()? as usize;

    if disk_number != 0 || cd_disk != 0 {
        return Err(ZipError::UnsupportedFeature(
            "multi-disk archives".to_string(),
        ));
    }

    let (total_entries, cd_size, cd_offset, cd_end) =
        if total_entries_16 == 0xFFFF || cd_size_32 == 0xFFFFFFFF || cd_offset_32 == 0xFFFFFFFF {
            read_zip64_eocd(data, eocd_offset)?
        } else {
            (
                total_entries_16 as u64,
                cd_size_32 as u64,
                cd_offset_32 as u64,
                eocd_offset,
            )
        };

    // The central directory ends where the trailer records begin, which pins
    // down where the archive itself starts.
    let cd_size = usize::try_from(cd_size)
        .ok()
        .filter(|&size| size <= cd_end)
        .ok_or_else(|| {
            ZipError::InvalidFormat("central directory size exceeds the archive".to_string())
        })?;
    let cd_start = cd_end - cd_size;
    let archive_start = usize::try_from(cd_offset)
        .ok()
        .and_then(|offset| cd_start.checked_sub(offset))
        .ok_or_else(|| {
            ZipError::InvalidFormat("central directory offset exceeds the archive".to_string())
        })?;

    Ok(Trailer {
        archive_start,
        cd_start,
        cd_end,
        end: eocd_offset + END_OF_CENTRAL_DIRECTORY_LEN + comment_len,
        total_entries,
    })
}

/// When EOCD indicates ZIP64 usage, read the ZIP64 EOCD locator and record.
///
/// Returns (total entries, central directory size, central directory offset,
/// position of the ZIP64 EOCD record).
fn read_zip64_eocd(data: &[u8], eocd_offset: usize) -> Result<(u64, u64, u64, usize)> {
    let locator_offset = eocd_offset
        .checked_sub(ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN)
        .filter(|&pos| {
            has_signature(data, pos, ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE)
        })
        .ok_or_else(|| ZipError::InvalidFormat("ZIP64 EOCD locator not found".to_string()))?;

    // locator layout: signature(4), disk with the ZIP64 EOCD(4),
    // offset of the ZIP64 EOCD(8), total disks(4)
    let mut locator = FieldReader::at(data, locator_offset + 8);
    let recorded_offset = locator.read_u64()?;

    // The record normally sits right before the locator. The recorded offset is
    // relative to the archive start, so it is only a fallback when nothing precedes it.
    let record_offset = locator_offset
        .checked_sub(ZIP64_END_OF_CENTRAL_DIRECTORY_LEN)
        .filter(|&pos| has_signature(data, pos, ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE))
        .or_else(|| {
            usize::try_from(recorded_offset).ok().filter(|&pos| {
                pos < locator_offset
                    && has_signature(data, pos, ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE)
            })
        })
        .ok_or_else(|| {
            ZipError::InvalidFormat("ZIP64 end of central directory record not found".to_string())
        })?;

    let mut record = FieldReader::at(data, record_offset + 4);
    let _record_size = record.read_u64()?;
    // Skip version made by, version needed, disk number, disk where central dir starts
    record.skip(12)?;
    let _entries_on_disk = record.read_u64()?;
    let total_entries = record.read_u64()?;
    let cd_size = record.read_u64()?;
    let cd_offset = record.read_u64()?;

    Ok((total_entries, cd_size, cd_offset, record_offset))
}

fn has_signature(data: &[u8], pos: usize, signature: u32) -> bool {
    data.get(pos..pos.saturating_add(4)) == Some(&signature.to_le_bytes()[..])
}

fn read_central_directory(data: &[u8], trailer: &Trailer) -> Result<Vec<ZipEntry>> {
    let directory = &data[..trailer.cd_end];
    let mut fields = FieldReader::at(directory, trailer.cd_start);

    // Don't trust the declared count for preallocation
    let max_possible = (trailer.cd_end - trailer.cd_start) / CENTRAL_DIRECTORY_HEADER_LEN;
    let mut entries = Vec::with_capacity((trailer.total_entries as usize).min(max_possible));

    for index in 0..trailer.total_entries {
        let signature = fields.read_u32()?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(ZipError::InvalidFormat(format!(
                "Invalid central directory signature for entry {}: 0x{:08x}",
                index, signature
            )));
        }

        // Skip version made by, version needed
        fields.skip(4)?;
        let flags = fields.read_u16()?;
        let compression_method = fields.read_u16()?;
        let time = fields.read_u16()?;
        let date = fields.read_u16()?;
        let crc32 = fields.read_u32()?;
        // Sizes and offset may be 0xFFFFFFFF placeholders meaning ZIP64
        let compressed_size_32 = fields.read_u32()?;
        let uncompressed_size_32 = fields.read_u32()?;
        let filename_len = fields.read_u16()? as usize;
        let extra_len = fields.read_u16()? as usize;
        let comment_len = fields.read_u16()? as usize;
        // Skip disk number, internal attributes, external attributes
        fields.skip(8)?;
        let offset_32 = fields.read_u32()?;

        let filename = fields.read_bytes(filename_len)?;
        let extra = fields.read_bytes(extra_len)?;
        fields.skip(comment_len)?;

        let name = if flags & FLAG_UTF8 != 0 {
            String::from_utf8(filename.to_vec()).map_err(|_| {
                ZipError::InvalidFormat(format!("entry {} has an invalid UTF-8 name", index))
            })?
        } else {
            String::from_utf8_lossy(filename).into_owned()
        };

        let mut compressed_size = compressed_size_32 as u64;
        let mut uncompressed_size = uncompressed_size_32 as u64;
        let mut offset = offset_32 as u64;
        let mut mtime = None;

        for (id, field) in ExtraFields::new(extra) {
            match id {
                ZIP64_EXTRA_ID => {
                    // Values appear in fixed order, only for saturated fields
                    let mut zip64 = FieldReader::at(field, 0);
                    if uncompressed_size_32 == 0xFFFFFFFF {
                        uncompressed_size = zip64.read_u64()?;
                    }
                    if compressed_size_32 == 0xFFFFFFFF {
                        compressed_size = zip64.read_u64()?;
                    }
                    if offset_32 == 0xFFFFFFFF {
                        offset = zip64.read_u64()?;
                    }
                }
                EXTENDED_TIMESTAMP_EXTRA_ID => mtime = parse_extended_timestamp(field),
                _ => {}
            }
        }

        entries.push(ZipEntry {
            name,
            compressed_size,
            uncompressed_size,
            compression_method,
            crc32,
            flags,
            offset,
            modified: DosDateTime { date, time }.to_naive(),
            mtime,
        });
    }

    Ok(entries)
}
