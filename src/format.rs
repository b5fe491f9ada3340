//! ZIP record layouts shared by the reader and the writer
//!
//! Field layouts follow PKWARE's APPNOTE. All multi-byte fields are little-endian.

use crate::error::{Result, ZipError};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

/// ZIP local file header signature
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP data descriptor signature
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// ZIP central directory signature
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;

/// ZIP64 end of central directory locator signature
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: u32 = 0x07064b50;

pub const LOCAL_FILE_HEADER_LEN: usize = 30;
pub const CENTRAL_DIRECTORY_HEADER_LEN: usize = 46;
pub const END_OF_CENTRAL_DIRECTORY_LEN: usize = 22;
/// ZIP64 EOCD record without extensible data
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LEN: usize = 56;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN: usize = 20;
pub const MAX_COMMENT_LEN: usize = u16::MAX as usize;

pub const ZIP64_EXTRA_ID: u16 = 0x0001;
pub const EXTENDED_TIMESTAMP_EXTRA_ID: u16 = 0x5455;
/// Extended timestamp extra field carrying only the modification time
pub const EXTENDED_TIMESTAMP_EXTRA_LEN: usize = 9;

pub const FLAG_ENCRYPTED: u16 = 1 << 0;
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
pub const FLAG_UTF8: u16 = 1 << 11;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;

/// Compression method of a ZIP entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (stored), accepted when reading only
    Stored,
    /// DEFLATE compression
    Deflate,
}

impl CompressionMethod {
    pub fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }

    pub fn from_zip_method(code: u16) -> Result<Self> {
        match code {
            0 => Ok(CompressionMethod::Stored),
            8 => Ok(CompressionMethod::Deflate),
            other => Err(ZipError::UnsupportedCompression(other)),
        }
    }
}

/// Bounds-checked little-endian cursor over an in-memory record
pub(crate) struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                ZipError::InvalidFormat(format!(
                    "record truncated at offset {} (needs {} more bytes)",
                    self.pos, len
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}

/// Iterator over `(header id, data)` pairs of an extra field block.
///
/// Stops at the first truncated field.
pub(crate) struct ExtraFields<'a> {
    data: &'a [u8],
}

impl<'a> ExtraFields<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([self.data[0], self.data[1]]);
        let len = u16::from_le_bytes([self.data[2], self.data[3]]) as usize;
        if 4 + len > self.data.len() {
            self.data = &[];
            return None;
        }
        let field = &self.data[4..4 + len];
        self.data = &self.data[4 + len..];
        Some((id, field))
    }
}

/// MS-DOS packed date and time, as stored in local and central headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable value
    pub const MIN: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// 2107-12-31 23:59:58
    pub const MAX: DosDateTime = DosDateTime {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    /// Pack a wall-clock time, clamping to the representable range.
    /// Seconds are stored with two-second resolution.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self::MIN;
        }
        if dt.year() > 2107 {
            return Self::MAX;
        }
        let date =
            (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        let time =
            ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        Self { date, time }
    }

    /// Unpack into a wall-clock time; `None` when the fields are out of range
    /// (archivers commonly write zeroes).
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let year = 1980 + (self.date >> 9) as i32;
        let month = ((self.date >> 5) & 0x0f) as u32;
        let day = (self.date & 0x1f) as u32;
        let hour = (self.time >> 11) as u32;
        let minute = ((self.time >> 5) & 0x3f) as u32;
        let second = ((self.time & 0x1f) * 2) as u32;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}

/// Extended timestamp extra field (0x5455) holding the modification time only
pub(crate) fn extended_timestamp_field(
    modified: &DateTime<Utc>,
) -> [u8; EXTENDED_TIMESTAMP_EXTRA_LEN] {
    let secs = modified.timestamp().clamp(0, u32::MAX as i64) as u32;
    let mut field = [0u8; EXTENDED_TIMESTAMP_EXTRA_LEN];
    field[0..2].copy_from_slice(&EXTENDED_TIMESTAMP_EXTRA_ID.to_le_bytes());
    field[2..4].copy_from_slice(&5u16.to_le_bytes());
    field[4] = 1; // mtime present
    field[5..9].copy_from_slice(&secs.to_le_bytes());
    field
}

/// Modification time from an extended timestamp extra field body
pub(crate) fn parse_extended_timestamp(data: &[u8]) -> Option<DateTime<Utc>> {
    if data.len() < 5 || data[0] & 1 == 0 {
        return None;
    }
    let secs = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    DateTime::from_timestamp(secs as i64, 0)
}
