//! Shared helpers for the integration tests.
//!
//! Each integration test file is its own crate and uses only part of this module.

#![allow(dead_code)]

use chrono::{DateTime, Local, TimeZone};
use std::io::{self, Read, Write};
use zipper::Encoder;

/// Pattern that compresses well
pub fn compressible_data(size: usize) -> Vec<u8> {
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

/// Pseudo-random data that doesn't compress well
pub fn random_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = 0x12345678u32;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

pub fn fixed_time() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 5, 17, 10, 30, 20).unwrap()
}

/// Compress `data` into an in-memory archive with a fixed timestamp
pub fn archive_of(data: &[u8], name: &str) -> Vec<u8> {
    let mut archive = Vec::new();
    Encoder::new()
        .modified(fixed_time())
        .compress(data, &mut archive, name)
        .unwrap();
    archive
}

/// Position of the first central directory header in `archive`
pub fn central_directory_offset(archive: &[u8]) -> usize {
    archive
        .windows(4)
        .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
        .expect("no central directory header")
}

/// Reader that serves `data` and then fails instead of reporting end-of-stream
/// once `fail_at` bytes have been handed out
pub struct FailingReader {
    pub data: Vec<u8>,
    pub pos: usize,
    pub fail_at: usize,
}

impl FailingReader {
    pub fn new(data: Vec<u8>, fail_at: usize) -> Self {
        Self {
            data,
            pos: 0,
            fail_at,
        }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.fail_at {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "simulated read failure",
            ));
        }
        let end = self.fail_at.min(self.data.len()).min(self.pos + buf.len());
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}

/// Writer that accepts `limit` bytes and fails afterwards
pub struct FailingWriter {
    pub written: Vec<u8>,
    pub limit: usize,
}

impl FailingWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            written: Vec::new(),
            limit,
        }
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit - self.written.len();
        if room == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "simulated write failure",
            ));
        }
        let n = room.min(buf.len());
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
