use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use zipper::{
    compress, decompress, DecodeError, DecodeStrategy, Decoder, EncodeError, StreamingZipWriter,
    ZipError,
};

mod common;

use common::{
    archive_of, central_directory_offset, compressible_data, random_data, FailingReader,
    FailingWriter,
};

#[test]
fn test_random_bytes_are_malformed() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for len in [1usize, 21, 22, 512, 100_000] {
        let mut garbage = vec![0u8; len];
        rng.fill_bytes(&mut garbage);

        let mut out = Vec::new();
        let err = decompress(&garbage[..], &mut out).unwrap_err();
        assert!(
            matches!(err, DecodeError::MalformedContainer(_)),
            "len {}: {:?}",
            len,
            err
        );
        assert!(out.is_empty());
    }
}

#[test]
fn test_empty_input_decodes_to_nothing() {
    let mut out = Vec::new();
    decompress(&b""[..], &mut out).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_archive_without_entries() {
    let archive = StreamingZipWriter::new(Vec::new()).finish().unwrap();
    let mut out = Vec::new();
    let summary = Decoder::new().decompress(&archive[..], &mut out).unwrap();
    assert_eq!(summary.archives, 1);
    assert_eq!(summary.entries, 0);
    assert!(out.is_empty());
}

#[test]
fn test_truncated_archive_is_malformed() {
    let archive = archive_of(&compressible_data(20_000), "t.txt");

    for cut in [archive.len() - 1, archive.len() - 22, archive.len() / 2, 10] {
        let mut out = Vec::new();
        let err = decompress(&archive[..cut], &mut out).unwrap_err();
        assert!(
            matches!(err, DecodeError::MalformedContainer(_)),
            "cut {}",
            cut
        );
        assert!(out.is_empty());
    }
}

#[test]
fn test_missing_leading_bytes_is_malformed() {
    let archive = archive_of(b"hello", "h.txt");
    let mut out = Vec::new();
    let err = decompress(&archive[1..], &mut out).unwrap_err();
    assert!(matches!(err, DecodeError::MalformedContainer(_)));
}

#[test]
fn test_trailing_bytes_after_archive_are_ignored() {
    let mut archive = archive_of(b"payload", "p.txt");
    archive.extend_from_slice(b"some junk appended by a transfer tool");

    let mut out = Vec::new();
    decompress(&archive[..], &mut out).unwrap();
    assert_eq!(out, b"payload");
}

#[test]
fn test_concatenated_archives_decode_in_order() {
    let mut stream = archive_of(b"first,", "1.txt");
    stream.extend(archive_of(b"second,", "2.txt"));
    stream.extend(archive_of(&compressible_data(50_000), "3.txt"));

    let mut expected = b"first,second,".to_vec();
    expected.extend(compressible_data(50_000));

    for chunk in [7, 4096, zipper::decoder::DEFAULT_CHUNK_SIZE] {
        let mut out = Vec::new();
        let summary = Decoder::new()
            .chunk_size(chunk)
            .decompress(&stream[..], &mut out)
            .unwrap();
        assert_eq!(out, expected);
        assert_eq!(summary.archives, 3);
        assert_eq!(summary.entries, 3);
    }
}

#[test]
fn test_per_chunk_with_chunk_aligned_archives() {
    let first = archive_of(b"ab", "a.txt");
    let second = archive_of(b"cd", "b.txt");
    assert_eq!(second.len(), first.len());

    let mut stream = first.clone();
    stream.extend_from_slice(&second);

    let mut out = Vec::new();
    let summary = Decoder::new()
        .chunk_size(first.len())
        .strategy(DecodeStrategy::PerChunk)
        .decompress(&stream[..], &mut out)
        .unwrap();
    assert_eq!(out, b"abcd");
    assert_eq!(summary.archives, 2);
}

#[test]
fn test_per_chunk_rejects_archive_straddling_boundary() {
    let payload = random_data(5_000);
    let archive = archive_of(&payload, "straddle.bin");
    let chunk = archive.len() - 1;

    let mut out = Vec::new();
    let err = Decoder::new()
        .chunk_size(chunk)
        .strategy(DecodeStrategy::PerChunk)
        .decompress(&archive[..], &mut out)
        .unwrap_err();
    assert!(matches!(err, DecodeError::MalformedContainer(_)));

    // Accumulation handles the same input
    let mut out = Vec::new();
    Decoder::new()
        .chunk_size(chunk)
        .decompress(&archive[..], &mut out)
        .unwrap();
    assert_eq!(out, payload);
}

#[test]
fn test_max_archive_size() {
    let archive = archive_of(&random_data(10_000), "limit.bin");

    let err = Decoder::new()
        .chunk_size(512)
        .max_archive_size(archive.len() as u64 - 1)
        .decompress(&archive[..], Vec::new())
        .unwrap_err();
    assert!(matches!(err, DecodeError::ContainerTooLarge { .. }));

    Decoder::new()
        .chunk_size(512)
        .max_archive_size(archive.len() as u64)
        .decompress(&archive[..], Vec::new())
        .unwrap();
}

#[test]
fn test_source_read_error_is_read_failed() {
    let archive = archive_of(&compressible_data(10_000), "r.txt");
    let source = FailingReader::new(archive, 50);

    let mut out = Vec::new();
    let err = Decoder::new()
        .chunk_size(16)
        .decompress(source, &mut out)
        .unwrap_err();
    assert!(matches!(err, DecodeError::ReadFailed(_)));
    assert!(out.is_empty());
}

#[test]
fn test_sink_write_error_is_entry_copy_failed() {
    let payload = compressible_data(100_000);
    let archive = archive_of(&payload, "w.txt");

    let err = decompress(&archive[..], FailingWriter::new(1000)).unwrap_err();
    match err {
        DecodeError::EntryCopyFailed { name, source } => {
            assert_eq!(name, "w.txt");
            assert!(matches!(source, ZipError::Io(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_crc_mismatch_is_entry_copy_failed() {
    let mut archive = archive_of(b"checksummed payload", "c.txt");
    let cd = central_directory_offset(&archive);
    archive[cd + 16] ^= 0xff;

    let err = decompress(&archive[..], Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::EntryCopyFailed {
            source: ZipError::ChecksumMismatch { .. },
            ..
        }
    ));
}

#[test]
fn test_size_mismatch_is_entry_copy_failed() {
    let mut archive = archive_of(b"twelve bytes", "s.txt");
    let cd = central_directory_offset(&archive);
    // uncompressed size field
    archive[cd + 24] = 5;

    let err = decompress(&archive[..], Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::EntryCopyFailed {
            source: ZipError::SizeMismatch { .. },
            ..
        }
    ));
}

#[test]
fn test_unsupported_method_is_entry_open_failed() {
    let mut archive = archive_of(b"bzip2 pretender", "m.txt");
    let cd = central_directory_offset(&archive);
    archive[cd + 10] = 12;

    let err = decompress(&archive[..], Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::EntryOpenFailed {
            source: ZipError::UnsupportedCompression(12),
            ..
        }
    ));
}

#[test]
fn test_encrypted_entry_is_entry_open_failed() {
    let mut archive = archive_of(b"secret", "e.txt");
    let cd = central_directory_offset(&archive);
    archive[cd + 8] |= 0x01;

    let err = decompress(&archive[..], Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::EntryOpenFailed {
            source: ZipError::UnsupportedFeature(_),
            ..
        }
    ));
}

#[test]
fn test_bad_local_header_is_entry_open_failed() {
    let mut archive = archive_of(b"body", "l.txt");
    archive[0] = b'X';

    let err = decompress(&archive[..], Vec::new()).unwrap_err();
    assert!(matches!(err, DecodeError::EntryOpenFailed { .. }));
}

#[test]
fn test_compress_source_error_is_copy_failed() {
    let source = FailingReader::new(random_data(100_000), 40_000);
    let mut sink = Vec::new();
    let err = compress(source, &mut sink, "fail.bin").unwrap_err();
    assert!(matches!(err, EncodeError::CopyFailed(ZipError::Io(_))));
}

#[test]
fn test_compress_unwritable_sink_is_header_write_failed() {
    let err = compress(&b"data"[..], FailingWriter::new(0), "x.txt").unwrap_err();
    assert!(matches!(
        err,
        EncodeError::HeaderWriteFailed(ZipError::Io(_))
    ));
}

#[test]
fn test_compress_sink_failing_mid_stream_is_copy_failed() {
    let payload = random_data(600_000);
    let err = compress(&payload[..], FailingWriter::new(100), "x.bin").unwrap_err();
    assert!(matches!(err, EncodeError::CopyFailed(ZipError::Io(_))));
}

#[test]
fn test_compress_empty_name_is_header_write_failed() {
    let mut sink = Vec::new();
    let err = compress(&b"data"[..], &mut sink, "").unwrap_err();
    assert!(matches!(
        err,
        EncodeError::HeaderWriteFailed(ZipError::InvalidEntryName(_))
    ));
    assert!(sink.is_empty());
}

#[test]
fn test_error_messages_carry_context() {
    let err = decompress(&b"definitely not a zip file"[..], Vec::new()).unwrap_err();
    assert_eq!(err.to_string(), "malformed archive");
    let message = std::error::Error::source(&err).unwrap().to_string();
    assert!(message.contains("End of central directory not found"));
}

#[test]
fn test_leading_stub_is_skipped() {
    let mut stream = b"MZ\x90\x00 self-extractor stub bytes".to_vec();
    stream.extend(archive_of(b"behind a stub", "stub.txt"));

    let mut out = Vec::new();
    let summary = Decoder::new().decompress(&stream[..], &mut out).unwrap();
    assert_eq!(out, b"behind a stub");
    assert_eq!(summary.archives, 1);

    let zip = zipper::ZipArchive::new(&stream).unwrap();
    assert_eq!(
        zip.read_entry_by_name("stub.txt").unwrap(),
        b"behind a stub"
    );
}

#[test]
fn test_leading_stub_before_concatenated_archives() {
    let mut stream = b"#!/bin/sh\nexit 0\n".to_vec();
    stream.extend(archive_of(b"one,", "1.txt"));
    stream.extend(archive_of(b"two", "2.txt"));

    let mut out = Vec::new();
    let summary = Decoder::new().decompress(&stream[..], &mut out).unwrap();
    assert_eq!(out, b"one,two");
    assert_eq!(summary.archives, 2);
}

#[test]
fn test_huge_chunk_size_on_small_input() {
    let archive = archive_of(b"small", "s.txt");
    let mut out = Vec::new();
    Decoder::new()
        .chunk_size(usize::MAX)
        .decompress(&archive[..], &mut out)
        .unwrap();
    assert_eq!(out, b"small");

    let err = Decoder::new()
        .chunk_size(usize::MAX)
        .decompress(&b"x"[..], Vec::new())
        .unwrap_err();
    assert!(matches!(err, DecodeError::MalformedContainer(_)));
}

#[test]
fn test_size_limit_with_huge_chunk_size() {
    let archive = archive_of(&random_data(10_000), "limit.bin");
    let err = Decoder::new()
        .chunk_size(usize::MAX)
        .max_archive_size(1000)
        .decompress(&archive[..], Vec::new())
        .unwrap_err();
    assert!(matches!(
        err,
        DecodeError::ContainerTooLarge { limit: 1000 }
    ));
}
