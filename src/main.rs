//! zipper command-line tool: compress one file into a single-entry ZIP, or extract
//! a ZIP's entries back into one file.

use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser};
use log::LevelFilter;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tempfile::NamedTempFile;
use zipper::decoder::DEFAULT_CHUNK_SIZE;
use zipper::{DecodeStrategy, Decoder, Encoder};

#[derive(Parser)]
#[command(name = "zipper")]
#[command(
    version,
    about = "Stream a file into a single-entry ZIP archive, or back out of one",
    long_about = None
)]
#[command(group(ArgGroup::new("operation").required(true).args(["compress", "decompress"])))]
struct Cli {
    /// Path to the input file
    #[arg(short = 'f', value_name = "PATH")]
    file: PathBuf,

    /// Path to the output file
    #[arg(short = 'o', value_name = "PATH")]
    output: PathBuf,

    /// Compress the input into a ZIP archive
    #[arg(short = 'c')]
    compress: bool,

    /// Decompress a ZIP archive, concatenating the payloads of its entries
    #[arg(short = 'd')]
    decompress: bool,

    /// Entry name stored in the archive (default: the input path as given)
    #[arg(short = 'n', long, requires = "compress")]
    name: Option<String>,

    /// DEFLATE level (0-9)
    #[arg(
        short = 'l',
        long,
        requires = "compress",
        default_value_t = 6,
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    level: u32,

    /// Bytes read from the archive per chunk when decompressing
    #[arg(
        long,
        value_name = "BYTES",
        requires = "decompress",
        default_value_t = DEFAULT_CHUNK_SIZE as u64,
        value_parser = clap::value_parser!(u64).range(1..=1 << 30)
    )]
    chunk_size: u64,

    /// Refuse to decompress archives larger than this
    #[arg(long, value_name = "BYTES", requires = "decompress")]
    max_archive_size: Option<u64>,

    /// Treat every chunk as a self-contained archive (archives must fit in one chunk)
    #[arg(long, requires = "decompress")]
    per_chunk: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        LevelFilter::Error
    } else {
        match cli.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let input =
        File::open(&cli.file).with_context(|| format!("failed to open {}", cli.file.display()))?;
    let source = BufReader::new(input);

    // Output goes to a temp file next to the destination and is renamed into
    // place only on success; dropping it on any error path deletes it.
    let staged = stage_output(&cli.output)?;
    let mut sink = BufWriter::new(staged);

    if cli.compress {
        let name = match &cli.name {
            Some(name) => name.clone(),
            None => cli.file.to_string_lossy().into_owned(),
        };
        let summary = Encoder::new()
            .compression_level(cli.level)
            .compress(source, &mut sink, &name)
            .with_context(|| format!("failed to compress {}", cli.file.display()))?;
        log::info!(
            "Compression successful: {} bytes -> {} bytes",
            summary.bytes_read,
            summary.bytes_written
        );
    } else {
        let strategy = if cli.per_chunk {
            DecodeStrategy::PerChunk
        } else {
            DecodeStrategy::Accumulate
        };
        let mut decoder = Decoder::new()
            .chunk_size(cli.chunk_size as usize)
            .strategy(strategy);
        if let Some(limit) = cli.max_archive_size {
            decoder = decoder.max_archive_size(limit);
        }
        let summary = decoder
            .decompress(source, &mut sink)
            .with_context(|| format!("failed to decompress {}", cli.file.display()))?;
        log::info!(
            "Decompression successful: {} entries, {} bytes -> {} bytes",
            summary.entries,
            summary.bytes_read,
            summary.bytes_written
        );
    }

    let staged = sink
        .into_inner()
        .map_err(|e| e.into_error())
        .context("failed to flush output")?;
    staged
        .persist(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    Ok(())
}

fn stage_output(output: &Path) -> Result<NamedTempFile> {
    let dir = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create output in {}", dir.display()))
}
