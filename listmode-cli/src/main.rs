//! List-mode decoder CLI application.
//!
//! Decodes spectrometer list-mode (.Lis) files to CSV, plus a metadata file
//! with the acquisition start time and hardware response statistics.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use listmode_core::{output, DecoderConfig, ListModeDecoder, MetadataFormat};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Spectrometer list-mode file decoder.
///
/// Decodes .Lis files chunk by chunk into a CSV of energy channels and
/// timestamps, and measures the hardware response time from the
/// acquisition clock stamps.
#[derive(Parser, Debug)]
#[command(name = "listmode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input list-mode .Lis file path
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output CSV file path, e.g. data.csv
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Chunk size in MiB to read at a time
    #[arg(short, long, default_value_t = 2)]
    chunk_size: usize,

    /// Append to existing output files instead of overwriting them
    #[arg(short, long)]
    append: bool,

    /// Metadata file format.
    ///
    /// The metadata file is written next to the output as
    /// <OUTPUT stem>_metaData.<txt|json>. Use "none" to skip it.
    #[arg(short, long, default_value = "txt")]
    metadata: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress progress and log output
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    if !args.quiet {
        init_logging(args.verbose);
    }

    let metadata_format = match args.metadata.to_lowercase().as_str() {
        "none" => None,
        other => Some(
            MetadataFormat::from_str(other)
                .context("Invalid metadata format. Use txt, json or none")?,
        ),
    };

    let config =
        DecoderConfig::with_chunk_mebibytes(args.chunk_size).context("Invalid chunk size")?;
    let mut decoder = ListModeDecoder::with_config(config).context("Invalid chunk size")?;

    // Open the input before touching the output
    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open input file {:?}", args.input))?;
    let input_len = input
        .metadata()
        .context("Failed to read input file metadata")?
        .len();

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(input_len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap(),
        );
        pb.set_message(format!(
            "Decoding {:?}",
            args.input.file_name().unwrap_or_default()
        ));
        pb
    };

    info!(
        input = ?args.input,
        bytes = input_len,
        chunk_size = config.chunk_size,
        "decoding list-mode file"
    );
    let start_time = Instant::now();

    let mut writer = output::create_csv(&args.output, args.append)
        .with_context(|| format!("Failed to create output file {:?}", args.output))?;

    let reader = progress.wrap_read(BufReader::new(input));
    let summary = decoder
        .decode_reader(reader, &mut writer)
        .context("Failed to decode list-mode file")?;

    let stats = summary.stats;

    let metadata_path = match metadata_format {
        Some(format) => {
            output::write_acquisition(&args.output, &summary.acquisition, format, args.append)
                .context("Failed to write metadata file")?
        }
        None => None,
    };

    let total_duration = start_time.elapsed();

    progress.finish_with_message(format!(
        "Done! Decoded {} events in {:.2}s",
        stats.events,
        total_duration.as_secs_f64()
    ));

    if !args.quiet {
        let events_per_sec = stats.events as f64 / total_duration.as_secs_f64();
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", args.output);
        eprintln!("  Events:       {}", stats.events);
        eprintln!("  Words:        {}", stats.words);
        eprintln!(
            "  Skipped:      {} live time, {} unknown, {} trailing bytes",
            stats.live_time_words, stats.unknown_words, stats.trailing_bytes
        );
        eprintln!("  Chunks:       {}", stats.chunks);
        match &summary.acquisition {
            Ok(timing) => {
                eprintln!("  Started:      {}", timing.start);
                eprintln!(
                    "  HW response:  {:.6} +/- {:.6} s over {} cycles",
                    timing.offset.mean, timing.offset.std_dev, timing.cycles
                );
            }
            Err(e) => eprintln!("  Timing:       skipped ({})", e),
        }
        if let Some(path) = metadata_path {
            eprintln!("  Metadata:     {:?}", path);
        }
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
        eprintln!("  Throughput:   {:.0} events/s", events_per_sec);
    }

    Ok(())
}
