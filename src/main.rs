use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, warn};

use fast5::container::h5::{H5Container, H5Store};
use fast5::{extract, strip, Fast5Error, Strand, FAST5_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Gated FASTQ records for every basecall iteration
    Fastq,
    /// Uncalled event-detection matrix as CSV
    Event,
    /// Template-strand basecalled event matrix as CSV
    Eventfwd,
    /// Complement-strand basecalled event matrix as CSV
    Eventrev,
    /// 2D consensus matrix with reconstructed boundaries as CSV
    Consensus,
    /// One telemetry row per file as CSV
    Telemetry,
    /// Whole raw trace as little-endian u16 samples
    Raw,
    /// Raw trace, running-median smoothed
    Rawsmooth,
    /// Template-strand slice of the raw trace, outlier-clamped
    Rawfwd,
    /// Complement-strand slice of the raw trace, outlier-clamped
    Rawrev,
    /// Remove Analyses subtrees in place (directory input)
    Strip,
}

impl Mode {
    fn batchable(self) -> bool {
        matches!(
            self,
            Mode::Fastq | Mode::Event | Mode::Eventfwd | Mode::Eventrev | Mode::Consensus
                | Mode::Telemetry
        )
    }
}

/// Extract reads, events, telemetry and raw signal from ONT FAST5 files.
#[derive(Debug, Parser)]
#[command(name = "fast5-extract", version, about)]
struct Args {
    /// What to extract
    #[arg(value_enum)]
    mode: Mode,

    /// A FAST5 file, or a directory to walk for FAST5 files
    path: PathBuf,

    /// Running-median window for rawsmooth, must be odd (1 disables smoothing)
    #[arg(long, default_value_t = 21)]
    median_window: usize,

    /// Worker threads for strip mode
    #[arg(long, default_value_t = strip::default_threads())]
    threads: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Fast5Error> {
    if args.median_window % 2 == 0 {
        return Err(Fast5Error::EvenMedianWindow(args.median_window));
    }
    let stdout = io::stdout().lock();
    let mut out = BufWriter::new(stdout);
    if args.path.is_dir() {
        let files = collect_fast5(&args.path)?;
        if args.mode == Mode::Strip {
            let summary = strip::strip_all(&H5Store, &files, args.threads)?;
            log::info!(
                "Stripped {}, untouched {}, failed {}",
                summary.stripped,
                summary.untouched,
                summary.failed
            );
            return Ok(());
        }
        if !args.mode.batchable() {
            return Err(Fast5Error::IOError(io::Error::other(
                "raw signal modes take a single file, not a directory",
            )));
        }
        let mut header = true;
        for path in &files {
            let container = match H5Container::open(path) {
                Ok(c) => c,
                Err(e) => {
                    warn!("{}: unreadable, skipping ({e})", path.display());
                    continue;
                }
            };
            if extract_one(args, &container, path, header, &mut out)? {
                header = false;
            }
        }
    } else {
        if args.mode == Mode::Strip {
            strip::strip_file(&H5Store, &args.path);
            return Ok(());
        }
        let container = H5Container::open(&args.path)?;
        extract_one(args, &container, &args.path, true, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

fn extract_one<W: Write>(
    args: &Args,
    c: &H5Container,
    path: &Path,
    header: bool,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match args.mode {
        Mode::Fastq => extract::fastq(c, &file_name, out),
        Mode::Event => extract::event_matrix(c, header, out),
        Mode::Eventfwd => extract::event_dir_matrix(c, Strand::Template, &file_name, header, out),
        Mode::Eventrev => extract::event_dir_matrix(c, Strand::Complement, &file_name, header, out),
        Mode::Consensus => extract::consensus_matrix(c, header, out),
        Mode::Telemetry => extract::telemetry_matrix(c, &file_name, header, out),
        Mode::Raw => extract::raw_signal(c, 1, out),
        Mode::Rawsmooth => extract::raw_signal(c, args.median_window, out),
        Mode::Rawfwd => extract::raw_dir_signal(c, Strand::Template, out),
        Mode::Rawrev => extract::raw_dir_signal(c, Strand::Complement, out),
        Mode::Strip => Ok(false),
    }
}

fn collect_fast5(root: &Path) -> Result<Vec<PathBuf>, Fast5Error> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(FAST5_SUFFIX))
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
