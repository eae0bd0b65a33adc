//! Bulk removal of derived analyses from containers.
//!
//! Stripping a file rewrites it without its `Analyses` subtree: the reduced
//! copy is written next to the original, and only once that copy is complete
//! is the original removed and the copy renamed over it. Files with no
//! analyses are left untouched, so stripping is idempotent. Each file is an
//! independent unit of work with its own handle, which is what lets the
//! directory mode fan out over a worker pool without any locking.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use rayon::prelude::*;

use crate::Fast5Error;

/// Files submitted to the pool per batch; the next batch is not submitted
/// until the previous one completes, bounding outstanding work.
pub const STRIP_CHUNK: usize = 1000;

/// The file-level capability stripping needs from a container backend.
pub trait StripStore: Sync {
    /// Does this container carry any derived analyses?
    fn has_analyses(&self, path: &Path) -> Result<bool, Fast5Error>;

    /// Writes a complete copy of `src` minus its analyses subtree to `dst`.
    fn copy_stripped(&self, src: &Path, dst: &Path) -> Result<(), Fast5Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripOutcome {
    Stripped,
    Untouched,
    Failed,
}

/// Per-run tally of strip outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StripSummary {
    pub stripped: usize,
    pub untouched: usize,
    pub failed: usize,
}

impl StripSummary {
    fn add(&mut self, outcome: StripOutcome) {
        match outcome {
            StripOutcome::Stripped => self.stripped += 1,
            StripOutcome::Untouched => self.untouched += 1,
            StripOutcome::Failed => self.failed += 1,
        }
    }
}

/// Default strip worker count: half the available hardware parallelism,
/// at least one.
pub fn default_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Strips one file in place. Failures are reported in the outcome and
/// logged; they never propagate, so a bad file cannot take down a batch.
pub fn strip_file<S: StripStore>(store: &S, path: &Path) -> StripOutcome {
    match store.has_analyses(path) {
        Err(e) => {
            log::warn!("{}: unreadable, skipping ({e})", path.display());
            StripOutcome::Failed
        }
        Ok(false) => StripOutcome::Untouched,
        Ok(true) => {
            let mut tmp = path.as_os_str().to_owned();
            tmp.push(".stripped.fast5");
            let tmp = PathBuf::from(tmp);
            if let Err(e) = store.copy_stripped(path, &tmp) {
                log::warn!("{}: strip copy failed ({e})", path.display());
                let _ = fs::remove_file(&tmp);
                return StripOutcome::Failed;
            }
            // the copy is durably written; now swap it in
            if let Err(e) = fs::remove_file(path).and_then(|()| fs::rename(&tmp, path)) {
                log::warn!("{}: could not replace original ({e})", path.display());
                let _ = fs::remove_file(&tmp);
                return StripOutcome::Failed;
            }
            StripOutcome::Stripped
        }
    }
}

/// Strips a whole file list on a bounded worker pool, chunk by chunk.
pub fn strip_all<S: StripStore>(
    store: &S,
    files: &[PathBuf],
    threads: usize,
) -> Result<StripSummary, Fast5Error> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| Fast5Error::PoolBuild(e.to_string()))?;
    let total = files.len();
    let mut summary = StripSummary::default();
    for (chunk_index, chunk) in files.chunks(STRIP_CHUNK).enumerate() {
        let offset = chunk_index * STRIP_CHUNK;
        let outcomes: Vec<StripOutcome> = pool.install(|| {
            chunk
                .par_iter()
                .enumerate()
                .map(|(i, path)| {
                    let remaining = total - (offset + i) - 1;
                    if remaining == 1 || remaining % 100 == 0 {
                        log::info!(
                            "Processing '{}', {remaining} more file(s) to process",
                            path.display()
                        );
                    }
                    strip_file(store, path)
                })
                .collect()
        });
        for outcome in outcomes {
            summary.add(outcome);
        }
    }
    Ok(summary)
}
