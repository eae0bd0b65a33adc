//! Extracting data from ONT FAST5 files in Rust.
//!
//! A FAST5 file is a hierarchical container holding the raw signal, run
//! metadata, and optional derived analyses for a nanopore read. This crate
//! reconstructs the downstream representations of a read: tabular event
//! matrices, raw signal traces (optionally running-median smoothed), per-read
//! telemetry rows, the 2D consensus alignment with recovered time boundaries,
//! and FASTQ records gated on basecall quality. It also strips derived
//! analyses from containers in bulk for storage reclamation.
//!
//! Container access goes through the [`container::Container`] trait. The
//! `hdf5` cargo feature enables the HDF5-backed implementation; the in-memory
//! backend in [`container::mem`] is always available and is what the test
//! suite runs against.

pub mod align;
pub mod container;
mod error;
pub mod extract;
pub mod quality;
pub mod signal;
pub mod strip;
pub mod telemetry;

pub use error::Fast5Error;

/// File suffix recognized when walking a directory tree.
pub const FAST5_SUFFIX: &str = ".fast5";

/// Strand of a basecalled read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Template,
    Complement,
}

impl Strand {
    /// Group-name component used in basecall paths, e.g.
    /// `BaseCalled_template`.
    pub fn name(self) -> &'static str {
        match self {
            Strand::Template => "template",
            Strand::Complement => "complement",
        }
    }
}

/// Formats a basecall iteration counter the way analysis groups are named,
/// e.g. `format_call_id(1)` is `"001"`.
pub fn format_call_id(call_id: u32) -> String {
    format!("{call_id:03}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_call_id() {
        assert_eq!(format_call_id(0), "000");
        assert_eq!(format_call_id(12), "012");
        assert_eq!(format_call_id(1000), "1000");
    }
}
