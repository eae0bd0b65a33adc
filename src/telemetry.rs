//! Per-read telemetry: one ordered record merging run, channel, read and
//! strand metadata.
//!
//! FAST5 files scatter the same facts across several locations, and which
//! locations exist depends on the software versions that touched the file.
//! The aggregator probes once for the event-detection subtree and from then
//! on follows a single path per mode. Missing fields become sentinels (`-1`
//! for counts, empty string for unset time fields) so the column set is
//! identical for every read.

use crate::container::{
    attr_float, attr_int, attr_str, basecall_1d, Container, CHANNEL_PATH, EVENT_READS_PATH,
    RAW_READS_PATH, TRACKING_PATH,
};
use crate::Strand;

/// Telemetry column names, in emission order.
pub const FIELDS: [&str; 19] = [
    "runID",
    "channel",
    "mux",
    "read",
    "offset",
    "range",
    "digitisation",
    "sampleRate",
    "rawStart",
    "rawLength",
    "templateRawStart",
    "templateRawLength",
    "templateCalledEvents",
    "templateCalledBases",
    "complementRawStart",
    "complementRawLength",
    "complementCalledEvents",
    "complementCalledBases",
    "fileName",
];

/// Per-strand slice of the telemetry record. `None` renders as the empty
/// string, `-1` is the numeric "absent" sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandTelemetry {
    pub raw_start: Option<i64>,
    pub raw_length: i64,
    pub called_events: Option<i64>,
    pub called_bases: i64,
}

impl Default for StrandTelemetry {
    fn default() -> Self {
        Self {
            raw_start: None,
            raw_length: -1,
            called_events: None,
            called_bases: -1,
        }
    }
}

/// One read's telemetry record. Field order is fixed (see [`FIELDS`]) and
/// stable across reads regardless of which metadata was present.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub run_id: String,
    pub channel: i64,
    pub mux: i64,
    pub read: i64,
    pub offset: f64,
    pub range: f64,
    pub digitisation: f64,
    pub sample_rate: f64,
    pub raw_start: Option<i64>,
    pub raw_length: i64,
    pub template: StrandTelemetry,
    pub complement: StrandTelemetry,
    pub file_name: String,
    /// Mode flag: the event-detection subtree was absent, so read metadata
    /// came from `/Raw/Reads` and per-strand timings from the basecall
    /// summary.
    pub use_raw: bool,
}

/// The run identifier: device id joined with the first 16 characters of the
/// run id.
pub(crate) fn run_id<C: Container>(c: &C) -> Option<String> {
    let device = attr_str(c, TRACKING_PATH, "device_id")?;
    let run = attr_str(c, TRACKING_PATH, "run_id")?;
    Some(format!(
        "{device}_{}",
        run.chars().take(16).collect::<String>()
    ))
}

impl Telemetry {
    /// Builds the record for one read, or `None` when the container lacks
    /// the minimal identity paths (tracking id, channel constants, and a
    /// reads group to sweep).
    pub fn from_container<C: Container>(c: &C, call_id: &str, file_name: &str) -> Option<Self> {
        let mut t = Telemetry {
            run_id: run_id(c)?,
            channel: attr_int(c, CHANNEL_PATH, "channel_number")?,
            mux: -1,
            read: -1,
            offset: attr_float(c, CHANNEL_PATH, "offset")?,
            range: attr_float(c, CHANNEL_PATH, "range")?,
            digitisation: attr_float(c, CHANNEL_PATH, "digitisation")?,
            sample_rate: attr_float(c, CHANNEL_PATH, "sampling_rate")?,
            raw_start: None,
            raw_length: -1,
            template: StrandTelemetry::default(),
            complement: StrandTelemetry::default(),
            file_name: file_name.to_string(),
            use_raw: !c.exists(EVENT_READS_PATH),
        };
        let reads_path = if t.use_raw {
            RAW_READS_PATH
        } else {
            EVENT_READS_PATH
        };
        if !c.exists(reads_path) {
            return None;
        }
        let reads = c.children(reads_path);
        if reads.len() > 1 {
            log::warn!(
                "{file_name}: {} read entries under {reads_path}, keeping the last ({})",
                reads.len(),
                reads.last().map(String::as_str).unwrap_or("")
            );
        }
        // last write wins when a container unexpectedly holds several reads
        for read_name in &reads {
            let read_path = format!("{reads_path}/{read_name}");
            t.mux = attr_int(c, &read_path, "start_mux").unwrap_or(-1);
            t.read = read_name
                .strip_prefix("Read_")
                .and_then(|n| n.parse().ok())
                .unwrap_or(-1);
            t.raw_start = Some(attr_int(c, &read_path, "start_time").unwrap_or(-1));
            t.raw_length = attr_int(c, &read_path, "duration").unwrap_or(-1);
        }
        let call_base = basecall_1d(call_id);
        for strand in [Strand::Template, Strand::Complement] {
            let summary = format!("{call_base}/Summary/basecall_1d_{}", strand.name());
            let timing = if t.use_raw {
                summary.clone()
            } else {
                format!("{call_base}/BaseCalled_{}/Events", strand.name())
            };
            let st = match strand {
                Strand::Template => &mut t.template,
                Strand::Complement => &mut t.complement,
            };
            if c.exists(&timing) {
                st.raw_start = Some(
                    attr_float(c, &timing, "start_time")
                        .map(|s| (s * t.sample_rate) as i64)
                        .unwrap_or(-1),
                );
                st.raw_length = attr_float(c, &timing, "duration")
                    .map(|d| (d * t.sample_rate) as i64)
                    .unwrap_or(-1);
            }
            if c.exists(&summary) {
                st.called_events = attr_int(c, &summary, "called_events");
                st.called_bases = attr_int(c, &summary, "sequence_length").unwrap_or(-1);
            }
        }
        Some(t)
    }

    pub fn header() -> String {
        FIELDS.join(",")
    }

    /// The record as one CSV row, columns in [`FIELDS`] order.
    pub fn csv_row(&self) -> String {
        fn opt(v: Option<i64>) -> String {
            v.map(|x| x.to_string()).unwrap_or_default()
        }
        [
            self.run_id.clone(),
            self.channel.to_string(),
            self.mux.to_string(),
            self.read.to_string(),
            self.offset.to_string(),
            self.range.to_string(),
            self.digitisation.to_string(),
            self.sample_rate.to_string(),
            opt(self.raw_start),
            self.raw_length.to_string(),
            opt(self.template.raw_start),
            self.template.raw_length.to_string(),
            opt(self.template.called_events),
            self.template.called_bases.to_string(),
            opt(self.complement.raw_start),
            self.complement.raw_length.to_string(),
            opt(self.complement.called_events),
            self.complement.called_bases.to_string(),
            self.file_name.clone(),
        ]
        .join(",")
    }
}
