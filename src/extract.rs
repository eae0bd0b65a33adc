//! Per-mode extraction from one open container.
//!
//! Each generator streams rows/records/samples into the supplied writer and
//! returns `Ok(false)` when the subtree it needs is not present, which in
//! batch mode just means "skip this file". Diagnostics go through `log`;
//! the data plane only ever receives successfully derived output.

use std::io::Write;

use itertools::Itertools;
use log::info;

use crate::align::{AlignmentWindow, BoundaryTracker, StrandEvents};
use crate::container::{
    attr_float, attr_int, basecall_1d, basecall_2d, Container, CHANNEL_PATH, EVENT_READS_PATH,
    RAW_READS_PATH,
};
use crate::quality::strand_ok;
use crate::signal::{clamp_outliers, smooth};
use crate::telemetry::{run_id, Telemetry};
use crate::{format_call_id, Fast5Error, Strand};

/// Uncalled event-detection matrix: one CSV row per event, prefixed with the
/// read identity.
pub fn event_matrix<C: Container, W: Write>(
    c: &C,
    header: bool,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    let Some(run_id) = run_id(c) else {
        return Ok(false);
    };
    let Some(channel) = attr_int(c, CHANNEL_PATH, "channel_number") else {
        return Ok(false);
    };
    if !c.exists(EVENT_READS_PATH) {
        return Ok(false);
    }
    let mut wrote_header = !header;
    for read_name in c.children(EVENT_READS_PATH) {
        let read_path = format!("{EVENT_READS_PATH}/{read_name}");
        let events_path = format!("{read_path}/Events");
        if !c.exists(&events_path) {
            continue;
        }
        let mux = attr_int(c, &read_path, "start_mux").unwrap_or(-1);
        let table = c.table(&events_path)?;
        if !wrote_header {
            writeln!(
                out,
                "runID,channel,mux,read,{}",
                table.columns().iter().join(",")
            )?;
            wrote_header = true;
        }
        for row in table.rows() {
            writeln!(
                out,
                "{run_id},{channel},{mux},{read_name},{}",
                row.iter().join(",")
            )?;
        }
    }
    Ok(true)
}

/// Basecalled event matrix for one strand, prefixed with identity, sample
/// rate and raw start.
pub fn event_dir_matrix<C: Container, W: Write>(
    c: &C,
    strand: Strand,
    file_name: &str,
    header: bool,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    let Some(t) = Telemetry::from_container(c, "000", file_name) else {
        return Ok(false);
    };
    let events_path = format!("{}/BaseCalled_{}/Events", basecall_1d("000"), strand.name());
    if !c.exists(&events_path) {
        return Ok(false);
    }
    let table = c.table(&events_path)?;
    if header {
        writeln!(
            out,
            "runID,channel,mux,read,sampleRate,rawStart,{}",
            table.columns().iter().join(",")
        )?;
    }
    let raw_start = t.raw_start.map(|v| v.to_string()).unwrap_or_default();
    let prefix = format!(
        "{},{},{},{},{},{raw_start}",
        t.run_id, t.channel, t.mux, t.read, t.sample_rate as i64
    );
    for row in table.rows() {
        writeln!(out, "{prefix},{}", row.iter().join(","))?;
    }
    Ok(true)
}

/// 2D consensus matrix with reconstructed time boundaries and base
/// positions. Only rows where the alignment moved are written.
pub fn consensus_matrix<C: Container, W: Write>(
    c: &C,
    header: bool,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    let Some(run_id) = run_id(c) else {
        return Ok(false);
    };
    let Some(channel) = attr_int(c, CHANNEL_PATH, "channel_number") else {
        return Ok(false);
    };
    let Some(rate) = attr_float(c, CHANNEL_PATH, "sampling_rate") else {
        return Ok(false);
    };
    let aln_path = format!("{}/BaseCalled_2D/Alignment", basecall_2d("000"));
    let temp_path = format!("{}/BaseCalled_template/Events", basecall_1d("000"));
    let comp_path = format!("{}/BaseCalled_complement/Events", basecall_1d("000"));
    if !c.exists(&aln_path) || !c.exists(&temp_path) || !c.exists(&comp_path) {
        return Ok(false);
    }
    let temp_table = c.table(&temp_path)?;
    let comp_table = c.table(&comp_path)?;
    let temp_starts = scaled(temp_table.float_column(&temp_path, "start")?, rate);
    let temp_lengths = scaled(temp_table.float_column(&temp_path, "length")?, rate);
    let comp_starts = scaled(comp_table.float_column(&comp_path, "start")?, rate);
    let comp_lengths = scaled(comp_table.float_column(&comp_path, "length")?, rate);
    let template = StrandEvents {
        starts: &temp_starts,
        lengths: &temp_lengths,
    };
    let complement = StrandEvents {
        starts: &comp_starts,
        lengths: &comp_lengths,
    };

    // identity sweep over the raw reads, last entry wins
    let mut read_name = String::new();
    let mut mux = -1;
    for name in c.children(RAW_READS_PATH) {
        mux = attr_int(c, &format!("{RAW_READS_PATH}/{name}"), "start_mux").unwrap_or(-1);
        read_name = name;
    }

    let aln = c.table(&aln_path)?;
    let templates = aln.int_column(&aln_path, "template")?;
    let complements = aln.int_column(&aln_path, "complement")?;
    let kmer_idx = aln
        .column_index("kmer")
        .ok_or_else(|| Fast5Error::MissingColumn {
            path: aln_path.clone(),
            column: "kmer".to_string(),
        })?;
    if header {
        writeln!(
            out,
            "runID,channel,mux,read,tempStart,tempEnd,compStart,compEnd,bpPos,{}",
            aln.columns().iter().join(",")
        )?;
    }
    let mut tracker = BoundaryTracker::new();
    for (i, row) in aln.rows().iter().enumerate() {
        let window = AlignmentWindow {
            template: templates[i],
            complement: complements[i],
            kmer: row[kmer_idx].to_string(),
        };
        if let Some(b) = tracker.step(&window, template, complement) {
            writeln!(
                out,
                "{run_id},{channel},{mux},{read_name},{},{},{},{},{},{}",
                b.temp_start,
                b.temp_end,
                b.comp_start,
                b.comp_end,
                b.base_pos,
                row.iter().join(",")
            )?;
        }
    }
    Ok(true)
}

fn scaled(seconds: Vec<f64>, rate: f64) -> Vec<i64> {
    seconds.into_iter().map(|s| (s * rate) as i64).collect()
}

/// One telemetry CSV row for this container.
pub fn telemetry_matrix<C: Container, W: Write>(
    c: &C,
    file_name: &str,
    header: bool,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    let Some(t) = Telemetry::from_container(c, "000", file_name) else {
        return Ok(false);
    };
    if header {
        writeln!(out, "{}", Telemetry::header())?;
    }
    writeln!(out, "{}", t.csv_row())?;
    Ok(true)
}

/// FASTQ records for every basecall iteration, gated per strand.
///
/// Iterates call ids `000, 001, …` until neither a 1D nor a 2D analysis
/// exists. A strand is emitted when it called at least one base, stayed
/// under 25 raw samples per called base, and its move histogram passed the
/// quality gate; a histogram rejection on either strand also suppresses the
/// 2D consensus record for that iteration.
pub fn fastq<C: Container, W: Write>(
    c: &C,
    file_name: &str,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    let mut call = 0u32;
    let mut call_str = String::new();
    let mut found = false;
    loop {
        let id = format_call_id(call);
        let Some(t) = Telemetry::from_container(c, &id, file_name) else {
            return Ok(found);
        };
        let base_1d = basecall_1d(&id);
        let base_2d = basecall_2d(&id);
        if !c.exists(&base_1d) && !c.exists(&base_2d) {
            break;
        }
        found = true;
        // v1.2 files nest the 1D groups beneath the 2D analysis
        let base = if c.exists(&base_1d) {
            base_1d
        } else {
            base_2d.clone()
        };
        let tag_end = format!("{}_ch{}_mux{}_read{}", t.run_id, t.channel, t.mux, t.read);
        let mut rejected = false;
        for strand in [Strand::Template, Strand::Complement] {
            let (st, tag) = match strand {
                Strand::Template => (&t.template, "1Dtemp"),
                Strand::Complement => (&t.complement, "1Dcomp"),
            };
            let mut accept = st.called_bases > 0 && st.raw_length / st.called_bases <= 25;
            let events_path = format!("{base}/BaseCalled_{}/Events", strand.name());
            if c.exists(&events_path) {
                let table = c.table(&events_path)?;
                if table.column_index("move").is_some() {
                    let moves = table.int_column(&events_path, "move")?;
                    if !strand_ok(&moves) {
                        info!("{file_name}: {} strand failed the move gate", strand.name());
                        accept = false;
                        rejected = true;
                    }
                }
            }
            let fastq_path = format!("{base}/BaseCalled_{}/Fastq", strand.name());
            if accept && c.exists(&fastq_path) {
                write_record(out, tag, &call_str, &tag_end, &c.text(&fastq_path)?)?;
            }
        }
        let cons_path = format!("{base_2d}/BaseCalled_2D/Fastq");
        if !rejected && c.exists(&cons_path) {
            write_record(out, "2Dcons", &call_str, &tag_end, &c.text(&cons_path)?)?;
        }
        call += 1;
        call_str = format!("{}_", format_call_id(call));
    }
    Ok(found)
}

fn write_record<W: Write>(
    out: &mut W,
    tag: &str,
    call_str: &str,
    tag_end: &str,
    record: &str,
) -> Result<(), Fast5Error> {
    let body = record.strip_prefix('@').unwrap_or(record);
    write!(out, "@{tag}_{call_str}{tag_end} {body}")?;
    if !body.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

/// Whole raw trace as little-endian unsigned samples, optionally smoothed
/// with a running median (window 1 writes the literal samples).
pub fn raw_signal<C: Container, W: Write>(
    c: &C,
    median_window: usize,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    if !c.exists(RAW_READS_PATH) {
        return Ok(false);
    }
    let mut found = false;
    for read_name in c.children(RAW_READS_PATH) {
        let signal_path = format!("{RAW_READS_PATH}/{read_name}/Signal");
        if !c.exists(&signal_path) {
            continue;
        }
        let samples = c.signal(&signal_path)?;
        let samples = if median_window == 1 {
            samples
        } else {
            smooth(&samples, median_window)?
        };
        write_samples(out, &samples)?;
        found = true;
    }
    Ok(found)
}

/// One strand's slice of the raw trace, outlier-clamped, as little-endian
/// unsigned samples. The slice is located from the basecalled-events
/// timing attributes.
pub fn raw_dir_signal<C: Container, W: Write>(
    c: &C,
    strand: Strand,
    out: &mut W,
) -> Result<bool, Fast5Error> {
    if !c.exists(RAW_READS_PATH) {
        return Ok(false);
    }
    let Some(rate) = attr_float(c, CHANNEL_PATH, "sampling_rate") else {
        return Ok(false);
    };
    let events_path = format!("{}/BaseCalled_{}/Events", basecall_1d("000"), strand.name());
    if !c.exists(&events_path) {
        return Ok(false);
    }
    let Some(start) = attr_float(c, &events_path, "start_time") else {
        return Ok(false);
    };
    let Some(duration) = attr_float(c, &events_path, "duration") else {
        return Ok(false);
    };
    let abs_start = start * rate;
    let abs_end = (start + duration) * rate;
    let mut found = false;
    for read_name in c.children(RAW_READS_PATH) {
        let read_path = format!("{RAW_READS_PATH}/{read_name}");
        let signal_path = format!("{read_path}/Signal");
        if !c.exists(&signal_path) {
            continue;
        }
        let read_start = attr_float(c, &read_path, "start_time").unwrap_or(0.0);
        let samples = c.signal(&signal_path)?;
        let hi = ((abs_end - read_start).max(0.0) as usize).min(samples.len());
        let lo = ((abs_start - read_start).max(0.0) as usize).min(hi);
        info!("Writing ({lo}..{hi}) from {read_name}");
        let mut window = samples[lo..hi].to_vec();
        clamp_outliers(&mut window);
        write_samples(out, &window)?;
        found = true;
    }
    Ok(found)
}

fn write_samples<W: Write>(out: &mut W, samples: &[u16]) -> Result<(), Fast5Error> {
    for &s in samples {
        out.write_all(&s.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::container::mem::MemContainer;
    use crate::container::{EventTable, Value, TRACKING_PATH};
    use pretty_assertions::assert_eq;

    fn identity(c: &mut MemContainer) {
        c.set_attr(TRACKING_PATH, "device_id", "MN16450");
        c.set_attr(TRACKING_PATH, "run_id", "0123456789abcdef0123456789abcdef");
        c.set_attr(CHANNEL_PATH, "channel_number", "33");
        c.set_attr(CHANNEL_PATH, "offset", 12.0);
        c.set_attr(CHANNEL_PATH, "range", 1467.61);
        c.set_attr(CHANNEL_PATH, "digitisation", 8192.0);
        c.set_attr(CHANNEL_PATH, "sampling_rate", 4000.0);
    }

    const RUN: &str = "MN16450_0123456789abcdef";

    fn events_table(starts: &[f64], lengths: &[f64]) -> EventTable {
        let mut t = EventTable::new(vec!["start", "length"]);
        for (&s, &l) in starts.iter().zip(lengths) {
            t.push_row(vec![Value::Float(s), Value::Float(l)]);
        }
        t
    }

    fn alignment_table(rows: &[(i64, i64, &str)]) -> EventTable {
        let mut t = EventTable::new(vec!["template", "complement", "kmer"]);
        for &(temp, comp, kmer) in rows {
            t.push_row(vec![Value::Int(temp), Value::Int(comp), kmer.into()]);
        }
        t
    }

    fn consensus_container() -> MemContainer {
        let mut c = MemContainer::new();
        identity(&mut c);
        c.set_attr("Raw/Reads/Read_42", "start_mux", 2i64);
        // dyadic second values so the sample conversion is exact
        c.add_table(
            "Analyses/Basecall_1D_000/BaseCalled_template/Events",
            events_table(&[0.25, 0.5, 0.75], &[0.125, 0.125, 0.125]),
        );
        c.add_table(
            "Analyses/Basecall_1D_000/BaseCalled_complement/Events",
            events_table(&[2.0, 2.25, 2.5], &[0.25, 0.25, 0.25]),
        );
        c.add_table(
            "Analyses/Basecall_2D_000/BaseCalled_2D/Alignment",
            alignment_table(&[
                (0, -1, "ACGTA"),
                (1, 0, "CGTAC"),
                (1, 0, "CGTAC"),
                (2, 1, "GTACG"),
            ]),
        );
        c
    }

    #[test]
    fn test_consensus_matrix_rows() {
        let c = consensus_container();
        let mut out = Vec::new();
        assert!(consensus_matrix(&c, true, &mut out).unwrap());
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<String> = text.lines().map(String::from).collect();
        assert_eq!(
            lines,
            vec![
                "runID,channel,mux,read,tempStart,tempEnd,compStart,compEnd,bpPos,template,complement,kmer".to_string(),
                // first kmer takes the full 5-step; complement columns still
                // hold the -1 sentinel shifted by the raw start (8000)
                format!("{RUN},33,2,Read_42,0,500,-8001,-8001,2,0,-1,ACGTA"),
                format!("{RUN},33,2,Read_42,1000,1500,0,1000,3,1,0,CGTAC"),
                format!("{RUN},33,2,Read_42,2000,2500,1000,2000,4,2,1,GTACG"),
            ]
        );
    }

    #[test]
    fn test_consensus_absent_alignment() {
        let mut c = MemContainer::new();
        identity(&mut c);
        let mut out = Vec::new();
        assert!(!consensus_matrix(&c, true, &mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn test_event_matrix() {
        let mut c = MemContainer::new();
        identity(&mut c);
        let read = "Analyses/EventDetection_000/Reads/Read_42";
        c.set_attr(read, "start_mux", 2i64);
        let mut events = EventTable::new(vec!["start", "length", "mean", "stdv"]);
        events.push_row(vec![
            Value::Int(123456),
            Value::Int(20),
            Value::Float(61.5),
            Value::Float(1.25),
        ]);
        c.add_table(&format!("{read}/Events"), events);
        let mut out = Vec::new();
        assert!(event_matrix(&c, true, &mut out).unwrap());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!(
                "runID,channel,mux,read,start,length,mean,stdv\n\
                 {RUN},33,2,Read_42,123456,20,61.5,1.25\n"
            )
        );
    }

    #[test]
    fn test_event_matrix_absent() {
        let mut c = MemContainer::new();
        identity(&mut c);
        let mut out = Vec::new();
        assert!(!event_matrix(&c, true, &mut out).unwrap());
    }

    fn fastq_container() -> MemContainer {
        let mut c = consensus_container();
        let base = "Analyses/Basecall_1D_000";
        // move column drives the quality gate
        let mut events = EventTable::new(vec!["start", "length", "move"]);
        for _ in 0..100 {
            events.push_row(vec![Value::Float(0.0), Value::Float(0.0), Value::Int(1)]);
        }
        c.add_table(&format!("{base}/BaseCalled_template/Events"), events);
        c.set_attr(
            &format!("{base}/Summary/basecall_1d_template"),
            "called_events",
            100i64,
        );
        c.set_attr(
            &format!("{base}/Summary/basecall_1d_template"),
            "sequence_length",
            95i64,
        );
        c.add_text(
            &format!("{base}/BaseCalled_template/Fastq"),
            "@read42_template\nACGT\n+\n!!!!\n",
        );
        c.add_text(
            "Analyses/Basecall_2D_000/BaseCalled_2D/Fastq",
            "@read42_2d\nACGTA\n+\n!!!!!\n",
        );
        c
    }

    #[test]
    fn test_fastq_emits_gated_records() {
        let c = fastq_container();
        let mut out = Vec::new();
        assert!(fastq(&c, "a.fast5", &mut out).unwrap());
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            format!(
                "@1Dtemp_{RUN}_ch33_mux2_read42 read42_template\nACGT\n+\n!!!!\n\
                 @2Dcons_{RUN}_ch33_mux2_read42 read42_2d\nACGTA\n+\n!!!!!\n"
            )
        );
    }

    #[test]
    fn test_fastq_move_gate_suppresses_consensus() {
        let mut c = fastq_container();
        // replace the template events with a move histogram that fails
        let mut events = EventTable::new(vec!["move"]);
        for _ in 0..90 {
            events.push_row(vec![Value::Int(1)]);
        }
        for _ in 0..10 {
            events.push_row(vec![Value::Int(4)]);
        }
        c.add_table("Analyses/Basecall_1D_000/BaseCalled_template/Events", events);
        let mut out = Vec::new();
        assert!(fastq(&c, "a.fast5", &mut out).unwrap());
        assert_eq!(String::from_utf8(out).unwrap(), "");
    }

    #[test]
    fn test_fastq_absent() {
        let mut c = MemContainer::new();
        identity(&mut c);
        c.set_attr("Raw/Reads/Read_42", "start_mux", 2i64);
        let mut out = Vec::new();
        assert!(!fastq(&c, "a.fast5", &mut out).unwrap());
    }

    #[test]
    fn test_telemetry_matrix_header_once() {
        let mut c = MemContainer::new();
        identity(&mut c);
        c.set_attr("Raw/Reads/Read_42", "start_mux", 2i64);
        let mut out = Vec::new();
        assert!(telemetry_matrix(&c, "a.fast5", true, &mut out).unwrap());
        assert!(telemetry_matrix(&c, "a.fast5", false, &mut out).unwrap());
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("runID,channel,mux,read,"));
    }

    #[test]
    fn test_raw_signal_smoothed_and_literal() {
        let mut c = MemContainer::new();
        identity(&mut c);
        c.add_signal("Raw/Reads/Read_42/Signal", vec![1, 9, 2, 8, 3]);
        let mut literal = Vec::new();
        assert!(raw_signal(&c, 1, &mut literal).unwrap());
        assert_eq!(literal, vec![1, 0, 9, 0, 2, 0, 8, 0, 3, 0]);
        let mut smoothed = Vec::new();
        assert!(raw_signal(&c, 3, &mut smoothed).unwrap());
        assert_eq!(smoothed, vec![2, 0, 2, 0, 8, 0, 3, 0, 3, 0]);
    }

    #[test]
    fn test_raw_dir_signal_slices_and_clamps() {
        let mut c = MemContainer::new();
        identity(&mut c);
        let mut samples = vec![10u16; 2004];
        samples[5] = 9999; // outside the strand window, never seen
        samples[1500] = 1000; // inside, clamped
        c.add_signal("Raw/Reads/Read_42/Signal", samples);
        c.set_attr("Raw/Reads/Read_42", "start_time", 0i64);
        let events = "Analyses/Basecall_1D_000/BaseCalled_template/Events";
        // dyadic seconds: window is samples 1000..2000
        c.set_attr(events, "start_time", 0.25f64);
        c.set_attr(events, "duration", 0.25f64);
        let mut out = Vec::new();
        assert!(raw_dir_signal(&c, Strand::Template, &mut out).unwrap());
        assert_eq!(out.len(), 2000);
        let decoded: Vec<u16> = out
            .chunks(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        // mean 10.99, mad 1.978: the spike is replaced by the rounded mean
        assert_eq!(decoded.iter().filter(|&&x| x == 9999).count(), 0);
        assert_eq!(decoded.iter().filter(|&&x| x == 11).count(), 1);
        assert_eq!(decoded.iter().filter(|&&x| x == 10).count(), 999);
    }

    #[test]
    fn test_event_dir_matrix_prefix() {
        let mut c = MemContainer::new();
        identity(&mut c);
        c.set_attr("Raw/Reads/Read_42", "start_mux", 2i64);
        c.set_attr("Raw/Reads/Read_42", "start_time", 123456i64);
        let mut events = EventTable::new(vec!["mean", "move"]);
        events.push_row(vec![Value::Float(60.25), Value::Int(1)]);
        c.add_table(
            "Analyses/Basecall_1D_000/BaseCalled_complement/Events",
            events,
        );
        let mut out = Vec::new();
        assert!(event_dir_matrix(&c, Strand::Complement, "a.fast5", true, &mut out).unwrap());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!(
                "runID,channel,mux,read,sampleRate,rawStart,mean,move\n\
                 {RUN},33,2,42,4000,123456,60.25,1\n"
            )
        );
    }
}
