//! Reconstructing time boundaries of the 2D consensus alignment.
//!
//! The 2D alignment table records, per step, a 5-mer and an event index into
//! each strand's event sequence. Neither the base position along the
//! consensus nor the raw-signal boundaries of each step are stored, so both
//! are recovered here: the base position by measuring how far consecutive
//! k-mers overlap, the boundaries from the per-strand event start/length
//! arrays.

/// Conventional alignment k-mer length.
pub const KMER_LEN: usize = 5;

/// Event index meaning "no event for this strand at this step".
pub const NO_EVENT: i64 = -1;

/// One step of the 2D alignment table.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentWindow {
    pub template: i64,
    pub complement: i64,
    pub kmer: String,
}

/// One strand's event timing, in raw sample units.
#[derive(Debug, Clone, Copy)]
pub struct StrandEvents<'a> {
    pub starts: &'a [i64],
    pub lengths: &'a [i64],
}

impl<'a> StrandEvents<'a> {
    /// Raw-signal start of the strand: the start of its first event.
    /// Emitted boundaries are relative to this.
    pub fn raw_start(&self) -> i64 {
        self.starts.first().copied().unwrap_or(0)
    }

    fn get(&self, index: i64) -> Option<(i64, i64)> {
        if index < 0 {
            return None;
        }
        let index = index as usize;
        match (self.starts.get(index), self.lengths.get(index)) {
            (Some(&s), Some(&l)) => Some((s, l)),
            _ => None,
        }
    }
}

/// Reconstructed boundary columns for one emitted alignment step, relative
/// to each strand's raw start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryRow {
    pub temp_start: i64,
    pub temp_end: i64,
    pub comp_start: i64,
    pub comp_end: i64,
    pub base_pos: i64,
}

/// How many consensus bases a k-mer transition advances.
///
/// Tries overlap shifts 1..4: dropping the first `s` characters of the
/// previous k-mer must equal dropping the last `s` of the next. The smallest
/// matching shift wins; no overlap at all counts as a full 5-base step.
fn kmer_shift(last: &str, next: &str) -> i64 {
    let (last, next) = (last.as_bytes(), next.as_bytes());
    for s in 1..KMER_LEN {
        let tail = &last[last.len().min(s)..];
        let head = &next[..next.len().saturating_sub(s)];
        if !last.is_empty() && tail == head {
            return s as i64;
        }
    }
    KMER_LEN as i64
}

/// Streaming state of the boundary reconstruction.
///
/// The base position starts at −3 so that the first k-mer, which has no
/// overlap with the empty initial state and therefore takes the full 5-base
/// step, lands at +2. A historical artifact of the k-mer length convention,
/// kept for column compatibility.
#[derive(Debug, Clone)]
pub struct BoundaryTracker {
    last_kmer: String,
    base_pos: i64,
    temp_start: i64,
    temp_end: i64,
    comp_start: i64,
    comp_end: i64,
}

impl Default for BoundaryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundaryTracker {
    pub fn new() -> Self {
        Self {
            last_kmer: String::new(),
            base_pos: -3,
            temp_start: -1,
            temp_end: -1,
            comp_start: -1,
            comp_end: -1,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Consumes one alignment window. Returns the reconstructed boundary
    /// columns when the window moved (changed k-mer), `None` otherwise;
    /// only moved windows are emitted.
    ///
    /// The carry-forward is deliberately asymmetric, matching the emitted
    /// column semantics: the template end and complement start track every
    /// window that has a valid event index, while the template start and
    /// complement end are pinned between moves.
    pub fn step(
        &mut self,
        window: &AlignmentWindow,
        template: StrandEvents,
        complement: StrandEvents,
    ) -> Option<BoundaryRow> {
        let moved = self.last_kmer != window.kmer;
        if moved {
            self.base_pos += kmer_shift(&self.last_kmer, &window.kmer);
            self.last_kmer.clone_from(&window.kmer);
        }
        if let Some((start, length)) = template.get(window.template) {
            if moved {
                self.temp_start = start;
            }
            self.temp_end = start + length;
        }
        if let Some((start, length)) = complement.get(window.complement) {
            self.comp_start = start;
            if moved {
                self.comp_end = start + length;
            }
        }
        moved.then(|| BoundaryRow {
            temp_start: self.temp_start - template.raw_start(),
            temp_end: self.temp_end - template.raw_start(),
            comp_start: self.comp_start - complement.raw_start(),
            comp_end: self.comp_end - complement.raw_start(),
            base_pos: self.base_pos,
        })
    }
}
