//! Move-histogram gating of basecalled strands.
//!
//! Each basecalled event carries a discrete "move" state: how many sequence
//! positions the event consumed. A well-behaved strand moves by one base most
//! of the time. Strands dominated by stays (0), double steps (2) or long
//! jumps (3..=6) basecall poorly, so their sequence output is suppressed.

/// Largest move state tracked by the histogram; observed values are 0..=6.
pub const MAX_MOVE: usize = 6;

/// Histogram of move states over a strand's event sequence. Values outside
/// 0..=6 are ignored, as they never occur in practice.
pub fn move_histogram(moves: &[i64]) -> [usize; MAX_MOVE + 1] {
    let mut counts = [0usize; MAX_MOVE + 1];
    for &m in moves {
        if (0..=MAX_MOVE as i64).contains(&m) {
            counts[m as usize] += 1;
        }
    }
    counts
}

/// Is this strand's basecall trustworthy enough to emit?
///
/// With `bad = 5%` of the total event count, the strand is accepted iff
/// stays and double steps stay under `4·bad` and long jumps stay under
/// `bad`. An empty event sequence is rejected.
pub fn strand_ok(moves: &[i64]) -> bool {
    let counts = move_histogram(moves);
    let bad = moves.len() as f64 * 0.05;
    let stays = (counts[0] + counts[2]) as f64;
    let jumps = (counts[3] + counts[4] + counts[5] + counts[6]) as f64;
    stays < bad * 4.0 && jumps < bad
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_uniform_single_steps_accepted() {
        let moves = vec![1i64; 500];
        assert!(strand_ok(&moves));
    }

    #[test]
    fn test_long_jumps_over_threshold_rejected() {
        // 6% of events are move-3: over the 5% budget
        let mut moves = vec![1i64; 94];
        moves.extend(std::iter::repeat(3).take(6));
        assert!(!strand_ok(&moves));
    }

    #[test]
    fn test_stays_over_threshold_rejected() {
        // 20% stays hits the 4x budget exactly, which is not under it
        let mut moves = vec![1i64; 80];
        moves.extend(std::iter::repeat(0).take(20));
        assert!(!strand_ok(&moves));
    }

    #[test]
    fn test_stays_under_threshold_accepted() {
        let mut moves = vec![1i64; 81];
        moves.extend(std::iter::repeat(0).take(19));
        assert!(strand_ok(&moves));
    }

    #[test]
    fn test_empty_strand_rejected() {
        assert!(!strand_ok(&[]));
    }

    #[test]
    fn test_histogram_ignores_out_of_range() {
        let counts = move_histogram(&[1, 1, 7, -2, 6]);
        assert_eq!(counts, [0, 2, 0, 0, 0, 0, 1]);
    }
}
