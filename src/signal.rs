//! Raw-signal transforms: running-median smoothing and outlier clamping.

use std::collections::VecDeque;

use crate::Fast5Error;

/// Streaming running-median filter over a fixed, odd-sized window.
///
/// Two synchronized views of the window are kept: `order` in arrival order,
/// so the oldest sample is evicted in O(1), and `sorted` in value order, so
/// the median is a direct index. Inserts and removals locate their position
/// by binary search; equal values are interchangeable so it does not matter
/// which duplicate gets removed. Window sizes are small (21 by default), so
/// the O(M) shift inside the sorted vec is cheap.
#[derive(Debug, Clone)]
pub struct RunningMedian<T> {
    window: usize,
    order: VecDeque<T>,
    sorted: Vec<T>,
}

impl<T: Copy + Ord> RunningMedian<T> {
    pub fn new(window: usize) -> Result<Self, Fast5Error> {
        if window % 2 == 0 {
            return Err(Fast5Error::EvenMedianWindow(window));
        }
        Ok(Self {
            window,
            order: VecDeque::with_capacity(window),
            sorted: Vec::with_capacity(window),
        })
    }

    /// Clears all buffered samples so the filter can be reused on the next
    /// read.
    pub fn reset(&mut self) {
        self.order.clear();
        self.sorted.clear();
    }

    /// Feeds one sample. Returns the median of the current window once the
    /// window has filled, `None` while it is still priming.
    pub fn push(&mut self, sample: T) -> Option<T> {
        if self.order.len() == self.window {
            let old = self.order.pop_front()?;
            let at = self.sorted.binary_search(&old).unwrap_or_else(|i| i);
            self.sorted.remove(at);
        }
        self.order.push_back(sample);
        let at = self.sorted.binary_search(&sample).unwrap_or_else(|i| i);
        self.sorted.insert(at, sample);
        self.median()
    }

    /// Median of the current window, `None` until the window has filled.
    pub fn median(&self) -> Option<T> {
        if self.sorted.len() < self.window {
            None
        } else {
            Some(self.sorted[self.window / 2])
        }
    }
}

/// Running-median smoothing of a whole sequence.
///
/// The output has the same length as the input: element `i` is the median of
/// the window centered at `i`, with the leading ⌊M/2⌋+1 positions pinned to
/// the first full window's median and the trailing ⌊M/2⌋ to the last.
/// Sequences shorter than the window (where no full window exists) are
/// returned unchanged.
pub fn smooth<T: Copy + Ord>(seq: &[T], window: usize) -> Result<Vec<T>, Fast5Error> {
    let mut filter = RunningMedian::new(window)?;
    if window == 1 || seq.len() < window {
        return Ok(seq.to_vec());
    }
    let half = window / 2;
    let mut out = Vec::with_capacity(seq.len());
    let mut last = None;
    for &sample in seq {
        if let Some(median) = filter.push(sample) {
            if out.is_empty() {
                out.extend(std::iter::repeat(median).take(half + 1));
            } else {
                out.push(median);
            }
            last = Some(median);
        }
    }
    if let Some(median) = last {
        out.extend(std::iter::repeat(median).take(half));
    }
    Ok(out)
}

/// Clamps extreme samples to the window mean.
///
/// Mean and mean absolute deviation are each computed in one pass; samples
/// outside `mean ± 6·MAD` are replaced by the mean (rounded to the nearest
/// sample value). Stateless: nothing carries over between calls.
pub fn clamp_outliers(signal: &mut [u16]) {
    if signal.is_empty() {
        return;
    }
    let n = signal.len() as f64;
    let mean = signal.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mad = signal.iter().map(|&x| (x as f64 - mean).abs()).sum::<f64>() / n;
    let lo = mean - mad * 6.0;
    let hi = mean + mad * 6.0;
    let center = mean.round() as u16;
    for x in signal.iter_mut() {
        let v = *x as f64;
        if v < lo || v > hi {
            *x = center;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_even_window_rejected() {
        assert!(matches!(
            smooth(&[1u16, 2, 3], 4),
            Err(Fast5Error::EvenMedianWindow(4))
        ));
    }

    #[test]
    fn test_smooth_known_values() {
        // windows: [1,9,2] -> 2, [9,2,8] -> 8, [2,8,3] -> 3
        let out = smooth(&[1u16, 9, 2, 8, 3], 3).unwrap();
        assert_eq!(out, vec![2, 2, 8, 3, 3]);
    }

    #[test]
    fn test_smooth_window_one_is_identity() {
        let seq = [5u16, 1, 7, 7, 0];
        assert_eq!(smooth(&seq, 1).unwrap(), seq.to_vec());
    }

    #[test]
    fn test_smooth_short_input_unchanged() {
        let seq = [3u16, 1];
        assert_eq!(smooth(&seq, 5).unwrap(), seq.to_vec());
    }

    #[test]
    fn test_filter_reset() {
        let mut filter = RunningMedian::new(3).unwrap();
        assert_eq!(filter.push(10u16), None);
        assert_eq!(filter.push(20), None);
        assert_eq!(filter.push(30), Some(20));
        filter.reset();
        assert_eq!(filter.push(1), None);
        assert_eq!(filter.median(), None);
    }

    #[test]
    fn test_clamp_known_values() {
        // mean = 19.9, mad = 19.602; the band ends at 137.5, so only the
        // spike is replaced.
        let mut signal = vec![10u16; 100];
        signal[57] = 1000;
        clamp_outliers(&mut signal);
        let mut expected = vec![10u16; 100];
        expected[57] = 20;
        assert_eq!(signal, expected);
    }

    proptest! {
        #[test]
        fn prop_smooth_preserves_length(seq in prop::collection::vec(any::<u16>(), 0..200), half in 0usize..8) {
            let window = half * 2 + 1;
            let out = smooth(&seq, window).unwrap();
            prop_assert_eq!(out.len(), seq.len());
        }

        #[test]
        fn prop_smooth_constant_is_identity(value in any::<u16>(), len in 1usize..100) {
            let seq = vec![value; len];
            let out = smooth(&seq, 21).unwrap();
            prop_assert_eq!(out, seq);
        }

        #[test]
        fn prop_clamp_band(mut signal in prop::collection::vec(any::<u16>(), 1..100)) {
            let n = signal.len() as f64;
            let mean = signal.iter().map(|&x| x as f64).sum::<f64>() / n;
            let mad = signal.iter().map(|&x| (x as f64 - mean).abs()).sum::<f64>() / n;
            let (lo, hi) = (mean - mad * 6.0, mean + mad * 6.0);
            let before = signal.clone();
            clamp_outliers(&mut signal);
            for (&was, &now) in before.iter().zip(signal.iter()) {
                let v = was as f64;
                if v >= lo && v <= hi {
                    // in-band samples are untouched
                    prop_assert_eq!(was, now);
                } else {
                    prop_assert_eq!(now, mean.round() as u16);
                }
            }
        }
    }
}
