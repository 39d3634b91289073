use crate::model::{Minutes, Slot, TimeRange};

/// Walks availability windows emitting fixed-length slots.
///
/// Each slot is `duration` long and the cursor then moves `duration + buffer`.
/// A window's tail shorter than one slot is discarded. The buffer is also
/// honoured across window boundaries, so consecutive slots are always at least
/// `buffer` apart. Clones are independent and yield the same remaining sequence.
#[derive(Debug, Clone)]
pub struct SlotIter<'a> {
    windows: &'a [TimeRange],
    duration: Minutes,
    buffer: Minutes,
    window_idx: usize,
    cursor: Minutes,
    /// End of the previously emitted slot plus buffer.
    earliest_next: Minutes,
}

impl<'a> SlotIter<'a> {
    pub fn new(windows: &'a [TimeRange], duration: Minutes, buffer: Minutes) -> Self {
        Self {
            windows,
            duration,
            buffer,
            window_idx: 0,
            cursor: windows.first().map_or(0, |w| w.start),
            earliest_next: 0,
        }
    }
}

impl Iterator for SlotIter<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        if self.duration == 0 {
            return None;
        }
        let windows = self.windows;
        while let Some(window) = windows.get(self.window_idx) {
            let start = self.cursor.max(window.start).max(self.earliest_next);
            let end = start + self.duration;
            if end <= window.end {
                self.cursor = start + self.duration + self.buffer;
                self.earliest_next = self.cursor;
                return Some(Slot::new(start, end));
            }
            self.window_idx += 1;
            if let Some(next) = windows.get(self.window_idx) {
                self.cursor = next.start;
            }
        }
        None
    }
}

/// Expand windows into discrete slots. Pure: identical input, identical output.
pub fn generate_slots(windows: &[TimeRange], duration: Minutes, buffer: Minutes) -> Vec<Slot> {
    SlotIter::new(windows, duration, buffer).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: Minutes, m: Minutes) -> Minutes {
        h * 60 + m
    }

    fn range(a: Minutes, b: Minutes) -> TimeRange {
        TimeRange::new(a, b)
    }

    #[test]
    fn morning_with_buffer_discards_remainder() {
        // 09:00-12:00, 60 min + 15 buffer -> 09:00-10:00, 10:15-11:15; 11:30-12:00 is too short.
        let slots = generate_slots(&[range(hm(9, 0), hm(12, 0))], 60, 15);
        assert_eq!(
            slots,
            vec![range(hm(9, 0), hm(10, 0)), range(hm(10, 15), hm(11, 15))]
        );
    }

    #[test]
    fn exact_tiling_without_buffer() {
        let slots = generate_slots(&[range(hm(9, 0), hm(11, 0))], 30, 0);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots.last(), Some(&range(hm(10, 30), hm(11, 0))));
    }

    #[test]
    fn window_shorter_than_duration_yields_nothing() {
        assert!(generate_slots(&[range(hm(9, 0), hm(9, 45))], 60, 0).is_empty());
        assert!(generate_slots(&[], 60, 0).is_empty());
    }

    #[test]
    fn multiple_windows_each_start_fresh() {
        let windows = [range(hm(9, 0), hm(10, 30)), range(hm(14, 0), hm(15, 0))];
        let slots = generate_slots(&windows, 60, 15);
        assert_eq!(
            slots,
            vec![range(hm(9, 0), hm(10, 0)), range(hm(14, 0), hm(15, 0))]
        );
    }

    #[test]
    fn buffer_respected_across_adjacent_windows() {
        let windows = [range(hm(9, 0), hm(10, 0)), range(hm(10, 0), hm(12, 0))];
        let slots = generate_slots(&windows, 60, 15);
        assert_eq!(
            slots,
            vec![range(hm(9, 0), hm(10, 0)), range(hm(10, 15), hm(11, 15))]
        );
    }

    #[test]
    fn deterministic_and_restartable() {
        let windows = [range(hm(8, 0), hm(12, 0)), range(hm(13, 0), hm(18, 0))];
        let first = generate_slots(&windows, 45, 10);
        let second = generate_slots(&windows, 45, 10);
        assert_eq!(first, second);

        let mut iter = SlotIter::new(&windows, 45, 10);
        iter.next();
        let forked = iter.clone();
        assert_eq!(iter.collect::<Vec<_>>(), forked.collect::<Vec<_>>());
    }

    #[test]
    fn slots_never_overlap_and_keep_buffer() {
        let windows = [
            range(hm(7, 0), hm(9, 50)),
            range(hm(9, 50), hm(13, 0)),
            range(hm(15, 5), hm(23, 59)),
        ];
        for duration in [15, 25, 60, 90] {
            for buffer in [0, 5, 15, 60] {
                let slots = generate_slots(&windows, duration, buffer);
                for pair in slots.windows(2) {
                    assert!(!pair[0].overlaps(&pair[1]));
                    assert!(pair[1].start >= pair[0].end + buffer);
                }
                for s in &slots {
                    assert_eq!(s.duration(), duration);
                    assert!(windows.iter().any(|w| w.start <= s.start && s.end <= w.end));
                }
            }
        }
    }

    #[test]
    fn zero_duration_yields_nothing() {
        assert!(generate_slots(&[range(hm(9, 0), hm(10, 0))], 0, 0).is_empty());
    }
}
