//! Frame marks (spec §4.5).

/// Timestamps delimiting logical application frames, in arrival order
/// (which is always non-decreasing, since `FrameMark` carries no other
/// ordering key).
#[derive(Debug, Default, Clone)]
pub struct FrameMarks {
    marks: Vec<i64>,
}

impl FrameMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: i64) {
        self.marks.push(time);
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<i64> {
        self.marks.get(i).copied()
    }

    /// Duration of frame `i`: `frames[i+1] - frames[i]`. `None` for the
    /// last frame, which has no duration until the next mark arrives
    /// (spec §4.5, §8 "Frame durations without a terminal mark").
    pub fn duration(&self, i: usize) -> Option<i64> {
        let start = *self.marks.get(i)?;
        let end = *self.marks.get(i + 1)?;
        Some(end - start)
    }

    /// Binary-searched pair of indices bracketing `[t0, t1]` (spec §4.5
    /// `GetFrameRange`).
    pub fn range(&self, t0: i64, t1: i64) -> (i32, i32) {
        let lo = self.marks.partition_point(|&t| t < t0);
        let hi = self.marks.partition_point(|&t| t <= t1);
        (lo as i32, hi as i32)
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.marks.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_gap_to_next_mark() {
        let mut frames = FrameMarks::new();
        frames.push(0);
        frames.push(16);
        frames.push(33);
        assert_eq!(frames.duration(0), Some(16));
        assert_eq!(frames.duration(1), Some(17));
        assert_eq!(frames.duration(2), None);
    }

    #[test]
    fn range_brackets_window() {
        let mut frames = FrameMarks::new();
        for t in [0, 10, 20, 30, 40] {
            frames.push(t);
        }
        assert_eq!(frames.range(15, 35), (2, 4));
    }
}
