use crate::IdRange;
use core::fmt;

/// Lifecycle of a [`Segment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentState {
    /// No range has been fetched into the segment yet.
    Empty,
    /// The segment holds ids that have not been handed out.
    Filled,
    /// Every id of the fetched range has been handed out.
    Overflown,
}

/// An in-memory cursor over one leased range `[cur, max)`.
///
/// A segment has no locking of its own. It is owned by a
/// [`Buffer`](crate::Buffer), which only touches it while holding the
/// buffer's exclusive lock.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    begin: u64,
    cur: u64,
    max: u64,
}

impl Segment {
    /// An unfetched segment. It reports itself as overflown.
    pub const fn empty() -> Self {
        Self {
            begin: 0,
            cur: 0,
            max: 0,
        }
    }

    pub const fn from_range(range: IdRange) -> Self {
        Self {
            begin: range.begin,
            cur: range.begin,
            max: range.end,
        }
    }

    /// Returns `cur` and advances it by one.
    ///
    /// The caller must check [`Self::is_overflown`] first; calling this on an
    /// overflown segment hands out an id outside the leased range.
    pub fn next_and_incr(&mut self) -> u64 {
        let id = self.cur;
        self.cur += 1;
        id
    }

    /// Hands out the next id, or `None` once the range is exhausted.
    pub fn try_next(&mut self) -> Option<u64> {
        if self.is_overflown() {
            None
        } else {
            Some(self.next_and_incr())
        }
    }

    /// `cur >= max`. An empty segment is overflown.
    pub const fn is_overflown(&self) -> bool {
        self.cur >= self.max
    }

    /// Installs a freshly leased range. Only valid on a segment that is not
    /// currently dispensing.
    pub fn reset(&mut self, range: IdRange) {
        *self = Self::from_range(range);
    }

    pub const fn state(&self) -> SegmentState {
        if self.max == 0 {
            SegmentState::Empty
        } else if self.is_overflown() {
            SegmentState::Overflown
        } else {
            SegmentState::Filled
        }
    }

    pub const fn begin(&self) -> u64 {
        self.begin
    }

    pub const fn cur(&self) -> u64 {
        self.cur
    }

    pub const fn max(&self) -> u64 {
        self.max
    }

    /// Ids left before the segment overflows.
    pub const fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.cur)
    }

    /// Fraction of the leased range already handed out, in `[0, 1]`. An
    /// empty segment counts as fully consumed.
    pub fn consumed(&self) -> f64 {
        let width = self.max.saturating_sub(self.begin);
        if width == 0 {
            return 1.0;
        }
        let used = self.cur.saturating_sub(self.begin).min(width);
        used as f64 / width as f64
    }

    /// `true` once [`Self::consumed`] reaches `watermark`.
    pub fn hit_watermark(&self, watermark: f64) -> bool {
        self.consumed() >= watermark
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("range", &(self.begin..self.max))
            .field("cur", &self.cur)
            .field("state", &self.state())
            .finish()
    }
}
