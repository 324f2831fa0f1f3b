//! Used/free bookkeeping for region file sectors.

use std::ops::Range;

use bit_vec::BitVec;

/// One bit per sector, set when the sector is in use.
///
/// Sectors past `len()` are implicitly free; marking them used grows the map.
#[derive(Debug, Clone, Default)]
pub struct BlockMap {
    used: BitVec,
}

impl BlockMap {
    pub fn new(len: usize) -> Self {
        Self {
            used: BitVec::from_elem(len, false),
        }
    }

    /// Number of sectors tracked (the file length in sectors).
    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    #[inline]
    pub fn is_used(&self, index: usize) -> bool {
        self.used.get(index).unwrap_or(false)
    }

    /// Whether any sector in `range` is already in use.
    pub fn any_used(&self, mut range: Range<usize>) -> bool {
        range.any(|index| self.is_used(index))
    }

    pub fn mark_used(&mut self, range: Range<usize>) {
        if range.end > self.used.len() {
            self.used.grow(range.end - self.used.len(), false);
        }
        for index in range {
            self.used.set(index, true);
        }
    }

    pub fn mark_free(&mut self, range: Range<usize>) {
        for index in range.start..range.end.min(self.used.len()) {
            self.used.set(index, false);
        }
    }

    /// Lowest start of `count` contiguous free sectors.
    ///
    /// The run may extend past `len()`; the caller grows the file to fit.
    pub fn first_fit(&self, count: usize) -> usize {
        let mut run_start = 0;
        let mut run = 0;
        for (index, used) in self.used.iter().enumerate() {
            if used {
                run = 0;
                run_start = index + 1;
            } else {
                run += 1;
                if run == count {
                    return run_start;
                }
            }
        }
        run_start
    }

    /// Maximal runs of free sectors below `len()`, in ascending order.
    pub fn free_runs(&self) -> Vec<Range<usize>> {
        let mut runs = Vec::new();
        let mut start = None;
        for (index, used) in self.used.iter().enumerate() {
            match (used, start) {
                (false, None) => start = Some(index),
                (true, Some(s)) => {
                    runs.push(s..index);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(s..self.used.len());
        }
        runs
    }

    pub fn used_count(&self) -> usize {
        self.used.iter().filter(|used| *used).count()
    }
}
