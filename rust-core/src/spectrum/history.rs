//! Rolling per-bin history
//!
//! Keeps the most recent samples of every spectrum bin for average, min and
//! max computation.

use ndarray::{s, Array2, ArrayView1};

/// Statistics over the valid history of one bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinStats {
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

/// Fixed-depth FIFO of samples per bin
///
/// Stored as one row of `depth` samples per bin, newest first. Pushing
/// shifts the row down by one slot and drops the oldest sample.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    samples: Array2<f64>,
}

impl RollingHistory {
    /// Create zeroed history
    ///
    /// # Arguments
    /// * `depth` - Samples kept per bin
    /// * `len` - Number of bins
    pub fn new(depth: usize, len: usize) -> Self {
        Self {
            samples: Array2::zeros((len, depth)),
        }
    }

    pub fn depth(&self) -> usize {
        self.samples.ncols()
    }

    /// Number of bins tracked
    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reallocate for a new depth or bin count
    ///
    /// All samples are cleared, even when the shape does not change.
    pub fn resize(&mut self, depth: usize, len: usize) {
        self.samples = Array2::zeros((len, depth));
    }

    /// Push the newest sample of a bin
    pub fn push(&mut self, bin: usize, value: f64) {
        let mut row = self.samples.row_mut(bin);
        for slot in (1..row.len()).rev() {
            row[slot] = row[slot - 1];
        }
        if let Some(newest) = row.get_mut(0) {
            *newest = value;
        }
    }

    /// Average and extrema over the `valid` newest samples of a bin
    ///
    /// # Returns
    /// `None` if there are no valid samples
    pub fn stats(&self, bin: usize, valid: usize) -> Option<BinStats> {
        let valid = valid.min(self.depth());
        if valid == 0 {
            return None;
        }

        let window = self.samples.slice(s![bin, ..valid]);
        let sum: f64 = window.iter().sum();
        let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = window.iter().copied().fold(f64::INFINITY, f64::min);

        Some(BinStats {
            average: sum / valid as f64,
            max,
            min,
        })
    }

    /// One history slot across all bins (0 = newest)
    pub fn slot(&self, index: usize) -> ArrayView1<'_, f64> {
        self.samples.column(index)
    }
}
