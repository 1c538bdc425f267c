//! Bounded rolling statistics over `f64` samples.
//!
//! A fixed-capacity ring of values with O(1) push that overwrites the
//! oldest entry when full. Scalar accessors walk the live region; the
//! percentile makes a transient sorted copy. No allocations after
//! construction.
//!
//! Used for the per-PID CPU and RSS windows in the analysis engine.

/// Upper bound on the region sorted by [`RingStats::percentile`].
///
/// Callers needing percentiles over larger windows must shrink the
/// window instead.
const PERCENTILE_SORT_CAP: usize = 1024;

/// A fixed-capacity rolling-statistics window.
///
/// Every scalar accessor returns 0 when the window is empty;
/// `stddev` additionally returns 0 for fewer than two samples.
#[derive(Debug, Clone)]
pub struct RingStats {
    buf: Vec<f64>,
    capacity: usize,
    head: usize, // next write position
    len: usize,
}

impl RingStats {
    /// Create a window holding at most `window_size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `window_size` is 0.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window_size must be > 0");
        Self {
            buf: vec![0.0; window_size],
            capacity: window_size,
            head: 0,
            len: 0,
        }
    }

    /// Push a sample, overwriting the oldest when full. O(1).
    pub fn push(&mut self, v: f64) {
        self.buf[self.head] = v;
        self.head = (self.head + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    /// Number of live samples.
    #[must_use]
    pub fn count(&self) -> usize {
        self.len
    }

    /// Whether no samples have been pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of samples retained.
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.capacity
    }

    /// Arithmetic mean of the live samples. 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.iter_live().sum::<f64>() / self.len as f64
    }

    /// Bessel-corrected standard deviation. 0 for fewer than 2 samples.
    #[must_use]
    pub fn stddev(&self) -> f64 {
        if self.len < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq: f64 = self.iter_live().map(|v| (v - mean) * (v - mean)).sum();
        (sum_sq / (self.len - 1) as f64).sqrt()
    }

    /// Smallest live sample. 0 when empty.
    #[must_use]
    pub fn min(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.iter_live().fold(f64::INFINITY, f64::min)
    }

    /// Largest live sample. 0 when empty.
    #[must_use]
    pub fn max(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.iter_live().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`. 0 when empty.
    ///
    /// Sorts a transient copy of the most recent
    /// `min(count, PERCENTILE_SORT_CAP)` samples.
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        let n = self.len.min(PERCENTILE_SORT_CAP);
        let mut sorted: Vec<f64> = self.recent_iter().take(n).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let p = p.clamp(0.0, 100.0);
        let rank = ((p / 100.0) * n as f64).ceil() as usize;
        sorted[rank.clamp(1, n) - 1]
    }

    /// Copy up to `out.len()` samples into `out`, newest first.
    ///
    /// Returns the number of samples copied.
    pub fn recent_values(&self, out: &mut [f64]) -> usize {
        let mut copied = 0;
        for (slot, v) in out.iter_mut().zip(self.recent_iter()) {
            *slot = v;
            copied += 1;
        }
        copied
    }

    /// Iterate the live region, oldest to newest.
    fn iter_live(&self) -> impl Iterator<Item = f64> + '_ {
        let start = if self.len < self.capacity {
            0
        } else {
            self.head
        };
        (0..self.len).map(move |i| self.buf[(start + i) % self.capacity])
    }

    /// Iterate the live region, newest to oldest.
    fn recent_iter(&self) -> impl Iterator<Item = f64> + '_ {
        (1..=self.len).map(move |i| self.buf[(self.head + self.capacity - i) % self.capacity])
    }
}
