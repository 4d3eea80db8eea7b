//! Shared rolling-window building blocks for the incremental indicators.

use std::collections::VecDeque;

/// Fixed-size window with O(1) sum, mean and variance. Mean and variance
/// follow Welford's update, extended to evictions, so large offsets do not
/// cancel out the spread.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    mean: f64,
    /// Sum of squared deviations from `mean`.
    m2: f64,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingWindow {
            values: VecDeque::with_capacity(capacity + 1),
            capacity,
            sum: 0.0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Push a value, returning the evicted one once the window is full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.values.push_back(value);
        self.sum += value;
        let delta = value - self.mean;
        self.mean += delta / self.values.len() as f64;
        self.m2 += delta * (value - self.mean);
        if self.values.len() > self.capacity {
            let old = self.values.pop_front()?;
            self.sum -= old;
            self.evict(old);
            Some(old)
        } else {
            None
        }
    }

    fn evict(&mut self, old: f64) {
        let n = self.values.len();
        if n == 0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let delta = old - self.mean;
        self.mean -= delta / n as f64;
        self.m2 = (self.m2 - delta * (old - self.mean)).max(0.0);
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }
        self.m2 / n as f64
    }

    /// Sample (n - 1) variance.
    pub fn sample_variance(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        self.variance() * n as f64 / (n - 1) as f64
    }

    pub fn oldest(&self) -> Option<f64> {
        self.values.front().copied()
    }

    pub fn newest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }
}

/// Sliding-window extreme (max or min) via a monotonic deque of
/// `(sequence, value)` pairs. Amortized O(1) per push.
#[derive(Debug, Clone)]
pub struct MonotonicWindow {
    deque: VecDeque<(usize, f64)>,
    period: usize,
    seq: usize,
    keep_max: bool,
}

impl MonotonicWindow {
    pub fn max(period: usize) -> Self {
        Self::with_direction(period, true)
    }

    pub fn min(period: usize) -> Self {
        Self::with_direction(period, false)
    }

    fn with_direction(period: usize, keep_max: bool) -> Self {
        MonotonicWindow {
            deque: VecDeque::new(),
            period: period.max(1),
            seq: 0,
            keep_max,
        }
    }

    /// Push a value and return the extreme over the last `period` values.
    pub fn push(&mut self, value: f64) -> f64 {
        while let Some(&(_, back)) = self.deque.back() {
            let dominated = if self.keep_max {
                back <= value
            } else {
                back >= value
            };
            if dominated {
                self.deque.pop_back();
            } else {
                break;
            }
        }
        self.deque.push_back((self.seq, value));
        while let Some(&(idx, _)) = self.deque.front() {
            if idx + self.period <= self.seq {
                self.deque.pop_front();
            } else {
                break;
            }
        }
        self.seq += 1;
        self.deque.front().map(|&(_, v)| v).unwrap_or(value)
    }
}
