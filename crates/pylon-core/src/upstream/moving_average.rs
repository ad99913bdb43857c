//! Bounded moving average over response-time samples.
//!
//! Maintains a fixed-size circular buffer of recent samples so memory stays
//! constant regardless of traffic rate, while the average keeps tracking
//! load shifts.

use parking_lot::Mutex;

/// Fixed-capacity moving average over `f64` samples.
///
/// [`add`](Self::add) overwrites the oldest sample in FIFO order once the
/// window is full. Safe for concurrent `add` and `average` calls.
pub struct MovingAverage {
    inner: Mutex<Window>,
}

struct Window {
    samples: Vec<f64>,
    capacity: usize,
    next: usize,
}

impl MovingAverage {
    /// Creates a moving average holding up to `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "moving average capacity must be at least 1");
        Self {
            inner: Mutex::new(Window {
                samples: Vec::with_capacity(capacity),
                capacity,
                next: 0,
            }),
        }
    }

    /// Records a sample, evicting the oldest one when the window is full.
    pub fn add(&self, sample: f64) {
        let window = &mut *self.inner.lock();
        if window.samples.len() < window.capacity {
            window.samples.push(sample);
        } else {
            window.samples[window.next] = sample;
        }
        window.next = (window.next + 1) % window.capacity;
    }

    /// Returns the arithmetic mean of the stored samples, `0.0` when none
    /// have been recorded.
    #[must_use]
    pub fn average(&self) -> f64 {
        let window = self.inner.lock();
        if window.samples.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = window.samples.len() as f64;
        window.samples.iter().sum::<f64>() / count
    }

    /// Returns the number of samples currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    /// Returns `true` when no samples have been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
