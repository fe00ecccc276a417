//! Latest-sample handoff between the receive task and the control loop.
//!
//! The slot holds either a complete sample or nothing. The writer swaps a
//! whole `Arc` in, readers load whichever `Arc` is current, so a reader can
//! never see a half-written sample and neither side ever waits on the other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;

use crate::sample::TrackerSample;

/// A sample together with the moment it was stored.
#[derive(Clone, Debug)]
pub struct StampedSample {
    pub sample: TrackerSample,
    pub received_at: Instant,
}

impl StampedSample {
    /// Time elapsed since the sample was stored.
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Single-writer / multi-reader slot holding the newest controller sample.
#[derive(Debug, Default)]
pub struct SampleSlot {
    inner: ArcSwapOption<StampedSample>,
}

impl SampleSlot {
    pub fn new() -> Self {
        Self {
            inner: ArcSwapOption::empty(),
        }
    }

    /// Store a sample, superseding whatever was there.
    pub fn replace(&self, sample: TrackerSample) {
        self.replace_at(sample, Instant::now());
    }

    /// Store a sample with an explicit receive time.
    pub fn replace_at(&self, sample: TrackerSample, received_at: Instant) {
        self.inner.store(Some(Arc::new(StampedSample {
            sample,
            received_at,
        })));
    }

    /// Newest sample regardless of its age.
    pub fn latest(&self) -> Option<Arc<StampedSample>> {
        self.inner.load_full()
    }

    /// Newest sample, or `None` when it is older than `max_age`.
    pub fn latest_fresh(&self, max_age: Duration) -> Option<Arc<StampedSample>> {
        self.latest().filter(|stamped| stamped.age() <= max_age)
    }
}
