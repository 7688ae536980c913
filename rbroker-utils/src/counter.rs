use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};

use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// Gauge tracking a current value and the highest value it has ever reached.
///
/// Used for session and subscription counts where operators care about both
/// the present load and the peak.
pub struct Counter {
    current: AtomicIsize,
    peak: AtomicIsize,
}

impl Counter {
    #[inline]
    pub fn new() -> Self {
        Self::with(0, 0)
    }

    #[inline]
    pub fn with(current: isize, peak: isize) -> Self {
        Counter { current: AtomicIsize::new(current), peak: AtomicIsize::new(peak.max(current)) }
    }

    #[inline]
    pub fn inc(&self) {
        self.incs(1);
    }

    #[inline]
    pub fn incs(&self, n: isize) {
        let prev = self.current.fetch_add(n, Ordering::SeqCst);
        self.peak.fetch_max(prev + n, Ordering::SeqCst);
    }

    #[inline]
    pub fn dec(&self) {
        self.decs(1);
    }

    /// Never drops below zero
    #[inline]
    pub fn decs(&self, n: isize) {
        let _ = self.current.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c - n).max(0)));
    }

    #[inline]
    pub fn set(&self, n: isize) {
        self.current.store(n, Ordering::SeqCst);
        self.peak.fetch_max(n, Ordering::SeqCst);
    }

    #[inline]
    pub fn count(&self) -> isize {
        self.current.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn max(&self) -> isize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Clears the current value and restarts peak tracking from zero
    #[inline]
    pub fn reset(&self) {
        self.current.store(0, Ordering::SeqCst);
        self.peak.store(0, Ordering::SeqCst);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Counter::with(self.count(), self.max())
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#"{{ "count":{}, "max":{} }}"#, self.count(), self.max())
    }
}

impl Serialize for Counter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Counter", 2)?;
        s.serialize_field("count", &self.count())?;
        s.serialize_field("max", &self.max())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Counter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            count: isize,
            max: isize,
        }
        let Raw { count, max } = Raw::deserialize(deserializer)?;
        Ok(Counter::with(count, max))
    }
}
