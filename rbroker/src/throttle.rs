//! Per-destination and per-client frequency limits.
//!
//! Every destination owns one [`ThrottleManager`]. It keeps a window counter
//! per direction for the destination as a whole and, created on first use, a
//! window counter per direction for each client. A check consults the
//! destination counter first and the client counter second; the message is
//! only counted when both admit it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use rbroker_conf::{Direction, Policy, ThrottleSettings};
use rbroker_utils::AtomicTimestamp;

use crate::types::{timestamp_millis, ClientId, DashMap, DestinationId, TimestampMillis};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ThrottleResult {
    Allow,
    DenyError,
    DenyIgnore,
}

impl ThrottleResult {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleResult::Allow)
    }

    /// The result that must win when two checks disagree, an error always propagates
    #[inline]
    pub fn stricter(self, other: ThrottleResult) -> ThrottleResult {
        use ThrottleResult::*;
        match (self, other) {
            (DenyError, _) | (_, DenyError) => DenyError,
            (DenyIgnore, _) | (_, DenyIgnore) => DenyIgnore,
            _ => Allow,
        }
    }

    #[inline]
    fn denied(policy: Policy) -> ThrottleResult {
        match policy {
            Policy::Error => ThrottleResult::DenyError,
            Policy::Ignore => ThrottleResult::DenyIgnore,
            Policy::None => ThrottleResult::Allow,
        }
    }
}

/// Which counter denied a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Level {
    Client,
    Destination,
}

#[derive(Debug, Default)]
struct Window {
    start: TimestampMillis,
    count: u64,
    last_violation: Option<TimestampMillis>,
}

#[derive(Debug, Default)]
struct WindowCounter(Mutex<Window>);

impl WindowCounter {
    /// Counts one message unless the ceiling of the current window is reached
    fn try_acquire(&self, now: TimestampMillis, window_ms: i64, ceiling: u64) -> bool {
        let mut w = self.0.lock();
        if now - w.start >= window_ms {
            w.start = now;
            w.count = 0;
        }
        if w.count >= ceiling {
            w.last_violation = Some(now);
            false
        } else {
            w.count += 1;
            true
        }
    }

    fn release(&self) {
        let mut w = self.0.lock();
        w.count = w.count.saturating_sub(1);
    }

    fn reset(&self) {
        *self.0.lock() = Window::default();
    }

    fn count(&self) -> u64 {
        self.0.lock().count
    }

    fn last_violation(&self) -> Option<TimestampMillis> {
        self.0.lock().last_violation
    }
}

#[derive(Debug, Default)]
struct DirectionCounters {
    inbound: WindowCounter,
    outbound: WindowCounter,
}

impl DirectionCounters {
    #[inline]
    fn get(&self, direction: Direction) -> &WindowCounter {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }
}

#[derive(Debug, Default)]
struct ThrottleEvents {
    count: AtomicU64,
    last: AtomicTimestamp,
}

impl ThrottleEvents {
    fn record(&self, now: TimestampMillis) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.last.set(now);
    }

    fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.last.clear();
    }
}

/// Management view of throttle activity for one direction
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThrottleStats {
    pub client_throttled: u64,
    pub client_last_throttled: Option<TimestampMillis>,
    pub destination_throttled: u64,
    pub destination_last_throttled: Option<TimestampMillis>,
}

pub struct ThrottleManager {
    destination: DestinationId,
    window: Duration,
    settings: RwLock<ThrottleSettings>,
    destination_counters: DirectionCounters,
    client_counters: DashMap<ClientId, Arc<DirectionCounters>>,
    //indexed by [direction][level]
    events: [[ThrottleEvents; 2]; 2],
}

impl ThrottleManager {
    pub fn new(destination: DestinationId, settings: ThrottleSettings, window: Duration) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            destination,
            window,
            settings: RwLock::new(settings),
            destination_counters: DirectionCounters::default(),
            client_counters: DashMap::default(),
            events: Default::default(),
        })
    }

    #[inline]
    pub fn settings(&self) -> ThrottleSettings {
        *self.settings.read()
    }

    /// Replaces the settings after validating them, existing counters are kept
    pub fn configure(&self, settings: ThrottleSettings) -> Result<()> {
        settings.validate()?;
        log::debug!("{} throttle configured, {:?}", self.destination, settings);
        *self.settings.write() = settings;
        Ok(())
    }

    /// Zeroes every counter and clears violation timestamps and statistics
    pub fn reset(&self) {
        for d in [Direction::Inbound, Direction::Outbound] {
            self.destination_counters.get(d).reset();
            self.reset_stats(d);
        }
        self.client_counters.clear();
    }

    #[inline]
    pub fn check_incoming(&self, client_id: &ClientId) -> ThrottleResult {
        self.check_at(Direction::Inbound, client_id, None, timestamp_millis())
    }

    /// `max_frequency` is the recipient's own requested ceiling, it can only tighten the client limit
    #[inline]
    pub fn check_outgoing(&self, client_id: &ClientId, max_frequency: Option<u32>) -> ThrottleResult {
        self.check_at(Direction::Outbound, client_id, max_frequency, timestamp_millis())
    }

    pub fn check_at(
        &self,
        direction: Direction,
        client_id: &ClientId,
        max_frequency: Option<u32>,
        now: TimestampMillis,
    ) -> ThrottleResult {
        let settings = self.settings();
        let policy = settings.policy(direction);
        if policy == Policy::None {
            return ThrottleResult::Allow;
        }

        let dest_freq = settings.destination_frequency(direction);
        let client_freq = match (settings.client_frequency(direction), max_frequency.filter(|f| *f > 0)) {
            (0, Some(max)) => max,
            (freq, Some(max)) => freq.min(max),
            (freq, None) => freq,
        };
        if dest_freq == 0 && client_freq == 0 {
            return ThrottleResult::Allow;
        }

        let window_ms = self.window.as_millis() as i64;
        let dest_counter = self.destination_counters.get(direction);
        if dest_freq > 0 && !dest_counter.try_acquire(now, window_ms, self.ceiling(dest_freq)) {
            self.on_throttled(direction, Level::Destination, client_id, now);
            return ThrottleResult::denied(policy);
        }

        if client_freq > 0 {
            let counters = self.client_counters.entry(client_id.clone()).or_default().value().clone();
            if !counters.get(direction).try_acquire(now, window_ms, self.ceiling(client_freq)) {
                if dest_freq > 0 {
                    dest_counter.release();
                }
                self.on_throttled(direction, Level::Client, client_id, now);
                return ThrottleResult::denied(policy);
            }
        }
        ThrottleResult::Allow
    }

    #[inline]
    fn ceiling(&self, frequency: u32) -> u64 {
        let window_ms = self.window.as_millis() as u64;
        (frequency as u64 * window_ms).div_ceil(1000).max(1)
    }

    fn on_throttled(&self, direction: Direction, level: Level, client_id: &ClientId, now: TimestampMillis) {
        log::debug!("{} {} message from/to {} throttled at {:?} level", self.destination, direction, client_id, level);
        self.events(direction, level).record(now);
    }

    #[inline]
    fn events(&self, direction: Direction, level: Level) -> &ThrottleEvents {
        let d = match direction {
            Direction::Inbound => 0,
            Direction::Outbound => 1,
        };
        let l = match level {
            Level::Client => 0,
            Level::Destination => 1,
        };
        &self.events[d][l]
    }

    /// Gives back the inbound slot an admitted message took when it faults later on
    pub fn release_incoming(&self, client_id: &ClientId) {
        let settings = self.settings();
        if settings.policy(Direction::Inbound) == Policy::None {
            return;
        }
        if settings.destination_frequency(Direction::Inbound) > 0 {
            self.destination_counters.inbound.release();
        }
        if settings.client_frequency(Direction::Inbound) > 0 {
            if let Some(counters) = self.client_counters.get(client_id) {
                counters.inbound.release();
            }
        }
    }

    /// Drops the counters of a disconnected client
    #[inline]
    pub fn remove_client(&self, client_id: &ClientId) {
        self.client_counters.remove(client_id);
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.client_counters.len()
    }

    #[inline]
    pub fn throttled_count(&self, direction: Direction, level: Level) -> u64 {
        self.events(direction, level).count.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn last_throttled(&self, direction: Direction, level: Level) -> Option<TimestampMillis> {
        self.events(direction, level).last.get()
    }

    /// Messages counted in the current window of the destination counter
    #[inline]
    pub fn destination_window_count(&self, direction: Direction) -> u64 {
        self.destination_counters.get(direction).count()
    }

    #[inline]
    pub fn destination_last_violation(&self, direction: Direction) -> Option<TimestampMillis> {
        self.destination_counters.get(direction).last_violation()
    }

    pub fn client_window_count(&self, client_id: &ClientId, direction: Direction) -> u64 {
        self.client_counters.get(client_id).map(|c| c.get(direction).count()).unwrap_or_default()
    }

    pub fn reset_stats(&self, direction: Direction) {
        self.events(direction, Level::Client).reset();
        self.events(direction, Level::Destination).reset();
    }

    pub fn stats(&self, direction: Direction) -> ThrottleStats {
        ThrottleStats {
            client_throttled: self.throttled_count(direction, Level::Client),
            client_last_throttled: self.last_throttled(direction, Level::Client),
            destination_throttled: self.throttled_count(direction, Level::Destination),
            destination_last_throttled: self.last_throttled(direction, Level::Destination),
        }
    }
}
