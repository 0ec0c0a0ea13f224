use parking_lot::Mutex;
use std::ops::AddAssign;

use crate::distance::inches_to_miles;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Tally {
    pub keypresses: u64,
    pub mouse_clicks: u64,
    pub mouse_distance_in: f64,
    pub scroll_steps: u64,
}

impl Tally {
    pub fn mouse_distance_mi(&self) -> f64 {
        inches_to_miles(self.mouse_distance_in)
    }

    pub fn is_empty(&self) -> bool {
        *self == Tally::default()
    }

    pub fn reset(&mut self) {
        *self = Tally::default();
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Tally) {
        self.keypresses += other.keypresses;
        self.mouse_clicks += other.mouse_clicks;
        self.mouse_distance_in += other.mouse_distance_in;
        self.scroll_steps += other.scroll_steps;
    }
}

/// Converts a signed wheel rotation into whole scroll steps.
pub fn scroll_steps(rotation: f64) -> u64 {
    if rotation.is_finite() {
        rotation.abs().trunc() as u64
    } else {
        0
    }
}

#[derive(Default)]
struct Tallies {
    since_flush: Tally,
    lifetime: Tally,
}

/// Since-flush and lifetime counters, updated together under one lock so a
/// flush snapshot never races an increment.
#[derive(Default)]
pub struct MetricsCounters {
    inner: Mutex<Tallies>,
}

impl MetricsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the lifetime tally from previously persisted totals.
    pub fn with_lifetime(lifetime: Tally) -> Self {
        Self {
            inner: Mutex::new(Tallies {
                since_flush: Tally::default(),
                lifetime,
            }),
        }
    }

    fn apply(&self, update: impl Fn(&mut Tally)) {
        let mut tallies = self.inner.lock();
        update(&mut tallies.since_flush);
        update(&mut tallies.lifetime);
    }

    pub fn record_keypress(&self) {
        self.apply(|t| t.keypresses += 1);
    }

    pub fn record_click(&self) {
        self.apply(|t| t.mouse_clicks += 1);
    }

    pub fn record_distance(&self, inches: f64) {
        if inches > 0.0 && inches.is_finite() {
            self.apply(|t| t.mouse_distance_in += inches);
        }
    }

    pub fn record_scroll(&self, rotation: f64) {
        let steps = scroll_steps(rotation);
        if steps > 0 {
            self.apply(|t| t.scroll_steps += steps);
        }
    }

    pub fn since_flush(&self) -> Tally {
        self.inner.lock().since_flush
    }

    pub fn totals(&self) -> Tally {
        self.inner.lock().lifetime
    }

    /// Reads and clears the since-flush tally in one step.
    pub fn take(&self) -> Tally {
        std::mem::take(&mut self.inner.lock().since_flush)
    }

    /// Puts an unpersisted snapshot back so the next flush carries it.
    pub fn restore(&self, snapshot: Tally) {
        self.inner.lock().since_flush += snapshot;
    }
}
