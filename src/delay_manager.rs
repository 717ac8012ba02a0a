use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::thread;
use rand::Rng;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Inclusive bounds, in milliseconds, for one randomized pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min_ms: 0, max_ms: 0 };

    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        if min_ms <= max_ms {
            DelayRange { min_ms, max_ms }
        } else {
            DelayRange { min_ms: max_ms, max_ms: min_ms }
        }
    }

    pub fn sample(&self) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Child,
    Entity,
}

/// Shared record of every pause taken, in order.
#[derive(Debug, Clone, Default)]
pub struct PauseLog(Arc<Mutex<Vec<Pause>>>);

impl PauseLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, pause: Pause) {
        if let Ok(mut pauses) = self.0.lock() {
            pauses.push(pause);
        }
    }

    pub fn pauses(&self) -> Vec<Pause> {
        self.0.lock().map(|p| p.to_vec()).unwrap_or_default()
    }
}

/// Jittered pauses between network interactions.
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    child: DelayRange,
    entity: DelayRange,
    log: Option<PauseLog>,
}

impl PacingPolicy {
    pub fn new(child: DelayRange, entity: DelayRange) -> Self {
        PacingPolicy { child, entity, log: None }
    }

    /// No waiting at all; for tests and offline replays.
    pub fn none() -> Self {
        Self::new(DelayRange::ZERO, DelayRange::ZERO)
    }

    /// Also appends every pause, zero-length ones included, to `log`.
    pub fn recording(mut self, log: PauseLog) -> Self {
        self.log = Some(log);
        self
    }

    fn note(&self, pause: Pause) {
        if let Some(log) = &self.log {
            log.push(pause);
        }
    }

    pub fn child_delay(&self) {
        self.note(Pause::Child);
        let delay = self.child.sample();
        if !delay.is_zero() {
            debug!("Waiting for {:.1} seconds (Child Delay)...", delay.as_secs_f64());
            thread::sleep(delay);
        }
    }

    pub fn entity_delay(&self) {
        self.note(Pause::Entity);
        let delay = self.entity.sample();
        if !delay.is_zero() {
            info!("Waiting for {:.1} seconds (Program Delay)...", delay.as_secs_f64());
            thread::sleep(delay);
        }
    }
}

/// Fixed short pause used to let a virtual-scroll table re-render.
pub fn settle(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_stays_within_bounds() {
        let range = DelayRange::new(5, 9);
        for _ in 0..200 {
            let ms = range.sample().as_millis() as u64;
            assert!((5..=9).contains(&ms));
        }
    }

    #[test]
    fn reversed_bounds_are_normalized() {
        assert_eq!(DelayRange::new(9, 5), DelayRange::new(5, 9));
    }

    #[test]
    fn zero_range_never_sleeps() {
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
    }

    #[test]
    fn recording_policy_logs_pauses_in_order() {
        let log = PauseLog::new();
        let pacing = PacingPolicy::none().recording(log.clone());
        pacing.child_delay();
        pacing.entity_delay();
        pacing.clone().child_delay();
        assert_eq!(log.pauses(), vec![Pause::Child, Pause::Entity, Pause::Child]);
        assert!(PauseLog::new().pauses().is_empty());
    }
}
