//! Cross-cutting guard against pathological movement patterns.
//!
//! Two signatures are watched per entity:
//! - request flooding: more than `request_threshold` requests inside the
//!   rolling window throttles further requests to `throttle_scale`;
//! - velocity drift: speed growing strictly for `drift_ticks` consecutive
//!   ticks with no grounded/landing event in between forces a reset.
//!
//! The guard is the safety net, not the primary fix — integration always
//! computes velocity from current input and forces rather than accumulating
//! deltas, so the guard should fire rarely and loudly.

use std::collections::{HashMap, VecDeque};

use hecs::Entity;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThrottleDecision {
    None,
    /// Scale the request magnitude down by this factor before forwarding.
    Scale(f32),
    /// Zero drift-suspect velocity and sub-tick bookkeeping before applying
    /// anything else.
    ForceReset,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Rolling request window in seconds.
    pub window: f64,
    /// Requests allowed inside the window before throttling kicks in.
    pub request_threshold: usize,
    /// Magnitude factor applied while throttled.
    pub throttle_scale: f32,
    /// Consecutive ticks of strictly rising speed (with no ground contact)
    /// that count as a drift signature. The default is long enough that a
    /// plain gravity fall hits the velocity clamp — which breaks the strictly
    /// rising streak — before the guard can misfire.
    pub drift_ticks: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window: 0.2,
            request_threshold: 5,
            throttle_scale: 0.3,
            drift_ticks: 45,
        }
    }
}

#[derive(Default)]
struct EntityWindow {
    /// Simulation-clock timestamps of recent requests, oldest first.
    timestamps: VecDeque<f64>,
    /// Applied-delta magnitudes, parallel to `timestamps`. Zero-magnitude
    /// requests (respawns) never count toward the flood threshold.
    magnitudes: VecDeque<f32>,
    rising_streak: u32,
    last_speed: f32,
}

pub struct AccumulationGuard {
    config: GuardConfig,
    entries: HashMap<Entity, EntityWindow>,
}

impl AccumulationGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config, entries: HashMap::new() }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Consult before forwarding a request. `now` is simulation-clock seconds.
    pub fn should_throttle(&mut self, entity: Entity, now: f64) -> ThrottleDecision {
        let window = self.config.window;
        let entry = self.entries.entry(entity).or_default();
        while let Some(&oldest) = entry.timestamps.front() {
            if now - oldest > window {
                entry.timestamps.pop_front();
                entry.magnitudes.pop_front();
            } else {
                break;
            }
        }

        if entry.rising_streak >= self.config.drift_ticks {
            debug!(?entity, streak = entry.rising_streak, "drift signature, forcing reset");
            return ThrottleDecision::ForceReset;
        }
        let significant = entry.magnitudes.iter().filter(|&&m| m > 0.0).count();
        if significant >= self.config.request_threshold {
            debug!(?entity, recent = significant, "request flood, throttling");
            return ThrottleDecision::Scale(self.config.throttle_scale);
        }
        ThrottleDecision::None
    }

    /// Record one handled request (called once per input, not per retry).
    pub fn record_request(&mut self, entity: Entity, now: f64, applied_magnitude: f32) {
        let entry = self.entries.entry(entity).or_default();
        entry.timestamps.push_back(now);
        entry.magnitudes.push_back(applied_magnitude);
    }

    /// Feed per-tick observations: current speed and whether the entity had
    /// ground support (or landed) this tick. Ground contact clears the drift
    /// streak — rising speed while supported is ordinary acceleration.
    pub fn note_tick(&mut self, entity: Entity, speed: f32, grounded: bool) {
        let entry = self.entries.entry(entity).or_default();
        if grounded || speed <= entry.last_speed {
            entry.rising_streak = 0;
        } else {
            entry.rising_streak += 1;
        }
        entry.last_speed = speed;
    }

    /// Clear an entity's window after a forced reset or respawn.
    pub fn reset(&mut self, entity: Entity) {
        if let Some(entry) = self.entries.get_mut(&entity) {
            entry.timestamps.clear();
            entry.magnitudes.clear();
            entry.rising_streak = 0;
            entry.last_speed = 0.0;
        }
    }

    /// Drop all state for a despawned entity.
    pub fn forget(&mut self, entity: Entity) {
        self.entries.remove(&entity);
    }
}
