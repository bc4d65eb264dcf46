//! The movement request/response protocol.
//!
//! Controllers (player, enemy AI, cutscene/respawn logic) never touch spatial
//! state directly. They describe intent with a [`MovementRequest`] and get an
//! authoritative [`MovementResponse`] back — synchronously within the tick,
//! or via the one-tick deferred queue. Requests are consumed, never retained
//! past the tick after their creation.

use glam::Vec2;
use hecs::Entity;
use serde::{Deserialize, Serialize};

/// What the controller wants to do.
///
/// Kind semantics (y-down coordinates):
/// - `Walk`: `direction` is the horizontal heading, `magnitude` the target
///   speed in px/s. Horizontal velocity is *assigned*, not accumulated.
/// - `Jump`: `magnitude` is the upward impulse speed; `velocity.y` is set to
///   `-magnitude`.
/// - `Dash`: velocity burst of `magnitude` along normalized `direction`.
/// - `Respawn`: teleport to `direction` interpreted as the target point,
///   velocity zeroed, pending requests for the entity purged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    Walk,
    Jump,
    Dash,
    Respawn,
}

/// One movement intent, built by the movement coordinator per input event or
/// per-tick controller decision.
#[derive(Clone, Copy, Debug)]
pub struct MovementRequest {
    pub entity: Entity,
    pub kind: MovementKind,
    pub direction: Vec2,
    pub magnitude: f32,
    pub priority: u8,
    /// Which rung of the retry ladder produced this request (0 = first try).
    pub retry_count: u8,
    /// Simulation-clock seconds at creation. Drives the accumulation guard
    /// window and the jump-buffer validity check.
    pub timestamp: f64,
}

/// Outcome of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MovementStatus {
    /// Delta applied; response carries the resulting state.
    Applied,
    /// Geometrically disallowed this tick. Surfaced to the caller only after
    /// the retry ladder is exhausted. Callers must not retry in the same tick.
    Blocked,
    /// Coordinator could not process this tick; automatically retried at the
    /// start of the next tick's Movement phase.
    Deferred,
    /// Missing or invalid physics body. Not retried; the entity is excluded
    /// from integration until re-registered.
    Fatal,
}

/// Authoritative answer to a [`MovementRequest`]. Ephemeral — values reflect
/// the tick the request resolved in.
#[derive(Clone, Debug)]
pub struct MovementResponse {
    pub status: MovementStatus,
    pub actual_velocity: Vec2,
    pub actual_position: Vec2,
    pub is_grounded: bool,
    pub reason: Option<String>,
}

impl MovementResponse {
    pub fn applied(velocity: Vec2, position: Vec2, is_grounded: bool) -> Self {
        Self {
            status: MovementStatus::Applied,
            actual_velocity: velocity,
            actual_position: position,
            is_grounded,
            reason: None,
        }
    }

    pub fn blocked(velocity: Vec2, position: Vec2, is_grounded: bool, reason: String) -> Self {
        Self {
            status: MovementStatus::Blocked,
            actual_velocity: velocity,
            actual_position: position,
            is_grounded,
            reason: Some(reason),
        }
    }

    pub fn deferred(position: Vec2) -> Self {
        Self {
            status: MovementStatus::Deferred,
            actual_velocity: Vec2::ZERO,
            actual_position: position,
            is_grounded: false,
            reason: None,
        }
    }

    pub fn fatal(reason: String) -> Self {
        Self {
            status: MovementStatus::Fatal,
            actual_velocity: Vec2::ZERO,
            actual_position: Vec2::ZERO,
            is_grounded: false,
            reason: Some(reason),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == MovementStatus::Applied
    }
}
