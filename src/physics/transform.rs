//! Single-writer spatial state.
//!
//! `TransformState` fields are private and its mutators are scoped to the
//! physics subtree, so only the coordinator and the collision resolver can
//! move an entity. Everyone else reads the getters or the per-tick
//! [`TransformSnapshot`] mirror. The exclusivity is enforced by visibility —
//! there is no concurrent writer to lock against.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Authoritative position of an entity, plus the previous fixed-step position
/// kept for render interpolation and swept collision tests.
#[derive(Clone, Copy, Debug)]
pub struct TransformState {
    position: Vec2,
    previous_position: Vec2,
}

impl TransformState {
    pub(in crate::physics) fn new(position: Vec2) -> Self {
        Self { position, previous_position: position }
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn previous_position(&self) -> Vec2 {
        self.previous_position
    }

    /// Record the current position as the step's starting point. Called once
    /// at the top of each fixed step, before integration moves anything.
    pub(in crate::physics) fn begin_step(&mut self) {
        self.previous_position = self.position;
    }

    pub(in crate::physics) fn translate(&mut self, delta: Vec2) {
        self.position += delta;
    }

    /// Hard placement (respawn, snapshot restore). Clears the previous
    /// position too so nothing interpolates or sweeps across the teleport.
    pub(in crate::physics) fn teleport(&mut self, position: Vec2) {
        self.position = position;
        self.previous_position = position;
    }

    pub(in crate::physics) fn restore(position: Vec2, previous_position: Vec2) -> Self {
        Self { position, previous_position }
    }

    pub fn snapshot(&self) -> TransformSnapshot {
        TransformSnapshot {
            position: self.position,
            previous_position: self.previous_position,
        }
    }
}

/// Immutable copy of a transform, published once per tick for renderers,
/// animation and UI. Interpolate with [`TransformSnapshot::lerp_position`]
/// using the coordinator's accumulator alpha.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformSnapshot {
    pub position: Vec2,
    pub previous_position: Vec2,
}

impl TransformSnapshot {
    /// Position blended between the previous and current fixed step.
    /// `alpha` is 0..1, how far into the next physics step the render
    /// frame falls.
    pub fn lerp_position(&self, alpha: f32) -> Vec2 {
        self.previous_position.lerp(self.position, alpha)
    }
}
