//! Movement coordination: intent in, authoritative response out.
//!
//! Controllers never talk to physics directly. They hand an intent to
//! [`MovementCoordinator::handle_movement_input`], which consults the
//! accumulation guard, runs the retry ladder, and forwards to the physics
//! coordinator. Blocked/Deferred are resolved here; callers only ever see a
//! terminal status. This consolidates what used to be ad-hoc retry and
//! emergency-fallback logic scattered across controller code into one place,
//! parameterized by a per-kind policy table.

mod guard;

use std::collections::VecDeque;

use glam::Vec2;
use hecs::{Entity, World};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::level::LevelGeometry;
use crate::physics::PhysicsCoordinator;
use crate::protocol::{MovementKind, MovementRequest, MovementResponse, MovementStatus};

pub use guard::{AccumulationGuard, GuardConfig, ThrottleDecision};

/// Per-kind movement tuning. One table replaces the per-controller copies of
/// these numbers; entity archetypes that need different feel get their own
/// table instance.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MovementPolicy {
    /// Target walk speed, px/s.
    pub walk_speed: f32,
    /// Upward jump impulse, px/s.
    pub jump_impulse: f32,
    /// Dash burst speed, px/s.
    pub dash_speed: f32,
}

impl Default for MovementPolicy {
    fn default() -> Self {
        Self {
            walk_speed: 180.0,
            jump_impulse: 600.0,
            dash_speed: 900.0,
        }
    }
}

impl MovementPolicy {
    fn magnitude_for(&self, kind: MovementKind) -> f32 {
        match kind {
            MovementKind::Walk => self.walk_speed,
            MovementKind::Jump => self.jump_impulse,
            MovementKind::Dash => self.dash_speed,
            MovementKind::Respawn => 0.0,
        }
    }

    fn priority_for(kind: MovementKind) -> u8 {
        match kind {
            MovementKind::Walk => 10,
            MovementKind::Jump => 20,
            MovementKind::Dash => 30,
            MovementKind::Respawn => 40,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Magnitude ladder on Blocked: full, reduced, emergency. The emergency
    /// rung bypasses guard throttling and talks to physics directly; after it
    /// fails, the caller gets a terminal Blocked and must not retry this tick.
    pub retry_scales: [f32; 3],
    /// Deferred requests older than this (seconds) are dropped on drain —
    /// also the jump-buffer validity window.
    pub buffer_window: f64,
    pub policy: MovementPolicy,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            retry_scales: [1.0, 0.75, 0.30],
            buffer_window: 0.15,
            policy: MovementPolicy::default(),
        }
    }
}

pub struct MovementCoordinator {
    config: MovementConfig,
    /// The one-tick deferred queue — the only concurrency-like primitive in
    /// the simulation. Drained exactly once per tick, before new requests.
    deferred: VecDeque<MovementRequest>,
    draining: bool,
}

impl MovementCoordinator {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            deferred: VecDeque::new(),
            draining: false,
        }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    /// Build a request from a controller intent and push it through the guard
    /// and the retry ladder. `now` is simulation-clock seconds.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_movement_input(
        &mut self,
        world: &mut World,
        level: &LevelGeometry,
        physics: &mut PhysicsCoordinator,
        guard: &mut AccumulationGuard,
        entity: Entity,
        direction: Vec2,
        kind: MovementKind,
        now: f64,
    ) -> MovementResponse {
        if self.draining {
            // Queue is mid-drain: this request waits for the next tick.
            let position = physics
                .transform_snapshot(entity)
                .map(|s| s.position)
                .unwrap_or(Vec2::ZERO);
            self.defer(MovementRequest {
                entity,
                kind,
                direction,
                magnitude: self.config.policy.magnitude_for(kind),
                priority: MovementPolicy::priority_for(kind),
                retry_count: 0,
                timestamp: now,
            });
            return MovementResponse::deferred(position);
        }

        if kind == MovementKind::Respawn {
            // Respawning invalidates anything still queued for this entity.
            self.cancel_pending_request(entity);
            guard.reset(entity);
        }

        let guard_scale = match guard.should_throttle(entity, now) {
            ThrottleDecision::None => 1.0,
            ThrottleDecision::Scale(scale) => scale,
            ThrottleDecision::ForceReset => {
                physics.force_reset(world, entity);
                guard.reset(entity);
                1.0
            }
        };

        let base = self.config.policy.magnitude_for(kind);
        guard.record_request(entity, now, base * guard_scale);
        self.run_ladder(world, level, physics, entity, direction, kind, base, guard_scale, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_ladder(
        &mut self,
        world: &mut World,
        level: &LevelGeometry,
        physics: &mut PhysicsCoordinator,
        entity: Entity,
        direction: Vec2,
        kind: MovementKind,
        base_magnitude: f32,
        guard_scale: f32,
        now: f64,
    ) -> MovementResponse {
        let rungs = self.config.retry_scales;
        let mut terminal = None;

        for (attempt, &ladder_scale) in rungs.iter().enumerate() {
            let emergency = attempt == rungs.len() - 1;
            // The emergency rung ignores throttling — it exists to keep the
            // entity responsive at all, not to be polite.
            let magnitude = if emergency {
                base_magnitude * ladder_scale
            } else {
                base_magnitude * ladder_scale * guard_scale
            };
            let request = MovementRequest {
                entity,
                kind,
                direction,
                magnitude,
                priority: MovementPolicy::priority_for(kind),
                retry_count: attempt as u8,
                timestamp: now,
            };
            let response = physics.request_movement(world, level, &request);
            match response.status {
                MovementStatus::Applied | MovementStatus::Fatal | MovementStatus::Deferred => {
                    return response;
                }
                MovementStatus::Blocked => {
                    debug!(
                        ?entity,
                        ?kind,
                        attempt,
                        magnitude,
                        "movement blocked, descending retry ladder"
                    );
                    terminal = Some(response);
                }
            }
        }

        // Ladder exhausted: report Blocked once. No further retry this tick —
        // that bound is what prevents unbounded recursion.
        terminal.unwrap_or_else(|| {
            MovementResponse::blocked(Vec2::ZERO, Vec2::ZERO, false, "retry ladder empty".into())
        })
    }

    /// Queue a request for the start of the next tick's Movement phase.
    /// Controllers use this for jump buffering: the request is honored on
    /// drain if it is still inside the buffer window.
    pub fn defer(&mut self, request: MovementRequest) {
        self.deferred.push_back(request);
    }

    /// Convenience for the jump-buffer pattern: queue a jump intent that
    /// stays valid for the buffer window.
    pub fn buffer_jump(&mut self, entity: Entity, now: f64) {
        self.defer(MovementRequest {
            entity,
            kind: MovementKind::Jump,
            direction: Vec2::ZERO,
            magnitude: self.config.policy.jump_impulse,
            priority: MovementPolicy::priority_for(MovementKind::Jump),
            retry_count: 0,
            timestamp: now,
        });
    }

    /// Drain the deferred queue, exactly once per tick, before any new
    /// requests are accepted. Requests queued during the drain land on the
    /// next tick. Stale requests (older than the buffer window) are dropped.
    pub fn drain_deferred(
        &mut self,
        world: &mut World,
        level: &LevelGeometry,
        physics: &mut PhysicsCoordinator,
        guard: &mut AccumulationGuard,
        now: f64,
    ) -> Vec<(Entity, MovementResponse)> {
        self.draining = true;
        let batch: Vec<MovementRequest> = self.deferred.drain(..).collect();
        let mut responses = Vec::with_capacity(batch.len());

        for request in batch {
            if now - request.timestamp > self.config.buffer_window {
                debug!(entity = ?request.entity, kind = ?request.kind, "deferred request expired");
                continue;
            }
            let guard_scale = match guard.should_throttle(request.entity, now) {
                ThrottleDecision::None => 1.0,
                ThrottleDecision::Scale(scale) => scale,
                ThrottleDecision::ForceReset => {
                    physics.force_reset(world, request.entity);
                    guard.reset(request.entity);
                    1.0
                }
            };
            guard.record_request(request.entity, now, request.magnitude * guard_scale);
            let response = self.run_ladder(
                world,
                level,
                physics,
                request.entity,
                request.direction,
                request.kind,
                request.magnitude,
                guard_scale,
                now,
            );
            responses.push((request.entity, response));
        }

        self.draining = false;
        responses
    }

    /// Drop any deferred request for `entity` — despawn and respawn both
    /// invalidate queued intent.
    pub fn cancel_pending_request(&mut self, entity: Entity) {
        self.deferred.retain(|r| r.entity != entity);
    }

    pub fn pending_requests(&self, entity: Entity) -> usize {
        self.deferred.iter().filter(|r| r.entity == entity).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Collider, PhysicsBody};
    use crate::level::Aabb;
    use crate::physics::{PhysicsConfig, TransformState};

    struct Rig {
        world: World,
        level: LevelGeometry,
        physics: PhysicsCoordinator,
        movement: MovementCoordinator,
        guard: AccumulationGuard,
        entity: Entity,
    }

    fn rig(level_boxes: &[Aabb], movement_config: MovementConfig) -> Rig {
        let mut world = World::new();
        let mut physics = PhysicsCoordinator::new(PhysicsConfig::default());
        let mut level = LevelGeometry::empty();
        for b in level_boxes {
            level.push_aabb(*b);
        }
        let entity = world.spawn(());
        physics
            .register(
                &mut world,
                entity,
                Vec2::ZERO,
                PhysicsBody::default(),
                Collider::new(Vec2::splat(8.0)),
            )
            .unwrap();
        Rig {
            world,
            level,
            physics,
            movement: MovementCoordinator::new(movement_config),
            guard: AccumulationGuard::new(GuardConfig::default()),
            entity,
        }
    }

    fn walk(rig: &mut Rig, now: f64) -> MovementResponse {
        rig.movement.handle_movement_input(
            &mut rig.world,
            &rig.level,
            &mut rig.physics,
            &mut rig.guard,
            rig.entity,
            Vec2::new(1.0, 0.0),
            MovementKind::Walk,
            now,
        )
    }

    #[test]
    fn open_ground_walk_applies_at_full_magnitude() {
        let mut r = rig(&[], MovementConfig::default());
        let resp = walk(&mut r, 0.0);
        assert!(resp.is_applied());
        assert!((resp.actual_velocity.x - 180.0).abs() < 1e-3);
    }

    #[test]
    fn ladder_descends_to_emergency_against_wall() {
        // Wall flush against the right face. walk_speed 60 px/s gives per-rung
        // penetration increases of 1.0 / 0.75 / 0.3 px against the 0.5px
        // tolerance: blocked, blocked, applied.
        let wall = Aabb::new(Vec2::new(8.0, -50.0), Vec2::new(40.0, 50.0));
        let config = MovementConfig {
            policy: MovementPolicy { walk_speed: 60.0, ..Default::default() },
            ..Default::default()
        };
        let mut r = rig(&[wall], config);

        let resp = walk(&mut r, 0.0);
        assert!(resp.is_applied(), "emergency rung should land: {:?}", resp.status);
        // Displacement is 30% of the requested rung: 60 * 0.3 / 60 = 0.3 px.
        assert!((resp.actual_position.x - 0.3).abs() < 1e-3, "x={}", resp.actual_position.x);
        assert!((resp.actual_velocity.x - 18.0).abs() < 1e-3);
    }

    #[test]
    fn terminal_blocked_after_ladder_exhausts() {
        let wall = Aabb::new(Vec2::new(8.0, -50.0), Vec2::new(40.0, 50.0));
        let config = MovementConfig {
            // 600 px/s: even the 30% rung adds 3px of penetration.
            policy: MovementPolicy { walk_speed: 600.0, ..Default::default() },
            ..Default::default()
        };
        let mut r = rig(&[wall], config);
        let resp = walk(&mut r, 0.0);
        assert_eq!(resp.status, MovementStatus::Blocked);
        assert!(resp.reason.is_some());
        // The entity simply did not move — no crash, no displacement.
        let tf = r.world.get::<&TransformState>(r.entity).unwrap();
        assert_eq!(tf.position(), Vec2::ZERO);
    }

    #[test]
    fn request_flood_is_scaled_down() {
        // Scenario: 6 Walk requests inside 150 ms — the sixth is throttled
        // to 30% of the policy magnitude.
        let mut r = rig(&[], MovementConfig::default());
        for i in 0..5 {
            let resp = walk(&mut r, i as f64 * 0.03);
            assert!((resp.actual_velocity.x - 180.0).abs() < 1e-3);
        }
        let resp = walk(&mut r, 0.15);
        assert!(resp.is_applied());
        assert!((resp.actual_velocity.x - 54.0).abs() < 1e-3, "throttled to 0.3x");
    }

    #[test]
    fn force_reset_zeroes_drifting_velocity() {
        let mut r = rig(&[], MovementConfig::default());
        r.world.get::<&mut PhysicsBody>(r.entity).unwrap().velocity = Vec2::new(0.0, 500.0);
        // Fake a long strictly-rising airborne streak.
        for tick in 0..60 {
            r.guard.note_tick(r.entity, 100.0 + tick as f32, false);
        }
        let resp = walk(&mut r, 1.0);
        assert!(resp.is_applied());
        // Reset happened before the walk: vertical drift is gone, the walk
        // itself set the horizontal component.
        assert_eq!(resp.actual_velocity.y, 0.0);
        assert!((resp.actual_velocity.x - 180.0).abs() < 1e-3);
    }

    #[test]
    fn deferred_request_applies_next_tick() {
        let mut r = rig(&[], MovementConfig::default());
        r.movement.buffer_jump(r.entity, 0.0);
        assert_eq!(r.movement.pending_requests(r.entity), 1);

        let responses = r.movement.drain_deferred(
            &mut r.world,
            &r.level,
            &mut r.physics,
            &mut r.guard,
            0.016,
        );
        assert_eq!(responses.len(), 1);
        assert!(responses[0].1.is_applied());
        assert!(responses[0].1.actual_velocity.y < 0.0, "jump fired from buffer");
        assert_eq!(r.movement.pending_requests(r.entity), 0);
    }

    #[test]
    fn stale_deferred_request_is_dropped() {
        let mut r = rig(&[], MovementConfig::default());
        r.movement.buffer_jump(r.entity, 0.0);
        // Drained well past the 150ms buffer window.
        let responses = r.movement.drain_deferred(
            &mut r.world,
            &r.level,
            &mut r.physics,
            &mut r.guard,
            0.5,
        );
        assert!(responses.is_empty());
        assert_eq!(r.movement.pending_requests(r.entity), 0);
    }

    #[test]
    fn cancel_purges_queued_requests() {
        let mut r = rig(&[], MovementConfig::default());
        r.movement.buffer_jump(r.entity, 0.0);
        r.movement.buffer_jump(r.entity, 0.01);
        r.movement.cancel_pending_request(r.entity);
        assert_eq!(r.movement.pending_requests(r.entity), 0);
    }

    #[test]
    fn respawn_cancels_pending_and_teleports() {
        let mut r = rig(&[], MovementConfig::default());
        r.movement.buffer_jump(r.entity, 0.0);
        let resp = r.movement.handle_movement_input(
            &mut r.world,
            &r.level,
            &mut r.physics,
            &mut r.guard,
            r.entity,
            Vec2::new(32.0, -64.0),
            MovementKind::Respawn,
            0.01,
        );
        assert!(resp.is_applied());
        assert_eq!(resp.actual_position, Vec2::new(32.0, -64.0));
        assert_eq!(r.movement.pending_requests(r.entity), 0);
    }

    #[test]
    fn accumulation_stays_bounded_over_long_input() {
        // 1,000 identical Walk requests, one per tick: per-tick displacement
        // must converge, not grow.
        let mut r = rig(&[], MovementConfig::default());
        let dt = r.physics.fixed_dt() as f64;
        let mut last_x = 0.0f32;
        let mut displacements = Vec::new();
        for tick in 0..1000 {
            let now = tick as f64 * dt;
            let resp = walk(&mut r, now);
            assert!(resp.actual_velocity.length() <= 900.0 + 1e-3);
            displacements.push(resp.actual_position.x - last_x);
            last_x = resp.actual_position.x;
        }
        // Steady state: late displacements all equal (to float noise).
        let tail = &displacements[900..];
        let first = tail[0];
        for &d in tail {
            assert!((d - first).abs() < 1e-3, "displacement drifted: {d} vs {first}");
        }
    }
}
