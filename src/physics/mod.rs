//! The physics coordinator — sole writer of entity spatial state.
//!
//! Every frame the simulation hands it wall-clock time; an accumulator
//! consumes it in fixed slices (default 1/60 s) so physics is frame-rate
//! independent, with the partial remainder carried into the next frame.
//! Per slice, every registered body is integrated in entity-creation order
//! before any collision resolution begins, so the resolver never observes a
//! half-integrated world.
//!
//! Velocity is always computed from the current forces and inputs — gravity,
//! friction, absolute movement targets — never by accumulating deltas onto
//! last frame's velocity. That, plus the per-tick grounded recomputation in
//! the resolver, is the structural fix for progressive control drift; the
//! accumulation guard on the movement side is only the safety net.

mod collision;
mod raycast;
mod transform;

use std::collections::{HashMap, HashSet};

use glam::Vec2;
use hecs::{Entity, World};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::components::{Collider, PhysicsBody};
use crate::error::PhysicsError;
use crate::level::LevelGeometry;
use crate::protocol::{MovementKind, MovementRequest, MovementResponse};

pub use collision::{
    max_static_penetration, CollisionManifold, CollisionResolver, ContactEvent, ContactTarget,
};
pub use raycast::{raycast, RayTarget, RaycastHit};
pub use transform::{TransformSnapshot, TransformState};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Fixed simulation step in seconds.
    pub fixed_dt: f32,
    /// Gravity in px/s², acting in +y (y-down).
    pub gravity: f32,
    /// Movement requests may not deepen static penetration beyond this (px).
    pub penetration_tolerance: f32,
    /// A contact normal with `normal.y` below the negation of this counts as
    /// support (mostly-upward push in y-down space).
    pub ground_normal_threshold: f32,
    /// Below this approach speed (px/s) impacts stop dead instead of bouncing.
    pub rest_velocity: f32,
    /// Broad-phase grid cell size in px.
    pub broadphase_cell: f32,
    /// Cap on fixed steps consumed per frame; excess frame debt is dropped so
    /// a long stall cannot spiral.
    pub max_steps_per_frame: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            gravity: 2000.0,
            penetration_tolerance: 0.5,
            ground_normal_threshold: 0.7,
            rest_velocity: 20.0,
            broadphase_cell: 64.0,
            max_steps_per_frame: 8,
        }
    }
}

pub struct PhysicsCoordinator {
    config: PhysicsConfig,
    resolver: CollisionResolver,
    accumulator: f32,
    /// Registered entities in creation order — the deterministic iteration
    /// order for integration and resolution.
    registry: Vec<Entity>,
    /// Entities that produced a Fatal response; skipped by integration until
    /// explicitly re-registered.
    excluded: HashSet<Entity>,
    /// Read-only transform mirror, refreshed once per tick after integration.
    mirror: HashMap<Entity, TransformSnapshot>,
}

impl PhysicsCoordinator {
    pub fn new(config: PhysicsConfig) -> Self {
        let resolver = CollisionResolver::new(
            config.broadphase_cell,
            config.rest_velocity,
            config.ground_normal_threshold,
        );
        Self {
            config,
            resolver,
            accumulator: 0.0,
            registry: Vec::new(),
            excluded: HashSet::new(),
            mirror: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn fixed_dt(&self) -> f32 {
        self.config.fixed_dt
    }

    /// Registered entities in creation order.
    pub fn registry(&self) -> &[Entity] {
        &self.registry
    }

    pub fn is_registered(&self, entity: Entity) -> bool {
        self.registry.contains(&entity)
    }

    /// Give `entity` physics participation. Also clears a previous Fatal
    /// exclusion, which is the documented recovery path.
    pub fn register(
        &mut self,
        world: &mut World,
        entity: Entity,
        position: Vec2,
        body: PhysicsBody,
        collider: Collider,
    ) -> Result<(), PhysicsError> {
        if !world.contains(entity) {
            return Err(PhysicsError::UnknownEntity(entity));
        }
        world
            .insert(entity, (TransformState::new(position), body, collider))
            .map_err(|_| PhysicsError::UnknownEntity(entity))?;
        if !self.registry.contains(&entity) {
            self.registry.push(entity);
        }
        self.excluded.remove(&entity);
        self.mirror.insert(entity, TransformSnapshot {
            position,
            previous_position: position,
        });
        Ok(())
    }

    /// Remove physics participation (despawn). Safe to call mid-tick: the
    /// entity is immediately excluded from subsequent phases.
    pub fn deregister(&mut self, world: &mut World, entity: Entity) {
        self.registry.retain(|&e| e != entity);
        self.excluded.remove(&entity);
        self.mirror.remove(&entity);
        let _ = world.remove::<(TransformState, PhysicsBody, Collider)>(entity);
    }

    /// One integration step for one entity: gravity while airborne, friction
    /// damping while grounded, velocity clamp, then semi-implicit Euler.
    pub fn integrate(
        &mut self,
        world: &mut World,
        entity: Entity,
        dt: f32,
    ) -> Result<(), PhysicsError> {
        if !self.registry.contains(&entity) {
            return Err(PhysicsError::UnknownEntity(entity));
        }
        match world.query_one_mut::<(&mut TransformState, &mut PhysicsBody)>(entity) {
            Ok((tf, body)) => {
                Self::integrate_body(&self.config, tf, body, dt);
                Ok(())
            }
            Err(_) => {
                warn!(?entity, "integrate: no physics body, excluding entity");
                self.excluded.insert(entity);
                Err(PhysicsError::MissingBody(entity))
            }
        }
    }

    fn integrate_body(config: &PhysicsConfig, tf: &mut TransformState, body: &mut PhysicsBody, dt: f32) {
        tf.begin_step();
        if body.is_grounded {
            let damping = (1.0 - body.friction * dt).max(0.0);
            body.velocity.x *= damping;
        } else {
            body.velocity.y += config.gravity * body.gravity_scale * dt;
        }
        body.velocity = clamp_velocity(body.velocity, body.max_velocity);
        let delta = body.velocity * dt;
        tf.translate(delta);
    }

    /// Consume `frame_dt` in fixed slices: integrate every registered body in
    /// creation order, then resolve collisions, once per slice. The remainder
    /// stays in the accumulator for the next frame. Returns the contact
    /// events of every slice that ran and refreshes the transform mirror.
    pub fn step(
        &mut self,
        world: &mut World,
        level: &LevelGeometry,
        frame_dt: f32,
    ) -> Vec<ContactEvent> {
        self.accumulator += frame_dt;
        let dt = self.config.fixed_dt;
        let mut events = Vec::new();
        let mut steps = 0u32;

        while self.accumulator >= dt {
            if steps >= self.config.max_steps_per_frame {
                debug!(dropped = self.accumulator, "frame debt exceeded step cap, dropping");
                self.accumulator = self.accumulator.rem_euclid(dt);
                break;
            }
            for i in 0..self.registry.len() {
                let entity = self.registry[i];
                if self.excluded.contains(&entity) {
                    continue;
                }
                match world.query_one_mut::<(&mut TransformState, &mut PhysicsBody)>(entity) {
                    Ok((tf, body)) => Self::integrate_body(&self.config, tf, body, dt),
                    Err(_) => {
                        warn!(?entity, "step: no physics body, excluding entity");
                        self.excluded.insert(entity);
                    }
                }
            }
            events.extend(self.resolver.resolve(world, level, &self.registry));
            self.accumulator -= dt;
            steps += 1;
        }

        self.publish_mirror(world);
        events
    }

    /// Interpolation factor (0..1) for renderers: how far into the next
    /// fixed step the current frame falls.
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.config.fixed_dt
    }

    fn publish_mirror(&mut self, world: &World) {
        self.mirror.retain(|e, _| world.contains(*e));
        for &entity in &self.registry {
            if let Ok(tf) = world.get::<&TransformState>(entity) {
                self.mirror.insert(entity, tf.snapshot());
            }
        }
    }

    /// Immutable transform snapshot from the last completed tick. This is the
    /// only spatial view renderers/animation/UI get.
    pub fn transform_snapshot(&self, entity: Entity) -> Option<TransformSnapshot> {
        self.mirror.get(&entity).copied()
    }

    /// Apply a movement delta atop the current tick's integrated state.
    ///
    /// `Blocked` when the tentative position would deepen static penetration
    /// beyond the tolerance; `Fatal` (logged, entity excluded until
    /// re-registered) when the entity has no body.
    pub fn request_movement(
        &mut self,
        world: &mut World,
        level: &LevelGeometry,
        request: &MovementRequest,
    ) -> MovementResponse {
        let entity = request.entity;
        if self.excluded.contains(&entity) || !self.registry.contains(&entity) {
            warn!(?entity, kind = ?request.kind, "request_movement: unregistered entity");
            return MovementResponse::fatal(format!("entity {entity:?} not registered"));
        }

        let Ok((tf, body, collider)) = world
            .query_one_mut::<(&mut TransformState, &mut PhysicsBody, Option<&Collider>)>(entity)
        else {
            warn!(?entity, kind = ?request.kind, "request_movement: missing physics body");
            self.excluded.insert(entity);
            return MovementResponse::fatal(format!("entity {entity:?} has no physics body"));
        };

        let dt = self.config.fixed_dt;
        let dir = request.direction.normalize_or_zero();

        // Respawn is a hard placement, not a delta — no probe, no sweep.
        if request.kind == MovementKind::Respawn {
            tf.teleport(request.direction);
            body.velocity = Vec2::ZERO;
            body.is_grounded = false;
            body.ground_normal = Vec2::ZERO;
            self.mirror.insert(entity, tf.snapshot());
            return MovementResponse::applied(Vec2::ZERO, tf.position(), false);
        }

        // Velocity is *assigned* from the request target, never accumulated
        // onto itself — additive per-frame adjustments are the historical
        // drift bug this module exists to prevent.
        let (new_velocity, displacement) = match request.kind {
            MovementKind::Walk => (
                Vec2::new(dir.x * request.magnitude, body.velocity.y),
                Vec2::new(dir.x * request.magnitude, 0.0) * dt,
            ),
            MovementKind::Jump => (
                Vec2::new(body.velocity.x, -request.magnitude),
                Vec2::new(0.0, -request.magnitude) * dt,
            ),
            MovementKind::Dash => (dir * request.magnitude, dir * request.magnitude * dt),
            MovementKind::Respawn => unreachable!("handled above"),
        };

        if let Some(collider) = collider {
            let current = max_static_penetration(level, &collider.aabb_at(tf.position()));
            let tentative =
                max_static_penetration(level, &collider.aabb_at(tf.position() + displacement));
            let increase = tentative - current;
            if increase > self.config.penetration_tolerance {
                debug!(
                    ?entity,
                    kind = ?request.kind,
                    retry = request.retry_count,
                    increase,
                    "movement blocked by static geometry"
                );
                return MovementResponse::blocked(
                    body.velocity,
                    tf.position(),
                    body.is_grounded,
                    format!("penetration would increase by {increase:.2}px"),
                );
            }
        }

        body.velocity = clamp_velocity(new_velocity, body.max_velocity);
        tf.translate(displacement);
        MovementResponse::applied(body.velocity, tf.position(), body.is_grounded)
    }

    /// Read-only grounded query, usable by any collaborator.
    pub fn query_grounded_state(&self, world: &World, entity: Entity) -> bool {
        world
            .get::<&PhysicsBody>(entity)
            .map(|b| b.is_grounded)
            .unwrap_or(false)
    }

    /// Read-only ray query against static geometry and dynamic colliders.
    pub fn raycast(
        &self,
        world: &World,
        level: &LevelGeometry,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
    ) -> Option<RaycastHit> {
        raycast(world, level, origin, direction, max_distance)
    }

    /// Accumulation-guard hook: zero the drift-suspect velocity and the
    /// entity's sub-tick bookkeeping so compounded error cannot persist.
    pub fn force_reset(&mut self, world: &mut World, entity: Entity) {
        if let Ok(mut body) = world.get::<&mut PhysicsBody>(entity) {
            warn!(?entity, velocity = ?body.velocity, "force-resetting drifting velocity");
            body.velocity = Vec2::ZERO;
        }
    }

    /// SaveSystem restore path: write a saved transform + body back before
    /// the next tick of integration, keeping the single-writer contract.
    pub fn restore_entity(
        &mut self,
        world: &mut World,
        entity: Entity,
        position: Vec2,
        previous_position: Vec2,
        body: PhysicsBody,
    ) -> Result<(), PhysicsError> {
        if !world.contains(entity) {
            return Err(PhysicsError::UnknownEntity(entity));
        }
        let tf = TransformState::restore(position, previous_position);
        let snapshot = tf.snapshot();
        world
            .insert(entity, (tf, body))
            .map_err(|_| PhysicsError::UnknownEntity(entity))?;
        if !self.registry.contains(&entity) {
            self.registry.push(entity);
        }
        self.excluded.remove(&entity);
        self.mirror.insert(entity, snapshot);
        Ok(())
    }
}

pub(in crate::physics) fn clamp_velocity(velocity: Vec2, max_velocity: f32) -> Vec2 {
    let len = velocity.length();
    if len > max_velocity && len > 0.0 {
        velocity * (max_velocity / len)
    } else {
        velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Aabb;
    use crate::protocol::MovementKind;

    const DT: f32 = 1.0 / 60.0;

    fn setup(level_boxes: &[Aabb]) -> (World, PhysicsCoordinator, LevelGeometry, Entity) {
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
        (world, physics, level, entity)
    }

    fn walk_request(entity: Entity, magnitude: f32) -> MovementRequest {
        MovementRequest {
            entity,
            kind: MovementKind::Walk,
            direction: Vec2::new(1.0, 0.0),
            magnitude,
            priority: 0,
            retry_count: 0,
            timestamp: 0.0,
        }
    }

    #[test]
    fn free_fall_accelerates_downward() {
        // Scenario: no ground anywhere below — after 10 ticks the entity is
        // falling (+y in y-down space) and not grounded.
        let (mut world, mut physics, level, e) = setup(&[]);
        for _ in 0..10 {
            physics.step(&mut world, &level, DT);
        }
        let body = world.get::<&PhysicsBody>(e).unwrap();
        assert!(!body.is_grounded);
        assert!(body.velocity.y > 0.0);
        let tf = world.get::<&TransformState>(e).unwrap();
        assert!(tf.position().y > 0.0);
    }

    #[test]
    fn velocity_never_exceeds_max() {
        let (mut world, mut physics, level, e) = setup(&[]);
        world.get::<&mut PhysicsBody>(e).unwrap().max_velocity = 300.0;
        for _ in 0..600 {
            physics.step(&mut world, &level, DT);
            let body = world.get::<&PhysicsBody>(e).unwrap();
            assert!(body.velocity.length() <= 300.0 + 1e-3);
        }
    }

    #[test]
    fn accumulator_carries_partial_frames() {
        let (mut world, mut physics, level, e) = setup(&[]);
        // Half a fixed step: nothing should integrate yet.
        physics.step(&mut world, &level, DT * 0.5);
        assert_eq!(world.get::<&PhysicsBody>(e).unwrap().velocity, Vec2::ZERO);
        assert!(physics.alpha() > 0.4 && physics.alpha() < 0.6);
        // Second half completes exactly one step.
        physics.step(&mut world, &level, DT * 0.5);
        assert!(world.get::<&PhysicsBody>(e).unwrap().velocity.y > 0.0);
    }

    #[test]
    fn walk_assigns_absolute_velocity() {
        let (mut world, mut physics, level, e) = setup(&[]);
        for _ in 0..5 {
            let resp = physics.request_movement(&mut world, &level, &walk_request(e, 120.0));
            assert!(resp.is_applied());
            // Repeated identical requests converge, never compound.
            assert!((resp.actual_velocity.x - 120.0).abs() < 1e-4);
        }
    }

    #[test]
    fn jump_applies_upward_impulse() {
        let (mut world, mut physics, level, e) = setup(&[]);
        let req = MovementRequest {
            kind: MovementKind::Jump,
            direction: Vec2::ZERO,
            magnitude: 5.0,
            ..walk_request(e, 0.0)
        };
        let resp = physics.request_movement(&mut world, &level, &req);
        assert!(resp.is_applied());
        assert!(resp.actual_velocity.y < 0.0);
    }

    #[test]
    fn blocked_when_pushing_into_wall() {
        // Wall flush against the entity's right face (collider spans ±8).
        let wall = Aabb::new(Vec2::new(8.0, -50.0), Vec2::new(40.0, 50.0));
        let (mut world, mut physics, level, e) = setup(&[wall]);
        // 60 px/s * 1/60 s = 1 px of added penetration, over the 0.5 tolerance.
        let resp = physics.request_movement(&mut world, &level, &walk_request(e, 60.0));
        assert_eq!(resp.status, crate::protocol::MovementStatus::Blocked);
        assert!(resp.reason.is_some());
        // 18 px/s * 1/60 s = 0.3 px — inside tolerance, applied.
        let resp = physics.request_movement(&mut world, &level, &walk_request(e, 18.0));
        assert!(resp.is_applied());
    }

    #[test]
    fn fatal_for_unregistered_entity() {
        let (mut world, mut physics, level, _e) = setup(&[]);
        let stranger = world.spawn(());
        let resp = physics.request_movement(&mut world, &level, &walk_request(stranger, 10.0));
        assert_eq!(resp.status, crate::protocol::MovementStatus::Fatal);
    }

    #[test]
    fn fatal_excludes_until_reregistered() {
        let (mut world, mut physics, level, e) = setup(&[]);
        // Strip the body behind the coordinator's back.
        world.remove::<(TransformState, PhysicsBody, Collider)>(e).unwrap();
        let resp = physics.request_movement(&mut world, &level, &walk_request(e, 10.0));
        assert_eq!(resp.status, crate::protocol::MovementStatus::Fatal);
        // Re-registration recovers.
        physics
            .register(
                &mut world,
                e,
                Vec2::ZERO,
                PhysicsBody::default(),
                Collider::new(Vec2::splat(8.0)),
            )
            .unwrap();
        let resp = physics.request_movement(&mut world, &level, &walk_request(e, 10.0));
        assert!(resp.is_applied());
    }

    #[test]
    fn step_excludes_entities_missing_bodies() {
        let (mut world, mut physics, level, e) = setup(&[]);
        // Components stripped behind the coordinator's back.
        world.remove::<(TransformState, PhysicsBody, Collider)>(e).unwrap();
        physics.step(&mut world, &level, DT);

        // Putting components back without re-registering is not enough: the
        // entity stays excluded from integration.
        world
            .insert(
                e,
                (
                    TransformState::new(Vec2::ZERO),
                    PhysicsBody::default(),
                    Collider::new(Vec2::splat(8.0)),
                ),
            )
            .unwrap();
        physics.step(&mut world, &level, DT);
        assert_eq!(world.get::<&PhysicsBody>(e).unwrap().velocity, Vec2::ZERO);

        // Re-registration is the recovery path.
        physics
            .register(
                &mut world,
                e,
                Vec2::ZERO,
                PhysicsBody::default(),
                Collider::new(Vec2::splat(8.0)),
            )
            .unwrap();
        physics.step(&mut world, &level, DT);
        assert!(world.get::<&PhysicsBody>(e).unwrap().velocity.y > 0.0);
    }

    #[test]
    fn respawn_teleports_and_zeroes_velocity() {
        let (mut world, mut physics, level, e) = setup(&[]);
        physics.step(&mut world, &level, DT * 5.0);
        let req = MovementRequest {
            kind: MovementKind::Respawn,
            direction: Vec2::new(50.0, -20.0),
            magnitude: 0.0,
            ..walk_request(e, 0.0)
        };
        let resp = physics.request_movement(&mut world, &level, &req);
        assert!(resp.is_applied());
        assert_eq!(resp.actual_position, Vec2::new(50.0, -20.0));
        assert_eq!(resp.actual_velocity, Vec2::ZERO);
        let tf = world.get::<&TransformState>(e).unwrap();
        assert_eq!(tf.previous_position(), Vec2::new(50.0, -20.0));
    }

    #[test]
    fn mirror_publishes_after_step() {
        let (mut world, mut physics, level, e) = setup(&[]);
        physics.step(&mut world, &level, DT);
        let snap = physics.transform_snapshot(e).expect("mirror entry");
        let tf = world.get::<&TransformState>(e).unwrap();
        assert_eq!(snap.position, tf.position());
    }

    #[test]
    fn resting_on_platform_stays_grounded() {
        // Scenario: platform directly under the entity.
        let platform = Aabb::new(Vec2::new(-100.0, 8.0), Vec2::new(100.0, 40.0));
        let (mut world, mut physics, level, e) = setup(&[platform]);
        for _ in 0..30 {
            physics.step(&mut world, &level, DT);
        }
        let body = world.get::<&PhysicsBody>(e).unwrap();
        assert!(body.is_grounded);
        assert!(body.velocity.y.abs() < 1.0);
        let tf = world.get::<&TransformState>(e).unwrap();
        assert!((tf.position().y - 0.0).abs() < 1.0, "resting on surface");
    }
}
