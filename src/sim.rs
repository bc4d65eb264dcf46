//! Single-threaded, cooperative, fixed-priority per-frame scheduler.
//!
//! Each frame runs ordered phases: Input(100) → Movement(90) → Physics(80) →
//! Collision(70). Calls are synchronous and non-reentrant — later phases
//! observe only the committed results of earlier ones, and there is no
//! suspension point mid-phase. "Deferral" means literally queuing a request
//! object for the start of the next tick's Movement phase.
//!
//! The Input phase is the caller: controllers hand their per-frame [`Intent`]s
//! to [`Simulation::frame`], which runs everything downstream.

use glam::Vec2;
use hecs::{Entity, World};
use tracing::{error, info};

use crate::components::{Collider, PhysicsBody};
use crate::error::PhysicsError;
use crate::level::LevelGeometry;
use crate::movement::{AccumulationGuard, GuardConfig, MovementConfig, MovementCoordinator};
use crate::physics::{ContactEvent, PhysicsConfig, PhysicsCoordinator, RaycastHit, TransformSnapshot};
use crate::protocol::{MovementKind, MovementResponse};

/// The ordered execution phases of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Input,
    Movement,
    Physics,
    Collision,
}

impl Phase {
    pub const ORDER: [Phase; 4] = [Phase::Input, Phase::Movement, Phase::Physics, Phase::Collision];

    pub fn priority(self) -> u8 {
        match self {
            Phase::Input => 100,
            Phase::Movement => 90,
            Phase::Physics => 80,
            Phase::Collision => 70,
        }
    }
}

/// One controller intent for this frame, consumed by the Movement phase.
#[derive(Clone, Copy, Debug)]
pub struct Intent {
    pub entity: Entity,
    pub kind: MovementKind,
    pub direction: Vec2,
}

/// Everything a frame produced, handed back to the caller.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Responses in processing order: drained deferrals first, then this
    /// frame's intents.
    pub responses: Vec<(Entity, MovementResponse)>,
    /// Landing / left-ground edges from every fixed step that ran.
    pub contact_events: Vec<ContactEvent>,
    /// Render interpolation factor into the next fixed step.
    pub alpha: f32,
}

/// The authoritative simulation instance: owns the world, the level geometry,
/// both coordinators and the guard, and the simulation clock.
pub struct Simulation {
    world: World,
    level: LevelGeometry,
    physics: PhysicsCoordinator,
    movement: MovementCoordinator,
    guard: AccumulationGuard,
    clock: f64,
}

impl Simulation {
    pub fn new(
        level: LevelGeometry,
        physics_config: PhysicsConfig,
        movement_config: MovementConfig,
        guard_config: GuardConfig,
    ) -> Self {
        Self {
            world: World::new(),
            level,
            physics: PhysicsCoordinator::new(physics_config),
            movement: MovementCoordinator::new(movement_config),
            guard: AccumulationGuard::new(guard_config),
            clock: 0.0,
        }
    }

    pub fn with_level(level: LevelGeometry) -> Self {
        Self::new(
            level,
            PhysicsConfig::default(),
            MovementConfig::default(),
            GuardConfig::default(),
        )
    }

    /// Simulation-clock seconds since start.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn level(&self) -> &LevelGeometry {
        &self.level
    }

    pub fn physics(&self) -> &PhysicsCoordinator {
        &self.physics
    }

    /// Spawn a physics-enabled entity. Spawn order is integration order.
    pub fn spawn(&mut self, position: Vec2, body: PhysicsBody, collider: Collider) -> Entity {
        let entity = self.world.spawn(());
        // Registration on a freshly spawned entity cannot fail.
        if let Err(err) = self
            .physics
            .register(&mut self.world, entity, position, body, collider)
        {
            error!(?entity, %err, "registration failed for a fresh entity");
        }
        entity
    }

    /// Remove an entity mid-simulation: it is excluded from every subsequent
    /// phase this tick, and all of its queued/deferred requests are purged.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), PhysicsError> {
        if !self.world.contains(entity) {
            return Err(PhysicsError::UnknownEntity(entity));
        }
        self.movement.cancel_pending_request(entity);
        self.guard.forget(entity);
        self.physics.deregister(&mut self.world, entity);
        self.world
            .despawn(entity)
            .map_err(|_| PhysicsError::UnknownEntity(entity))?;
        info!(?entity, "despawned");
        Ok(())
    }

    /// Run one frame: drain deferrals, process this frame's intents, then
    /// consume `dt` in fixed physics steps.
    pub fn frame(&mut self, dt: f32, intents: &[Intent]) -> FrameReport {
        self.clock += dt as f64;

        // Movement phase — deferred queue first, exactly once, then intents.
        let mut responses = self.movement.drain_deferred(
            &mut self.world,
            &self.level,
            &mut self.physics,
            &mut self.guard,
            self.clock,
        );
        for intent in intents {
            if !self.physics.is_registered(intent.entity) {
                // Despawned after the intent was generated; skip silently —
                // the controller is already gone.
                continue;
            }
            let response = self.movement.handle_movement_input(
                &mut self.world,
                &self.level,
                &mut self.physics,
                &mut self.guard,
                intent.entity,
                intent.direction,
                intent.kind,
                self.clock,
            );
            responses.push((intent.entity, response));
        }

        // Physics + Collision phases, fixed-step.
        let contact_events = self.physics.step(&mut self.world, &self.level, dt);

        // Feed the guard's drift detector with this frame's observations.
        let landed: Vec<Entity> = contact_events
            .iter()
            .filter_map(|ev| match ev {
                ContactEvent::Landed { entity, .. } => Some(*entity),
                ContactEvent::LeftGround { .. } => None,
            })
            .collect();
        for &entity in self.physics.registry() {
            if let Ok(body) = self.world.get::<&PhysicsBody>(entity) {
                let supported = body.is_grounded || landed.contains(&entity);
                let speed = body.velocity.length();
                drop(body);
                self.guard.note_tick(entity, speed, supported);
            }
        }

        FrameReport {
            responses,
            contact_events,
            alpha: self.physics.alpha(),
        }
    }

    /// Queue a jump to fire on landing (jump buffer).
    pub fn buffer_jump(&mut self, entity: Entity) {
        self.movement.buffer_jump(entity, self.clock);
    }

    // Read-only queries, exposed for render/animation/audio collaborators.

    pub fn transform_snapshot(&self, entity: Entity) -> Option<TransformSnapshot> {
        self.physics.transform_snapshot(entity)
    }

    pub fn query_grounded_state(&self, entity: Entity) -> bool {
        self.physics.query_grounded_state(&self.world, entity)
    }

    pub fn raycast(&self, origin: Vec2, direction: Vec2, max_distance: f32) -> Option<RaycastHit> {
        self.physics
            .raycast(&self.world, &self.level, origin, direction, max_distance)
    }

    /// Snapshot/restore plumbing for the save system.
    pub(crate) fn parts_mut(&mut self) -> (&mut World, &mut PhysicsCoordinator) {
        (&mut self.world, &mut self.physics)
    }
}
