//! Save-system interface: a serializable copy of every registered entity's
//! spatial state, captured between ticks and written back before the next
//! tick of integration. Restoration goes through the physics coordinator so
//! the single-writer contract holds even here.

use glam::Vec2;
use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::components::PhysicsBody;
use crate::error::PhysicsError;
use crate::physics::{PhysicsCoordinator, TransformState};
use crate::sim::Simulation;

/// One entity's saved state. Colliders are level/archetype data and are not
/// part of the save.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BodyRecord {
    pub entity: u64,
    pub position: Vec2,
    pub previous_position: Vec2,
    pub body: PhysicsBody,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Records in registration (creation) order.
    pub entries: Vec<BodyRecord>,
}

impl WorldSnapshot {
    pub fn capture(world: &World, physics: &PhysicsCoordinator) -> Self {
        let mut entries = Vec::new();
        for &entity in physics.registry() {
            let Ok(tf) = world.get::<&TransformState>(entity) else { continue };
            let Ok(body) = world.get::<&PhysicsBody>(entity) else { continue };
            entries.push(BodyRecord {
                entity: entity.to_bits().get(),
                position: tf.position(),
                previous_position: tf.previous_position(),
                body: *body,
            });
        }
        Self { entries }
    }

    /// Write the saved state back. Every record must resolve to a live
    /// entity; a stale handle fails the whole restore rather than silently
    /// loading half a world.
    pub fn restore(
        &self,
        world: &mut World,
        physics: &mut PhysicsCoordinator,
    ) -> Result<(), PhysicsError> {
        for record in &self.entries {
            let entity = Entity::from_bits(record.entity)
                .ok_or_else(|| PhysicsError::Snapshot(format!("bad entity bits {}", record.entity)))?;
            physics.restore_entity(
                world,
                entity,
                record.position,
                record.previous_position,
                record.body,
            )?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, PhysicsError> {
        serde_json::to_string_pretty(self).map_err(|e| PhysicsError::Snapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, PhysicsError> {
        serde_json::from_str(json).map_err(|e| PhysicsError::Snapshot(e.to_string()))
    }
}

impl Simulation {
    pub fn save_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(self.world(), self.physics())
    }

    pub fn load_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<(), PhysicsError> {
        let (world, physics) = self.parts_mut();
        snapshot.restore(world, physics)
    }
}
