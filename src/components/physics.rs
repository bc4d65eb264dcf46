use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Physics participation for an entity. Created when the entity registers
/// with the physics coordinator, destroyed on despawn.
///
/// Fields are only written during the Physics and Collision phases;
/// everything else reads. `is_grounded` and `ground_normal` are rebuilt from
/// scratch every tick from that tick's contact manifolds — they are never
/// carried over stale, which is the deliberate fix for the progressive
/// slowdown caused by leaked grounded state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PhysicsBody {
    /// Linear velocity in px/s, world space.
    pub velocity: Vec2,
    /// Mass in arbitrary units; collision correction splits inversely by mass.
    pub mass: f32,
    /// Ground friction coefficient. Applied as vel.x *= (1 - friction * dt)
    /// while grounded. 0.0 = ice.
    pub friction: f32,
    /// Restitution (bounciness). 0.0 = dead stop, 1.0 = perfect bounce.
    pub restitution: f32,
    /// Hard cap on |velocity|, enforced every integration step.
    pub max_velocity: f32,
    /// Multiplier on world gravity. 0.0 opts out (floating platforms, pickups).
    pub gravity_scale: f32,
    /// Supporting contact exists this tick. Recomputed every tick.
    pub is_grounded: bool,
    /// Normal of the qualifying support contact (push-out direction, so
    /// roughly (0, -1) when standing on flat ground in y-down space).
    pub ground_normal: Vec2,
}

impl Default for PhysicsBody {
    fn default() -> Self {
        Self {
            velocity: Vec2::ZERO,
            mass: 1.0,
            friction: 8.0,
            restitution: 0.0,
            max_velocity: 900.0,
            gravity_scale: 1.0,
            is_grounded: false,
            ground_normal: Vec2::ZERO,
        }
    }
}

impl PhysicsBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_max_velocity(mut self, max_velocity: f32) -> Self {
        self.max_velocity = max_velocity;
        self
    }

    pub fn with_gravity_scale(mut self, gravity_scale: f32) -> Self {
        self.gravity_scale = gravity_scale;
        self
    }

    /// Inverse mass for correction weighting.
    pub fn inv_mass(&self) -> f32 {
        if self.mass > 0.0 { 1.0 / self.mass } else { 0.0 }
    }
}

/// AABB collision shape attached to an entity.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Collider {
    pub half_extents: Vec2,
}

impl Collider {
    pub fn new(half_extents: Vec2) -> Self {
        Self { half_extents }
    }

    pub fn aabb_at(&self, center: Vec2) -> crate::level::Aabb {
        crate::level::Aabb::from_center_half(center, self.half_extents)
    }
}
