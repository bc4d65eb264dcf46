//! Aether physics-movement coordination core.
//!
//! Turns controller movement intents into authoritative spatial state for a
//! 2D platformer: fixed-timestep integration, collision detection and
//! resolution against static level geometry and dynamic entities, grounded
//! tracking, a request/response movement protocol with retry-and-fallback,
//! and a guard against accumulated numerical drift.
//!
//! The [`sim::Simulation`] type is the entry point: it owns the ECS world and
//! runs the fixed-priority phases each frame. Rendering, audio, input
//! polling and level loading are external collaborators — they consume the
//! read-only queries and feed intents/geometry in.

pub mod components;
pub mod error;
pub mod level;
pub mod movement;
pub mod physics;
pub mod protocol;
pub mod sim;
pub mod snapshot;

pub use components::{Collider, PhysicsBody};
pub use error::PhysicsError;
pub use level::{Aabb, LevelGeometry, TileGrid};
pub use movement::{AccumulationGuard, GuardConfig, MovementConfig, MovementCoordinator, MovementPolicy, ThrottleDecision};
pub use physics::{ContactEvent, PhysicsConfig, PhysicsCoordinator, RayTarget, RaycastHit, TransformSnapshot};
pub use protocol::{MovementKind, MovementRequest, MovementResponse, MovementStatus};
pub use sim::{FrameReport, Intent, Phase, Simulation};
pub use snapshot::WorldSnapshot;
