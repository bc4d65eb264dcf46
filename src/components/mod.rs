mod physics;

pub use physics::{Collider, PhysicsBody};
