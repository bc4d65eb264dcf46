use hecs::Entity;
use thiserror::Error;

/// API-level failures. Blocked/Deferred movement outcomes are *not* errors —
/// they travel in [`crate::protocol::MovementResponse`].
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// Entity exists but has no physics participation (no `PhysicsBody`).
    #[error("entity {0:?} has no physics body")]
    MissingBody(Entity),

    /// Entity handle is stale or was never registered with the simulation.
    #[error("unknown entity {0:?}")]
    UnknownEntity(Entity),

    /// Snapshot could not be encoded/decoded or referenced a dead entity.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}
