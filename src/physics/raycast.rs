use glam::Vec2;
use hecs::{Entity, World};

use crate::components::Collider;
use crate::level::{Aabb, LevelGeometry};
use crate::physics::transform::TransformState;

/// What a ray hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RayTarget {
    Entity(Entity),
    Static,
}

#[derive(Clone, Copy, Debug)]
pub struct RaycastHit {
    pub target: RayTarget,
    pub distance: f32,
    pub point: Vec2,
    pub normal: Vec2,
}

/// Cast a ray against static geometry and every dynamic collider, returning
/// the nearest hit within `max_distance`. Usable by any collaborator — this
/// is a read-only query (ledge probes, line-of-sight, ground sensors).
pub fn raycast(
    world: &World,
    level: &LevelGeometry,
    origin: Vec2,
    direction: Vec2,
    max_distance: f32,
) -> Option<RaycastHit> {
    let dir = direction.normalize_or_zero();
    if dir == Vec2::ZERO || max_distance <= 0.0 {
        return None;
    }

    let mut best: Option<RaycastHit> = None;

    // Static geometry: restrict the tile lookup to the ray's bounding box.
    let end = origin + dir * max_distance;
    let ray_bounds = Aabb::new(origin.min(end), origin.max(end));
    for aabb in level.statics_overlapping(&ray_bounds) {
        if let Some((t, normal)) = ray_aabb_intersection(origin, dir, &aabb) {
            if t <= max_distance && best.as_ref().map_or(true, |b| t < b.distance) {
                best = Some(RaycastHit {
                    target: RayTarget::Static,
                    distance: t,
                    point: origin + dir * t,
                    normal,
                });
            }
        }
    }

    for (entity, (tf, collider)) in world.query::<(&TransformState, &Collider)>().iter() {
        let aabb = collider.aabb_at(tf.position());
        if let Some((t, normal)) = ray_aabb_intersection(origin, dir, &aabb) {
            if t <= max_distance && best.as_ref().map_or(true, |b| t < b.distance) {
                best = Some(RaycastHit {
                    target: RayTarget::Entity(entity),
                    distance: t,
                    point: origin + dir * t,
                    normal,
                });
            }
        }
    }

    best
}

/// Slab test. Returns the entry distance and surface normal, or `None` on a
/// miss. A ray starting inside the box reports the exit point. Shared with
/// the resolver's swept narrow phase.
pub(in crate::physics) fn ray_aabb_intersection(
    origin: Vec2,
    dir: Vec2,
    aabb: &Aabb,
) -> Option<(f32, Vec2)> {
    let inv_x = if dir.x != 0.0 { 1.0 / dir.x } else { f32::INFINITY };
    let inv_y = if dir.y != 0.0 { 1.0 / dir.y } else { f32::INFINITY };

    let tx1 = (aabb.min.x - origin.x) * inv_x;
    let tx2 = (aabb.max.x - origin.x) * inv_x;
    let ty1 = (aabb.min.y - origin.y) * inv_y;
    let ty2 = (aabb.max.y - origin.y) * inv_y;

    let tmin_x = tx1.min(tx2);
    let tmin_y = ty1.min(ty2);
    let tmin = tmin_x.max(tmin_y);
    let tmax = tx1.max(tx2).min(ty1.max(ty2));

    if tmax < 0.0 || tmin > tmax {
        return None;
    }

    let t = if tmin < 0.0 { tmax } else { tmin };
    // Normal comes from the axis that produced the entry time.
    let normal = if tmin_x > tmin_y {
        Vec2::new(-dir.x.signum(), 0.0)
    } else {
        Vec2::new(0.0, -dir.y.signum())
    };
    Some((t, normal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::TileGrid;

    fn floor_level() -> LevelGeometry {
        // Solid floor row at y = [100, 120].
        let mut level = LevelGeometry::empty();
        level.push_aabb(Aabb::new(Vec2::new(-200.0, 100.0), Vec2::new(200.0, 120.0)));
        level
    }

    #[test]
    fn ray_down_hits_floor() {
        let world = World::new();
        let level = floor_level();
        // y-down: "down" is +y.
        let hit = raycast(&world, &level, Vec2::new(0.0, 0.0), Vec2::new(0.0, 1.0), 500.0)
            .expect("floor hit");
        assert_eq!(hit.target, RayTarget::Static);
        assert!((hit.distance - 100.0).abs() < 1e-4);
        assert_eq!(hit.normal, Vec2::new(0.0, -1.0));
    }

    #[test]
    fn ray_misses_beyond_max_distance() {
        let world = World::new();
        let level = floor_level();
        assert!(raycast(&world, &level, Vec2::ZERO, Vec2::new(0.0, 1.0), 50.0).is_none());
    }

    #[test]
    fn nearest_hit_wins() {
        let world = World::new();
        let mut level = floor_level();
        // A nearer box in the ray's path.
        level.push_aabb(Aabb::new(Vec2::new(-5.0, 40.0), Vec2::new(5.0, 60.0)));
        let hit = raycast(&world, &level, Vec2::ZERO, Vec2::new(0.0, 1.0), 500.0).unwrap();
        assert!((hit.distance - 40.0).abs() < 1e-4);
    }

    #[test]
    fn tile_grid_is_hittable() {
        let world = World::new();
        let mut grid = TileGrid::new(Vec2::ZERO, 16.0, 8, 8);
        grid.set_solid(4, 4, true); // tile spans (64,64)..(80,80)
        let level = LevelGeometry::with_tile_grid(grid);
        let hit = raycast(&world, &level, Vec2::new(72.0, 0.0), Vec2::new(0.0, 1.0), 100.0)
            .expect("tile hit");
        assert!((hit.distance - 64.0).abs() < 1e-4);
    }
}
