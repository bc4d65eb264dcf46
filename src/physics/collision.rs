//! Broad + narrow phase collision detection and penetration resolution.
//!
//! Broad phase is an ephemeral uniform grid over dynamic colliders, rebuilt
//! every fixed step and queried by swept bounding box; static tiles come
//! straight from the level's tile-grid range lookup. Narrow phase is
//! AABB-vs-AABB, switching to a swept test for fast movers so high-velocity
//! entities cannot tunnel through thin geometry.
//!
//! Manifolds are produced and consumed within a single resolution pass —
//! nothing here persists across ticks. Grounded state in particular is
//! rebuilt from this pass's manifolds every step, never carried over.

use std::collections::{HashMap, HashSet};

use glam::Vec2;
use hecs::{Entity, World};

use crate::components::{Collider, PhysicsBody};
use crate::level::{Aabb, LevelGeometry};
use crate::physics::raycast::ray_aabb_intersection;
use crate::physics::transform::TransformState;
use crate::physics::clamp_velocity;

/// The other side of a contact.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContactTarget {
    Entity(Entity),
    Static,
}

/// One contact, valid for the current resolution pass only.
/// `normal` is the direction that pushes `entity` out of `other`.
#[derive(Clone, Copy, Debug)]
pub struct CollisionManifold {
    pub entity: Entity,
    pub other: ContactTarget,
    pub normal: Vec2,
    pub penetration: f32,
    pub contact_point: Vec2,
}

/// One-shot contact transitions, emitted per fixed step. `Landed` fires on
/// the airborne→grounded edge (the zero-duration landing tick); audio and
/// animation key off it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContactEvent {
    Landed { entity: Entity, normal: Vec2, impact_speed: f32 },
    LeftGround { entity: Entity },
}

/// Positional correction leaves this much overlap (px) in place. Resting
/// contacts keep producing a manifold every tick, so grounded state stays
/// stable without carrying anything over.
const PENETRATION_SLOP: f32 = 0.1;

struct DynamicEntry {
    entity: Entity,
    position: Vec2,
    previous: Vec2,
    half: Vec2,
    velocity: Vec2,
    inv_mass: f32,
    restitution: f32,
    max_velocity: f32,
}

impl DynamicEntry {
    fn aabb(&self) -> Aabb {
        Aabb::from_center_half(self.position, self.half)
    }

    fn swept_bounds(&self) -> Aabb {
        Aabb::from_center_half(self.previous, self.half).union(&self.aabb())
    }

    fn is_fast(&self) -> bool {
        let travel = self.position - self.previous;
        travel.length_squared() > self.half.min_element().powi(2)
    }
}

pub struct CollisionResolver {
    cell_size: f32,
    rest_velocity: f32,
    ground_normal_threshold: f32,
    // Scratch reused across steps: cell coord -> indices into the entry list.
    grid: HashMap<(i32, i32), Vec<usize>>,
}

impl CollisionResolver {
    pub fn new(cell_size: f32, rest_velocity: f32, ground_normal_threshold: f32) -> Self {
        Self {
            cell_size,
            rest_velocity,
            ground_normal_threshold,
            grid: HashMap::new(),
        }
    }

    /// Detect and resolve all contacts for one fixed step.
    ///
    /// `order` is the coordinator's creation-order registry; iterating it
    /// (rather than the world) keeps resolution deterministic. Positional
    /// correction is distributed inversely by mass — statics are immovable.
    /// The normal velocity component is zeroed below the rest threshold and
    /// reflected by combined restitution above it. Finally, grounded state is
    /// recomputed from scratch and landing/left-ground edges are reported.
    pub fn resolve(
        &mut self,
        world: &mut World,
        level: &LevelGeometry,
        order: &[Entity],
    ) -> Vec<ContactEvent> {
        let mut entries = self.gather(world, order);
        let manifolds = self.detect(level, &entries);
        self.apply(&mut entries, &manifolds);
        self.commit(world, &entries, &manifolds)
    }

    fn gather(&self, world: &World, order: &[Entity]) -> Vec<DynamicEntry> {
        let mut entries = Vec::with_capacity(order.len());
        for &entity in order {
            let tf = match world.get::<&TransformState>(entity) {
                Ok(tf) => *tf,
                Err(_) => continue,
            };
            let collider = match world.get::<&Collider>(entity) {
                Ok(c) => *c,
                Err(_) => continue,
            };
            let body = match world.get::<&PhysicsBody>(entity) {
                Ok(b) => *b,
                Err(_) => continue,
            };
            entries.push(DynamicEntry {
                entity,
                position: tf.position(),
                previous: tf.previous_position(),
                half: collider.half_extents,
                velocity: body.velocity,
                inv_mass: body.inv_mass(),
                restitution: body.restitution,
                max_velocity: body.max_velocity,
            });
        }
        entries
    }

    fn cell_range(&self, bounds: &Aabb) -> (i32, i32, i32, i32) {
        let x0 = (bounds.min.x / self.cell_size).floor() as i32;
        let y0 = (bounds.min.y / self.cell_size).floor() as i32;
        let x1 = (bounds.max.x / self.cell_size).floor() as i32;
        let y1 = (bounds.max.y / self.cell_size).floor() as i32;
        (x0, y0, x1, y1)
    }

    fn detect(&mut self, level: &LevelGeometry, entries: &[DynamicEntry]) -> Vec<CollisionManifold> {
        // Broad phase: bucket every entry by its swept bounding box.
        self.grid.clear();
        for (i, entry) in entries.iter().enumerate() {
            let (x0, y0, x1, y1) = self.cell_range(&entry.swept_bounds());
            for cy in y0..=y1 {
                for cx in x0..=x1 {
                    self.grid.entry((cx, cy)).or_default().push(i);
                }
            }
        }

        let mut manifolds = Vec::new();

        // Dynamic vs static.
        for entry in entries {
            let swept = entry.swept_bounds();
            for static_box in level.statics_overlapping(&swept) {
                if let Some((normal, penetration)) = narrow_static(entry, &static_box) {
                    manifolds.push(CollisionManifold {
                        entity: entry.entity,
                        other: ContactTarget::Static,
                        normal,
                        penetration,
                        contact_point: contact_point(&entry.aabb(), &static_box),
                    });
                }
            }
        }

        // Dynamic vs dynamic, grid candidates, each pair tested once.
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for (i, entry) in entries.iter().enumerate() {
            let (x0, y0, x1, y1) = self.cell_range(&entry.swept_bounds());
            for cy in y0..=y1 {
                for cx in x0..=x1 {
                    let Some(bucket) = self.grid.get(&(cx, cy)) else { continue };
                    for &j in bucket {
                        if j <= i || !seen.insert((i, j)) {
                            continue;
                        }
                        let other = &entries[j];
                        if let Some((normal, penetration)) = narrow_pair(entry, other) {
                            manifolds.push(CollisionManifold {
                                entity: entry.entity,
                                other: ContactTarget::Entity(other.entity),
                                normal,
                                penetration,
                                contact_point: contact_point(&entry.aabb(), &other.aabb()),
                            });
                        }
                    }
                }
            }
        }

        manifolds
    }

    fn apply(&self, entries: &mut [DynamicEntry], manifolds: &[CollisionManifold]) {
        let index: HashMap<Entity, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.entity, i))
            .collect();

        for m in manifolds {
            let Some(&i) = index.get(&m.entity) else { continue };
            match m.other {
                ContactTarget::Static => {
                    let entry = &mut entries[i];
                    let correction = (m.penetration - PENETRATION_SLOP).max(0.0);
                    entry.position += m.normal * correction;
                    let vn = entry.velocity.dot(m.normal);
                    if vn < 0.0 {
                        // Moving into the surface: kill or reflect the normal
                        // component depending on the rest threshold.
                        if -vn < self.rest_velocity {
                            entry.velocity -= vn * m.normal;
                        } else {
                            entry.velocity -= (1.0 + entry.restitution) * vn * m.normal;
                        }
                    }
                }
                ContactTarget::Entity(other) => {
                    let Some(&j) = index.get(&other) else { continue };
                    let inv_sum = entries[i].inv_mass + entries[j].inv_mass;
                    if inv_sum <= 0.0 {
                        continue;
                    }
                    let correction = (m.penetration - PENETRATION_SLOP).max(0.0);
                    let wi = entries[i].inv_mass / inv_sum;
                    let wj = entries[j].inv_mass / inv_sum;
                    entries[i].position += m.normal * (correction * wi);
                    entries[j].position -= m.normal * (correction * wj);

                    let rel = entries[i].velocity - entries[j].velocity;
                    let vn = rel.dot(m.normal);
                    if vn < 0.0 {
                        let e = (entries[i].restitution + entries[j].restitution) * 0.5;
                        let bounce = if -vn < self.rest_velocity { 1.0 } else { 1.0 + e };
                        let impulse = -bounce * vn / inv_sum;
                        let inv_i = entries[i].inv_mass;
                        let inv_j = entries[j].inv_mass;
                        entries[i].velocity += impulse * inv_i * m.normal;
                        entries[j].velocity -= impulse * inv_j * m.normal;
                    }
                }
            }
        }
    }

    /// Write corrected positions/velocities back, recompute grounded state
    /// from this pass's manifolds, and report contact edges.
    fn commit(
        &self,
        world: &mut World,
        entries: &[DynamicEntry],
        manifolds: &[CollisionManifold],
    ) -> Vec<ContactEvent> {
        let mut events = Vec::new();

        for entry in entries {
            // Support normal for this entity across every manifold it appears
            // in — on either side of a pair contact.
            let mut support: Option<Vec2> = None;
            for m in manifolds {
                let normal = if m.entity == entry.entity {
                    Some(m.normal)
                } else if m.other == ContactTarget::Entity(entry.entity) {
                    Some(-m.normal)
                } else {
                    None
                };
                if let Some(n) = normal {
                    if n.y < -self.ground_normal_threshold {
                        support = Some(n);
                        break;
                    }
                }
            }

            if let Ok(mut tf) = world.get::<&mut TransformState>(entry.entity) {
                let delta = entry.position - tf.position();
                if delta != Vec2::ZERO {
                    tf.translate(delta);
                }
            }
            if let Ok(mut body) = world.get::<&mut PhysicsBody>(entry.entity) {
                let was_grounded = body.is_grounded;
                // Impulses can overshoot the cap (a heavy body bouncing a
                // light one); the velocity bound holds here too.
                body.velocity = clamp_velocity(entry.velocity, entry.max_velocity);
                body.is_grounded = support.is_some();
                body.ground_normal = support.unwrap_or(Vec2::ZERO);

                if !was_grounded && body.is_grounded {
                    events.push(ContactEvent::Landed {
                        entity: entry.entity,
                        normal: body.ground_normal,
                        // Speed along the support normal before the response
                        // zeroed it — taken from the pre-resolution velocity.
                        impact_speed: pre_impact_speed(entry, body.ground_normal),
                    });
                } else if was_grounded && !body.is_grounded {
                    events.push(ContactEvent::LeftGround { entity: entry.entity });
                }
            }
        }

        events
    }
}

fn pre_impact_speed(entry: &DynamicEntry, normal: Vec2) -> f32 {
    // `entry.velocity` is already post-response; reconstruct the approach
    // speed from the step's travel instead.
    let travel = entry.position - entry.previous;
    (-travel.dot(normal)).max(0.0)
}

/// Narrow phase against a static box. Fast movers get a swept test from
/// their previous position (Minkowski: ray vs the box inflated by the
/// entity's half extents); everyone else a plain overlap test.
fn narrow_static(entry: &DynamicEntry, static_box: &Aabb) -> Option<(Vec2, f32)> {
    let current = entry.aabb();
    if let Some((normal, depth)) = current.penetration(static_box) {
        return Some((normal, depth));
    }
    if !entry.is_fast() {
        return None;
    }

    // No overlap at the endpoint but the entity moved far — check whether the
    // path crossed the box.
    swept_test(entry.previous, entry.position, entry.half, static_box)
}

/// Narrow phase between two dynamic entries, swept by relative motion when
/// either is fast.
fn narrow_pair(a: &DynamicEntry, b: &DynamicEntry) -> Option<(Vec2, f32)> {
    if let Some((normal, depth)) = a.aabb().penetration(&b.aabb()) {
        return Some((normal, depth));
    }
    if !a.is_fast() && !b.is_fast() {
        return None;
    }
    // Sweep a's relative path against b held at its end position.
    let rel_prev = a.previous - (b.previous - b.position);
    let inflated_half = a.half + b.half;
    swept_test(
        rel_prev,
        a.position,
        Vec2::ZERO,
        &Aabb::from_center_half(b.position, inflated_half),
    )
}

/// Ray the center's travel against `target` inflated by `half`. Returns the
/// push-out normal and the depth needed to move the endpoint back to the
/// contact surface.
fn swept_test(prev: Vec2, current: Vec2, half: Vec2, target: &Aabb) -> Option<(Vec2, f32)> {
    let travel = current - prev;
    let travel_len = travel.length();
    if travel_len <= f32::EPSILON {
        return None;
    }
    let dir = travel / travel_len;
    let inflated = Aabb::new(target.min - half, target.max + half);
    // A start point already inside would report the exit face; the overlap
    // test has that case covered.
    if inflated.overlaps(&Aabb::from_center_half(prev, Vec2::ZERO)) {
        return None;
    }
    let (t, normal) = ray_aabb_intersection(prev, dir, &inflated)?;
    if t < 0.0 || t > travel_len {
        return None;
    }
    // Depth along the normal from the overshot endpoint back to the surface.
    let overshoot = travel_len - t;
    let depth = -(dir * overshoot).dot(normal);
    if depth <= 0.0 {
        return None;
    }
    Some((normal, depth))
}

/// Deepest overlap of `aabb` against any static collider. Used by the
/// movement probe: a request is rejected when its tentative position would
/// deepen this beyond the coordinator's tolerance.
pub fn max_static_penetration(level: &LevelGeometry, aabb: &Aabb) -> f32 {
    level
        .statics_overlapping(aabb)
        .iter()
        .map(|b| aabb.penetration_depth(b))
        .fold(0.0, f32::max)
}

fn contact_point(a: &Aabb, b: &Aabb) -> Vec2 {
    // Center of the overlap region, clamped to b when the boxes only touch.
    let min = a.min.max(b.min);
    let max = a.max.min(b.max);
    (min + max) * 0.5
}
