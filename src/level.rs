//! Static collision geometry, supplied whole at level-load time and
//! immutable during play. The loader that produces it (tile parsing, file
//! formats) lives outside this crate; the resolver only ever reads it.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in world space (y-down, pixel units).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_center_half(center: Vec2, half: Vec2) -> Self {
        Self { min: center - half, max: center + half }
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec2 {
        (self.max - self.min) * 0.5
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    /// Smallest box containing both — used for swept broad-phase bounds.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Overlap depth of `self` against `other` on the axis of least
    /// penetration. Returns `(normal, depth)` where `normal` is the direction
    /// that pushes `self` out of `other`. `None` when the boxes are separated.
    pub fn penetration(&self, other: &Aabb) -> Option<(Vec2, f32)> {
        let dx1 = self.max.x - other.min.x; // push self left (-x)
        let dx2 = other.max.x - self.min.x; // push self right (+x)
        let dy1 = self.max.y - other.min.y; // push self up (-y, y-down)
        let dy2 = other.max.y - self.min.y; // push self down (+y)
        if dx1 <= 0.0 || dx2 <= 0.0 || dy1 <= 0.0 || dy2 <= 0.0 {
            return None;
        }
        let (nx, depth_x) = if dx1 < dx2 { (-1.0, dx1) } else { (1.0, dx2) };
        let (ny, depth_y) = if dy1 < dy2 { (-1.0, dy1) } else { (1.0, dy2) };
        if depth_x < depth_y {
            Some((Vec2::new(nx, 0.0), depth_x))
        } else {
            Some((Vec2::new(0.0, ny), depth_y))
        }
    }

    /// Depth of overlap with `other`, ignoring direction. 0.0 when separated.
    pub fn penetration_depth(&self, other: &Aabb) -> f32 {
        self.penetration(other).map_or(0.0, |(_, d)| d)
    }
}

/// Uniform grid of solid tiles. Cells are square; `solids` is row-major.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileGrid {
    origin: Vec2,
    cell_size: f32,
    width: usize,
    height: usize,
    solids: Vec<bool>,
}

impl TileGrid {
    pub fn new(origin: Vec2, cell_size: f32, width: usize, height: usize) -> Self {
        Self {
            origin,
            cell_size,
            width,
            height,
            solids: vec![false; width * height],
        }
    }

    pub fn set_solid(&mut self, x: usize, y: usize, solid: bool) {
        if x < self.width && y < self.height {
            self.solids[y * self.width + x] = solid;
        }
    }

    pub fn is_solid(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.solids[y * self.width + x]
    }

    pub fn tile_aabb(&self, x: usize, y: usize) -> Aabb {
        let min = self.origin + Vec2::new(x as f32, y as f32) * self.cell_size;
        Aabb::new(min, min + Vec2::splat(self.cell_size))
    }

    /// World-space AABBs of every solid tile the query box touches.
    pub fn solid_tiles_overlapping(&self, query: &Aabb) -> Vec<Aabb> {
        let lo = (query.min - self.origin) / self.cell_size;
        let hi = (query.max - self.origin) / self.cell_size;
        let x0 = lo.x.floor().max(0.0) as usize;
        let y0 = lo.y.floor().max(0.0) as usize;
        let x1 = (hi.x.ceil() as isize).clamp(0, self.width as isize) as usize;
        let y1 = (hi.y.ceil() as isize).clamp(0, self.height as isize) as usize;

        let mut out = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                if self.is_solid(x, y) {
                    out.push(self.tile_aabb(x, y));
                }
            }
        }
        out
    }
}

/// Everything static the resolver can collide against: an optional tile grid
/// plus free-standing boxes (platforms, level bounds, props).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LevelGeometry {
    pub tile_grid: Option<TileGrid>,
    pub aabbs: Vec<Aabb>,
}

impl LevelGeometry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_tile_grid(grid: TileGrid) -> Self {
        Self { tile_grid: Some(grid), aabbs: Vec::new() }
    }

    pub fn push_aabb(&mut self, aabb: Aabb) {
        self.aabbs.push(aabb);
    }

    /// All static boxes a swept query region could touch this tick.
    pub fn statics_overlapping(&self, query: &Aabb) -> Vec<Aabb> {
        let mut out = match &self.tile_grid {
            Some(grid) => grid.solid_tiles_overlapping(query),
            None => Vec::new(),
        };
        out.extend(self.aabbs.iter().filter(|b| b.overlaps(query)).copied());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penetration_picks_least_axis() {
        // Box barely overlapping from the left: shallow on x, deep on y.
        let a = Aabb::from_center_half(Vec2::new(-9.0, 0.0), Vec2::splat(10.0));
        let b = Aabb::from_center_half(Vec2::new(10.0, 0.0), Vec2::splat(10.0));
        let (normal, depth) = a.penetration(&b).unwrap();
        assert_eq!(normal, Vec2::new(-1.0, 0.0));
        assert!((depth - 1.0).abs() < 1e-5);
    }

    #[test]
    fn penetration_none_when_separated() {
        let a = Aabb::from_center_half(Vec2::ZERO, Vec2::splat(1.0));
        let b = Aabb::from_center_half(Vec2::new(5.0, 0.0), Vec2::splat(1.0));
        assert!(a.penetration(&b).is_none());
        assert_eq!(a.penetration_depth(&b), 0.0);
    }

    #[test]
    fn floor_contact_pushes_up() {
        // y-down: floor below the entity, so the push-out normal is -y.
        let body = Aabb::from_center_half(Vec2::new(0.0, 99.5), Vec2::splat(8.0));
        let floor = Aabb::new(Vec2::new(-100.0, 100.0), Vec2::new(100.0, 120.0));
        let (normal, depth) = body.penetration(&floor).unwrap();
        assert_eq!(normal, Vec2::new(0.0, -1.0));
        assert!((depth - 7.5).abs() < 1e-4);
    }

    #[test]
    fn tile_grid_range_query() {
        let mut grid = TileGrid::new(Vec2::ZERO, 16.0, 8, 8);
        grid.set_solid(2, 3, true);
        grid.set_solid(3, 3, true);
        grid.set_solid(7, 7, true);

        let query = Aabb::new(Vec2::new(30.0, 50.0), Vec2::new(60.0, 60.0));
        let tiles = grid.solid_tiles_overlapping(&query);
        assert_eq!(tiles.len(), 2);

        // Far-away query sees nothing.
        let query = Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0));
        assert!(grid.solid_tiles_overlapping(&query).is_empty());
    }

    #[test]
    fn level_combines_tiles_and_free_boxes() {
        let mut grid = TileGrid::new(Vec2::ZERO, 16.0, 4, 4);
        grid.set_solid(0, 0, true);
        let mut level = LevelGeometry::with_tile_grid(grid);
        level.push_aabb(Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(8.0, 8.0)));

        let query = Aabb::new(Vec2::new(-1.0, -1.0), Vec2::new(4.0, 4.0));
        assert_eq!(level.statics_overlapping(&query).len(), 2);
    }
}
