use std::path::PathBuf;

use clap::Parser;
use glam::Vec2;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aether::{
    Aabb, Collider, ContactEvent, Intent, LevelGeometry, MovementKind, PhysicsBody, Simulation,
    TileGrid, WorldSnapshot,
};

const DT: f32 = 1.0 / 60.0;

#[derive(Parser)]
#[command(name = "aether-sim", about = "Headless Aether physics simulation")]
struct Args {
    /// Number of fixed ticks to simulate
    #[arg(long, default_value_t = 600)]
    ticks: u32,

    /// Write a JSON world snapshot here when done
    #[arg(long)]
    save: Option<PathBuf>,

    /// Restore a JSON world snapshot before the first tick
    #[arg(long)]
    load: Option<PathBuf>,
}

/// A small test chamber: a tile floor, two platforms, and walls at both ends.
fn build_level() -> LevelGeometry {
    let mut grid = TileGrid::new(Vec2::new(-320.0, 0.0), 16.0, 40, 20);
    for x in 0..40 {
        grid.set_solid(x, 19, true); // floor row at y = 304..320
    }
    let mut level = LevelGeometry::with_tile_grid(grid);
    level.push_aabb(Aabb::new(Vec2::new(-320.0, -200.0), Vec2::new(-304.0, 304.0))); // left wall
    level.push_aabb(Aabb::new(Vec2::new(304.0, -200.0), Vec2::new(320.0, 304.0))); // right wall
    level.push_aabb(Aabb::new(Vec2::new(-64.0, 240.0), Vec2::new(64.0, 256.0))); // mid platform
    level
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut sim = Simulation::with_level(build_level());

    let player = sim.spawn(
        Vec2::new(0.0, 280.0),
        PhysicsBody::default(),
        Collider::new(Vec2::new(8.0, 12.0)),
    );
    info!(?player, "spawned player above the floor");

    if let Some(path) = &args.load {
        let snapshot = WorldSnapshot::from_json(&std::fs::read_to_string(path)?)?;
        sim.load_snapshot(&snapshot)?;
        info!(path = %path.display(), "restored snapshot");
    }

    for tick in 0..args.ticks {
        // Scripted input: walk right, jump once a second, turn around mid-run.
        let mut intents = Vec::new();
        let dir = if (tick / 300) % 2 == 0 { 1.0 } else { -1.0 };
        intents.push(Intent {
            entity: player,
            kind: MovementKind::Walk,
            direction: Vec2::new(dir, 0.0),
        });
        if tick % 60 == 30 && sim.query_grounded_state(player) {
            intents.push(Intent {
                entity: player,
                kind: MovementKind::Jump,
                direction: Vec2::ZERO,
            });
        }

        let report = sim.frame(DT, &intents);
        for event in &report.contact_events {
            match event {
                ContactEvent::Landed { entity, impact_speed, .. } => {
                    info!(tick, ?entity, impact_speed, "landed");
                }
                ContactEvent::LeftGround { entity } => {
                    info!(tick, ?entity, "left ground");
                }
            }
        }
        if tick % 60 == 0 {
            if let Some(snap) = sim.transform_snapshot(player) {
                info!(
                    tick,
                    x = snap.position.x,
                    y = snap.position.y,
                    grounded = sim.query_grounded_state(player),
                    "player state"
                );
            }
        }
    }

    if let Some(path) = &args.save {
        std::fs::write(path, sim.save_snapshot().to_json()?)?;
        info!(path = %path.display(), "snapshot written");
    }

    Ok(())
}
