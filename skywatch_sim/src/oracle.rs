//! Ground truth generator for simulation.
//!
//! The Oracle builds the world the fleet does not know yet:
//! - Procedural terrain (forests, lakes, meandering rivers)
//! - Base placement
//! - Hazard seeding with minimum spacing

use crate::world::{BasePlacement, Compass};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use skywatch_env::{EnvError, HazardKind, Position, RasterTerrain, Severity, Terrain};
use tracing::{debug, warn};

/// Rejection-sampling attempts per hazard before giving up.
const MAX_PLACEMENT_ATTEMPTS: usize = 1000;

/// A hazard to place at mission start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardSeed {
    pub position: Position,
    pub severity: Severity,
    pub radius: f64,
    pub strength: f64,
    pub kind: HazardKind,
}

impl HazardSeed {
    pub fn new(x: f64, y: f64, severity: Severity, kind: HazardKind) -> Self {
        Self {
            position: Position::new(x, y),
            severity,
            radius: 5.0,
            strength: 0.8,
            kind,
        }
    }
}

/// Seeded ground truth generator.
pub struct Oracle {
    terrain_rng: ChaCha8Rng,
    hazard_rng: ChaCha8Rng,
}

/// `[lo, hi)` clamped to a usable range inside `0..len`.
fn center_range(len: usize, margin: usize) -> (i32, i32) {
    if len > 2 * margin + 1 {
        (margin as i32, (len - margin) as i32)
    } else {
        (0, len.max(1) as i32)
    }
}

impl Oracle {
    /// Creates an oracle with independent terrain and hazard streams.
    pub fn new(terrain_seed: u64, hazard_seed: u64) -> Self {
        Self {
            terrain_rng: ChaCha8Rng::seed_from_u64(terrain_seed),
            hazard_rng: ChaCha8Rng::seed_from_u64(hazard_seed),
        }
    }

    /// Plains with 3-5 forests, then 2-3 lakes, then 1-2 rivers on top.
    pub fn generate_terrain(&mut self, width: usize, height: usize) -> RasterTerrain {
        let mut raster = RasterTerrain::new(width, height);
        let rng = &mut self.terrain_rng;

        let forests = rng.gen_range(3..6);
        for _ in 0..forests {
            let (x0, x1) = center_range(width, 10);
            let (y0, y1) = center_range(height, 10);
            let cx = rng.gen_range(x0..x1);
            let cy = rng.gen_range(y0..y1);
            let radius: f64 = rng.gen_range(8.0..15.0);
            let reach = radius.ceil() as i32;
            for y in (cy - reach)..=(cy + reach) {
                for x in (cx - reach)..=(cx + reach) {
                    let dist = (((x - cx).pow(2) + (y - cy).pow(2)) as f64).sqrt();
                    if dist >= radius {
                        continue;
                    }
                    // Density thins out towards the edge
                    let density = (1.0 - dist / radius) * 0.8;
                    if rng.gen::<f64>() < density {
                        let _ = raster.set(x, y, Terrain::Forest);
                    }
                }
            }
        }

        let lakes = rng.gen_range(2..4);
        for _ in 0..lakes {
            let (x0, x1) = center_range(width, 15);
            let (y0, y1) = center_range(height, 15);
            let cx = rng.gen_range(x0..x1);
            let cy = rng.gen_range(y0..y1);
            let radius: f64 = rng.gen_range(5.0..10.0);
            let reach = radius.ceil() as i32;
            for y in (cy - reach)..=(cy + reach) {
                for x in (cx - reach)..=(cx + reach) {
                    if ((((x - cx).pow(2) + (y - cy).pow(2)) as f64).sqrt()) < radius {
                        let _ = raster.set(x, y, Terrain::Lake);
                    }
                }
            }
        }

        let rivers = rng.gen_range(1..3);
        for _ in 0..rivers {
            let (mut pos, mut heading) = if rng.gen_bool(0.5) {
                let y = rng.gen_range(0..height.max(1)) as f64;
                (Vector2::new(0.0, y), rng.gen_range(0.0..std::f64::consts::FRAC_PI_2))
            } else {
                let x = rng.gen_range(0..width.max(1)) as f64;
                (
                    Vector2::new(x, 0.0),
                    rng.gen_range(std::f64::consts::FRAC_PI_4..3.0 * std::f64::consts::FRAC_PI_4),
                )
            };
            let length = rng.gen_range(40..80);
            for _ in 0..length {
                let (rx, ry) = (pos.x as i32, pos.y as i32);
                // Clipped at the map edge
                for dy in -2..=2 {
                    for dx in -2..=2 {
                        let _ = raster.set(rx + dx, ry + dy, Terrain::River);
                    }
                }
                heading += rng.gen_range(-0.3..0.3);
                pos += Vector2::new(heading.cos(), heading.sin()) * 1.5;
                if pos.x < 0.0 || pos.y < 0.0 || pos.x >= width as f64 || pos.y >= height as f64 {
                    break;
                }
            }
        }

        debug!(
            forest = raster.count(Terrain::Forest),
            lake = raster.count(Terrain::Lake),
            river = raster.count(Terrain::River),
            "Terrain generated"
        );
        raster
    }

    /// Resolves a base placement to a position inside the map.
    pub fn place_base(&mut self, placement: &BasePlacement, width: usize, height: usize) -> Result<Position, EnvError> {
        let (w, h) = (width as f64, height as f64);
        let pos = match placement {
            BasePlacement::Fixed { x, y } => Position::new(*x, *y),
            BasePlacement::Anchor(compass) => {
                let (fx, fy) = match compass {
                    Compass::N => (0.5, 0.95),
                    Compass::S => (0.5, 0.05),
                    Compass::E => (0.95, 0.5),
                    Compass::W => (0.05, 0.5),
                    Compass::NE => (0.9, 0.9),
                    Compass::NW => (0.1, 0.9),
                    Compass::SE => (0.9, 0.1),
                    Compass::SW => (0.1, 0.1),
                };
                Position::new((w * fx).floor(), (h * fy).floor())
            }
            BasePlacement::Random => {
                let x = Uniform::new(0.1 * w, 0.9 * w).sample(&mut self.hazard_rng);
                let y = Uniform::new(0.1 * h, 0.9 * h).sample(&mut self.hazard_rng);
                Position::new(x.floor(), y.floor())
            }
        };
        if !(pos.x >= 0.0 && pos.y >= 0.0 && pos.x < w && pos.y < h) {
            return Err(EnvError::OutOfBounds {
                x: pos.x as i64,
                y: pos.y as i64,
            });
        }
        Ok(pos)
    }

    /// Scatters `count` hazards at least `min_spacing` apart and at least
    /// `min_from_base` from the base. May return fewer when the map is too
    /// crowded.
    pub fn seed_hazards(
        &mut self,
        count: usize,
        width: usize,
        height: usize,
        base: &Position,
        min_spacing: f64,
        min_from_base: f64,
    ) -> Vec<HazardSeed> {
        let rng = &mut self.hazard_rng;
        let xs = Uniform::new(0.0, width as f64);
        let ys = Uniform::new(0.0, height as f64);
        let radii = Uniform::new(3.0, 8.0);
        let strengths = Uniform::new(0.6, 1.0);
        let kinds = HazardKind::all();

        let mut seeds: Vec<HazardSeed> = Vec::with_capacity(count);
        'outer: for _ in 0..count {
            for _ in 0..MAX_PLACEMENT_ATTEMPTS {
                let pos = Position::new(xs.sample(rng), ys.sample(rng));
                if (pos - *base).norm() < min_from_base {
                    continue;
                }
                if seeds.iter().any(|s| (s.position - pos).norm() < min_spacing) {
                    continue;
                }
                let severity = if rng.gen_bool(0.5) { Severity::High } else { Severity::Low };
                seeds.push(HazardSeed {
                    position: pos,
                    severity,
                    radius: radii.sample(rng),
                    strength: strengths.sample(rng),
                    kind: kinds[rng.gen_range(0..kinds.len())],
                });
                continue 'outer;
            }
            warn!(placed = seeds.len(), requested = count, "Hazard placement gave up");
            break;
        }
        seeds
    }
}
