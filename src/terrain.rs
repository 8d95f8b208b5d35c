//! Terrain subsystem: the `TerrainSource` trait and `ProceduralTerrain`,
//! a pure (seed, coordinate) → tile function.
//!
//! Nothing here holds mutable state. Two peers with the same seed always
//! agree on every tile, so only deviations from this function ever travel
//! over the wire.

use crate::rng::{hash2, salted, unit_f64};
use crate::tile::TileId;
use crate::types::Coord;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Anything that can answer "what is the untouched tile at this coordinate".
pub trait TerrainSource: Send + Sync {
    /// Full procedural tile, sub-features included.
    fn tile_at(&self, c: Coord) -> TileId;

    /// Biome band tile with sub-features stripped. Destroyed tiles and removed
    /// structures restore to this.
    fn ground_at(&self, c: Coord) -> TileId;

    fn seed(&self) -> u64;
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

const ELEVATION_SCALE: f64 = 1.0 / 64.0;
const ELEVATION_OCTAVES: u32 = 4;
const PERSISTENCE: f64 = 0.5;
const LACUNARITY: f64 = 2.0;

const DEEP_WATER_BELOW: f64 = 0.30;
const WATER_BELOW: f64 = 0.40;
const SAND_BELOW: f64 = 0.45;
const GRASS_BELOW: f64 = 0.72;

const FOREST_SCALE: f64 = 1.0 / 24.0;
const FOREST_DENSITY_MIN: f64 = 0.55;
const OUTCROP_CHANCE: f64 = 0.015;
const ORE_SCALE: f64 = 1.0 / 12.0;
const ORE_VEIN_MIN: f64 = 0.68;

// Salts keep each feature channel decorrelated from elevation banding.
const SALT_ELEVATION: u64 = 0x01;
const SALT_FOREST: u64 = 0x7e3;
const SALT_TREE_JITTER: u64 = 0x7e4;
const SALT_OUTCROP: u64 = 0x40c;
const SALT_ORE: u64 = 0x0e5;
const SALT_ORE_JITTER: u64 = 0x0e6;

// ---------------------------------------------------------------------------
// Procedural terrain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProceduralTerrain {
    seed: u64,
}

impl ProceduralTerrain {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Normalised elevation in `[0, 1)`.
    pub fn elevation_at(&self, c: Coord) -> f64 {
        fbm(
            salted(self.seed, SALT_ELEVATION),
            c.x as f64 * ELEVATION_SCALE,
            c.y as f64 * ELEVATION_SCALE,
            ELEVATION_OCTAVES,
        )
    }

    fn band(elevation: f64) -> TileId {
        if elevation < DEEP_WATER_BELOW {
            TileId::DeepWater
        } else if elevation < WATER_BELOW {
            TileId::Water
        } else if elevation < SAND_BELOW {
            TileId::Sand
        } else if elevation < GRASS_BELOW {
            TileId::Grass
        } else {
            TileId::Mountain
        }
    }

    fn feature(&self, c: Coord, ground: TileId) -> Option<TileId> {
        let (x, y) = (c.x as i64, c.y as i64);
        match ground {
            TileId::Grass => {
                let density = fbm(
                    salted(self.seed, SALT_FOREST),
                    c.x as f64 * FOREST_SCALE,
                    c.y as f64 * FOREST_SCALE,
                    2,
                );
                let jitter = unit_f64(hash2(salted(self.seed, SALT_TREE_JITTER), x, y));
                if density > FOREST_DENSITY_MIN
                    && jitter < (density - FOREST_DENSITY_MIN) * 2.5
                {
                    return Some(TileId::Tree);
                }
                self.outcrop(x, y)
            }
            TileId::Sand => self.outcrop(x, y),
            TileId::Mountain => {
                let vein = fbm(
                    salted(self.seed, SALT_ORE),
                    c.x as f64 * ORE_SCALE,
                    c.y as f64 * ORE_SCALE,
                    2,
                );
                let jitter = unit_f64(hash2(salted(self.seed, SALT_ORE_JITTER), x, y));
                (vein > ORE_VEIN_MIN && jitter < 0.35).then_some(TileId::Ore)
            }
            _ => None,
        }
    }

    fn outcrop(&self, x: i64, y: i64) -> Option<TileId> {
        (unit_f64(hash2(salted(self.seed, SALT_OUTCROP), x, y)) < OUTCROP_CHANCE)
            .then_some(TileId::Rock)
    }
}

impl TerrainSource for ProceduralTerrain {
    fn tile_at(&self, c: Coord) -> TileId {
        let ground = self.ground_at(c);
        self.feature(c, ground).unwrap_or(ground)
    }

    fn ground_at(&self, c: Coord) -> TileId {
        Self::band(self.elevation_at(c))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

// ---------------------------------------------------------------------------
// Noise
// ---------------------------------------------------------------------------

fn fade(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

fn lattice(seed: u64, x: i64, y: i64) -> f64 {
    unit_f64(hash2(seed, x, y))
}

/// Smoothed value noise in `[0, 1)`.
fn value_noise(seed: u64, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let (ix, iy) = (x0 as i64, y0 as i64);
    let tx = fade(x - x0);
    let ty = fade(y - y0);

    let a = lattice(seed, ix, iy);
    let b = lattice(seed, ix + 1, iy);
    let c = lattice(seed, ix, iy + 1);
    let d = lattice(seed, ix + 1, iy + 1);

    let top = a + (b - a) * tx;
    let bottom = c + (d - c) * tx;
    top + (bottom - top) * ty
}

/// Fractal sum of `octaves` value-noise layers, normalised back to `[0, 1)`.
fn fbm(seed: u64, x: f64, y: f64, octaves: u32) -> f64 {
    let mut sum = 0.0;
    let mut norm = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    for octave in 0..octaves {
        let layer_seed = seed.wrapping_add(octave as u64);
        sum += value_noise(layer_seed, x * frequency, y * frequency) * amplitude;
        norm += amplitude;
        amplitude *= PERSISTENCE;
        frequency *= LACUNARITY;
    }
    sum / norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_noise_is_continuous_across_lattice_lines() {
        let left = value_noise(3, 0.9999, 0.5);
        let right = value_noise(3, 1.0, 0.5);
        assert!((left - right).abs() < 1e-3);
    }

    #[test]
    fn fbm_stays_normalised() {
        for i in -50..50 {
            let v = fbm(11, i as f64 * 0.37, i as f64 * -0.11, 4);
            assert!((0.0..1.0).contains(&v), "fbm out of range: {v}");
        }
    }

    #[test]
    fn bands_are_ordered_by_elevation() {
        assert_eq!(ProceduralTerrain::band(0.1), TileId::DeepWater);
        assert_eq!(ProceduralTerrain::band(0.35), TileId::Water);
        assert_eq!(ProceduralTerrain::band(0.42), TileId::Sand);
        assert_eq!(ProceduralTerrain::band(0.5), TileId::Grass);
        assert_eq!(ProceduralTerrain::band(0.9), TileId::Mountain);
    }

    #[test]
    fn features_only_replace_their_own_band() {
        let t = ProceduralTerrain::new(42);
        for x in -64..64 {
            for y in -64..64 {
                let c = Coord::new(x, y);
                let ground = t.ground_at(c);
                match t.tile_at(c) {
                    TileId::Tree => assert_eq!(ground, TileId::Grass),
                    TileId::Rock => assert!(matches!(ground, TileId::Grass | TileId::Sand)),
                    TileId::Ore => assert_eq!(ground, TileId::Mountain),
                    other => assert_eq!(other, ground),
                }
            }
        }
    }
}
