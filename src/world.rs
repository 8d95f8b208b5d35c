//! `WorldState` – the authoritative world model.
//!
//! A tile is `overlay[c]` when present, otherwise whatever the procedural
//! terrain says. The damage ledger is a separate sparse map and is wiped for
//! a coordinate whenever its tile identity changes.
//!
//! Only the authority layer calls the mutating methods, and on guests it only
//! does so to mirror commits that came from the host.

use crate::error::SnapshotError;
use crate::interpolation::{approach_angle, smoothing_factor};
use crate::rng::{hash2, salted, unit_f64};
use crate::snapshot::WorldSnapshot;
use crate::terrain::{ProceduralTerrain, TerrainSource};
use crate::tile::TileId;
use crate::types::{Coord, SessionConfig};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f32::consts::TAU;

const SALT_WIND: u64 = 0x3d1;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Shared wind vector. Replicated from the host, never simulated by guests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    /// Current heading in radians.
    pub heading: f32,
    /// Heading the wind is easing toward.
    pub target: f32,
    /// Relative strength in `[0.3, 1.0]`.
    pub strength: f32,
    /// Number of target re-rolls so far; keys the next roll.
    pub rerolls: u32,
    /// Seconds since the last re-roll.
    #[serde(default)]
    pub elapsed: f32,
}

impl Default for Wind {
    fn default() -> Self {
        Self {
            heading: 0.0,
            target: 0.0,
            strength: 0.5,
            rerolls: 0,
            elapsed: 0.0,
        }
    }
}

impl Wind {
    pub fn is_finite(&self) -> bool {
        self.heading.is_finite()
            && self.target.is_finite()
            && self.strength.is_finite()
            && self.elapsed.is_finite()
    }

    fn reroll(&mut self, seed: u64) {
        self.rerolls += 1;
        let h = hash2(salted(seed, SALT_WIND), self.rerolls as i64, 0);
        let s = hash2(salted(seed, SALT_WIND), self.rerolls as i64, 1);
        self.target = (unit_f64(h) as f32) * TAU;
        self.strength = 0.3 + 0.7 * unit_f64(s) as f32;
    }
}

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorldState {
    terrain: ProceduralTerrain,
    overlay: HashMap<Coord, TileId>,
    ledger: HashMap<Coord, i32>,
    clock: f32,
    wind: Wind,
    spawn: Coord,
}

impl WorldState {
    pub fn new(seed: u64) -> Self {
        Self {
            terrain: ProceduralTerrain::new(seed),
            overlay: HashMap::new(),
            ledger: HashMap::new(),
            clock: 0.0,
            wind: Wind::default(),
            spawn: Coord::new(0, 0),
        }
    }

    /// Fresh world with its spawn point already searched for.
    pub fn create(config: &SessionConfig) -> Self {
        let mut world = Self::new(config.seed);
        world.spawn = world.find_spawn(config.default_spawn, config.spawn_search_radius);
        world
    }

    pub fn from_snapshot(snapshot: &WorldSnapshot) -> Result<Self, SnapshotError> {
        let mut world = Self::new(snapshot.seed);
        world.import_snapshot(snapshot)?;
        Ok(world)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn seed(&self) -> u64 {
        self.terrain.seed()
    }

    pub fn terrain(&self) -> &ProceduralTerrain {
        &self.terrain
    }

    pub fn get_tile(&self, c: Coord) -> TileId {
        self.overlay
            .get(&c)
            .copied()
            .unwrap_or_else(|| self.terrain.tile_at(c))
    }

    pub fn overlay_entry(&self, c: Coord) -> Option<TileId> {
        self.overlay.get(&c).copied()
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    /// Accumulated damage at `c` (0 when there is no entry).
    pub fn ledger_total(&self, c: Coord) -> i32 {
        self.ledger.get(&c).copied().unwrap_or(0)
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_walkable(&self, c: Coord) -> bool {
        let tile = self.get_tile(c);
        !tile.is_solid() && !tile.is_liquid()
    }

    pub fn clock(&self) -> f32 {
        self.clock
    }

    pub fn wind(&self) -> Wind {
        self.wind
    }

    pub fn spawn(&self) -> Coord {
        self.spawn
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write `overlay[c] = tile` and clear the ledger entry at `c`.
    ///
    /// Idempotent: applying the same write twice leaves the same state.
    pub fn set_tile(&mut self, c: Coord, tile: TileId) {
        self.overlay.insert(c, tile);
        self.ledger.remove(&c);
        debug!("set_tile {} -> {}", c, tile);
    }

    /// Add `amount` to the ledger at `c` and return the new cumulative total.
    ///
    /// Comparing the total against the tile's threshold, and replacing the
    /// tile, is the caller's job.
    pub fn hit_tile(&mut self, c: Coord, amount: i32) -> i32 {
        let total = self.ledger.entry(c).or_insert(0);
        *total = total.saturating_add(amount);
        *total
    }

    /// Mirror an absolute damage total broadcast by the host.
    pub fn record_damage(&mut self, c: Coord, total: i32) {
        if total <= 0 {
            self.ledger.remove(&c);
        } else {
            self.ledger.insert(c, total);
        }
    }

    /// The tile a destroyed or removed tile at `c` reverts to: the bare
    /// biome ground, which keeps liquid coordinates liquid.
    pub fn restore_tile(&self, c: Coord) -> TileId {
        self.terrain.ground_at(c)
    }

    pub fn set_spawn(&mut self, spawn: Coord) {
        self.spawn = spawn;
    }

    // -----------------------------------------------------------------------
    // Environment
    // -----------------------------------------------------------------------

    /// Advance the clock and wind by `dt` seconds. Host only.
    pub fn advance_environment(&mut self, dt: f32, config: &SessionConfig) {
        if dt <= 0.0 {
            return;
        }
        if config.day_length > 0.0 {
            self.clock = (self.clock + dt / config.day_length).rem_euclid(1.0);
            if self.clock >= 1.0 {
                self.clock = 0.0;
            }
        }

        let seed = self.seed();
        self.wind.elapsed += dt;
        if config.wind_reroll_interval > 0.0 {
            while self.wind.elapsed >= config.wind_reroll_interval {
                self.wind.elapsed -= config.wind_reroll_interval;
                self.wind.reroll(seed);
            }
        }
        let t = smoothing_factor(config.wind_smoothing_rate, dt);
        self.wind.heading = approach_angle(self.wind.heading, self.wind.target, t);
    }

    /// Adopt the host's replicated clock and wind.
    pub fn sync_environment(&mut self, clock: f32, wind: Option<Wind>) {
        if clock.is_finite() && (0.0..1.0).contains(&clock) {
            self.clock = clock;
        }
        if let Some(wind) = wind.filter(Wind::is_finite) {
            self.wind = wind;
        }
    }

    // -----------------------------------------------------------------------
    // Spawn search
    // -----------------------------------------------------------------------

    /// Walk square rings outward from `origin` and return the first walkable,
    /// dry tile. Falls back to `origin` when the search is exhausted.
    pub fn find_spawn(&self, origin: Coord, radius: i32) -> Coord {
        for r in 0..=radius.max(0) {
            for dx in -r..=r {
                for dy in -r..=r {
                    if dx.abs() != r && dy.abs() != r {
                        continue;
                    }
                    let c = Coord::new(origin.x + dx, origin.y + dy);
                    if self.is_walkable(c) {
                        return c;
                    }
                }
            }
        }
        debug!("spawn search exhausted around {}; using fallback", origin);
        origin
    }

    /// Search again from the recorded spawn when it is not walkable, as
    /// happens for a snapshot without a `spawn` entry. Returns the spawn.
    pub fn ensure_walkable_spawn(&mut self, radius: i32) -> Coord {
        if !self.is_walkable(self.spawn) {
            let found = self.find_spawn(self.spawn, radius);
            debug!("spawn {} is not walkable; using {}", self.spawn, found);
            self.spawn = found;
        }
        self.spawn
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn export_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            seed: self.seed(),
            overlay: self
                .overlay
                .iter()
                .map(|(c, t)| (c.to_string(), *t))
                .collect(),
            ledger: self
                .ledger
                .iter()
                .map(|(c, n)| (c.to_string(), *n))
                .collect(),
            clock: self.clock,
            spawn: self.spawn.into(),
            wind: Some(self.wind),
        }
    }

    /// Replace all state with `snapshot`. Nothing is touched unless the whole
    /// snapshot validates.
    pub fn import_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<(), SnapshotError> {
        let valid = snapshot.validated()?;
        *self = Self {
            terrain: ProceduralTerrain::new(valid.seed),
            overlay: valid.overlay,
            ledger: valid.ledger,
            clock: valid.clock,
            wind: valid.wind.unwrap_or_default(),
            spawn: valid.spawn,
        };
        Ok(())
    }

    /// MD5 over the canonical seed, overlay and ledger. Peers that agree on
    /// every tile and every damage total produce the same digest.
    pub fn digest(&self) -> String {
        let snapshot = self.export_snapshot();
        let canonical = serde_json::json!({
            "seed": snapshot.seed,
            "overlay": snapshot.overlay,
            "ledger": snapshot.ledger,
        });
        format!("{:x}", md5::compute(canonical.to_string().as_bytes()))
    }
}
