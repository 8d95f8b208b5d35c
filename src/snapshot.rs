//! Persisted world snapshot.
//!
//! Layout on disk and in the join burst:
//!
//! ```json
//! { "seed": 7, "overlay": {"5,5": 11}, "ledger": {"3,3": 40},
//!   "clock": 0.25, "spawn": {"x": 0, "y": 0} }
//! ```
//!
//! `spawn` and `wind` are optional on input. Maps are `BTreeMap`s so the
//! serialised form is canonical and can be digested.

use crate::error::SnapshotError;
use crate::tile::TileId;
use crate::types::Coord;
use crate::world::Wind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: i32,
    pub y: i32,
}

impl From<Coord> for SpawnPoint {
    fn from(c: Coord) -> Self {
        Self { x: c.x, y: c.y }
    }
}

impl From<SpawnPoint> for Coord {
    fn from(s: SpawnPoint) -> Self {
        Coord::new(s.x, s.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub seed: u64,
    pub overlay: BTreeMap<String, TileId>,
    pub ledger: BTreeMap<String, i32>,
    pub clock: f32,
    #[serde(default)]
    pub spawn: SpawnPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind: Option<Wind>,
}

/// A snapshot whose keys and values have all been checked.
#[derive(Debug, Clone)]
pub(crate) struct ValidatedSnapshot {
    pub seed: u64,
    pub overlay: HashMap<Coord, TileId>,
    pub ledger: HashMap<Coord, i32>,
    pub clock: f32,
    pub spawn: Coord,
    pub wind: Option<Wind>,
}

impl WorldSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate. Unknown tile ids fail during parsing.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: WorldSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        self.validated().map(|_| ())
    }

    pub(crate) fn validated(&self) -> Result<ValidatedSnapshot, SnapshotError> {
        if !self.clock.is_finite() || !(0.0..1.0).contains(&self.clock) {
            return Err(SnapshotError::malformed(format!(
                "clock {} outside [0, 1)",
                self.clock
            )));
        }

        let mut overlay = HashMap::with_capacity(self.overlay.len());
        for (key, tile) in &self.overlay {
            let c = key
                .parse::<Coord>()
                .map_err(|e| SnapshotError::malformed(format!("overlay: {e}")))?;
            overlay.insert(c, *tile);
        }

        let mut ledger = HashMap::with_capacity(self.ledger.len());
        for (key, total) in &self.ledger {
            let c = key
                .parse::<Coord>()
                .map_err(|e| SnapshotError::malformed(format!("ledger: {e}")))?;
            if *total < 0 {
                return Err(SnapshotError::malformed(format!(
                    "ledger entry {key} is negative ({total})"
                )));
            }
            ledger.insert(c, *total);
        }

        if let Some(wind) = &self.wind {
            if !wind.is_finite() {
                return Err(SnapshotError::malformed("wind contains non-finite values"));
            }
        }

        Ok(ValidatedSnapshot {
            seed: self.seed,
            overlay,
            ledger,
            clock: self.clock,
            spawn: self.spawn.into(),
            wind: self.wind,
        })
    }
}
