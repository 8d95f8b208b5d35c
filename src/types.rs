//! Core world types shared across all modules.

use crate::error::CoordKeyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

/// Continuous world-space position, measured in tiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    /// Unit vector in the same direction, or zero for a zero-length vector.
    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len <= f32::EPSILON {
            Vec2::zero()
        } else {
            self * (1.0 / len)
        }
    }

    /// Unit vector pointing along `heading` (radians, 0 = +x).
    pub fn from_heading(heading: f32) -> Vec2 {
        Vec2::new(heading.cos(), heading.sin())
    }

    /// Round both components to the wire quantum (1/100 tile).
    pub fn quantized(self) -> Vec2 {
        Vec2::new(quantize(self.x), quantize(self.y))
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// Positions travel over the wire with two decimals of precision.
pub fn quantize(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tile coordinates
// ---------------------------------------------------------------------------

/// Integer tile address. The world is unbounded and addressed lazily.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The tile containing a world-space position.
    pub fn containing(pos: Vec2) -> Self {
        Self::new(pos.x.floor() as i32, pos.y.floor() as i32)
    }

    /// World-space centre of this tile.
    pub fn center(self) -> Vec2 {
        Vec2::new(self.x as f32 + 0.5, self.y as f32 + 0.5)
    }
}

/// `"x,y"` – the key form used by persisted snapshots.
impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for Coord {
    type Err = CoordKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| CoordKeyError::NotAPair(s.to_string()))?;
        let component = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|source| CoordKeyError::BadComponent {
                    key: s.to_string(),
                    source,
                })
        };
        Ok(Coord::new(component(x)?, component(y)?))
    }
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Transport-assigned peer identity.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Session-unique entity identity.
///
/// Host-minted ids count up from 1. Avatar ids carry [`EntityId::AVATAR_BIT`]
/// and are derived from the owning peer, so no peer ever has to mint an id
/// for a kind it does not own.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const AVATAR_BIT: u64 = 1 << 63;

    pub fn avatar_of(peer: PeerId) -> Self {
        Self(Self::AVATAR_BIT | peer.0 as u64)
    }

    pub fn is_avatar(self) -> bool {
        self.0 & Self::AVATAR_BIT != 0
    }

    /// The owning peer, for avatar ids.
    pub fn avatar_peer(self) -> Option<PeerId> {
        self.is_avatar().then(|| PeerId((self.0 & !Self::AVATAR_BIT) as u32))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.avatar_peer() {
            Some(peer) => write!(f, "avatar:{}", peer.0),
            None => write!(f, "entity:{}", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Root of all procedural determinism.
    pub seed: u64,
    /// Seconds between host entity snapshots.
    pub entity_broadcast_interval: f32,
    /// Seconds between avatar-state broadcasts from each owning peer.
    pub avatar_broadcast_interval: f32,
    /// Exponential smoothing rate `k` for shadow entities (1/s).
    pub smoothing_rate: f32,
    /// Reports further than this from the displayed position snap instantly.
    pub snap_distance: f32,
    /// Seconds per full environmental clock cycle.
    pub day_length: f32,
    /// Seconds between wind target re-rolls.
    pub wind_reroll_interval: f32,
    /// Rate at which the wind heading approaches its target (1/s).
    pub wind_smoothing_rate: f32,
    /// Square-ring radius searched for a walkable spawn tile.
    pub spawn_search_radius: i32,
    /// Fallback spawn when the search is exhausted.
    pub default_spawn: Coord,
    /// Upper bound on live host-spawned creatures.
    pub creature_cap: usize,
    /// Largest damage amount accepted in one request or hit report.
    pub max_hit: i32,
    /// Maximum avatar-to-target distance for entity requests.
    pub entity_reach: f32,
    /// Seconds before an untouched dropped item despawns.
    pub dropped_item_lifetime: f32,
    /// Avatar walking speed in tiles per second.
    pub avatar_speed: f32,
    /// Display name announced to other peers.
    pub display_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            entity_broadcast_interval: 0.25,
            avatar_broadcast_interval: 0.1,
            smoothing_rate: 10.0,
            snap_distance: 4.0,
            day_length: 600.0,
            wind_reroll_interval: 45.0,
            wind_smoothing_rate: 0.2,
            spawn_search_radius: 64,
            default_spawn: Coord::new(0, 0),
            creature_cap: 24,
            max_hit: 100,
            entity_reach: 6.0,
            dropped_item_lifetime: 120.0,
            avatar_speed: 4.0,
            display_name: "player".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coord_key_round_trips_through_display() {
        let c = Coord::new(-12, 7);
        assert_eq!(c.to_string(), "-12,7");
        assert_eq!("-12,7".parse::<Coord>().unwrap(), c);
    }

    #[test]
    fn malformed_coord_keys_are_rejected() {
        assert_eq!(
            "12".parse::<Coord>(),
            Err(CoordKeyError::NotAPair("12".into()))
        );
        assert!(matches!(
            "a,3".parse::<Coord>(),
            Err(CoordKeyError::BadComponent { ref key, .. }) if key == "a,3"
        ));
        assert!("1,2,3".parse::<Coord>().is_err());
    }

    #[test]
    fn containing_floors_negative_positions() {
        assert_eq!(Coord::containing(Vec2::new(-0.2, 3.9)), Coord::new(-1, 3));
    }

    #[test]
    fn avatar_ids_encode_their_peer() {
        let id = EntityId::avatar_of(PeerId(9));
        assert!(id.is_avatar());
        assert_eq!(id.avatar_peer(), Some(PeerId(9)));
        assert_eq!(EntityId(9).avatar_peer(), None);
    }

    #[test]
    fn quantize_keeps_two_decimals() {
        assert_eq!(quantize(1.23456), 1.23);
        assert_eq!(Vec2::new(0.006, -2.004).quantized(), Vec2::new(0.01, -2.0));
    }
}
