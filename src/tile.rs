//! Tile catalogue: terrain and structure identities plus their attributes.
//!
//! Tiles travel over the wire and into snapshots as their numeric id.

pub use crate::error::UnknownTile;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TileId {
    DeepWater = 0,
    Water = 1,
    Sand = 2,
    Grass = 3,
    Mountain = 4,
    Tree = 5,
    Rock = 6,
    Ore = 7,
    Dirt = 8,
    Floor = 9,
    WoodWall = 10,
    StoneWall = 11,
    Door = 12,
    Bridge = 13,
    Campfire = 14,
}

impl TileId {
    pub const ALL: [TileId; 15] = [
        TileId::DeepWater,
        TileId::Water,
        TileId::Sand,
        TileId::Grass,
        TileId::Mountain,
        TileId::Tree,
        TileId::Rock,
        TileId::Ore,
        TileId::Dirt,
        TileId::Floor,
        TileId::WoodWall,
        TileId::StoneWall,
        TileId::Door,
        TileId::Bridge,
        TileId::Campfire,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Blocks actor movement.
    pub fn is_solid(self) -> bool {
        matches!(
            self,
            TileId::Mountain
                | TileId::Tree
                | TileId::Rock
                | TileId::Ore
                | TileId::WoodWall
                | TileId::StoneWall
                | TileId::Campfire
        )
    }

    pub fn is_liquid(self) -> bool {
        matches!(self, TileId::DeepWater | TileId::Water)
    }

    /// Accumulated damage at which the tile is destroyed. `None` means the
    /// tile cannot be damaged at all.
    pub fn destruction_threshold(self) -> Option<i32> {
        match self {
            TileId::Tree => Some(30),
            TileId::Rock => Some(60),
            TileId::Ore => Some(80),
            TileId::Floor => Some(20),
            TileId::WoodWall => Some(50),
            TileId::StoneWall => Some(120),
            TileId::Door => Some(40),
            TileId::Bridge => Some(50),
            TileId::Campfire => Some(25),
            TileId::DeepWater
            | TileId::Water
            | TileId::Sand
            | TileId::Grass
            | TileId::Mountain
            | TileId::Dirt => None,
        }
    }

    /// Players may propose this tile in a build request.
    pub fn is_placeable(self) -> bool {
        matches!(
            self,
            TileId::Floor
                | TileId::WoodWall
                | TileId::StoneWall
                | TileId::Door
                | TileId::Bridge
                | TileId::Campfire
        )
    }

    /// May be placed on shallow water (bridge and pier pieces).
    pub fn is_amphibious(self) -> bool {
        matches!(self, TileId::Bridge)
    }

    /// Open ground a structure can stand on.
    pub fn is_buildable_ground(self) -> bool {
        matches!(self, TileId::Sand | TileId::Grass | TileId::Dirt)
    }

    /// Whether `self` is an acceptable base for placing `proposed`.
    pub fn accepts(self, proposed: TileId) -> bool {
        if !proposed.is_placeable() {
            return false;
        }
        if self.is_liquid() {
            return proposed.is_amphibious() && self == TileId::Water;
        }
        self.is_buildable_ground() || (self == TileId::Floor && proposed != TileId::Floor)
    }

    /// Item left behind when the tile is destroyed.
    pub fn drop_item(self) -> Option<&'static str> {
        match self {
            TileId::Tree | TileId::WoodWall => Some("wood"),
            TileId::Rock | TileId::StoneWall => Some("stone"),
            TileId::Ore => Some("ore"),
            _ => None,
        }
    }
}

impl From<TileId> for u8 {
    fn from(tile: TileId) -> u8 {
        tile.id()
    }
}

impl TryFrom<u8> for TileId {
    type Error = UnknownTile;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TileId::ALL
            .get(value as usize)
            .copied()
            .ok_or(UnknownTile(value))
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self, self.id())
    }
}
