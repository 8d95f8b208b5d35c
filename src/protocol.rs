//! Peer-to-peer wire protocol.
//!
//! This module owns **every message that crosses the transport** between
//! peers of one session.
//!
//! ## Channels
//!
//! | Message             | Channel            | Direction        |
//! |---------------------|--------------------|------------------|
//! | `join-announce`     | `peer.join`        | peer ↔ peer      |
//! | `world-snapshot`    | `world.snapshot`   | host → joiner    |
//! | `avatar-state`      | `avatar.state`     | owner → all      |
//! | `mutation-request`  | `mutation.request` | guest → host     |
//! | `mutation-commit`   | `mutation.commit`  | host → all       |
//! | `entity-snapshot`   | `entity.snapshot`  | host → guests    |
//! | `entity-request`    | `entity.request`   | guest → host     |
//! | `entity-hit-report` | `entity.hit`       | guest → host     |
//! | `damage-applied`    | `damage.applied`   | host → one peer  |
//!
//! ## Design rules
//!
//! 1. Payload fields are camelCase JSON; message names are kebab-case.
//! 2. Terrain is **never** sent: only the seed and the overlay deltas.
//! 3. Every commit is idempotent: `hit` commits carry the absolute total.
//! 4. The sender is whatever the transport says it is, never a payload field.

use crate::entity::Species;
use crate::error::ProtocolError;
use crate::snapshot::{SpawnPoint, WorldSnapshot};
use crate::tile::TileId;
use crate::types::{Coord, EntityId, PeerId};
use crate::world::Wind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Every message travels inside this envelope.
///
/// `session` lets a peer ignore traffic from a different world sharing the
/// transport. `frame` is the sender's tick counter, for logging only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub session: String,
    pub frame: u64,
    pub message: Message,
}

impl Envelope {
    pub fn new(session: impl Into<String>, frame: u64, message: Message) -> Self {
        Self {
            session: session.into(),
            frame,
            message,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(ProtocolError::Encode)
    }

    /// Decode a payload received on `channel`. A message that arrives on the
    /// wrong channel is rejected.
    pub fn decode(channel: &str, payload: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(|source| ProtocolError::Decode {
                channel: channel.to_string(),
                source,
            })?;
        if envelope.message.channel() != channel {
            return Err(ProtocolError::WrongChannel {
                kind: envelope.message.kind(),
                channel: channel.to_string(),
            });
        }
        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// Message catalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Message {
    JoinAnnounce(JoinAnnounce),
    WorldSnapshot(WorldSnapshotMsg),
    AvatarState(AvatarState),
    MutationRequest(MutationRequest),
    MutationCommit(MutationCommit),
    EntitySnapshot(EntitySnapshot),
    EntityRequest(EntityRequest),
    EntityHitReport(EntityHitReport),
    DamageApplied(DamageApplied),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::JoinAnnounce(_) => "join-announce",
            Message::WorldSnapshot(_) => "world-snapshot",
            Message::AvatarState(_) => "avatar-state",
            Message::MutationRequest(_) => "mutation-request",
            Message::MutationCommit(_) => "mutation-commit",
            Message::EntitySnapshot(_) => "entity-snapshot",
            Message::EntityRequest(_) => "entity-request",
            Message::EntityHitReport(_) => "entity-hit-report",
            Message::DamageApplied(_) => "damage-applied",
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Message::JoinAnnounce(_) => channels::JOIN_ANNOUNCE,
            Message::WorldSnapshot(_) => channels::WORLD_SNAPSHOT,
            Message::AvatarState(_) => channels::AVATAR_STATE,
            Message::MutationRequest(_) => channels::MUTATION_REQUEST,
            Message::MutationCommit(_) => channels::MUTATION_COMMIT,
            Message::EntitySnapshot(_) => channels::ENTITY_SNAPSHOT,
            Message::EntityRequest(_) => channels::ENTITY_REQUEST,
            Message::EntityHitReport(_) => channels::ENTITY_HIT,
            Message::DamageApplied(_) => channels::DAMAGE_APPLIED,
        }
    }

    /// Messages only the host may originate.
    pub fn is_host_only(&self) -> bool {
        match self {
            Message::WorldSnapshot(_)
            | Message::MutationCommit(_)
            | Message::EntitySnapshot(_)
            | Message::DamageApplied(_) => true,
            Message::JoinAnnounce(_)
            | Message::AvatarState(_)
            | Message::MutationRequest(_)
            | Message::EntityRequest(_)
            | Message::EntityHitReport(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAnnounce {
    pub display_name: String,
}

/// Bulk world state for a joining peer. Sent once, to that peer only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshotMsg {
    pub seed: u64,
    pub overlay: BTreeMap<String, TileId>,
    pub ledger: BTreeMap<String, i32>,
    pub clock: f32,
    pub spawn_x: i32,
    pub spawn_y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind: Option<Wind>,
}

impl From<WorldSnapshot> for WorldSnapshotMsg {
    fn from(s: WorldSnapshot) -> Self {
        Self {
            seed: s.seed,
            overlay: s.overlay,
            ledger: s.ledger,
            clock: s.clock,
            spawn_x: s.spawn.x,
            spawn_y: s.spawn.y,
            wind: s.wind,
        }
    }
}

impl From<WorldSnapshotMsg> for WorldSnapshot {
    fn from(m: WorldSnapshotMsg) -> Self {
        Self {
            seed: m.seed,
            overlay: m.overlay,
            ledger: m.ledger,
            clock: m.clock,
            spawn: SpawnPoint {
                x: m.spawn_x,
                y: m.spawn_y,
            },
            wind: m.wind,
        }
    }
}

/// Owner-authoritative avatar state, sent at a fixed cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarState {
    pub x: f32,
    pub y: f32,
    pub held_melee: Option<String>,
    pub in_vessel: Option<EntityId>,
    pub hp: i32,
    pub is_moving: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestAction {
    Build,
    Damage,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub x: i32,
    pub y: i32,
    pub proposed_id: Option<TileId>,
    pub action: RequestAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i32>,
}

impl MutationRequest {
    pub fn build(c: Coord, proposed: TileId) -> Self {
        Self {
            x: c.x,
            y: c.y,
            proposed_id: Some(proposed),
            action: RequestAction::Build,
            amount: None,
        }
    }

    pub fn damage(c: Coord, amount: i32) -> Self {
        Self {
            x: c.x,
            y: c.y,
            proposed_id: None,
            action: RequestAction::Damage,
            amount: Some(amount),
        }
    }

    pub fn remove(c: Coord) -> Self {
        Self {
            x: c.x,
            y: c.y,
            proposed_id: None,
            action: RequestAction::Remove,
            amount: None,
        }
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitAction {
    Set,
    Hit,
}

/// Authoritative change at one coordinate. `hit` commits leave the tile in
/// place and carry the new absolute damage total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationCommit {
    pub x: i32,
    pub y: i32,
    pub id: TileId,
    pub action: CommitAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i32>,
}

impl MutationCommit {
    pub fn set(c: Coord, id: TileId) -> Self {
        Self {
            x: c.x,
            y: c.y,
            id,
            action: CommitAction::Set,
            total: None,
        }
    }

    pub fn hit(c: Coord, id: TileId, total: i32) -> Self {
        Self {
            x: c.x,
            y: c.y,
            id,
            action: CommitAction::Hit,
            total: Some(total),
        }
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatureReport {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub species: Species,
    pub wool: bool,
    pub fed: bool,
    pub heading: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselReport {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub heading: f32,
    pub sail: bool,
    pub occupant: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedItemReport {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub item: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileReport {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// Complete listing of host-owned actors. Absence from the newest one is
/// the deletion signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub creatures: Vec<CreatureReport>,
    pub vessels: Vec<VesselReport>,
    pub dropped_items: Vec<DroppedItemReport>,
    #[serde(default)]
    pub projectiles: Vec<ProjectileReport>,
    pub clock: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind: Option<Wind>,
    /// Host tick the listing was taken on. Zero is unordered.
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityAction {
    Shear,
    Feed,
    Board,
    Disembark,
    RaiseSail,
    LowerSail,
    PickUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRequest {
    pub target_id: EntityId,
    pub action: EntityAction,
}

/// Damage a guest believes it dealt to a host-owned actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHitReport {
    pub target_id: EntityId,
    pub amount: i32,
}

/// Host-originated damage to the receiving peer's own avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageApplied {
    pub amount: i32,
}

// ---------------------------------------------------------------------------
// Outbound routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every other peer in the session.
    Broadcast,
    Peer(PeerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: Message,
}

impl Outbound {
    pub fn broadcast(message: Message) -> Self {
        Self {
            target: Target::Broadcast,
            message,
        }
    }

    pub fn to(peer: PeerId, message: Message) -> Self {
        Self {
            target: Target::Peer(peer),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel names
// ---------------------------------------------------------------------------

/// Named transport channels, one per message kind.
pub mod channels {
    pub const JOIN_ANNOUNCE: &str = "peer.join";
    pub const WORLD_SNAPSHOT: &str = "world.snapshot";
    pub const AVATAR_STATE: &str = "avatar.state";
    pub const MUTATION_REQUEST: &str = "mutation.request";
    pub const MUTATION_COMMIT: &str = "mutation.commit";
    pub const ENTITY_SNAPSHOT: &str = "entity.snapshot";
    pub const ENTITY_REQUEST: &str = "entity.request";
    pub const ENTITY_HIT: &str = "entity.hit";
    pub const DAMAGE_APPLIED: &str = "damage.applied";

    pub const ALL: [&str; 9] = [
        JOIN_ANNOUNCE,
        WORLD_SNAPSHOT,
        AVATAR_STATE,
        MUTATION_REQUEST,
        MUTATION_COMMIT,
        ENTITY_SNAPSHOT,
        ENTITY_REQUEST,
        ENTITY_HIT,
        DAMAGE_APPLIED,
    ];
}
