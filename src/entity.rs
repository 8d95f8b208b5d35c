//! Entity directory: every simulated actor this peer knows about.
//!
//! Entries are split by writer. `owned` holds the actors this peer is the
//! single writer for (its own avatar; on the host also every AI-driven
//! actor). `shadows` holds read-only, smoothed copies of actors written
//! elsewhere. A shadow only ever changes in response to a report from its
//! writer.

use crate::interpolation::Smoothed;
use crate::protocol::{
    AvatarState, CreatureReport, DroppedItemReport, EntitySnapshot, ProjectileReport,
    VesselReport,
};
use crate::types::{Coord, EntityId, PeerId, Vec2};
use crate::world::Wind;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const AVATAR_MAX_HEALTH: i32 = 100;
pub const VESSEL_MAX_HEALTH: i32 = 100;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Species {
    Sheep,
    Wolf,
    Serpent,
}

impl Species {
    pub fn max_health(self) -> i32 {
        match self {
            Species::Sheep => 20,
            Species::Wolf => 40,
            Species::Serpent => 30,
        }
    }

    /// Wander speed in tiles per second.
    pub fn speed(self) -> f32 {
        match self {
            Species::Sheep => 1.0,
            Species::Wolf => 2.2,
            Species::Serpent => 1.5,
        }
    }

    pub fn is_hostile(self) -> bool {
        matches!(self, Species::Wolf | Species::Serpent)
    }

    /// Lives in water rather than on land.
    pub fn is_aquatic(self) -> bool {
        matches!(self, Species::Serpent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarData {
    pub owner: PeerId,
    pub display_name: String,
    pub held_melee: Option<String>,
    pub in_vessel: Option<EntityId>,
    pub is_moving: bool,
    pub heading: f32,
    /// Requested walking direction; only meaningful on the owning peer.
    pub intent: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatureData {
    pub species: Species,
    pub has_wool: bool,
    pub fed: bool,
    pub heading: f32,
    /// Seconds until wool grows back (host-side only).
    pub regrow_timer: f32,
    /// Seconds until the next wander decision (host-side only).
    pub wander_timer: f32,
    /// Seconds until the next attack is allowed (host-side only).
    pub attack_cooldown: f32,
}

impl CreatureData {
    pub fn new(species: Species, heading: f32) -> Self {
        Self {
            species,
            has_wool: species == Species::Sheep,
            fed: false,
            heading,
            regrow_timer: 0.0,
            wander_timer: 0.0,
            attack_cooldown: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VesselData {
    pub heading: f32,
    pub sail_raised: bool,
    pub occupant: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileData {
    pub velocity: Vec2,
    /// Seconds left before the projectile expires.
    pub ttl: f32,
    pub damage: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedItemData {
    pub item: String,
    pub count: u32,
    pub ttl: f32,
}

/// Closed set of actor kinds. Every consumer matches exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Avatar(AvatarData),
    Creature(CreatureData),
    Vessel(VesselData),
    Projectile(ProjectileData),
    DroppedItem(DroppedItemData),
}

/// Who may write an entity's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    Host,
    Peer(PeerId),
}

impl EntityKind {
    pub fn writer(&self) -> Writer {
        match self {
            EntityKind::Avatar(a) => Writer::Peer(a.owner),
            EntityKind::Creature(_)
            | EntityKind::Vessel(_)
            | EntityKind::Projectile(_)
            | EntityKind::DroppedItem(_) => Writer::Host,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Avatar(_) => "avatar",
            EntityKind::Creature(_) => "creature",
            EntityKind::Vessel(_) => "vessel",
            EntityKind::Projectile(_) => "projectile",
            EntityKind::DroppedItem(_) => "dropped-item",
        }
    }

    pub fn heading(&self) -> f32 {
        match self {
            EntityKind::Avatar(a) => a.heading,
            EntityKind::Creature(c) => c.heading,
            EntityKind::Vessel(v) => v.heading,
            EntityKind::Projectile(p) => p.velocity.y.atan2(p.velocity.x),
            EntityKind::DroppedItem(_) => 0.0,
        }
    }

    /// Occupies its tile for build-collision purposes.
    pub fn blocks_building(&self) -> bool {
        match self {
            EntityKind::Avatar(_) | EntityKind::Creature(_) | EntityKind::Vessel(_) => true,
            EntityKind::Projectile(_) | EntityKind::DroppedItem(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedEntity {
    pub id: EntityId,
    pub position: Vec2,
    pub health: i32,
    pub kind: EntityKind,
}

impl SimulatedEntity {
    pub fn avatar(owner: PeerId, display_name: impl Into<String>, position: Vec2) -> Self {
        Self {
            id: EntityId::avatar_of(owner),
            position,
            health: AVATAR_MAX_HEALTH,
            kind: EntityKind::Avatar(AvatarData {
                owner,
                display_name: display_name.into(),
                held_melee: None,
                in_vessel: None,
                is_moving: false,
                heading: 0.0,
                intent: Vec2::zero(),
            }),
        }
    }

    pub fn creature(id: EntityId, species: Species, position: Vec2, heading: f32) -> Self {
        Self {
            id,
            position,
            health: species.max_health(),
            kind: EntityKind::Creature(CreatureData::new(species, heading)),
        }
    }

    pub fn vessel(id: EntityId, position: Vec2, heading: f32) -> Self {
        Self {
            id,
            position,
            health: VESSEL_MAX_HEALTH,
            kind: EntityKind::Vessel(VesselData {
                heading,
                sail_raised: false,
                occupant: None,
            }),
        }
    }

    pub fn projectile(id: EntityId, position: Vec2, velocity: Vec2, ttl: f32, damage: i32) -> Self {
        Self {
            id,
            position,
            health: 1,
            kind: EntityKind::Projectile(ProjectileData {
                velocity,
                ttl,
                damage,
            }),
        }
    }

    pub fn dropped_item(id: EntityId, position: Vec2, item: impl Into<String>, ttl: f32) -> Self {
        Self {
            id,
            position,
            health: 1,
            kind: EntityKind::DroppedItem(DroppedItemData {
                item: item.into(),
                count: 1,
                ttl,
            }),
        }
    }

    pub fn tile(&self) -> Coord {
        Coord::containing(self.position)
    }

    pub fn is_avatar(&self) -> bool {
        matches!(self.kind, EntityKind::Avatar(_))
    }

    // -----------------------------------------------------------------------
    // Report conversion
    // -----------------------------------------------------------------------

    pub fn from_creature_report(r: &CreatureReport) -> Self {
        let mut data = CreatureData::new(r.species, r.heading);
        data.has_wool = r.wool;
        data.fed = r.fed;
        Self {
            id: r.id,
            position: Vec2::new(r.x, r.y),
            health: r.hp,
            kind: EntityKind::Creature(data),
        }
    }

    pub fn from_vessel_report(r: &VesselReport) -> Self {
        Self {
            id: r.id,
            position: Vec2::new(r.x, r.y),
            health: r.hp,
            kind: EntityKind::Vessel(VesselData {
                heading: r.heading,
                sail_raised: r.sail,
                occupant: r.occupant,
            }),
        }
    }

    pub fn from_item_report(r: &DroppedItemReport) -> Self {
        Self {
            id: r.id,
            position: Vec2::new(r.x, r.y),
            health: 1,
            kind: EntityKind::DroppedItem(DroppedItemData {
                item: r.item.clone(),
                count: r.count,
                ttl: 0.0,
            }),
        }
    }

    pub fn from_projectile_report(r: &ProjectileReport) -> Self {
        Self {
            id: r.id,
            position: Vec2::new(r.x, r.y),
            health: 1,
            kind: EntityKind::Projectile(ProjectileData {
                velocity: Vec2::new(r.vx, r.vy),
                ttl: 0.0,
                damage: 0,
            }),
        }
    }

    pub fn from_avatar_state(owner: PeerId, display_name: &str, s: &AvatarState) -> Self {
        Self {
            id: EntityId::avatar_of(owner),
            position: Vec2::new(s.x, s.y),
            health: s.hp,
            kind: EntityKind::Avatar(AvatarData {
                owner,
                display_name: display_name.to_string(),
                held_melee: s.held_melee.clone(),
                in_vessel: s.in_vessel,
                is_moving: s.is_moving,
                heading: s.heading.unwrap_or(0.0),
                intent: Vec2::zero(),
            }),
        }
    }

    /// The owner's broadcast form of an avatar.
    pub fn avatar_state(&self) -> Option<AvatarState> {
        let EntityKind::Avatar(a) = &self.kind else {
            return None;
        };
        let p = self.position.quantized();
        Some(AvatarState {
            x: p.x,
            y: p.y,
            held_melee: a.held_melee.clone(),
            in_vessel: a.in_vessel,
            hp: self.health,
            is_moving: a.is_moving,
            heading: Some(a.heading),
        })
    }
}

// ---------------------------------------------------------------------------
// Shadows
// ---------------------------------------------------------------------------

/// Read-only local copy of a remotely written entity.
///
/// `entity` holds the latest report verbatim, so `entity.position` is the
/// interpolation target. `motion.displayed` is what gets rendered.
#[derive(Debug, Clone)]
pub struct ShadowEntity {
    pub entity: SimulatedEntity,
    pub motion: Smoothed,
}

impl ShadowEntity {
    pub fn displayed(&self) -> Vec2 {
        self.motion.displayed
    }

    pub fn target(&self) -> Vec2 {
        self.motion.target
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct EntityDirectory {
    owned: BTreeMap<EntityId, SimulatedEntity>,
    shadows: BTreeMap<EntityId, ShadowEntity>,
    next_id: u64,
    last_snapshot_seq: u64,
}

impl EntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh id for a host-owned kind. Only the host calls this.
    pub fn mint_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId(self.next_id)
    }

    // -----------------------------------------------------------------------
    // Owned entries
    // -----------------------------------------------------------------------

    pub fn insert_owned(&mut self, entity: SimulatedEntity) {
        self.shadows.remove(&entity.id);
        self.owned.insert(entity.id, entity);
    }

    pub fn owned(&self, id: EntityId) -> Option<&SimulatedEntity> {
        self.owned.get(&id)
    }

    pub fn owned_mut(&mut self, id: EntityId) -> Option<&mut SimulatedEntity> {
        self.owned.get_mut(&id)
    }

    pub fn remove_owned(&mut self, id: EntityId) -> Option<SimulatedEntity> {
        self.owned.remove(&id)
    }

    pub fn owned_entities(&self) -> impl Iterator<Item = &SimulatedEntity> {
        self.owned.values()
    }

    pub fn owned_entities_mut(&mut self) -> impl Iterator<Item = &mut SimulatedEntity> {
        self.owned.values_mut()
    }

    pub fn owned_ids(&self) -> Vec<EntityId> {
        self.owned.keys().copied().collect()
    }

    pub fn owned_len(&self) -> usize {
        self.owned.len()
    }

    /// Remove every owned non-avatar entity whose health is exhausted.
    /// Avatars respawn instead of being removed.
    pub fn remove_dead(&mut self) -> Vec<SimulatedEntity> {
        let dead: Vec<EntityId> = self
            .owned
            .values()
            .filter(|e| e.health <= 0 && !e.is_avatar())
            .map(|e| e.id)
            .collect();
        dead.into_iter()
            .filter_map(|id| self.owned.remove(&id))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Shadow entries
    // -----------------------------------------------------------------------

    pub fn shadow(&self, id: EntityId) -> Option<&ShadowEntity> {
        self.shadows.get(&id)
    }

    pub fn shadows(&self) -> impl Iterator<Item = &ShadowEntity> {
        self.shadows.values()
    }

    pub fn shadow_len(&self) -> usize {
        self.shadows.len()
    }

    /// Store a remote report. New shadows start settled at the report;
    /// known ones retarget and snap when the jump exceeds `snap_distance`.
    /// Returns `true` when the displayed position snapped.
    pub fn upsert_shadow(&mut self, entity: SimulatedEntity, snap_distance: f32) -> bool {
        let heading = entity.kind.heading();
        match self.shadows.get_mut(&entity.id) {
            Some(shadow) => {
                let snapped = shadow.motion.report(entity.position, heading, snap_distance);
                shadow.entity = entity;
                snapped
            }
            None => {
                let motion = Smoothed::at(entity.position, heading);
                self.shadows.insert(entity.id, ShadowEntity { entity, motion });
                true
            }
        }
    }

    pub fn remove_shadow(&mut self, id: EntityId) -> Option<ShadowEntity> {
        self.shadows.remove(&id)
    }

    /// Advance every shadow's displayed state toward its target.
    pub fn step_shadows(&mut self, k: f32, dt: f32) {
        for shadow in self.shadows.values_mut() {
            shadow.motion.step(k, dt);
        }
    }

    /// Reconcile against a host entity snapshot: upsert everything listed and
    /// delete host-kind shadows that are no longer listed. Returns how many
    /// shadows were deleted.
    ///
    /// A sequenced snapshot older than the newest one applied is ignored.
    pub fn apply_entity_snapshot(&mut self, snapshot: &EntitySnapshot, snap_distance: f32) -> usize {
        if snapshot.seq != 0 {
            if snapshot.seq <= self.last_snapshot_seq {
                debug!(
                    "ignoring stale entity snapshot {} (newest {})",
                    snapshot.seq, self.last_snapshot_seq
                );
                return 0;
            }
            self.last_snapshot_seq = snapshot.seq;
        }
        let mut listed = BTreeSet::new();

        let reported = snapshot
            .creatures
            .iter()
            .map(SimulatedEntity::from_creature_report)
            .chain(snapshot.vessels.iter().map(SimulatedEntity::from_vessel_report))
            .chain(snapshot.dropped_items.iter().map(SimulatedEntity::from_item_report))
            .chain(snapshot.projectiles.iter().map(SimulatedEntity::from_projectile_report));

        for entity in reported {
            if entity.kind.writer() != Writer::Host || entity.id.is_avatar() {
                continue;
            }
            listed.insert(entity.id);
            self.upsert_shadow(entity, snap_distance);
        }

        let stale: Vec<EntityId> = self
            .shadows
            .values()
            .filter(|s| s.entity.kind.writer() == Writer::Host && !listed.contains(&s.entity.id))
            .map(|s| s.entity.id)
            .collect();
        for id in &stale {
            self.shadows.remove(id);
        }
        stale.len()
    }

    /// Build the host's periodic snapshot of every host-owned actor.
    pub fn build_entity_snapshot(&self, clock: f32, wind: Wind) -> EntitySnapshot {
        let mut snapshot = EntitySnapshot {
            creatures: Vec::new(),
            vessels: Vec::new(),
            dropped_items: Vec::new(),
            projectiles: Vec::new(),
            clock,
            wind: Some(wind),
            seq: 0,
        };

        for e in self.owned.values() {
            let p = e.position.quantized();
            match &e.kind {
                EntityKind::Avatar(_) => {}
                EntityKind::Creature(c) => snapshot.creatures.push(CreatureReport {
                    id: e.id,
                    x: p.x,
                    y: p.y,
                    hp: e.health,
                    species: c.species,
                    wool: c.has_wool,
                    fed: c.fed,
                    heading: c.heading,
                }),
                EntityKind::Vessel(v) => snapshot.vessels.push(VesselReport {
                    id: e.id,
                    x: p.x,
                    y: p.y,
                    hp: e.health,
                    heading: v.heading,
                    sail: v.sail_raised,
                    occupant: v.occupant,
                }),
                EntityKind::Projectile(pr) => snapshot.projectiles.push(ProjectileReport {
                    id: e.id,
                    x: p.x,
                    y: p.y,
                    vx: pr.velocity.x,
                    vy: pr.velocity.y,
                }),
                EntityKind::DroppedItem(d) => snapshot.dropped_items.push(DroppedItemReport {
                    id: e.id,
                    x: p.x,
                    y: p.y,
                    item: d.item.clone(),
                    count: d.count,
                }),
            }
        }
        snapshot
    }

    // -----------------------------------------------------------------------
    // Queries across both halves
    // -----------------------------------------------------------------------

    /// Best known position: owned state, or the latest report for a shadow.
    pub fn latest_position(&self, id: EntityId) -> Option<Vec2> {
        self.owned
            .get(&id)
            .map(|e| e.position)
            .or_else(|| self.shadows.get(&id).map(|s| s.entity.position))
    }

    /// Every known avatar as `(owner, latest position)`.
    pub fn avatars(&self) -> Vec<(PeerId, Vec2)> {
        let owned = self.owned.values().map(|e| (e, e.position));
        let shadows = self.shadows.values().map(|s| (&s.entity, s.entity.position));
        owned
            .chain(shadows)
            .filter_map(|(e, pos)| match &e.kind {
                EntityKind::Avatar(a) => Some((a.owner, pos)),
                _ => None,
            })
            .collect()
    }

    /// Whether any movement-blocking actor stands on `c`.
    pub fn is_occupied(&self, c: Coord) -> bool {
        self.owned
            .values()
            .chain(self.shadows.values().map(|s| &s.entity))
            .any(|e| e.kind.blocks_building() && e.tile() == c)
    }

    /// Drop the avatar of a departed peer, wherever it lives.
    pub fn remove_avatar(&mut self, peer: PeerId) -> bool {
        let id = EntityId::avatar_of(peer);
        self.shadows.remove(&id).is_some() | self.owned.remove(&id).is_some()
    }
}
