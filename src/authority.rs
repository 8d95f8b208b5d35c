//! Authority protocol: who may change shared state, and how requests turn
//! into broadcast commits.
//!
//! ## Rules
//!
//! - Only the host commits. Guests send requests and never apply a local
//!   effect speculatively.
//! - Every change, whether it comes from a remote request or from the host
//!   acting as a player, goes through the same `process_*` function, so the
//!   two paths cannot diverge in outcome or in what gets broadcast.
//! - A rejected request produces nothing at all. The requester notices the
//!   missing commit the next time it looks ([`AuthorityProtocol::pending_request`]).
//! - Host-only messages (`world-snapshot`, `mutation-commit`,
//!   `entity-snapshot`, `damage-applied`) are dropped unless the transport
//!   says they came from the host.
//!
//! Loss tolerance comes from idempotence: re-applying any commit leaves the
//! same state, and a fresh world snapshot resynchronises a peer from scratch.

use crate::entity::{EntityDirectory, EntityKind, SimulatedEntity, Species, Writer};
use crate::protocol::{
    AvatarState, CommitAction, DamageApplied, EntityAction, EntityHitReport, EntityRequest,
    JoinAnnounce, Message, MutationCommit, MutationRequest, Outbound, RequestAction,
    WorldSnapshotMsg,
};
use crate::snapshot::WorldSnapshot;
use crate::tile::TileId;
use crate::types::{Coord, EntityId, PeerId, SessionConfig};
use crate::world::WorldState;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};

/// Seconds a shorn sheep needs to regrow its wool (halved when fed).
pub const WOOL_REGROW_SECS: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub display_name: Option<String>,
}

/// Things the embedding application should surface to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    PeerJoined(PeerId),
    PeerAnnounced { peer: PeerId, display_name: String },
    PeerLeft(PeerId),
    /// The host disconnected. Session continuity is over; nothing is promoted.
    AuthorityLost(PeerId),
    WorldLoaded { seed: u64 },
    /// A received world snapshot failed validation and was not applied.
    SnapshotRejected(String),
    AvatarDamaged { amount: i32, health: i32 },
    Respawned,
    /// Saving or loading a world snapshot failed. Non-fatal.
    PersistenceFailed(String),
}

/// A guest request that has not (yet) been seen committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub request: MutationRequest,
    /// Seconds since the request went out.
    pub age: f32,
}

#[derive(Debug)]
pub struct AuthorityProtocol {
    local: PeerId,
    host: PeerId,
    peers: BTreeMap<PeerId, PeerInfo>,
    outbox: Vec<Outbound>,
    notices: Vec<Notice>,
    pending: HashMap<Coord, PendingMutation>,
    initialized: bool,
    authority_lost: bool,
}

impl AuthorityProtocol {
    pub fn new_host(local: PeerId) -> Self {
        Self::new(local, local, true)
    }

    /// A guest is uninitialised until the host's world snapshot arrives.
    pub fn new_guest(local: PeerId, host: PeerId) -> Self {
        Self::new(local, host, false)
    }

    fn new(local: PeerId, host: PeerId, initialized: bool) -> Self {
        Self {
            local,
            host,
            peers: BTreeMap::new(),
            outbox: Vec::new(),
            notices: Vec::new(),
            pending: HashMap::new(),
            initialized,
            authority_lost: false,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn role(&self) -> Role {
        if self.local == self.host {
            Role::Host
        } else {
            Role::Guest
        }
    }

    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn host_peer(&self) -> PeerId {
        self.host
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn authority_lost(&self) -> bool {
        self.authority_lost
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }

    pub fn display_name(&self, peer: PeerId) -> Option<&str> {
        self.peers.get(&peer).and_then(|p| p.display_name.as_deref())
    }

    pub fn pending_request(&self, c: Coord) -> Option<&PendingMutation> {
        self.pending.get(&c)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn age_pending(&mut self, dt: f32) {
        for p in self.pending.values_mut() {
            p.age += dt;
        }
    }

    pub fn push(&mut self, outbound: Outbound) {
        self.outbox.push(outbound);
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Transport join notification. Greets the newcomer and, on the host,
    /// sends it the one bulk world snapshot.
    pub fn on_peer_joined(&mut self, world: &WorldState, peer: PeerId, display_name: &str) {
        if peer == self.local {
            return;
        }
        self.peers.entry(peer).or_insert(PeerInfo {
            id: peer,
            display_name: None,
        });
        info!("{} joined", peer);
        self.notices.push(Notice::PeerJoined(peer));

        self.outbox.push(Outbound::to(
            peer,
            Message::JoinAnnounce(JoinAnnounce {
                display_name: display_name.to_string(),
            }),
        ));

        self.send_world_snapshot(world, peer);
    }

    /// Host only: queue the full world state for `peer`. Also used to
    /// resynchronise a peer that has missed commits.
    pub fn send_world_snapshot(&mut self, world: &WorldState, peer: PeerId) {
        if !self.is_host() || peer == self.local {
            return;
        }
        let snapshot = world.export_snapshot();
        info!(
            "sending world snapshot to {} ({} overlay, {} ledger entries)",
            peer,
            snapshot.overlay.len(),
            snapshot.ledger.len()
        );
        self.outbox.push(Outbound::to(
            peer,
            Message::WorldSnapshot(WorldSnapshotMsg::from(snapshot)),
        ));
    }

    /// Transport leave notification. Removes the peer's avatar; losing the
    /// host ends authority for the rest of the session.
    pub fn on_peer_left(&mut self, entities: &mut EntityDirectory, peer: PeerId) {
        self.peers.remove(&peer);
        entities.remove_avatar(peer);
        self.notices.push(Notice::PeerLeft(peer));

        if self.is_host() {
            for e in entities.owned_entities_mut() {
                if let EntityKind::Vessel(v) = &mut e.kind {
                    if v.occupant == Some(peer) {
                        v.occupant = None;
                        v.sail_raised = false;
                    }
                }
            }
        }

        if peer == self.host && !self.is_host() {
            error!("host {} disconnected; session authority lost", peer);
            self.authority_lost = true;
            self.notices.push(Notice::AuthorityLost(peer));
        } else {
            info!("{} left", peer);
        }
    }

    // -----------------------------------------------------------------------
    // Local intents
    // -----------------------------------------------------------------------

    /// Build / damage / remove intent from this peer's own player.
    pub fn submit_mutation(
        &mut self,
        world: &mut WorldState,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        request: MutationRequest,
    ) {
        if self.is_host() {
            let local = self.local;
            self.process_mutation(world, entities, config, local, &request);
        } else if !self.authority_lost {
            self.pending.insert(
                request.coord(),
                PendingMutation {
                    request: request.clone(),
                    age: 0.0,
                },
            );
            self.outbox
                .push(Outbound::to(self.host, Message::MutationRequest(request)));
        }
    }

    pub fn submit_entity_request(
        &mut self,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        request: EntityRequest,
    ) {
        if self.is_host() {
            let local = self.local;
            self.process_entity_request(entities, config, local, &request);
        } else if !self.authority_lost {
            self.outbox
                .push(Outbound::to(self.host, Message::EntityRequest(request)));
        }
    }

    /// Report damage this peer dealt to a host-owned actor. Guests never
    /// touch the shadow's health; it changes when the host says so.
    pub fn submit_entity_hit(
        &mut self,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        report: EntityHitReport,
    ) {
        if self.is_host() {
            let local = self.local;
            self.process_entity_hit(entities, config, local, &report);
        } else if !self.authority_lost {
            self.outbox
                .push(Outbound::to(self.host, Message::EntityHitReport(report)));
        }
    }

    // -----------------------------------------------------------------------
    // Host-side arbitration
    // -----------------------------------------------------------------------

    /// The single validate-then-commit path for tile mutations.
    ///
    /// Returns whether a commit happened. Rejections broadcast nothing.
    pub fn process_mutation(
        &mut self,
        world: &mut WorldState,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        from: PeerId,
        request: &MutationRequest,
    ) -> bool {
        if !self.is_host() {
            return false;
        }
        if !validate_mutation(world, entities, config, request) {
            debug!(
                "rejected {:?} at {} from {}",
                request.action,
                request.coord(),
                from
            );
            return false;
        }

        let c = request.coord();
        match request.action {
            RequestAction::Build => {
                let Some(proposed) = request.proposed_id else {
                    return false;
                };
                self.commit_set(world, c, proposed);
            }
            RequestAction::Damage => {
                let tile = world.get_tile(c);
                let (Some(amount), Some(threshold)) = (request.amount, tile.destruction_threshold())
                else {
                    return false;
                };
                let total = world.hit_tile(c, amount);
                if total >= threshold {
                    let replacement = world.restore_tile(c);
                    self.commit_set(world, c, replacement);
                    if let Some(item) = tile.drop_item() {
                        let id = entities.mint_id();
                        entities.insert_owned(SimulatedEntity::dropped_item(
                            id,
                            c.center(),
                            item,
                            config.dropped_item_lifetime,
                        ));
                    }
                } else {
                    self.outbox.push(Outbound::broadcast(Message::MutationCommit(
                        MutationCommit::hit(c, tile, total),
                    )));
                }
            }
            RequestAction::Remove => {
                let replacement = world.restore_tile(c);
                self.commit_set(world, c, replacement);
            }
        }
        true
    }

    fn commit_set(&mut self, world: &mut WorldState, c: Coord, tile: TileId) {
        world.set_tile(c, tile);
        self.outbox.push(Outbound::broadcast(Message::MutationCommit(
            MutationCommit::set(c, tile),
        )));
    }

    /// The single path for damage to host-owned actors.
    pub fn process_entity_hit(
        &mut self,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        from: PeerId,
        report: &EntityHitReport,
    ) -> bool {
        if !self.is_host() || report.amount <= 0 || report.amount > config.max_hit {
            return false;
        }
        let Some(target) = entities.owned_mut(report.target_id) else {
            debug!("hit report from {} for unknown {}", from, report.target_id);
            return false;
        };
        match target.kind {
            EntityKind::Creature(_) | EntityKind::Vessel(_) => {
                target.health -= report.amount;
                debug!(
                    "{} hit {} for {} (hp {})",
                    from, report.target_id, report.amount, target.health
                );
                true
            }
            EntityKind::Avatar(_) | EntityKind::Projectile(_) | EntityKind::DroppedItem(_) => false,
        }
    }

    /// The single path for interactions with host-owned actors.
    pub fn process_entity_request(
        &mut self,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        from: PeerId,
        request: &EntityRequest,
    ) -> bool {
        if !self.is_host() {
            return false;
        }
        let Some(target_pos) = entities.owned(request.target_id).map(|e| e.position) else {
            return false;
        };
        if let Some(avatar_pos) = entities.latest_position(EntityId::avatar_of(from)) {
            if avatar_pos.distance(target_pos) > config.entity_reach {
                debug!("{} out of reach of {}", from, request.target_id);
                return false;
            }
        }

        let mut drop: Option<&'static str> = None;
        let mut pick_up = false;
        let Some(target) = entities.owned_mut(request.target_id) else {
            return false;
        };
        if target.kind.writer() != Writer::Host {
            return false;
        }

        let accepted = match (&mut target.kind, request.action) {
            (EntityKind::Creature(c), EntityAction::Shear) => {
                if c.species == Species::Sheep && c.has_wool {
                    c.has_wool = false;
                    c.regrow_timer = if c.fed {
                        WOOL_REGROW_SECS / 2.0
                    } else {
                        WOOL_REGROW_SECS
                    };
                    drop = Some("wool");
                    true
                } else {
                    false
                }
            }
            (EntityKind::Creature(c), EntityAction::Feed) => {
                if c.species == Species::Sheep && !c.fed {
                    c.fed = true;
                    true
                } else {
                    false
                }
            }
            (EntityKind::Vessel(v), EntityAction::Board) => {
                if v.occupant.is_none() {
                    v.occupant = Some(from);
                    true
                } else {
                    false
                }
            }
            (EntityKind::Vessel(v), EntityAction::Disembark) => {
                if v.occupant == Some(from) {
                    v.occupant = None;
                    v.sail_raised = false;
                    true
                } else {
                    false
                }
            }
            (EntityKind::Vessel(v), EntityAction::RaiseSail | EntityAction::LowerSail) => {
                if v.occupant == Some(from) {
                    v.sail_raised = request.action == EntityAction::RaiseSail;
                    true
                } else {
                    false
                }
            }
            (EntityKind::DroppedItem(_), EntityAction::PickUp) => {
                pick_up = true;
                true
            }
            _ => false,
        };

        if !accepted {
            debug!(
                "rejected {:?} on {} from {}",
                request.action, request.target_id, from
            );
            return false;
        }
        if pick_up {
            entities.remove_owned(request.target_id);
        }
        if let Some(item) = drop {
            let id = entities.mint_id();
            entities.insert_owned(SimulatedEntity::dropped_item(
                id,
                target_pos,
                item,
                config.dropped_item_lifetime,
            ));
        }
        true
    }

    /// Route host-originated damage to an avatar: applied in place for the
    /// host's own avatar, sent as `damage-applied` to anyone else.
    pub fn apply_avatar_damage(&mut self, entities: &mut EntityDirectory, peer: PeerId, amount: i32) {
        if !self.is_host() || amount <= 0 {
            return;
        }
        if peer == self.local {
            self.damage_local_avatar(entities, amount);
        } else {
            self.outbox.push(Outbound::to(
                peer,
                Message::DamageApplied(DamageApplied { amount }),
            ));
        }
    }

    fn damage_local_avatar(&mut self, entities: &mut EntityDirectory, amount: i32) {
        if let Some(avatar) = entities.owned_mut(EntityId::avatar_of(self.local)) {
            avatar.health -= amount;
            let health = avatar.health;
            self.notices.push(Notice::AvatarDamaged { amount, health });
        }
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    /// Apply one inbound message. Never blocks and never replies
    /// synchronously; anything to send goes to the outbox.
    pub fn handle_message(
        &mut self,
        world: &mut WorldState,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        from: PeerId,
        message: Message,
    ) {
        if from == self.local {
            return;
        }
        if message.is_host_only() && from != self.host {
            warn!("dropping {} from non-host {}", message.kind(), from);
            return;
        }

        match message {
            Message::JoinAnnounce(m) => {
                // Only peers the transport reported as joined.
                let Some(info) = self.peers.get_mut(&from) else {
                    debug!("ignoring join-announce from departed {}", from);
                    return;
                };
                info.display_name = Some(m.display_name.clone());
                self.notices.push(Notice::PeerAnnounced {
                    peer: from,
                    display_name: m.display_name,
                });
            }
            Message::WorldSnapshot(m) => self.apply_world_snapshot(world, entities, m),
            Message::AvatarState(s) => self.apply_avatar_state(entities, config, from, &s),
            Message::MutationCommit(commit) => self.apply_commit(world, &commit),
            Message::EntitySnapshot(snapshot) => {
                if self.is_host() {
                    return;
                }
                let removed = entities.apply_entity_snapshot(&snapshot, config.snap_distance);
                if removed > 0 {
                    debug!("entity snapshot removed {} shadows", removed);
                }
                world.sync_environment(snapshot.clock, snapshot.wind);
            }
            Message::DamageApplied(d) => {
                if d.amount > 0 {
                    self.damage_local_avatar(entities, d.amount);
                }
            }
            Message::MutationRequest(request) => {
                self.process_mutation(world, entities, config, from, &request);
            }
            Message::EntityRequest(request) => {
                self.process_entity_request(entities, config, from, &request);
            }
            Message::EntityHitReport(report) => {
                self.process_entity_hit(entities, config, from, &report);
            }
        }
    }

    fn apply_world_snapshot(
        &mut self,
        world: &mut WorldState,
        entities: &mut EntityDirectory,
        message: WorldSnapshotMsg,
    ) {
        if self.is_host() {
            return;
        }
        let snapshot = WorldSnapshot::from(message);
        match world.import_snapshot(&snapshot) {
            Ok(()) => {
                self.initialized = true;
                self.pending.clear();
                let spawn = world.spawn().center();
                if let Some(avatar) = entities.owned_mut(EntityId::avatar_of(self.local)) {
                    avatar.position = spawn;
                }
                info!(
                    "world snapshot applied (seed {}, {} overlay entries)",
                    world.seed(),
                    world.overlay_len()
                );
                self.notices.push(Notice::WorldLoaded { seed: world.seed() });
            }
            Err(e) => {
                warn!("rejected world snapshot: {}", e);
                self.notices.push(Notice::SnapshotRejected(e.to_string()));
            }
        }
    }

    fn apply_commit(&mut self, world: &mut WorldState, commit: &MutationCommit) {
        if self.is_host() || !self.initialized {
            return;
        }
        let c = commit.coord();
        match commit.action {
            CommitAction::Set => world.set_tile(c, commit.id),
            CommitAction::Hit => {
                // A hit for a tile we no longer hold is stale; the set that
                // replaced it already cleared the ledger.
                if world.get_tile(c) == commit.id {
                    world.record_damage(c, commit.total.unwrap_or(0));
                }
            }
        }
        self.pending.remove(&c);
    }

    fn apply_avatar_state(
        &mut self,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        from: PeerId,
        state: &AvatarState,
    ) {
        if !(state.x.is_finite() && state.y.is_finite()) {
            return;
        }
        // A state still in flight when its peer left must not bring the
        // avatar back.
        if !self.peers.contains_key(&from) {
            debug!("ignoring avatar-state from departed {}", from);
            return;
        }
        let name = self.display_name(from).unwrap_or("").to_string();
        let entity = SimulatedEntity::from_avatar_state(from, &name, state);
        entities.upsert_shadow(entity, config.snap_distance);
    }
}

/// Host-side rules for a tile mutation. Never errors; the outcome is a plain
/// yes or no.
///
/// - build: the current tile must accept the proposal (liquid only takes
///   amphibious pieces) and a solid proposal must not land on an actor.
/// - damage: positive, capped amount against a tile that can be destroyed.
/// - remove: only player-placed structures.
pub fn validate_mutation(
    world: &WorldState,
    entities: &EntityDirectory,
    config: &SessionConfig,
    request: &MutationRequest,
) -> bool {
    let c = request.coord();
    let current = world.get_tile(c);
    match request.action {
        RequestAction::Build => {
            let Some(proposed) = request.proposed_id else {
                return false;
            };
            current.accepts(proposed) && !(proposed.is_solid() && entities.is_occupied(c))
        }
        RequestAction::Damage => {
            matches!(request.amount, Some(a) if a > 0 && a <= config.max_hit)
                && current.destruction_threshold().is_some()
        }
        RequestAction::Remove => current.is_placeable() && world.overlay_entry(c) == Some(current),
    }
}
