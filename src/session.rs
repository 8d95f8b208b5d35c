//! `Session` – the explicit context object one peer runs.
//!
//! A session owns this peer's world replica, its entity directory, the
//! authority protocol state and the broadcast tickers. Nothing is global:
//! every system gets the handles it needs passed in by [`Session::tick`].
//!
//! ## SimulationTick
//!
//! 1. Drain inbound events queued by [`Session::receive`].
//! 2. Advance the environment (host only).
//! 3. Run owned-actor logic (host only) and move the local avatar.
//! 4. Submit queued local intents through the authority protocol.
//! 5. Fire due broadcasts: entity snapshot (host) and avatar state.
//! 6. Reconcile: step shadow interpolation, clean up dead actors, respawn.

use crate::actors::{cleanup_dead, ActorSystem};
use crate::authority::{AuthorityProtocol, Notice, PendingMutation};
use crate::entity::{EntityDirectory, EntityKind, SimulatedEntity, AVATAR_MAX_HEALTH};
use crate::error::{ProtocolError, SnapshotError};
use crate::protocol::{
    EntityAction, EntityHitReport, EntityRequest, Envelope, Message, MutationRequest, Outbound,
    Target,
};
use crate::ticker::Ticker;
use crate::tile::TileId;
use crate::transport::{Transport, TransportEvent};
use crate::types::{Coord, EntityId, PeerId, SessionConfig, Vec2};
use crate::world::WorldState;
use bytes::Bytes;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::Path;

/// A local player intent, queued until the next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Mutation(MutationRequest),
    Entity(EntityRequest),
    HitEntity(EntityHitReport),
}

#[derive(Debug, Clone, PartialEq)]
enum Inbound {
    Joined(PeerId),
    Left(PeerId),
    Message { from: PeerId, message: Message },
}

pub struct Session {
    name: String,
    config: SessionConfig,
    world: WorldState,
    entities: EntityDirectory,
    authority: AuthorityProtocol,
    actors: Option<ActorSystem>,
    inbound: VecDeque<Inbound>,
    intents: VecDeque<Intent>,
    entity_ticker: Ticker,
    avatar_ticker: Ticker,
    frame: u64,
}

impl Session {
    /// Start a session as its host with a freshly generated world.
    pub fn host(name: impl Into<String>, config: SessionConfig, local: PeerId) -> Self {
        let world = WorldState::create(&config);
        Self::host_with_world(name, config, local, world)
    }

    /// Start a session as its host over an existing (e.g. loaded) world.
    pub fn host_with_world(
        name: impl Into<String>,
        config: SessionConfig,
        local: PeerId,
        mut world: WorldState,
    ) -> Self {
        let name = name.into();
        world.ensure_walkable_spawn(config.spawn_search_radius);
        info!(
            "hosting session '{}' as {} (seed {}, spawn {})",
            name,
            local,
            world.seed(),
            world.spawn()
        );
        let actors = Some(ActorSystem::new(world.seed()));
        let mut session = Self::assemble(name, config, world, AuthorityProtocol::new_host(local), actors);
        session.place_local_avatar();
        session
    }

    /// Join `host`'s session. The world stays a placeholder until the host's
    /// snapshot arrives.
    pub fn guest(
        name: impl Into<String>,
        config: SessionConfig,
        local: PeerId,
        host: PeerId,
    ) -> Self {
        let name = name.into();
        info!("joining session '{}' as {} (host {})", name, local, host);
        let world = WorldState::new(config.seed);
        let mut session = Self::assemble(
            name,
            config,
            world,
            AuthorityProtocol::new_guest(local, host),
            None,
        );
        session.place_local_avatar();
        session
    }

    fn assemble(
        name: String,
        config: SessionConfig,
        world: WorldState,
        authority: AuthorityProtocol,
        actors: Option<ActorSystem>,
    ) -> Self {
        Self {
            entity_ticker: Ticker::new(config.entity_broadcast_interval),
            avatar_ticker: Ticker::new(config.avatar_broadcast_interval),
            name,
            config,
            world,
            entities: EntityDirectory::new(),
            authority,
            actors,
            inbound: VecDeque::new(),
            intents: VecDeque::new(),
            frame: 0,
        }
    }

    fn place_local_avatar(&mut self) {
        let local = self.authority.local_peer();
        let avatar = SimulatedEntity::avatar(
            local,
            self.config.display_name.clone(),
            self.world.spawn().center(),
        );
        self.entities.insert_owned(avatar);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn entities(&self) -> &EntityDirectory {
        &self.entities
    }

    pub fn authority(&self) -> &AuthorityProtocol {
        &self.authority
    }

    pub fn local_peer(&self) -> PeerId {
        self.authority.local_peer()
    }

    pub fn is_host(&self) -> bool {
        self.authority.is_host()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn digest(&self) -> String {
        self.world.digest()
    }

    pub fn local_avatar(&self) -> Option<&SimulatedEntity> {
        self.entities.owned(EntityId::avatar_of(self.local_peer()))
    }

    pub fn pending_request(&self, c: Coord) -> Option<&PendingMutation> {
        self.authority.pending_request(c)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.authority.take_notices()
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    pub fn submit(&mut self, intent: Intent) {
        self.intents.push_back(intent);
    }

    pub fn build(&mut self, c: Coord, tile: TileId) {
        self.submit(Intent::Mutation(MutationRequest::build(c, tile)));
    }

    pub fn damage_tile(&mut self, c: Coord, amount: i32) {
        self.submit(Intent::Mutation(MutationRequest::damage(c, amount)));
    }

    pub fn remove_tile(&mut self, c: Coord) {
        self.submit(Intent::Mutation(MutationRequest::remove(c)));
    }

    pub fn interact(&mut self, target_id: EntityId, action: EntityAction) {
        self.submit(Intent::Entity(EntityRequest { target_id, action }));
    }

    pub fn hit_entity(&mut self, target_id: EntityId, amount: i32) {
        self.submit(Intent::HitEntity(EntityHitReport { target_id, amount }));
    }

    /// Set the local avatar's walking direction. Zero stops it.
    pub fn set_movement(&mut self, direction: Vec2) {
        if let Some(EntityKind::Avatar(a)) = self.local_avatar_kind_mut() {
            a.intent = direction;
        }
    }

    pub fn set_held_melee(&mut self, item: Option<String>) {
        if let Some(EntityKind::Avatar(a)) = self.local_avatar_kind_mut() {
            a.held_melee = item;
        }
    }

    fn local_avatar_kind_mut(&mut self) -> Option<&mut EntityKind> {
        let id = EntityId::avatar_of(self.local_peer());
        self.entities.owned_mut(id).map(|e| &mut e.kind)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Queue a transport event for the next tick. Undecodable payloads and
    /// traffic for another session are dropped here.
    pub fn receive(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerJoined(peer) => self.inbound.push_back(Inbound::Joined(peer)),
            TransportEvent::PeerLeft(peer) => self.inbound.push_back(Inbound::Left(peer)),
            TransportEvent::Message {
                from,
                channel,
                payload,
            } => match Envelope::decode(&channel, &payload) {
                Ok(envelope) if envelope.session == self.name => {
                    self.inbound.push_back(Inbound::Message {
                        from,
                        message: envelope.message,
                    });
                }
                Ok(envelope) => {
                    debug!("ignoring traffic for session '{}'", envelope.session);
                }
                Err(e) => warn!("dropping message from {}: {}", from, e),
            },
        }
    }

    /// Queue an already decoded message.
    pub fn receive_message(&mut self, from: PeerId, message: Message) {
        self.inbound.push_back(Inbound::Message { from, message });
    }

    // -----------------------------------------------------------------------
    // SimulationTick
    // -----------------------------------------------------------------------

    /// Run one simulation step of `dt` seconds and return everything that
    /// should go out on the transport.
    pub fn tick(&mut self, dt: f32) -> Vec<Outbound> {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.frame += 1;

        // 1. inbound
        while let Some(inbound) = self.inbound.pop_front() {
            match inbound {
                Inbound::Joined(peer) => {
                    self.authority
                        .on_peer_joined(&self.world, peer, &self.config.display_name);
                    if self.is_host() {
                        self.entity_ticker.trigger();
                    }
                    self.avatar_ticker.trigger();
                }
                Inbound::Left(peer) => self.authority.on_peer_left(&mut self.entities, peer),
                Inbound::Message { from, message } => self.authority.handle_message(
                    &mut self.world,
                    &mut self.entities,
                    &self.config,
                    from,
                    message,
                ),
            }
        }

        // 2. environment
        if self.is_host() {
            self.world.advance_environment(dt, &self.config);
        }

        // 3. owned actors and local avatar
        if let Some(actors) = self.actors.as_mut() {
            let hits = actors.step(&self.world, &mut self.entities, &self.config, dt);
            for hit in hits {
                self.authority
                    .apply_avatar_damage(&mut self.entities, hit.peer, hit.amount);
            }
        }
        self.sync_vessel_seat();
        self.move_local_avatar(dt);

        // 4. local intents
        while let Some(intent) = self.intents.pop_front() {
            match intent {
                Intent::Mutation(request) => self.authority.submit_mutation(
                    &mut self.world,
                    &mut self.entities,
                    &self.config,
                    request,
                ),
                Intent::Entity(request) => {
                    self.authority
                        .submit_entity_request(&mut self.entities, &self.config, request)
                }
                Intent::HitEntity(report) => {
                    self.authority
                        .submit_entity_hit(&mut self.entities, &self.config, report)
                }
            }
        }

        // 5. broadcasts
        if self.is_host() && self.entity_ticker.advance(dt) {
            let mut snapshot = self
                .entities
                .build_entity_snapshot(self.world.clock(), self.world.wind());
            snapshot.seq = self.frame;
            self.authority
                .push(Outbound::broadcast(Message::EntitySnapshot(snapshot)));
        }
        if self.avatar_ticker.advance(dt) && self.authority.is_initialized() {
            if let Some(state) = self.local_avatar().and_then(SimulatedEntity::avatar_state) {
                self.authority
                    .push(Outbound::broadcast(Message::AvatarState(state)));
            }
        }

        // 6. reconcile
        self.entities.step_shadows(self.config.smoothing_rate, dt);
        if self.is_host() {
            let removed = cleanup_dead(&mut self.entities, &self.config);
            if removed > 0 {
                debug!("cleaned up {} dead actors", removed);
            }
        }
        self.respawn_if_dead();
        self.authority.age_pending(dt);

        self.authority.take_outbox()
    }

    /// Keep the local avatar's `in_vessel` in line with what the host says
    /// about vessel occupancy.
    fn sync_vessel_seat(&mut self) {
        let local = self.local_peer();
        let seat = self
            .entities
            .owned_entities()
            .chain(self.entities.shadows().map(|s| &s.entity))
            .find(|e| matches!(&e.kind, EntityKind::Vessel(v) if v.occupant == Some(local)))
            .map(|e| e.id);
        if let Some(EntityKind::Avatar(a)) = self.local_avatar_kind_mut() {
            a.in_vessel = seat;
        }
    }

    fn move_local_avatar(&mut self, dt: f32) {
        let id = EntityId::avatar_of(self.local_peer());
        let vessel_position = match self.local_avatar().map(|e| &e.kind) {
            Some(EntityKind::Avatar(a)) => a.in_vessel.and_then(|v| {
                self.entities
                    .owned(v)
                    .map(|e| e.position)
                    .or_else(|| self.entities.shadow(v).map(|s| s.displayed()))
            }),
            _ => return,
        };
        let speed = self.config.avatar_speed;
        let world = &self.world;
        let Some(avatar) = self.entities.owned_mut(id) else {
            return;
        };
        let EntityKind::Avatar(a) = &mut avatar.kind else {
            return;
        };

        if let Some(pos) = vessel_position {
            avatar.position = pos;
            a.is_moving = false;
            return;
        }

        let direction = a.intent.normalized();
        a.is_moving = direction != Vec2::zero();
        if !a.is_moving {
            return;
        }
        a.heading = direction.y.atan2(direction.x);
        let next = avatar.position + direction * (speed * dt);
        if world.is_walkable(Coord::containing(next)) {
            avatar.position = next;
        }
    }

    fn respawn_if_dead(&mut self) {
        let spawn = self.world.spawn().center();
        let id = EntityId::avatar_of(self.local_peer());
        let Some(avatar) = self.entities.owned_mut(id) else {
            return;
        };
        if avatar.health > 0 {
            return;
        }
        avatar.position = spawn;
        avatar.health = AVATAR_MAX_HEALTH;
        if let EntityKind::Avatar(a) = &mut avatar.kind {
            a.in_vessel = None;
            a.is_moving = false;
        }
        info!("{} respawned at {}", self.local_peer(), spawn);
        self.authority.notify(Notice::Respawned);
        self.avatar_ticker.trigger();
    }

    // -----------------------------------------------------------------------
    // Transport glue
    // -----------------------------------------------------------------------

    pub fn encode(&self, outbound: &Outbound) -> Result<Bytes, ProtocolError> {
        Envelope::new(self.name.clone(), self.frame, outbound.message.clone()).encode()
    }

    /// Encode and send `outbound`. Failures are logged and swallowed; to the
    /// protocol a failed send is just another lost message. Returns how many
    /// messages were handed to the transport.
    pub fn flush(&self, transport: &dyn Transport, outbound: Vec<Outbound>) -> usize {
        let mut sent = 0;
        for out in outbound {
            let channel = out.message.channel();
            let payload = match self.encode(&out) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("failed to encode {}: {}", out.message.kind(), e);
                    continue;
                }
            };
            let result = match out.target {
                Target::Broadcast => transport.broadcast(channel, payload),
                Target::Peer(peer) => transport.send(peer, channel, payload),
            };
            match result {
                Ok(()) => sent += 1,
                Err(e) => warn!("failed to send {} on {}: {}", out.message.kind(), channel, e),
            }
        }
        sent
    }

    /// Poll `transport`, run one tick and send the results.
    pub fn pump(&mut self, transport: &dyn Transport, dt: f32) -> usize {
        for event in transport.poll() {
            self.receive(event);
        }
        let outbound = self.tick(dt);
        self.flush(transport, outbound)
    }

    /// Host only: push the full world to `peer` on the next tick's outbox.
    pub fn resync(&mut self, peer: PeerId) {
        self.authority.send_world_snapshot(&self.world, peer);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Persist the world. A failure is also surfaced as a notice.
    pub fn save_world(&mut self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let result = self.world.export_snapshot().save(path.as_ref());
        match &result {
            Ok(()) => info!("world saved to {}", path.as_ref().display()),
            Err(e) => {
                warn!("saving world failed: {}", e);
                self.authority.notify(Notice::PersistenceFailed(e.to_string()));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_starts_with_avatar_at_spawn() {
        let s = Session::host("t", SessionConfig::default(), PeerId(1));
        let avatar = s.local_avatar().unwrap();
        assert_eq!(avatar.position, s.world().spawn().center());
        assert!(s.world().is_walkable(s.world().spawn()));
    }

    #[test]
    fn guest_does_not_broadcast_before_the_world_arrives() {
        let mut s = Session::guest("t", SessionConfig::default(), PeerId(2), PeerId(1));
        let out = s.tick(0.5);
        assert!(out
            .iter()
            .all(|o| !matches!(o.message, Message::AvatarState(_))));
    }

    #[test]
    fn host_broadcasts_avatar_and_entities_on_schedule() {
        let config = SessionConfig {
            creature_cap: 0,
            ..Default::default()
        };
        let mut s = Session::host("t", config, PeerId(1));
        let out = s.tick(0.0);
        assert!(out.iter().any(|o| matches!(o.message, Message::EntitySnapshot(_))));
        assert!(out.iter().any(|o| matches!(o.message, Message::AvatarState(_))));

        let out = s.tick(0.05);
        assert!(out.is_empty());
    }

    #[test]
    fn foreign_session_traffic_is_ignored() {
        let mut host = Session::host("a", SessionConfig::default(), PeerId(1));
        let other = Session::host("b", SessionConfig::default(), PeerId(3));
        let msg = Outbound::broadcast(Message::MutationRequest(MutationRequest::remove(Coord::new(0, 0))));
        let payload = other.encode(&msg).unwrap();
        host.receive(TransportEvent::Message {
            from: PeerId(3),
            channel: msg.message.channel().to_string(),
            payload,
        });
        assert!(host.inbound.is_empty());
    }

    #[test]
    fn dead_avatar_respawns_at_spawn() {
        let mut s = Session::host("t", SessionConfig::default(), PeerId(1));
        let id = EntityId::avatar_of(PeerId(1));
        let avatar = s.entities.owned_mut(id).unwrap();
        avatar.position = Vec2::new(500.0, 500.0);
        avatar.health = -3;

        s.tick(0.01);
        let avatar = s.local_avatar().unwrap();
        assert_eq!(avatar.health, AVATAR_MAX_HEALTH);
        assert_eq!(avatar.position, s.world().spawn().center());
        assert!(s.take_notices().contains(&Notice::Respawned));
    }
}
