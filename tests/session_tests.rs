//! Session tests: peers replicating over an in-process hub

#[cfg(test)]
mod tests {
    use shared_world::entity::EntityDirectory;
    use shared_world::{
        Coord, EntityId, LocalHub, LocalTransport, Message, Notice, PeerId, Session,
        SessionConfig, SimulatedEntity, Species, TileId, Transport, TransportEvent, Vec2,
        WorldSnapshot, WorldState,
    };

    const DT: f32 = 0.05;

    struct Net {
        hub: LocalHub,
        host: (Session, LocalTransport),
        guests: Vec<(Session, LocalTransport)>,
    }

    impl Net {
        fn new(guests: usize) -> Self {
            let hub = LocalHub::new();
            let host_transport = hub.connect();
            let host_peer = host_transport.local_peer();
            let host = Session::host("test", SessionConfig::default(), host_peer);

            let guests = (0..guests)
                .map(|_| {
                    let transport = hub.connect();
                    let session = Session::guest(
                        "test",
                        SessionConfig::default(),
                        transport.local_peer(),
                        host_peer,
                    );
                    (session, transport)
                })
                .collect();

            Self {
                hub,
                host: (host, host_transport),
                guests,
            }
        }

        fn run(&mut self, ticks: usize) {
            for _ in 0..ticks {
                self.host.0.pump(&self.host.1, DT);
                for (session, transport) in &mut self.guests {
                    session.pump(&*transport, DT);
                }
            }
        }
    }

    fn open_ground(session: &Session) -> Coord {
        let world = session.world();
        let spawn = world.spawn();
        (2..64)
            .map(|dx| Coord::new(spawn.x + dx, spawn.y))
            .chain((2..64).map(|dy| Coord::new(spawn.x, spawn.y + dy)))
            .find(|c| world.get_tile(*c).is_buildable_ground())
            .expect("buildable ground near spawn")
    }

    // -----------------------------------------------------------------------
    // Replication
    // -----------------------------------------------------------------------

    #[test]
    fn guests_receive_the_host_world_on_join() {
        let mut net = Net::new(2);
        net.run(4);

        let host_digest = net.host.0.digest();
        for (guest, _) in &mut net.guests {
            assert!(guest.authority().is_initialized());
            assert_eq!(guest.digest(), host_digest);
            assert!(guest
                .take_notices()
                .iter()
                .any(|n| matches!(n, Notice::WorldLoaded { .. })));
        }
    }

    #[test]
    fn guest_build_reaches_every_peer() {
        let mut net = Net::new(2);
        net.run(4);

        let c = open_ground(&net.host.0);
        net.guests[0].0.build(c, TileId::Floor);
        net.run(6);

        assert_eq!(net.host.0.world().get_tile(c), TileId::Floor);
        for (guest, _) in &net.guests {
            assert_eq!(guest.world().get_tile(c), TileId::Floor);
            assert_eq!(guest.digest(), net.host.0.digest());
            assert!(guest.pending_request(c).is_none());
        }
    }

    #[test]
    fn host_build_and_damage_converge() {
        let mut net = Net::new(1);
        net.run(4);

        let c = open_ground(&net.host.0);
        net.host.0.build(c, TileId::WoodWall);
        net.run(1);
        net.host.0.damage_tile(c, 20);
        net.run(4);

        let (guest, _) = &net.guests[0];
        assert_eq!(guest.world().get_tile(c), TileId::WoodWall);
        assert_eq!(guest.world().ledger_total(c), 20);
        assert_eq!(guest.digest(), net.host.0.digest());
    }

    #[test]
    fn rejected_guest_request_leaves_everyone_unchanged() {
        let mut net = Net::new(1);
        net.run(4);
        let before = net.host.0.digest();

        // Bare ground is not a placed structure.
        let c = open_ground(&net.host.0);
        net.guests[0].0.remove_tile(c);
        net.run(6);

        assert_eq!(net.host.0.digest(), before);
        assert_eq!(net.guests[0].0.digest(), before);
        assert!(net.guests[0].0.pending_request(c).is_some());
    }

    #[test]
    fn traffic_for_another_session_is_ignored() {
        let hub = LocalHub::new();
        let host_transport = hub.connect();
        let mut host = Session::host("alpha", SessionConfig::default(), host_transport.local_peer());
        let guest_transport = hub.connect();
        let mut guest = Session::guest(
            "beta",
            SessionConfig::default(),
            guest_transport.local_peer(),
            host_transport.local_peer(),
        );

        for _ in 0..4 {
            host.pump(&host_transport, DT);
            guest.pump(&guest_transport, DT);
        }
        assert!(!guest.authority().is_initialized());
    }

    // -----------------------------------------------------------------------
    // Avatars and shadows
    // -----------------------------------------------------------------------

    #[test]
    fn peers_see_each_others_avatars() {
        let mut net = Net::new(1);
        net.run(6);

        let host_peer = net.host.0.local_peer();
        let guest_peer = net.guests[0].0.local_peer();
        assert!(net.host.0.entities().shadow(EntityId::avatar_of(guest_peer)).is_some());
        assert!(net.guests[0]
            .0
            .entities()
            .shadow(EntityId::avatar_of(host_peer))
            .is_some());
    }

    #[test]
    fn entity_snapshot_deletes_unlisted_shadows() {
        let mut host = EntityDirectory::new();
        let mut guest = EntityDirectory::new();
        let sheep = host.mint_id();
        let wolf = host.mint_id();
        host.insert_owned(SimulatedEntity::creature(sheep, Species::Sheep, Vec2::new(1.0, 1.0), 0.0));
        host.insert_owned(SimulatedEntity::creature(wolf, Species::Wolf, Vec2::new(3.0, 1.0), 0.0));

        let wind = Default::default();
        guest.apply_entity_snapshot(&host.build_entity_snapshot(0.1, wind), 4.0);
        assert_eq!(guest.shadow_len(), 2);

        host.remove_owned(wolf);
        let removed = guest.apply_entity_snapshot(&host.build_entity_snapshot(0.2, wind), 4.0);
        assert_eq!(removed, 1);
        assert!(guest.shadow(wolf).is_none());
        assert!(guest.shadow(sheep).is_some());
    }

    #[test]
    fn shadows_glide_toward_reports_without_overshoot() {
        let mut guest = EntityDirectory::new();
        let id = EntityId(7);
        guest.upsert_shadow(SimulatedEntity::creature(id, Species::Sheep, Vec2::zero(), 0.0), 4.0);

        let snapped = guest.upsert_shadow(
            SimulatedEntity::creature(id, Species::Sheep, Vec2::new(2.0, 0.0), 0.0),
            4.0,
        );
        assert!(!snapped);

        let mut last = 0.0;
        for _ in 0..60 {
            guest.step_shadows(10.0, DT);
            let x = guest.shadow(id).unwrap().displayed().x;
            assert!(x >= last);
            assert!(x <= 2.0);
            last = x;
        }
        assert!((last - 2.0).abs() < 0.01);
    }

    #[test]
    fn distant_report_snaps() {
        let mut guest = EntityDirectory::new();
        let id = EntityId(9);
        guest.upsert_shadow(SimulatedEntity::creature(id, Species::Wolf, Vec2::zero(), 0.0), 4.0);

        let far = Vec2::new(10.0, 0.0);
        assert!(guest.upsert_shadow(SimulatedEntity::creature(id, Species::Wolf, far, 0.0), 4.0));
        assert_eq!(guest.shadow(id).unwrap().displayed(), far);
    }

    // -----------------------------------------------------------------------
    // Departures
    // -----------------------------------------------------------------------

    #[test]
    fn losing_the_host_ends_authority() {
        let mut net = Net::new(1);
        net.run(4);

        let host_peer = net.host.0.local_peer();
        net.hub.disconnect(host_peer);
        let (guest, transport) = &mut net.guests[0];
        guest.pump(&*transport, DT);

        assert!(guest.authority().authority_lost());
        assert!(guest
            .take_notices()
            .iter()
            .any(|n| matches!(n, Notice::AuthorityLost(p) if *p == host_peer)));
    }

    #[test]
    fn departing_guest_avatar_is_removed() {
        let mut net = Net::new(2);
        net.run(6);

        let (_, leaving) = net.guests.pop().unwrap();
        let gone = EntityId::avatar_of(leaving.local_peer());
        drop(leaving);
        net.run(2);

        assert!(net.host.0.entities().shadow(gone).is_none());
        assert!(net.guests[0].0.entities().shadow(gone).is_none());
    }

    #[test]
    fn late_avatar_state_does_not_revive_a_departed_peer() {
        let config = SessionConfig {
            creature_cap: 0,
            ..Default::default()
        };
        let mut host = Session::host("test", config, PeerId(1));
        let guest = PeerId(2);
        let state = || {
            Message::AvatarState(
                SimulatedEntity::avatar(guest, "g", Vec2::new(4.0, 4.0))
                    .avatar_state()
                    .unwrap(),
            )
        };

        host.receive(TransportEvent::PeerJoined(guest));
        host.receive_message(guest, state());
        host.tick(DT);
        assert!(host.entities().shadow(EntityId::avatar_of(guest)).is_some());

        host.receive(TransportEvent::PeerLeft(guest));
        host.receive_message(guest, state());
        host.tick(DT);
        host.tick(DT);

        assert!(host.entities().shadow(EntityId::avatar_of(guest)).is_none());
        assert_eq!(host.entities().avatars().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Loaded worlds
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_without_spawn_still_places_the_avatar_on_land() {
        let snapshot =
            WorldSnapshot::from_json(r#"{"seed":0,"overlay":{},"ledger":{},"clock":0}"#).unwrap();
        let world = WorldState::from_snapshot(&snapshot).unwrap();
        let host = Session::host_with_world("test", SessionConfig::default(), PeerId(1), world);

        let spawn = host.world().spawn();
        assert!(host.world().is_walkable(spawn));
        assert_eq!(host.local_avatar().unwrap().position, spawn.center());
    }

    #[test]
    fn guests_inherit_the_repaired_spawn() {
        let snapshot =
            WorldSnapshot::from_json(r#"{"seed":0,"overlay":{},"ledger":{},"clock":0}"#).unwrap();
        let world = WorldState::from_snapshot(&snapshot).unwrap();
        let hub = LocalHub::new();
        let host_transport = hub.connect();
        let mut host = Session::host_with_world(
            "test",
            SessionConfig::default(),
            host_transport.local_peer(),
            world,
        );
        let guest_transport = hub.connect();
        let mut guest = Session::guest(
            "test",
            SessionConfig::default(),
            guest_transport.local_peer(),
            host_transport.local_peer(),
        );

        for _ in 0..4 {
            host.pump(&host_transport, DT);
            guest.pump(&guest_transport, DT);
        }
        assert_eq!(guest.world().spawn(), host.world().spawn());
        assert!(guest.world().is_walkable(guest.world().spawn()));
    }

    // -----------------------------------------------------------------------
    // Bus agent
    // -----------------------------------------------------------------------

    #[cfg(feature = "runtime")]
    #[test]
    fn bus_agent_runs_for_the_configured_duration() {
        use parking_lot::Mutex;
        use shared_world::{PeerBusAgent, PeerBusConfig};
        use std::sync::Arc;
        use std::time::Duration;

        let hub = LocalHub::new();
        let transport = hub.connect();
        let session = Session::host("bus", SessionConfig::default(), transport.local_peer());
        let agent = PeerBusAgent::new(
            PeerBusConfig {
                tick_rate_hz: 50.0,
                run_for: Some(Duration::from_millis(100)),
            },
            Arc::new(Mutex::new(session)),
            transport,
        );

        let summary = tokio_test::block_on(agent.run()).unwrap();
        assert!(summary.ticks >= 2);
        assert!(agent.session().lock().frame() >= summary.ticks);
    }
}
