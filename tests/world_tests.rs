//! WorldState and snapshot tests

#[cfg(test)]
mod tests {
    use shared_world::terrain::{ProceduralTerrain, TerrainSource};
    use shared_world::{Coord, SessionConfig, SnapshotError, TileId, WorldSnapshot, WorldState};

    fn sample() -> Vec<Coord> {
        (-10..10)
            .flat_map(|x| (-10..10).map(move |y| Coord::new(x * 3, y * 3)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Overlay and ledger
    // -----------------------------------------------------------------------

    #[test]
    fn untouched_tiles_defer_to_terrain() {
        let world = WorldState::new(42);
        let terrain = ProceduralTerrain::new(42);
        for c in sample() {
            assert_eq!(world.get_tile(c), terrain.tile_at(c));
        }
    }

    #[test]
    fn set_tile_overrides_and_clears_damage() {
        let mut world = WorldState::new(42);
        let c = Coord::new(4, 4);
        world.hit_tile(c, 12);
        world.set_tile(c, TileId::StoneWall);
        assert_eq!(world.get_tile(c), TileId::StoneWall);
        assert_eq!(world.overlay_entry(c), Some(TileId::StoneWall));
        assert_eq!(world.ledger_total(c), 0);
    }

    #[test]
    fn hits_accumulate_until_a_set_resets_them() {
        let mut world = WorldState::new(42);
        let c = Coord::new(1, 2);
        assert_eq!(world.hit_tile(c, 5), 5);
        assert_eq!(world.hit_tile(c, 5), 10);
        world.set_tile(c, TileId::Floor);
        assert_eq!(world.ledger_total(c), 0);
    }

    #[test]
    fn third_hit_crosses_a_threshold_of_fifty() {
        let mut world = WorldState::new(42);
        let c = Coord::new(3, 3);
        world.set_tile(c, TileId::WoodWall);
        let threshold = TileId::WoodWall.destruction_threshold().unwrap();
        assert_eq!(threshold, 50);

        let totals: Vec<i32> = (0..3).map(|_| world.hit_tile(c, 20)).collect();
        assert_eq!(totals, vec![20, 40, 60]);
        assert!(totals[1] < threshold && totals[2] >= threshold);
        // Replacing the tile is the caller's job.
        assert_eq!(world.get_tile(c), TileId::WoodWall);
    }

    #[test]
    fn replaying_a_set_is_idempotent() {
        let mut once = WorldState::new(42);
        let mut twice = WorldState::new(42);
        let c = Coord::new(5, 5);
        once.set_tile(c, TileId::StoneWall);
        twice.set_tile(c, TileId::StoneWall);
        twice.set_tile(c, TileId::StoneWall);
        assert_eq!(once.digest(), twice.digest());
        assert_eq!(twice.overlay_len(), 1);
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    #[test]
    fn export_import_round_trip_preserves_tiles() {
        let mut source = WorldState::new(42);
        source.set_tile(Coord::new(0, 0), TileId::Floor);
        source.set_tile(Coord::new(-3, 6), TileId::Door);
        source.set_tile(Coord::new(9, 9), TileId::Campfire);
        source.hit_tile(Coord::new(9, 9), 10);

        let mut copy = WorldState::new(1);
        copy.import_snapshot(&source.export_snapshot()).unwrap();

        for c in sample() {
            assert_eq!(copy.get_tile(c), source.get_tile(c));
        }
        assert_eq!(copy.ledger_total(Coord::new(9, 9)), 10);
        assert_eq!(copy.digest(), source.digest());
    }

    #[test]
    fn importing_the_documented_snapshot() {
        let snapshot =
            WorldSnapshot::from_json(r#"{"seed":7,"overlay":{"5,5":11},"ledger":{},"clock":0}"#)
                .unwrap();
        let mut world = WorldState::new(99);
        world.import_snapshot(&snapshot).unwrap();

        assert_eq!(world.get_tile(Coord::new(5, 5)), TileId::StoneWall);
        assert_eq!(
            world.get_tile(Coord::new(5, 6)),
            ProceduralTerrain::new(7).tile_at(Coord::new(5, 6))
        );
        assert_eq!(world.seed(), 7);
    }

    #[test]
    fn import_replaces_instead_of_merging() {
        let mut world = WorldState::new(42);
        world.set_tile(Coord::new(1, 1), TileId::Floor);
        world.hit_tile(Coord::new(2, 2), 3);

        let fresh = WorldState::new(42).export_snapshot();
        world.import_snapshot(&fresh).unwrap();
        assert_eq!(world.overlay_len(), 0);
        assert_eq!(world.ledger_len(), 0);
    }

    #[test]
    fn malformed_snapshot_is_rejected_atomically() {
        let mut world = WorldState::new(42);
        world.set_tile(Coord::new(1, 1), TileId::Floor);
        let before = world.digest();

        let mut bad = world.export_snapshot();
        bad.overlay.insert("7,7".into(), TileId::Door);
        bad.overlay.insert("not-a-key".into(), TileId::Door);
        assert!(matches!(
            world.import_snapshot(&bad),
            Err(SnapshotError::Malformed(_))
        ));
        assert_eq!(world.digest(), before);
        assert_eq!(world.get_tile(Coord::new(1, 1)), TileId::Floor);
    }

    #[test]
    fn negative_ledger_and_bad_clock_are_malformed() {
        assert!(WorldSnapshot::from_json(
            r#"{"seed":1,"overlay":{},"ledger":{"1,1":-4},"clock":0}"#
        )
        .is_err());
        assert!(WorldSnapshot::from_json(r#"{"seed":1,"overlay":{},"ledger":{},"clock":1.5}"#)
            .is_err());
        assert!(WorldSnapshot::from_json(r#"{"seed":1,"overlay":{"1,1":99},"ledger":{},"clock":0}"#)
            .is_err());
    }

    #[test]
    fn snapshot_file_round_trip() {
        let mut world = WorldState::new(5);
        world.set_tile(Coord::new(-1, -1), TileId::Bridge);
        let path = std::env::temp_dir().join(format!("shared-world-{}.json", std::process::id()));

        world.export_snapshot().save(&path).unwrap();
        let loaded = WorldState::from_snapshot(&WorldSnapshot::load(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.digest(), world.digest());
        assert_eq!(loaded.get_tile(Coord::new(-1, -1)), TileId::Bridge);
    }

    #[test]
    fn loading_a_missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join("shared-world-does-not-exist.json");
        assert!(matches!(WorldSnapshot::load(path), Err(SnapshotError::Io(_))));
    }

    // -----------------------------------------------------------------------
    // Spawn
    // -----------------------------------------------------------------------

    #[test]
    fn created_world_spawns_on_walkable_ground() {
        let world = WorldState::create(&SessionConfig::default());
        assert!(world.is_walkable(world.spawn()));
    }

    #[test]
    fn exhausted_spawn_search_falls_back_to_origin() {
        let mut world = WorldState::new(42);
        let origin = Coord::new(10, 10);
        world.set_tile(origin, TileId::StoneWall);
        assert_eq!(world.find_spawn(origin, 0), origin);
    }
}
