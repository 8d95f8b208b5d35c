//! Terrain unit tests

#[cfg(test)]
mod tests {
    use shared_world::terrain::{ProceduralTerrain, TerrainSource};
    use shared_world::{Coord, TileId, WorldState};

    fn sample() -> impl Iterator<Item = Coord> {
        (-40..40).flat_map(|x| (-40..40).map(move |y| Coord::new(x * 7, y * 5)))
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    #[test]
    fn tile_at_is_pure() {
        let t = ProceduralTerrain::new(42);
        for c in sample() {
            assert_eq!(t.tile_at(c), t.tile_at(c));
        }
    }

    #[test]
    fn independent_worlds_agree_on_seed_42() {
        let a = WorldState::new(42);
        let b = WorldState::new(42);
        for c in [Coord::new(0, 0), Coord::new(137, -52)] {
            assert_eq!(a.get_tile(c), b.get_tile(c));
            assert_eq!(a.get_tile(c), ProceduralTerrain::new(42).tile_at(c));
        }
    }

    #[test]
    fn different_seeds_produce_different_terrain() {
        let t1 = ProceduralTerrain::new(1);
        let t2 = ProceduralTerrain::new(999_999);
        // Very unlikely to agree everywhere.
        assert!(sample().any(|c| t1.tile_at(c) != t2.tile_at(c)));
    }

    // -----------------------------------------------------------------------
    // Bands and features
    // -----------------------------------------------------------------------

    #[test]
    fn elevation_stays_in_unit_interval() {
        let t = ProceduralTerrain::new(7);
        for c in sample() {
            let e = t.elevation_at(c);
            assert!((0.0..1.0).contains(&e), "elevation {e} at {c}");
        }
    }

    #[test]
    fn ground_never_carries_features() {
        let t = ProceduralTerrain::new(42);
        for c in sample() {
            assert!(matches!(
                t.ground_at(c),
                TileId::DeepWater | TileId::Water | TileId::Sand | TileId::Grass | TileId::Mountain
            ));
        }
    }

    #[test]
    fn liquid_ground_restores_to_itself() {
        let world = WorldState::new(42);
        for c in sample() {
            if world.get_tile(c).is_liquid() {
                assert_eq!(world.restore_tile(c), world.get_tile(c));
            }
        }
    }
}
