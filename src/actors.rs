//! Host-side logic for the actors the host owns: creatures, vessels,
//! projectiles and dropped items.
//!
//! Nothing here runs on a guest. Guests only ever see the results through
//! the periodic entity snapshot.

use crate::entity::{EntityDirectory, EntityKind, SimulatedEntity, Species};
use crate::interpolation::{approach_angle, smoothing_factor};
use crate::rng::salted;
use crate::types::{Coord, PeerId, SessionConfig, Vec2};
use crate::world::WorldState;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f32::consts::{PI, TAU};

const SALT_ACTORS: u64 = 0xac7;

pub const WOLF_REACH: f32 = 1.2;
pub const WOLF_ATTACK_INTERVAL: f32 = 1.5;
pub const WOLF_DAMAGE: i32 = 8;
pub const WOLF_SIGHT: f32 = 6.0;

pub const SERPENT_RANGE: f32 = 8.0;
pub const SERPENT_ATTACK_INTERVAL: f32 = 3.0;
pub const SPIT_SPEED: f32 = 6.0;
pub const SPIT_DAMAGE: i32 = 6;

pub const PROJECTILE_HIT_RADIUS: f32 = 0.6;

/// Tiles per second at full wind strength.
pub const SAIL_SPEED: f32 = 2.5;
const SAIL_TURN_RATE: f32 = 0.5;

const SPAWN_INTERVAL: f32 = 2.0;
const SPAWN_MIN_DISTANCE: f32 = 8.0;
const SPAWN_MAX_DISTANCE: f32 = 16.0;

/// Damage a host-owned actor dealt to an avatar. Routed by the authority
/// layer to the avatar's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvatarHit {
    pub peer: PeerId,
    pub amount: i32,
}

#[derive(Debug, Clone)]
pub struct ActorSystem {
    rng: ChaCha8Rng,
    spawn_timer: f32,
}

impl ActorSystem {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(salted(seed, SALT_ACTORS)),
            spawn_timer: 0.0,
        }
    }

    /// Advance every host-owned actor by `dt` seconds and top up the
    /// creature population. Returns the avatar hits produced this step.
    pub fn step(
        &mut self,
        world: &WorldState,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        dt: f32,
    ) -> Vec<AvatarHit> {
        if dt <= 0.0 {
            return Vec::new();
        }
        let avatars = entities.avatars();
        let mut hits = Vec::new();
        let mut spits: Vec<(Vec2, Vec2)> = Vec::new();

        for e in entities.owned_entities_mut() {
            if e.health <= 0 {
                continue;
            }
            match &mut e.kind {
                EntityKind::Avatar(_) => {}
                EntityKind::Creature(c) => {
                    c.attack_cooldown = (c.attack_cooldown - dt).max(0.0);
                    if !c.has_wool && c.species == Species::Sheep {
                        c.regrow_timer -= dt;
                        if c.regrow_timer <= 0.0 {
                            c.has_wool = true;
                            c.fed = false;
                            c.regrow_timer = 0.0;
                        }
                    }

                    let target = nearest(&avatars, e.position);
                    match (c.species, target) {
                        (Species::Wolf, Some((peer, pos, d))) if d <= WOLF_SIGHT => {
                            let toward = pos - e.position;
                            c.heading = toward.y.atan2(toward.x);
                            if d <= WOLF_REACH {
                                if c.attack_cooldown <= 0.0 {
                                    c.attack_cooldown = WOLF_ATTACK_INTERVAL;
                                    hits.push(AvatarHit {
                                        peer,
                                        amount: WOLF_DAMAGE,
                                    });
                                }
                                continue;
                            }
                        }
                        (Species::Serpent, Some((_, pos, d))) if d <= SERPENT_RANGE => {
                            if c.attack_cooldown <= 0.0 {
                                c.attack_cooldown = SERPENT_ATTACK_INTERVAL;
                                let aim = (pos - e.position).normalized();
                                spits.push((e.position, aim * SPIT_SPEED));
                            }
                        }
                        _ => {
                            c.wander_timer -= dt;
                            if c.wander_timer <= 0.0 {
                                c.heading = self.rng.gen_range(0.0..TAU);
                                c.wander_timer = self.rng.gen_range(2.0..5.0);
                            }
                        }
                    }

                    let next = e.position + Vec2::from_heading(c.heading) * (c.species.speed() * dt);
                    if habitable(world, c.species, Coord::containing(next)) {
                        e.position = next;
                    } else {
                        c.heading = (c.heading + PI).rem_euclid(TAU);
                        c.wander_timer = self.rng.gen_range(1.0..3.0);
                    }
                }
                EntityKind::Vessel(v) => {
                    if !v.sail_raised {
                        continue;
                    }
                    let wind = world.wind();
                    v.heading = approach_angle(
                        v.heading,
                        wind.heading,
                        smoothing_factor(SAIL_TURN_RATE, dt),
                    );
                    let next = e.position
                        + Vec2::from_heading(v.heading) * (SAIL_SPEED * wind.strength * dt);
                    if world.get_tile(Coord::containing(next)).is_liquid() {
                        e.position = next;
                    }
                }
                EntityKind::Projectile(p) => {
                    p.ttl -= dt;
                    e.position = e.position + p.velocity * dt;
                    if p.ttl <= 0.0 || world.get_tile(Coord::containing(e.position)).is_solid() {
                        e.health = 0;
                        continue;
                    }
                    if let Some((peer, _, d)) = nearest(&avatars, e.position) {
                        if d <= PROJECTILE_HIT_RADIUS {
                            hits.push(AvatarHit {
                                peer,
                                amount: p.damage,
                            });
                            e.health = 0;
                        }
                    }
                }
                EntityKind::DroppedItem(item) => {
                    item.ttl -= dt;
                    if item.ttl <= 0.0 {
                        e.health = 0;
                    }
                }
            }
        }

        for (from, velocity) in spits {
            let id = entities.mint_id();
            let ttl = SERPENT_RANGE / SPIT_SPEED + 0.5;
            entities.insert_owned(SimulatedEntity::projectile(id, from, velocity, ttl, SPIT_DAMAGE));
        }

        self.spawn_timer -= dt;
        if self.spawn_timer <= 0.0 {
            self.spawn_timer = SPAWN_INTERVAL;
            self.spawn_creature(world, entities, config, &avatars);
        }

        hits
    }

    fn spawn_creature(
        &mut self,
        world: &WorldState,
        entities: &mut EntityDirectory,
        config: &SessionConfig,
        avatars: &[(PeerId, Vec2)],
    ) {
        let live = entities
            .owned_entities()
            .filter(|e| matches!(e.kind, EntityKind::Creature(_)))
            .count();
        if live >= config.creature_cap || avatars.is_empty() {
            return;
        }

        let (_, anchor) = avatars[self.rng.gen_range(0..avatars.len())];
        let angle = self.rng.gen_range(0.0..TAU);
        let distance = self.rng.gen_range(SPAWN_MIN_DISTANCE..SPAWN_MAX_DISTANCE);
        let c = Coord::containing(anchor + Vec2::from_heading(angle) * distance);

        let species = if world.get_tile(c).is_liquid() {
            Species::Serpent
        } else if world.is_walkable(c) {
            if self.rng.gen_bool(0.7) {
                Species::Sheep
            } else {
                Species::Wolf
            }
        } else {
            return;
        };

        let id = entities.mint_id();
        let heading = self.rng.gen_range(0.0..TAU);
        debug!("spawning {:?} {} at {}", species, id, c);
        entities.insert_owned(SimulatedEntity::creature(id, species, c.center(), heading));
    }
}

/// Remove dead host-owned actors. Killed creatures and wrecked vessels leave
/// an item behind. Returns how many entities were removed.
pub fn cleanup_dead(entities: &mut EntityDirectory, config: &SessionConfig) -> usize {
    let dead = entities.remove_dead();
    for e in &dead {
        if let Some(item) = remains(&e.kind) {
            let id = entities.mint_id();
            entities.insert_owned(SimulatedEntity::dropped_item(
                id,
                e.position,
                item,
                config.dropped_item_lifetime,
            ));
        }
    }
    dead.len()
}

fn remains(kind: &EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Creature(c) => Some(match c.species {
            Species::Sheep => "mutton",
            Species::Wolf => "pelt",
            Species::Serpent => "scale",
        }),
        EntityKind::Vessel(_) => Some("wood"),
        EntityKind::Avatar(_) | EntityKind::Projectile(_) | EntityKind::DroppedItem(_) => None,
    }
}

fn habitable(world: &WorldState, species: Species, c: Coord) -> bool {
    if species.is_aquatic() {
        world.get_tile(c).is_liquid()
    } else {
        world.is_walkable(c)
    }
}

fn nearest(avatars: &[(PeerId, Vec2)], from: Vec2) -> Option<(PeerId, Vec2, f32)> {
    avatars
        .iter()
        .map(|(peer, pos)| (*peer, *pos, pos.distance(from)))
        .min_by(|a, b| a.2.total_cmp(&b.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileId;

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            creature_cap: 0,
            ..Default::default()
        }
    }

    #[test]
    fn wolf_bites_adjacent_avatar_on_cooldown() {
        let world = WorldState::new(42);
        let mut entities = EntityDirectory::new();
        let spawn = world.find_spawn(Coord::new(0, 0), 64).center();
        entities.upsert_shadow(SimulatedEntity::avatar(PeerId(2), "g", spawn), 4.0);
        let id = entities.mint_id();
        entities.insert_owned(SimulatedEntity::creature(id, Species::Wolf, spawn, 0.0));

        let mut actors = ActorSystem::new(42);
        let hits = actors.step(&world, &mut entities, &quiet_config(), 0.1);
        assert_eq!(hits, vec![AvatarHit { peer: PeerId(2), amount: WOLF_DAMAGE }]);
        // Cooling down.
        assert!(actors.step(&world, &mut entities, &quiet_config(), 0.1).is_empty());
    }

    #[test]
    fn projectiles_expire_on_solid_tiles() {
        let mut world = WorldState::new(42);
        let mut entities = EntityDirectory::new();
        world.set_tile(Coord::new(3, 0), TileId::StoneWall);
        let id = entities.mint_id();
        entities.insert_owned(SimulatedEntity::projectile(
            id,
            Vec2::new(2.9, 0.5),
            Vec2::new(6.0, 0.0),
            5.0,
            SPIT_DAMAGE,
        ));

        let mut actors = ActorSystem::new(1);
        actors.step(&world, &mut entities, &quiet_config(), 0.1);
        assert_eq!(entities.owned(id).unwrap().health, 0);
        assert_eq!(cleanup_dead(&mut entities, &quiet_config()), 1);
        assert_eq!(entities.owned_len(), 0);
    }

    #[test]
    fn dropped_items_despawn_after_their_lifetime() {
        let world = WorldState::new(42);
        let mut entities = EntityDirectory::new();
        let id = entities.mint_id();
        entities.insert_owned(SimulatedEntity::dropped_item(id, Vec2::zero(), "wood", 1.0));

        let mut actors = ActorSystem::new(1);
        actors.step(&world, &mut entities, &quiet_config(), 0.6);
        cleanup_dead(&mut entities, &quiet_config());
        assert!(entities.owned(id).is_some());
        actors.step(&world, &mut entities, &quiet_config(), 0.6);
        cleanup_dead(&mut entities, &quiet_config());
        assert!(entities.owned(id).is_none());
    }

    #[test]
    fn killed_creatures_leave_remains() {
        let mut entities = EntityDirectory::new();
        let id = entities.mint_id();
        let mut sheep = SimulatedEntity::creature(id, Species::Sheep, Vec2::new(4.0, 4.0), 0.0);
        sheep.health = 0;
        entities.insert_owned(sheep);

        cleanup_dead(&mut entities, &SessionConfig::default());
        let items: Vec<_> = entities.owned_entities().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0].kind, EntityKind::DroppedItem(d) if d.item == "mutton"));
    }

    #[test]
    fn shorn_sheep_regrow_wool() {
        let world = WorldState::new(42);
        let mut entities = EntityDirectory::new();
        let id = entities.mint_id();
        let mut sheep = SimulatedEntity::creature(id, Species::Sheep, Vec2::zero(), 0.0);
        if let EntityKind::Creature(c) = &mut sheep.kind {
            c.has_wool = false;
            c.regrow_timer = 1.0;
        }
        entities.insert_owned(sheep);

        let mut actors = ActorSystem::new(3);
        actors.step(&world, &mut entities, &quiet_config(), 1.5);
        let EntityKind::Creature(c) = &entities.owned(id).unwrap().kind else {
            panic!("not a creature");
        };
        assert!(c.has_wool);
    }

    #[test]
    fn spawning_respects_the_cap_and_is_deterministic() {
        let world = WorldState::new(42);
        let config = SessionConfig {
            creature_cap: 3,
            ..Default::default()
        };
        let spawn = world.find_spawn(Coord::new(0, 0), 64).center();

        let run = || {
            let mut entities = EntityDirectory::new();
            entities.upsert_shadow(SimulatedEntity::avatar(PeerId(2), "g", spawn), 4.0);
            let mut actors = ActorSystem::new(world.seed());
            for _ in 0..600 {
                actors.step(&world, &mut entities, &config, 0.1);
            }
            entities
                .owned_entities()
                .filter(|e| matches!(e.kind, EntityKind::Creature(_)))
                .map(|e| (e.id, e.position))
                .collect::<Vec<_>>()
        };

        let a = run();
        assert!(a.len() <= 3);
        assert_eq!(a, run());
    }
}
