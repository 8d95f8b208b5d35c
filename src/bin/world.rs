//! shared-world-sim binary
//!
//! Runs one host and N guests over an in-process [`LocalHub`] for a fixed
//! duration, with scripted guest intents, then reports whether every peer
//! converged on the same world.
//!
//! ## Configuration (TOML via `--config`, then `SHARED_WORLD_*` env, then flags)
//!
//! | Key                                      | Default | Description                       |
//! |------------------------------------------|---------|-----------------------------------|
//! | `SHARED_WORLD_SEED`                      | `42`    | Terrain seed                      |
//! | `SHARED_WORLD_ENTITY_BROADCAST_INTERVAL` | `0.25`  | Seconds between entity snapshots  |
//! | `SHARED_WORLD_AVATAR_BROADCAST_INTERVAL` | `0.1`   | Seconds between avatar states     |
//! | `SHARED_WORLD_SMOOTHING_RATE`            | `10.0`  | Shadow smoothing rate (1/s)       |
//! | `SHARED_WORLD_SNAP_DISTANCE`             | `4.0`   | Snap threshold in tiles           |
//! | `SHARED_WORLD_CREATURE_CAP`              | `24`    | Live creature limit               |
//! | `SHARED_WORLD_DEFAULT_SPAWN__X` / `__Y`  | `0`     | Spawn search origin               |
//!
//! Every other [`SessionConfig`] field is accepted the same way.

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use shared_world::{
    bus::{PeerBusAgent, PeerBusConfig},
    Coord, LocalHub, LocalTransport, Notice, Session, SessionConfig, TileId, Transport,
    Vec2, WorldSnapshot, WorldState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "shared-world-sim", about = "Shared world replication simulator", version)]
struct Args {
    /// Optional TOML file with `SessionConfig` fields
    #[arg(long, env = "SHARED_WORLD_CONFIG")]
    config: Option<PathBuf>,

    /// Session name
    #[arg(long, env = "SHARED_WORLD_SESSION", default_value = "demo")]
    session: String,

    /// Number of guest peers
    #[arg(long, env = "SHARED_WORLD_GUESTS", default_value_t = 2)]
    guests: usize,

    /// Simulated run time in seconds
    #[arg(long, env = "SHARED_WORLD_SECONDS", default_value_t = 10.0)]
    seconds: f32,

    /// Tick rate (Hz)
    #[arg(long, env = "SHARED_WORLD_TICK_RATE_HZ", default_value_t = 30.0)]
    tick_rate_hz: f32,

    /// Fraction of messages the hub drops
    #[arg(long, env = "SHARED_WORLD_LOSS", default_value_t = 0.0)]
    loss: f32,

    /// Seed for the hub's loss pattern
    #[arg(long, env = "SHARED_WORLD_HUB_SEED", default_value_t = 7)]
    hub_seed: u64,

    /// Terrain seed (overrides the config file)
    #[arg(long)]
    seed: Option<u64>,

    /// Load the host world from this snapshot file
    #[arg(long)]
    load: Option<PathBuf>,

    /// Save the host world to this snapshot file when done
    #[arg(long)]
    save: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shared_world=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_ref())?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    log::info!(
        "Starting shared-world-sim (session='{}', seed={}, guests={}, loss={:.2})",
        args.session,
        config.seed,
        args.guests,
        args.loss,
    );

    let hub = LocalHub::with_loss(0.0, args.hub_seed);
    let bus_config = PeerBusConfig {
        tick_rate_hz: args.tick_rate_hz,
        run_for: Some(Duration::from_secs_f32(args.seconds.max(0.0))),
    };

    // Host
    let host_transport = hub.connect();
    let host_peer = host_transport.local_peer();
    let world = initial_world(&config, args.load.as_ref());
    let host_config = SessionConfig {
        display_name: "host".into(),
        ..config.clone()
    };
    let host = Arc::new(PeerBusAgent::new(
        bus_config.clone(),
        Arc::new(Mutex::new(Session::host_with_world(
            args.session.clone(),
            host_config,
            host_peer,
            world,
        ))),
        host_transport,
    ));

    // Guests
    let mut guests = Vec::with_capacity(args.guests);
    for i in 0..args.guests {
        let transport = hub.connect();
        let guest_config = SessionConfig {
            display_name: format!("guest-{}", i + 1),
            ..config.clone()
        };
        let session = Session::guest(
            args.session.clone(),
            guest_config,
            transport.local_peer(),
            host_peer,
        );
        guests.push(Arc::new(PeerBusAgent::new(
            bus_config.clone(),
            Arc::new(Mutex::new(session)),
            transport,
        )));
    }

    hub.set_loss_rate(args.loss);

    // Run until every agent's deadline passes
    let mut handles = Vec::new();
    for agent in std::iter::once(&host).chain(guests.iter()) {
        let agent = agent.clone();
        handles.push(tokio::spawn(async move { agent.run().await }));
    }
    for (i, guest) in guests.iter().enumerate() {
        tokio::spawn(script_guest(guest.session(), i as i32));
    }
    for handle in handles {
        handle.await.context("agent task panicked")??;
    }

    // Let in-flight traffic settle, then resync anyone who missed commits
    hub.set_loss_rate(0.0);
    settle(&host, &guests);
    let host_digest = host.session().lock().digest();
    for guest in &guests {
        let peer = guest.transport().local_peer();
        if guest.session().lock().digest() != host_digest {
            log::warn!("{} diverged; resending world snapshot", peer);
            host.session().lock().resync(peer);
        }
    }
    settle(&host, &guests);

    // Report
    let host_digest = report(&host);
    let mut converged = true;
    for guest in &guests {
        converged &= report(guest) == host_digest;
    }
    let stats = hub.stats();
    log::info!(
        "hub delivered {} messages, dropped {}",
        stats.delivered,
        stats.dropped
    );
    if converged {
        log::info!("all {} peers converged on {}", guests.len() + 1, host_digest);
    } else {
        log::warn!("peers did not converge");
    }

    if let Some(path) = args.save.as_ref() {
        if host.session().lock().save_world(path).is_err() {
            log::warn!("world was not saved");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Built-in defaults, then the optional TOML file, then `SHARED_WORLD_*`.
fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    builder
        .add_source(
            config::Environment::with_prefix("SHARED_WORLD")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("invalid configuration")
}

/// The loaded world when `--load` succeeds; a fresh one otherwise.
fn initial_world(config: &SessionConfig, load: Option<&PathBuf>) -> WorldState {
    let Some(path) = load else {
        return WorldState::create(config);
    };
    match WorldSnapshot::load(path).and_then(|s| WorldState::from_snapshot(&s)) {
        Ok(world) => {
            log::info!(
                "loaded world from {} ({} overlay entries)",
                path.display(),
                world.overlay_len()
            );
            world
        }
        Err(e) => {
            log::warn!("could not load {}: {}; generating a fresh world", path.display(), e);
            WorldState::create(config)
        }
    }
}

/// Scripted player: walk a little, then build a short wall next to the
/// avatar and knock part of it down again.
async fn script_guest(session: Arc<Mutex<Session>>, index: i32) {
    let mut placed: Vec<Coord> = Vec::new();
    let mut timer = tokio::time::interval(Duration::from_millis(500));
    for step in 0..12 {
        timer.tick().await;
        let mut s = session.lock();
        if !s.authority().is_initialized() {
            continue;
        }
        let Some(origin) = s.local_avatar().map(|a| a.tile()) else {
            return;
        };
        match step % 3 {
            0 => s.set_movement(Vec2::from_heading(index as f32)),
            1 => {
                s.set_movement(Vec2::zero());
                let c = Coord::new(origin.x + 2, origin.y + index);
                s.build(c, TileId::WoodWall);
                placed.push(c);
            }
            _ => {
                if let Some(c) = placed.first() {
                    s.damage_tile(*c, 20);
                }
            }
        }
        for notice in s.take_notices() {
            if let Notice::AuthorityLost(host) = notice {
                log::error!("guest {} lost its host {}", index + 1, host);
                return;
            }
        }
    }
}

fn settle(host: &PeerBusAgent<LocalTransport>, guests: &[Arc<PeerBusAgent<LocalTransport>>]) {
    for _ in 0..20 {
        host.step(0.05);
        for guest in guests {
            guest.step(0.05);
        }
    }
}

fn report(agent: &PeerBusAgent<LocalTransport>) -> String {
    let session = agent.session();
    let s = session.lock();
    let digest = s.digest();
    log::info!(
        "{} {}: digest {} ({} overlay, {} ledger, {} entities)",
        if s.is_host() { "host" } else { "guest" },
        s.local_peer(),
        digest,
        s.world().overlay_len(),
        s.world().ledger_len(),
        s.entities().owned_len() + s.entities().shadow_len(),
    );
    digest
}
