//! Bus integration – PeerBusAgent drives one [`Session`] over a [`Transport`].
//!
//! ## Loop
//!
//! Every tick the agent, holding the session lock only for the duration of
//! the step:
//!
//! 1. polls the transport and feeds every event to [`Session::receive`],
//! 2. runs [`Session::tick`] with the measured frame time,
//! 3. encodes the outbound messages and sends them.
//!
//! Encode and send failures are logged and swallowed: to the protocol a
//! failed send is indistinguishable from a lost message.
//!
//! The loop ends on SIGINT or, when configured, after a fixed duration.

use crate::session::Session;
use crate::transport::Transport;
use anyhow::{Context, Result};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

// ---------------------------------------------------------------------------
// Config for PeerBusAgent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PeerBusConfig {
    /// Tick rate in Hz.
    pub tick_rate_hz: f32,
    /// Stop after this long. `None` runs until SIGINT.
    pub run_for: Option<Duration>,
}

impl Default for PeerBusConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30.0,
            run_for: None,
        }
    }
}

/// What a finished agent did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub sent: u64,
}

// ---------------------------------------------------------------------------
// PeerBusAgent
// ---------------------------------------------------------------------------

/// Wraps a [`Session`] and drives it from transport events.
///
/// Call [`PeerBusAgent::run`] inside a Tokio task to start the agent. The
/// agent stays usable afterwards, e.g. for a few synchronous
/// [`PeerBusAgent::step`] calls to let in-flight traffic settle.
pub struct PeerBusAgent<T: Transport> {
    config: PeerBusConfig,
    session: Arc<Mutex<Session>>,
    transport: T,
}

impl<T: Transport> PeerBusAgent<T> {
    pub fn new(config: PeerBusConfig, session: Arc<Mutex<Session>>, transport: T) -> Self {
        Self {
            config,
            session,
            transport,
        }
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        self.session.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One poll / tick / send cycle. Returns the number of messages sent.
    pub fn step(&self, dt: f32) -> usize {
        let mut session = self.session.lock();
        session.pump(&self.transport, dt)
    }

    /// Run the tick loop until SIGINT or the configured duration elapses.
    pub async fn run(&self) -> Result<RunSummary> {
        let peer = self.transport.local_peer();
        let span = tracing::info_span!("peer", %peer);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&self) -> Result<RunSummary> {
        let hz = if self.config.tick_rate_hz > 0.0 {
            self.config.tick_rate_hz
        } else {
            30.0
        };
        let period = Duration::from_secs_f32(1.0 / hz);
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let deadline = self.config.run_for.map(|d| started + d);
        let mut last = started;
        let mut summary = RunSummary::default();

        info!(
            "PeerBusAgent active as {} – ticking at {:.0}Hz",
            self.transport.local_peer(),
            hz
        );

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                res = &mut shutdown => {
                    res.context("failed to listen for shutdown signal")?;
                    info!("PeerBusAgent shutting down (SIGINT)");
                    break;
                }
            }

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;

            summary.sent += self.step(dt) as u64;
            summary.ticks += 1;

            if deadline.is_some_and(|d| now >= d) {
                break;
            }
        }

        info!(
            "PeerBusAgent stopped after {} ticks ({} messages sent)",
            summary.ticks, summary.sent
        );
        Ok(summary)
    }
}
