//! Transport seam between a session and whatever carries its bytes.
//!
//! The session never sees sockets. It sees three kinds of event (a peer
//! joined, a peer left, a message arrived on a named channel) and it hands
//! back encoded payloads addressed to one peer or to everyone.
//!
//! [`LocalHub`] is the in-process implementation used by the simulation
//! binary and by tests. It can drop a deterministic fraction of messages so
//! loss tolerance is testable; join and leave notifications are never lost.

use crate::error::TransportError;
use crate::types::PeerId;
use bytes::Bytes;
use log::{debug, info};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message {
        from: PeerId,
        channel: String,
        payload: Bytes,
    },
}

pub trait Transport: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Deliver to one peer. Delivery is best effort; a lost message is not
    /// an error.
    fn send(&self, to: PeerId, channel: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Deliver to every other connected peer.
    fn broadcast(&self, channel: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Drain everything received since the last poll, in arrival order.
    fn poll(&self) -> Vec<TransportEvent>;
}

// ---------------------------------------------------------------------------
// LocalHub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug)]
struct HubState {
    queues: BTreeMap<PeerId, VecDeque<TransportEvent>>,
    next_peer: u32,
    loss_rate: f32,
    rng: ChaCha8Rng,
    stats: HubStats,
}

impl HubState {
    fn deliver(&mut self, to: PeerId, from: PeerId, channel: &str, payload: Bytes) {
        if self.loss_rate > 0.0 && self.rng.gen::<f32>() < self.loss_rate {
            self.stats.dropped += 1;
            debug!("hub dropped {} -> {} on {}", from, to, channel);
            return;
        }
        if let Some(queue) = self.queues.get_mut(&to) {
            queue.push_back(TransportEvent::Message {
                from,
                channel: channel.to_string(),
                payload,
            });
            self.stats.delivered += 1;
        }
    }
}

/// Shared in-process fan-out. Cloning yields another handle to the same hub.
#[derive(Debug, Clone)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    /// A lossless hub.
    pub fn new() -> Self {
        Self::with_loss(0.0, 0)
    }

    /// A hub that drops roughly `loss_rate` of all messages. The same seed
    /// drops the same messages.
    pub fn with_loss(loss_rate: f32, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                queues: BTreeMap::new(),
                next_peer: 1,
                loss_rate: loss_rate.clamp(0.0, 1.0),
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: HubStats::default(),
            })),
        }
    }

    /// Attach a new peer. Everyone already connected hears about it, and the
    /// newcomer hears about everyone already connected.
    pub fn connect(&self) -> LocalTransport {
        let mut state = self.state.lock();
        let peer = PeerId(state.next_peer);
        state.next_peer += 1;

        let mut queue = VecDeque::new();
        for (existing, q) in state.queues.iter_mut() {
            q.push_back(TransportEvent::PeerJoined(peer));
            queue.push_back(TransportEvent::PeerJoined(*existing));
        }
        state.queues.insert(peer, queue);
        info!("hub: {} connected ({} peers)", peer, state.queues.len());

        LocalTransport {
            peer,
            hub: self.clone(),
        }
    }

    /// Detach `peer`; remaining peers get a leave notification.
    pub fn disconnect(&self, peer: PeerId) {
        let mut state = self.state.lock();
        if state.queues.remove(&peer).is_none() {
            return;
        }
        for q in state.queues.values_mut() {
            q.push_back(TransportEvent::PeerLeft(peer));
        }
        info!("hub: {} disconnected", peer);
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.state.lock().queues.keys().copied().collect()
    }

    pub fn stats(&self) -> HubStats {
        self.state.lock().stats
    }

    pub fn set_loss_rate(&self, loss_rate: f32) {
        self.state.lock().loss_rate = loss_rate.clamp(0.0, 1.0);
    }
}

/// One peer's endpoint on a [`LocalHub`]. Dropping it disconnects the peer.
#[derive(Debug)]
pub struct LocalTransport {
    peer: PeerId,
    hub: LocalHub,
}

impl LocalTransport {
    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }
}

impl Transport for LocalTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn send(&self, to: PeerId, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock();
        if !state.queues.contains_key(&self.peer) {
            return Err(TransportError::Disconnected(self.peer));
        }
        if !state.queues.contains_key(&to) {
            return Err(TransportError::UnknownPeer(to));
        }
        state.deliver(to, self.peer, channel, payload);
        Ok(())
    }

    fn broadcast(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock();
        if !state.queues.contains_key(&self.peer) {
            return Err(TransportError::Disconnected(self.peer));
        }
        let others: Vec<PeerId> = state
            .queues
            .keys()
            .copied()
            .filter(|p| *p != self.peer)
            .collect();
        for to in others {
            state.deliver(to, self.peer, channel, payload.clone());
        }
        Ok(())
    }

    fn poll(&self) -> Vec<TransportEvent> {
        self.hub
            .state
            .lock()
            .queues
            .get_mut(&self.peer)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.hub.disconnect(self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_notifications_go_both_ways() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        assert_eq!(a.poll(), vec![TransportEvent::PeerJoined(b.local_peer())]);
        assert_eq!(b.poll(), vec![TransportEvent::PeerJoined(a.local_peer())]);
    }

    #[test]
    fn broadcast_skips_the_sender() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let c = hub.connect();
        for t in [&a, &b, &c] {
            t.poll();
        }
        a.broadcast("x", Bytes::from_static(b"hi")).unwrap();
        assert!(a.poll().is_empty());
        assert_eq!(b.poll().len(), 1);
        assert_eq!(c.poll().len(), 1);
    }

    #[test]
    fn dropping_a_transport_announces_leave() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        a.poll();
        let gone = b.local_peer();
        drop(b);
        assert_eq!(a.poll(), vec![TransportEvent::PeerLeft(gone)]);
        assert!(matches!(
            a.send(gone, "x", Bytes::new()),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[test]
    fn loss_is_deterministic_per_seed() {
        let run = |seed| {
            let hub = LocalHub::with_loss(0.5, seed);
            let a = hub.connect();
            let b = hub.connect();
            for i in 0..200u32 {
                a.send(b.local_peer(), "x", Bytes::from(i.to_le_bytes().to_vec()))
                    .unwrap();
            }
            let received: Vec<_> = b.poll();
            (hub.stats(), received)
        };
        let (s1, r1) = run(9);
        let (s2, r2) = run(9);
        assert_eq!(s1, s2);
        assert_eq!(r1, r2);
        assert!(s1.dropped > 0 && s1.delivered > 0);
        assert_eq!(s1.dropped + s1.delivered, 200);
    }
}
