//! Shared World Core
//!
//! Host-authoritative replication of a procedurally generated, player-mutable
//! tile world between a small group of peers.
//!
//! ## Architecture
//!
//! ```text
//! PeerBusAgent  (bus.rs, feature `runtime`)
//!   └── Session  (session.rs)            ← SimulationTick, intents, notices
//!         ├── AuthorityProtocol  (authority.rs)  ← validate → commit → broadcast
//!         ├── WorldState  (world.rs)             ← overlay + damage ledger + environment
//!         │     └── ProceduralTerrain  (terrain.rs)
//!         ├── EntityDirectory  (entity.rs)       ← owned actors + smoothed shadows
//!         └── ActorSystem  (actors.rs)           ← host-only creature / vessel logic
//! ```
//!
//! Terrain is never transmitted: every peer regenerates it from the seed and
//! only the sparse overlay of player changes crosses the wire. The host is
//! the single writer of overlay and ledger; guests submit requests and mirror
//! the commits the host broadcasts.

pub mod actors;
pub mod authority;
pub mod entity;
pub mod error;
pub mod interpolation;
pub mod protocol;
pub mod rng;
pub mod session;
pub mod snapshot;
pub mod terrain;
pub mod ticker;
pub mod tile;
pub mod transport;
pub mod types;
pub mod world;

// The tokio agent requires the `runtime` feature.
#[cfg(feature = "runtime")]
pub mod bus;

#[cfg(feature = "runtime")]
pub use bus::{PeerBusAgent, PeerBusConfig};
pub use authority::{AuthorityProtocol, Notice, Role};
pub use entity::{EntityDirectory, EntityKind, SimulatedEntity, Species};
pub use error::{CoordKeyError, ProtocolError, SnapshotError, TransportError, UnknownTile};
pub use protocol::{Envelope, Message, Outbound, Target};
pub use session::{Intent, Session};
pub use snapshot::WorldSnapshot;
pub use terrain::{ProceduralTerrain, TerrainSource};
pub use tile::TileId;
pub use transport::{LocalHub, LocalTransport, Transport, TransportEvent};
pub use types::{Coord, EntityId, PeerId, SessionConfig, Vec2};
pub use world::{Wind, WorldState};
