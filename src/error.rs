//! Error types.
//!
//! Rejected mutation requests are not errors: validation returns a
//! `bool` and a failed request simply never produces a commit.

use crate::types::PeerId;
use std::num::ParseIntError;
use thiserror::Error;

/// A numeric tile id outside the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown tile id {0}")]
pub struct UnknownTile(pub u8);

/// A snapshot key that is not of the form `"x,y"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordKeyError {
    #[error("coordinate key '{0}' is not of the form x,y")]
    NotAPair(String),

    #[error("bad component in coordinate key '{key}': {source}")]
    BadComponent {
        key: String,
        #[source]
        source: ParseIntError,
    },
}

/// A persisted or received world snapshot could not be applied.
///
/// Import is atomic, so any of these leaves the previous state untouched.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SnapshotError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer {0} is disconnected from the hub")]
    Disconnected(PeerId),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message on '{channel}': {source}")]
    Decode {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("message kind '{kind}' does not belong on channel '{channel}'")]
    WrongChannel { kind: &'static str, channel: String },
}
