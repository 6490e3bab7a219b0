//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by its `type` field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::game::state::{EntityId, PlayerId, WorldState};

/// Serialized outbound message, shared between all recipients of a fan-out.
pub type Payload = Arc<str>;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// Decoding checks field presence and value types. Tags the server does not
/// know decode to [`ClientMessage::Unknown`] so they can be ignored without
/// being treated as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Client-reported position and facing.
    #[serde(rename = "move")]
    Move {
        /// Player being moved.
        id: PlayerId,
        /// Position X.
        x: f64,
        /// Position Y.
        y: f64,
        /// Facing angle.
        angle: f64,
    },

    /// A bullet was fired.
    #[serde(rename = "shoot")]
    Shoot {
        /// Shooter.
        id: PlayerId,
        /// Initial bullet kinematics.
        bullet: BulletSpawn,
    },

    /// A client picked up an xp item.
    #[serde(rename = "orbCollected")]
    OrbCollected {
        /// Xp item that was collected.
        id: EntityId,
    },

    /// Any tag not listed above.
    #[serde(other)]
    Unknown,
}

/// Bullet kinematics carried by a shoot message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BulletSpawn {
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
    /// Velocity X.
    pub vx: f64,
    /// Velocity Y.
    pub vy: f64,
}

/// Inbound decode failure.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, wrong shape, missing field or wrong value type.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode an inbound text frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Move { .. } => "move",
            ClientMessage::Shoot { .. } => "shoot",
            ClientMessage::OrbCollected { .. } => "orbCollected",
            ClientMessage::Unknown => "unknown",
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages originated by the server.
///
/// `move` and `shoot` are relayed verbatim and have no
/// variant here.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage<'a> {
    /// Identity assignment, sent once on admission.
    #[serde(rename = "id")]
    Id {
        /// Assigned player id.
        id: &'a str,
        /// Session the player joined.
        session: &'a str,
    },

    /// Full snapshot of a session.
    #[serde(rename = "sessionState")]
    SessionState {
        /// The whole world state.
        session: &'a WorldState,
    },
}

impl ServerMessage<'_> {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize into a shareable payload.
    pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        self.to_json().map(Payload::from)
    }
}
