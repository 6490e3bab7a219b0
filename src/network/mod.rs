//! Network Layer
//!
//! WebSocket transport, session registry and message routing.
//! All world mutation goes through a session's guard; see `dispatch`.

pub mod broadcast;
pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::{broadcast, BroadcastReport};
pub use connection::{
    ConnectionEntry, ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryError,
};
pub use dispatch::{Admission, DispatchOutcome, Dispatcher};
pub use protocol::{BulletSpawn, ClientMessage, Payload, ProtocolError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{Session, SessionConfig, SessionManager};
