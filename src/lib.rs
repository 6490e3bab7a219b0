//! # Arena Sync Server
//!
//! Authoritative state server for real-time multiplayer arena matches.
//! Clients connect over WebSocket, join a session, and every state change
//! in that session is fanned out to all of its players.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ARENA SYNC SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Shared primitives                       │
//! │  └── id.rs         - Random alphanumeric identifiers         │
//! │                                                              │
//! │  game/             - World model                             │
//! │  └── state.rs      - Players, bullets, xp items and areas    │
//! │                                                              │
//! │  network/          - Transport and routing                   │
//! │  ├── protocol.rs   - Client and server message types         │
//! │  ├── session.rs    - Session registry and guards             │
//! │  ├── connection.rs - Connection registry and outbound queues │
//! │  ├── broadcast.rs  - Per-session fan-out                     │
//! │  ├── dispatch.rs   - Admission, messages and disconnects     │
//! │  └── server.rs     - WebSocket server                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Each session owns one guard over its entire world. A mutation and the
//! broadcast it triggers happen while that guard is held, so every client
//! in a session observes updates in the same order. Sessions never share
//! a guard.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::state::{PlayerId, SessionId, WorldConfig, WorldState};
pub use network::{Dispatcher, GameServer, GameServerError, ServerConfig, SessionManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
