//! Game Logic
//!
//! Authoritative world state for a single arena match. Positions and angles
//! are client-authoritative: the server stores and relays what clients report.

pub mod state;

pub use state::{
    Bullet, EntityId, PlayerId, PlayerState, SessionId, WorldConfig, WorldState, XpArea, XpItem,
};
