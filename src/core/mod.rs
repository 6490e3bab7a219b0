//! Core Primitives
//!
//! Building blocks shared by the game state and network layers.

pub mod id;

pub use id::{fresh_id, random_id};
