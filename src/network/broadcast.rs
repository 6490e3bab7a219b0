//! Session Fan-out
//!
//! Delivers one payload to every connection whose player is in a session.
//! Called with the session guard held; delivery only enqueues, so a slow
//! reader cannot stall the session.

use tracing::warn;

use crate::game::state::WorldState;
use crate::network::connection::{ConnectionId, ConnectionRegistry};
use crate::network::protocol::Payload;

/// Result of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the payload was queued for.
    pub delivered: usize,
    /// Connections removed because delivery failed.
    pub evicted: Vec<ConnectionId>,
}

/// Queue `payload` for every registered connection whose player exists in
/// `world`. Connections that cannot accept it are evicted; the rest still
/// receive it.
pub async fn broadcast(
    connections: &ConnectionRegistry,
    world: &WorldState,
    payload: Payload,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for (connection_id, entry) in connections.members(&world.id).await {
        if !world.players.contains_key(&entry.player_id) {
            continue;
        }

        match entry.handle.deliver(payload.clone()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(
                    "Delivery to {} (player {}) failed: {}",
                    connection_id, entry.player_id, e
                );
                report.evicted.push(connection_id);
            }
        }
    }

    for connection_id in &report.evicted {
        connections.evict(connection_id).await;
    }

    report
}
