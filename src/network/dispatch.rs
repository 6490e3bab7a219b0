//! Message Dispatcher
//!
//! Per-connection protocol: admission, inbound command handling and
//! disconnect cleanup. Every command runs under the session's exclusive
//! guard and is followed by a fan-out to the session.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::game::state::PlayerId;
use crate::network::broadcast::broadcast;
use crate::network::connection::{
    ConnectionEntry, ConnectionHandle, ConnectionId, ConnectionRegistry,
};
use crate::network::protocol::{ClientMessage, Payload, ServerMessage};
use crate::network::session::{Session, SessionManager};

/// An admitted connection.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Registry key of the connection.
    pub connection_id: ConnectionId,
    /// Player created for the connection.
    pub player_id: PlayerId,
    /// Session the player joined.
    pub session: Arc<Session>,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// State changed and the session was notified.
    Applied,
    /// Well-formed but had no effect (unknown tag or unknown player).
    Ignored,
    /// Could not be decoded.
    Discarded,
}

/// Routes connection events to sessions.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    connections: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over shared registries.
    pub fn new(sessions: Arc<SessionManager>, connections: Arc<ConnectionRegistry>) -> Self {
        Self { sessions, connections }
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Admit a connection into the session named by `requested` (or a new
    /// one).
    ///
    /// Creates the player, registers the connection and queues the `id` and
    /// `sessionState` messages, all under the session guard so the snapshot
    /// reflects the state at admission.
    pub async fn admit(&self, requested: Option<&str>, handle: ConnectionHandle) -> Admission {
        loop {
            let session = self.sessions.resolve(requested).await;
            let mut world = session.write().await;

            // Reaped between lookup and lock; look it up again.
            if world.is_retired() {
                drop(world);
                continue;
            }

            let player_id = world.spawn_player(&mut rand::thread_rng());
            let connection_id = Uuid::new_v4();

            self.connections
                .register(connection_id, ConnectionEntry {
                    player_id: player_id.clone(),
                    session_id: world.id.clone(),
                    handle: handle.clone(),
                })
                .await;

            let identity = ServerMessage::Id { id: &player_id, session: &world.id };
            let snapshot = ServerMessage::SessionState { session: &*world };
            for message in [identity, snapshot] {
                match message.to_payload() {
                    Ok(payload) => {
                        if let Err(e) = handle.deliver(payload) {
                            debug!("Admission message to {} not queued: {}", player_id, e);
                        }
                    }
                    Err(e) => error!("Failed to serialize admission message: {}", e),
                }
            }

            info!(
                "Player {} joined session {} ({} players)",
                player_id,
                world.id,
                world.player_count()
            );
            drop(world);

            return Admission {
                connection_id,
                player_id,
                session,
            };
        }
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&self, admission: &Admission, text: &str) -> DispatchOutcome {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Discarding message from {}: {}", admission.player_id, e);
                return DispatchOutcome::Discarded;
            }
        };

        let mut world = admission.session.write().await;

        let payload = match &message {
            ClientMessage::Move { id, x, y, angle } => {
                if !world.apply_move(id, *x, *y, *angle) {
                    debug!("Move for unknown player {} ignored", id);
                    return DispatchOutcome::Ignored;
                }
                Payload::from(text)
            }
            ClientMessage::Shoot { id, bullet } => {
                world.spawn_bullet(
                    id,
                    bullet.x,
                    bullet.y,
                    bullet.vx,
                    bullet.vy,
                    &mut rand::thread_rng(),
                );
                Payload::from(text)
            }
            ClientMessage::OrbCollected { id } => {
                world.collect_orb(id, &mut rand::thread_rng());
                match (ServerMessage::SessionState { session: &*world }).to_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to serialize session {}: {}", world.id, e);
                        return DispatchOutcome::Applied;
                    }
                }
            }
            ClientMessage::Unknown => {
                debug!("Unknown message type from {}", admission.player_id);
                return DispatchOutcome::Ignored;
            }
        };

        let report = broadcast(&self.connections, &world, payload).await;
        debug!(
            "{} from {} fanned out to {} connections",
            message.kind(),
            admission.player_id,
            report.delivered
        );

        DispatchOutcome::Applied
    }

    /// Remove a closed connection and its player.
    ///
    /// No departure message is sent; other clients see the player vanish in
    /// the next snapshot.
    pub async fn disconnect(&self, admission: Admission) {
        let mut world = admission.session.write().await;
        self.connections.unregister(&admission.connection_id).await;
        world.remove_player(&admission.player_id);
        info!(
            "Player {} left session {} ({} players)",
            admission.player_id,
            world.id,
            world.player_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::session::SessionConfig;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(SessionManager::new(SessionConfig::default())),
            Arc::new(ConnectionRegistry::new()),
        )
    }

    async fn connect(
        dispatcher: &Dispatcher,
        session: Option<&str>,
    ) -> (Admission, mpsc::Receiver<Payload>) {
        let (handle, mut rx) = ConnectionHandle::channel(64);
        let admission = dispatcher.admit(session, handle).await;
        // Drop the admission messages.
        rx.try_recv().unwrap();
        rx.try_recv().unwrap();
        (admission, rx)
    }

    fn parse(payload: &Payload) -> Value {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn test_admission_sequence() {
        let dispatcher = dispatcher();
        let (handle, mut rx) = ConnectionHandle::channel(8);

        let admission = dispatcher.admit(None, handle).await;

        let id_msg = parse(&rx.try_recv().unwrap());
        assert_eq!(id_msg["type"], "id");
        assert_eq!(id_msg["id"], admission.player_id.as_str());
        assert_eq!(id_msg["session"], admission.session.id());

        let state_msg = parse(&rx.try_recv().unwrap());
        assert_eq!(state_msg["type"], "sessionState");
        let session = &state_msg["session"];
        assert_eq!(session["players"].as_object().unwrap().len(), 1);
        assert!(session["players"].get(&admission.player_id).is_some());
        assert_eq!(session["xpItems"].as_object().unwrap().len(), 20);
        assert_eq!(session["xpAreas"].as_object().unwrap().len(), 3);
        assert_eq!(
            *session,
            serde_json::to_value(&*admission.session.read().await).unwrap()
        );

        assert!(rx.try_recv().is_err());
        assert!(dispatcher.connections().contains(&admission.connection_id).await);
    }

    #[tokio::test]
    async fn test_rejoin_by_session_id() {
        let dispatcher = dispatcher();
        let (first, _rx1) = connect(&dispatcher, None).await;
        let (second, _rx2) = connect(&dispatcher, Some(first.session.id())).await;

        assert!(Arc::ptr_eq(&first.session, &second.session));
        assert_eq!(first.session.read().await.player_count(), 2);
        assert_eq!(dispatcher.sessions().session_count().await, 1);
    }

    #[tokio::test]
    async fn test_move_is_relayed_verbatim() {
        let dispatcher = dispatcher();
        let (a, mut rx_a) = connect(&dispatcher, Some("room")).await;
        let (_b, mut rx_b) = connect(&dispatcher, Some("room")).await;
        let (_c, mut rx_c) = connect(&dispatcher, Some("elsewhere")).await;

        let text = format!(
            r#"{{"type":"move","id":"{}","x":12.5,"y":7,"angle":0.5,"note":"kept"}}"#,
            a.player_id
        );
        assert_eq!(dispatcher.handle_text(&a, &text).await, DispatchOutcome::Applied);

        assert_eq!(&*rx_a.try_recv().unwrap(), text);
        assert_eq!(&*rx_b.try_recv().unwrap(), text);
        assert!(rx_c.try_recv().is_err());

        let world = a.session.read().await;
        let player = &world.players[&a.player_id];
        assert_eq!((player.x, player.y, player.angle), (12.5, 7.0, 0.5));
    }

    #[tokio::test]
    async fn test_move_for_unknown_player_is_ignored() {
        let dispatcher = dispatcher();
        let (a, mut rx_a) = connect(&dispatcher, Some("room")).await;
        let before = a.session.read().await.players.clone();

        let text = r#"{"type":"move","id":"ghost","x":1,"y":2,"angle":3}"#;
        assert_eq!(dispatcher.handle_text(&a, text).await, DispatchOutcome::Ignored);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(a.session.read().await.players, before);
    }

    #[tokio::test]
    async fn test_shoot_spawns_bullet_and_relays() {
        let dispatcher = dispatcher();
        let (a, mut rx_a) = connect(&dispatcher, Some("room")).await;
        let (_b, mut rx_b) = connect(&dispatcher, Some("room")).await;

        let text = format!(
            r#"{{"type":"shoot","id":"{}","bullet":{{"x":1,"y":2,"vx":3,"vy":4}}}}"#,
            a.player_id
        );
        assert_eq!(dispatcher.handle_text(&a, &text).await, DispatchOutcome::Applied);

        assert_eq!(&*rx_a.try_recv().unwrap(), text);
        assert_eq!(&*rx_b.try_recv().unwrap(), text);

        let world = a.session.read().await;
        assert_eq!(world.bullets.len(), 1);
        let bullet = world.bullets.values().next().unwrap();
        assert_eq!(bullet.owner, a.player_id);
        assert_eq!((bullet.x, bullet.y, bullet.vx, bullet.vy), (1.0, 2.0, 3.0, 4.0));
        assert_eq!(bullet.dist, 0.0);
    }

    #[tokio::test]
    async fn test_orb_collected_broadcasts_snapshot() {
        let dispatcher = dispatcher();
        let (a, mut rx_a) = connect(&dispatcher, Some("room")).await;
        let (_b, mut rx_b) = connect(&dispatcher, Some("room")).await;

        let (orb_id, before): (String, Vec<String>) = {
            let world = a.session.read().await;
            (
                world.xp_items.keys().next().cloned().unwrap(),
                world.xp_items.keys().cloned().collect(),
            )
        };

        let text = format!(r#"{{"type":"orbCollected","id":"{}"}}"#, orb_id);
        assert_eq!(dispatcher.handle_text(&a, &text).await, DispatchOutcome::Applied);

        let world = a.session.read().await;
        assert_eq!(world.xp_items.len(), 20);
        assert!(!world.xp_items.contains_key(&orb_id));
        let fresh: Vec<_> = world.xp_items.keys().filter(|k| !before.contains(k)).collect();
        assert_eq!(fresh.len(), 1);
        assert!((20..=80).contains(&world.xp_items[fresh[0]].value));

        let expected = serde_json::to_value(&*world).unwrap();
        for rx in [&mut rx_a, &mut rx_b] {
            let msg = parse(&rx.try_recv().unwrap());
            assert_eq!(msg["type"], "sessionState");
            assert_eq!(msg["session"], expected);
        }
    }

    #[tokio::test]
    async fn test_unknown_orb_still_respawns() {
        let dispatcher = dispatcher();
        let (a, mut rx_a) = connect(&dispatcher, Some("room")).await;

        let text = r#"{"type":"orbCollected","id":"nope"}"#;
        assert_eq!(dispatcher.handle_text(&a, text).await, DispatchOutcome::Applied);

        assert_eq!(a.session.read().await.xp_items.len(), 21);
        assert_eq!(parse(&rx_a.try_recv().unwrap())["type"], "sessionState");
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_leave_state_unchanged() {
        let dispatcher = dispatcher();
        let (a, mut rx_a) = connect(&dispatcher, Some("room")).await;
        let before = serde_json::to_value(&*a.session.read().await).unwrap();

        let cases = [
            ("{not json", DispatchOutcome::Discarded),
            (r#"{"type":"move","id":"x","x":"left","y":0,"angle":0}"#, DispatchOutcome::Discarded),
            (r#"{"type":"shoot","id":"x","bullet":[1,2]}"#, DispatchOutcome::Discarded),
            (r#"{"type":"orbCollected","id":7}"#, DispatchOutcome::Discarded),
            (r#"{"type":"dance","id":"x"}"#, DispatchOutcome::Ignored),
        ];
        for (text, expected) in cases {
            assert_eq!(dispatcher.handle_text(&a, text).await, expected, "{}", text);
        }

        let after = serde_json::to_value(&*a.session.read().await).unwrap();
        assert_eq!(before, after);
        assert!(rx_a.try_recv().is_err());
        assert!(dispatcher.connections().contains(&a.connection_id).await);
    }

    #[tokio::test]
    async fn test_disconnect_removes_player_and_connection() {
        let dispatcher = dispatcher();
        let (a, _rx_a) = connect(&dispatcher, Some("room")).await;
        let (b, mut rx_b) = connect(&dispatcher, Some("room")).await;
        let session = a.session.clone();
        let (a_conn, a_player) = (a.connection_id, a.player_id.clone());

        dispatcher.disconnect(a).await;

        assert!(!dispatcher.connections().contains(&a_conn).await);
        assert!(!session.read().await.players.contains_key(&a_player));
        assert!(rx_b.try_recv().is_err());

        let text = format!(r#"{{"type":"move","id":"{}","x":1,"y":1,"angle":1}}"#, b.player_id);
        dispatcher.handle_text(&b, &text).await;
        assert_eq!(dispatcher.connections().len().await, 1);
    }

    #[tokio::test]
    async fn test_admission_after_reap_uses_live_session() {
        let sessions = Arc::new(SessionManager::new(SessionConfig {
            idle_grace: std::time::Duration::ZERO,
            ..Default::default()
        }));
        let dispatcher = Dispatcher::new(sessions.clone(), Arc::new(ConnectionRegistry::new()));

        let stale = sessions.resolve(Some("room")).await;
        sessions.reap_idle(std::time::Instant::now()).await;
        assert!(stale.read().await.is_retired());

        let (a, _rx) = connect(&dispatcher, Some("room")).await;
        assert!(!Arc::ptr_eq(&stale, &a.session));
        assert!(!a.session.read().await.is_retired());
        assert_eq!(a.session.read().await.player_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moves_and_shots_keep_state_consistent() {
        let dispatcher = dispatcher();
        let (a, mut rx_a) = connect(&dispatcher, Some("stress")).await;
        let (b, mut rx_b) = connect(&dispatcher, Some("stress")).await;

        // Drain continuously so queues never fill.
        let drain_a = tokio::spawn(async move { while rx_a.recv().await.is_some() {} });
        let drain_b = tokio::spawn(async move { while rx_b.recv().await.is_some() {} });

        const ROUNDS: usize = 200;
        let mut tasks = Vec::new();
        for admission in [a.clone(), b.clone()] {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..ROUNDS {
                    let v = i as f64;
                    let mv = format!(
                        r#"{{"type":"move","id":"{}","x":{},"y":{},"angle":{}}}"#,
                        admission.player_id, v, v, v
                    );
                    let shot = format!(
                        r#"{{"type":"shoot","id":"{}","bullet":{{"x":{},"y":{},"vx":{},"vy":{}}}}}"#,
                        admission.player_id, v, v, v, v
                    );
                    dispatcher.handle_text(&admission, &mv).await;
                    dispatcher.handle_text(&admission, &shot).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        {
            let world = a.session.read().await;
            assert_eq!(world.player_count(), 2);
            assert_eq!(world.bullets.len(), 2 * ROUNDS);
            for player in world.players.values() {
                assert_eq!(player.x, player.y);
                assert_eq!(player.y, player.angle);
                assert_eq!(player.x, (ROUNDS - 1) as f64);
            }
            for (key, bullet) in &world.bullets {
                assert_eq!(key, &bullet.id);
                assert_eq!(bullet.x, bullet.y);
                assert_eq!(bullet.vx, bullet.vy);
                assert_eq!(bullet.x, bullet.vx);
            }
        }

        dispatcher.disconnect(a).await;
        dispatcher.disconnect(b).await;
        drain_a.await.unwrap();
        drain_b.await.unwrap();
    }
}
