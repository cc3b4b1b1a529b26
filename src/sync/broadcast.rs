//! Broadcast Router
//!
//! Resolves a delta's recipient set from its scope and fans it out over
//! the per-connection outbound queues. The session's sequence number is
//! assigned here, under the session's lock, which is what serializes
//! concurrent mutations into one observable order.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::model::entity::{ConnectionStatus, PlayerId, TeamId, Visibility};
use crate::model::session::Session;
use crate::network::protocol::ServerMessage;
use crate::sync::delta::StateDelta;

/// Recipient set for one broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// One team's member set.
    Team(TeamId),
    /// Every player in the session.
    All,
}

impl Scope {
    /// Scope matching an entity's visibility and owning team.
    pub fn for_visibility(visibility: Visibility, team_id: TeamId) -> Self {
        match visibility {
            Visibility::Team => Scope::Team(team_id),
            Visibility::All => Scope::All,
        }
    }
}

/// Side table of live connections: player id to outbound queue.
///
/// Entities never hold connection handles; the protocol handler
/// registers a sender here at auth and removes it at disconnect, so the
/// model stays I/O-free and the router has one place to look.
#[derive(Default)]
pub struct ConnectionTable {
    inner: RwLock<HashMap<PlayerId, mpsc::Sender<ServerMessage>>>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a player's outbound queue.
    pub async fn register(&self, player_id: PlayerId, sender: mpsc::Sender<ServerMessage>) {
        self.inner.write().await.insert(player_id, sender);
    }

    /// Detach a player's outbound queue.
    pub async fn unregister(&self, player_id: PlayerId) {
        self.inner.write().await.remove(&player_id);
    }

    /// Clone a player's outbound queue, if attached.
    pub async fn sender(&self, player_id: PlayerId) -> Option<mpsc::Sender<ServerMessage>> {
        self.inner.read().await.get(&player_id).cloned()
    }
}

/// Broadcast a delta to the scope's connected players.
///
/// Increments the session's sequence number exactly once, wraps the
/// delta in an envelope, and queues it for every target. Queueing never
/// waits: a full or closed outbound queue is a logged, dropped update,
/// so a stalled client cannot wedge the session lock this call is made
/// under. Individual failures never abort delivery to the other
/// targets. Returns the assigned sequence number.
///
/// The caller must hold the session's write lock (expressed here as
/// `&mut Session`), which is what makes the sequence gap-free.
pub async fn broadcast(
    session: &mut Session,
    connections: &ConnectionTable,
    delta: StateDelta,
    scope: Scope,
) -> u64 {
    session.sequence_number += 1;
    let sequence = session.sequence_number;
    let envelope = delta.into_envelope(session.session_id, sequence);
    let message = ServerMessage::StateDelta { delta: envelope };

    let targets: Vec<PlayerId> = match scope {
        Scope::Team(team_id) => session
            .teams
            .get(&team_id)
            .map(|team| team.players.iter().copied().collect())
            .unwrap_or_default(),
        Scope::All => session.players.keys().copied().collect(),
    };

    let mut delivered = 0usize;
    for player_id in targets {
        let connected = session
            .players
            .get(&player_id)
            .map(|p| p.connection_status == ConnectionStatus::Connected)
            .unwrap_or(false);
        if !connected {
            continue;
        }
        if let Some(sender) = connections.sender(player_id).await {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("dropped delta for {player_id}: {e}"),
            }
        }
    }

    debug!(
        session = %session.session_id,
        sequence,
        delivered,
        "broadcasting delta"
    );
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::Player;
    use crate::model::session::SessionId;
    use crate::sync::delta::EntityKind;
    use serde_json::{json, Map};

    async fn add_connected(
        session: &mut Session,
        connections: &ConnectionTable,
        callsign: &str,
    ) -> (PlayerId, mpsc::Receiver<ServerMessage>) {
        let player = Player::new(callsign.into(), Map::new());
        let player_id = player.player_id;
        session.add_player(player);
        let (tx, rx) = mpsc::channel(16);
        connections.register(player_id, tx).await;
        (player_id, rx)
    }

    fn noop_delta() -> StateDelta {
        let mut delta = StateDelta::new();
        delta.update(EntityKind::Player, "p", json!({"x": 1}));
        delta
    }

    fn sequence_of(msg: &ServerMessage) -> u64 {
        match msg {
            ServerMessage::StateDelta { delta } => delta.sequence_number,
            other => panic!("expected state delta, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sequence_is_gapless() {
        let mut session = Session::new(SessionId::generate());
        let connections = ConnectionTable::new();
        let (_, mut rx) = add_connected(&mut session, &connections, "ghost").await;

        for _ in 0..5 {
            broadcast(&mut session, &connections, noop_delta(), Scope::All).await;
        }

        for expected in 1..=5u64 {
            let msg = rx.try_recv().expect("delta delivered");
            assert_eq!(sequence_of(&msg), expected);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_team_scope_targets_only_that_team() {
        let mut session = Session::new(SessionId::generate());
        let connections = ConnectionTable::new();
        let (alpha_id, mut alpha_rx) = add_connected(&mut session, &connections, "ghost").await;
        let (_, mut bravo_rx) = add_connected(&mut session, &connections, "viper").await;
        let alpha_team = session.players[&alpha_id].team_id.unwrap();

        broadcast(
            &mut session,
            &connections,
            noop_delta(),
            Scope::Team(alpha_team),
        )
        .await;

        assert!(alpha_rx.try_recv().is_ok());
        assert!(bravo_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnected_players_are_skipped() {
        let mut session = Session::new(SessionId::generate());
        let connections = ConnectionTable::new();
        let (gone_id, mut gone_rx) = add_connected(&mut session, &connections, "ghost").await;
        let (_, mut live_rx) = add_connected(&mut session, &connections, "viper").await;

        session.players.get_mut(&gone_id).unwrap().connection_status =
            ConnectionStatus::Disconnected;

        broadcast(&mut session, &connections, noop_delta(), Scope::All).await;

        assert!(live_rx.try_recv().is_ok());
        assert!(gone_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_failure_does_not_block_other_targets() {
        let mut session = Session::new(SessionId::generate());
        let connections = ConnectionTable::new();
        let (_, dead_rx) = add_connected(&mut session, &connections, "ghost").await;
        let (_, mut live_rx) = add_connected(&mut session, &connections, "viper").await;
        drop(dead_rx); // the client vanished without cleanup

        let seq = broadcast(&mut session, &connections, noop_delta(), Scope::All).await;

        assert_eq!(seq, 1);
        assert!(live_rx.try_recv().is_ok());
        // Sequence advanced despite the failed send.
        assert_eq!(session.sequence_number, 1);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_broadcast() {
        let mut session = Session::new(SessionId::generate());
        let connections = ConnectionTable::new();
        let (_, mut live_rx) = add_connected(&mut session, &connections, "viper").await;

        // A stalled client: capacity-one queue, already full, receiver
        // never drained.
        let stalled = Player::new("ghost".into(), Map::new());
        let stalled_id = stalled.player_id;
        session.add_player(stalled);
        let (stalled_tx, _stalled_rx) = mpsc::channel(1);
        stalled_tx
            .try_send(ServerMessage::Pong)
            .expect("queue accepts one message");
        connections.register(stalled_id, stalled_tx).await;

        let seq = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            broadcast(&mut session, &connections, noop_delta(), Scope::All),
        )
        .await
        .expect("broadcast returns without waiting on the full queue");

        assert_eq!(seq, 1);
        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_team_scope_still_advances_sequence() {
        let mut session = Session::new(SessionId::generate());
        let connections = ConnectionTable::new();
        let seq = broadcast(
            &mut session,
            &connections,
            noop_delta(),
            Scope::Team(TeamId::generate()),
        )
        .await;
        assert_eq!(seq, 1);
    }
}
