//! Session Protocol Handler
//!
//! Per-connection state machine: unauthenticated until a successful
//! auth, then dispatching inbound messages to mutation handlers that
//! follow one pattern: mutate the session under its lock, express the
//! mutation as a delta, pick a scope, broadcast.
//!
//! Authorization failures (non-owner marker edits, non-host team
//! reassignment) are silently ignored; malformed input gets an `error`
//! reply and mutates nothing.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::model::entity::{ChatEvent, ChatKind, ConnectionStatus, Marker, MarkerId, MessageId, Player, PlayerId};
use crate::model::now_secs;
use crate::model::session::SessionId;
use crate::network::protocol::{
    AlertRequest, AuthRequest, AuthResponse, ChatRequest, ClientMessage, MarkerAction,
    MarkerRequest, PositionUpdate, ServerMessage, TeamAction, TeamUpdateRequest,
};
use crate::network::registry::SessionRegistry;
use crate::sync::broadcast::{broadcast, ConnectionTable, Scope};
use crate::sync::delta::{EntityKind, StateDelta};
use crate::sync::snapshot::{full_snapshot, PlayerView};
use crate::MAX_CHAT_LEN;

/// Identity established by a successful auth.
#[derive(Clone, Copy, Debug)]
struct AuthState {
    player_id: PlayerId,
    session_id: SessionId,
}

/// Render a serializable value as a JSON payload.
///
/// Our payload types contain nothing serde_json can reject, so a
/// failure degrades to `null` rather than aborting the handler.
fn json_of<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

/// Truncate on a character boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// One connection's protocol state machine.
pub struct ConnectionHandler {
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionTable>,
    outbound: mpsc::Sender<ServerMessage>,
    position_threshold: f64,
    auth: Option<AuthState>,
}

impl ConnectionHandler {
    /// Create a handler in the unauthenticated state.
    pub fn new(
        registry: Arc<SessionRegistry>,
        connections: Arc<ConnectionTable>,
        outbound: mpsc::Sender<ServerMessage>,
        position_threshold: f64,
    ) -> Self {
        Self {
            registry,
            connections,
            outbound,
            position_threshold,
            auth: None,
        }
    }

    /// The authenticated player, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.auth.map(|a| a.player_id)
    }

    /// Dispatch one inbound message.
    pub async fn handle(&mut self, msg: ClientMessage) {
        match msg {
            // Answered regardless of authentication state.
            ClientMessage::Ping => {
                let _ = self.outbound.send(ServerMessage::Pong).await;
            }
            ClientMessage::Auth(req) => {
                if self.auth.is_some() {
                    self.send_error("Already authenticated").await;
                } else {
                    self.handle_auth(req).await;
                }
            }
            ClientMessage::PositionUpdate(update) => {
                if let Some(auth) = self.require_auth().await {
                    self.handle_position_update(auth, update).await;
                }
            }
            ClientMessage::Chat(req) => {
                if let Some(auth) = self.require_auth().await {
                    self.handle_chat(auth, req).await;
                }
            }
            ClientMessage::Alert(req) => {
                if let Some(auth) = self.require_auth().await {
                    self.handle_alert(auth, req).await;
                }
            }
            ClientMessage::Marker(req) => {
                if let Some(auth) = self.require_auth().await {
                    self.handle_marker(auth, req).await;
                }
            }
            ClientMessage::TeamUpdate(req) => {
                if let Some(auth) = self.require_auth().await {
                    self.handle_team_update(auth, req).await;
                }
            }
        }
    }

    /// The connection's identity, or an error reply when unauthenticated.
    async fn require_auth(&self) -> Option<AuthState> {
        if self.auth.is_none() {
            self.send_error("Not authenticated").await;
        }
        self.auth
    }

    /// Transition to terminated: mark the player disconnected, drop the
    /// live connection entry and broadcast the status change. The
    /// roster entry is retained until the session itself is reaped.
    pub async fn handle_disconnect(&mut self) {
        let Some(auth) = self.auth.take() else {
            return;
        };
        self.connections.unregister(auth.player_id).await;

        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        let Some(player) = session.players.get_mut(&auth.player_id) else {
            return;
        };
        player.connection_status = ConnectionStatus::Disconnected;
        let view = PlayerView::of(player, false);
        let callsign = player.callsign.clone();

        let mut delta = StateDelta::new();
        delta.update(EntityKind::Player, auth.player_id, json_of(&view));
        broadcast(&mut session, &self.connections, delta, Scope::All).await;

        info!(
            "player {callsign} ({}) disconnected from session {}",
            auth.player_id, auth.session_id
        );
    }

    async fn send_error(&self, error: &str) {
        let _ = self
            .outbound
            .send(ServerMessage::Error {
                error: error.to_string(),
            })
            .await;
    }

    async fn handle_auth(&mut self, req: AuthRequest) {
        let callsign = req.callsign.trim().to_string();
        if callsign.is_empty() {
            self.send_error("Callsign required").await;
            return;
        }

        let (session_id, session) = if req.is_host {
            self.registry.create_session().await
        } else {
            let found = match req.session_id {
                Some(id) => self.registry.get(id).await.map(|s| (id, s)),
                None => None,
            };
            match found {
                Some(pair) => pair,
                None => {
                    self.send_error("Session not found").await;
                    return;
                }
            }
        };

        let player = Player::new(callsign.clone(), req.device_info);
        let player_id = player.player_id;

        let mut session = session.write().await;
        let team_id = session.add_player(player);
        if req.is_host {
            session.host_id = Some(player_id);
        }

        // Register before the join broadcast so the new connection
        // observes its own roster entry at sequence N and everything
        // after it.
        self.connections
            .register(player_id, self.outbound.clone())
            .await;

        let snapshot = full_snapshot(&session, Some(team_id));
        let _ = self
            .outbound
            .send(ServerMessage::AuthResponse(AuthResponse {
                success: true,
                player_id,
                team_id,
                session_state: snapshot,
            }))
            .await;

        let view = PlayerView::of(&session.players[&player_id], false);
        let mut delta = StateDelta::new();
        delta.add(EntityKind::Player, player_id, json_of(&view));
        broadcast(&mut session, &self.connections, delta, Scope::All).await;

        self.auth = Some(AuthState {
            player_id,
            session_id,
        });
        info!("player {callsign} ({player_id}) joined session {session_id}");
    }

    async fn handle_position_update(&self, auth: AuthState, update: PositionUpdate) {
        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        session.touch(auth.player_id);

        let Some(player) = session.players.get_mut(&auth.player_id) else {
            return;
        };
        let new_position = update.to_position();
        let moved = match &player.position {
            None => true,
            Some(prev) => prev.distance_to(&new_position) > self.position_threshold,
        };
        if !moved {
            // Accepted for inactivity purposes, but below the movement
            // threshold: neither stored nor broadcast.
            return;
        }

        player.position = Some(new_position);
        let Some(team_id) = player.team_id else {
            return;
        };

        let mut delta = StateDelta::new();
        delta.update(
            EntityKind::Player,
            auth.player_id,
            json!({ "position": json_of(&new_position) }),
        );
        broadcast(&mut session, &self.connections, delta, Scope::Team(team_id)).await;
    }

    async fn handle_chat(&self, auth: AuthState, req: ChatRequest) {
        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        session.touch(auth.player_id);

        let Some(player) = session.players.get(&auth.player_id) else {
            return;
        };
        let Some(team_id) = player.team_id else {
            return;
        };

        let event = ChatEvent {
            message_id: MessageId::generate(),
            sender_id: auth.player_id,
            team_id,
            visibility: req.visibility,
            kind: ChatKind::Chat,
            content: truncate_chars(&req.content, MAX_CHAT_LEN),
            sent_at: now_secs(),
            location: req.location,
        };

        let scope = Scope::for_visibility(event.visibility, team_id);
        let mut delta = StateDelta::new();
        delta.add(EntityKind::Message, event.message_id, json_of(&event));
        session.push_message(event);

        broadcast(&mut session, &self.connections, delta, scope).await;
    }

    async fn handle_alert(&self, auth: AuthState, req: AlertRequest) {
        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        session.touch(auth.player_id);

        let Some(player) = session.players.get(&auth.player_id) else {
            return;
        };
        let Some(team_id) = player.team_id else {
            return;
        };

        let event = ChatEvent {
            message_id: MessageId::generate(),
            sender_id: auth.player_id,
            team_id,
            visibility: crate::model::entity::Visibility::Team,
            kind: ChatKind::Alert,
            content: format!("{} - {}", req.alert_type.label(), player.callsign),
            sent_at: now_secs(),
            location: req.location.or(player.position),
        };

        let mut delta = StateDelta::new();
        delta.add(EntityKind::Message, event.message_id, json_of(&event));
        session.push_message(event);

        broadcast(&mut session, &self.connections, delta, Scope::Team(team_id)).await;
    }

    async fn handle_marker(&self, auth: AuthState, req: MarkerRequest) {
        match req.action {
            MarkerAction::Create => self.handle_marker_create(auth, req).await,
            MarkerAction::Update => self.handle_marker_update(auth, req).await,
            MarkerAction::Delete => self.handle_marker_delete(auth, req).await,
        }
    }

    async fn handle_marker_create(&self, auth: AuthState, req: MarkerRequest) {
        let Some(data) = req.marker_data else {
            self.send_error("Marker data required").await;
            return;
        };
        let (Some(kind), Some(position)) = (data.kind, data.position) else {
            self.send_error("Marker data required").await;
            return;
        };

        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        session.touch(auth.player_id);

        let Some(player) = session.players.get(&auth.player_id) else {
            return;
        };
        let Some(team_id) = player.team_id else {
            return;
        };

        let marker = Marker {
            marker_id: MarkerId::generate(),
            kind,
            created_by: auth.player_id,
            team_id,
            visibility: data.visibility,
            position,
            properties: data.properties,
            created_at: now_secs(),
            expires_at: data.expires_at,
        };
        let scope = Scope::for_visibility(marker.visibility, team_id);

        let mut delta = StateDelta::new();
        delta.add(EntityKind::Marker, marker.marker_id, json_of(&marker));
        session.add_marker(marker);

        broadcast(&mut session, &self.connections, delta, scope).await;
    }

    async fn handle_marker_update(&self, auth: AuthState, req: MarkerRequest) {
        let Some(marker_id) = req.marker_id else {
            self.send_error("Marker id required").await;
            return;
        };
        let patch = req.marker_data.map(|d| d.properties).unwrap_or_default();

        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        session.touch(auth.player_id);

        let Some(marker) = session.markers.get_mut(&marker_id) else {
            return;
        };
        if marker.created_by != auth.player_id {
            // Ownership is the sole authorization check; not an error.
            debug!("ignoring marker update from non-creator {}", auth.player_id);
            return;
        }

        marker.merge_properties(patch);
        let scope = Scope::for_visibility(marker.visibility, marker.team_id);
        let properties = marker.properties.clone();

        let mut delta = StateDelta::new();
        delta.update(EntityKind::Marker, marker_id, json!({ "properties": properties }));
        broadcast(&mut session, &self.connections, delta, scope).await;
    }

    async fn handle_marker_delete(&self, auth: AuthState, req: MarkerRequest) {
        let Some(marker_id) = req.marker_id else {
            self.send_error("Marker id required").await;
            return;
        };

        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        session.touch(auth.player_id);

        let owned = session
            .markers
            .get(&marker_id)
            .map(|m| m.created_by == auth.player_id)
            .unwrap_or(false);
        if !owned {
            debug!("ignoring marker delete from non-creator {}", auth.player_id);
            return;
        }
        let Some(marker) = session.remove_marker(marker_id) else {
            return;
        };
        let scope = Scope::for_visibility(marker.visibility, marker.team_id);

        let mut delta = StateDelta::new();
        delta.remove(EntityKind::Marker, marker_id);
        broadcast(&mut session, &self.connections, delta, scope).await;
    }

    async fn handle_team_update(&self, auth: AuthState, req: TeamUpdateRequest) {
        let Some(session) = self.registry.get(auth.session_id).await else {
            return;
        };
        let mut session = session.write().await;
        session.touch(auth.player_id);

        if session.host_id != Some(auth.player_id) {
            debug!("ignoring team update from non-host {}", auth.player_id);
            return;
        }

        match req.action {
            TeamAction::AssignPlayer => {
                if !session.transfer_player(req.player_id, req.team_id) {
                    return;
                }
                let mut delta = StateDelta::new();
                delta.update(
                    EntityKind::Player,
                    req.player_id,
                    json!({ "team_id": req.team_id }),
                );
                broadcast(&mut session, &self.connections, delta, Scope::All).await;
            }
        }
    }
}
