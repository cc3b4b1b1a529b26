//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON, keyed by a `type` discriminator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::entity::{AlertKind, MarkerId, MarkerKind, PlayerId, TeamId, Visibility};
use crate::model::position::Position;
use crate::model::session::SessionId;
use crate::sync::delta::DeltaEnvelope;
use crate::sync::snapshot::SessionSnapshot;

fn default_visibility() -> Visibility {
    Visibility::Team
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate as host or joiner.
    Auth(AuthRequest),

    /// Liveness probe; answered in any protocol state.
    Ping,

    /// Report the sender's current position.
    PositionUpdate(PositionUpdate),

    /// Send a chat message.
    Chat(ChatRequest),

    /// Raise a tactical alert.
    Alert(AlertRequest),

    /// Create, update or delete a map marker.
    Marker(MarkerRequest),

    /// Team management (host only).
    TeamUpdate(TeamUpdateRequest),
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Display callsign.
    pub callsign: String,
    /// Session to join; ignored when hosting.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Create a new session and become its host.
    #[serde(default)]
    pub is_host: bool,
    /// Opaque device metadata.
    #[serde(default)]
    pub device_info: Map<String, Value>,
}

/// Position report. Replaces the stored position wholesale when it
/// clears the movement threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Heading in degrees.
    #[serde(default)]
    pub heading: f64,
    /// Horizontal accuracy in meters.
    #[serde(default)]
    pub accuracy: f64,
    /// Elevation in meters.
    #[serde(default)]
    pub elevation: f64,
}

impl PositionUpdate {
    /// Convert to a model position, timestamped now.
    pub fn to_position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
            heading: self.heading,
            accuracy: self.accuracy,
            elevation: self.elevation,
            updated_at: crate::model::now_secs(),
        }
    }
}

/// Chat message request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Message text; truncated to the chat length cap.
    pub content: String,
    /// Delivery scope, team by default.
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    /// Optional position snapshot attached to the message.
    #[serde(default)]
    pub location: Option<Position>,
}

/// Tactical alert request. Alerts are always team-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRequest {
    /// Alert category.
    pub alert_type: AlertKind,
    /// Alert location; falls back to the sender's position.
    #[serde(default)]
    pub location: Option<Position>,
}

/// Marker operation discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerAction {
    /// Create a new marker.
    Create,
    /// Merge properties into an existing marker.
    Update,
    /// Delete a marker.
    Delete,
}

/// Marker operation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerRequest {
    /// Which operation to perform.
    pub action: MarkerAction,
    /// Target marker for update/delete.
    #[serde(default)]
    pub marker_id: Option<MarkerId>,
    /// Marker payload for create/update.
    #[serde(default)]
    pub marker_data: Option<MarkerData>,
}

/// Marker payload. `kind` and `position` are required for create;
/// update consumes only `properties`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerData {
    /// Marker geometry.
    #[serde(rename = "type", default)]
    pub kind: Option<MarkerKind>,
    /// Delivery scope, team by default.
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    /// Marker location.
    #[serde(default)]
    pub position: Option<Position>,
    /// Free-form properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Optional expiry (unix seconds).
    #[serde(default)]
    pub expires_at: Option<f64>,
}

/// Team management discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamAction {
    /// Move a player to another team.
    AssignPlayer,
}

/// Team management request (host only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamUpdateRequest {
    /// Which operation to perform.
    pub action: TeamAction,
    /// Player being reassigned.
    pub player_id: PlayerId,
    /// Destination team.
    pub team_id: TeamId,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result carrying the join-time snapshot.
    AuthResponse(AuthResponse),

    /// Answer to a ping.
    Pong,

    /// Incremental state update.
    StateDelta {
        /// The sequenced delta.
        delta: DeltaEnvelope,
    },

    /// Error response on the originating connection.
    Error {
        /// Human-readable description.
        error: String,
    },
}

/// Successful authentication response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Always true; failures are reported as `error` messages.
    pub success: bool,
    /// The freshly assigned player id.
    pub player_id: PlayerId,
    /// The balanced team assignment.
    pub team_id: TeamId,
    /// Full viewer-filtered session state.
    pub session_state: SessionSnapshot,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
