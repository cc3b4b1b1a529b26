//! Session Entities
//!
//! Players, teams, markers and chat events, plus the closed enums that
//! tag them. All ids are UUID newtypes with `Ord` so they can key
//! `BTreeMap`s and iterate in a stable order.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::now_secs;
use crate::model::position::Position;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique player identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique team identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(Uuid);

impl TeamId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique marker identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(Uuid);

impl MarkerId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique chat event identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Player connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Live connection attached.
    Connected,
    /// Transport closed; roster entry retained.
    Disconnected,
    /// Connected but silent past the inactivity timeout.
    Inactive,
}

/// Who may ever receive an entity's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Owning team only.
    Team,
    /// Every connected player in the session.
    All,
}

/// Map marker geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Single point.
    Pin,
    /// Enclosed region.
    Area,
    /// Polyline.
    Line,
}

/// Tactical alert category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Enemy contact.
    Contact,
    /// Hazard warning.
    Danger,
    /// Rally point call.
    Rally,
    /// Assistance request.
    Help,
}

impl AlertKind {
    /// Uppercase label used in rendered alert text.
    pub fn label(self) -> &'static str {
        match self {
            AlertKind::Contact => "CONTACT",
            AlertKind::Danger => "DANGER",
            AlertKind::Rally => "RALLY",
            AlertKind::Help => "HELP",
        }
    }
}

/// Chat event category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// Free-form text message.
    Chat,
    /// Rendered tactical alert.
    Alert,
}

// =============================================================================
// ENTITIES
// =============================================================================

/// A session participant.
///
/// Roster entries survive disconnects; only the session reaper removes
/// them, together with the session itself. The live connection handle is
/// deliberately NOT stored here; the sync layer keeps a side table of
/// player id to sender so the model stays free of I/O objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    /// Unique id, assigned at authentication.
    pub player_id: PlayerId,
    /// Display callsign.
    pub callsign: String,
    /// Team membership; null until assigned.
    pub team_id: Option<TeamId>,
    /// Connection state.
    pub connection_status: ConnectionStatus,
    /// Last inbound activity (unix seconds).
    pub last_active: f64,
    /// Most recently broadcast position.
    pub position: Option<Position>,
    /// Opaque device metadata supplied at auth.
    #[serde(default)]
    pub device_info: Map<String, Value>,
}

impl Player {
    /// Create a freshly connected player.
    pub fn new(callsign: String, device_info: Map<String, Value>) -> Self {
        Self {
            player_id: PlayerId::generate(),
            callsign,
            team_id: None,
            connection_status: ConnectionStatus::Connected,
            last_active: now_secs(),
            position: None,
            device_info,
        }
    }
}

/// One side of a session. Exactly two exist per session and the set is
/// fixed for the session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    /// Unique id.
    pub team_id: TeamId,
    /// Display name.
    pub name: String,
    /// Display color (hex).
    pub color: String,
    /// Member player ids. Mirrors `Player::team_id`; both sides are
    /// updated in the same logical step on transfer.
    pub players: BTreeSet<PlayerId>,
    /// Markers owned by this team.
    pub markers: BTreeSet<MarkerId>,
}

impl Team {
    /// Create an empty team.
    pub fn new(name: &str, color: &str) -> Self {
        Self {
            team_id: TeamId::generate(),
            name: name.to_string(),
            color: color.to_string(),
            players: BTreeSet::new(),
            markers: BTreeSet::new(),
        }
    }
}

/// A map marker. Mutable only by its creator; updates are shallow
/// property merges, never replacements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marker {
    /// Unique id.
    pub marker_id: MarkerId,
    /// Marker geometry.
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    /// Creating player; sole authorization for update/delete.
    pub created_by: PlayerId,
    /// Owning team.
    pub team_id: TeamId,
    /// Delivery scope.
    pub visibility: Visibility,
    /// Marker location.
    pub position: Position,
    /// Free-form properties (label, description, icon, color, ...).
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Creation time (unix seconds).
    pub created_at: f64,
    /// Optional expiry (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
}

impl Marker {
    /// Shallow-merge new properties into the existing map.
    pub fn merge_properties(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.properties.insert(key, value);
        }
    }
}

/// A chat message or rendered tactical alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Unique id.
    pub message_id: MessageId,
    /// Sending player.
    pub sender_id: PlayerId,
    /// Sender's team at send time.
    pub team_id: TeamId,
    /// Delivery scope.
    pub visibility: Visibility,
    /// Chat or alert.
    #[serde(rename = "type")]
    pub kind: ChatKind,
    /// Text content (length-capped by the handler).
    pub content: String,
    /// Send time (unix seconds).
    pub sent_at: f64,
    /// Optional position snapshot attached to the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Position>,
}
