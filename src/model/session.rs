//! Session State
//!
//! One isolated game instance: roster, two fixed teams, markers, a
//! bounded chat ring and the broadcast sequence counter. Uses BTreeMap
//! so iteration order (and team-balancing tie-breaks) is stable.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use crate::model::entity::{MarkerId, MessageId, PlayerId, TeamId};

use crate::model::entity::{ChatEvent, Marker, Player, Team};
use crate::model::now_secs;
use crate::MESSAGE_HISTORY;

/// Unique session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Shared state of one game session.
///
/// Everything reachable from here (players, teams, markers, messages,
/// the sequence counter) shares one lock; the registry hands sessions
/// out as `Arc<RwLock<Session>>`.
#[derive(Debug)]
pub struct Session {
    /// Unique id.
    pub session_id: SessionId,
    /// Creation time (unix seconds).
    pub created_at: f64,
    /// Last activity in the session (unix seconds).
    pub last_active: f64,
    /// The player that created this session, if still known.
    pub host_id: Option<PlayerId>,
    /// The two fixed teams, keyed by id.
    pub teams: BTreeMap<TeamId, Team>,
    /// Full roster, including disconnected players.
    pub players: BTreeMap<PlayerId, Player>,
    /// Live markers.
    pub markers: BTreeMap<MarkerId, Marker>,
    /// Bounded chat history, oldest first.
    pub messages: VecDeque<ChatEvent>,
    /// Broadcast ordering token. Incremented exactly once per
    /// broadcast delta, under the session lock, never reset.
    pub sequence_number: u64,
    /// Free-form session settings.
    pub settings: Map<String, Value>,
}

impl Session {
    /// Create a session with the two default teams and no players.
    pub fn new(session_id: SessionId) -> Self {
        let alpha = Team::new("Alpha", "#00FF00");
        let bravo = Team::new("Bravo", "#FF0000");

        let mut teams = BTreeMap::new();
        teams.insert(alpha.team_id, alpha);
        teams.insert(bravo.team_id, bravo);

        let now = now_secs();
        Self {
            session_id,
            created_at: now,
            last_active: now,
            host_id: None,
            teams,
            players: BTreeMap::new(),
            markers: BTreeMap::new(),
            messages: VecDeque::new(),
            sequence_number: 0,
            settings: Map::new(),
        }
    }

    /// Add a player and balance them onto the team with the fewest
    /// members. Ties break by team id order. Returns the assigned team.
    pub fn add_player(&mut self, mut player: Player) -> TeamId {
        let team_id = self
            .teams
            .iter()
            .min_by_key(|(id, team)| (team.players.len(), **id))
            .map(|(id, _)| *id)
            .expect("session always has its two default teams");

        player.team_id = Some(team_id);
        let player_id = player.player_id;
        self.players.insert(player_id, player);
        self.teams
            .get_mut(&team_id)
            .expect("team exists")
            .players
            .insert(player_id);
        self.last_active = now_secs();
        team_id
    }

    /// Move a player to another team, keeping membership bidirectional
    /// in the same logical step. Returns false if either side is
    /// unknown, leaving state untouched.
    pub fn transfer_player(&mut self, player_id: PlayerId, new_team_id: TeamId) -> bool {
        if !self.teams.contains_key(&new_team_id) {
            return false;
        }
        let Some(player) = self.players.get_mut(&player_id) else {
            return false;
        };

        if let Some(old_team_id) = player.team_id {
            if let Some(old_team) = self.teams.get_mut(&old_team_id) {
                old_team.players.remove(&player_id);
            }
        }

        player.team_id = Some(new_team_id);
        self.teams
            .get_mut(&new_team_id)
            .expect("checked above")
            .players
            .insert(player_id);
        true
    }

    /// Append a chat event, evicting the oldest past the ring capacity.
    pub fn push_message(&mut self, event: ChatEvent) {
        self.messages.push_back(event);
        while self.messages.len() > MESSAGE_HISTORY {
            self.messages.pop_front();
        }
    }

    /// Insert a marker and record it in the owning team's marker set.
    pub fn add_marker(&mut self, marker: Marker) {
        if let Some(team) = self.teams.get_mut(&marker.team_id) {
            team.markers.insert(marker.marker_id);
        }
        self.markers.insert(marker.marker_id, marker);
    }

    /// Remove a marker and its team-set entry. Returns the marker.
    pub fn remove_marker(&mut self, marker_id: MarkerId) -> Option<Marker> {
        let marker = self.markers.remove(&marker_id)?;
        if let Some(team) = self.teams.get_mut(&marker.team_id) {
            team.markers.remove(&marker_id);
        }
        Some(marker)
    }

    /// Refresh a player's activity timestamp.
    pub fn touch(&mut self, player_id: PlayerId) {
        let now = now_secs();
        if let Some(player) = self.players.get_mut(&player_id) {
            player.last_active = now;
        }
        self.last_active = now;
    }

    /// Whether this session has no roster entries left.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::{ChatKind, Visibility};

    fn new_player(callsign: &str) -> Player {
        Player::new(callsign.to_string(), Map::new())
    }

    fn chat_event(sender: PlayerId, team: TeamId, n: usize) -> ChatEvent {
        ChatEvent {
            message_id: MessageId::generate(),
            sender_id: sender,
            team_id: team,
            visibility: Visibility::Team,
            kind: ChatKind::Chat,
            content: format!("msg {n}"),
            sent_at: now_secs(),
            location: None,
        }
    }

    #[test]
    fn test_new_session_has_two_empty_teams() {
        let session = Session::new(SessionId::generate());
        assert_eq!(session.teams.len(), 2);
        assert!(session.teams.values().all(|t| t.players.is_empty()));
        let names: Vec<_> = session.teams.values().map(|t| t.name.clone()).collect();
        assert!(names.contains(&"Alpha".to_string()));
        assert!(names.contains(&"Bravo".to_string()));
        assert_eq!(session.sequence_number, 0);
    }

    #[test]
    fn test_balancing_fills_smaller_team_first() {
        let mut session = Session::new(SessionId::generate());
        let t1 = session.add_player(new_player("one"));
        let t2 = session.add_player(new_player("two"));
        let t3 = session.add_player(new_player("three"));

        assert_ne!(t1, t2);
        // Third player lands on whichever team is smaller; after two
        // joins both have one member, so the tie-break picks the lower
        // team id, which is where player one went.
        assert_eq!(t3, t1);
        let counts: Vec<_> = session.teams.values().map(|t| t.players.len()).collect();
        assert_eq!(counts.iter().sum::<usize>(), 3);
    }

    #[test]
    fn test_membership_is_bidirectional() {
        let mut session = Session::new(SessionId::generate());
        let team_id = session.add_player(new_player("viper"));
        let player_id = *session.players.keys().next().unwrap();

        let player = &session.players[&player_id];
        assert_eq!(player.team_id, Some(team_id));
        assert!(session.teams[&team_id].players.contains(&player_id));

        // Every assigned player appears in exactly one member set.
        let appearances = session
            .teams
            .values()
            .filter(|t| t.players.contains(&player_id))
            .count();
        assert_eq!(appearances, 1);
    }

    #[test]
    fn test_transfer_moves_both_sides() {
        let mut session = Session::new(SessionId::generate());
        let old_team = session.add_player(new_player("viper"));
        let player_id = *session.players.keys().next().unwrap();
        let new_team = *session.teams.keys().find(|id| **id != old_team).unwrap();

        assert!(session.transfer_player(player_id, new_team));
        assert_eq!(session.players[&player_id].team_id, Some(new_team));
        assert!(!session.teams[&old_team].players.contains(&player_id));
        assert!(session.teams[&new_team].players.contains(&player_id));
    }

    #[test]
    fn test_transfer_unknown_team_is_rejected() {
        let mut session = Session::new(SessionId::generate());
        session.add_player(new_player("viper"));
        let player_id = *session.players.keys().next().unwrap();
        let before = session.players[&player_id].team_id;

        assert!(!session.transfer_player(player_id, TeamId::generate()));
        assert_eq!(session.players[&player_id].team_id, before);
    }

    #[test]
    fn test_message_ring_evicts_oldest_first() {
        let mut session = Session::new(SessionId::generate());
        let team = session.add_player(new_player("viper"));
        let sender = *session.players.keys().next().unwrap();

        for n in 0..(MESSAGE_HISTORY + 10) {
            session.push_message(chat_event(sender, team, n));
        }

        assert_eq!(session.messages.len(), MESSAGE_HISTORY);
        assert_eq!(session.messages.front().unwrap().content, "msg 10");
        assert_eq!(
            session.messages.back().unwrap().content,
            format!("msg {}", MESSAGE_HISTORY + 9)
        );
    }

    #[test]
    fn test_marker_add_remove_tracks_team_set() {
        let mut session = Session::new(SessionId::generate());
        let team_id = session.add_player(new_player("viper"));
        let player_id = *session.players.keys().next().unwrap();

        let marker = Marker {
            marker_id: MarkerId::generate(),
            kind: crate::model::entity::MarkerKind::Pin,
            created_by: player_id,
            team_id,
            visibility: Visibility::Team,
            position: crate::Position::new(1.0, 2.0),
            properties: Map::new(),
            created_at: now_secs(),
            expires_at: None,
        };
        let marker_id = marker.marker_id;

        session.add_marker(marker);
        assert!(session.teams[&team_id].markers.contains(&marker_id));

        let removed = session.remove_marker(marker_id);
        assert!(removed.is_some());
        assert!(!session.teams[&team_id].markers.contains(&marker_id));
        assert!(session.markers.is_empty());
    }
}
