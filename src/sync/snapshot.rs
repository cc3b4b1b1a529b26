//! Viewer-Filtered Snapshots
//!
//! A snapshot is the complete rendering of a session for one viewer,
//! sent exactly once per connection right after authentication. This is
//! the only place per-viewer field filtering happens; deltas are
//! filtered by recipient selection at broadcast time instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::entity::{
    ChatEvent, ConnectionStatus, Marker, MarkerId, Player, PlayerId, Team, TeamId, Visibility,
};
use crate::model::position::Position;
use crate::model::session::{Session, SessionId};
use crate::SNAPSHOT_MESSAGES;

/// Public rendering of a roster entry.
///
/// Position is carried only when the viewer shares the player's team;
/// everything else is public roster information.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerView {
    /// Player id.
    pub player_id: PlayerId,
    /// Display callsign.
    pub callsign: String,
    /// Team membership.
    pub team_id: Option<TeamId>,
    /// Connection state.
    pub connection_status: ConnectionStatus,
    /// Last known position, teammates only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl PlayerView {
    /// Render a player, optionally including their position.
    pub fn of(player: &Player, include_position: bool) -> Self {
        Self {
            player_id: player.player_id,
            callsign: player.callsign.clone(),
            team_id: player.team_id,
            connection_status: player.connection_status,
            position: if include_position { player.position } else { None },
        }
    }
}

/// Complete viewer-filtered session state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub session_id: SessionId,
    /// Sequence number at snapshot time; subsequent deltas follow it.
    pub sequence_number: u64,
    /// All teams (public).
    pub teams: BTreeMap<TeamId, Team>,
    /// All players, position-filtered for the viewer.
    pub players: BTreeMap<PlayerId, PlayerView>,
    /// Markers the viewer may see.
    pub markers: BTreeMap<MarkerId, Marker>,
    /// Most recent visible chat events, oldest first.
    pub messages: Vec<ChatEvent>,
}

/// Whether an entity with the given visibility and owning team is
/// visible to a viewer on `viewer_team`.
fn visible_to(visibility: Visibility, owner_team: TeamId, viewer_team: Option<TeamId>) -> bool {
    visibility == Visibility::All || viewer_team == Some(owner_team)
}

/// Render the full session state as seen by a viewer on `viewer_team`.
pub fn full_snapshot(session: &Session, viewer_team: Option<TeamId>) -> SessionSnapshot {
    let players = session
        .players
        .iter()
        .map(|(id, player)| {
            let teammate = player.team_id.is_some() && player.team_id == viewer_team;
            (*id, PlayerView::of(player, teammate))
        })
        .collect();

    let markers = session
        .markers
        .iter()
        .filter(|(_, m)| visible_to(m.visibility, m.team_id, viewer_team))
        .map(|(id, m)| (*id, m.clone()))
        .collect();

    let visible: Vec<ChatEvent> = session
        .messages
        .iter()
        .rev()
        .filter(|e| visible_to(e.visibility, e.team_id, viewer_team))
        .take(SNAPSHOT_MESSAGES)
        .cloned()
        .collect();
    let messages = visible.into_iter().rev().collect();

    SessionSnapshot {
        session_id: session.session_id,
        sequence_number: session.sequence_number,
        teams: session.teams.clone(),
        players,
        markers,
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::{ChatKind, MarkerKind, MessageId};
    use crate::model::now_secs;
    use serde_json::Map;

    struct Fixture {
        session: Session,
        alpha: TeamId,
        bravo: TeamId,
        alpha_player: PlayerId,
        bravo_player: PlayerId,
    }

    fn fixture() -> Fixture {
        let mut session = Session::new(SessionId::generate());
        let alpha = session.add_player(Player::new("ghost".into(), Map::new()));
        let bravo = session.add_player(Player::new("viper".into(), Map::new()));
        assert_ne!(alpha, bravo);
        let alpha_player = *session.teams[&alpha].players.iter().next().unwrap();
        let bravo_player = *session.teams[&bravo].players.iter().next().unwrap();
        Fixture { session, alpha, bravo, alpha_player, bravo_player }
    }

    fn marker(owner: PlayerId, team: TeamId, visibility: Visibility) -> Marker {
        Marker {
            marker_id: MarkerId::generate(),
            kind: MarkerKind::Pin,
            created_by: owner,
            team_id: team,
            visibility,
            position: Position::new(59.9, 10.7),
            properties: Map::new(),
            created_at: now_secs(),
            expires_at: None,
        }
    }

    fn message(sender: PlayerId, team: TeamId, visibility: Visibility, content: &str) -> ChatEvent {
        ChatEvent {
            message_id: MessageId::generate(),
            sender_id: sender,
            team_id: team,
            visibility,
            kind: ChatKind::Chat,
            content: content.into(),
            sent_at: now_secs(),
            location: None,
        }
    }

    #[test]
    fn test_position_only_for_viewer_team() {
        let mut fx = fixture();
        fx.session
            .players
            .get_mut(&fx.alpha_player)
            .unwrap()
            .position = Some(Position::new(59.9, 10.7));
        fx.session
            .players
            .get_mut(&fx.bravo_player)
            .unwrap()
            .position = Some(Position::new(59.8, 10.6));

        let snap = full_snapshot(&fx.session, Some(fx.alpha));
        assert!(snap.players[&fx.alpha_player].position.is_some());
        assert!(snap.players[&fx.bravo_player].position.is_none());
        // Roster fields stay public either way.
        assert_eq!(snap.players[&fx.bravo_player].callsign, "viper");
    }

    #[test]
    fn test_marker_visibility_filtering() {
        let mut fx = fixture();
        let team_marker = marker(fx.alpha_player, fx.alpha, Visibility::Team);
        let global_marker = marker(fx.bravo_player, fx.bravo, Visibility::All);
        let team_marker_id = team_marker.marker_id;
        let global_marker_id = global_marker.marker_id;
        fx.session.add_marker(team_marker);
        fx.session.add_marker(global_marker);

        let alpha_snap = full_snapshot(&fx.session, Some(fx.alpha));
        assert!(alpha_snap.markers.contains_key(&team_marker_id));
        assert!(alpha_snap.markers.contains_key(&global_marker_id));

        let bravo_snap = full_snapshot(&fx.session, Some(fx.bravo));
        assert!(!bravo_snap.markers.contains_key(&team_marker_id));
        assert!(bravo_snap.markers.contains_key(&global_marker_id));
    }

    #[test]
    fn test_message_visibility_and_cap() {
        let mut fx = fixture();
        for n in 0..60 {
            fx.session.push_message(message(
                fx.alpha_player,
                fx.alpha,
                Visibility::Team,
                &format!("alpha {n}"),
            ));
        }
        fx.session.push_message(message(
            fx.bravo_player,
            fx.bravo,
            Visibility::All,
            "global",
        ));

        let alpha_snap = full_snapshot(&fx.session, Some(fx.alpha));
        assert_eq!(alpha_snap.messages.len(), SNAPSHOT_MESSAGES);
        // Newest events win; oldest-first ordering preserved.
        assert_eq!(alpha_snap.messages.last().unwrap().content, "global");

        let bravo_snap = full_snapshot(&fx.session, Some(fx.bravo));
        assert_eq!(bravo_snap.messages.len(), 1);
        assert_eq!(bravo_snap.messages[0].content, "global");
    }

    #[test]
    fn test_all_teams_always_included() {
        let fx = fixture();
        let snap = full_snapshot(&fx.session, Some(fx.alpha));
        assert_eq!(snap.teams.len(), 2);
        assert!(snap.teams.contains_key(&fx.bravo));
    }
}
