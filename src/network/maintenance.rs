//! Background Maintenance
//!
//! Fixed-rate sweep over every live session: players that have gone
//! quiet past the inactivity timeout are flagged, and sessions with an
//! empty roster are removed. The sweep runs independently of any
//! connection's lifecycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast as shutdown;
use tokio::time::interval;
use tracing::{debug, info};

use crate::model::entity::ConnectionStatus;
use crate::model::now_secs;
use crate::model::session::SessionId;
use crate::network::registry::SessionRegistry;
use crate::sync::broadcast::{broadcast, ConnectionTable, Scope};
use crate::sync::delta::{EntityKind, StateDelta};
use crate::sync::snapshot::PlayerView;

/// What one sweep did.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Players transitioned from connected to inactive.
    pub flagged: usize,
    /// Sessions removed because their roster was empty.
    pub reaped: Vec<SessionId>,
}

/// Run one maintenance pass over every session.
///
/// Sessions are visited one at a time under their own lock. Broadcast
/// queueing never waits, so no session's sweep can stall the others.
pub async fn sweep(
    registry: &SessionRegistry,
    connections: &ConnectionTable,
    inactive_timeout: f64,
) -> SweepReport {
    let mut report = SweepReport::default();
    let now = now_secs();

    for session in registry.all().await {
        let mut session = session.write().await;

        let idle: Vec<_> = session
            .players
            .values()
            .filter(|p| {
                p.connection_status == ConnectionStatus::Connected
                    && now - p.last_active > inactive_timeout
            })
            .map(|p| p.player_id)
            .collect();
        if idle.is_empty() {
            continue;
        }

        let mut delta = StateDelta::new();
        for player_id in idle {
            let Some(player) = session.players.get_mut(&player_id) else {
                continue;
            };
            player.connection_status = ConnectionStatus::Inactive;
            debug!("flagged idle player {} ({player_id})", player.callsign);
            let view = PlayerView::of(player, false);
            delta.update(
                EntityKind::Player,
                player_id,
                serde_json::to_value(&view).unwrap_or(Value::Null),
            );
            report.flagged += 1;
        }
        broadcast(&mut session, connections, delta, Scope::All).await;
    }

    report.reaped = registry.remove_empty().await;
    if report.flagged > 0 || !report.reaped.is_empty() {
        info!(
            flagged = report.flagged,
            reaped = report.reaped.len(),
            "maintenance sweep"
        );
    }
    report
}

/// Run sweeps at the given rate until the shutdown signal fires.
pub async fn run_maintenance_loop(
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionTable>,
    update_rate: u32,
    inactive_timeout: f64,
    mut shutdown_rx: shutdown::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_secs_f64(1.0 / update_rate.max(1) as f64));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry, &connections, inactive_timeout).await;
            }
            _ = shutdown_rx.recv() => {
                debug!("maintenance loop stopping");
                break;
            }
        }
    }
}
