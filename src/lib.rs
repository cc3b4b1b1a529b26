//! # Tacmap Server
//!
//! Authoritative coordination server for real-time tactical map sessions.
//! Keeps every connected client's view of shared session state (teams,
//! positions, markers, chat) consistent and visibility-filtered.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TACMAP SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  model/            - Entity model (pure data, no I/O)        │
//! │  ├── position.rs   - Geo position + great-circle distance    │
//! │  ├── entity.rs     - Player, Team, Marker, ChatEvent         │
//! │  └── session.rs    - Per-session state and sequence counter  │
//! │                                                              │
//! │  sync/             - State synchronization engine            │
//! │  ├── delta.rs      - Change records and delta envelopes      │
//! │  ├── snapshot.rs   - Viewer-filtered full snapshots          │
//! │  └── broadcast.rs  - Scope-routed non-blocking fan-out       │
//! │                                                              │
//! │  network/          - Networking                              │
//! │  ├── protocol.rs   - Wire message types (JSON)               │
//! │  ├── registry.rs   - Session registry                        │
//! │  ├── handler.rs    - Per-connection protocol state machine   │
//! │  ├── maintenance.rs- Inactivity sweep / session reaping      │
//! │  └── server.rs     - WebSocket accept loop                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Guarantee
//!
//! Each session is the unit of mutual exclusion: exactly one logical
//! mutation-and-broadcast sequence holds its lock at a time, and the
//! session's sequence number is assigned under that lock. Within a
//! session, connected clients observe sequence numbers that increase
//! monotonically and without gaps. There is no cross-session ordering.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod model;
pub mod network;
pub mod sync;

// Re-export commonly used types
pub use model::entity::{ChatEvent, ConnectionStatus, Marker, Player, Team, Visibility};
pub use model::position::Position;
pub use model::session::{PlayerId, Session, SessionId, TeamId};
pub use sync::broadcast::{ConnectionTable, Scope};
pub use sync::delta::StateDelta;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maintenance sweep rate (Hz)
pub const UPDATE_RATE: u32 = 5;

/// Minimum movement before a position update is rebroadcast (meters)
pub const POSITION_UPDATE_THRESHOLD: f64 = 2.0;

/// Seconds without activity before a connected player is flagged inactive
pub const INACTIVE_TIMEOUT_SECS: f64 = 300.0;

/// Maximum accepted WebSocket message size (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Maximum chat message length (characters)
pub const MAX_CHAT_LEN: usize = 500;

/// Chat events retained per session (FIFO ring)
pub const MESSAGE_HISTORY: usize = 100;

/// Chat events included in a join-time snapshot
pub const SNAPSHOT_MESSAGES: usize = 50;
