//! Network Layer
//!
//! WebSocket transport, wire protocol, per-connection protocol handler,
//! session registry and background maintenance. All tactical state
//! lives in `model/`; this layer only routes messages in and out of it.

pub mod handler;
pub mod maintenance;
pub mod protocol;
pub mod registry;
pub mod server;

pub use handler::ConnectionHandler;
pub use maintenance::{run_maintenance_loop, sweep, SweepReport};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{SessionRegistry, SharedSession};
pub use server::{ServerConfig, ServerError, TacmapServer};
