//! Entity Model
//!
//! Pure data types for session state. No I/O-capable objects live here;
//! live connection handles are kept in a side table by the sync layer.

pub mod entity;
pub mod position;
pub mod session;

/// Current wall-clock time as fractional unix seconds.
///
/// Timestamps cross the wire in this form, matching what clients expect.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
