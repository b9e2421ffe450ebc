//! Message Relay Module
//!
//! Handles per-message fan-out from the source group to the target group.

pub mod engine;

pub use engine::{RelayEngine, RelayMode};
