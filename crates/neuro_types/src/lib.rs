//! Shared types for the handheld neurostimulation device
//!
//! This crate contains the data model used throughout the simulator: run and power
//! states, session records and the session log, device notifications, configuration
//! types and the common error type.

pub mod status;
pub mod session;
pub mod event;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use status::*;
pub use session::*;
pub use event::*;
pub use config::*;
pub use error::*;
