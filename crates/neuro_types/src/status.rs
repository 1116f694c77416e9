//! Run and power states of the handheld device

use std::fmt;

use serde::{Deserialize, Serialize};

/// Treatment run state of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunStatus {
    /// No session has been started since power on
    #[default]
    Idle,
    /// A session is active and its treatment is advancing
    Running,
    /// A session is active but its treatment is suspended
    Paused,
    /// The last session has ended
    Stopped,
}

impl RunStatus {
    /// Whether a new session may be started from this state
    pub fn can_begin(self) -> bool {
        matches!(self, RunStatus::Idle | RunStatus::Stopped)
    }

    /// Whether the device owns an active session in this state
    pub fn has_session(self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Paused)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Power state of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    #[default]
    Off,
    On,
}

impl DeviceStatus {
    pub fn is_on(self) -> bool {
        self == DeviceStatus::On
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Off => f.write_str("off"),
            DeviceStatus::On => f.write_str("on"),
        }
    }
}
