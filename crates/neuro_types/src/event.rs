//! Notification types emitted by the handheld device
//!
//! The device publishes a [`DeviceEvent`] for every externally visible change. Finished
//! sessions are wrapped in `Arc` so a single record can be shared between all observers
//! without copying its measurements.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::session::{Session, SessionId};
use crate::status::{DeviceStatus, RunStatus};

/// Main notification enum broadcast to observers
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A session was armed and its treatment dispatched
    SessionStarted {
        session_id: SessionId,
        start: DateTime<Utc>,
    },
    /// A session was finalized and appended to the history
    SessionStopped(Arc<Session>),
    /// The run state moved along one of its edges
    RunStatusChanged { from: RunStatus, to: RunStatus },
    /// The device was switched on or off
    PowerChanged(DeviceStatus),
    /// New battery level in percent
    BatteryChanged(u8),
    /// The battery reached 0% and the device is shutting itself down
    BatteryDepleted,
    /// Electrode contact was established or lost
    ContactChanged(bool),
    /// The treatment delivered another protocol step
    TreatmentProgress {
        session_id: SessionId,
        step: u32,
        total_steps: u32,
    },
    /// The headset produced a fresh window of waveform samples
    WaveformsUpdated,
    /// A logged session was handed to the upload sink
    SessionUploaded { index: usize, session_id: SessionId },
    /// An upload request could not be served
    UploadFailed { index: usize, reason: String },
}

/// Event filter types for observers to specify what events they want to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Receive all events
    All,
    /// Session lifecycle and upload events
    SessionOnly,
    /// Run state and power changes
    StatusOnly,
    /// Battery level and depletion
    BatteryOnly,
    /// Treatment progress
    TreatmentOnly,
    /// Contact and waveform events
    HeadsetOnly,
}

/// Helper function to check if an event matches a filter
pub fn event_matches_filter(event: &DeviceEvent, filter: &EventFilter) -> bool {
    match filter {
        EventFilter::All => true,
        EventFilter::SessionOnly => matches!(
            event,
            DeviceEvent::SessionStarted { .. }
                | DeviceEvent::SessionStopped(_)
                | DeviceEvent::SessionUploaded { .. }
                | DeviceEvent::UploadFailed { .. }
        ),
        EventFilter::StatusOnly => matches!(
            event,
            DeviceEvent::RunStatusChanged { .. } | DeviceEvent::PowerChanged(_)
        ),
        EventFilter::BatteryOnly => matches!(
            event,
            DeviceEvent::BatteryChanged(_) | DeviceEvent::BatteryDepleted
        ),
        EventFilter::TreatmentOnly => matches!(event, DeviceEvent::TreatmentProgress { .. }),
        EventFilter::HeadsetOnly => matches!(
            event,
            DeviceEvent::ContactChanged(_) | DeviceEvent::WaveformsUpdated
        ),
    }
}

impl DeviceEvent {
    /// Get a human-readable description of the event type
    pub fn event_type_name(&self) -> &'static str {
        match self {
            DeviceEvent::SessionStarted { .. } => "SessionStarted",
            DeviceEvent::SessionStopped(_) => "SessionStopped",
            DeviceEvent::RunStatusChanged { .. } => "RunStatusChanged",
            DeviceEvent::PowerChanged(_) => "PowerChanged",
            DeviceEvent::BatteryChanged(_) => "BatteryChanged",
            DeviceEvent::BatteryDepleted => "BatteryDepleted",
            DeviceEvent::ContactChanged(_) => "ContactChanged",
            DeviceEvent::TreatmentProgress { .. } => "TreatmentProgress",
            DeviceEvent::WaveformsUpdated => "WaveformsUpdated",
            DeviceEvent::SessionUploaded { .. } => "SessionUploaded",
            DeviceEvent::UploadFailed { .. } => "UploadFailed",
        }
    }
}
