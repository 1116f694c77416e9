//! Session records and the session history
//!
//! A [`Session`] is opened when a treatment starts and closed exactly once, either when
//! the treatment completes or when it is cut short. Only closed sessions are accepted by
//! the [`SessionLog`], which is append-only and kept in chronological order.

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

/// Sequential session identifier, starting at 1
pub type SessionId = u64;

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// The treatment protocol ran to the end
    Completed,
    /// Stopped by the user
    Stopped,
    /// Electrode contact was lost
    ContactLost,
    /// The battery ran out
    BatteryDepleted,
    /// The device was switched off
    PoweredOff,
    /// The device was torn down
    Shutdown,
}

/// Measurements gathered by the treatment protocol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreatmentResult {
    /// Dominant frequency per electrode site before stimulation (Hz)
    pub baseline_hz: Vec<f32>,
    /// Dominant frequency per electrode site after stimulation (Hz).
    /// Empty unless the protocol completed.
    pub treated_hz: Vec<f32>,
    /// Number of protocol steps delivered
    pub completed_steps: u32,
}

/// Record of one treatment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    outcome: Option<SessionOutcome>,
    result: TreatmentResult,
}

impl Session {
    /// Open a new session starting at `start`
    pub fn open(id: SessionId, start: DateTime<Utc>) -> Self {
        Self {
            id,
            start,
            end: None,
            outcome: None,
            result: TreatmentResult::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End timestamp, `None` while the session is open
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome
    }

    pub fn result(&self) -> &TreatmentResult {
        &self.result
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    /// Elapsed time between start and end, once closed
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }

    /// Record the baseline measured at the start of the protocol
    pub fn record_baseline(&mut self, baseline_hz: Vec<f32>) {
        if !self.is_closed() {
            self.result.baseline_hz = baseline_hz;
        }
    }

    /// Record how many protocol steps have been delivered so far
    pub fn record_progress(&mut self, completed_steps: u32) {
        if !self.is_closed() {
            self.result.completed_steps = completed_steps;
        }
    }

    /// Replace the measurements with the final result of a completed protocol
    pub fn record_result(&mut self, result: TreatmentResult) {
        if !self.is_closed() {
            self.result = result;
        }
    }

    /// Close the session.
    ///
    /// An `end` earlier than `start` is clamped to `start`. Returns `false` and leaves the
    /// session untouched if it was already closed.
    pub fn close(&mut self, end: DateTime<Utc>, outcome: SessionOutcome) -> bool {
        if self.is_closed() {
            return false;
        }
        self.end = Some(end.max(self.start));
        self.outcome = Some(outcome);
        true
    }

    /// One row of the session log as shown on the device, e.g.
    /// `SESSION #1: 2024-03-01 10:00:00 - 2024-03-01 10:00:29`
    pub fn summary(&self, position: usize) -> String {
        let start = self.start.with_timezone(&Local).format(DISPLAY_FORMAT);
        match self.end {
            Some(end) => format!(
                "SESSION #{}: {} - {}",
                position,
                start,
                end.with_timezone(&Local).format(DISPLAY_FORMAT)
            ),
            None => format!("SESSION #{}: {} - in progress", position, start),
        }
    }
}

/// Append-only history of finalized sessions, in insertion (chronological) order
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionLog {
    sessions: Vec<Session>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a closed session.
    ///
    /// Open sessions and sessions already present in the log are rejected, so a late
    /// duplicate notification can never add a second entry.
    pub fn append(&mut self, session: Session) -> DeviceResult<()> {
        if !session.is_closed() {
            return Err(DeviceError::SessionStillOpen { id: session.id() });
        }
        if self.contains(session.id()) {
            return Err(DeviceError::DuplicateSession { id: session.id() });
        }
        self.sessions.push(session);
        Ok(())
    }

    /// Session at `index`, or [`DeviceError::InvalidSessionIndex`]
    pub fn get(&self, index: usize) -> DeviceResult<&Session> {
        self.sessions
            .get(index)
            .ok_or(DeviceError::InvalidSessionIndex {
                index,
                len: self.sessions.len(),
            })
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.iter().any(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn as_slice(&self) -> &[Session] {
        &self.sessions
    }

    /// Copy of the history for readers outside the device context
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.clone()
    }
}
