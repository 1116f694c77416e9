//! Upload of logged sessions to the PC

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use neuro_types::{DeviceResult, Session};

/// Destination for exported sessions
pub trait UploadSink: Send {
    fn transfer(&mut self, session: &Session) -> DeviceResult<()>;
}

/// In-memory stand-in for the PC companion window.
///
/// Clones share the received list, so a caller can keep one clone for inspection while
/// the device owns another.
#[derive(Debug, Clone, Default)]
pub struct PcWindow {
    received: Arc<Mutex<Vec<Session>>>,
}

impl PcWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions received so far, oldest first
    pub fn transfers(&self) -> Vec<Session> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UploadSink for PcWindow {
    fn transfer(&mut self, session: &Session) -> DeviceResult<()> {
        let rendered = serde_json::to_string_pretty(session)?;
        info!(session_id = session.id(), "PC received session:\n{}", rendered);
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        Ok(())
    }
}
