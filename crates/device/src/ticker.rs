//! Periodic command producers (battery drain, waveform refresh)

use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{RecvTimeoutError, Sender};
use tracing::{debug, error};

use neuro_types::{DeviceError, DeviceResult};

use crate::runtime::DeviceCommand;

/// A named thread that sends a command into the device queue every period.
///
/// The ticker ends when stopped, when dropped, or when the device queue closes.
pub struct Ticker {
    name: String,
    stop_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<F>(
        name: &str,
        period: Duration,
        device_tx: Sender<DeviceCommand>,
        make_cmd: F,
    ) -> DeviceResult<Self>
    where
        F: Fn() -> DeviceCommand + Send + 'static,
    {
        if period.is_zero() {
            return Err(DeviceError::Configuration(format!(
                "Ticker '{}' needs a period greater than 0",
                name
            )));
        }
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);
        let thread_name = name.to_string();

        let thread_handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(ticker = %thread_name, ?period, "Ticker started");
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if device_tx.send(make_cmd()).is_err() {
                                debug!(ticker = %thread_name, "Device queue closed");
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(ticker = %thread_name, "Ticker finished");
            })
            .map_err(|e| DeviceError::Io(format!("Failed to spawn ticker '{}': {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            stop_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Stop ticking and wait for the thread to exit.
    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.stop_tx.try_send(());
            if let Err(e) = handle.join() {
                error!(ticker = %self.name, "Ticker thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
