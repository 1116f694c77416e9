//! Treatment runner
//!
//! A [`Treatment`] executes the stimulation protocol of one session on its own thread so
//! that slow protocol steps never hold up the device's command handling. The thread owns
//! nothing of the device: it reads the headset, stimulates it, and reports back through
//! the device command queue.
//!
//! Protocol: measure a baseline dominant frequency for every site, stimulate every site
//! once per round (one site per step), then measure again and report the result.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, WeakSender};
use tracing::{debug, error, info, warn};

use neuro_headset::{dominant_frequency, Headset};
use neuro_types::{DeviceError, DeviceResult, SessionId, TreatmentConfig, TreatmentResult};

use crate::runtime::DeviceCommand;

/// Control commands from the device to a running treatment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentControl {
    Pause,
    Resume,
    Cancel,
}

/// Reports from a treatment thread back to the device
#[derive(Debug, Clone, PartialEq)]
pub enum TreatmentMsg {
    BaselineMeasured {
        session_id: SessionId,
        baseline_hz: Vec<f32>,
    },
    Progress {
        session_id: SessionId,
        step: u32,
        total_steps: u32,
    },
    Finished {
        session_id: SessionId,
        result: TreatmentResult,
    },
}

impl TreatmentMsg {
    pub fn session_id(&self) -> SessionId {
        match self {
            TreatmentMsg::BaselineMeasured { session_id, .. }
            | TreatmentMsg::Progress { session_id, .. }
            | TreatmentMsg::Finished { session_id, .. } => *session_id,
        }
    }
}

/// Signals the exit of a treatment thread when dropped, including on panic.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Handle to the protocol thread of one session
pub struct Treatment {
    session_id: SessionId,
    control_tx: Sender<TreatmentControl>,
    exit_rx: Receiver<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Treatment {
    /// Start the protocol for `session_id` on a new thread.
    ///
    /// Reports go through a weak sender so a running treatment never keeps the device
    /// queue open on its own.
    pub fn spawn(
        session_id: SessionId,
        config: TreatmentConfig,
        headset: Arc<dyn Headset>,
        device_tx: WeakSender<DeviceCommand>,
    ) -> DeviceResult<Self> {
        let (control_tx, control_rx) = flume::unbounded();
        let (exit_tx, exit_rx) = flume::bounded(1);

        let thread_handle = thread::Builder::new()
            .name(format!("treatment-{}", session_id))
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                info!(session_id, "Treatment thread started");
                let completed =
                    run_protocol(session_id, &config, headset.as_ref(), &control_rx, &device_tx);
                info!(session_id, completed, "Treatment thread finished");
            })
            .map_err(|e| DeviceError::Io(format!("Failed to spawn treatment thread: {}", e)))?;

        Ok(Self {
            session_id,
            control_tx,
            exit_rx,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn pause(&self) {
        self.send(TreatmentControl::Pause);
    }

    pub fn resume(&self) {
        self.send(TreatmentControl::Resume);
    }

    /// Ask the protocol to stop and wait up to `grace` for the thread to exit.
    ///
    /// Returns `true` once the thread has exited and been joined. On `false` the thread is
    /// still running; it will exit at its next step boundary.
    pub fn cancel(&mut self, grace: Duration) -> bool {
        self.send(TreatmentControl::Cancel);
        match self.exit_rx.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.join_thread();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    session_id = self.session_id,
                    ?grace,
                    "Treatment did not acknowledge cancellation in time"
                );
                false
            }
        }
    }

    /// Whether the protocol thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Block until the protocol thread has exited.
    pub fn join(mut self) {
        self.join_thread();
    }

    fn send(&self, cmd: TreatmentControl) {
        if self.control_tx.send(cmd).is_err() {
            debug!(session_id = self.session_id, ?cmd, "Treatment already exited");
        }
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!(session_id = self.session_id, "Treatment thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Treatment {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.send(TreatmentControl::Cancel);
            self.join_thread();
        }
    }
}

/// How a wait for the next protocol step ended
#[derive(Debug, PartialEq, Eq)]
enum StepWait {
    Elapsed,
    Cancelled,
}

/// Wait out one step, honouring control commands.
///
/// Time spent paused does not count towards the step.
fn wait_step(step: Duration, control_rx: &Receiver<TreatmentControl>) -> StepWait {
    let mut remaining = step;
    loop {
        let started = Instant::now();
        match control_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => return StepWait::Elapsed,
            Err(RecvTimeoutError::Disconnected) | Ok(TreatmentControl::Cancel) => {
                return StepWait::Cancelled
            }
            Ok(TreatmentControl::Resume) => {
                remaining = remaining.saturating_sub(started.elapsed());
            }
            Ok(TreatmentControl::Pause) => {
                remaining = remaining.saturating_sub(started.elapsed());
                debug!("Treatment paused");
                loop {
                    match control_rx.recv() {
                        Ok(TreatmentControl::Resume) => break,
                        Ok(TreatmentControl::Pause) => continue,
                        Ok(TreatmentControl::Cancel) | Err(_) => return StepWait::Cancelled,
                    }
                }
                debug!("Treatment resumed");
            }
        }
    }
}

fn measure(headset: &dyn Headset) -> Vec<f32> {
    let sample_rate = headset.sample_rate();
    (0..headset.site_count())
        .map(|site| dominant_frequency(&headset.active_electrode_waveform(site), sample_rate))
        .collect()
}

/// Number of steps in a protocol, saturating at `u32::MAX`
fn protocol_steps(rounds: u32, site_count: usize) -> u32 {
    rounds.saturating_mul(u32::try_from(site_count).unwrap_or(u32::MAX))
}

/// Runs the protocol. Returns `true` if it ran to the end.
fn run_protocol(
    session_id: SessionId,
    config: &TreatmentConfig,
    headset: &dyn Headset,
    control_rx: &Receiver<TreatmentControl>,
    device_tx: &WeakSender<DeviceCommand>,
) -> bool {
    let report = |msg: TreatmentMsg| {
        device_tx
            .upgrade()
            .map_or(false, |tx| tx.send(DeviceCommand::Treatment(msg)).is_ok())
    };

    let baseline_hz = measure(headset);
    if !report(TreatmentMsg::BaselineMeasured {
        session_id,
        baseline_hz: baseline_hz.clone(),
    }) {
        return false;
    }

    let site_count = headset.site_count();
    let total_steps = protocol_steps(config.rounds, site_count);
    let step_duration = Duration::from_millis(config.step_ms);
    let mut step: u32 = 0;

    for _round in 0..config.rounds {
        for site in 0..site_count {
            if wait_step(step_duration, control_rx) == StepWait::Cancelled {
                debug!(session_id, step, "Treatment cancelled");
                return false;
            }
            headset.stimulate(site, config.offset_hz);
            step = step.saturating_add(1);
            if !report(TreatmentMsg::Progress {
                session_id,
                step,
                total_steps,
            }) {
                return false;
            }
        }
    }

    // Sample a fresh window so the measurement reflects the last stimulation
    headset.refresh();
    let result = TreatmentResult {
        baseline_hz,
        treated_hz: measure(headset),
        completed_steps: step,
    };
    report(TreatmentMsg::Finished { session_id, result })
}
