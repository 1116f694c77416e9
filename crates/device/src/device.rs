//! The handheld device state machine
//!
//! [`HandheldDevice`] owns the run state, the battery, the active session with its
//! treatment, and the session history. Every method here is meant to be called from a
//! single context (the device command loop in [`crate::runtime`]), so no field needs a
//! lock. Commands issued in a state where they make no sense are ignored and logged at
//! `debug`; only range errors and infrastructure failures are returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flume::{Receiver, Sender, WeakSender};
use tracing::{debug, error, info, warn};

use neuro_headset::{Headset, HeadsetEvent};
use neuro_types::{
    DeviceConfig, DeviceEvent, DeviceResult, DeviceStatus, RunStatus, Session, SessionId,
    SessionLog, SessionOutcome,
};

use crate::battery::Battery;
use crate::event_bus::EventBus;
use crate::runtime::DeviceCommand;
use crate::treatment::{Treatment, TreatmentMsg};
use crate::upload::UploadSink;

/// Point-in-time view of the device for displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub device_status: DeviceStatus,
    pub run_status: RunStatus,
    pub battery: u8,
    pub contact: bool,
    pub treatment_sig: bool,
    pub session_count: usize,
    pub current_session: Option<SessionId>,
}

/// The session being treated, bound to its treatment
struct ActiveSession {
    session: Session,
    treatment: Treatment,
}

pub struct HandheldDevice {
    config: DeviceConfig,
    headset: Arc<dyn Headset>,
    device_status: DeviceStatus,
    run_status: RunStatus,
    battery: Battery,
    contact: bool,
    treatment_sig: bool,
    active: Option<ActiveSession>,
    sessions: SessionLog,
    next_session_id: SessionId,
    bus: Arc<EventBus>,
    upload_sink: Box<dyn UploadSink>,
    /// Weak side of the device's own command queue, handed to treatments
    command_tx: WeakSender<DeviceCommand>,
    /// Strong sender kept until a command loop takes the queue over
    owner_tx: Option<Sender<DeviceCommand>>,
    /// Treatments that missed the cancellation grace period
    stragglers: Vec<Treatment>,
}

impl HandheldDevice {
    /// Create a powered-off device bound to `headset`.
    ///
    /// Returns the device together with the receiving end of its command queue. Treatment
    /// reports arrive on that queue and must be fed back through
    /// [`crate::runtime::dispatch`].
    pub fn new(
        config: DeviceConfig,
        headset: Arc<dyn Headset>,
        upload_sink: Box<dyn UploadSink>,
    ) -> DeviceResult<(Self, Receiver<DeviceCommand>)> {
        config.validate()?;
        let (command_tx, command_rx) = flume::unbounded();

        let device = Self {
            battery: Battery::from_config(&config.battery),
            contact: headset.has_contact(),
            config,
            headset,
            device_status: DeviceStatus::Off,
            run_status: RunStatus::Idle,
            treatment_sig: false,
            active: None,
            sessions: SessionLog::new(),
            next_session_id: 1,
            bus: Arc::new(EventBus::new()),
            upload_sink,
            command_tx: command_tx.downgrade(),
            owner_tx: Some(command_tx),
            stragglers: Vec::new(),
        };
        info!(
            battery = device.battery.percent(),
            contact = device.contact,
            sites = device.headset.site_count(),
            "Handheld device created"
        );
        Ok((device, command_rx))
    }

    // ---- commands ----

    /// Arm a new session and dispatch its treatment.
    ///
    /// Requires the device to be on, Idle or Stopped, with electrode contact and a charged
    /// battery. Otherwise nothing happens.
    pub fn create_session(&mut self) {
        self.reap_stragglers();

        if !self.device_status.is_on() {
            debug!("Start ignored: device is off");
            return;
        }
        if !self.run_status.can_begin() {
            debug!(run_status = %self.run_status, "Start ignored: session already active");
            return;
        }
        if !self.contact {
            debug!("Start ignored: no electrode contact");
            return;
        }
        if self.battery.is_depleted() {
            debug!("Start ignored: battery is empty");
            return;
        }
        if self.command_tx.upgrade().is_none() {
            debug!("Start ignored: command queue closed");
            return;
        }

        let session_id = self.next_session_id;
        let session = Session::open(session_id, Utc::now());
        let treatment = match Treatment::spawn(
            session_id,
            self.config.treatment.clone(),
            Arc::clone(&self.headset),
            self.command_tx.clone(),
        ) {
            Ok(treatment) => treatment,
            Err(e) => {
                error!(session_id, "Could not start treatment: {}", e);
                return;
            }
        };
        self.next_session_id += 1;

        let start = session.start();
        self.active = Some(ActiveSession { session, treatment });
        self.treatment_sig = true;
        self.set_run_status(RunStatus::Running);
        info!(session_id, "Session started");
        self.bus
            .broadcast(DeviceEvent::SessionStarted { session_id, start });
    }

    /// "Start session" entry of the main menu
    pub fn begin_session(&mut self) {
        self.create_session();
    }

    pub fn pause(&mut self) {
        if self.run_status != RunStatus::Running {
            debug!(run_status = %self.run_status, "Pause ignored");
            return;
        }
        if let Some(active) = &self.active {
            active.treatment.pause();
        }
        self.treatment_sig = false;
        self.set_run_status(RunStatus::Paused);
    }

    pub fn resume(&mut self) {
        if self.run_status != RunStatus::Paused {
            debug!(run_status = %self.run_status, "Resume ignored");
            return;
        }
        if !self.contact {
            debug!("Resume ignored: no electrode contact");
            return;
        }
        if let Some(active) = &self.active {
            active.treatment.resume();
        }
        self.treatment_sig = true;
        self.set_run_status(RunStatus::Running);
    }

    /// Cancel the treatment and log the session. No-op without an active session.
    pub fn stop(&mut self) {
        if !self.run_status.has_session() {
            debug!(run_status = %self.run_status, "Stop ignored");
            return;
        }
        self.end_session(SessionOutcome::Stopped);
    }

    /// Contact with the skin was lost: stop like the user would.
    pub fn disconnect(&mut self) {
        self.set_contact(false);
        if self.run_status.has_session() {
            warn!("Electrode contact lost, stopping session");
            self.end_session(SessionOutcome::ContactLost);
        } else {
            debug!("Disconnect with no active session");
        }
    }

    /// Switch the device on or off.
    ///
    /// Switching off ends the active session first. Switching on resets the run state to
    /// Idle, unless the battery is empty.
    pub fn power_toggle(&mut self) {
        match self.device_status {
            DeviceStatus::On => self.power_off(SessionOutcome::PoweredOff),
            DeviceStatus::Off => {
                if self.battery.is_depleted() {
                    debug!("Power on ignored: battery is empty");
                    return;
                }
                self.device_status = DeviceStatus::On;
                info!(battery = self.battery.percent(), "Device powered on");
                self.bus.broadcast(DeviceEvent::PowerChanged(DeviceStatus::On));
                self.set_run_status(RunStatus::Idle);
            }
        }
    }

    /// One battery tick. Only drains while the device is on.
    pub fn reduce_battery(&mut self) {
        if !self.device_status.is_on() {
            return;
        }
        let level = self.battery.drain();
        debug!(battery = level, "Battery drained");
        self.bus.broadcast(DeviceEvent::BatteryChanged(level));

        if self.battery.is_depleted() {
            warn!("Battery depleted, shutting down");
            if self.run_status.has_session() {
                self.end_session(SessionOutcome::BatteryDepleted);
            }
            self.bus.broadcast(DeviceEvent::BatteryDepleted);
            self.power_off(SessionOutcome::BatteryDepleted);
        }
    }

    pub fn charge_battery_to_full(&mut self) {
        if self.run_status.has_session() {
            warn!("Charging during an active session");
        }
        self.battery.charge_to_full();
        info!(battery = self.battery.percent(), "Battery charged");
        self.bus
            .broadcast(DeviceEvent::BatteryChanged(self.battery.percent()));
    }

    /// Hand the logged session at `index` to the upload sink.
    pub fn upload_to_pc(&mut self, index: usize) -> DeviceResult<()> {
        let result = self
            .sessions
            .get(index)
            .and_then(|session| self.upload_sink.transfer(session).map(|()| session.id()));

        match result {
            Ok(session_id) => {
                info!(index, session_id, "Session uploaded");
                self.bus
                    .broadcast(DeviceEvent::SessionUploaded { index, session_id });
                Ok(())
            }
            Err(e) => {
                warn!(index, "Upload failed: {}", e);
                self.bus.broadcast(DeviceEvent::UploadFailed {
                    index,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Date and time menu entry. Setting the clock is not supported.
    pub fn date_time_selection(&mut self) {
        debug!("Date/time selection requested");
    }

    /// Advance the headset to its next waveform window.
    pub fn refresh_waveforms(&mut self) {
        self.headset.refresh();
        self.bus.broadcast(DeviceEvent::WaveformsUpdated);
    }

    pub fn on_headset_event(&mut self, event: HeadsetEvent) {
        match event {
            HeadsetEvent::WaveformsUpdated => self.bus.broadcast(DeviceEvent::WaveformsUpdated),
            HeadsetEvent::ContactEstablished => self.set_contact(true),
            HeadsetEvent::RequestStop => self.disconnect(),
        }
    }

    /// Apply a report from a treatment thread. Reports for a session that is no longer
    /// active are stale and dropped.
    pub fn on_treatment_msg(&mut self, msg: TreatmentMsg) {
        let session_id = msg.session_id();
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.session.id() == session_id)
        else {
            debug!(session_id, "Discarding stale treatment report");
            return;
        };

        match msg {
            TreatmentMsg::BaselineMeasured { baseline_hz, .. } => {
                debug!(session_id, sites = baseline_hz.len(), "Baseline measured");
                active.session.record_baseline(baseline_hz);
            }
            TreatmentMsg::Progress {
                step, total_steps, ..
            } => {
                active.session.record_progress(step);
                self.bus.broadcast(DeviceEvent::TreatmentProgress {
                    session_id,
                    step,
                    total_steps,
                });
            }
            TreatmentMsg::Finished { result, .. } => {
                let Some(ActiveSession {
                    mut session,
                    treatment,
                }) = self.active.take()
                else {
                    return;
                };
                info!(session_id, steps = result.completed_steps, "Treatment completed");
                session.record_result(result);
                session.close(Utc::now(), SessionOutcome::Completed);
                // Finished is the last report, the thread is about to exit
                treatment.join();
                self.finalize(session);
            }
        }
    }

    // ---- queries ----

    pub fn device_status(&self) -> DeviceStatus {
        self.device_status
    }

    pub fn run_status(&self) -> RunStatus {
        self.run_status
    }

    pub fn battery(&self) -> u8 {
        self.battery.percent()
    }

    pub fn contact(&self) -> bool {
        self.contact
    }

    pub fn treatment_sig(&self) -> bool {
        self.treatment_sig
    }

    /// Finalized sessions in chronological order
    pub fn sessions(&self) -> &SessionLog {
        &self.sessions
    }

    /// The session in progress, if any
    pub fn current_session(&self) -> Option<&Session> {
        self.active.as_ref().map(|active| &active.session)
    }

    pub fn site_count(&self) -> usize {
        self.headset.site_count()
    }

    pub fn active_electrode_waveform(&self, index: usize) -> Vec<f32> {
        self.headset.active_electrode_waveform(index)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device_status: self.device_status,
            run_status: self.run_status,
            battery: self.battery.percent(),
            contact: self.contact,
            treatment_sig: self.treatment_sig,
            session_count: self.sessions.len(),
            current_session: self.current_session().map(Session::id),
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Hand over the device's strong sender into its command queue.
    ///
    /// The device itself only keeps a weak sender afterwards, so the queue closes once
    /// every sender obtained from the returned one has been dropped.
    pub fn take_command_sender(&mut self) -> Option<Sender<DeviceCommand>> {
        self.owner_tx.take()
    }

    /// End the active session and wait for every treatment thread to exit.
    pub fn shutdown(&mut self) {
        if self.active.is_some() {
            self.end_session(SessionOutcome::Shutdown);
        }
        for treatment in self.stragglers.drain(..) {
            debug!(session_id = treatment.session_id(), "Joining late treatment");
            treatment.join();
        }
    }

    // ---- internals ----

    fn power_off(&mut self, outcome: SessionOutcome) {
        if self.run_status.has_session() {
            self.end_session(outcome);
        }
        if self.device_status == DeviceStatus::Off {
            return;
        }
        self.device_status = DeviceStatus::Off;
        self.treatment_sig = false;
        info!("Device powered off");
        self.bus.broadcast(DeviceEvent::PowerChanged(DeviceStatus::Off));
    }

    /// Cancel the active treatment and log its session.
    ///
    /// The end timestamp is taken before cancelling. A treatment that does not exit
    /// within the grace period is kept aside and joined later.
    fn end_session(&mut self, outcome: SessionOutcome) {
        let Some(ActiveSession {
            mut session,
            mut treatment,
        }) = self.active.take()
        else {
            return;
        };
        let end = Utc::now();

        let grace = Duration::from_millis(self.config.treatment.cancel_grace_ms);
        if !treatment.cancel(grace) {
            warn!(session_id = session.id(), "Finalizing session before treatment exit");
            self.stragglers.push(treatment);
        }

        session.close(end, outcome);
        info!(session_id = session.id(), ?outcome, "Session ended");
        self.finalize(session);
        self.reap_stragglers();
    }

    /// Move a closed session into the history and announce it.
    fn finalize(&mut self, session: Session) {
        let announced = Arc::new(session.clone());
        match self.sessions.append(session) {
            Ok(()) => self.bus.broadcast(DeviceEvent::SessionStopped(announced)),
            Err(e) => error!("Could not log session: {}", e),
        }
        self.treatment_sig = false;
        self.set_run_status(RunStatus::Stopped);
    }

    fn set_run_status(&mut self, to: RunStatus) {
        let from = self.run_status;
        if from == to {
            return;
        }
        self.run_status = to;
        debug!(%from, %to, "Run status changed");
        self.bus.broadcast(DeviceEvent::RunStatusChanged { from, to });
    }

    fn set_contact(&mut self, contact: bool) {
        if self.contact == contact {
            return;
        }
        self.contact = contact;
        info!(contact, "Electrode contact changed");
        self.bus.broadcast(DeviceEvent::ContactChanged(contact));
    }

    fn reap_stragglers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .stragglers
            .drain(..)
            .partition(Treatment::is_finished);
        for treatment in finished {
            treatment.join();
        }
        self.stragglers = running;
    }
}

impl Drop for HandheldDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatch;
    use crate::upload::PcWindow;
    use neuro_headset::MockHeadset;
    use neuro_types::{DeviceError, HeadsetConfig, TreatmentConfig};

    struct Rig {
        device: HandheldDevice,
        queue: Receiver<DeviceCommand>,
        headset: Arc<MockHeadset>,
        pc: PcWindow,
    }

    fn rig(step_ms: u64, contact: bool) -> Rig {
        let config = DeviceConfig {
            treatment: TreatmentConfig {
                rounds: 1,
                step_ms,
                ..Default::default()
            },
            headset: HeadsetConfig {
                site_count: 3,
                initial_contact: contact,
                ..Default::default()
            },
            ..Default::default()
        };
        let headset = Arc::new(MockHeadset::new(config.headset.clone()).unwrap());
        let pc = PcWindow::new();
        let (device, queue) =
            HandheldDevice::new(config, headset.clone(), Box::new(pc.clone())).unwrap();
        Rig {
            device,
            queue,
            headset,
            pc,
        }
    }

    /// Feed queued treatment reports to the device until `done` holds.
    fn pump_until(rig: &mut Rig, done: impl Fn(&HandheldDevice) -> bool) {
        while !done(&rig.device) {
            let cmd = rig
                .queue
                .recv_timeout(Duration::from_secs(5))
                .expect("Treatment report");
            dispatch(&mut rig.device, cmd);
        }
    }

    #[test]
    fn test_power_toggle() {
        let mut rig = rig(60_000, true);
        assert_eq!(rig.device.device_status(), DeviceStatus::Off);
        rig.device.power_toggle();
        assert_eq!(rig.device.device_status(), DeviceStatus::On);
        assert_eq!(rig.device.run_status(), RunStatus::Idle);
        rig.device.power_toggle();
        assert_eq!(rig.device.device_status(), DeviceStatus::Off);
    }

    #[test]
    fn test_begin_requires_power() {
        let mut rig = rig(60_000, true);
        rig.device.begin_session();
        assert_eq!(rig.device.run_status(), RunStatus::Idle);
        assert!(rig.device.current_session().is_none());
    }

    #[test]
    fn test_begin_without_contact_is_ignored() {
        let mut rig = rig(60_000, false);
        rig.device.power_toggle();
        rig.device.begin_session();
        assert_eq!(rig.device.run_status(), RunStatus::Idle);
        assert!(rig.device.sessions().is_empty());
        assert!(rig.device.current_session().is_none());
    }

    #[test]
    fn test_pause_resume_stop() {
        let mut rig = rig(60_000, true);
        let events = rig.device.bus().subscribe_all("test", 64);
        rig.device.power_toggle();
        rig.device.begin_session();
        assert_eq!(rig.device.run_status(), RunStatus::Running);
        assert!(rig.device.treatment_sig());

        // Illegal in Running
        rig.device.resume();
        assert_eq!(rig.device.run_status(), RunStatus::Running);

        rig.device.pause();
        assert_eq!(rig.device.run_status(), RunStatus::Paused);
        assert!(!rig.device.treatment_sig());
        rig.device.pause();
        assert_eq!(rig.device.run_status(), RunStatus::Paused);

        rig.device.resume();
        assert_eq!(rig.device.run_status(), RunStatus::Running);

        rig.device.stop();
        assert_eq!(rig.device.run_status(), RunStatus::Stopped);
        assert_eq!(rig.device.sessions().len(), 1);
        let logged = rig.device.sessions().get(0).unwrap();
        assert_eq!(logged.outcome(), Some(SessionOutcome::Stopped));
        assert!(logged.end().unwrap() >= logged.start());

        // Released: further control is a no-op
        rig.device.stop();
        rig.device.pause();
        rig.device.resume();
        assert_eq!(rig.device.run_status(), RunStatus::Stopped);
        assert_eq!(rig.device.sessions().len(), 1);

        let names: Vec<_> = events.try_iter().map(|e| e.event_type_name()).collect();
        assert_eq!(names.iter().filter(|n| **n == "SessionStarted").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "SessionStopped").count(), 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let mut rig = rig(60_000, true);
        rig.device.power_toggle();
        rig.device.begin_session();
        rig.device.stop();
        rig.device.begin_session();
        assert_eq!(rig.device.run_status(), RunStatus::Running);
        assert_eq!(rig.device.current_session().map(Session::id), Some(2));
        rig.device.stop();
        let ids: Vec<_> = rig.device.sessions().iter().map(Session::id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_natural_completion() {
        let mut rig = rig(1, true);
        rig.device.power_toggle();
        rig.device.begin_session();
        pump_until(&mut rig, |d| d.run_status() == RunStatus::Stopped);

        let logged = rig.device.sessions().get(0).unwrap();
        assert_eq!(logged.outcome(), Some(SessionOutcome::Completed));
        assert_eq!(logged.result().completed_steps, 3);
        assert_eq!(logged.result().baseline_hz.len(), 3);
        assert_eq!(logged.result().treated_hz.len(), 3);
        assert!(!rig.device.treatment_sig());
    }

    #[test]
    fn test_stale_report_is_discarded() {
        let mut rig = rig(60_000, true);
        rig.device.power_toggle();
        rig.device.begin_session();
        rig.device.stop();

        rig.device.on_treatment_msg(TreatmentMsg::Finished {
            session_id: 1,
            result: Default::default(),
        });
        rig.device.on_treatment_msg(TreatmentMsg::Progress {
            session_id: 1,
            step: 1,
            total_steps: 3,
        });
        assert_eq!(rig.device.sessions().len(), 1);
        assert_eq!(
            rig.device.sessions().get(0).unwrap().outcome(),
            Some(SessionOutcome::Stopped)
        );
        assert_eq!(rig.device.run_status(), RunStatus::Stopped);
    }

    #[test]
    fn test_disconnect_stops_session() {
        let mut rig = rig(60_000, true);
        rig.device.power_toggle();
        rig.device.begin_session();
        rig.headset.set_contact(false);
        rig.device.on_headset_event(HeadsetEvent::RequestStop);
        assert_eq!(rig.device.run_status(), RunStatus::Stopped);
        assert!(!rig.device.contact());
        assert_eq!(
            rig.device.sessions().get(0).unwrap().outcome(),
            Some(SessionOutcome::ContactLost)
        );

        // Idempotent
        rig.device.disconnect();
        assert_eq!(rig.device.sessions().len(), 1);

        // No restart until contact comes back
        rig.device.begin_session();
        assert_eq!(rig.device.run_status(), RunStatus::Stopped);
        rig.device.on_headset_event(HeadsetEvent::ContactEstablished);
        rig.device.begin_session();
        assert_eq!(rig.device.run_status(), RunStatus::Running);
    }

    #[test]
    fn test_resume_requires_contact() {
        let mut rig = rig(60_000, true);
        rig.device.power_toggle();
        rig.device.begin_session();
        rig.device.pause();
        rig.device.set_contact(false);
        rig.device.resume();
        assert_eq!(rig.device.run_status(), RunStatus::Paused);
    }

    #[test]
    fn test_power_off_while_paused_logs_session() {
        let mut rig = rig(60_000, true);
        rig.device.power_toggle();
        rig.device.begin_session();
        rig.device.pause();
        rig.device.power_toggle();
        assert_eq!(rig.device.device_status(), DeviceStatus::Off);
        assert_eq!(rig.device.run_status(), RunStatus::Stopped);
        assert_eq!(
            rig.device.sessions().get(0).unwrap().outcome(),
            Some(SessionOutcome::PoweredOff)
        );

        rig.device.power_toggle();
        assert_eq!(rig.device.run_status(), RunStatus::Idle);
    }

    #[test]
    fn test_battery_drains_only_while_on() {
        let mut rig = rig(60_000, true);
        rig.device.reduce_battery();
        assert_eq!(rig.device.battery(), 100);
        rig.device.power_toggle();
        rig.device.reduce_battery();
        assert_eq!(rig.device.battery(), 99);
        rig.device.charge_battery_to_full();
        assert_eq!(rig.device.battery(), 100);
    }

    #[test]
    fn test_depletion_forces_stop_and_power_off() {
        let mut rig = rig(60_000, true);
        rig.device.battery = Battery::new(2, 1);
        rig.device.power_toggle();
        rig.device.begin_session();
        rig.device.reduce_battery();
        assert_eq!(rig.device.run_status(), RunStatus::Running);
        rig.device.reduce_battery();

        assert_eq!(rig.device.battery(), 0);
        assert_eq!(rig.device.run_status(), RunStatus::Stopped);
        assert_eq!(rig.device.device_status(), DeviceStatus::Off);
        assert_eq!(
            rig.device.sessions().get(0).unwrap().outcome(),
            Some(SessionOutcome::BatteryDepleted)
        );

        // Cannot power on an empty battery
        rig.device.power_toggle();
        assert_eq!(rig.device.device_status(), DeviceStatus::Off);
        rig.device.charge_battery_to_full();
        rig.device.power_toggle();
        assert_eq!(rig.device.device_status(), DeviceStatus::On);
    }

    #[test]
    fn test_upload() {
        let mut rig = rig(60_000, true);
        rig.device.power_toggle();
        for _ in 0..2 {
            rig.device.begin_session();
            rig.device.stop();
        }

        let err = rig.device.upload_to_pc(5).unwrap_err();
        assert_eq!(err, DeviceError::InvalidSessionIndex { index: 5, len: 2 });
        assert!(rig.pc.transfers().is_empty());

        rig.device.upload_to_pc(1).unwrap();
        let transfers = rig.pc.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].id(), 2);
        assert_eq!(rig.device.sessions().len(), 2);
    }

    #[test]
    fn test_slow_treatment_is_finalized_optimistically() {
        struct StuckHeadset;
        impl Headset for StuckHeadset {
            fn site_count(&self) -> usize {
                1
            }
            fn sample_rate(&self) -> f32 {
                256.0
            }
            fn active_electrode_waveform(&self, _index: usize) -> Vec<f32> {
                std::thread::sleep(Duration::from_millis(300));
                Vec::new()
            }
            fn has_contact(&self) -> bool {
                true
            }
            fn refresh(&self) {}
        }

        let config = DeviceConfig {
            treatment: TreatmentConfig {
                cancel_grace_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut device, _queue) =
            HandheldDevice::new(config, Arc::new(StuckHeadset), Box::new(PcWindow::new()))
                .unwrap();
        device.power_toggle();
        device.begin_session();
        device.stop();

        // Logged right away even though the treatment is still measuring
        assert_eq!(device.run_status(), RunStatus::Stopped);
        assert_eq!(device.sessions().len(), 1);
        assert_eq!(device.stragglers.len(), 1);

        device.shutdown();
        assert!(device.stragglers.is_empty());
    }

    #[derive(Debug, Clone, Copy)]
    enum Setup {
        Off,
        OffAfterSession,
        Idle,
        Running,
        Paused,
        Stopped,
    }

    fn arrange(setup: Setup) -> Rig {
        let mut rig = rig(60_000, true);
        let device = &mut rig.device;
        match setup {
            Setup::Off => {}
            Setup::OffAfterSession => {
                device.power_toggle();
                device.begin_session();
                device.power_toggle();
            }
            Setup::Idle => device.power_toggle(),
            Setup::Running => {
                device.power_toggle();
                device.begin_session();
            }
            Setup::Paused => {
                device.power_toggle();
                device.begin_session();
                device.pause();
            }
            Setup::Stopped => {
                device.power_toggle();
                device.begin_session();
                device.stop();
            }
        }
        rig
    }

    #[test]
    fn test_illegal_commands_leave_state_untouched() {
        type Command = (&'static str, fn(&mut HandheldDevice));
        let begin: Command = ("begin_session", HandheldDevice::begin_session);
        let create: Command = ("create_session", HandheldDevice::create_session);
        let pause: Command = ("pause", HandheldDevice::pause);
        let resume: Command = ("resume", HandheldDevice::resume);
        let stop: Command = ("stop", HandheldDevice::stop);

        let cases: Vec<(Setup, Vec<Command>)> = vec![
            (Setup::Off, vec![begin, create, pause, resume, stop]),
            (Setup::OffAfterSession, vec![begin, create, pause, resume, stop]),
            (Setup::Idle, vec![pause, resume, stop]),
            (Setup::Running, vec![begin, create, resume]),
            (Setup::Paused, vec![begin, create, pause]),
            (Setup::Stopped, vec![pause, resume, stop]),
        ];

        for (setup, commands) in cases {
            for (name, command) in commands {
                let mut rig = arrange(setup);
                let device = &mut rig.device;
                let before = (
                    device.device_status(),
                    device.run_status(),
                    device.current_session().map(Session::id),
                    device.sessions().len(),
                );

                command(device);

                let after = (
                    device.device_status(),
                    device.run_status(),
                    device.current_session().map(Session::id),
                    device.sessions().len(),
                );
                assert_eq!(before, after, "{} changed state in {:?}", name, setup);
                assert!(
                    device.sessions().iter().all(Session::is_closed),
                    "{} left an open session in the history in {:?}",
                    name,
                    setup
                );
            }
        }
    }
}
