use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::Receiver;

use neuro_headset::{HeadsetEvent, MockHeadset};
use neuro_types::{
    BatteryConfig, DeviceConfig, DeviceError, DeviceEvent, DeviceStatus, EventFilter,
    HeadsetConfig, RunStatus, SessionOutcome, TreatmentConfig,
};
use neuroset_device::{runtime, DeviceHandle, HandheldDevice, PcWindow};

struct TestDevice {
    handle: DeviceHandle,
    thread: JoinHandle<()>,
    headset: Arc<MockHeadset>,
    pc: PcWindow,
}

impl TestDevice {
    fn start(config: DeviceConfig) -> Self {
        let headset = Arc::new(MockHeadset::new(config.headset.clone()).unwrap());
        let pc = PcWindow::new();
        let (device, rx) =
            HandheldDevice::new(config, headset.clone(), Box::new(pc.clone())).unwrap();
        let (handle, thread) = runtime::spawn(device, rx).unwrap();
        Self {
            handle,
            thread,
            headset,
            pc,
        }
    }

    fn finish(self) {
        self.handle.shutdown().unwrap();
        self.thread.join().unwrap();
    }
}

/// Treatment that never gets past its first step on its own
fn slow_config() -> DeviceConfig {
    DeviceConfig {
        treatment: TreatmentConfig {
            step_ms: 60_000,
            ..Default::default()
        },
        headset: HeadsetConfig {
            site_count: 4,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn wait_for(events: &Receiver<DeviceEvent>, wanted: impl Fn(&DeviceEvent) -> bool) -> DeviceEvent {
    loop {
        let event = events
            .recv_timeout(Duration::from_secs(5))
            .expect("Timed out waiting for event");
        if wanted(&event) {
            return event;
        }
    }
}

#[test]
fn test_drain_pause_resume_stop() {
    let mut config = slow_config();
    config.battery = BatteryConfig {
        step_percent: 5,
        ..Default::default()
    };
    let device = TestDevice::start(config);
    let h = &device.handle;

    h.power_toggle().unwrap();
    h.begin_session().unwrap();
    for _ in 0..5 {
        h.reduce_battery().unwrap();
    }
    h.pause().unwrap();
    assert_eq!(h.run_status().unwrap(), RunStatus::Paused);
    h.resume().unwrap();
    h.stop().unwrap();

    let snapshot = h.snapshot().unwrap();
    assert_eq!(snapshot.battery, 75);
    assert_eq!(snapshot.run_status, RunStatus::Stopped);
    assert!(!snapshot.treatment_sig);
    assert_eq!(snapshot.current_session, None);

    let sessions = h.sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].end().unwrap() >= sessions[0].start());
    assert_eq!(sessions[0].outcome(), Some(SessionOutcome::Stopped));

    device.finish();
}

#[test]
fn test_begin_without_contact() {
    let mut config = slow_config();
    config.headset.initial_contact = false;
    let device = TestDevice::start(config);
    let h = &device.handle;

    h.power_toggle().unwrap();
    h.begin_session().unwrap();

    assert_eq!(h.run_status().unwrap(), RunStatus::Idle);
    assert!(h.sessions().unwrap().is_empty());

    // Putting the electrodes on makes the device arm
    device.headset.set_contact(true);
    h.headset_event(HeadsetEvent::ContactEstablished).unwrap();
    h.begin_session().unwrap();
    assert_eq!(h.run_status().unwrap(), RunStatus::Running);

    device.finish();
}

#[test]
fn test_upload_out_of_range() {
    let device = TestDevice::start(slow_config());
    let h = &device.handle;
    let events = h.subscribe("uploads", 16, vec![EventFilter::SessionOnly]);

    h.power_toggle().unwrap();
    for _ in 0..2 {
        h.begin_session().unwrap();
        h.stop().unwrap();
    }

    assert_eq!(
        h.upload_to_pc(5),
        Err(DeviceError::InvalidSessionIndex { index: 5, len: 2 })
    );
    let failed = wait_for(&events, |e| matches!(e, DeviceEvent::UploadFailed { .. }));
    assert!(matches!(failed, DeviceEvent::UploadFailed { index: 5, .. }));
    assert_eq!(h.sessions().unwrap().len(), 2);
    assert!(device.pc.transfers().is_empty());

    h.upload_to_pc(0).unwrap();
    assert_eq!(device.pc.transfers()[0].id(), 1);

    device.finish();
}

#[test]
fn test_battery_depletes_while_running() {
    let mut config = slow_config();
    config.battery = BatteryConfig {
        initial_percent: 10,
        step_percent: 5,
        ..Default::default()
    };
    let device = TestDevice::start(config);
    let h = &device.handle;
    let events = h.subscribe("battery", 16, vec![EventFilter::BatteryOnly]);

    h.power_toggle().unwrap();
    h.begin_session().unwrap();
    h.reduce_battery().unwrap();
    h.reduce_battery().unwrap();

    wait_for(&events, |e| matches!(e, DeviceEvent::BatteryDepleted));
    let snapshot = h.snapshot().unwrap();
    assert_eq!(snapshot.battery, 0);
    assert_ne!(snapshot.run_status, RunStatus::Running);
    assert_eq!(snapshot.device_status, DeviceStatus::Off);

    let sessions = h.sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].outcome(), Some(SessionOutcome::BatteryDepleted));

    // Extra ticks while off change nothing
    h.reduce_battery().unwrap();
    assert_eq!(h.battery().unwrap(), 0);

    device.finish();
}

#[test]
fn test_stop_twice_logs_once() {
    let device = TestDevice::start(slow_config());
    let h = &device.handle;

    h.power_toggle().unwrap();
    h.begin_session().unwrap();
    h.stop().unwrap();
    h.stop().unwrap();
    h.pause().unwrap();
    h.resume().unwrap();

    assert_eq!(h.sessions().unwrap().len(), 1);
    assert_eq!(h.run_status().unwrap(), RunStatus::Stopped);

    device.finish();
}

#[test]
fn test_treatment_runs_to_completion() {
    let config = DeviceConfig {
        treatment: TreatmentConfig {
            rounds: 2,
            step_ms: 1,
            ..Default::default()
        },
        headset: HeadsetConfig {
            site_count: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let device = TestDevice::start(config);
    let h = &device.handle;
    let events = h.subscribe_all("observer", 256);

    h.power_toggle().unwrap();
    h.begin_session().unwrap();

    let stopped = wait_for(&events, |e| matches!(e, DeviceEvent::SessionStopped(_)));
    let DeviceEvent::SessionStopped(session) = stopped else {
        unreachable!()
    };
    assert_eq!(session.outcome(), Some(SessionOutcome::Completed));
    assert_eq!(session.result().completed_steps, 6);
    assert_eq!(session.result().treated_hz.len(), 3);

    assert_eq!(h.run_status().unwrap(), RunStatus::Stopped);
    assert_eq!(h.sessions().unwrap()[0], *session);

    device.finish();
}

#[test]
fn test_observer_sees_start_then_stop() {
    let device = TestDevice::start(slow_config());
    let h = &device.handle;
    let events = h.subscribe("sessions", 16, vec![EventFilter::SessionOnly]);

    h.power_toggle().unwrap();
    h.begin_session().unwrap();
    h.stop().unwrap();

    let started = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(started, DeviceEvent::SessionStarted { session_id: 1, .. }));
    let stopped = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(stopped, DeviceEvent::SessionStopped(ref s) if s.id() == 1));

    device.finish();
}

#[test]
fn test_shutdown_ends_active_session() {
    let device = TestDevice::start(slow_config());
    let h = device.handle.clone();
    let events = h.subscribe("sessions", 16, vec![EventFilter::SessionOnly]);

    h.power_toggle().unwrap();
    h.begin_session().unwrap();
    assert_eq!(h.run_status().unwrap(), RunStatus::Running);
    device.finish();

    let stopped = wait_for(&events, |e| matches!(e, DeviceEvent::SessionStopped(_)));
    let DeviceEvent::SessionStopped(session) = stopped else {
        unreachable!()
    };
    assert_eq!(session.outcome(), Some(SessionOutcome::Shutdown));
    assert_eq!(h.snapshot(), Err(DeviceError::DeviceUnavailable));
}

#[test]
fn test_contact_loss_stops_session() {
    let device = TestDevice::start(slow_config());
    let h = &device.handle;

    h.power_toggle().unwrap();
    h.begin_session().unwrap();
    device.headset.set_contact(false);
    h.headset_event(HeadsetEvent::RequestStop).unwrap();
    h.headset_event(HeadsetEvent::RequestStop).unwrap();

    let sessions = h.sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].outcome(), Some(SessionOutcome::ContactLost));
    assert!(!h.snapshot().unwrap().contact);

    device.finish();
}
