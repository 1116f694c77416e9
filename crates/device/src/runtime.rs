//! Single-consumer command loop for the handheld device
//!
//! Everything that changes device state, whether user commands, timer ticks, headset
//! events or treatment reports, is a [`DeviceCommand`] on one queue. The device thread
//! processes them one at a time in arrival order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use tracing::{debug, info};

use neuro_headset::HeadsetEvent;
use neuro_types::{
    DeviceError, DeviceEvent, DeviceResult, DeviceStatus, EventFilter, RunStatus, Session,
};

use crate::device::{DeviceSnapshot, HandheldDevice};
use crate::event_bus::EventBus;
use crate::treatment::TreatmentMsg;

/// Read-only requests answered on a reply channel
#[derive(Debug)]
pub enum DeviceQuery {
    Snapshot(Sender<DeviceSnapshot>),
    Sessions(Sender<Vec<Session>>),
    SiteCount(Sender<usize>),
    Waveform { site: usize, reply: Sender<Vec<f32>> },
}

#[derive(Debug)]
pub enum DeviceCommand {
    CreateSession,
    BeginSession,
    Stop,
    Pause,
    Resume,
    PowerToggle,
    Disconnect,
    UploadToPc {
        index: usize,
        reply: Option<Sender<DeviceResult<()>>>,
    },
    ReduceBattery,
    ChargeBatteryToFull,
    DateTimeSelection,
    RefreshWaveforms,
    Headset(HeadsetEvent),
    Treatment(TreatmentMsg),
    Query(DeviceQuery),
    /// Ends the command loop. `ack` fires once the device and its treatments are gone.
    Shutdown { ack: Sender<()> },
}

/// Apply one command to the device.
pub fn dispatch(device: &mut HandheldDevice, cmd: DeviceCommand) {
    match cmd {
        DeviceCommand::CreateSession => device.create_session(),
        DeviceCommand::BeginSession => device.begin_session(),
        DeviceCommand::Stop => device.stop(),
        DeviceCommand::Pause => device.pause(),
        DeviceCommand::Resume => device.resume(),
        DeviceCommand::PowerToggle => device.power_toggle(),
        DeviceCommand::Disconnect => device.disconnect(),
        DeviceCommand::UploadToPc { index, reply } => {
            let result = device.upload_to_pc(index);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        DeviceCommand::ReduceBattery => device.reduce_battery(),
        DeviceCommand::ChargeBatteryToFull => device.charge_battery_to_full(),
        DeviceCommand::DateTimeSelection => device.date_time_selection(),
        DeviceCommand::RefreshWaveforms => device.refresh_waveforms(),
        DeviceCommand::Headset(event) => device.on_headset_event(event),
        DeviceCommand::Treatment(msg) => device.on_treatment_msg(msg),
        DeviceCommand::Query(query) => answer(device, query),
        DeviceCommand::Shutdown { ack } => {
            device.shutdown();
            let _ = ack.send(());
        }
    }
}

fn answer(device: &HandheldDevice, query: DeviceQuery) {
    // A dropped reply receiver just means the caller gave up
    match query {
        DeviceQuery::Snapshot(reply) => {
            let _ = reply.send(device.snapshot());
        }
        DeviceQuery::Sessions(reply) => {
            let _ = reply.send(device.sessions().snapshot());
        }
        DeviceQuery::SiteCount(reply) => {
            let _ = reply.send(device.site_count());
        }
        DeviceQuery::Waveform { site, reply } => {
            let _ = reply.send(device.active_electrode_waveform(site));
        }
    }
}

/// Run the command loop until a `Shutdown` command arrives or every sender is gone.
///
/// The device is dropped, and with it every treatment joined, before the shutdown is
/// acknowledged.
pub fn run(mut device: HandheldDevice, command_rx: Receiver<DeviceCommand>) {
    info!("Device command loop started");
    let ack = loop {
        match command_rx.recv() {
            Ok(DeviceCommand::Shutdown { ack }) => break Some(ack),
            Ok(cmd) => dispatch(&mut device, cmd),
            Err(_) => {
                info!("All senders disconnected, initiating shutdown");
                break None;
            }
        }
    };

    info!("Releasing device");
    device.shutdown();
    drop(device);
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
    info!("Device command loop finished");
}

/// Start the command loop on its own thread.
pub fn spawn(
    mut device: HandheldDevice,
    command_rx: Receiver<DeviceCommand>,
) -> DeviceResult<(DeviceHandle, JoinHandle<()>)> {
    let tx = device
        .take_command_sender()
        .ok_or(DeviceError::DeviceUnavailable)?;
    let handle = DeviceHandle {
        tx,
        bus: device.bus(),
    };
    let thread_handle = thread::Builder::new()
        .name("device".to_string())
        .spawn(move || run(device, command_rx))
        .map_err(|e| DeviceError::Io(format!("Failed to spawn device thread: {}", e)))?;
    Ok((handle, thread_handle))
}

/// Cloneable front end to a device running in its command loop
#[derive(Clone)]
pub struct DeviceHandle {
    tx: Sender<DeviceCommand>,
    bus: Arc<EventBus>,
}

impl DeviceHandle {
    /// Queue a command without waiting for it to be processed
    pub fn send(&self, cmd: DeviceCommand) -> DeviceResult<()> {
        self.tx.send(cmd).map_err(|_| DeviceError::DeviceUnavailable)
    }

    pub fn create_session(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::CreateSession)
    }

    pub fn begin_session(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::BeginSession)
    }

    pub fn stop(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::Stop)
    }

    pub fn pause(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::Pause)
    }

    pub fn resume(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::Resume)
    }

    pub fn power_toggle(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::PowerToggle)
    }

    pub fn disconnect(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::Disconnect)
    }

    pub fn reduce_battery(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::ReduceBattery)
    }

    pub fn charge_battery_to_full(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::ChargeBatteryToFull)
    }

    pub fn date_time_selection(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::DateTimeSelection)
    }

    pub fn refresh_waveforms(&self) -> DeviceResult<()> {
        self.send(DeviceCommand::RefreshWaveforms)
    }

    pub fn headset_event(&self, event: HeadsetEvent) -> DeviceResult<()> {
        self.send(DeviceCommand::Headset(event))
    }

    /// Upload the logged session at `index` and wait for the outcome.
    pub fn upload_to_pc(&self, index: usize) -> DeviceResult<()> {
        let (reply, reply_rx) = flume::bounded(1);
        self.send(DeviceCommand::UploadToPc {
            index,
            reply: Some(reply),
        })?;
        reply_rx
            .recv()
            .map_err(|_| DeviceError::DeviceUnavailable)?
    }

    pub fn snapshot(&self) -> DeviceResult<DeviceSnapshot> {
        self.query(DeviceQuery::Snapshot)
    }

    pub fn battery(&self) -> DeviceResult<u8> {
        Ok(self.snapshot()?.battery)
    }

    pub fn run_status(&self) -> DeviceResult<RunStatus> {
        Ok(self.snapshot()?.run_status)
    }

    pub fn device_status(&self) -> DeviceResult<DeviceStatus> {
        Ok(self.snapshot()?.device_status)
    }

    /// Copy of the session history
    pub fn sessions(&self) -> DeviceResult<Vec<Session>> {
        self.query(DeviceQuery::Sessions)
    }

    pub fn site_count(&self) -> DeviceResult<usize> {
        self.query(DeviceQuery::SiteCount)
    }

    pub fn active_electrode_waveform(&self, site: usize) -> DeviceResult<Vec<f32>> {
        self.query(|reply| DeviceQuery::Waveform { site, reply })
    }

    pub fn subscribe(
        &self,
        name: impl Into<String>,
        buffer_size: usize,
        filters: Vec<EventFilter>,
    ) -> Receiver<DeviceEvent> {
        self.bus.subscribe(name, buffer_size, filters)
    }

    pub fn subscribe_all(&self, name: impl Into<String>, buffer_size: usize) -> Receiver<DeviceEvent> {
        self.bus.subscribe_all(name, buffer_size)
    }

    /// A raw sender into the command queue, for periodic producers
    pub fn sender(&self) -> Sender<DeviceCommand> {
        self.tx.clone()
    }

    /// Stop the command loop and wait until the device has been torn down.
    pub fn shutdown(&self) -> DeviceResult<()> {
        let (ack, ack_rx) = flume::bounded(1);
        self.send(DeviceCommand::Shutdown { ack })?;
        ack_rx.recv().map_err(|_| DeviceError::DeviceUnavailable)?;
        debug!("Device shutdown acknowledged");
        Ok(())
    }

    fn query<T>(&self, make: impl FnOnce(Sender<T>) -> DeviceQuery) -> DeviceResult<T> {
        let (reply, reply_rx) = flume::bounded(1);
        self.send(DeviceCommand::Query(make(reply)))?;
        reply_rx.recv().map_err(|_| DeviceError::DeviceUnavailable)
    }
}
