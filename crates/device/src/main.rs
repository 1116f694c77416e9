use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use flume::{RecvError, Selector};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use neuro_headset::{dominant_frequency, HeadsetEvent, MockHeadset};
use neuro_types::{DeviceEvent, EventFilter};
use neuroset_device::shell::{self, ShellCommand};
use neuroset_device::{
    load_config, runtime, DeviceCommand, DeviceHandle, HandheldDevice, PcWindow, Ticker,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Handheld neurostimulation device simulator", long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "neuroset.json")]
    config: PathBuf,

    /// Battery tick period in milliseconds
    #[arg(long)]
    battery_tick_ms: Option<u64>,

    /// Percent drained per battery tick
    #[arg(long)]
    battery_step: Option<u8>,

    /// Duration of one treatment step in milliseconds
    #[arg(long)]
    treatment_step_ms: Option<u64>,
}

enum Input {
    Line(Result<String, RecvError>),
    Event(Result<DeviceEvent, RecvError>),
}

struct Shell {
    handle: DeviceHandle,
    headset: Arc<MockHeadset>,
    sample_rate: f32,
}

impl Shell {
    /// Execute one command. Returns `false` when the user wants to leave.
    fn execute(&self, command: ShellCommand) -> anyhow::Result<bool> {
        match command {
            ShellCommand::Power => self.handle.power_toggle()?,
            ShellCommand::Start => self.handle.begin_session()?,
            ShellCommand::Pause => self.handle.pause()?,
            ShellCommand::Resume => self.handle.resume()?,
            ShellCommand::Stop => self.handle.stop()?,
            ShellCommand::Contact => {
                self.headset.set_contact(true);
                self.handle.headset_event(HeadsetEvent::ContactEstablished)?;
            }
            ShellCommand::Disconnect => {
                self.headset.set_contact(false);
                self.handle.headset_event(HeadsetEvent::RequestStop)?;
            }
            ShellCommand::Charge => self.handle.charge_battery_to_full()?,
            ShellCommand::Status => {
                let s = self.handle.snapshot()?;
                println!(
                    "power: {} | run: {} | battery: {}% | contact: {} | treatment: {} | logged: {}",
                    s.device_status,
                    s.run_status,
                    s.battery,
                    s.contact,
                    s.treatment_sig,
                    s.session_count
                );
            }
            ShellCommand::Sessions => {
                let sessions = self.handle.sessions()?;
                if sessions.is_empty() {
                    println!("No sessions logged");
                }
                for (i, session) in sessions.iter().enumerate() {
                    println!("{}", session.summary(i + 1));
                }
            }
            ShellCommand::Upload { index } => match self.handle.upload_to_pc(index) {
                Ok(()) => println!("Session #{} uploaded", index + 1),
                Err(e) => println!("{}", e),
            },
            ShellCommand::Wave { site } => {
                let samples = self.handle.active_electrode_waveform(site)?;
                if samples.is_empty() {
                    println!("No electrode site {}", site);
                } else {
                    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
                    println!(
                        "site {}: {} samples, peak {:.1} uV, dominant {:.2} Hz",
                        site,
                        samples.len(),
                        peak,
                        dominant_frequency(&samples, self.sample_rate)
                    );
                }
            }
            ShellCommand::DateTime => self.handle.date_time_selection()?,
            ShellCommand::Help => println!("{}", shell::HELP),
            ShellCommand::Quit => return Ok(false),
        }
        Ok(true)
    }
}

fn print_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::SessionStarted { session_id, start } => {
            println!("> session {} started at {}", session_id, start.format("%H:%M:%S"))
        }
        DeviceEvent::SessionStopped(session) => println!(
            "> session {} ended ({:?})",
            session.id(),
            session.outcome()
        ),
        DeviceEvent::RunStatusChanged { from, to } => println!("> {} -> {}", from, to),
        DeviceEvent::PowerChanged(status) => println!("> power {}", status),
        DeviceEvent::BatteryChanged(level) if level % 10 == 0 => println!("> battery {}%", level),
        DeviceEvent::BatteryDepleted => println!("> battery depleted"),
        DeviceEvent::ContactChanged(contact) => println!("> contact {}", contact),
        DeviceEvent::TreatmentProgress {
            step, total_steps, ..
        } => println!("> treatment step {}/{}", step, total_steps),
        _ => {}
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neuroset_device=info,neuro_headset=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(tick_ms) = args.battery_tick_ms {
        config.battery.tick_ms = tick_ms;
    }
    if let Some(step) = args.battery_step {
        config.battery.step_percent = step;
    }
    if let Some(step_ms) = args.treatment_step_ms {
        config.treatment.step_ms = step_ms;
    }
    config.validate()?;

    let headset = Arc::new(MockHeadset::new(config.headset.clone())?);
    let pc = PcWindow::new();
    let (device, command_rx) =
        HandheldDevice::new(config.clone(), headset.clone(), Box::new(pc.clone()))?;
    let (handle, device_thread) = runtime::spawn(device, command_rx)?;

    let battery_ticker = Ticker::spawn(
        "battery-tick",
        Duration::from_millis(config.battery.tick_ms),
        handle.sender(),
        || DeviceCommand::ReduceBattery,
    )?;
    let waveform_ticker = Ticker::spawn(
        "waveform-refresh",
        Duration::from_millis(config.headset.refresh_ms),
        handle.sender(),
        || DeviceCommand::RefreshWaveforms,
    )?;

    let events = handle.subscribe(
        "shell",
        256,
        vec![
            EventFilter::SessionOnly,
            EventFilter::StatusOnly,
            EventFilter::BatteryOnly,
            EventFilter::TreatmentOnly,
            EventFilter::HeadsetOnly,
        ],
    );

    let (line_tx, line_rx) = flume::unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    let shell = Shell {
        handle: handle.clone(),
        headset,
        sample_rate: config.headset.sample_rate,
    };
    println!("{}", shell::HELP);

    loop {
        let input = Selector::new()
            .recv(&line_rx, Input::Line)
            .recv(&events, Input::Event)
            .wait();
        match input {
            Input::Line(Ok(line)) => match shell::parse(&line) {
                Ok(Some(command)) => {
                    if !shell.execute(command)? {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            },
            // stdin closed
            Input::Line(Err(_)) => break,
            Input::Event(Ok(DeviceEvent::WaveformsUpdated)) => {}
            Input::Event(Ok(event)) => print_event(&event),
            Input::Event(Err(_)) => break,
        }
    }

    battery_ticker.stop();
    waveform_ticker.stop();
    handle.shutdown()?;
    device_thread
        .join()
        .map_err(|_| anyhow!("Device thread panicked"))?;

    tracing::info!(uploaded = pc.transfers().len(), "Simulator stopped");
    Ok(())
}
