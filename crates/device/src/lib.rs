//! Handheld neurostimulation device simulator core

pub mod battery;
pub mod config;
pub mod device;
pub mod event_bus;
pub mod runtime;
pub mod shell;
pub mod ticker;
pub mod treatment;
pub mod upload;

pub use battery::Battery;
pub use config::load_config;
pub use device::{DeviceSnapshot, HandheldDevice};
pub use event_bus::{EventBus, EventBusMetrics};
pub use runtime::{DeviceCommand, DeviceHandle, DeviceQuery};
pub use ticker::Ticker;
pub use treatment::{Treatment, TreatmentControl, TreatmentMsg};
pub use upload::{PcWindow, UploadSink};
