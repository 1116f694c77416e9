//! Common types and traits for headsets

use thiserror::Error;

use neuro_types::DeviceError;

/// Events raised by the headset towards the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadsetEvent {
    /// A new window of waveform samples is available
    WaveformsUpdated,
    /// All electrodes touch the skin
    ContactEstablished,
    /// Contact was lost; the running session must stop
    RequestStop,
}

/// Errors that can occur when creating a headset
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeadsetError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<HeadsetError> for DeviceError {
    fn from(err: HeadsetError) -> Self {
        match err {
            HeadsetError::ConfigurationError(msg) => DeviceError::Configuration(msg),
        }
    }
}

/// Query interface the device uses to talk to a headset.
///
/// Implementations are shared between the device context and the treatment context,
/// so every method takes `&self`.
pub trait Headset: Send + Sync + 'static {
    /// Number of electrode sites
    fn site_count(&self) -> usize;

    /// Sample rate of the waveforms in Hz
    fn sample_rate(&self) -> f32;

    /// Current waveform window of one electrode site, in µV.
    /// Returns an empty vector for an unknown site.
    fn active_electrode_waveform(&self, index: usize) -> Vec<f32>;

    /// Whether the electrodes currently touch the skin
    fn has_contact(&self) -> bool;

    /// Advance to the next waveform window
    fn refresh(&self);

    /// Deliver one stimulation step with the given frequency offset to a site
    fn stimulate(&self, _site: usize, _offset_hz: f32) {}
}
