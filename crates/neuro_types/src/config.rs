//! Configuration types for the handheld device simulator

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

/// Battery model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Charge level at startup, in percent
    pub initial_percent: u8,
    /// Percent removed on every battery tick
    pub step_percent: u8,
    /// Battery tick period in milliseconds
    pub tick_ms: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        // 100 ticks of 3 s: a full battery lasts five minutes
        Self {
            initial_percent: 100,
            step_percent: 1,
            tick_ms: 3000,
        }
    }
}

/// Treatment protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreatmentConfig {
    /// Number of passes over all electrode sites
    pub rounds: u32,
    /// Duration of one stimulation step (one site) in milliseconds
    pub step_ms: u64,
    /// Frequency offset applied to a site on every step, in Hz
    pub offset_hz: f32,
    /// How long `stop` waits for the treatment to acknowledge cancellation
    pub cancel_grace_ms: u64,
}

impl Default for TreatmentConfig {
    fn default() -> Self {
        Self {
            rounds: 4,
            step_ms: 350,
            offset_hz: 5.0,
            cancel_grace_ms: 1000,
        }
    }
}

/// Settings for the simulated headset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadsetConfig {
    /// Number of electrode sites
    pub site_count: usize,
    /// Sample rate in Hz
    pub sample_rate: f32,
    /// Samples per site in one waveform window
    pub window_samples: usize,
    /// Waveform refresh period in milliseconds
    pub refresh_ms: u64,
    /// Peak amplitude of the dominant rhythm in µV
    pub signal_amplitude: f32,
    /// Peak amplitude of the additive noise in µV
    pub noise_amplitude: f32,
    /// Whether the electrodes touch the skin at startup
    pub initial_contact: bool,
    /// Seed for the noise generator
    pub seed: u64,
}

impl Default for HeadsetConfig {
    fn default() -> Self {
        Self {
            site_count: 21,
            sample_rate: 256.0,
            window_samples: 512,
            refresh_ms: 500,
            signal_amplitude: 20.0,
            noise_amplitude: 2.0,
            initial_contact: true,
            seed: 7,
        }
    }
}

/// Top-level simulator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub battery: BatteryConfig,
    pub treatment: TreatmentConfig,
    pub headset: HeadsetConfig,
}

impl DeviceConfig {
    /// Reject settings the device cannot run with
    pub fn validate(&self) -> DeviceResult<()> {
        if self.battery.initial_percent > 100 {
            return Err(DeviceError::Configuration(format!(
                "Initial battery level must be at most 100%, got {}",
                self.battery.initial_percent
            )));
        }
        if self.battery.step_percent == 0 || self.battery.step_percent > 100 {
            return Err(DeviceError::Configuration(format!(
                "Battery step must be between 1 and 100, got {}",
                self.battery.step_percent
            )));
        }
        if self.battery.tick_ms == 0 {
            return Err(DeviceError::Configuration(
                "Battery tick period must be greater than 0".to_string(),
            ));
        }
        if self.treatment.step_ms == 0 {
            return Err(DeviceError::Configuration(
                "Treatment step must last at least 1 ms".to_string(),
            ));
        }
        if self.headset.refresh_ms == 0 {
            return Err(DeviceError::Configuration(
                "Waveform refresh period must be greater than 0".to_string(),
            ));
        }
        if self.headset.site_count == 0 {
            return Err(DeviceError::Configuration(
                "At least one electrode site must be configured".to_string(),
            ));
        }
        if self.headset.sample_rate <= 0.0 {
            return Err(DeviceError::Configuration(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if self.headset.window_samples == 0 {
            return Err(DeviceError::Configuration(
                "Waveform window must hold at least one sample".to_string(),
            ));
        }
        Ok(())
    }
}
