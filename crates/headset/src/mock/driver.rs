use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use neuro_types::HeadsetConfig;

use super::waveform_generator::{gen_site_window, SiteOscillator};
use crate::types::{Headset, HeadsetError};

/// A simulated headset that synthesises EEG-like waveforms for every electrode site.
pub struct MockHeadset {
    inner: Mutex<MockInner>,
}

/// Internal state for the MockHeadset.
struct MockInner {
    config: HeadsetConfig,
    contact: bool,
    sites: Vec<SiteOscillator>,
    windows: Vec<Vec<f32>>,
    // Absolute sample number of the first sample in the current windows
    sample_count: u64,
    rng: StdRng,
}

impl MockInner {
    fn regenerate(&mut self) {
        let MockInner {
            config,
            sites,
            windows,
            sample_count,
            rng,
            ..
        } = self;
        for (osc, window) in sites.iter().zip(windows.iter_mut()) {
            *window = gen_site_window(
                osc,
                *sample_count,
                config.window_samples,
                config.sample_rate,
                config.signal_amplitude,
                config.noise_amplitude,
                rng,
            );
        }
    }
}

impl MockHeadset {
    pub fn new(config: HeadsetConfig) -> Result<Self, HeadsetError> {
        if config.site_count == 0 {
            return Err(HeadsetError::ConfigurationError(
                "At least one electrode site must be configured".to_string(),
            ));
        }
        if config.sample_rate <= 0.0 {
            return Err(HeadsetError::ConfigurationError(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if config.window_samples == 0 {
            return Err(HeadsetError::ConfigurationError(
                "Waveform window must hold at least one sample".to_string(),
            ));
        }

        let sites = (0..config.site_count).map(SiteOscillator::resting).collect();
        let mut inner = MockInner {
            contact: config.initial_contact,
            rng: StdRng::seed_from_u64(config.seed),
            windows: vec![Vec::new(); config.site_count],
            sites,
            sample_count: 0,
            config,
        };
        inner.regenerate();

        info!(
            "MockHeadset created with {} sites at {} Hz",
            inner.config.site_count, inner.config.sample_rate
        );

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Place the electrodes on or off the skin
    pub fn set_contact(&self, contact: bool) {
        debug!("MockHeadset contact set to {}", contact);
        self.lock().contact = contact;
    }

    /// Current dominant frequency of a site's simulated rhythm
    pub fn dominant_hz(&self, site: usize) -> Option<f32> {
        self.lock().sites.get(site).map(|s| s.dominant_hz)
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Headset for MockHeadset {
    fn site_count(&self) -> usize {
        self.lock().config.site_count
    }

    fn sample_rate(&self) -> f32 {
        self.lock().config.sample_rate
    }

    fn active_electrode_waveform(&self, index: usize) -> Vec<f32> {
        self.lock().windows.get(index).cloned().unwrap_or_default()
    }

    fn has_contact(&self) -> bool {
        self.lock().contact
    }

    fn refresh(&self) {
        let mut inner = self.lock();
        inner.sample_count += inner.config.window_samples as u64;
        inner.regenerate();
    }

    fn stimulate(&self, site: usize, offset_hz: f32) {
        let mut inner = self.lock();
        if let Some(osc) = inner.sites.get_mut(site) {
            osc.entrain(offset_hz);
        }
    }
}
