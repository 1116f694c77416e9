use std::f32::consts::PI;

use log::trace;
use rand::Rng;

/// Lowest and highest dominant frequency a simulated site can settle on (Hz)
pub const MIN_DOMINANT_HZ: f32 = 0.5;
pub const MAX_DOMINANT_HZ: f32 = 40.0;

/// Fraction of a stimulation offset that shifts the site's rhythm per step
const ENTRAINMENT_FACTOR: f32 = 0.05;

/// Resting rhythms assigned round-robin to the sites, spanning delta to beta
const RESTING_RHYTHMS_HZ: [f32; 7] = [2.0, 4.5, 6.0, 8.5, 10.0, 12.5, 18.0];

/// The simulated brain rhythm under one electrode
#[derive(Debug, Clone, PartialEq)]
pub struct SiteOscillator {
    pub dominant_hz: f32,
    pub phase: f32,
}

impl SiteOscillator {
    /// Resting oscillator for site `index`
    pub fn resting(index: usize) -> Self {
        let dominant_hz = RESTING_RHYTHMS_HZ[index % RESTING_RHYTHMS_HZ.len()];
        Self {
            dominant_hz,
            phase: index as f32 * PI / 7.0,
        }
    }

    /// Shift the rhythm towards `dominant_hz + offset_hz`
    pub fn entrain(&mut self, offset_hz: f32) {
        self.dominant_hz =
            (self.dominant_hz + offset_hz * ENTRAINMENT_FACTOR).clamp(MIN_DOMINANT_HZ, MAX_DOMINANT_HZ);
    }
}

/// Generate one window of samples for a site.
///
/// `first_sample` is the absolute sample number of the first sample in the window, so
/// consecutive windows join without a phase jump.
pub fn gen_site_window<R: Rng>(
    osc: &SiteOscillator,
    first_sample: u64,
    window_samples: usize,
    sample_rate: f32,
    signal_amplitude: f32,
    noise_amplitude: f32,
    rng: &mut R,
) -> Vec<f32> {
    trace!(
        "Generating {} samples at {} Hz from sample {}",
        window_samples,
        osc.dominant_hz,
        first_sample
    );

    (0..window_samples)
        .map(|i| {
            let t_secs = (first_sample + i as u64) as f64 / sample_rate as f64;
            let angle = 2.0 * std::f64::consts::PI * osc.dominant_hz as f64 * t_secs + osc.phase as f64;
            let noise = if noise_amplitude > 0.0 {
                rng.gen_range(-noise_amplitude..=noise_amplitude)
            } else {
                0.0
            };
            signal_amplitude * angle.sin() as f32 + noise
        })
        .collect()
}
