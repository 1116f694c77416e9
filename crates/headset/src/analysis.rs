//! Signal analysis used by the treatment protocol

/// Fraction of the window peak a sample must exceed to count as a sign change.
/// Keeps noise around zero from producing spurious crossings.
const HYSTERESIS_FRACTION: f32 = 0.1;

/// Estimate the dominant frequency of a waveform in Hz.
///
/// Counts sign changes with hysteresis and measures the span between the first and the
/// last one. Returns `0.0` for windows with fewer than two crossings.
pub fn dominant_frequency(samples: &[f32], sample_rate: f32) -> f32 {
    if samples.len() < 2 || sample_rate <= 0.0 {
        return 0.0;
    }

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak == 0.0 {
        return 0.0;
    }
    let threshold = peak * HYSTERESIS_FRACTION;

    let mut state: Option<bool> = None; // Some(true) = positive half-wave
    let mut first = None;
    let mut last = 0usize;
    let mut crossings = 0u32;

    for (i, &sample) in samples.iter().enumerate() {
        let positive = if sample > threshold {
            true
        } else if sample < -threshold {
            false
        } else {
            continue;
        };

        match state {
            Some(prev) if prev != positive => {
                crossings += 1;
                first.get_or_insert(i);
                last = i;
            }
            _ => {}
        }
        state = Some(positive);
    }

    let Some(first) = first else {
        return 0.0;
    };
    if crossings < 2 || last == first {
        return 0.0;
    }

    let span_secs = (last - first) as f32 / sample_rate;
    (crossings - 1) as f32 / (2.0 * span_secs)
}
