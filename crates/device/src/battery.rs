//! Battery model of the handheld device

use neuro_types::BatteryConfig;

pub const FULL_CHARGE: u8 = 100;

/// Charge level that drains by a fixed step on every tick and never drops below 0%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Battery {
    percent: u8,
    step: u8,
}

impl Battery {
    pub fn new(initial_percent: u8, step_percent: u8) -> Self {
        Self {
            percent: initial_percent.min(FULL_CHARGE),
            step: step_percent,
        }
    }

    pub fn from_config(config: &BatteryConfig) -> Self {
        Self::new(config.initial_percent, config.step_percent)
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn is_depleted(&self) -> bool {
        self.percent == 0
    }

    /// Remove one step of charge, floored at 0. Returns the new level.
    pub fn drain(&mut self) -> u8 {
        self.percent = self.percent.saturating_sub(self.step);
        self.percent
    }

    pub fn charge_to_full(&mut self) {
        self.percent = FULL_CHARGE;
    }
}
