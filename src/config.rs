//! Machine constants the interpreter starts from.
//!
//! Every field has a default, so a partial object from JavaScript (or JSON in
//! tests) only needs to name what differs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::JsValue;

/// Errors raised while building a [`MachineConfig`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value is outside what the machine can run with.
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The supplied object could not be decoded.
    #[error("Could not decode machine config: {0}")]
    Decode(String),
}

/// True for tension values that may be stored: `0..=100` in steps of 5.
pub fn is_valid_tension(value: u8) -> bool {
    value <= 100 && value % 5 == 0
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct MachineConfig {
    /// Initial XY feed, mm/s.
    pub speed_xy: f64,
    /// Initial needle motor speed, steps/s.
    pub speed_z: f64,
    /// mm/s²
    pub acceleration_x: f64,
    /// mm/s²
    pub acceleration_y: f64,
    /// Needle acceleration used when `M201` carries no `Z`, steps/s².
    pub acceleration_z: f64,
    /// Tension restored when the stored byte fails validation.
    pub default_tension: u8,
    /// Address of the tension byte in persistent storage.
    pub tension_address: u16,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            speed_xy: 40.0,
            speed_z: 1000.0,
            acceleration_x: 400.0,
            acceleration_y: 400.0,
            acceleration_z: 4000.0,
            default_tension: 90,
            tension_address: 0,
        }
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rates = [
            ("speed_xy", self.speed_xy),
            ("speed_z", self.speed_z),
            ("acceleration_x", self.acceleration_x),
            ("acceleration_y", self.acceleration_y),
            ("acceleration_z", self.acceleration_z),
        ];
        for (field, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("expected a finite, non-negative rate, got {value}"),
                });
            }
        }

        if !is_valid_tension(self.default_tension) {
            return Err(ConfigError::Invalid {
                field: "default_tension",
                reason: format!(
                    "must be 0..=100 in steps of 5, got {}",
                    self.default_tension
                ),
            });
        }

        Ok(())
    }

    /// Decodes and validates a config object handed over from JavaScript.
    /// `undefined` and `null` give the defaults.
    pub fn from_js(value: JsValue) -> Result<Self, ConfigError> {
        if value.is_undefined() || value.is_null() {
            return Ok(Self::default());
        }
        let config: Self = serde_wasm_bindgen::from_value(value)
            .map_err(|e| ConfigError::Decode(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
