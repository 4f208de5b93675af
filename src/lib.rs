use wasm_bindgen::prelude::*;

// --- LOGGING ---
#[cfg(target_arch = "wasm32")]
fn log(s: &str) {
    web_sys::console::log_1(&JsValue::from_str(s));
}

#[cfg(not(target_arch = "wasm32"))]
fn log(_s: &str) {}
macro_rules! console_log {
    ($($t:tt)*) => ($crate::log(&format!($($t)*)))
}

pub mod config;
pub mod hal;
pub mod interpolation;
pub mod parser;
pub mod scheduler;
pub mod sim;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, MachineConfig};
pub use hal::{
    Axis, Clock, Millis, Motors, NeedleFlag, NeedleSensor, Peripherals, ProgramSource,
    StatusDisplay, Storage, TensionServo,
};
pub use interpolation::{AxisFactors, interpolate};
pub use parser::parse_field;
pub use scheduler::{TickOutcome, tick};
pub use sim::{MachineSnapshot, Simulator};
pub use state::{GatingCondition, MachineState, NeedleAction};

/// Browser-facing embroidery machine: the interpreter driving a simulated
/// machine, stepped from a JavaScript animation loop.
#[wasm_bindgen]
pub struct EmbroideryBrain {
    sim: Simulator,
}

impl Default for EmbroideryBrain {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl EmbroideryBrain {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        console_log!("EmbroideryBrain ready");
        Self { sim: Simulator::default() }
    }

    /// Builds a brain from a (possibly partial) config object.
    pub fn with_config(config: JsValue) -> Result<EmbroideryBrain, JsValue> {
        let sim = MachineConfig::from_js(config)
            .and_then(Simulator::new)
            .map_err(|e| {
                console_log!("{}", e);
                JsValue::from_str(&e.to_string())
            })?;
        Ok(Self { sim })
    }

    // ── Program control ────────────────────────────────────────────────────

    pub fn load_program(&mut self, code: String) {
        self.sim.load_program(&code);
    }

    /// Advances the simulated machine by `dt_ms` and runs one interpreter tick.
    pub fn tick(&mut self, dt_ms: f64) -> TickOutcome {
        self.sim.advance(dt_ms)
    }

    pub fn pause(&mut self, code: u8) {
        self.sim.pause(code);
    }

    pub fn resume(&mut self) {
        self.sim.resume();
    }

    pub fn stop(&mut self) {
        self.sim.stop();
    }

    // ── Settings ───────────────────────────────────────────────────────────

    pub fn set_tension(&mut self, tension: u8) {
        self.sim.set_tension(tension);
    }

    pub fn get_tension(&self) -> u8 {
        self.sim.state.tension()
    }

    pub fn get_progress(&self) -> u8 {
        self.sim.state.progress()
    }

    pub fn get_paused_code(&self) -> u8 {
        self.sim.state.paused_code()
    }

    pub fn get_full_state(&self) -> JsValue {
        serde_wasm_bindgen::to_value(&self.sim.snapshot()).unwrap_or(JsValue::NULL)
    }
}
