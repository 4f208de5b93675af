//! Interpreter state shared by the scheduler and the operator controls.

use serde::Serialize;

use crate::config::{ConfigError, MachineConfig, is_valid_tension};
use crate::hal::{Millis, Motors, NeedleSensor, ProgramSource, Storage, TensionServo};
use crate::interpolation::AxisFactors;

/// Side effect applied once, when the awaited needle interrupt arrives.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NeedleAction {
    #[default]
    None,
    StopMotor,
}

/// What has to happen before the next program line may run.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum GatingCondition {
    #[default]
    Immediate,
    /// X and Y have both come to rest.
    AfterMove,
    /// The needle sensor has fired.
    AfterInterrupt { pending_action: NeedleAction },
    /// The clock has reached `deadline`.
    AfterDwell { deadline: Millis },
}

#[derive(Debug, Clone)]
pub struct MachineState {
    pub(crate) config: MachineConfig,

    pub(crate) x_new: f64,
    pub(crate) y_new: f64,
    pub(crate) interpolation: AxisFactors,

    pub(crate) speed_xy: f64,
    pub(crate) speed_z: f64,
    pub(crate) acceleration_x: f64,
    pub(crate) acceleration_y: f64,

    pub(crate) tension: u8,
    pub(crate) is_tensioned: bool,
    pub(crate) progress: u8,

    pub(crate) paused: bool,
    pub(crate) paused_code: u8,
    pub(crate) finished: bool,

    pub(crate) gating: GatingCondition,
}

impl MachineState {
    /// Builds a state from `config` without touching any collaborator.
    /// Call [`MachineState::reset`] before the first tick to load the stored
    /// tension.
    ///
    /// The config is validated first: its `default_tension` is what `reset`
    /// writes back over a bad stored byte, so it must itself be storable.
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: MachineConfig) -> Self {
        Self {
            config,
            x_new: 0.0,
            y_new: 0.0,
            interpolation: AxisFactors::UNIT,
            speed_xy: config.speed_xy,
            speed_z: config.speed_z,
            acceleration_x: config.acceleration_x,
            acceleration_y: config.acceleration_y,
            tension: config.default_tension,
            is_tensioned: false,
            progress: 0,
            paused: false,
            paused_code: 0,
            finished: false,
            gating: GatingCondition::Immediate,
        }
    }

    /// Startup / new-program reset.
    ///
    /// Reloads the tension byte, repairing it in storage when it is out of
    /// range or not a multiple of 5, and puts every rate back to its
    /// configured initial value.
    pub fn reset(&mut self, storage: &mut dyn Storage, needle: &dyn NeedleSensor) {
        let addr = self.config.tension_address;
        let stored = storage.read_byte(addr);
        self.tension = if is_valid_tension(stored) {
            stored
        } else {
            console_log!(
                "Stored tension {} is invalid, restoring {}",
                stored,
                self.config.default_tension
            );
            storage.write_byte(addr, self.config.default_tension);
            self.config.default_tension
        };

        self.x_new = 0.0;
        self.y_new = 0.0;
        self.interpolation = AxisFactors::UNIT;
        self.progress = 0;
        self.paused = false;
        self.paused_code = 0;
        self.is_tensioned = false;
        self.finished = false;

        self.gating = GatingCondition::Immediate;
        needle.clear_interrupt();

        self.speed_xy = self.config.speed_xy;
        self.speed_z = self.config.speed_z;
        self.acceleration_x = self.config.acceleration_x;
        self.acceleration_y = self.config.acceleration_y;
    }

    pub fn tension(&self) -> u8 {
        self.tension
    }

    /// Stores and persists a new tension. Values are clamped to 100 and
    /// rounded down to a multiple of 5 so the stored byte always reloads.
    pub fn set_tension(&mut self, value: u8, storage: &mut dyn Storage, servo: &mut dyn TensionServo) {
        let value = value.min(100) / 5 * 5;
        self.tension = value;
        storage.write_byte(self.config.tension_address, value);

        if self.is_tensioned {
            servo.set_tension(value);
        }
    }

    /// Tension servo on (`M42`) or off (`M41`).
    pub(crate) fn apply_tension(&mut self, on: bool, servo: &mut dyn TensionServo) {
        servo.set_tension(if on { self.tension } else { 0 });
        self.is_tensioned = on;
    }

    pub fn is_tensioned(&self) -> bool {
        self.is_tensioned
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Sets progress from a raw field value, clamped to `0..=100`.
    pub(crate) fn set_progress(&mut self, raw: f64) {
        self.progress = if raw.is_nan() { 0 } else { raw.clamp(0.0, 100.0) as u8 };
    }

    /// Reason code of the current pause; 0 when none was given.
    pub fn paused_code(&self) -> u8 {
        self.paused_code
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn gating(&self) -> GatingCondition {
        self.gating
    }

    /// Last commanded target.
    pub fn target(&self) -> (f64, f64) {
        (self.x_new, self.y_new)
    }

    pub fn interpolation(&self) -> AxisFactors {
        self.interpolation
    }

    pub fn speed_xy(&self) -> f64 {
        self.speed_xy
    }

    pub fn speed_z(&self) -> f64 {
        self.speed_z
    }

    /// `(x, y)` accelerations the next move is scaled from.
    pub fn accelerations(&self) -> (f64, f64) {
        (self.acceleration_x, self.acceleration_y)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Halts every motor and holds the program until [`MachineState::resume`].
    pub fn pause(&mut self, code: u8, motors: &mut dyn Motors) {
        console_log!("Paused (code {})", code);
        self.paused = true;
        self.paused_code = code;

        motors.stop_all();
        motors.stop_z();
        motors.disable_z();

        // The line after the pause decides what comes next, not a stale gate.
        self.gating = GatingCondition::Immediate;
    }

    /// Lets the program continue. Motors stay as the drivers left them.
    pub fn resume(&mut self) {
        console_log!("Resumed");
        self.gating = GatingCondition::Immediate;
        self.paused = false;
        self.paused_code = 0;
    }

    /// Aborts the program and rewinds it to the first line.
    pub fn stop(
        &mut self,
        motors: &mut dyn Motors,
        program: &mut dyn ProgramSource,
        servo: &mut dyn TensionServo,
    ) {
        console_log!("Stopped");
        self.gating = GatingCondition::Immediate;
        motors.abort_and_reset();
        program.rewind();

        servo.set_tension(0);
        self.is_tensioned = false;

        motors.stop_z();
        motors.disable_z();

        self.paused = false;
        self.finished = false;
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::from_valid(MachineConfig::default())
    }
}
