//! Software stand-ins for the machine, used by the browser front end and by
//! integration tests.
//!
//! Physics is deliberately simple: X and Y follow a trapezoidal speed
//! profile toward their target, and the needle motor turns at a constant rate
//! and raises the needle flag once per revolution.

use serde::Serialize;

use crate::config::{ConfigError, MachineConfig};
use crate::hal::{
    Axis, Clock, Millis, Motors, NeedleFlag, Peripherals, ProgramSource, StatusDisplay, Storage,
    TensionServo,
};
use crate::interpolation::AxisFactors;
use crate::scheduler::{self, TickOutcome};
use crate::state::{GatingCondition, MachineState};

/// Needle motor steps per needle revolution.
pub const NEEDLE_STEPS_PER_REV: f64 = 200.0;

const EEPROM_SIZE: usize = 64;
const ERASED: u8 = 0xFF;

// ── Program source ──────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct LineProgram {
    lines: Vec<String>,
    cursor: usize,
    current: String,
}

impl LineProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, code: &str) {
        self.lines = code.lines().map(|l| l.trim().to_uppercase()).collect();
        self.cursor = 0;
        self.current.clear();
    }

    /// Number of lines already handed out.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl ProgramSource for LineProgram {
    fn read_next_line(&mut self) -> bool {
        let Some(line) = self.lines.get(self.cursor) else {
            self.current.clear();
            return false;
        };
        self.current.clone_from(line);
        self.cursor += 1;
        true
    }

    fn line(&self) -> &str {
        &self.current
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.current.clear();
    }
}

// ── Motors ──────────────────────────────────────────────────────────────

#[derive(Serialize, Debug, Clone, Default)]
pub struct SimAxis {
    pub position: f64,
    pub target: f64,
    pub velocity: f64,     // mm/s
    pub max_speed: f64,    // mm/s
    pub acceleration: f64, // mm/s²
}

impl SimAxis {
    fn at_rest(&self) -> bool {
        self.position == self.target && self.velocity == 0.0
    }

    fn halt(&mut self) {
        self.target = self.position;
        self.velocity = 0.0;
    }

    /// Advances one time step along a trapezoidal profile.
    /// Returns true if still moving.
    fn step(&mut self, dt_sec: f64) -> bool {
        let diff = self.target - self.position;
        let dist = diff.abs();
        if dist <= 0.0005 {
            self.position = self.target;
            self.velocity = 0.0;
            return false;
        }

        let dir = diff.signum();
        let feed = self.max_speed.max(1.0);
        let accel = self.acceleration.max(1.0);
        let mut vel = self.velocity.max(0.0);

        let stop_dist = (vel * vel) / (2.0 * accel);

        if dist <= stop_dist + 0.01 {
            vel = (vel - accel * dt_sec).max(0.0);
        } else if vel < feed {
            vel = (vel + accel * dt_sec).min(feed);
        } else {
            vel = feed;
        }

        let mut step = vel * dt_sec;
        if step <= 0.000001 {
            if dist <= 0.05 {
                self.position = self.target;
                self.velocity = 0.0;
                return false;
            }
            // Creep so a zero speed setting cannot strand the axis short of target.
            vel = (feed * 0.02).max(1.0).min(feed);
            step = vel * dt_sec;
        }

        if step >= dist {
            self.position = self.target;
            self.velocity = 0.0;
            false
        } else {
            self.position += step * dir;
            self.velocity = vel;
            true
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct SimMotors {
    pub x: SimAxis,
    pub y: SimAxis,
    pub xy_enabled: bool,
    pub z_enabled: bool,
    pub z_running: bool,
    pub z_speed: f64,        // steps/s
    pub z_acceleration: f64, // steps/s², recorded only
    /// Steps into the current needle revolution.
    pub needle_phase: f64,
}

/// X/Y drivers come up energised; `M18` releases them.
impl Default for SimMotors {
    fn default() -> Self {
        Self {
            x: SimAxis::default(),
            y: SimAxis::default(),
            xy_enabled: true,
            z_enabled: false,
            z_running: false,
            z_speed: 0.0,
            z_acceleration: 0.0,
            needle_phase: 0.0,
        }
    }
}

impl SimMotors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances every motor by `dt_ms`, raising `needle` each time the needle
    /// completes a revolution. Non-finite or non-positive steps are ignored.
    pub fn step(&mut self, dt_ms: f64, needle: &NeedleFlag) {
        if !dt_ms.is_finite() || dt_ms <= 0.0 {
            return;
        }
        let dt_sec = dt_ms / 1000.0;

        // A released axis holds its position until re-enabled.
        if self.xy_enabled {
            self.x.step(dt_sec);
            self.y.step(dt_sec);
        }

        if self.z_running && self.z_enabled && self.z_speed > 0.0 {
            self.needle_phase += self.z_speed * dt_sec;
            if self.needle_phase >= NEEDLE_STEPS_PER_REV {
                self.needle_phase %= NEEDLE_STEPS_PER_REV;
                needle.raise();
            }
        }
    }

    fn axis_mut(&mut self, axis: Axis) -> Option<&mut SimAxis> {
        match axis {
            Axis::X => Some(&mut self.x),
            Axis::Y => Some(&mut self.y),
            Axis::Z => None,
        }
    }
}

impl Motors for SimMotors {
    fn x(&self) -> f64 {
        self.x.position
    }

    fn y(&self) -> f64 {
        self.y.position
    }

    fn all_stopped(&self) -> bool {
        self.x.at_rest() && self.y.at_rest()
    }

    fn set_speed(&mut self, axis: Axis, speed: f64) {
        match self.axis_mut(axis) {
            Some(ax) => ax.max_speed = speed,
            None => self.z_speed = speed,
        }
    }

    fn set_acceleration(&mut self, axis: Axis, acceleration: f64) {
        match self.axis_mut(axis) {
            Some(ax) => ax.acceleration = acceleration,
            None => self.z_acceleration = acceleration,
        }
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.x.target = x;
        self.y.target = y;
    }

    fn enable(&mut self) {
        self.xy_enabled = true;
    }

    fn disable(&mut self) {
        self.xy_enabled = false;
    }

    fn enable_z(&mut self) {
        self.z_enabled = true;
    }

    fn disable_z(&mut self) {
        self.z_enabled = false;
    }

    fn start_z(&mut self) {
        self.z_running = true;
    }

    fn stop_z(&mut self) {
        self.z_running = false;
    }

    fn stop_all(&mut self) {
        self.x.halt();
        self.y.halt();
    }

    fn abort_and_reset(&mut self) {
        self.stop_all();
        self.z_running = false;
        self.needle_phase = 0.0;
    }
}

// ── Servo, storage, display, clock ──────────────────────────────────────

#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct SimServo {
    pub tension: u8,
}

impl TensionServo for SimServo {
    fn set_tension(&mut self, percent: u8) {
        self.tension = percent.min(100);
    }
}

/// Byte array that reads back `0xFF` until written, like a blank EEPROM.
#[derive(Debug, Clone)]
pub struct Eeprom {
    bytes: [u8; EEPROM_SIZE],
}

impl Default for Eeprom {
    fn default() -> Self {
        Self { bytes: [ERASED; EEPROM_SIZE] }
    }
}

impl Eeprom {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for Eeprom {
    fn read_byte(&self, addr: u16) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(ERASED)
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        if let Some(slot) = self.bytes.get_mut(addr as usize) {
            *slot = value;
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
}

#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct SimDisplay {
    pub screen: Screen,
    pub progress: u8,
}

impl StatusDisplay for SimDisplay {
    fn show_progress(&mut self, percent: u8) {
        self.progress = percent;
    }

    fn show_paused(&mut self) {
        self.screen = Screen::Paused;
    }

    fn show_finished(&mut self) {
        self.screen = Screen::Finished;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimClock {
    elapsed_ms: f64,
}

impl SimClock {
    pub fn advance(&mut self, dt_ms: f64) {
        if dt_ms.is_finite() && dt_ms > 0.0 {
            self.elapsed_ms += dt_ms;
        }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Millis {
        self.elapsed_ms as Millis
    }
}

// ── Simulator ───────────────────────────────────────────────────────────

/// Interpreter plus simulated machine.
#[derive(Debug)]
pub struct Simulator {
    pub state: MachineState,
    pub program: LineProgram,
    pub motors: SimMotors,
    pub needle: NeedleFlag,
    pub servo: SimServo,
    pub storage: Eeprom,
    pub display: SimDisplay,
    pub clock: SimClock,
}

impl Simulator {
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        Self::with_storage(config, Eeprom::new())
    }

    /// Starts from existing storage contents, as after a power cycle.
    pub fn with_storage(config: MachineConfig, storage: Eeprom) -> Result<Self, ConfigError> {
        Ok(Self::boot(MachineState::new(config)?, storage))
    }

    fn boot(state: MachineState, storage: Eeprom) -> Self {
        let mut sim = Self {
            state,
            program: LineProgram::new(),
            motors: SimMotors::new(),
            needle: NeedleFlag::new(),
            servo: SimServo::default(),
            storage,
            display: SimDisplay::default(),
            clock: SimClock::default(),
        };
        sim.state.reset(&mut sim.storage, &sim.needle);
        sim
    }

    pub fn load_program(&mut self, code: &str) {
        self.program.load(code);
        self.state.reset(&mut self.storage, &self.needle);
        self.display = SimDisplay { screen: Screen::Running, progress: 0 };
        console_log!("Loaded program ({} lines)", self.program.len());
    }

    /// Moves simulated time forward by `dt_ms`, then runs one interpreter tick.
    pub fn advance(&mut self, dt_ms: f64) -> TickOutcome {
        self.clock.advance(dt_ms);
        self.motors.step(dt_ms, &self.needle);
        self.tick()
    }

    pub fn tick(&mut self) -> TickOutcome {
        let mut hw = Peripherals {
            program: &mut self.program,
            motors: &mut self.motors,
            needle: &self.needle,
            servo: &mut self.servo,
            display: &mut self.display,
            clock: &self.clock,
        };
        scheduler::tick(&mut self.state, &mut hw)
    }

    /// Operator pause, as from a front-panel button.
    pub fn pause(&mut self, code: u8) {
        self.state.pause(code, &mut self.motors);
        self.display.show_paused();
    }

    pub fn resume(&mut self) {
        self.state.resume();
        self.display.screen = Screen::Running;
    }

    pub fn stop(&mut self) {
        self.state.stop(&mut self.motors, &mut self.program, &mut self.servo);
        self.display.screen = Screen::Idle;
    }

    pub fn set_tension(&mut self, value: u8) {
        self.state.set_tension(value, &mut self.storage, &mut self.servo);
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            x: self.motors.x.clone(),
            y: self.motors.y.clone(),
            needle_running: self.motors.z_running && self.motors.z_enabled,
            needle_speed: self.motors.z_speed,
            servo_tension: self.servo.tension,
            target: self.state.target(),
            interpolation: self.state.interpolation(),
            speed_xy: self.state.speed_xy(),
            speed_z: self.state.speed_z(),
            tension: self.state.tension(),
            is_tensioned: self.state.is_tensioned(),
            progress: self.state.progress(),
            paused: self.state.is_paused(),
            paused_code: self.state.paused_code(),
            finished: self.state.is_finished(),
            gating: self.state.gating(),
            line: self.program.cursor(),
            line_count: self.program.len(),
            screen: self.display.screen,
            time_ms: self.clock.now(),
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::boot(MachineState::default(), Eeprom::new())
    }
}

/// Everything the front end draws, in one serializable value.
#[derive(Serialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub x: SimAxis,
    pub y: SimAxis,
    pub needle_running: bool,
    pub needle_speed: f64,
    pub servo_tension: u8,
    pub target: (f64, f64),
    pub interpolation: AxisFactors,
    pub speed_xy: f64,
    pub speed_z: f64,
    pub tension: u8,
    pub is_tensioned: bool,
    pub progress: u8,
    pub paused: bool,
    pub paused_code: u8,
    pub finished: bool,
    pub gating: GatingCondition,
    pub line: usize,
    pub line_count: usize,
    pub screen: Screen,
    pub time_ms: Millis,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::NeedleSensor;

    fn approx_eq(a: f64, b: f64) {
        assert!(
            (a - b).abs() <= 1e-6,
            "expected {:.6}, got {:.6} (|diff|={:.6})",
            b,
            a,
            (a - b).abs()
        );
    }

    #[test]
    fn axis_accelerates_cruises_and_lands_on_target() {
        let mut ax = SimAxis { max_speed: 50.0, acceleration: 500.0, target: 20.0, ..Default::default() };
        let mut peak: f64 = 0.0;
        let mut steps = 0;
        while ax.step(0.001) {
            peak = peak.max(ax.velocity);
            steps += 1;
            assert!(steps < 100_000, "axis never arrived");
        }
        approx_eq(ax.position, 20.0);
        assert_eq!(ax.velocity, 0.0);
        approx_eq(peak, 50.0);
        assert!(ax.at_rest());
    }

    #[test]
    fn axis_with_zero_speed_still_creeps_to_target() {
        let mut ax = SimAxis { max_speed: 0.0, acceleration: 0.0, target: 0.2, ..Default::default() };
        let mut steps = 0;
        while ax.step(0.01) {
            steps += 1;
            assert!(steps < 100_000, "axis never arrived");
        }
        approx_eq(ax.position, 0.2);
    }

    #[test]
    fn needle_raises_flag_once_per_revolution() {
        let mut motors = SimMotors::new();
        let flag = NeedleFlag::new();
        motors.enable_z();
        motors.set_speed(Axis::Z, 1000.0);
        motors.start_z();

        motors.step(150.0, &flag); // 150 of 200 steps
        assert!(!flag.interrupt_pending());
        motors.step(60.0, &flag);
        assert!(flag.take_interrupt());
        approx_eq(motors.needle_phase, 10.0);
    }

    #[test]
    fn disabled_needle_does_not_turn() {
        let mut motors = SimMotors::new();
        let flag = NeedleFlag::new();
        motors.set_speed(Axis::Z, 1000.0);
        motors.start_z();
        motors.step(1000.0, &flag);
        assert!(!flag.interrupt_pending());
    }

    #[test]
    fn released_axes_hold_until_enabled() {
        let mut motors = SimMotors::new();
        let flag = NeedleFlag::new();
        motors.set_speed(Axis::X, 50.0);
        motors.set_acceleration(Axis::X, 500.0);

        motors.disable();
        motors.move_to(5.0, 0.0);
        motors.step(100.0, &flag);
        assert_eq!(motors.x.position, 0.0);
        assert!(!motors.all_stopped());

        motors.enable();
        motors.step(100.0, &flag);
        assert!(motors.x.position > 0.0);
    }

    #[test]
    fn non_finite_time_step_is_ignored() {
        let mut sim = Simulator::default();
        sim.load_program("G1 X5\nM73 P50");
        sim.advance(1.0);
        sim.advance(f64::NAN);
        sim.advance(f64::INFINITY);
        assert!(sim.motors.x.position.is_finite());
        assert!(sim.motors.x.velocity.is_finite());

        for _ in 0..10_000 {
            if sim.advance(2.0) == TickOutcome::Finished {
                break;
            }
        }
        assert_eq!(sim.motors.x.position, 5.0);
        assert_eq!(sim.state.progress(), 50);
        assert!(sim.snapshot().time_ms < 100_000);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = MachineConfig { default_tension: 33, ..Default::default() };
        assert!(Simulator::with_storage(cfg, Eeprom::new()).is_err());
    }

    #[test]
    fn blank_eeprom_reads_erased() {
        let mut rom = Eeprom::new();
        assert_eq!(rom.read_byte(0), 0xFF);
        assert_eq!(rom.read_byte(1000), 0xFF);
        rom.write_byte(3, 55);
        assert_eq!(rom.read_byte(3), 55);
    }

    #[test]
    fn program_lines_are_normalized_and_rewindable() {
        let mut program = LineProgram::new();
        program.load("  g1 x1 \n\nm73 p5");
        assert_eq!(program.len(), 3);

        assert!(program.read_next_line());
        assert_eq!(program.line(), "G1 X1");
        assert!(program.read_next_line());
        assert_eq!(program.line(), "");
        assert!(program.read_next_line());
        assert!(!program.read_next_line());

        program.rewind();
        assert_eq!(program.cursor(), 0);
        assert!(program.read_next_line());
        assert_eq!(program.line(), "G1 X1");
    }

    #[test]
    fn fresh_simulator_repairs_blank_tension() {
        let sim = Simulator::default();
        assert_eq!(sim.state.tension(), 90);
        assert_eq!(sim.storage.read_byte(0), 90);
    }

    #[test]
    fn tension_survives_a_power_cycle() {
        let mut sim = Simulator::default();
        sim.set_tension(65);
        let rebooted = Simulator::with_storage(MachineConfig::default(), sim.storage.clone()).unwrap();
        assert_eq!(rebooted.state.tension(), 65);
    }

    #[test]
    fn snapshot_reflects_a_running_move() {
        let mut sim = Simulator::default();
        sim.load_program("G1 X10 Y0 F20");
        sim.advance(0.0);
        sim.advance(100.0);

        let snap = sim.snapshot();
        assert_eq!(snap.gating, GatingCondition::AfterMove);
        assert_eq!(snap.target, (10.0, 0.0));
        assert!(snap.x.position > 0.0 && snap.x.position < 10.0);
        assert_eq!(snap.line, 1);
        assert_eq!(snap.screen, Screen::Running);
    }
}
