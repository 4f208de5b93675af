//! Recording collaborators for unit tests.

use std::cell::Cell;

use crate::hal::{
    Axis, Clock, Millis, Motors, NeedleFlag, Peripherals, ProgramSource, StatusDisplay, Storage,
    TensionServo,
};
use crate::scheduler::{self, TickOutcome};
use crate::state::MachineState;

#[derive(Clone, Debug, PartialEq)]
pub enum MotorCall {
    Speed(Axis, f64),
    Acceleration(Axis, f64),
    MoveTo(f64, f64),
    Enable,
    Disable,
    EnableZ,
    DisableZ,
    StartZ,
    StopZ,
    StopAll,
    AbortAndReset,
}

#[derive(Default)]
pub struct FakeProgram {
    pub lines: Vec<String>,
    pub cursor: usize,
    pub current: String,
    pub rewinds: usize,
}

impl ProgramSource for FakeProgram {
    fn read_next_line(&mut self) -> bool {
        match self.lines.get(self.cursor) {
            Some(line) => {
                self.current = line.clone();
                self.cursor += 1;
                true
            }
            None => {
                self.current.clear();
                false
            }
        }
    }

    fn line(&self) -> &str {
        &self.current
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.current.clear();
        self.rewinds += 1;
    }
}

/// Motors that never move on their own: a test calls [`FakeMotors::arrive`]
/// to finish the last commanded move.
pub struct FakeMotors {
    pub x: f64,
    pub y: f64,
    pub target: (f64, f64),
    pub stopped: bool,
    pub calls: Vec<MotorCall>,
}

impl Default for FakeMotors {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, target: (0.0, 0.0), stopped: true, calls: Vec::new() }
    }
}

impl FakeMotors {
    pub fn arrive(&mut self) {
        (self.x, self.y) = self.target;
        self.stopped = true;
    }

    pub fn moves(&self) -> Vec<(f64, f64)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                MotorCall::MoveTo(x, y) => Some((*x, *y)),
                _ => None,
            })
            .collect()
    }

    pub fn last_speed(&self, axis: Axis) -> Option<f64> {
        self.calls.iter().rev().find_map(|c| match c {
            MotorCall::Speed(a, v) if *a == axis => Some(*v),
            _ => None,
        })
    }

    pub fn last_acceleration(&self, axis: Axis) -> Option<f64> {
        self.calls.iter().rev().find_map(|c| match c {
            MotorCall::Acceleration(a, v) if *a == axis => Some(*v),
            _ => None,
        })
    }
}

impl Motors for FakeMotors {
    fn x(&self) -> f64 {
        self.x
    }

    fn y(&self) -> f64 {
        self.y
    }

    fn all_stopped(&self) -> bool {
        self.stopped
    }

    fn set_speed(&mut self, axis: Axis, speed: f64) {
        self.calls.push(MotorCall::Speed(axis, speed));
    }

    fn set_acceleration(&mut self, axis: Axis, acceleration: f64) {
        self.calls.push(MotorCall::Acceleration(axis, acceleration));
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.calls.push(MotorCall::MoveTo(x, y));
        self.target = (x, y);
        self.stopped = false;
    }

    fn enable(&mut self) {
        self.calls.push(MotorCall::Enable);
    }

    fn disable(&mut self) {
        self.calls.push(MotorCall::Disable);
    }

    fn enable_z(&mut self) {
        self.calls.push(MotorCall::EnableZ);
    }

    fn disable_z(&mut self) {
        self.calls.push(MotorCall::DisableZ);
    }

    fn start_z(&mut self) {
        self.calls.push(MotorCall::StartZ);
    }

    fn stop_z(&mut self) {
        self.calls.push(MotorCall::StopZ);
    }

    fn stop_all(&mut self) {
        self.calls.push(MotorCall::StopAll);
    }

    fn abort_and_reset(&mut self) {
        self.calls.push(MotorCall::AbortAndReset);
    }
}

#[derive(Default)]
pub struct FakeServo {
    pub history: Vec<u8>,
}

impl TensionServo for FakeServo {
    fn set_tension(&mut self, percent: u8) {
        self.history.push(percent);
    }
}

pub struct FakeStorage {
    pub bytes: [u8; 16],
    pub writes: usize,
}

impl Default for FakeStorage {
    fn default() -> Self {
        Self { bytes: [0xFF; 16], writes: 0 }
    }
}

impl Storage for FakeStorage {
    fn read_byte(&self, addr: u16) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(0xFF)
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        if let Some(slot) = self.bytes.get_mut(addr as usize) {
            *slot = value;
        }
        self.writes += 1;
    }
}

#[derive(Default)]
pub struct FakeDisplay {
    pub progress: Vec<u8>,
    pub paused: usize,
    pub finished: usize,
}

impl StatusDisplay for FakeDisplay {
    fn show_progress(&mut self, percent: u8) {
        self.progress.push(percent);
    }

    fn show_paused(&mut self) {
        self.paused += 1;
    }

    fn show_finished(&mut self) {
        self.finished += 1;
    }
}

#[derive(Default)]
pub struct FakeClock {
    pub now: Cell<Millis>,
}

impl FakeClock {
    pub fn advance(&self, ms: Millis) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Millis {
        self.now.get()
    }
}

/// Every collaborator in one place.
#[derive(Default)]
pub struct Bench {
    pub program: FakeProgram,
    pub motors: FakeMotors,
    pub needle: NeedleFlag,
    pub servo: FakeServo,
    pub storage: FakeStorage,
    pub display: FakeDisplay,
    pub clock: FakeClock,
}

impl Bench {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            program: FakeProgram {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn peripherals(&mut self) -> Peripherals<'_> {
        Peripherals {
            program: &mut self.program,
            motors: &mut self.motors,
            needle: &self.needle,
            servo: &mut self.servo,
            display: &mut self.display,
            clock: &self.clock,
        }
    }

    pub fn tick(&mut self, state: &mut MachineState) -> TickOutcome {
        scheduler::tick(state, &mut self.peripherals())
    }
}
