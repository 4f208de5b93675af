//! Collaborator interfaces the interpreter drives.
//!
//! Every piece of hardware the interpreter touches sits behind one of these
//! traits so the same scheduler runs against real drivers, the [`crate::sim`]
//! bench, or recording test doubles. All calls are synchronous and must
//! return promptly; nothing here may block on a physical event.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Milliseconds on a monotonic clock.
pub type Millis = u64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    /// Needle (main) motor.
    Z,
}

/// Supplies program lines one at a time.
pub trait ProgramSource {
    /// Loads the next line into the buffer returned by [`ProgramSource::line`].
    /// Returns `false` once the program is exhausted.
    fn read_next_line(&mut self) -> bool;

    /// The line loaded by the last successful [`ProgramSource::read_next_line`].
    fn line(&self) -> &str;

    fn rewind(&mut self);
}

/// X/Y stepper pair plus the needle motor.
pub trait Motors {
    fn x(&self) -> f64;
    fn y(&self) -> f64;

    /// True once both X and Y have come to rest. The needle motor is not
    /// considered; it may keep turning across moves.
    fn all_stopped(&self) -> bool;

    fn set_speed(&mut self, axis: Axis, speed: f64);
    fn set_acceleration(&mut self, axis: Axis, acceleration: f64);
    fn move_to(&mut self, x: f64, y: f64);

    fn enable(&mut self);
    fn disable(&mut self);

    fn enable_z(&mut self);
    fn disable_z(&mut self);
    fn start_z(&mut self);
    fn stop_z(&mut self);

    /// Brings X and Y to a halt.
    fn stop_all(&mut self);
    /// Drops every queued motion and returns the drivers to their idle state.
    fn abort_and_reset(&mut self);
}

/// Needle-position sensor.
///
/// The flag is raised from interrupt context, so every method takes `&self`
/// and implementations must be safe to share with the handler.
pub trait NeedleSensor {
    fn interrupt_pending(&self) -> bool;
    fn clear_interrupt(&self);

    /// Test-and-clear. Implementations backed by an atomic should override
    /// this so an edge landing between the test and the clear is not lost.
    fn take_interrupt(&self) -> bool {
        let pending = self.interrupt_pending();
        if pending {
            self.clear_interrupt();
        }
        pending
    }
}

/// Thread-tension servo.
pub trait TensionServo {
    /// `percent` is in `0..=100`.
    fn set_tension(&mut self, percent: u8);
}

/// Byte-addressed non-volatile storage (EEPROM or flash emulation).
pub trait Storage {
    fn read_byte(&self, addr: u16) -> u8;
    fn write_byte(&mut self, addr: u16, value: u8);
}

/// Operator-facing status output.
pub trait StatusDisplay {
    fn show_progress(&mut self, percent: u8);
    fn show_paused(&mut self);
    fn show_finished(&mut self);
}

pub trait Clock {
    fn now(&self) -> Millis;
}

/// Sticky needle flag shared between the interrupt handler and the scheduler.
#[derive(Debug, Default)]
pub struct NeedleFlag(AtomicBool);

impl NeedleFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Called from the interrupt handler.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl NeedleSensor for NeedleFlag {
    fn interrupt_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn clear_interrupt(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn take_interrupt(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Borrowed view of the collaborators one tick drives.
pub struct Peripherals<'a> {
    pub program: &'a mut dyn ProgramSource,
    pub motors: &'a mut dyn Motors,
    pub needle: &'a dyn NeedleSensor,
    pub servo: &'a mut dyn TensionServo,
    pub display: &'a mut dyn StatusDisplay,
    pub clock: &'a dyn Clock,
}
