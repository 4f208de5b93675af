//! The per-tick program interpreter.
//!
//! [`tick`] is called once per scheduler tick. It never waits: when the gate
//! recorded by the previous line is not yet satisfied it returns
//! [`TickOutcome::Waiting`] and the caller simply ticks again later. When the
//! gate opens it executes exactly one program line and records the gate for
//! the line after it.
//!
//! Within a line the motion word (`G`) is dispatched before the machine
//! control word (`M`). Both may set the gate, so on a line carrying both the
//! control word wins.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::hal::{Axis, Clock, Motors, NeedleSensor, Peripherals, StatusDisplay, TensionServo};
use crate::interpolation::interpolate;
use crate::parser::{command_code, parse_field};
use crate::state::{GatingCondition, MachineState, NeedleAction};

#[wasm_bindgen]
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The gate is still closed; nothing changed.
    Waiting,
    /// One line was read and dispatched.
    Executed,
    /// Held by a pause until resumed.
    Paused,
    /// The program has run out; nothing advances until it is reloaded.
    Finished,
}

pub fn tick(state: &mut MachineState, hw: &mut Peripherals<'_>) -> TickOutcome {
    if state.paused {
        return TickOutcome::Paused;
    }
    if state.finished {
        return TickOutcome::Finished;
    }

    if !gate_open(state.gating, hw.motors, hw.needle, hw.clock) {
        return TickOutcome::Waiting;
    }

    // Gate passed: forget it, together with any edge that came in meanwhile.
    hw.needle.clear_interrupt();
    state.gating = GatingCondition::Immediate;

    if !hw.program.read_next_line() {
        console_log!("Program finished");
        state.finished = true;
        hw.display.show_finished();
        return TickOutcome::Finished;
    }

    let line = hw.program.line();
    dispatch_motion(state, line, hw.motors, hw.clock);
    dispatch_control(state, line, hw.motors, hw.needle, hw.servo, hw.display);

    TickOutcome::Executed
}

/// Whether the line after the one that installed `gating` may run now.
/// Applies the interrupt action, once, when the awaited interrupt is seen.
fn gate_open(
    gating: GatingCondition,
    motors: &mut dyn Motors,
    needle: &dyn NeedleSensor,
    clock: &dyn Clock,
) -> bool {
    match gating {
        GatingCondition::Immediate => true,
        GatingCondition::AfterMove => motors.all_stopped(),
        GatingCondition::AfterInterrupt { pending_action } => {
            if !needle.take_interrupt() {
                return false;
            }
            match pending_action {
                NeedleAction::StopMotor => motors.stop_z(),
                NeedleAction::None => {}
            }
            true
        }
        GatingCondition::AfterDwell { deadline } => clock.now() >= deadline,
    }
}

fn dispatch_motion(state: &mut MachineState, line: &str, motors: &mut dyn Motors, clock: &dyn Clock) {
    match command_code(line, 'G') {
        // G0, G1: straight move
        Some(0 | 1) => {
            let (current_x, current_y) = (motors.x(), motors.y());
            // An overflowing numeral (`X1e999`) leaves that value unchanged.
            state.x_new = finite_or(parse_field(line, 'X', current_x), current_x);
            state.y_new = finite_or(parse_field(line, 'Y', current_y), current_y);
            state.speed_xy = finite_or(parse_field(line, 'F', state.speed_xy), state.speed_xy);

            let factors = interpolate(current_x, current_y, state.x_new, state.y_new);
            state.interpolation = factors;

            motors.set_speed(Axis::X, state.speed_xy * factors.x);
            motors.set_speed(Axis::Y, state.speed_xy * factors.y);
            motors.set_acceleration(Axis::X, state.acceleration_x * factors.x);
            motors.set_acceleration(Axis::Y, state.acceleration_y * factors.y);
            motors.move_to(state.x_new, state.y_new);

            state.gating = GatingCondition::AfterMove;
        }
        // G4: dwell, P in milliseconds
        Some(4) => {
            let delay = parse_field(line, 'P', 0.0);
            // `as` saturates: negative and NaN become 0.
            let delay = delay as u64;
            state.gating = GatingCondition::AfterDwell {
                deadline: clock.now().saturating_add(delay),
            };
        }
        _ => {}
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

fn dispatch_control(
    state: &mut MachineState,
    line: &str,
    motors: &mut dyn Motors,
    needle: &dyn NeedleSensor,
    servo: &mut dyn TensionServo,
    display: &mut dyn StatusDisplay,
) {
    match command_code(line, 'M') {
        // M0: pause, C is the reason code
        Some(0) => {
            let code = parse_field(line, 'C', 0.0) as u8;
            state.pause(code, motors);
            display.show_paused();
        }
        // M3: needle motor on, optionally for one revolution (I1)
        Some(3) => {
            motors.enable_z();

            state.speed_z = parse_field(line, 'S', state.config.speed_z);
            motors.set_speed(Axis::Z, state.speed_z);

            if parse_field(line, 'I', 0.0) > 0.0 {
                needle.clear_interrupt();
                state.gating = GatingCondition::AfterInterrupt {
                    pending_action: NeedleAction::StopMotor,
                };
            } else {
                state.gating = GatingCondition::Immediate;
            }

            if state.speed_z > 0.0 {
                motors.start_z();
            } else {
                motors.stop_z();
            }
        }
        // M5: needle motor off
        Some(5) => {
            motors.disable_z();
            motors.stop_z();
        }
        Some(17) => motors.enable(),
        Some(18) => motors.disable(),
        // M41 / M42: thread tension off / on
        Some(41) => state.apply_tension(false, servo),
        Some(42) => state.apply_tension(true, servo),
        // M73: progress
        Some(73) => {
            let raw = parse_field(line, 'P', f64::from(state.progress));
            state.set_progress(raw);
            display.show_progress(state.progress);
        }
        // M201: accelerations
        Some(201) => {
            state.acceleration_x = parse_field(line, 'X', state.acceleration_x);
            state.acceleration_y = parse_field(line, 'Y', state.acceleration_y);

            motors.set_acceleration(Axis::X, state.acceleration_x);
            motors.set_acceleration(Axis::Y, state.acceleration_y);
            motors.set_acceleration(Axis::Z, parse_field(line, 'Z', state.config.acceleration_z));
        }
        _ => {}
    }
}
