//! Two-axis linear interpolation factors.

use serde::Serialize;

/// Per-axis share of the commanded feed and acceleration for a straight move.
///
/// For any real move `x² + y² == 1`, so scaling both axes by these factors
/// makes them start and finish together.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct AxisFactors {
    pub x: f64,
    pub y: f64,
}

impl AxisFactors {
    /// Weighting before any move has been interpolated.
    pub const UNIT: Self = Self { x: 1.0, y: 1.0 };
    /// Weighting of a move that goes nowhere.
    pub const STILL: Self = Self { x: 0.0, y: 0.0 };
}

/// Direction fractions from `(current_x, current_y)` to `(target_x, target_y)`.
///
/// A zero-length move yields [`AxisFactors::STILL`] instead of dividing by zero.
pub fn interpolate(current_x: f64, current_y: f64, target_x: f64, target_y: f64) -> AxisFactors {
    let dx = target_x - current_x;
    let dy = target_y - current_y;
    let distance = dx.hypot(dy);

    if distance <= 0.0 || !distance.is_finite() {
        return AxisFactors::STILL;
    }

    AxisFactors {
        x: dx.abs() / distance,
        y: dy.abs() / distance,
    }
}
