//! Data models for positions and controller status
//!
//! This module provides:
//! - Position tracking with optional rotary axes (A, B, C)
//! - Controller status snapshots and state enums
//! - Unit management (MM, INCH)

pub mod status;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use status::{
    control_state, Accessory, ControlState, ControllerState, ControllerStatus, OverridePercents,
    Pin,
};

/// Machine coordinate units (millimeters or inches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Units {
    /// Millimeters (metric)
    #[default]
    MM,
    /// Inches (imperial)
    INCH,
    /// Unknown or uninitialized
    Unknown,
}

impl Units {
    /// Convert a value from one unit to another
    ///
    /// Returns the original value if units are the same or unknown.
    pub fn convert(value: f64, from: Units, to: Units) -> f64 {
        if from == to {
            return value;
        }

        match (from, to) {
            (Units::MM, Units::INCH) => value / 25.4,
            (Units::INCH, Units::MM) => value * 25.4,
            _ => value,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::MM => write!(f, "mm"),
            Units::INCH => write!(f, "in"),
            Units::Unknown => write!(f, "unknown"),
        }
    }
}

/// Position in machine space with optional rotary axes
///
/// Rotary axes are `None` when the firmware did not report them, which
/// keeps a 3-axis report distinct from a 6-axis report sitting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// A-axis (4th axis) position
    pub a: Option<f64>,
    /// B-axis (5th axis) position
    pub b: Option<f64>,
    /// C-axis (6th axis) position
    pub c: Option<f64>,
    /// Coordinate unit
    pub units: Units,
}

impl Position {
    /// Create a 3-axis position in millimeters
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            a: None,
            b: None,
            c: None,
            units: Units::MM,
        }
    }

    /// Origin in the given units
    pub fn zero(units: Units) -> Self {
        Self {
            units,
            ..Self::new(0.0, 0.0, 0.0)
        }
    }

    /// Parse a comma separated coordinate list such as `1.000,2.000,3.000`
    ///
    /// Requires at least three numeric components; extra components
    /// populate A, B and C in order.
    pub fn parse(coords: &str, units: Units) -> Option<Self> {
        let values: Vec<f64> = coords
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;

        if values.len() < 3 {
            return None;
        }

        Some(Self {
            x: values[0],
            y: values[1],
            z: values[2],
            a: values.get(3).copied(),
            b: values.get(4).copied(),
            c: values.get(5).copied(),
            units,
        })
    }

    /// Component-wise sum, keeping the units of `self`
    pub fn add(&self, other: &Position) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
            a: combine(self.a, other.a, |p, o| p + o),
            b: combine(self.b, other.b, |p, o| p + o),
            c: combine(self.c, other.c, |p, o| p + o),
            units: self.units,
        }
    }

    /// Component-wise difference, keeping the units of `self`
    pub fn subtract(&self, other: &Position) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
            a: combine(self.a, other.a, |p, o| p - o),
            b: combine(self.b, other.b, |p, o| p - o),
            c: combine(self.c, other.c, |p, o| p - o),
            units: self.units,
        }
    }
}

// A missing offset component leaves the position component as reported.
fn combine(pos: Option<f64>, offset: Option<f64>, op: impl Fn(f64, f64) -> f64) -> Option<f64> {
    match (pos, offset) {
        (Some(p), Some(o)) => Some(op(p, o)),
        (Some(p), None) => Some(p),
        (None, _) => None,
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::zero(Units::MM)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{:.3} Y:{:.3} Z:{:.3}", self.x, self.y, self.z)?;
        if let Some(a) = self.a {
            write!(f, " A:{:.3}", a)?;
        }
        if let Some(b) = self.b {
            write!(f, " B:{:.3}", b)?;
        }
        if let Some(c) = self.c {
            write!(f, " C:{:.3}", c)?;
        }
        write!(f, " {}", self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_parse() {
        let pos = Position::parse("1.000,-2.500,3", Units::MM).unwrap();
        assert_eq!(pos, Position::new(1.0, -2.5, 3.0));

        let pos = Position::parse("1,2,3,4,5", Units::INCH).unwrap();
        assert_eq!(pos.a, Some(4.0));
        assert_eq!(pos.b, Some(5.0));
        assert_eq!(pos.c, None);
        assert_eq!(pos.units, Units::INCH);

        assert!(Position::parse("1,2", Units::MM).is_none());
        assert!(Position::parse("1,x,3", Units::MM).is_none());
    }

    #[test]
    fn test_position_arithmetic() {
        let work = Position::new(-6.0, -6.0, -6.0);
        let wco = Position::new(7.0, 8.0, 9.0);
        assert_eq!(work.add(&wco), Position::new(1.0, 2.0, 3.0));
        assert_eq!(Position::new(1.0, 2.0, 3.0).subtract(&wco), work);
    }

    #[test]
    fn test_units_convert() {
        assert_eq!(Units::convert(25.4, Units::MM, Units::INCH), 1.0);
        assert_eq!(Units::convert(2.0, Units::INCH, Units::MM), 50.8);
        assert_eq!(Units::convert(3.0, Units::Unknown, Units::MM), 3.0);
    }
}
