//! Controller capabilities
//!
//! A [`Capabilities`] set is resolved once per connection from the firmware
//! version and replaced wholesale when the device resets or reconnects.

use std::collections::HashSet;
use std::fmt;

/// Capability flags for controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Single-byte real-time commands (pause, resume, status, reset)
    RealTime,
    /// Override percentages are included in status reports
    OverrideReporting,
    /// Feed, rapid and spindle overrides can be adjusted
    Overrides,
    /// Pipe-delimited status report format
    V1StatusFormat,
    /// Homing cycle command
    Homing,
    /// Alarm lock can be cleared
    KillAlarmLock,
    /// Check (dry-run) mode
    CheckMode,
    /// Parser state query
    ParserState,
    /// Jogging
    Jogging,
    /// Return to the work origin
    ReturnToZero,
    /// Work coordinates can be reset
    SetCoordinates,
    XAxis,
    YAxis,
    ZAxis,
    AAxis,
    BAxis,
    CAxis,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RealTime => write!(f, "Real-time Commands"),
            Self::OverrideReporting => write!(f, "Override Reporting"),
            Self::Overrides => write!(f, "Overrides"),
            Self::V1StatusFormat => write!(f, "V1 Status Format"),
            Self::Homing => write!(f, "Homing"),
            Self::KillAlarmLock => write!(f, "Kill Alarm Lock"),
            Self::CheckMode => write!(f, "Check Mode"),
            Self::ParserState => write!(f, "Parser State"),
            Self::Jogging => write!(f, "Jogging"),
            Self::ReturnToZero => write!(f, "Return To Zero"),
            Self::SetCoordinates => write!(f, "Set Coordinates"),
            Self::XAxis => write!(f, "X Axis"),
            Self::YAxis => write!(f, "Y Axis"),
            Self::ZAxis => write!(f, "Z Axis"),
            Self::AAxis => write!(f, "A Axis"),
            Self::BAxis => write!(f, "B Axis"),
            Self::CAxis => write!(f, "C Axis"),
        }
    }
}

/// Immutable-per-session set of supported capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    enabled: HashSet<Capability>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a list of capabilities
    pub fn from_slice(capabilities: &[Capability]) -> Self {
        Self {
            enabled: capabilities.iter().copied().collect(),
        }
    }

    /// Enable or disable a capability
    pub fn set_capability(&mut self, capability: Capability, enabled: bool) {
        if enabled {
            self.enabled.insert(capability);
        } else {
            self.enabled.remove(&capability);
        }
    }

    /// Builder form of [`Capabilities::set_capability`]
    pub fn with(mut self, capability: Capability) -> Self {
        self.enabled.insert(capability);
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }

    /// All supported capabilities in a stable order
    pub fn get_capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self.enabled.iter().copied().collect();
        caps.sort();
        caps
    }

    /// Check if axis is supported
    pub fn supports_axis(&self, axis: char) -> bool {
        let capability = match axis.to_ascii_uppercase() {
            'X' => Capability::XAxis,
            'Y' => Capability::YAxis,
            'Z' => Capability::ZAxis,
            'A' => Capability::AAxis,
            'B' => Capability::BAxis,
            'C' => Capability::CAxis,
            _ => return false,
        };
        self.has_capability(capability)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .get_capabilities()
            .iter()
            .map(|c| c.to_string())
            .collect();
        write!(f, "{}", names.join(", "))
    }
}
