//! Controller status snapshots
//!
//! A [`ControllerStatus`] is built from a single status report and replaced
//! wholesale by the next one. [`ControlState`] layers streaming progress on
//! top of the reported machine state.

use super::{Position, Units};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Machine state as reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ControllerState {
    /// State string was not recognized or nothing has been reported yet
    #[default]
    Unknown,
    /// Connection closed or a reset is pending
    Disconnected,
    /// Connected and idle, ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold, awaiting resume
    Hold,
    /// Homing cycle in progress
    Home,
    /// Jog motion in progress
    Jog,
    /// Machine alarm state (requires unlock or reset)
    Alarm,
    /// Safety door interlock triggered
    Door,
    /// Check mode (dry-run without machine movement)
    Check,
    /// Low-power sleep state
    Sleep,
}

impl ControllerState {
    /// Classify a reported state string such as `Idle`, `Hold:0` or `Door:1`
    ///
    /// Substates after a colon are ignored and matching is case-insensitive.
    pub fn from_report(state: &str) -> Self {
        let name = state.split(':').next().unwrap_or_default().trim();
        match name.to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "run" => Self::Run,
            "hold" => Self::Hold,
            "home" => Self::Home,
            "jog" => Self::Jog,
            "alarm" => Self::Alarm,
            "door" => Self::Door,
            "check" => Self::Check,
            "sleep" => Self::Sleep,
            _ => Self::Unknown,
        }
    }

    /// Check if this state indicates active motion
    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Run | Self::Jog | Self::Home)
    }

    /// States in which the device will not execute newly streamed commands
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Hold | Self::Alarm | Self::Door | Self::Sleep)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Disconnected => "Disconnected",
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Home => "Home",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Sleep => "Sleep",
        };
        write!(f, "{}", name)
    }
}

/// Streaming-aware classification used by callers deciding what is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ControlState {
    /// No connection
    #[default]
    Disconnected,
    /// Connected and not sending
    Idle,
    /// Commands are being sent or executed
    Sending,
    /// A send is in progress but held
    SendingPaused,
    /// Check mode outside of a stream
    Check,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Idle => write!(f, "Idle"),
            Self::Sending => write!(f, "Sending"),
            Self::SendingPaused => write!(f, "Sending paused"),
            Self::Check => write!(f, "Check"),
        }
    }
}

/// Combine a reported machine state with local streaming progress
///
/// An idle machine while a stream is active means the device drained its
/// planner but the sender is holding back, so the send counts as paused.
pub fn control_state(state: ControllerState, is_streaming: bool, comm_paused: bool) -> ControlState {
    match state {
        ControllerState::Disconnected => ControlState::Disconnected,
        ControllerState::Idle if is_streaming => ControlState::SendingPaused,
        ControllerState::Idle => ControlState::Idle,
        ControllerState::Run | ControllerState::Jog | ControllerState::Home => {
            ControlState::Sending
        }
        ControllerState::Hold | ControllerState::Door => ControlState::SendingPaused,
        ControllerState::Check if is_streaming && comm_paused => ControlState::SendingPaused,
        ControllerState::Check if is_streaming => ControlState::Sending,
        ControllerState::Check => ControlState::Check,
        ControllerState::Alarm | ControllerState::Sleep | ControllerState::Unknown => {
            ControlState::Idle
        }
    }
}

/// Feed, rapid and spindle override percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePercents {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl OverridePercents {
    /// Parse an override triple (format: "feed,rapid,spindle")
    pub fn parse(ov_str: &str) -> Option<Self> {
        let mut parts = ov_str.split(',').map(|s| s.trim().parse::<u16>());
        let feed = parts.next()?.ok()?;
        let rapid = parts.next()?.ok()?;
        let spindle = parts.next()?.ok()?;
        Some(Self {
            feed,
            rapid,
            spindle,
        })
    }
}

impl Default for OverridePercents {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
        }
    }
}

/// Input pins reported in `Pn:` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Pin {
    /// X limit switch
    XLimit,
    /// Y limit switch
    YLimit,
    /// Z limit switch
    ZLimit,
    /// A limit switch
    ALimit,
    /// B limit switch
    BLimit,
    /// C limit switch
    CLimit,
    /// Probe input
    Probe,
    /// Safety door input
    Door,
    /// Feed hold button
    Hold,
    /// Soft reset button
    SoftReset,
    /// Cycle start button
    CycleStart,
}

impl Pin {
    /// Map a single `Pn:` flag character to a pin
    pub fn from_flag(flag: char) -> Option<Self> {
        match flag {
            'X' => Some(Self::XLimit),
            'Y' => Some(Self::YLimit),
            'Z' => Some(Self::ZLimit),
            'A' => Some(Self::ALimit),
            'B' => Some(Self::BLimit),
            'C' => Some(Self::CLimit),
            'P' => Some(Self::Probe),
            'D' => Some(Self::Door),
            'H' => Some(Self::Hold),
            'R' => Some(Self::SoftReset),
            'S' => Some(Self::CycleStart),
            _ => None,
        }
    }

    /// Parse every recognized flag in a `Pn:` value
    pub fn parse_set(flags: &str) -> BTreeSet<Self> {
        flags.chars().filter_map(Self::from_flag).collect()
    }
}

/// Accessory outputs reported in `A:` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Accessory {
    /// Spindle running clockwise
    SpindleCw,
    /// Spindle running counter-clockwise
    SpindleCcw,
    /// Flood coolant on
    FloodCoolant,
    /// Mist coolant on
    MistCoolant,
}

impl Accessory {
    /// Map a single `A:` flag character to an accessory
    pub fn from_flag(flag: char) -> Option<Self> {
        match flag {
            'S' => Some(Self::SpindleCw),
            'C' => Some(Self::SpindleCcw),
            'F' => Some(Self::FloodCoolant),
            'M' => Some(Self::MistCoolant),
            _ => None,
        }
    }

    /// Parse every recognized flag in an `A:` value
    pub fn parse_set(flags: &str) -> BTreeSet<Self> {
        flags.chars().filter_map(Self::from_flag).collect()
    }
}

/// Immutable snapshot of one parsed status report
///
/// `machine_position == work_position + work_coordinate_offset` holds for
/// every snapshot produced by the status parsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Raw state string as reported (e.g. `Hold:0`)
    pub state_string: String,
    /// Classified machine state
    pub state: ControllerState,
    /// Machine coordinates
    pub machine_position: Position,
    /// Work coordinates
    pub work_position: Position,
    /// Work coordinate offset
    pub work_coordinate_offset: Position,
    /// Current feed rate (units/min)
    pub feed_speed: Option<f64>,
    /// Current spindle speed (RPM)
    pub spindle_speed: Option<f64>,
    /// Override percentages
    pub overrides: OverridePercents,
    /// Active input pins
    pub pins: BTreeSet<Pin>,
    /// Active accessory outputs
    pub accessories: BTreeSet<Accessory>,
}

impl ControllerStatus {
    /// Status with only a state, all positions at the origin
    pub fn with_state(state: ControllerState, units: Units) -> Self {
        Self {
            state_string: state.to_string(),
            state,
            machine_position: Position::zero(units),
            work_position: Position::zero(units),
            work_coordinate_offset: Position::zero(units),
            feed_speed: None,
            spindle_speed: None,
            overrides: OverridePercents::default(),
            pins: BTreeSet::new(),
            accessories: BTreeSet::new(),
        }
    }

    /// Copy of this snapshot with a different state
    pub fn replace_state(&self, state: ControllerState) -> Self {
        Self {
            state_string: state.to_string(),
            state,
            ..self.clone()
        }
    }
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self::with_state(ControllerState::Unknown, Units::MM)
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} MPos[{}] WPos[{}]",
            self.state, self.machine_position, self.work_position
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_report() {
        assert_eq!(ControllerState::from_report("Idle"), ControllerState::Idle);
        assert_eq!(ControllerState::from_report("Hold:1"), ControllerState::Hold);
        assert_eq!(ControllerState::from_report("door:0"), ControllerState::Door);
        assert_eq!(ControllerState::from_report("Bogus"), ControllerState::Unknown);
    }

    #[test]
    fn test_control_state_classification() {
        use ControllerState::*;
        assert_eq!(control_state(Idle, false, false), ControlState::Idle);
        assert_eq!(control_state(Idle, true, false), ControlState::SendingPaused);
        assert_eq!(control_state(Run, true, false), ControlState::Sending);
        assert_eq!(control_state(Jog, false, false), ControlState::Sending);
        assert_eq!(control_state(Hold, true, false), ControlState::SendingPaused);
        assert_eq!(control_state(Door, false, false), ControlState::SendingPaused);
        assert_eq!(control_state(Check, false, false), ControlState::Check);
        assert_eq!(control_state(Check, true, false), ControlState::Sending);
        assert_eq!(control_state(Check, true, true), ControlState::SendingPaused);
        assert_eq!(control_state(Alarm, true, false), ControlState::Idle);
        assert_eq!(
            control_state(Disconnected, true, true),
            ControlState::Disconnected
        );
    }

    #[test]
    fn test_flags() {
        let pins = Pin::parse_set("XZP?");
        assert_eq!(
            pins.into_iter().collect::<Vec<_>>(),
            vec![Pin::XLimit, Pin::ZLimit, Pin::Probe]
        );

        let acc = Accessory::parse_set("SFM");
        assert!(acc.contains(&Accessory::SpindleCw));
        assert!(acc.contains(&Accessory::MistCoolant));
        assert!(!acc.contains(&Accessory::SpindleCcw));
    }

    #[test]
    fn test_override_parse() {
        assert_eq!(
            OverridePercents::parse("120,50,80"),
            Some(OverridePercents {
                feed: 120,
                rapid: 50,
                spindle: 80
            })
        );
        assert_eq!(OverridePercents::parse("120,50"), None);
    }
}
