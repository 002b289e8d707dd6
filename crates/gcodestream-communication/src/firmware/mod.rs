//! Firmware dialects for supported CNC controllers
//!
//! Supported controllers:
//! - GRBL: single-byte real-time commands and `ok`/`error` acknowledgments
//! - TinyG: JSON responses and status reports
//! - Smoothieware: GRBL-like responses with a `smoothie` boot banner
//!
//! Each dialect is a strategy object behind [`FirmwareDialect`]; the
//! controller never branches on the firmware type itself.

pub mod capabilities;
pub mod grbl;
pub mod smoothie;
pub mod tinyg;
pub mod version;

use crate::communication::ResponseClassifier;
use gcodestream_core::{ControllerState, ControllerStatus, OverridePercents, Units};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use capabilities::{Capabilities, Capability};
pub use grbl::GrblDialect;
pub use smoothie::SmoothieDialect;
pub use tinyg::TinyGDialect;
pub use version::{FirmwareVersion, VersionRequirement};

/// Supported CNC controller types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ControllerType {
    /// GRBL (default, most common)
    #[default]
    Grbl,
    /// TinyG
    TinyG,
    /// Smoothieware
    Smoothie,
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grbl => write!(f, "GRBL"),
            Self::TinyG => write!(f, "TinyG"),
            Self::Smoothie => write!(f, "Smoothieware"),
        }
    }
}

impl FromStr for ControllerType {
    type Err = gcodestream_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grbl" => Ok(Self::Grbl),
            "tinyg" => Ok(Self::TinyG),
            "smoothie" | "smoothieware" => Ok(Self::Smoothie),
            other => Err(gcodestream_core::Error::other(format!(
                "Unknown controller type: {}",
                other
            ))),
        }
    }
}

/// Classification of one line received from the device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceResponse {
    /// Command accepted
    Ok,
    /// Command rejected
    Error { message: String },
    /// Device raised an alarm
    Alarm { code: u32, description: String },
    /// Status report, parsed separately with [`FirmwareDialect::parse_status`]
    Status,
    /// Boot banner; the device has just reset
    Welcome(FirmwareVersion),
    /// Version or build information
    Version(FirmwareVersion),
    /// Firmware setting such as `$110=500.000`
    Setting { key: String, value: String },
    /// Modal parser state
    ParserState(String),
    /// Device finished booting and awaits a handshake
    Ready,
    /// Informational text
    Message(String),
    /// Nothing recognizable
    Unknown,
}

/// How a control action reaches the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Single real-time byte written outside the queues
    Byte(u8),
    /// Command line sent through the flow-controlled queue
    Line(String),
}

/// Real-time actions handled outside the command queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeCommand {
    Pause,
    Resume,
    StatusQuery,
    SoftReset,
    JogCancel,
    SafetyDoor,
    QueueFlush,
}

/// Version-dependent command vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Homing,
    KillAlarmLock,
    ToggleCheckMode,
    ViewParserState,
    ViewSettings,
    BuildInfo,
    ResetCoordinatesToZero,
}

/// Feed, rapid and spindle override adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideAction {
    FeedReset,
    FeedCoarsePlus,
    FeedCoarseMinus,
    FeedFinePlus,
    FeedFineMinus,
    RapidReset,
    RapidMedium,
    RapidLow,
    SpindleReset,
    SpindleCoarsePlus,
    SpindleCoarseMinus,
    SpindleFinePlus,
    SpindleFineMinus,
    ToggleSpindle,
    ToggleFloodCoolant,
    ToggleMistCoolant,
}

/// Firmware-specific protocol behavior
///
/// The acknowledgment half comes from [`ResponseClassifier`] so the same
/// object drives the communicator.
pub trait FirmwareDialect: ResponseClassifier {
    /// Which firmware this dialect speaks
    fn controller_type(&self) -> ControllerType;

    /// Default receive buffer size in bytes
    fn receive_buffer_size(&self) -> usize;

    /// Classify one framed line
    fn classify(&self, line: &str) -> DeviceResponse;

    /// Parse a status payload into a new snapshot
    ///
    /// `previous` supplies fields the report leaves out.
    fn parse_status(
        &self,
        line: &str,
        previous: Option<&ControllerStatus>,
        units: Units,
    ) -> Option<ControllerStatus>;

    /// Extract a firmware version from a line, if it carries one
    fn parse_version(&self, line: &str) -> Option<FirmwareVersion>;

    /// Capabilities for a resolved version
    fn capabilities(&self, version: Option<&FirmwareVersion>) -> Capabilities;

    /// Byte for a real-time action, `None` when unsupported
    fn realtime(&self, command: RealtimeCommand, capabilities: &Capabilities) -> Option<u8>;

    /// How to ask for a status report
    fn status_request(&self, capabilities: &Capabilities) -> Option<ControlSignal>;

    /// Command text for a vocabulary entry, `None` when unsupported
    fn command(&self, kind: CommandKind, version: Option<&FirmwareVersion>) -> Option<String>;

    /// Commands that move back to the work origin from height `z`
    fn return_to_home(&self, version: Option<&FirmwareVersion>, z: f64) -> Vec<String>;

    /// Signal that applies `action` given the current override percentages
    fn override_command(
        &self,
        action: OverrideAction,
        current: &OverridePercents,
        capabilities: &Capabilities,
    ) -> Option<ControlSignal>;

    /// State assumed locally right after a soft reset, if any
    fn state_after_reset(&self) -> Option<ControllerState> {
        None
    }
}

/// Dialect for a controller type
pub fn dialect_for(controller_type: ControllerType) -> Arc<dyn FirmwareDialect> {
    match controller_type {
        ControllerType::Grbl => Arc::new(GrblDialect::new()),
        ControllerType::TinyG => Arc::new(TinyGDialect::new()),
        ControllerType::Smoothie => Arc::new(SmoothieDialect::new()),
    }
}
