//! GRBL dialect
//!
//! Command vocabulary and capabilities are resolved from version-keyed
//! tables ordered newest first.

use super::response_parser::GrblResponseParser;
use super::status_parser;
use crate::communication::{Acknowledgement, ResponseClassifier};
use crate::firmware::version::{resolve, VersionRequirement as Req};
use crate::firmware::{
    Capabilities, Capability, CommandKind, ControlSignal, ControllerType, DeviceResponse,
    FirmwareDialect, FirmwareVersion, OverrideAction, RealtimeCommand,
};
use gcodestream_core::{ControllerStatus, OverridePercents, Units};

/// GRBL receive buffer in bytes
pub const GRBL_RX_BUFFER_SIZE: usize = 123;

pub const PAUSE_COMMAND: u8 = b'!';
pub const RESUME_COMMAND: u8 = b'~';
pub const STATUS_COMMAND: u8 = b'?';
pub const RESET_COMMAND: u8 = 0x18;
pub const DOOR_COMMAND: u8 = 0x84;
pub const JOG_CANCEL_COMMAND: u8 = 0x85;

const HOMING: &[(Req, &str)] = &[
    (Req::at_least_letter(0.8, 'c'), "$H"),
    (Req::at_least(0.8), "G28 X0 Y0 Z0"),
];

const KILL_ALARM_LOCK: &[(Req, &str)] = &[(Req::at_least_letter(0.8, 'c'), "$X")];

const TOGGLE_CHECK_MODE: &[(Req, &str)] = &[(Req::at_least_letter(0.8, 'c'), "$C")];

const VIEW_PARSER_STATE: &[(Req, &str)] = &[(Req::at_least_letter(0.8, 'c'), "$G")];

const RESET_COORDINATES_TO_ZERO: &[(Req, &str)] = &[
    (Req::at_least(0.9), "G10 P0 L20 X0 Y0 Z0"),
    (Req::at_least(0.8), "G92 X0 Y0 Z0"),
];

const REAL_TIME: &[(Req, bool)] = &[(Req::at_least_letter(0.8, 'c'), true)];

const V1_FORMAT: &[(Req, bool)] = &[(Req::at_least(1.0), true)];

const RETURN_TO_ZERO_XY: &str = "G90 G0 X0 Y0";
const RETURN_TO_ZERO_Z: &str = "G90 G0 Z0";

/// GRBL firmware dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct GrblDialect {
    parser: GrblResponseParser,
}

impl GrblDialect {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseClassifier for GrblDialect {
    fn acknowledgement(&self, response: &str) -> Option<Acknowledgement> {
        match self.parser.parse(response) {
            DeviceResponse::Ok => Some(Acknowledgement::Ok),
            DeviceResponse::Error { .. } | DeviceResponse::Alarm { .. } => {
                Some(Acknowledgement::Error)
            }
            _ => None,
        }
    }
}

impl FirmwareDialect for GrblDialect {
    fn controller_type(&self) -> ControllerType {
        ControllerType::Grbl
    }

    fn receive_buffer_size(&self) -> usize {
        GRBL_RX_BUFFER_SIZE
    }

    fn classify(&self, line: &str) -> DeviceResponse {
        self.parser.parse(line)
    }

    fn parse_status(
        &self,
        line: &str,
        previous: Option<&ControllerStatus>,
        units: Units,
    ) -> Option<ControllerStatus> {
        status_parser::parse_status(line, previous, units)
    }

    fn parse_version(&self, line: &str) -> Option<FirmwareVersion> {
        self.parser.parse_version(line)
    }

    fn capabilities(&self, version: Option<&FirmwareVersion>) -> Capabilities {
        let mut caps = Capabilities::from_slice(&[
            Capability::XAxis,
            Capability::YAxis,
            Capability::ZAxis,
            Capability::Jogging,
        ]);

        let supported = |kind| self.command(kind, version).is_some();
        caps.set_capability(Capability::Homing, supported(CommandKind::Homing));
        caps.set_capability(
            Capability::KillAlarmLock,
            supported(CommandKind::KillAlarmLock),
        );
        caps.set_capability(Capability::CheckMode, supported(CommandKind::ToggleCheckMode));
        caps.set_capability(
            Capability::ParserState,
            supported(CommandKind::ViewParserState),
        );
        caps.set_capability(
            Capability::SetCoordinates,
            supported(CommandKind::ResetCoordinatesToZero),
        );
        caps.set_capability(Capability::ReturnToZero, version.is_some_and(|v| v.number >= 0.8));

        let real_time = resolve(REAL_TIME, version).unwrap_or(false);
        caps.set_capability(Capability::RealTime, real_time);

        let v1 = resolve(V1_FORMAT, version).unwrap_or(false);
        caps.set_capability(Capability::V1StatusFormat, v1);
        caps.set_capability(Capability::OverrideReporting, v1);
        caps.set_capability(Capability::Overrides, v1);
        caps
    }

    fn realtime(&self, command: RealtimeCommand, capabilities: &Capabilities) -> Option<u8> {
        if !capabilities.has_capability(Capability::RealTime) {
            return None;
        }
        match command {
            RealtimeCommand::Pause => Some(PAUSE_COMMAND),
            RealtimeCommand::Resume => Some(RESUME_COMMAND),
            RealtimeCommand::StatusQuery => Some(STATUS_COMMAND),
            RealtimeCommand::SoftReset => Some(RESET_COMMAND),
            RealtimeCommand::SafetyDoor => Some(DOOR_COMMAND),
            RealtimeCommand::JogCancel if capabilities.has_capability(Capability::V1StatusFormat) => {
                Some(JOG_CANCEL_COMMAND)
            }
            RealtimeCommand::JogCancel | RealtimeCommand::QueueFlush => None,
        }
    }

    fn status_request(&self, capabilities: &Capabilities) -> Option<ControlSignal> {
        self.realtime(RealtimeCommand::StatusQuery, capabilities)
            .map(ControlSignal::Byte)
    }

    fn command(&self, kind: CommandKind, version: Option<&FirmwareVersion>) -> Option<String> {
        let table = match kind {
            CommandKind::Homing => HOMING,
            CommandKind::KillAlarmLock => KILL_ALARM_LOCK,
            CommandKind::ToggleCheckMode => TOGGLE_CHECK_MODE,
            CommandKind::ViewParserState => VIEW_PARSER_STATE,
            CommandKind::ResetCoordinatesToZero => RESET_COORDINATES_TO_ZERO,
            CommandKind::ViewSettings => return Some("$$".to_string()),
            CommandKind::BuildInfo => return Some("$I".to_string()),
        };
        resolve(table, version).map(str::to_string)
    }

    fn return_to_home(&self, version: Option<&FirmwareVersion>, z: f64) -> Vec<String> {
        if !version.is_some_and(|v| v.number >= 0.8) {
            return Vec::new();
        }
        let mut commands = Vec::with_capacity(3);
        if z < 0.0 {
            commands.push(RETURN_TO_ZERO_Z.to_string());
        }
        commands.push(RETURN_TO_ZERO_XY.to_string());
        commands.push(RETURN_TO_ZERO_Z.to_string());
        commands
    }

    fn override_command(
        &self,
        action: OverrideAction,
        _current: &OverridePercents,
        capabilities: &Capabilities,
    ) -> Option<ControlSignal> {
        if !capabilities.has_capability(Capability::Overrides) {
            return None;
        }
        let byte = match action {
            OverrideAction::FeedReset => 0x90,
            OverrideAction::FeedCoarsePlus => 0x91,
            OverrideAction::FeedCoarseMinus => 0x92,
            OverrideAction::FeedFinePlus => 0x93,
            OverrideAction::FeedFineMinus => 0x94,
            OverrideAction::RapidReset => 0x95,
            OverrideAction::RapidMedium => 0x96,
            OverrideAction::RapidLow => 0x97,
            OverrideAction::SpindleReset => 0x99,
            OverrideAction::SpindleCoarsePlus => 0x9A,
            OverrideAction::SpindleCoarseMinus => 0x9B,
            OverrideAction::SpindleFinePlus => 0x9C,
            OverrideAction::SpindleFineMinus => 0x9D,
            OverrideAction::ToggleSpindle => 0x9E,
            OverrideAction::ToggleFloodCoolant => 0xA0,
            OverrideAction::ToggleMistCoolant => 0xA1,
        };
        Some(ControlSignal::Byte(byte))
    }
}
