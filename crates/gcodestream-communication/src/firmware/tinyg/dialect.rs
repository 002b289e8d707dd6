//! TinyG dialect

use super::response_parser;
use crate::communication::{Acknowledgement, ResponseClassifier};
use crate::firmware::{
    Capabilities, Capability, CommandKind, ControlSignal, ControllerType, DeviceResponse,
    FirmwareDialect, FirmwareVersion, OverrideAction, RealtimeCommand,
};
use gcodestream_core::{ControllerStatus, OverridePercents, Units};

/// TinyG serial receive buffer in bytes
pub const TINYG_RX_BUFFER_SIZE: usize = 254;

pub const PAUSE_COMMAND: u8 = b'!';
pub const RESUME_COMMAND: u8 = b'~';
pub const STATUS_COMMAND: u8 = b'?';
pub const RESET_COMMAND: u8 = 0x18;
pub const QUEUE_FLUSH_COMMAND: u8 = b'%';
pub const KILL_JOB_COMMAND: u8 = 0x04;

const OVERRIDE_MIN: f64 = 0.05;
const OVERRIDE_MAX: f64 = 2.0;
const OVERRIDE_COARSE_STEP: f64 = 0.10;
const OVERRIDE_FINE_STEP: f64 = 0.05;

const RAPID_LOW: f64 = 0.25;
const RAPID_MEDIUM: f64 = 0.5;

/// TinyG firmware dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct TinyGDialect;

impl TinyGDialect {
    pub fn new() -> Self {
        Self
    }
}

/// Step an override ratio, `None` when the result leaves the allowed range
fn step_ratio(percent: u16, step: f64) -> Option<f64> {
    let next = f64::from(percent) / 100.0 + step;
    // Compare with a small tolerance so 0.05 + 0.10 steps land inside
    if next < OVERRIDE_MIN - 1e-9 || next > OVERRIDE_MAX + 1e-9 {
        None
    } else {
        Some(next)
    }
}

fn override_line(key: &str, ratio: f64) -> ControlSignal {
    ControlSignal::Line(format!("{{{}:{:.2}}}", key, ratio))
}

impl ResponseClassifier for TinyGDialect {
    fn acknowledgement(&self, response: &str) -> Option<Acknowledgement> {
        match response_parser::classify(response) {
            DeviceResponse::Ok => Some(Acknowledgement::Ok),
            DeviceResponse::Error { .. } => Some(Acknowledgement::Error),
            _ => None,
        }
    }
}

impl FirmwareDialect for TinyGDialect {
    fn controller_type(&self) -> ControllerType {
        ControllerType::TinyG
    }

    fn receive_buffer_size(&self) -> usize {
        TINYG_RX_BUFFER_SIZE
    }

    fn classify(&self, line: &str) -> DeviceResponse {
        response_parser::classify(line)
    }

    fn parse_status(
        &self,
        line: &str,
        previous: Option<&ControllerStatus>,
        units: Units,
    ) -> Option<ControllerStatus> {
        response_parser::parse_status(line, previous, units)
    }

    fn parse_version(&self, line: &str) -> Option<FirmwareVersion> {
        response_parser::parse_version(line)
    }

    fn capabilities(&self, _version: Option<&FirmwareVersion>) -> Capabilities {
        Capabilities::from_slice(&[
            Capability::XAxis,
            Capability::YAxis,
            Capability::ZAxis,
            Capability::AAxis,
            Capability::RealTime,
            Capability::Overrides,
            Capability::OverrideReporting,
            Capability::Homing,
            Capability::KillAlarmLock,
            Capability::Jogging,
            Capability::ReturnToZero,
        ])
    }

    fn realtime(&self, command: RealtimeCommand, _capabilities: &Capabilities) -> Option<u8> {
        match command {
            RealtimeCommand::Pause => Some(PAUSE_COMMAND),
            RealtimeCommand::Resume => Some(RESUME_COMMAND),
            RealtimeCommand::StatusQuery => Some(STATUS_COMMAND),
            RealtimeCommand::SoftReset => Some(RESET_COMMAND),
            RealtimeCommand::QueueFlush => Some(QUEUE_FLUSH_COMMAND),
            RealtimeCommand::JogCancel => Some(KILL_JOB_COMMAND),
            RealtimeCommand::SafetyDoor => None,
        }
    }

    fn status_request(&self, capabilities: &Capabilities) -> Option<ControlSignal> {
        self.realtime(RealtimeCommand::StatusQuery, capabilities)
            .map(ControlSignal::Byte)
    }

    fn command(&self, kind: CommandKind, _version: Option<&FirmwareVersion>) -> Option<String> {
        match kind {
            CommandKind::Homing => Some("G28.2 X0 Y0 Z0".to_string()),
            CommandKind::KillAlarmLock => Some("{clear:n}".to_string()),
            CommandKind::BuildInfo => Some("{fv:n}".to_string()),
            CommandKind::ToggleCheckMode
            | CommandKind::ViewParserState
            | CommandKind::ViewSettings
            | CommandKind::ResetCoordinatesToZero => None,
        }
    }

    fn return_to_home(&self, _version: Option<&FirmwareVersion>, z: f64) -> Vec<String> {
        let mut commands = Vec::with_capacity(3);
        if z < 0.0 {
            commands.push("G90 G0 Z0".to_string());
        }
        commands.push("G90 G0 X0 Y0".to_string());
        commands.push("G90 G0 Z0".to_string());
        commands
    }

    fn override_command(
        &self,
        action: OverrideAction,
        current: &OverridePercents,
        _capabilities: &Capabilities,
    ) -> Option<ControlSignal> {
        let feed = |step| step_ratio(current.feed, step).map(|r| override_line("mfo", r));
        let spindle = |step| step_ratio(current.spindle, step).map(|r| override_line("sso", r));
        match action {
            OverrideAction::FeedReset => Some(override_line("mfo", 1.0)),
            OverrideAction::FeedCoarsePlus => feed(OVERRIDE_COARSE_STEP),
            OverrideAction::FeedCoarseMinus => feed(-OVERRIDE_COARSE_STEP),
            OverrideAction::FeedFinePlus => feed(OVERRIDE_FINE_STEP),
            OverrideAction::FeedFineMinus => feed(-OVERRIDE_FINE_STEP),
            OverrideAction::SpindleReset => Some(override_line("sso", 1.0)),
            OverrideAction::SpindleCoarsePlus => spindle(OVERRIDE_COARSE_STEP),
            OverrideAction::SpindleCoarseMinus => spindle(-OVERRIDE_COARSE_STEP),
            OverrideAction::SpindleFinePlus => spindle(OVERRIDE_FINE_STEP),
            OverrideAction::SpindleFineMinus => spindle(-OVERRIDE_FINE_STEP),
            OverrideAction::RapidReset => Some(override_line("mto", 1.0)),
            OverrideAction::RapidMedium => Some(override_line("mto", RAPID_MEDIUM)),
            OverrideAction::RapidLow => Some(override_line("mto", RAPID_LOW)),
            OverrideAction::ToggleSpindle
            | OverrideAction::ToggleFloodCoolant
            | OverrideAction::ToggleMistCoolant => None,
        }
    }
}
