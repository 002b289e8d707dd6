//! Smoothieware dialect
//!
//! Real-time bytes are always available; a soft reset drops the USB
//! session, so the state is assumed disconnected afterwards.

use super::response_parser;
use crate::communication::{Acknowledgement, ResponseClassifier};
use crate::firmware::grbl::status_parser;
use crate::firmware::{
    Capabilities, Capability, CommandKind, ControlSignal, ControllerType, DeviceResponse,
    FirmwareDialect, FirmwareVersion, OverrideAction, RealtimeCommand,
};
use gcodestream_core::{ControllerState, ControllerStatus, OverridePercents, Units};

/// Smoothieware line buffer in bytes
pub const SMOOTHIE_RX_BUFFER_SIZE: usize = 123;

pub const PAUSE_COMMAND: u8 = b'!';
pub const RESUME_COMMAND: u8 = b'~';
pub const STATUS_COMMAND: u8 = b'?';
pub const RESET_COMMAND: u8 = 0x18;

/// Smoothieware firmware dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct SmoothieDialect;

impl SmoothieDialect {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseClassifier for SmoothieDialect {
    fn acknowledgement(&self, response: &str) -> Option<Acknowledgement> {
        match response_parser::classify(response) {
            DeviceResponse::Ok => Some(Acknowledgement::Ok),
            DeviceResponse::Error { .. } | DeviceResponse::Alarm { .. } => {
                Some(Acknowledgement::Error)
            }
            _ => None,
        }
    }
}

impl FirmwareDialect for SmoothieDialect {
    fn controller_type(&self) -> ControllerType {
        ControllerType::Smoothie
    }

    fn receive_buffer_size(&self) -> usize {
        SMOOTHIE_RX_BUFFER_SIZE
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
        status_parser::parse_status(line, previous, units)
    }

    fn parse_version(&self, line: &str) -> Option<FirmwareVersion> {
        response_parser::parse_version(line)
    }

    fn capabilities(&self, _version: Option<&FirmwareVersion>) -> Capabilities {
        Capabilities::from_slice(&[
            Capability::XAxis,
            Capability::YAxis,
            Capability::ZAxis,
            Capability::Jogging,
            Capability::Homing,
            Capability::ReturnToZero,
            Capability::RealTime,
            Capability::KillAlarmLock,
            Capability::ParserState,
        ])
    }

    fn realtime(&self, command: RealtimeCommand, _capabilities: &Capabilities) -> Option<u8> {
        match command {
            RealtimeCommand::Pause => Some(PAUSE_COMMAND),
            RealtimeCommand::Resume => Some(RESUME_COMMAND),
            RealtimeCommand::StatusQuery => Some(STATUS_COMMAND),
            RealtimeCommand::SoftReset => Some(RESET_COMMAND),
            RealtimeCommand::JogCancel
            | RealtimeCommand::SafetyDoor
            | RealtimeCommand::QueueFlush => None,
        }
    }

    fn status_request(&self, capabilities: &Capabilities) -> Option<ControlSignal> {
        self.realtime(RealtimeCommand::StatusQuery, capabilities)
            .map(ControlSignal::Byte)
    }

    fn command(&self, kind: CommandKind, _version: Option<&FirmwareVersion>) -> Option<String> {
        let text = match kind {
            CommandKind::Homing => "$H",
            CommandKind::KillAlarmLock => "$X",
            CommandKind::ViewParserState => "$G",
            CommandKind::BuildInfo => "version",
            CommandKind::ToggleCheckMode
            | CommandKind::ViewSettings
            | CommandKind::ResetCoordinatesToZero => return None,
        };
        Some(text.to_string())
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
        _action: OverrideAction,
        _current: &OverridePercents,
        _capabilities: &Capabilities,
    ) -> Option<ControlSignal> {
        None
    }

    fn state_after_reset(&self) -> Option<ControllerState> {
        Some(ControllerState::Disconnected)
    }
}
