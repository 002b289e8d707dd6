//! GRBL Response Parser
//!
//! Classifies GRBL protocol lines: acknowledgments, errors, alarms, status
//! reports, boot banners, build info, settings and parser state.

use super::error_decoder::{decode_alarm, decode_error};
use super::status_parser::is_status_report;
use crate::firmware::{DeviceResponse, FirmwareVersion};

/// GRBL response parser
#[derive(Debug, Default, Clone, Copy)]
pub struct GrblResponseParser;

impl GrblResponseParser {
    /// Create a new GRBL response parser
    pub fn new() -> Self {
        Self
    }

    /// Parse a GRBL response line
    pub fn parse(&self, line: &str) -> DeviceResponse {
        let line = line.trim();

        if line.is_empty() {
            return DeviceResponse::Unknown;
        }

        if line.eq_ignore_ascii_case("ok") {
            return DeviceResponse::Ok;
        }

        if line.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("error")) {
            return DeviceResponse::Error {
                message: Self::error_message(line),
            };
        }

        if line.starts_with("ALARM") {
            return Self::parse_alarm(line);
        }

        if is_status_report(line) {
            return DeviceResponse::Status;
        }

        if line.starts_with("Grbl ") {
            if let Some(version) = FirmwareVersion::parse(line) {
                return DeviceResponse::Welcome(version);
            }
        }

        if line.starts_with('$') && line.contains('=') {
            if let Some(setting) = Self::parse_setting(line) {
                return setting;
            }
        }

        if line.starts_with('[') && line.ends_with(']') {
            return Self::parse_feedback(&line[1..line.len() - 1]);
        }

        DeviceResponse::Message(line.to_string())
    }

    /// Version carried by a boot banner or `[VER:...]` build info line
    pub fn parse_version(&self, line: &str) -> Option<FirmwareVersion> {
        match self.parse(line) {
            DeviceResponse::Welcome(version) | DeviceResponse::Version(version) => Some(version),
            _ => None,
        }
    }

    /// `error:20` decodes the code; legacy `error: Bad number format` keeps the text
    fn error_message(line: &str) -> String {
        let detail = line[5..].trim_start_matches(':').trim();
        match detail.parse::<u32>() {
            Ok(code) => format!("error:{} ({})", code, decode_error(code)),
            Err(_) if detail.is_empty() => "error".to_string(),
            Err(_) => detail.to_string(),
        }
    }

    fn parse_alarm(line: &str) -> DeviceResponse {
        let detail = line["ALARM".len()..].trim_start_matches(':').trim();
        match detail.parse::<u32>() {
            Ok(code) => DeviceResponse::Alarm {
                code,
                description: decode_alarm(code).to_string(),
            },
            Err(_) => DeviceResponse::Alarm {
                code: 0,
                description: detail.to_string(),
            },
        }
    }

    /// Parse a setting response (`$n=value`)
    fn parse_setting(line: &str) -> Option<DeviceResponse> {
        let (key, value) = line.split_once('=')?;
        let number = &key[1..];
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(DeviceResponse::Setting {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }

    /// Bracketed feedback: `[VER:...]`, `[GC:...]`, `[MSG:...]` or the
    /// legacy unprefixed forms
    fn parse_feedback(inner: &str) -> DeviceResponse {
        if let Some(ver) = inner.strip_prefix("VER:") {
            if let Some(version) = FirmwareVersion::parse(ver) {
                return DeviceResponse::Version(version);
            }
        }
        if let Some(state) = inner.strip_prefix("GC:") {
            return DeviceResponse::ParserState(state.trim().to_string());
        }
        if let Some(msg) = inner.strip_prefix("MSG:") {
            return DeviceResponse::Message(msg.trim().to_string());
        }
        if inner.starts_with(|c: char| c.is_ascii_digit()) {
            if let Some(version) = FirmwareVersion::parse(inner) {
                return DeviceResponse::Version(version);
            }
        }
        if inner.starts_with('G') && inner.contains(' ') {
            return DeviceResponse::ParserState(inner.trim().to_string());
        }
        DeviceResponse::Message(inner.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> DeviceResponse {
        GrblResponseParser::new().parse(line)
    }

    #[test]
    fn test_acknowledgments() {
        assert_eq!(parse("ok"), DeviceResponse::Ok);
        assert_eq!(parse("OK\r"), DeviceResponse::Ok);
        match parse("error:20") {
            DeviceResponse::Error { message } => assert!(message.contains("Unsupported")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse("error: Bad number format"),
            DeviceResponse::Error {
                message: "Bad number format".to_string()
            }
        );
    }

    #[test]
    fn test_alarm() {
        match parse("ALARM:1") {
            DeviceResponse::Alarm { code, description } => {
                assert_eq!(code, 1);
                assert!(description.contains("Hard limit"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse("ALARM: Hard/soft limit"),
            DeviceResponse::Alarm { code: 0, .. }
        ));
    }

    #[test]
    fn test_welcome_and_build_info() {
        match parse("Grbl 1.1h ['$' for help]") {
            DeviceResponse::Welcome(v) => {
                assert_eq!(v.number, 1.1);
                assert_eq!(v.letter, Some('h'));
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("[VER:1.1f.20170801:]") {
            DeviceResponse::Version(v) => assert_eq!(v.letter, Some('f')),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse("[0.9j.20160726:]"), DeviceResponse::Version(_)));
        assert!(matches!(parse("[OPT:V,15,128]"), DeviceResponse::Message(_)));
    }

    #[test]
    fn test_settings_and_parser_state() {
        assert_eq!(
            parse("$110=500.000"),
            DeviceResponse::Setting {
                key: "$110".to_string(),
                value: "500.000".to_string()
            }
        );
        assert_eq!(
            parse("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]"),
            DeviceResponse::ParserState("G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0".to_string())
        );
        assert!(matches!(parse("[G0 G54 G17]"), DeviceResponse::ParserState(_)));
        assert!(matches!(parse("$N0="), DeviceResponse::Message(_)));
    }

    #[test]
    fn test_status_detection() {
        assert_eq!(parse("<Idle|MPos:0,0,0>"), DeviceResponse::Status);
        assert_eq!(parse("<Idle,MPos:0,0,0>"), DeviceResponse::Status);
    }
}
