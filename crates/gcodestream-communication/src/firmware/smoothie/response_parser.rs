//! Smoothieware response parser
//!
//! Smoothieware mirrors the GRBL acknowledgment and status formats, adds
//! `!!` as its halt marker and reports its build as `Build version: ...`.

use crate::firmware::grbl::status_parser::is_status_report;
use crate::firmware::{DeviceResponse, FirmwareVersion};

const BUILD_VERSION_PREFIX: &str = "Build version:";

/// Classify a Smoothieware response line
pub fn classify(line: &str) -> DeviceResponse {
    let line = line.trim();

    if line.is_empty() {
        return DeviceResponse::Unknown;
    }

    if line.eq_ignore_ascii_case("ok") {
        return DeviceResponse::Ok;
    }

    if let Some(detail) = line.strip_prefix("Error:") {
        return DeviceResponse::Error {
            message: detail.trim().to_string(),
        };
    }
    if line.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("error")) {
        return DeviceResponse::Error {
            message: line.to_string(),
        };
    }

    if line.starts_with("!!") || line.starts_with("ALARM") {
        return DeviceResponse::Alarm {
            code: 0,
            description: line.trim_start_matches("!!").trim().to_string(),
        };
    }

    if is_status_report(line) {
        return DeviceResponse::Status;
    }

    if line.starts_with(BUILD_VERSION_PREFIX) {
        return DeviceResponse::Version(build_version(line));
    }

    if line.to_ascii_lowercase().contains("smoothie") {
        return DeviceResponse::Ready;
    }

    if line.starts_with('[') && line.ends_with(']') {
        let inner = &line[1..line.len() - 1];
        return DeviceResponse::ParserState(inner.trim_start_matches("GC:").trim().to_string());
    }

    DeviceResponse::Message(line.to_string())
}

/// Build strings are often git tags such as `edge-94de12c`; those carry
/// no number and resolve as version 0.0.
fn build_version(line: &str) -> FirmwareVersion {
    let detail = line[BUILD_VERSION_PREFIX.len()..].trim();
    FirmwareVersion::parse(detail).unwrap_or_else(|| FirmwareVersion {
        raw: line.to_string(),
        ..FirmwareVersion::new(0.0, None)
    })
}

/// Version carried by a `Build version:` line
pub fn parse_version(line: &str) -> Option<FirmwareVersion> {
    match classify(line) {
        DeviceResponse::Version(version) => Some(version),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgments() {
        assert_eq!(classify("ok"), DeviceResponse::Ok);
        assert_eq!(
            classify("Error: Unknown command"),
            DeviceResponse::Error {
                message: "Unknown command".to_string()
            }
        );
        assert!(matches!(classify("error:2"), DeviceResponse::Error { .. }));
    }

    #[test]
    fn test_halt_markers() {
        match classify("!! Halted") {
            DeviceResponse::Alarm { description, .. } => assert_eq!(description, "Halted"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(classify("ALARM: Hard limit"), DeviceResponse::Alarm { .. }));
    }

    #[test]
    fn test_banner_and_version() {
        assert_eq!(classify("Smoothie"), DeviceResponse::Ready);
        assert_eq!(classify("smoothie ready"), DeviceResponse::Ready);

        let v = parse_version("Build version: edge-94de12c, Build date: Oct 28 2014").unwrap();
        assert_eq!(v.number, 0.0);
        assert!(v.raw.starts_with("Build version:"));

        let v = parse_version("Build version: 1.1, Build date: Jan 1 2020").unwrap();
        assert_eq!(v.number, 1.1);
    }

    #[test]
    fn test_status_and_parser_state() {
        assert_eq!(classify("<Idle,MPos:0,0,0,WPos:0,0,0>"), DeviceResponse::Status);
        assert_eq!(
            classify("[G0 G54 G17 G21 G90 G94 M0 M5 M9 T1 F4000.0000 S0.8000]"),
            DeviceResponse::ParserState("G0 G54 G17 G21 G90 G94 M0 M5 M9 T1 F4000.0000 S0.8000".to_string())
        );
        assert!(matches!(classify("echo: hello"), DeviceResponse::Message(_)));
    }
}
