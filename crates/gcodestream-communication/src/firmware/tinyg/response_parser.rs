//! TinyG Response Parser
//!
//! TinyG speaks JSON. Acknowledgments arrive as `{"r":{...},"f":[1,status,..]}`
//! where a non-zero status is an error, status reports as `{"sr":{...}}`
//! or nested under `r`, and the version as `{"r":{"fv":0.97}}`.

use crate::firmware::{DeviceResponse, FirmwareVersion};
use gcodestream_core::{ControllerState, ControllerStatus, Units};
use serde_json::{Map, Value};

const FIELD_RESPONSE: &str = "r";
const FIELD_FOOTER: &str = "f";
const FIELD_STATUS_REPORT: &str = "sr";
const FIELD_FIRMWARE_VERSION: &str = "fv";
const READY_MESSAGE: &str = "SYSTEM READY";

/// Parse a line as a JSON object
pub fn parse_object(line: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Classify a TinyG response line
pub fn classify(line: &str) -> DeviceResponse {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return DeviceResponse::Unknown;
    }

    let Some(obj) = parse_object(trimmed) else {
        return DeviceResponse::Message(trimmed.to_string());
    };

    if let Some(response) = obj.get(FIELD_RESPONSE).and_then(Value::as_object) {
        if response.get("msg").and_then(Value::as_str) == Some(READY_MESSAGE) {
            let version = version_from_response(response, trimmed)
                .unwrap_or_else(|| FirmwareVersion::new(0.0, None));
            return DeviceResponse::Welcome(version);
        }

        return match footer_status(&obj) {
            Some(0) | None => DeviceResponse::Ok,
            Some(code) => DeviceResponse::Error {
                message: match response.get("msg").and_then(Value::as_str) {
                    Some(msg) => format!("TinyG status {}: {}", code, msg),
                    None => format!("TinyG status {}", code),
                },
            },
        };
    }

    if obj.get(FIELD_STATUS_REPORT).is_some_and(Value::is_object) {
        return DeviceResponse::Status;
    }

    if let Some(er) = obj.get("er").and_then(Value::as_object) {
        let msg = er.get("msg").and_then(Value::as_str).unwrap_or("exception");
        return DeviceResponse::Message(msg.to_string());
    }

    DeviceResponse::Unknown
}

/// Status code from the footer array, `f[1]`
fn footer_status(obj: &Map<String, Value>) -> Option<u64> {
    obj.get(FIELD_FOOTER)?.as_array()?.get(1)?.as_u64()
}

fn version_from_response(response: &Map<String, Value>, raw: &str) -> Option<FirmwareVersion> {
    let number = response.get(FIELD_FIRMWARE_VERSION)?.as_f64()?;
    Some(FirmwareVersion {
        number,
        letter: None,
        raw: raw.to_string(),
    })
}

/// Version carried by a `{"r":{"fv":...}}` response
pub fn parse_version(line: &str) -> Option<FirmwareVersion> {
    let obj = parse_object(line)?;
    let response = obj.get(FIELD_RESPONSE)?.as_object()?;
    version_from_response(response, line.trim())
}

/// Map a TinyG `stat` code to a controller state
pub fn state_from_code(code: u64) -> ControllerState {
    match code {
        1 | 3 | 4 => ControllerState::Idle,
        2 | 13 => ControllerState::Alarm,
        5 => ControllerState::Run,
        6 => ControllerState::Hold,
        9 => ControllerState::Home,
        10 => ControllerState::Jog,
        _ => ControllerState::Unknown,
    }
}

/// Apply a status report to the previous snapshot
///
/// Reports are incremental; absent fields keep their previous values. The
/// work coordinate offset is recomputed so `machine = work + wco` holds.
pub fn parse_status(
    line: &str,
    previous: Option<&ControllerStatus>,
    units: Units,
) -> Option<ControllerStatus> {
    let obj = parse_object(line)?;
    let report = match obj.get(FIELD_STATUS_REPORT).and_then(Value::as_object) {
        Some(sr) => sr,
        None => obj
            .get(FIELD_RESPONSE)?
            .get(FIELD_STATUS_REPORT)?
            .as_object()?,
    };

    let mut status = previous
        .cloned()
        .unwrap_or_else(|| ControllerStatus::with_state(ControllerState::Unknown, units));

    let number = |key: &str| report.get(key).and_then(Value::as_f64);

    if let Some(unit) = report.get("unit").and_then(Value::as_u64) {
        let units = if unit == 1 { Units::MM } else { Units::INCH };
        status.work_position.units = units;
    }

    let work = &mut status.work_position;
    if let Some(x) = number("posx") {
        work.x = x;
    }
    if let Some(y) = number("posy") {
        work.y = y;
    }
    if let Some(z) = number("posz") {
        work.z = z;
    }
    if let Some(a) = number("posa") {
        work.a = Some(a);
    }

    // Machine coordinates are always reported in millimeters
    let machine = &mut status.machine_position;
    machine.units = Units::MM;
    if let Some(x) = number("mpox") {
        machine.x = x;
    }
    if let Some(y) = number("mpoy") {
        machine.y = y;
    }
    if let Some(z) = number("mpoz") {
        machine.z = z;
    }
    if let Some(a) = number("mpoa") {
        machine.a = Some(a);
    }

    let percent = |ratio: f64| (ratio * 100.0).round() as u16;
    if let Some(mfo) = number("mfo") {
        status.overrides.feed = percent(mfo);
    }
    if let Some(sso) = number("sso") {
        status.overrides.spindle = percent(sso);
    }
    if let Some(mto) = number("mto") {
        status.overrides.rapid = percent(mto);
    }

    if let Some(vel) = number("vel") {
        status.feed_speed = Some(vel);
    }

    if let Some(code) = report.get("stat").and_then(Value::as_u64) {
        status.state = state_from_code(code);
        status.state_string = status.state.to_string();
    }

    status.work_coordinate_offset = status.machine_position.subtract(&status.work_position);
    Some(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_acknowledgments() {
        assert_eq!(
            classify(r#"{"r":{"gc":"G0X1"},"f":[1,0,5,1234]}"#),
            DeviceResponse::Ok
        );
        match classify(r#"{"r":{"msg":"Unrecognized command"},"f":[1,108,4,0]}"#) {
            DeviceResponse::Error { message } => assert!(message.contains("108")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_ready_and_status() {
        match classify(r#"{"r":{"fv":0.970,"fb":440.20,"msg":"SYSTEM READY"},"f":[1,0,0]}"#) {
            DeviceResponse::Welcome(v) => assert_eq!(v.number, 0.97),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            classify(r#"{"sr":{"posx":1.0,"stat":5}}"#),
            DeviceResponse::Status
        );
        assert!(matches!(classify("tinyg [mm] ok>"), DeviceResponse::Message(_)));
    }

    #[test]
    fn test_parse_version() {
        let v = parse_version(r#"{"r":{"fv":0.97},"f":[1,0,8]}"#).unwrap();
        assert_eq!(v.number, 0.97);
        assert!(parse_version(r#"{"sr":{"stat":1}}"#).is_none());
    }

    #[test]
    fn test_parse_status_incremental() {
        let first = parse_status(
            r#"{"sr":{"posx":1.0,"posy":2.0,"posz":3.0,"mpox":11.0,"mpoy":12.0,"mpoz":13.0,"vel":500,"stat":5,"unit":1,"mfo":1.2,"sso":0.9,"mto":1.0}}"#,
            None,
            Units::MM,
        )
        .unwrap();
        assert_eq!(first.state, ControllerState::Run);
        assert_eq!(first.work_position.x, 1.0);
        assert_eq!(first.machine_position.z, 13.0);
        assert_eq!(first.work_coordinate_offset.x, 10.0);
        assert_eq!(first.overrides.feed, 120);
        assert_eq!(first.overrides.spindle, 90);
        assert_eq!(first.feed_speed, Some(500.0));

        let second = parse_status(r#"{"r":{"sr":{"posx":4.0,"stat":3}},"f":[1,0,9]}"#, Some(&first), Units::MM)
            .unwrap();
        assert_eq!(second.state, ControllerState::Idle);
        assert_eq!(second.work_position.x, 4.0);
        assert_eq!(second.work_position.y, 2.0);
        assert_eq!(second.overrides.feed, 120);
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(state_from_code(0), ControllerState::Unknown);
        assert_eq!(state_from_code(2), ControllerState::Alarm);
        assert_eq!(state_from_code(6), ControllerState::Hold);
        assert_eq!(state_from_code(9), ControllerState::Home);
        assert_eq!(state_from_code(10), ControllerState::Jog);
        assert_eq!(state_from_code(11), ControllerState::Unknown);
        assert_eq!(state_from_code(13), ControllerState::Alarm);
    }
}
