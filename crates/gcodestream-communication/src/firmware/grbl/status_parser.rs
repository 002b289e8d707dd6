//! GRBL status report parsing
//!
//! Handles both report formats:
//! - legacy comma-delimited: `<Idle,MPos:1.000,2.000,3.000,WPos:1.000,2.000,3.000>`
//! - pipe-delimited (1.x): `<Idle|MPos:1.000,2.000,3.000|FS:0,0|WCO:0,0,0|Ov:100,100,100>`
//!
//! Fields a report leaves out are taken from the previous snapshot, so a
//! partial report never fails. Machine and work positions always satisfy
//! `machine = work + wco`.

use gcodestream_core::{
    Accessory, ControllerState, ControllerStatus, OverridePercents, Pin, Position, Units,
};
use std::collections::BTreeSet;

/// Check whether a line looks like a status report
pub fn is_status_report(line: &str) -> bool {
    let line = line.trim();
    line.len() > 2 && line.starts_with('<') && line.ends_with('>')
}

/// Parse a status report of either format
pub fn parse_status(
    line: &str,
    previous: Option<&ControllerStatus>,
    units: Units,
) -> Option<ControllerStatus> {
    let line = line.trim();
    if !is_status_report(line) {
        return None;
    }
    let body = &line[1..line.len() - 1];

    let fields = if body.contains('|') {
        parse_pipe_fields(body, units)
    } else {
        parse_legacy_fields(body, units)
    };
    Some(fields.into_status(previous, units))
}

#[derive(Default)]
struct ReportFields {
    state: String,
    mpos: Option<Position>,
    wpos: Option<Position>,
    wco: Option<Position>,
    overrides: Option<OverridePercents>,
    has_overrides: bool,
    feed: Option<f64>,
    spindle: Option<f64>,
    pins: Option<BTreeSet<Pin>>,
    accessories: Option<BTreeSet<Accessory>>,
}

fn parse_pipe_fields(body: &str, units: Units) -> ReportFields {
    let mut parts = body.split('|');
    let mut fields = ReportFields {
        state: parts.next().unwrap_or_default().trim().to_string(),
        ..ReportFields::default()
    };

    for part in parts {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        match key {
            "MPos" => fields.mpos = Position::parse(value, units),
            "WPos" => fields.wpos = Position::parse(value, units),
            "WCO" => fields.wco = Position::parse(value, units),
            "Ov" => {
                fields.has_overrides = true;
                fields.overrides = OverridePercents::parse(value);
            }
            "F" => fields.feed = value.trim().parse().ok(),
            "FS" => {
                let mut speeds = value.split(',').map(|s| s.trim().parse::<f64>().ok());
                fields.feed = speeds.next().flatten();
                fields.spindle = speeds.next().flatten();
            }
            "Pn" => fields.pins = Some(Pin::parse_set(value)),
            "A" => fields.accessories = Some(Accessory::parse_set(value)),
            _ => {}
        }
    }
    fields
}

fn parse_legacy_fields(body: &str, units: Units) -> ReportFields {
    let state = body.split(',').next().unwrap_or_default().trim().to_string();
    ReportFields {
        state,
        mpos: legacy_position(body, "MPos:", units),
        wpos: legacy_position(body, "WPos:", units),
        wco: legacy_position(body, "WCO:", units),
        ..ReportFields::default()
    }
}

/// Numbers following `prefix` up to the first non-numeric token
fn legacy_position(body: &str, prefix: &str, units: Units) -> Option<Position> {
    let start = body.find(prefix)? + prefix.len();
    let values: Vec<&str> = body[start..]
        .split(',')
        .take_while(|token| token.trim().parse::<f64>().is_ok())
        .collect();
    Position::parse(&values.join(","), units)
}

impl ReportFields {
    fn into_status(self, previous: Option<&ControllerStatus>, units: Units) -> ControllerStatus {
        let wco = self
            .wco
            .or_else(|| previous.map(|p| p.work_coordinate_offset))
            .unwrap_or_else(|| Position::zero(units));

        let (machine_position, work_position) = match (self.mpos, self.wpos) {
            (Some(m), Some(w)) => (m, w),
            (Some(m), None) => {
                let w = m.subtract(&wco);
                (m, w)
            }
            (None, Some(w)) => (w.add(&wco), w),
            (None, None) => {
                let m = previous
                    .map(|p| p.machine_position)
                    .unwrap_or_else(|| Position::zero(units));
                let w = m.subtract(&wco);
                (m, w)
            }
        };

        let overrides = self
            .overrides
            .or_else(|| previous.map(|p| p.overrides))
            .unwrap_or_default();

        let (pins, accessories) = if self.has_overrides {
            (
                self.pins.unwrap_or_default(),
                self.accessories.unwrap_or_default(),
            )
        } else {
            (
                self.pins
                    .or_else(|| previous.map(|p| p.pins.clone()))
                    .unwrap_or_default(),
                self.accessories
                    .or_else(|| previous.map(|p| p.accessories.clone()))
                    .unwrap_or_default(),
            )
        };

        ControllerStatus {
            state: ControllerState::from_report(&self.state),
            state_string: self.state,
            machine_position,
            work_position,
            work_coordinate_offset: wco,
            feed_speed: self.feed,
            spindle_speed: self.spindle,
            overrides,
            pins,
            accessories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_report() {
        let status = parse_status(
            "<Idle,MPos:5.529,0.560,7.000,WPos:1.529,-5.440,-0.000>",
            None,
            Units::MM,
        )
        .unwrap();
        assert_eq!(status.state, ControllerState::Idle);
        assert_eq!(status.machine_position.x, 5.529);
        assert_eq!(status.work_position.y, -5.440);
        assert_eq!(status.overrides, OverridePercents::default());
    }

    #[test]
    fn test_derives_work_position() {
        let status = parse_status("<Idle|MPos:1.0,2.0,3.0|WCO:7.0,8.0,9.0>", None, Units::MM).unwrap();
        assert_eq!(status.work_position.x, -6.0);
        assert_eq!(status.work_position.y, -6.0);
        assert_eq!(status.work_position.z, -6.0);
    }

    #[test]
    fn test_wco_from_previous() {
        let first = parse_status("<Idle|WPos:0,0,0|WCO:1,1,1>", None, Units::MM).unwrap();
        assert_eq!(first.machine_position.x, 1.0);

        let second = parse_status("<Run|WPos:2,2,2|FS:500,0>", Some(&first), Units::MM).unwrap();
        assert_eq!(second.work_coordinate_offset.x, 1.0);
        assert_eq!(second.machine_position.z, 3.0);
        assert_eq!(second.feed_speed, Some(500.0));
        assert_eq!(second.spindle_speed, Some(0.0));
    }

    #[test]
    fn test_override_report_clears_missing_pins() {
        let first = parse_status(
            "<Idle|MPos:0,0,0|Pn:XP|A:SF|Ov:110,100,90>",
            None,
            Units::MM,
        )
        .unwrap();
        assert!(first.pins.contains(&Pin::XLimit));
        assert!(first.accessories.contains(&Accessory::FloodCoolant));
        assert_eq!(first.overrides.feed, 110);

        // No Ov field: pins, accessories and overrides carry over
        let carried = parse_status("<Idle|MPos:0,0,0>", Some(&first), Units::MM).unwrap();
        assert_eq!(carried.pins, first.pins);
        assert_eq!(carried.overrides.spindle, 90);

        // Ov field without Pn/A: both become empty
        let cleared =
            parse_status("<Idle|MPos:0,0,0|Ov:100,100,100>", Some(&first), Units::MM).unwrap();
        assert!(cleared.pins.is_empty());
        assert!(cleared.accessories.is_empty());
    }

    #[test]
    fn test_substate_kept_in_raw_string() {
        let status = parse_status("<Hold:0|MPos:0,0,0>", None, Units::MM).unwrap();
        assert_eq!(status.state, ControllerState::Hold);
        assert_eq!(status.state_string, "Hold:0");
    }

    #[test]
    fn test_rejects_non_reports() {
        assert!(parse_status("ok", None, Units::MM).is_none());
        assert!(parse_status("<>", None, Units::MM).is_none());
    }
}
