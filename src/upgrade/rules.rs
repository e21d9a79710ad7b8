//! Per-rule decoders for device report payloads
//!
//! The printer multiplexes live progress, the version banner and the upgrade
//! history onto one report topic. Each decoder looks for exactly one of those
//! shapes and returns `None` when its keys are missing or mistyped, so one
//! malformed section never hides the others.

use crate::protocol::{
    ManagerSnapshot, UpdateProgress, UpgradeState, UpgradeStatus, PROBE_SEQUENCE_ID,
    UNKNOWN_VERSION,
};
use serde_json::{Map, Value};

/// Progress sections with this many top-level keys or more are full status dumps
const MAX_PROGRESS_FIELDS: usize = 5;

const PROGRESS_FIELDS: [&str; 4] = ["progress", "status", "message", "module"];

/// `print.upgrade_state`
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSection {
    /// First entry of `new_ver_list` when it names a different version
    pub candidate: Option<UpgradeState>,
    /// Present only when the section passes the progress-report shape check
    pub progress: Option<UpdateProgress>,
}

/// `upgrade` section answering the history probe
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerReport {
    pub snapshot: Option<ManagerSnapshot>,
    /// `result == "success"`: the device accepted an upgrade and is running it
    pub upgrade_started: bool,
}

/// Decode the live progress section, if the payload carries one
pub fn decode_progress(payload: &Value) -> Option<ProgressSection> {
    let section = payload.get("print")?.get("upgrade_state")?.as_object()?;

    let candidate = section
        .get("new_ver_list")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(decode_candidate);

    let progress = if is_progress_report(section) {
        Some(UpdateProgress {
            progress_percent: section.get("progress").and_then(parse_percent),
            status: section
                .get("status")
                .and_then(Value::as_str)
                .map(|s| UpgradeStatus::from(s.to_string())),
            message: section
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            module_name: section
                .get("module")
                .and_then(Value::as_str)
                .map(str::to_string),
            section: section.clone(),
        })
    } else {
        None
    };

    Some(ProgressSection {
        candidate,
        progress,
    })
}

fn decode_candidate(entry: &Value) -> Option<UpgradeState> {
    let current = entry.get("cur_ver")?.as_str()?;
    let target = entry.get("new_ver")?.as_str()?;
    if target.is_empty() || target == current {
        return None;
    }
    Some(UpgradeState::new(current, target))
}

fn is_progress_report(section: &Map<String, Value>) -> bool {
    section.len() < MAX_PROGRESS_FIELDS && PROGRESS_FIELDS.iter().any(|key| section.contains_key(*key))
}

/// Progress arrives as a number or a numeric string depending on firmware
pub fn parse_percent(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.clamp(0.0, 100.0).round() as u8)
}

/// Decode the version banner answering the info probe
pub fn decode_version_banner(payload: &Value) -> Option<UpgradeState> {
    let info = payload.get("info")?;
    if !is_probe_reply(info) {
        return None;
    }
    let version = info.get("module")?.as_array()?.first()?.get("sw_ver")?.as_str()?;
    Some(UpgradeState::new(version, UNKNOWN_VERSION))
}

/// Decode the upgrade manager section answering the history probe
pub fn decode_manager(payload: &Value) -> Option<ManagerReport> {
    let upgrade = payload.get("upgrade")?;
    if !is_probe_reply(upgrade) {
        return None;
    }
    Some(ManagerReport {
        snapshot: upgrade
            .get("firmware_optional")
            .filter(|v| !v.is_null())
            .cloned()
            .map(ManagerSnapshot),
        upgrade_started: upgrade.get("result").and_then(Value::as_str) == Some("success"),
    })
}

fn is_probe_reply(section: &Value) -> bool {
    section.get("sequence_id").and_then(Value::as_str) == Some(PROBE_SEQUENCE_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_section_with_candidate() {
        let payload = json!({"print": {"upgrade_state": {
            "status": "DOWNLOADING",
            "progress": "12",
            "new_ver_list": [{"name": "ota", "cur_ver": "01.05.00.00", "new_ver": "01.06.00.00"}]
        }}});
        let section = decode_progress(&payload).unwrap();
        assert_eq!(
            section.candidate,
            Some(UpgradeState::new("01.05.00.00", "01.06.00.00"))
        );
        let progress = section.progress.unwrap();
        assert_eq!(progress.progress_percent, Some(12));
        assert_eq!(progress.status, Some(UpgradeStatus::Downloading));
    }

    #[test]
    fn test_progress_section_is_kept_verbatim() {
        let payload = json!({"print": {"upgrade_state": {
            "progress": "0", "message": {"code": 3}, "module": 2
        }}});
        let progress = decode_progress(&payload).unwrap().progress.unwrap();
        assert_eq!(progress.progress_percent, Some(0));
        assert_eq!(progress.message, None);
        assert_eq!(progress.module_name, None);
        assert_eq!(
            Value::Object(progress.section),
            json!({"progress": "0", "message": {"code": 3}, "module": 2})
        );

        let numeric = json!({"print": {"upgrade_state": {"progress": 0}}});
        let progress = decode_progress(&numeric).unwrap().progress.unwrap();
        assert_eq!(progress.section["progress"], json!(0));
    }

    #[test]
    fn test_candidate_equal_to_current_is_ignored() {
        let payload = json!({"print": {"upgrade_state": {
            "new_ver_list": [{"cur_ver": "01.06.00.00", "new_ver": "01.06.00.00"}]
        }}});
        let section = decode_progress(&payload).unwrap();
        assert_eq!(section.candidate, None);
        assert_eq!(section.progress, None);
    }

    #[test]
    fn test_full_status_dump_is_not_a_progress_report() {
        let payload = json!({"print": {"upgrade_state": {
            "sequence_id": 1, "progress": "0", "status": "IDLE", "message": "",
            "module": "ota", "consistency_request": false
        }}});
        assert_eq!(decode_progress(&payload).unwrap().progress, None);
    }

    #[test]
    fn test_section_without_progress_keys_is_not_a_report() {
        let payload = json!({"print": {"upgrade_state": {"idx": 3}}});
        assert_eq!(decode_progress(&payload).unwrap().progress, None);
    }

    #[test]
    fn test_non_object_progress_section_is_skipped() {
        assert_eq!(decode_progress(&json!({"print": {"upgrade_state": "busy"}})), None);
        assert_eq!(decode_progress(&json!({"print": {}})), None);
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent(&json!(42)), Some(42));
        assert_eq!(parse_percent(&json!("7")), Some(7));
        assert_eq!(parse_percent(&json!(" 99 ")), Some(99));
        assert_eq!(parse_percent(&json!(150)), Some(100));
        assert_eq!(parse_percent(&json!(-3)), Some(0));
        assert_eq!(parse_percent(&json!(33.6)), Some(34));
        assert_eq!(parse_percent(&json!("n/a")), None);
        assert_eq!(parse_percent(&json!(null)), None);
    }

    #[test]
    fn test_version_banner_requires_probe_sequence() {
        let payload = json!({"info": {"sequence_id": "0", "module": [{"name": "ota", "sw_ver": "1.2.3"}]}});
        assert_eq!(
            decode_version_banner(&payload),
            Some(UpgradeState::new("1.2.3", "-"))
        );

        let other = json!({"info": {"sequence_id": "20", "module": [{"sw_ver": "1.2.3"}]}});
        assert_eq!(decode_version_banner(&other), None);

        let numeric = json!({"info": {"sequence_id": 0, "module": [{"sw_ver": "1.2.3"}]}});
        assert_eq!(decode_version_banner(&numeric), None);
    }

    #[test]
    fn test_version_banner_with_empty_module_list_is_skipped() {
        let payload = json!({"info": {"sequence_id": "0", "module": []}});
        assert_eq!(decode_version_banner(&payload), None);
    }

    #[test]
    fn test_manager_report() {
        let firmware = json!({"firmware": {"version": "01.07.00.00"}, "ams": []});
        let payload = json!({"upgrade": {
            "sequence_id": "0", "command": "get_history", "result": "success",
            "firmware_optional": firmware
        }});
        let report = decode_manager(&payload).unwrap();
        assert_eq!(report.snapshot, Some(ManagerSnapshot(firmware)));
        assert!(report.upgrade_started);
    }

    #[test]
    fn test_manager_report_without_firmware() {
        let payload = json!({"upgrade": {"sequence_id": "0", "result": "fail"}});
        let report = decode_manager(&payload).unwrap();
        assert_eq!(report.snapshot, None);
        assert!(!report.upgrade_started);
    }
}
