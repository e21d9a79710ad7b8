//! Upgrade State Machine
//!
//! Classifies raw report payloads into [`NormalizedEvent`]s. Three rules run
//! independently and in a fixed order on every payload:
//!
//! 1. live progress (`print.upgrade_state`), preceded by a candidate-version
//!    announcement taken from its `new_ver_list`
//! 2. the version banner (`info` answering the probe)
//! 3. the upgrade manager snapshot (`upgrade` answering the probe)
//!
//! The only state carried between payloads is whether an upgrade is running,
//! which suppresses rule 1's announcement until the device reports success.

pub mod rules;

use crate::observability::metrics;
use crate::protocol::{NormalizedEvent, ReportMessage};
use serde_json::Value;
use tracing::{debug, trace};

/// Per-device classifier state
#[derive(Debug, Clone, Default)]
pub struct UpgradeTracker {
    upgrade_in_progress: bool,
}

impl UpgradeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade_in_progress(&self) -> bool {
        self.upgrade_in_progress
    }

    /// Classify one report; unparseable payloads yield no events
    pub fn classify(&mut self, report: &ReportMessage) -> Vec<NormalizedEvent> {
        match report.json() {
            Ok(payload) => self.classify_value(&payload),
            Err(e) => {
                metrics().report_malformed();
                debug!(device_id = %report.device_id, error = %e, "Dropping malformed report");
                Vec::new()
            }
        }
    }

    /// Classify an already-parsed payload
    pub fn classify_value(&mut self, payload: &Value) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();

        if let Some(section) = rules::decode_progress(payload) {
            if let Some(candidate) = section.candidate {
                if !self.upgrade_in_progress {
                    events.push(NormalizedEvent::UpgradeStateAnnounced(candidate));
                }
            }
            if let Some(progress) = section.progress {
                if progress
                    .status
                    .as_ref()
                    .is_some_and(|status| status.is_terminal_success())
                {
                    self.upgrade_in_progress = false;
                }
                events.push(NormalizedEvent::ProgressUpdated(progress));
            }
        }

        if let Some(banner) = rules::decode_version_banner(payload) {
            events.push(NormalizedEvent::UpgradeStateAnnounced(banner));
        }

        if let Some(manager) = rules::decode_manager(payload) {
            if let Some(snapshot) = manager.snapshot {
                events.push(NormalizedEvent::ManagerSnapshotReceived(snapshot));
            }
            if manager.upgrade_started {
                self.upgrade_in_progress = true;
            }
        }

        if events.is_empty() {
            trace!("Report matched no rule");
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeviceId, UpgradeState, UpgradeStatus};
    use proptest::prelude::*;
    use serde_json::json;

    fn kinds(events: &[NormalizedEvent]) -> Vec<&'static str> {
        events.iter().map(NormalizedEvent::kind).collect()
    }

    #[test]
    fn test_version_banner_scenario() {
        let mut tracker = UpgradeTracker::new();
        let events = tracker.classify_value(&json!({
            "info": {"sequence_id": "0", "module": [{"sw_ver": "1.2.3"}]}
        }));
        assert_eq!(
            events,
            vec![NormalizedEvent::UpgradeStateAnnounced(UpgradeState::new("1.2.3", "-"))]
        );
    }

    #[test]
    fn test_unparseable_report_yields_nothing() {
        let mut tracker = UpgradeTracker::new();
        let report = ReportMessage::new(DeviceId::new("01S00A123456789"), &b"{not json"[..]);
        assert!(tracker.classify(&report).is_empty());
    }

    #[test]
    fn test_rules_run_in_fixed_order() {
        let mut tracker = UpgradeTracker::new();
        let events = tracker.classify_value(&json!({
            "upgrade": {"sequence_id": "0", "firmware_optional": {"firmware": {"version": "2"}}},
            "info": {"sequence_id": "0", "module": [{"sw_ver": "1"}]},
            "print": {"upgrade_state": {
                "status": "FLASHING",
                "new_ver_list": [{"cur_ver": "1", "new_ver": "2"}]
            }}
        }));
        assert_eq!(
            kinds(&events),
            vec!["upgrade_state", "updating_state", "upgrade_state", "upgrade_manager"]
        );
    }

    #[test]
    fn test_progress_is_relayed_before_banner_in_same_payload() {
        let mut tracker = UpgradeTracker::new();
        let events = tracker.classify_value(&json!({
            "info": {"sequence_id": "0", "module": [{"sw_ver": "01.06.00.00"}]},
            "print": {"upgrade_state": {"status": "DOWNLOADING", "progress": "5"}}
        }));
        assert_eq!(kinds(&events), vec!["updating_state", "upgrade_state"]);
        assert_eq!(
            events[1],
            NormalizedEvent::UpgradeStateAnnounced(UpgradeState::new("01.06.00.00", "-"))
        );
    }

    #[test]
    fn test_malformed_section_does_not_block_others() {
        let mut tracker = UpgradeTracker::new();
        let events = tracker.classify_value(&json!({
            "print": {"upgrade_state": 17},
            "info": {"sequence_id": "0", "module": "not-a-list"},
            "upgrade": {"sequence_id": "0", "firmware_optional": {"ams": []}}
        }));
        assert_eq!(kinds(&events), vec!["upgrade_manager"]);
    }

    #[test]
    fn test_running_upgrade_suppresses_announcement_until_success() {
        let mut tracker = UpgradeTracker::new();
        let candidate = json!({"print": {"upgrade_state": {
            "new_ver_list": [{"cur_ver": "1", "new_ver": "2"}]
        }}});

        assert_eq!(kinds(&tracker.classify_value(&candidate)), vec!["upgrade_state"]);

        tracker.classify_value(&json!({"upgrade": {"sequence_id": "0", "result": "success"}}));
        assert!(tracker.upgrade_in_progress());
        assert!(tracker.classify_value(&candidate).is_empty());

        let done = tracker.classify_value(&json!({"print": {"upgrade_state": {
            "status": "UPGRADE_SUCCESS", "progress": 100
        }}}));
        match done.as_slice() {
            [NormalizedEvent::ProgressUpdated(progress)] => {
                assert_eq!(progress.status, Some(UpgradeStatus::Success));
                assert_eq!(progress.progress_percent, Some(100));
            }
            other => panic!("Expected one progress event, got {other:?}"),
        }
        assert!(!tracker.upgrade_in_progress());
        assert_eq!(kinds(&tracker.classify_value(&candidate)), vec!["upgrade_state"]);
    }

    #[test]
    fn test_success_inside_status_dump_does_not_clear_flag() {
        let mut tracker = UpgradeTracker::new();
        tracker.classify_value(&json!({"upgrade": {"sequence_id": "0", "result": "success"}}));
        tracker.classify_value(&json!({"print": {"upgrade_state": {
            "status": "UPGRADE_SUCCESS", "progress": 100, "message": "", "module": "ota", "idx": 1
        }}}));
        assert!(tracker.upgrade_in_progress());
    }

    fn unrecognized_payload() -> impl Strategy<Value = Value> {
        let key = "[a-z_]{1,12}".prop_filter("recognized key", |k| {
            !matches!(k.as_str(), "print" | "info" | "upgrade")
        });
        proptest::collection::hash_map(key, any::<i64>(), 0..6).prop_map(|map| {
            Value::Object(map.into_iter().map(|(k, v)| (k, json!(v))).collect())
        })
    }

    proptest! {
        #[test]
        fn payloads_without_recognized_keys_yield_nothing(payload in unrecognized_payload()) {
            let mut tracker = UpgradeTracker::new();
            prop_assert!(tracker.classify_value(&payload).is_empty());
        }

        #[test]
        fn upgrade_success_always_clears_flag(progress in 0u8..=100, started in any::<bool>()) {
            let mut tracker = UpgradeTracker::new();
            if started {
                tracker.classify_value(&json!({"upgrade": {"sequence_id": "0", "result": "success"}}));
            }
            tracker.classify_value(&json!({"print": {"upgrade_state": {
                "status": "UPGRADE_SUCCESS", "progress": progress
            }}}));
            prop_assert!(!tracker.upgrade_in_progress());
        }

        #[test]
        fn candidate_announcement_precedes_progress_and_banner(
            current in "[0-9]{2}\\.[0-9]{2}",
            target in "[0-9]{2}\\.[0-9]{2}",
            percent in 0u8..=100,
        ) {
            prop_assume!(current != target);
            let mut tracker = UpgradeTracker::new();
            let events = tracker.classify_value(&json!({
                "info": {"sequence_id": "0", "module": [{"sw_ver": current.clone()}]},
                "print": {"upgrade_state": {
                    "progress": percent,
                    "new_ver_list": [{"cur_ver": current.clone(), "new_ver": target.clone()}]
                }}
            }));
            prop_assert_eq!(kinds(&events), vec!["upgrade_state", "updating_state", "upgrade_state"]);
            prop_assert_eq!(
                &events[0],
                &NormalizedEvent::UpgradeStateAnnounced(UpgradeState::new(current, target))
            );
        }
    }
}
