//! Device-side protocol types
//!
//! Identifiers, report payloads and request commands exchanged with the printer
//! over its `device/{id}/report` and `device/{id}/request` topics.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Printer serial number used as the device identifier on every topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a serial number. Boundary validation lives in [`crate::protocol::validation`].
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hardware family derived from the three-character serial prefix
    pub fn family(&self) -> Option<DeviceFamily> {
        DeviceFamily::from_serial(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Printer families that have a slot in the published firmware manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Serial prefix `01S`
    X1,
    /// Serial prefix `01P`
    P1P,
    /// Serial prefix `030`
    A1Mini,
    /// Serial prefix `039`
    A1,
}

impl DeviceFamily {
    pub fn from_serial(serial: &str) -> Option<Self> {
        match serial.get(..3)? {
            "01S" => Some(Self::X1),
            "01P" => Some(Self::P1P),
            "030" => Some(Self::A1Mini),
            "039" => Some(Self::A1),
            _ => None,
        }
    }

    /// Index of this family's entry in the manifest array
    pub fn manifest_slot(self) -> usize {
        match self {
            Self::X1 => 0,
            Self::P1P => 1,
            Self::A1Mini => 2,
            Self::A1 => 3,
        }
    }
}

/// Raw payload received on a device report topic
///
/// Opaque until classified; never retained past classification.
#[derive(Debug, Clone)]
pub struct ReportMessage {
    pub device_id: DeviceId,
    pub payload: Bytes,
}

impl ReportMessage {
    pub fn new(device_id: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self {
            device_id,
            payload: payload.into(),
        }
    }

    /// Parse the payload as JSON
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Commands published to a device request topic
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Full-state refresh, version info and upgrade history requests
    Probe,
    /// Firmware descriptor forwarded verbatim to the device
    ApplyUpgrade { manifest_entry: Value },
}

/// Sequence id embedded in every probe request; the device echoes it back
pub const PROBE_SEQUENCE_ID: &str = "0";

impl DeviceCommand {
    /// Serialized request payloads in publish order
    pub fn payloads(&self) -> Result<Vec<Vec<u8>>, serde_json::Error> {
        match self {
            DeviceCommand::Probe => probe_requests().iter().map(serde_json::to_vec).collect(),
            DeviceCommand::ApplyUpgrade { manifest_entry } => {
                Ok(vec![serde_json::to_vec(manifest_entry)?])
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::Probe => "probe",
            DeviceCommand::ApplyUpgrade { .. } => "apply_upgrade",
        }
    }
}

/// The three probe requests sent after every successful broker handshake
pub fn probe_requests() -> [Value; 3] {
    [
        json!({
            "pushing": {
                "sequence_id": PROBE_SEQUENCE_ID,
                "command": "pushall",
                "version": 1,
                "push_target": 1
            }
        }),
        json!({
            "info": {
                "sequence_id": PROBE_SEQUENCE_ID,
                "command": "get_version"
            }
        }),
        json!({
            "upgrade": {
                "sequence_id": PROBE_SEQUENCE_ID,
                "command": "get_history"
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_serial_prefix() {
        assert_eq!(DeviceFamily::from_serial("01S00A123456789"), Some(DeviceFamily::X1));
        assert_eq!(DeviceFamily::from_serial("01P00A123456789"), Some(DeviceFamily::P1P));
        assert_eq!(DeviceFamily::from_serial("03000A123456789"), Some(DeviceFamily::A1Mini));
        assert_eq!(DeviceFamily::from_serial("03900A123456789"), Some(DeviceFamily::A1));
        assert_eq!(DeviceFamily::from_serial("00M00A123456789"), None);
        assert_eq!(DeviceFamily::from_serial("01"), None);
    }

    #[test]
    fn test_manifest_slots_are_distinct() {
        let slots = [
            DeviceFamily::X1.manifest_slot(),
            DeviceFamily::P1P.manifest_slot(),
            DeviceFamily::A1Mini.manifest_slot(),
            DeviceFamily::A1.manifest_slot(),
        ];
        assert_eq!(slots, [0, 1, 2, 3]);
    }

    #[test]
    fn test_probe_payloads_in_order() {
        let payloads = DeviceCommand::Probe.payloads().unwrap();
        assert_eq!(payloads.len(), 3);

        let parsed: Vec<Value> = payloads
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect();
        assert_eq!(parsed[0]["pushing"]["command"], "pushall");
        assert_eq!(parsed[1]["info"]["command"], "get_version");
        assert_eq!(parsed[2]["upgrade"]["command"], "get_history");
        for request in &parsed {
            let section = request.as_object().unwrap().values().next().unwrap();
            assert_eq!(section["sequence_id"], "0");
        }
    }

    #[test]
    fn test_apply_upgrade_is_forwarded_verbatim() {
        let entry = json!({"upgrade": {"command": "upgrade_confirm", "url": "https://x/y.sig"}});
        let command = DeviceCommand::ApplyUpgrade {
            manifest_entry: entry.clone(),
        };
        let payloads = command.payloads().unwrap();
        assert_eq!(payloads.len(), 1);
        let parsed: Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_report_message_json() {
        let report = ReportMessage::new(DeviceId::new("01S"), &b"{\"a\":1}"[..]);
        assert_eq!(report.json().unwrap()["a"], 1);

        let bad = ReportMessage::new(DeviceId::new("01S"), &b"not json"[..]);
        assert!(bad.json().is_err());
    }
}
