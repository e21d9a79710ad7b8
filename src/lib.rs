//! Printer Relay
//!
//! Bridges a 3D printer's MQTT broker and a set of browser clients: keeps one
//! durable broker session per printer, classifies the printer's report payloads
//! into a small set of firmware-upgrade events, and fans those events out to
//! every attached WebSocket client.
//!
//! # Overview
//!
//! - [`transport`] - the Device Link, one rumqttc session per printer
//! - [`upgrade`] - the Upgrade State Machine classifying report payloads
//! - [`broadcast`] - the Client Broadcaster
//! - [`session`] - the Session Manager binding connect requests to links
//! - [`cloud`] - account sign-in and firmware manifest collaborators
//! - [`server`] - warp WebSocket, health and metrics endpoints
//!
//! # Quick Start
//!
//! ```rust
//! use printer_relay::protocol::NormalizedEvent;
//! use printer_relay::upgrade::UpgradeTracker;
//! use serde_json::json;
//!
//! let mut tracker = UpgradeTracker::new();
//! let events = tracker.classify_value(&json!({
//!     "info": {"sequence_id": "0", "module": [{"sw_ver": "01.07.00.00"}]}
//! }));
//!
//! assert!(matches!(events.as_slice(), [NormalizedEvent::UpgradeStateAnnounced(_)]));
//! ```

pub mod broadcast;
pub mod cloud;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod session;
pub mod testing;
pub mod transport;
pub mod upgrade;

pub use broadcast::{Broadcaster, ClientId};
pub use config::*;
pub use error::{RelayError, RelayResult};
pub use protocol::*;
pub use session::{ConnectOutcome, SessionManager};
pub use transport::{DeviceSession, DeviceTransport, LinkConnector, LinkStatus, MqttConnector};
pub use upgrade::UpgradeTracker;
