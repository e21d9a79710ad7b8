//! Wire protocol types for both sides of the relay
//!
//! - [`device`] - printer identifiers, report payloads and request commands
//! - [`client`] - messages received from browser clients
//! - [`events`] - normalized events and the server-to-browser wire form
//! - [`validation`] - boundary checks applied to connect requests

pub mod client;
pub mod device;
pub mod events;
pub mod validation;

pub use client::{ClientMessage, ConnectRequest, CoordinatesRequest, CredentialsRequest};
pub use device::{DeviceCommand, DeviceFamily, DeviceId, ReportMessage, PROBE_SEQUENCE_ID};
pub use events::{
    ManagerSnapshot, NormalizedEvent, ServerEvent, UpdateProgress, UpgradeState, UpgradeStatus,
    UNKNOWN_VERSION,
};
pub use validation::{validate_connect, Field, ValidationError};
