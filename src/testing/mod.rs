//! Testing utilities and mock implementations
//!
//! Mocks for the device link connector and the cloud collaborators, so the
//! relay can be tested without an MQTT broker or network access.

pub mod mocks;

pub use mocks::*;
