//! Pure reconnection bookkeeping for a Device Link
//!
//! The broker client reconnects on every poll after an error. This module only
//! decides what to report and when to pause: one `ConnectFailed` per run of
//! errors, a fixed delay between attempts, no cap on attempts.

use crate::transport::LinkStatus;
use std::time::Duration;

/// Reconnect counter owned by a single link supervisor
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    attempts: u32,
    delay: Duration,
}

/// What the supervisor should do after a transport error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then poll again; `report_failure` is set for the first error of a run
    Proceed {
        attempt: u32,
        delay: Duration,
        report_failure: bool,
    },
    AbortShutdownRequested,
}

/// Connection events that drive status transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError,
    Closed,
}

impl ReconnectTracker {
    pub fn new(delay: Duration) -> Self {
        Self { attempts: 0, delay }
    }

    /// Record a transport error and decide how to continue
    pub fn on_error(&mut self, shutdown_requested: bool) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        let report_failure = self.attempts == 0;
        self.attempts = self.attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt: self.attempts,
            delay: self.delay,
            report_failure,
        }
    }

    /// Record a successful handshake; returns the count to announce, then resets it
    pub fn on_connected(&mut self) -> u32 {
        std::mem::take(&mut self.attempts)
    }

    /// Status after a connection event
    pub fn next_status(event: &ConnectionEvent) -> LinkStatus {
        match event {
            ConnectionEvent::ConnAckReceived => LinkStatus::Connected,
            ConnectionEvent::DisconnectedByBroker | ConnectionEvent::NetworkError => {
                LinkStatus::Connecting
            }
            ConnectionEvent::Closed => LinkStatus::Disconnected,
        }
    }
}
