//! Impure I/O for the Device Link
//!
//! [`DeviceLink`] owns the rumqttc client and a supervisor task that polls the
//! event loop, subscribes and probes after every handshake, forwards reports
//! and paces reconnection. [`MqttConnector`] builds links for the session manager.

use super::connection::{configure_mqtt_options, MqttError, TopicBuilder};
use super::message_handler::{EventRoute, MessageHandler};
use super::reconnect::{ConnectionEvent, ReconnectTracker, ReconnectionDecision};
use crate::config::DeviceSection;
use crate::observability::metrics;
use crate::protocol::{DeviceCommand, DeviceId, ReportMessage};
use crate::transport::{DeviceSession, DeviceTransport, LinkConnector, LinkEvent, LinkStatus};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// How long a closing link may take to flush UNSUBSCRIBE/DISCONNECT
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker session for one device
pub struct DeviceLink {
    device_id: DeviceId,
    client: AsyncClient,
    report_topic: String,
    request_topic: String,
    status_rx: watch::Receiver<LinkStatus>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Option<JoinHandle<()>>,
}

/// State moved into the supervisor task
struct Supervisor {
    device_id: DeviceId,
    client: AsyncClient,
    report_topic: String,
    request_topic: String,
    status_tx: watch::Sender<LinkStatus>,
    shutdown_rx: watch::Receiver<bool>,
    events: mpsc::Sender<LinkEvent>,
    tracker: ReconnectTracker,
}

impl DeviceLink {
    /// Build the broker client and start supervising it
    ///
    /// Returns immediately; the handshake outcome arrives as a [`LinkEvent`].
    pub fn spawn(
        session: DeviceSession,
        device: &DeviceSection,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Self, MqttError> {
        let options = configure_mqtt_options(&session, device)?;
        let (client, event_loop) = AsyncClient::new(options, device.request_capacity);

        let ((status_tx, status_rx), (shutdown_tx, shutdown_rx)) = Self::setup_link_channels();
        let device_id = session.device_id.clone();
        let report_topic = TopicBuilder::report_topic(&device_id);
        let request_topic = TopicBuilder::request_topic(&device_id);

        let supervisor = Supervisor {
            device_id: device_id.clone(),
            client: client.clone(),
            report_topic: report_topic.clone(),
            request_topic: request_topic.clone(),
            status_tx,
            shutdown_rx,
            events,
            tracker: ReconnectTracker::new(device.reconnect_delay()),
        };
        let span = crate::device_span!(device_id.as_str());
        let handle = tokio::spawn(supervisor.run(event_loop).instrument(span));

        info!(
            device_id = %device_id,
            host = %session.host,
            port = session.port,
            "Device link started"
        );

        Ok(Self {
            device_id,
            client,
            report_topic,
            request_topic,
            status_rx,
            shutdown_tx,
            event_loop_handle: Some(handle),
        })
    }

    #[allow(clippy::type_complexity)]
    fn setup_link_channels() -> (
        (watch::Sender<LinkStatus>, watch::Receiver<LinkStatus>),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (watch::channel(LinkStatus::Connecting), watch::channel(false))
    }

    /// Join the supervisor, aborting it if it does not stop in time
    async fn join_supervisor(&mut self) {
        let Some(mut handle) = self.event_loop_handle.take() else {
            return;
        };

        match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!(device_id = %self.device_id, "Link supervisor stopped"),
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!(device_id = %self.device_id, error = %e, "Link supervisor ended with error");
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(device_id = %self.device_id, "Link supervisor did not stop in time, aborting");
                let _ = self.shutdown_tx.send(true);
                handle.abort();
            }
        }
    }
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        debug!(device_id = %self.device_id, "Starting broker event loop");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(device_id = %self.device_id, "Shutdown signal received, stopping link");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route).await
                        }
                        Err(e) => self.handle_event_loop_error(e).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        let _ = self
            .status_tx
            .send(ReconnectTracker::next_status(&ConnectionEvent::Closed));
        debug!(device_id = %self.device_id, "Broker event loop stopped");
    }

    /// Returns false once the supervisor should stop
    async fn process_event_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                self.on_connected(session_present).await
            }
            EventRoute::MessageReceived { topic, payload } => {
                if !MessageHandler::should_process_message(&topic, &self.report_topic) {
                    return true;
                }
                metrics().report_received();
                let report = ReportMessage::new(self.device_id.clone(), payload);
                self.forward(LinkEvent::Report(report)).await
            }
            EventRoute::Disconnected => {
                info!(device_id = %self.device_id, "Broker closed the session");
                let _ = self.status_tx.send(ReconnectTracker::next_status(
                    &ConnectionEvent::DisconnectedByBroker,
                ));
                true
            }
            EventRoute::DisconnectSent => {
                debug!(device_id = %self.device_id, "Disconnect flushed, closing link");
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                if let Err(e) = MessageHandler::validate_subscription_success(&return_codes) {
                    warn!(device_id = %self.device_id, packet_id, error = %e, "Report subscription rejected");
                } else {
                    debug!(device_id = %self.device_id, packet_id, "Report subscription confirmed");
                }
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "device_transport", device_id = %self.device_id, "Broker event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Subscribe, announce the connection, then send the probe sequence
    async fn on_connected(&mut self, session_present: bool) -> bool {
        if let Err(e) = self
            .client
            .try_subscribe(&self.report_topic, MessageHandler::qos())
        {
            error!(device_id = %self.device_id, error = %e, "Failed to subscribe to report topic");
        }

        let _ = self
            .status_tx
            .send(ReconnectTracker::next_status(&ConnectionEvent::ConnAckReceived));
        let reconnect_count = self.tracker.on_connected();
        info!(
            device_id = %self.device_id,
            reconnect_count,
            session_present,
            "Device broker connected"
        );

        if !self.forward(LinkEvent::Connected { reconnect_count }).await {
            return false;
        }

        if let Err(e) = hand_off(&self.client, &self.request_topic, &DeviceCommand::Probe) {
            warn!(device_id = %self.device_id, error = %e, "Probe sequence not handed off");
        }
        true
    }

    async fn handle_event_loop_error(&mut self, error: ConnectionError) -> bool {
        let _ = self
            .status_tx
            .send(ReconnectTracker::next_status(&ConnectionEvent::NetworkError));

        let shutdown_requested = *self.shutdown_rx.borrow();
        match self.tracker.on_error(shutdown_requested) {
            ReconnectionDecision::Proceed {
                attempt,
                delay,
                report_failure,
            } => {
                metrics().reconnect_attempt();
                if report_failure {
                    metrics().connect_failure();
                    warn!(device_id = %self.device_id, error = %error, "Device broker connection failed");
                    let failed = LinkEvent::ConnectFailed {
                        reason: error.to_string(),
                    };
                    if !self.forward(failed).await {
                        return false;
                    }
                } else {
                    debug!(device_id = %self.device_id, attempt, error = %error, "Reconnect attempt failed");
                }
                interruptible_sleep(self.shutdown_rx.clone(), delay).await
            }
            ReconnectionDecision::AbortShutdownRequested => false,
        }
    }

    /// Deliver to the classifier task; false once nobody is listening
    async fn forward(&self, event: LinkEvent) -> bool {
        if self.events.send(event).await.is_err() {
            debug!(device_id = %self.device_id, "Link event receiver dropped, stopping link");
            return false;
        }
        true
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            changed.is_ok() && !*shutdown_rx.borrow()
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Queue every payload of `command` on the broker client without waiting
fn hand_off(client: &AsyncClient, topic: &str, command: &DeviceCommand) -> Result<(), MqttError> {
    let payloads = command.payloads().map_err(MqttError::SerializationError)?;
    for payload in payloads {
        client
            .try_publish(topic, MessageHandler::qos(), false, payload)
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
    }
    Ok(())
}

#[async_trait]
impl DeviceTransport for DeviceLink {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    fn status(&self) -> LinkStatus {
        *self.status_rx.borrow()
    }

    async fn publish(&self, command: &DeviceCommand) -> Result<(), MqttError> {
        hand_off(&self.client, &self.request_topic, command)?;
        debug!(device_id = %self.device_id, command = command.name(), "Command handed to broker client");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        if self.event_loop_handle.is_none() {
            return Ok(());
        }

        if self.status() == LinkStatus::Connected {
            // The supervisor flushes both and stops once DISCONNECT is written
            if let Err(e) = self.client.try_unsubscribe(&self.report_topic) {
                debug!(device_id = %self.device_id, error = %e, "Unsubscribe not queued");
            }
            if let Err(e) = self.client.try_disconnect() {
                debug!(device_id = %self.device_id, error = %e, "Disconnect not queued");
                let _ = self.shutdown_tx.send(true);
            }
        } else {
            let _ = self.shutdown_tx.send(true);
        }

        self.join_supervisor().await;
        info!(device_id = %self.device_id, "Device link closed");
        Ok(())
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// Opens rumqttc-backed Device Links
#[derive(Debug, Clone)]
pub struct MqttConnector {
    device: DeviceSection,
}

impl MqttConnector {
    pub fn new(device: DeviceSection) -> Self {
        Self { device }
    }
}

#[async_trait]
impl LinkConnector for MqttConnector {
    async fn open(
        &self,
        session: DeviceSession,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn DeviceTransport>, MqttError> {
        let link = DeviceLink::spawn(session, &self.device, events)?;
        Ok(Box::new(link))
    }
}
