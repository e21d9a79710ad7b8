//! MQTT Device Link
//!
//! Split the way the rest of the transport layer is: pure functions for options
//! and topics, event routing and reconnect bookkeeping, with all I/O confined
//! to [`client`].
//!
//! - [`connection`] - broker options, TLS and topic naming
//! - [`message_handler`] - routing rumqttc events
//! - [`reconnect`] - reconnect counter and failure reporting policy
//! - [`client`] - the link itself and its supervisor task
//!
//! # Usage
//!
//! ```rust,no_run
//! use printer_relay::config::DeviceSection;
//! use printer_relay::protocol::DeviceId;
//! use printer_relay::transport::mqtt::DeviceLink;
//! use printer_relay::transport::DeviceSession;
//! use tokio::sync::mpsc;
//!
//! # tokio_test::block_on(async {
//! let device = DeviceSection::default();
//! let session = DeviceSession::lan(
//!     DeviceId::new("01S00A123456789"),
//!     "192.168.1.20",
//!     "12345678",
//!     &device,
//! );
//! let (events_tx, mut events_rx) = mpsc::channel(device.event_capacity);
//! let _link = DeviceLink::spawn(session, &device, events_tx)?;
//! while let Some(event) = events_rx.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod reconnect;

pub use client::{DeviceLink, MqttConnector};
pub use connection::{configure_mqtt_options, MqttError, TopicBuilder};
pub use message_handler::{EventRoute, MessageHandler};
pub use reconnect::{ConnectionEvent, ReconnectTracker, ReconnectionDecision};
