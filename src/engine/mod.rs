//! Protocol engine abstraction
//!
//! The engine owns MQTT framing, socket I/O and keepalive bookkeeping. Every
//! request method is asynchronous in the protocol sense: it returns as soon
//! as the request is queued, and the outcome arrives later as an
//! [`EngineEvent`] handed to the [`EventDispatcher`] from inside
//! [`ProtocolEngine::pump_input`].
//!
//! - [`rumqtt`] - production engine backed by `rumqttc`
//! - `crate::testing::MockEngine` - scripted engine for tests

use crate::error::{errno, Status};
use crate::session::EventDispatcher;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub mod rumqtt;

pub use rumqtt::RumqttEngine;

/// Parameters handed to the engine once, when the session is created
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// Hex client identifier derived from the device id
    pub client_id: String,
    /// Receive buffer size in bytes
    pub rx_buf_size: usize,
    /// Transmit buffer size in bytes
    pub tx_buf_size: usize,
    /// Keepalive interval negotiated with the broker
    pub keep_alive: Duration,
    /// Optional username/password pair
    pub credentials: Option<(String, String)>,
}

/// A single outbound publish request
#[derive(Debug, Clone, PartialEq)]
pub struct PublishParams {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Correlation token for the eventual acknowledgment (never zero)
    pub message_id: u16,
}

impl PublishParams {
    /// Build a non-retained at-least-once publish
    pub fn at_least_once<T: Into<String>>(topic: T, payload: Bytes, message_id: u16) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos: QoS::AtLeastOnce,
            retain: false,
            message_id,
        }
    }
}

/// Protocol occurrences reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Broker answered the connect request
    ConnAck { status: Status, session_present: bool },
    /// Session closed, by request or by the broker
    Disconnected { status: Status },
    /// Inbound application message
    Publish {
        topic: String,
        qos: QoS,
        message_id: u16,
        payload_len: usize,
    },
    /// QoS 1 publish acknowledged
    PubAck { status: Status, message_id: u16 },
    PubRec { message_id: u16 },
    PubRel { message_id: u16 },
    PubComp { message_id: u16 },
    SubAck { message_id: u16 },
    UnsubAck { message_id: u16 },
    /// Keepalive response
    PingResp,
}

impl EngineEvent {
    /// Short packet-style name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::ConnAck { .. } => "CONNACK",
            EngineEvent::Disconnected { .. } => "DISCONNECT",
            EngineEvent::Publish { .. } => "PUBLISH",
            EngineEvent::PubAck { .. } => "PUBACK",
            EngineEvent::PubRec { .. } => "PUBREC",
            EngineEvent::PubRel { .. } => "PUBREL",
            EngineEvent::PubComp { .. } => "PUBCOMP",
            EngineEvent::SubAck { .. } => "SUBACK",
            EngineEvent::UnsubAck { .. } => "UNSUBACK",
            EngineEvent::PingResp => "PINGRESP",
        }
    }
}

/// Errors reported synchronously by engine calls
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not initialized")]
    NotInitialized,
    #[error("Not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Operation would block")]
    WouldBlock,
    #[error("Message of {len} bytes exceeds the {capacity} byte transmit buffer")]
    BufferFull { len: usize, capacity: usize },
    #[error("Request rejected: {0}")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap a client-side error from the underlying library
    pub fn rejected<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Rejected(Box::new(error))
    }

    /// Negative status code for this error
    pub fn code(&self) -> Status {
        match self {
            EngineError::NotInitialized => errno::EINVAL,
            EngineError::NotConnected => errno::ENOTCONN,
            EngineError::AlreadyConnected => errno::EISCONN,
            EngineError::WouldBlock => errno::EAGAIN,
            EngineError::BufferFull { .. } => errno::ENOMEM,
            EngineError::Rejected(_) => errno::EIO,
            EngineError::Io(e) => e.raw_os_error().map_or(errno::EIO, |code| -code),
        }
    }

    /// Outcomes the liveness driver treats as "nothing to do"
    pub fn is_benign(&self) -> bool {
        matches!(self, EngineError::NotConnected | EngineError::WouldBlock)
    }
}

/// Asynchronous, event-driven MQTT protocol engine
///
/// Request methods must not wait for the broker. `tick` and `pump_input`
/// must be non-blocking or bounded: the liveness driver calls them on a
/// fixed cadence and nothing else may stall it.
#[async_trait::async_trait]
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Install identity and buffer parameters
    fn init(&self, params: &SessionParams) -> Result<(), EngineError>;

    /// Start a session with the broker at `broker`; completion arrives as `ConnAck`
    async fn connect(&self, broker: SocketAddr) -> Result<(), EngineError>;

    /// Request a clean disconnect; completion arrives as `Disconnected`
    async fn disconnect(&self) -> Result<(), EngineError>;

    /// Queue an outbound publish; QoS 1 completion arrives as `PubAck`
    async fn publish(&self, params: PublishParams) -> Result<(), EngineError>;

    /// Keepalive and session maintenance
    ///
    /// Engines whose event loop schedules pings while reading input may fold
    /// keepalive into `pump_input`; `tick` then only reports `NotConnected`
    /// when no session exists.
    async fn tick(&self) -> Result<(), EngineError>;

    /// Read and parse available input, handing each event to `dispatcher`
    async fn pump_input(&self, dispatcher: &EventDispatcher) -> Result<(), EngineError>;
}
