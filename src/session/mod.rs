//! Synchronous-style MQTT session over an event-driven engine
//!
//! - [`signal`] - one-shot result signals, one per operation kind
//! - [`dispatcher`] - engine events to signal raises
//! - [`driver`] - background keepalive and input pump
//! - [`endpoint`] - broker host parsing and resolution
//! - [`facade`] - `connect` / `publish` / `disconnect`

pub mod dispatcher;
pub mod driver;
pub mod endpoint;
pub mod facade;
pub mod signal;

pub use crate::error::status;
pub use dispatcher::EventDispatcher;
pub use driver::{DriverHandle, DriverOutcome, LivenessDriver};
pub use endpoint::{parse_host, resolve_endpoint, DnsResolver, Resolver, MQTT_DEFAULT_PORT};
pub use facade::{next_message_id, validate_topic, ClientSession, SessionSettings};
pub use signal::{PendingSignals, Signal, SignalError, SignalKind};
