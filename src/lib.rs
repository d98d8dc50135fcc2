//! syncmqtt - blocking connect/publish/disconnect over an event-driven MQTT client
//!
//! # Overview
//!
//! MQTT client libraries are event driven: a request is queued, and its
//! outcome (CONNACK, PUBACK, DISCONNECT) arrives later through an event
//! callback. This crate turns that into plain request/response calls:
//!
//! - [`session::ClientSession`] - `connect`, `publish` and `disconnect` that
//!   each wait, with a bounded timeout, for the matching protocol outcome
//! - [`session::LivenessDriver`] - background task that keeps the engine
//!   alive and pumps its input into the [`session::EventDispatcher`]
//! - [`engine::ProtocolEngine`] - the seam to the protocol implementation,
//!   with [`engine::RumqttEngine`] on top of `rumqttc`
//! - [`blocking::BlockingClient`] - the same session for non-async callers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use syncmqtt::engine::RumqttEngine;
//! use syncmqtt::identity::{ClientIdentity, MachineIdSource};
//! use syncmqtt::session::{ClientSession, SessionSettings};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = ClientIdentity::from_source(&MachineIdSource::default())?;
//! let session = ClientSession::new(
//!     identity,
//!     Arc::new(RumqttEngine::new()),
//!     SessionSettings::default(),
//! )?;
//! let _driver = session.spawn_driver();
//!
//! session.connect("192.168.178.100:1883").await?;
//! session.publish("time", b"Sat Jan  1 00:00:00 2000").await?;
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod observability;
pub mod session;
pub mod testing;

pub use blocking::BlockingClient;
pub use config::{ClientConfig, ConfigError};
pub use engine::{EngineError, EngineEvent, ProtocolEngine, RumqttEngine};
pub use error::{status, SessionError, SessionResult, Status};
pub use identity::ClientIdentity;
pub use session::{ClientSession, SessionSettings, SignalKind};
