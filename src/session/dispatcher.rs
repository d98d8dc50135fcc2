//! Translation of engine events into signal raises
//!
//! The dispatcher runs only on the liveness driver's pump, so it never races
//! with itself. Events without a waiting facade operation are logged and
//! dropped.

use super::signal::{PendingSignals, SignalKind};
use crate::engine::EngineEvent;
use crate::error::Status;
use tracing::{debug, error};

/// Routes engine events to the session's pending signals
#[derive(Debug, Default)]
pub struct EventDispatcher {
    signals: PendingSignals,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> &PendingSignals {
        &self.signals
    }

    /// Pick the signal an event completes, if any (pure function)
    pub fn route(event: &EngineEvent) -> Option<(SignalKind, Status)> {
        match *event {
            EngineEvent::ConnAck { status, .. } => Some((SignalKind::Connect, status)),
            EngineEvent::Disconnected { status } => Some((SignalKind::Disconnect, status)),
            EngineEvent::PubAck { status, .. } => Some((SignalKind::Publish, status)),
            EngineEvent::Publish { .. }
            | EngineEvent::PubRec { .. }
            | EngineEvent::PubRel { .. }
            | EngineEvent::PubComp { .. }
            | EngineEvent::SubAck { .. }
            | EngineEvent::UnsubAck { .. }
            | EngineEvent::PingResp => None,
        }
    }

    /// Handle one engine event; returns the signal that was raised
    pub fn dispatch(&self, event: &EngineEvent) -> Option<SignalKind> {
        match event {
            EngineEvent::Publish {
                topic,
                qos,
                message_id,
                payload_len,
            } => {
                debug!(
                    topic = %topic,
                    qos = ?qos,
                    message_id,
                    payload_len,
                    "MQTT event: PUBLISH (inbound payload not consumed)"
                );
            }
            EngineEvent::PubAck { message_id, status } => {
                debug!(message_id, status, "MQTT event: PUBACK");
            }
            EngineEvent::ConnAck {
                status,
                session_present,
            } => {
                debug!(status, session_present, "MQTT event: CONNACK");
            }
            other => debug!("MQTT event: {}", other.name()),
        }

        let (kind, status) = Self::route(event)?;
        match self.signals.get(kind).raise(status) {
            Ok(()) => Some(kind),
            Err(e) => {
                error!(operation = %kind, "signaling ({}) failed: {}", event.name(), e);
                None
            }
        }
    }

    /// Dispatch a batch, continuing past failed raises
    pub fn dispatch_all<'a, I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = &'a EngineEvent>,
    {
        events
            .into_iter()
            .filter_map(|event| self.dispatch(event))
            .count()
    }
}
