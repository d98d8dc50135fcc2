//! Blocking-style connect / publish / disconnect over the event-driven engine
//!
//! Every operation follows the same contract:
//!
//! 1. reset (arm) the operation's pending signal,
//! 2. issue the asynchronous engine request,
//! 3. wait for the signal with a bounded timeout.
//!
//! Arming strictly precedes issuing. The engine may deliver the outcome
//! event through the liveness driver before the caller reaches step 3; the
//! one-shot signal keeps that early result for the wait. Arming after
//! issuing would let the reset erase it.

use super::dispatcher::EventDispatcher;
use super::driver::{DriverHandle, LivenessDriver};
use super::endpoint::{resolve_endpoint, DnsResolver, Resolver};
use super::signal::{SignalError, SignalKind};
use crate::engine::{EngineError, ProtocolEngine, PublishParams, SessionParams};
use crate::error::{SessionError, SessionResult};
use crate::identity::ClientIdentity;
use crate::operation_span;
use bytes::Bytes;
use rand::Rng;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, Instrument};

/// Longest topic the MQTT wire format can carry
const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Timing and buffer settings of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Bound on each facade wait
    pub response_timeout: Duration,
    /// Sleep between liveness driver cycles
    pub poll_interval: Duration,
    /// Receive and transmit buffer size in bytes
    pub buffer_size: usize,
    pub keep_alive: Duration,
    pub credentials: Option<(String, String)>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            buffer_size: 2048,
            keep_alive: Duration::from_secs(60),
            credentials: None,
        }
    }
}

/// Per-kind guards so each operation kind has at most one request in flight
#[derive(Debug, Default)]
struct InFlight {
    connect: Mutex<()>,
    disconnect: Mutex<()>,
    publish: Mutex<()>,
}

impl InFlight {
    fn get(&self, kind: SignalKind) -> &Mutex<()> {
        match kind {
            SignalKind::Connect => &self.connect,
            SignalKind::Disconnect => &self.disconnect,
            SignalKind::Publish => &self.publish,
        }
    }
}

/// One MQTT session: identity, broker endpoint, engine and dispatcher
pub struct ClientSession<E: ProtocolEngine> {
    identity: ClientIdentity,
    settings: SessionSettings,
    engine: Arc<E>,
    resolver: Arc<dyn Resolver>,
    endpoint: Mutex<Option<SocketAddr>>,
    dispatcher: Arc<EventDispatcher>,
    in_flight: InFlight,
}

impl<E: ProtocolEngine> ClientSession<E> {
    /// Create a session and initialize the engine with its identity and buffers
    pub fn new(
        identity: ClientIdentity,
        engine: Arc<E>,
        settings: SessionSettings,
    ) -> SessionResult<Self> {
        let params = SessionParams {
            client_id: identity.client_id().to_string(),
            rx_buf_size: settings.buffer_size,
            tx_buf_size: settings.buffer_size,
            keep_alive: settings.keep_alive,
            credentials: settings.credentials.clone(),
        };
        engine.init(&params).map_err(SessionError::Init)?;

        info!(client_id = %identity, "MQTT session initialized");

        Ok(Self {
            identity,
            settings,
            engine,
            resolver: Arc::new(DnsResolver),
            endpoint: Mutex::new(None),
            dispatcher: Arc::new(EventDispatcher::new()),
            in_flight: InFlight::default(),
        })
    }

    /// Replace the name resolver used by `connect`
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Broker address installed by the last successful resolve
    pub async fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock().await
    }

    /// Start the liveness driver for this session on the current runtime
    pub fn spawn_driver(&self) -> DriverHandle {
        LivenessDriver::new(
            self.engine.clone(),
            self.dispatcher.clone(),
            self.settings.poll_interval,
        )
        .spawn()
    }

    /// Resolve `host`, then open a protocol session with it
    pub async fn connect(&self, host: &str) -> SessionResult<()> {
        let span = operation_span!(operation = "connect", host = %host);
        async {
            let _in_flight = self.in_flight.get(SignalKind::Connect).lock().await;

            let broker = match self.install_endpoint(host).await {
                Ok(broker) => broker,
                Err(e) => {
                    error!(code = e.code(), "broker endpoint setup failed: {}", e);
                    return Err(e);
                }
            };

            debug!(%broker, "Broker endpoint installed");
            self.request(SignalKind::Connect, self.engine.connect(broker))
                .await
        }
        .instrument(span)
        .await
    }

    /// Close the protocol session
    pub async fn disconnect(&self) -> SessionResult<()> {
        let span = operation_span!(operation = "disconnect");
        async {
            let _in_flight = self.in_flight.get(SignalKind::Disconnect).lock().await;
            self.request(SignalKind::Disconnect, self.engine.disconnect())
                .await
        }
        .instrument(span)
        .await
    }

    /// Publish `payload` to `topic` with at-least-once delivery
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> SessionResult<()> {
        let span = operation_span!(operation = "publish", topic = %topic);
        async {
            if let Err(e) = validate_topic(topic) {
                error!(code = e.code(), "publish rejected: {}", e);
                return Err(e);
            }

            let _in_flight = self.in_flight.get(SignalKind::Publish).lock().await;

            let params = PublishParams::at_least_once(
                topic,
                Bytes::copy_from_slice(payload),
                next_message_id(),
            );
            debug!(
                message_id = params.message_id,
                payload_len = payload.len(),
                "Publishing"
            );

            self.request(SignalKind::Publish, self.engine.publish(params))
                .await
        }
        .instrument(span)
        .await
    }

    /// Clear the old endpoint and install a freshly resolved one
    async fn install_endpoint(&self, host: &str) -> SessionResult<SocketAddr> {
        let mut endpoint = self.endpoint.lock().await;
        *endpoint = None;

        let broker = resolve_endpoint(self.resolver.as_ref(), host).await?;
        *endpoint = Some(broker);
        Ok(broker)
    }

    /// Arm, issue, wait
    async fn request<F>(&self, kind: SignalKind, issue: F) -> SessionResult<()>
    where
        F: Future<Output = Result<(), EngineError>>,
    {
        let signal = self.dispatcher.signals().get(kind);
        signal.reset();

        if let Err(source) = issue.await {
            error!(code = source.code(), "mqtt_{} failed: {}", kind, source);
            return Err(SessionError::Request {
                operation: kind,
                source,
            });
        }

        match signal.wait(self.settings.response_timeout).await {
            Ok(0) => {
                debug!("{} acknowledged", kind);
                Ok(())
            }
            Ok(code) => {
                error!(code, "{} refused by broker", kind);
                Err(SessionError::Protocol {
                    operation: kind,
                    code,
                })
            }
            Err(SignalError::Timeout(timeout)) => {
                // A late event lands in an idle slot and is cleared by the next arm
                signal.reset();
                error!(timeout_ms = timeout.as_millis() as u64, "{} wait timed out", kind);
                Err(SessionError::Timeout {
                    operation: kind,
                    timeout,
                })
            }
            Err(SignalError::Closed) => {
                error!("{} wait aborted: driver stopped", kind);
                Err(SessionError::Closed { operation: kind })
            }
        }
    }
}

/// Check a topic name for publishing (pure function)
pub fn validate_topic(topic: &str) -> SessionResult<()> {
    if topic.is_empty() {
        return Err(SessionError::invalid_topic(topic, "empty topic"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(SessionError::invalid_topic(
            topic.chars().take(32).collect::<String>(),
            format!("topic longer than {MAX_TOPIC_LEN} bytes"),
        ));
    }
    if topic.contains(|c| c == '+' || c == '#') {
        return Err(SessionError::invalid_topic(
            topic,
            "wildcards are not allowed in publish topics",
        ));
    }
    if topic.contains('\0') {
        return Err(SessionError::invalid_topic(topic, "NUL character"));
    }
    Ok(())
}

/// Fresh non-zero correlation id for a publish
pub fn next_message_id() -> u16 {
    rand::thread_rng().gen_range(1..=u16::MAX)
}
