//! Production protocol engine on top of `rumqttc` (MQTT v5)
//!
//! `rumqttc` splits a connection into an [`AsyncClient`] request handle and
//! an [`EventLoop`] that owns the socket. Requests only enqueue into the
//! client; all network progress happens in `pump_input`, which polls the
//! event loop for a bounded time and translates each event for the
//! dispatcher. Pings are scheduled by the event loop itself, so `tick` only
//! reports whether a session exists.

use super::{EngineError, EngineEvent, ProtocolEngine, PublishParams, SessionParams};
use crate::error::{errno, Status};
use crate::session::EventDispatcher;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, DisconnectReasonCode, Packet, PubAckReason};
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, StateError};
use rumqttc::Outgoing;
use std::net::SocketAddr;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Poll budget while the link is established
const DEFAULT_POLL_BUDGET: Duration = Duration::from_millis(20);

/// Seconds `rumqttc` allows for the TCP handshake and CONNACK
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Poll budget while the handshake is outstanding; outlasts the connect timeout
/// so the event loop reports the failure instead of being cancelled
const CONNECT_POLL_BUDGET: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS + 1);

/// Events handled per `pump_input` call before yielding back to the driver
const DEFAULT_MAX_EVENTS_PER_PUMP: usize = 32;

/// Capacity of the client request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// `rumqttc`-backed [`ProtocolEngine`]
pub struct RumqttEngine {
    params: StdMutex<Option<SessionParams>>,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<EventLoop>>,
    state: StdMutex<LinkState>,
    poll_budget: Duration,
    max_events_per_pump: usize,
}

impl RumqttEngine {
    pub fn new() -> Self {
        Self {
            params: StdMutex::new(None),
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
            state: StdMutex::new(LinkState::Idle),
            poll_budget: DEFAULT_POLL_BUDGET,
            max_events_per_pump: DEFAULT_MAX_EVENTS_PER_PUMP,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.state() == LinkState::Connected
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LinkState) {
        *self.state() = state;
    }

    fn params(&self) -> Result<SessionParams, EngineError> {
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EngineError::NotInitialized)
    }

    async fn connected_client(&self) -> Result<AsyncClient, EngineError> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        self.client
            .lock()
            .await
            .clone()
            .ok_or(EngineError::NotConnected)
    }

    /// Drop the client and event loop; the socket closes with the event loop
    async fn teardown(&self) {
        self.event_loop.lock().await.take();
        self.client.lock().await.take();
        self.set_state(LinkState::Idle);
    }

    /// Translate a poll failure into the event its waiter expects
    fn failure_event(&self, error: &ConnectionError) -> EngineEvent {
        if let Some(refused) = refused_publish(error) {
            return refused;
        }

        let status = connection_error_status(error);
        match *self.state() {
            LinkState::Connecting => EngineEvent::ConnAck {
                status,
                session_present: false,
            },
            // The broker may close the socket before we see our DISCONNECT go out
            LinkState::Disconnecting => EngineEvent::Disconnected { status: 0 },
            LinkState::Connected | LinkState::Idle => EngineEvent::Disconnected { status },
        }
    }
}

impl Default for RumqttEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Build client options for one session (pure function)
pub fn configure_mqtt_options(params: &SessionParams, broker: SocketAddr) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(params.client_id.clone(), broker.ip().to_string(), broker.port());

    mqtt_options.set_keep_alive(params.keep_alive);
    mqtt_options.set_clean_start(true);
    mqtt_options.set_connection_timeout(CONNECT_TIMEOUT_SECS);

    // Inbound packets larger than the receive buffer are refused by the client
    mqtt_options.set_max_packet_size(Some(params.rx_buf_size as u32));

    if let Some((username, password)) = &params.credentials {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options
}

/// Status carried by a CONNACK reason code
pub fn connack_status(code: &ConnectReturnCode) -> Status {
    match code {
        ConnectReturnCode::Success => errno::OK,
        ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword => {
            errno::EACCES
        }
        _ => errno::ECONNREFUSED,
    }
}

/// Status carried by a PUBACK reason code
pub fn puback_status(reason: &PubAckReason) -> Status {
    match reason {
        PubAckReason::Success | PubAckReason::NoMatchingSubscribers => errno::OK,
        _ => errno::EIO,
    }
}

/// Status carried by a broker-initiated DISCONNECT
pub fn disconnect_status(reason: &DisconnectReasonCode) -> Status {
    match reason {
        DisconnectReasonCode::NormalDisconnection => errno::OK,
        _ => errno::ECONNRESET,
    }
}

/// Status for an event loop failure
pub fn connection_error_status(error: &ConnectionError) -> Status {
    match error {
        ConnectionError::ConnectionRefused(code) => connack_status(code),
        ConnectionError::Io(e) => e.raw_os_error().map_or(errno::EIO, |code| -code),
        _ => errno::EIO,
    }
}

/// Publish outcome for an acknowledgment the broker refused
///
/// `rumqttc` surfaces a failing PUBACK/PUBREC/PUBCOMP reason as an event loop
/// error rather than as an incoming packet, and drops the network with it.
pub fn refused_publish(error: &ConnectionError) -> Option<EngineEvent> {
    let status = match error {
        ConnectionError::MqttState(StateError::PubAckFail { reason }) => puback_status(reason),
        ConnectionError::MqttState(
            StateError::PubRecFail { .. } | StateError::PubCompFail { .. },
        ) => errno::EIO,
        _ => return None,
    };

    // Packet ids are assigned by the event loop and not carried by the error
    Some(EngineEvent::PubAck {
        status,
        message_id: 0,
    })
}

/// Map a `rumqttc` event to an engine event (pure routing decision)
pub fn translate_event(event: &Event) -> Option<EngineEvent> {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(connack) => Some(EngineEvent::ConnAck {
                status: connack_status(&connack.code),
                session_present: connack.session_present,
            }),
            Packet::Disconnect(disconnect) => Some(EngineEvent::Disconnected {
                status: disconnect_status(&disconnect.reason_code),
            }),
            Packet::Publish(publish) => Some(EngineEvent::Publish {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                qos: publish.qos,
                message_id: publish.pkid,
                payload_len: publish.payload.len(),
            }),
            Packet::PubAck(puback) => Some(EngineEvent::PubAck {
                status: puback_status(&puback.reason),
                message_id: puback.pkid,
            }),
            Packet::PubRec(pubrec) => Some(EngineEvent::PubRec {
                message_id: pubrec.pkid,
            }),
            Packet::PubRel(pubrel) => Some(EngineEvent::PubRel {
                message_id: pubrel.pkid,
            }),
            Packet::PubComp(pubcomp) => Some(EngineEvent::PubComp {
                message_id: pubcomp.pkid,
            }),
            Packet::SubAck(suback) => Some(EngineEvent::SubAck {
                message_id: suback.pkid,
            }),
            Packet::UnsubAck(unsuback) => Some(EngineEvent::UnsubAck {
                message_id: unsuback.pkid,
            }),
            Packet::PingResp(_) => Some(EngineEvent::PingResp),
            _ => None,
        },
        Event::Outgoing(Outgoing::Disconnect) => Some(EngineEvent::Disconnected {
            status: errno::OK,
        }),
        Event::Outgoing(_) => None,
    }
}

#[async_trait]
impl ProtocolEngine for RumqttEngine {
    fn init(&self, params: &SessionParams) -> Result<(), EngineError> {
        if params.client_id.is_empty() || params.rx_buf_size == 0 || params.tx_buf_size == 0 {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "client id and buffer sizes must be non-empty",
            )));
        }

        *self.params.lock().unwrap_or_else(PoisonError::into_inner) = Some(params.clone());
        debug!(
            client_id = %params.client_id,
            rx_buf_size = params.rx_buf_size,
            tx_buf_size = params.tx_buf_size,
            "rumqttc engine initialized"
        );
        Ok(())
    }

    async fn connect(&self, broker: SocketAddr) -> Result<(), EngineError> {
        let params = self.params()?;

        {
            let mut state = self.state();
            match *state {
                LinkState::Idle => *state = LinkState::Connecting,
                _ => return Err(EngineError::AlreadyConnected),
            }
        }

        let mqtt_options = configure_mqtt_options(&params, broker);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        *self.event_loop.lock().await = Some(event_loop);
        *self.client.lock().await = Some(client);

        info!(%broker, client_id = %params.client_id, "MQTT connect queued");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        let client = self.connected_client().await?;
        self.set_state(LinkState::Disconnecting);

        if let Err(e) = client.disconnect().await {
            self.set_state(LinkState::Connected);
            return Err(EngineError::rejected(e));
        }

        debug!("MQTT disconnect queued");
        Ok(())
    }

    async fn publish(&self, params: PublishParams) -> Result<(), EngineError> {
        let capacity = self.params()?.tx_buf_size;
        let len = params.topic.len() + params.payload.len();
        if len > capacity {
            return Err(EngineError::BufferFull { len, capacity });
        }

        let client = self.connected_client().await?;
        client
            .publish(params.topic, params.qos, params.retain, params.payload)
            .await
            .map_err(EngineError::rejected)?;

        trace!(message_id = params.message_id, "MQTT publish queued");
        Ok(())
    }

    async fn tick(&self) -> Result<(), EngineError> {
        match *self.state() {
            LinkState::Idle => Err(EngineError::NotConnected),
            _ => Ok(()),
        }
    }

    async fn pump_input(&self, dispatcher: &EventDispatcher) -> Result<(), EngineError> {
        let mut handled = 0;

        while handled < self.max_events_per_pump {
            let budget = match *self.state() {
                LinkState::Idle => return Err(EngineError::NotConnected),
                LinkState::Connecting => CONNECT_POLL_BUDGET,
                LinkState::Connected | LinkState::Disconnecting => self.poll_budget,
            };

            let polled = {
                let mut event_loop = self.event_loop.lock().await;
                let Some(event_loop) = event_loop.as_mut() else {
                    return Err(EngineError::NotConnected);
                };
                tokio::time::timeout(budget, event_loop.poll()).await
            };

            let event = match polled {
                // Nothing more to read this cycle
                Err(_elapsed) => break,
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    let failure = self.failure_event(&e);
                    warn!("MQTT event loop error: {}", e);
                    self.teardown().await;
                    dispatcher.dispatch(&failure);
                    return Err(EngineError::rejected(e));
                }
            };
            handled += 1;

            let Some(translated) = translate_event(&event) else {
                trace!("Ignoring MQTT event: {:?}", event);
                continue;
            };

            match translated {
                EngineEvent::ConnAck { status, .. } if status == errno::OK => {
                    self.set_state(LinkState::Connected)
                }
                EngineEvent::ConnAck { .. } | EngineEvent::Disconnected { .. } => {
                    self.teardown().await
                }
                _ => {}
            }

            dispatcher.dispatch(&translated);
        }

        if handled == 0 {
            Err(EngineError::WouldBlock)
        } else {
            Ok(())
        }
    }
}
