//! Mock implementations for testing
//!
//! Provides a scripted [`ProtocolEngine`] and a fixed-table [`Resolver`] so
//! the session can be exercised without a broker or DNS.

use crate::engine::{EngineError, EngineEvent, ProtocolEngine, PublishParams, SessionParams};
use crate::error::Status;
use crate::session::{EventDispatcher, Resolver};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A request the session made of the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Init(SessionParams),
    Connect(SocketAddr),
    Disconnect,
    Publish(PublishParams),
}

/// Error a mock call should fail with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotConnected,
    WouldBlock,
    BufferFull,
    Io,
}

impl From<MockFailure> for EngineError {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::NotConnected => EngineError::NotConnected,
            MockFailure::WouldBlock => EngineError::WouldBlock,
            MockFailure::BufferFull => EngineError::BufferFull {
                len: 0,
                capacity: 0,
            },
            MockFailure::Io => EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock engine failure",
            )),
        }
    }
}

#[derive(Debug)]
struct MockState {
    calls: Vec<EngineCall>,
    pending: VecDeque<EngineEvent>,
    connect_response: Option<Status>,
    disconnect_response: Option<Status>,
    publish_response: Option<Status>,
    fail_init: Option<MockFailure>,
    fail_next_request: Option<MockFailure>,
    fail_ticks: usize,
    fail_pumps: usize,
    inline: Option<Arc<EventDispatcher>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            pending: VecDeque::new(),
            connect_response: Some(0),
            disconnect_response: Some(0),
            publish_response: Some(0),
            fail_init: None,
            fail_next_request: None,
            fail_ticks: 0,
            fail_pumps: 0,
            inline: None,
        }
    }
}

/// Scripted protocol engine
///
/// Each request is recorded. Unless told otherwise, the matching outcome
/// event (status 0) is queued and delivered on the next `pump_input`. A
/// `None` response means the broker never answers.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
    tick_count: AtomicUsize,
    pump_count: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_connect_response(&self, status: Option<Status>) {
        self.state().connect_response = status;
    }

    pub fn set_disconnect_response(&self, status: Option<Status>) {
        self.state().disconnect_response = status;
    }

    pub fn set_publish_response(&self, status: Option<Status>) {
        self.state().publish_response = status;
    }

    pub fn fail_init(&self, failure: MockFailure) {
        self.state().fail_init = Some(failure);
    }

    /// Make the next connect, disconnect or publish call fail synchronously
    pub fn fail_next_request(&self, failure: MockFailure) {
        self.state().fail_next_request = Some(failure);
    }

    pub fn fail_ticks(&self, count: usize) {
        self.state().fail_ticks = count;
    }

    pub fn fail_pumps(&self, count: usize) {
        self.state().fail_pumps = count;
    }

    /// Dispatch outcome events from inside the request call itself,
    /// before the request returns to the session
    pub fn deliver_inline(&self, dispatcher: Arc<EventDispatcher>) {
        self.state().inline = Some(dispatcher);
    }

    /// Queue an unsolicited event for the next pump
    pub fn inject(&self, event: EngineEvent) {
        self.state().pending.push_back(event);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, EngineCall::Connect(_)))
            .count()
    }

    pub fn published(&self) -> Vec<PublishParams> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Publish(params) => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tick_count(&self) -> usize {
        self.tick_count.load(Ordering::SeqCst)
    }

    pub fn pump_count(&self) -> usize {
        self.pump_count.load(Ordering::SeqCst)
    }

    fn request(&self, call: EngineCall, outcome: Option<EngineEvent>) -> Result<(), EngineError> {
        let inline = {
            let mut state = self.state();
            state.calls.push(call);

            if let Some(failure) = state.fail_next_request.take() {
                return Err(failure.into());
            }

            match (outcome, state.inline.clone()) {
                (Some(event), Some(dispatcher)) => Some((event, dispatcher)),
                (Some(event), None) => {
                    state.pending.push_back(event);
                    None
                }
                (None, _) => None,
            }
        };

        if let Some((event, dispatcher)) = inline {
            dispatcher.dispatch(&event);
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    fn init(&self, params: &SessionParams) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::Init(params.clone()));
        match state.fail_init.take() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    async fn connect(&self, broker: SocketAddr) -> Result<(), EngineError> {
        let outcome = self
            .state()
            .connect_response
            .map(|status| EngineEvent::ConnAck {
                status,
                session_present: false,
            });
        self.request(EngineCall::Connect(broker), outcome)
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        let outcome = self
            .state()
            .disconnect_response
            .map(|status| EngineEvent::Disconnected { status });
        self.request(EngineCall::Disconnect, outcome)
    }

    async fn publish(&self, params: PublishParams) -> Result<(), EngineError> {
        let message_id = params.message_id;
        let outcome = self
            .state()
            .publish_response
            .map(|status| EngineEvent::PubAck { status, message_id });
        self.request(EngineCall::Publish(params), outcome)
    }

    async fn tick(&self) -> Result<(), EngineError> {
        self.tick_count.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        if state.fail_ticks > 0 {
            state.fail_ticks -= 1;
            return Err(MockFailure::Io.into());
        }
        Ok(())
    }

    async fn pump_input(&self, dispatcher: &EventDispatcher) -> Result<(), EngineError> {
        self.pump_count.fetch_add(1, Ordering::SeqCst);

        let events: Vec<EngineEvent> = {
            let mut state = self.state();
            if state.fail_pumps > 0 {
                state.fail_pumps -= 1;
                return Err(MockFailure::Io.into());
            }
            state.pending.drain(..).collect()
        };

        if events.is_empty() {
            return Err(EngineError::WouldBlock);
        }
        dispatcher.dispatch_all(&events);
        Ok(())
    }
}

/// Resolver with a fixed host table
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, SocketAddr>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `name` to `addr`; the port of `addr` is replaced by the requested one
    pub fn with_host(mut self, name: impl Into<String>, addr: SocketAddr) -> Self {
        self.hosts.insert(name.into(), addr);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        match self.hosts.get(host) {
            Some(addr) => Ok(vec![SocketAddr::new(addr.ip(), port)]),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unknown host '{host}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SignalKind;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_mock_engine_queues_outcome_until_pump() {
        let engine = MockEngine::new();
        let dispatcher = EventDispatcher::new();

        engine
            .connect("127.0.0.1:1883".parse().unwrap())
            .await
            .unwrap();
        assert!(!dispatcher.signals().get(SignalKind::Connect).is_fired());

        engine.pump_input(&dispatcher).await.unwrap();
        assert_eq!(
            dispatcher.signals().get(SignalKind::Connect).try_take(),
            Some(Ok(0))
        );

        assert!(matches!(
            engine.pump_input(&dispatcher).await,
            Err(EngineError::WouldBlock)
        ));
    }

    #[tokio::test]
    async fn test_mock_engine_records_publish() {
        let engine = MockEngine::new();
        engine.set_publish_response(None);

        engine
            .publish(PublishParams::at_least_once(
                "time",
                Bytes::from_static(b"now"),
                77,
            ))
            .await
            .unwrap();

        let published = engine.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_id, 77);
        assert!(matches!(
            engine.pump_input(&EventDispatcher::new()).await,
            Err(EngineError::WouldBlock)
        ));
    }

    #[tokio::test]
    async fn test_mock_engine_scripted_failures() {
        let engine = MockEngine::new();
        engine.fail_next_request(MockFailure::NotConnected);
        engine.fail_ticks(1);

        assert!(matches!(
            engine.disconnect().await,
            Err(EngineError::NotConnected)
        ));
        assert!(engine.disconnect().await.is_ok());
        assert!(engine.tick().await.is_err());
        assert!(engine.tick().await.is_ok());
        assert_eq!(engine.tick_count(), 2);
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver =
            StaticResolver::new().with_host("broker", "10.0.0.5:0".parse().unwrap());

        assert_eq!(
            resolver.resolve("broker", 1883).await.unwrap(),
            vec!["10.0.0.5:1883".parse::<SocketAddr>().unwrap()]
        );
        assert!(resolver.resolve("elsewhere", 1883).await.is_err());
        assert_eq!(resolver.lookups(), 2);
    }
}
