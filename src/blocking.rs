//! Blocking client for callers without an async runtime
//!
//! [`BlockingClient`] owns a small tokio runtime that hosts the liveness
//! driver, and runs each session operation to completion on it. Calls block
//! the current thread for at most the configured response timeout.
//!
//! Must not be created, used or dropped from inside another tokio runtime.

use crate::engine::ProtocolEngine;
use crate::error::{SessionError, SessionResult};
use crate::identity::ClientIdentity;
use crate::session::{ClientSession, DriverHandle, SessionSettings};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

pub struct BlockingClient<E: ProtocolEngine> {
    session: ClientSession<E>,
    driver: Option<DriverHandle>,
    runtime: Runtime,
}

impl<E: ProtocolEngine> BlockingClient<E> {
    /// Initialize a session over `engine` and start its driver
    pub fn new(
        identity: ClientIdentity,
        engine: Arc<E>,
        settings: SessionSettings,
    ) -> SessionResult<Self> {
        Self::from_session(ClientSession::new(identity, engine, settings)?)
    }

    /// Take over an already configured session and start its driver
    pub fn from_session(session: ClientSession<E>) -> SessionResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("syncmqtt-driver")
            .enable_all()
            .build()
            .map_err(SessionError::Runtime)?;

        let driver = {
            let _enter = runtime.enter();
            session.spawn_driver()
        };

        Ok(Self {
            session,
            driver: Some(driver),
            runtime,
        })
    }

    pub fn session(&self) -> &ClientSession<E> {
        &self.session
    }

    pub fn connect(&self, host: &str) -> SessionResult<()> {
        self.runtime.block_on(self.session.connect(host))
    }

    pub fn publish(&self, topic: &str, payload: &[u8]) -> SessionResult<()> {
        self.runtime.block_on(self.session.publish(topic, payload))
    }

    pub fn disconnect(&self) -> SessionResult<()> {
        self.runtime.block_on(self.session.disconnect())
    }

    /// Stop the driver; later operations fail with `SessionError::Closed`
    pub fn shutdown(&mut self) {
        if let Some(driver) = self.driver.take() {
            self.runtime.block_on(driver.shutdown());
            debug!("Blocking client driver stopped");
        }
    }
}

impl<E: ProtocolEngine> Drop for BlockingClient<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::errno;
    use crate::testing::{MockEngine, StaticResolver};
    use std::time::Duration;

    fn client(engine: Arc<MockEngine>) -> BlockingClient<MockEngine> {
        let identity = ClientIdentity::from_device_id(&[0xAB; 8]).unwrap();
        let settings = SessionSettings {
            response_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(5),
            ..SessionSettings::default()
        };
        let session = ClientSession::new(identity, engine, settings)
            .unwrap()
            .with_resolver(Arc::new(
                StaticResolver::new().with_host("broker", "10.0.0.7:0".parse().unwrap()),
            ));
        BlockingClient::from_session(session).unwrap()
    }

    #[test]
    fn test_blocking_round_trip() {
        let engine = Arc::new(MockEngine::new());
        let client = client(engine.clone());

        client.connect("broker").unwrap();
        client.publish("time", b"Sat Jan  1 00:00:00 2000").unwrap();
        client.disconnect().unwrap();

        assert_eq!(engine.connect_calls(), 1);
        assert_eq!(engine.published().len(), 1);
    }

    #[test]
    fn test_operations_after_shutdown_fail_closed() {
        let engine = Arc::new(MockEngine::new());
        let mut client = client(engine);

        client.shutdown();
        let result = client.connect("broker");
        assert!(matches!(result, Err(SessionError::Closed { .. })));
        assert_eq!(crate::error::status(&result), errno::ESHUTDOWN);
    }
}
