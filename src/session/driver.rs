//! Background task that keeps the protocol engine alive
//!
//! Each cycle drives the engine's keepalive tick, then pumps inbound data
//! (which invokes the [`EventDispatcher`]), then sleeps the poll interval.
//! The loop never exits on engine errors; it stops only through its
//! [`DriverHandle`].

use super::dispatcher::EventDispatcher;
use crate::engine::{EngineError, ProtocolEngine};
use crate::error::Status;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn, Instrument};

/// How long `shutdown` waits for the loop before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Classification of a single tick or pump result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    /// Work was done
    Progressed,
    /// Nothing to do yet: would block, or no session established
    Idle,
    /// Unexpected failure, logged and otherwise ignored
    Failed(Status),
}

impl DriverOutcome {
    /// Classify an engine result (pure function)
    pub fn classify(result: &Result<(), EngineError>) -> Self {
        match result {
            Ok(()) => DriverOutcome::Progressed,
            Err(e) if e.is_benign() => DriverOutcome::Idle,
            Err(e) => DriverOutcome::Failed(e.code()),
        }
    }
}

/// Perpetual tick + pump loop for one engine
pub struct LivenessDriver<E: ProtocolEngine> {
    engine: Arc<E>,
    dispatcher: Arc<EventDispatcher>,
    interval: Duration,
}

impl<E: ProtocolEngine> LivenessDriver<E> {
    pub fn new(engine: Arc<E>, dispatcher: Arc<EventDispatcher>, interval: Duration) -> Self {
        Self {
            engine,
            dispatcher,
            interval,
        }
    }

    /// Run one tick + pump cycle without sleeping
    pub async fn step(&self) -> (DriverOutcome, DriverOutcome) {
        let tick = self.engine.tick().await;
        let tick_outcome = DriverOutcome::classify(&tick);
        match tick {
            Err(e) if tick_outcome != DriverOutcome::Idle => {
                warn!(code = e.code(), "engine tick failed: {}", e)
            }
            Err(e) => trace!("engine tick idle: {}", e),
            Ok(()) => {}
        }

        let pump = self.engine.pump_input(&self.dispatcher).await;
        let pump_outcome = DriverOutcome::classify(&pump);
        match pump {
            Err(e) if pump_outcome != DriverOutcome::Idle => {
                warn!(code = e.code(), "engine input failed: {}", e)
            }
            Err(e) => trace!("engine input idle: {}", e),
            Ok(()) => {}
        }

        (tick_outcome, pump_outcome)
    }

    /// Spawn the loop on the current tokio runtime
    pub fn spawn(self) -> DriverHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        dispatcher.signals().reopen_all();

        let span = crate::driver_span!(interval_ms = self.interval.as_millis() as u64);
        let handle = tokio::spawn(self.run(shutdown_rx).instrument(span));

        DriverHandle {
            shutdown_tx,
            handle: Some(handle),
            dispatcher,
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Liveness driver started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.step().await;

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Liveness driver stopped");
    }
}

/// Owner of a running liveness driver
pub struct DriverHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    dispatcher: Arc<EventDispatcher>,
}

impl DriverHandle {
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and fail any facade call still waiting on a signal
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => info!("Liveness driver shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Liveness driver ended with error: {}", e),
                Err(_) => warn!("Liveness driver didn't stop in time, aborting"),
                _ => {}
            }
        }

        self.dispatcher.signals().close_all();
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.dispatcher.signals().close_all();
        }
    }
}
