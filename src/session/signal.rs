//! One-shot, resettable result signals
//!
//! A [`Signal`] carries a single `i32` from the context that observes a
//! protocol event to the context blocked on the matching request. A raise
//! that happens before anyone waits is kept until the next `wait` or
//! `reset`; a second raise before consumption overwrites the first.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Operation kinds that own a pending signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Connect,
    Disconnect,
    Publish,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [
        SignalKind::Connect,
        SignalKind::Disconnect,
        SignalKind::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Connect => "connect",
            SignalKind::Disconnect => "disconnect",
            SignalKind::Publish => "publish",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by signal operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    #[error("No signal raised within {0:?}")]
    Timeout(Duration),
    #[error("Signal closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Idle,
    Fired(i32),
    Closed,
}

/// One-shot notification carrying an integer result
#[derive(Debug)]
pub struct Signal {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
            notify: Notify::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        // The slot is a plain value, a panicking holder cannot leave it torn
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear any fired result. Idempotent; a closed signal stays closed.
    pub fn reset(&self) {
        let mut slot = self.slot();
        if let Slot::Fired(_) = *slot {
            *slot = Slot::Idle;
        }
    }

    /// Store `result` and wake one waiter
    pub fn raise(&self, result: i32) -> Result<(), SignalError> {
        {
            let mut slot = self.slot();
            if *slot == Slot::Closed {
                return Err(SignalError::Closed);
            }
            *slot = Slot::Fired(result);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// True when a result is waiting to be consumed
    pub fn is_fired(&self) -> bool {
        matches!(*self.slot(), Slot::Fired(_))
    }

    pub fn is_closed(&self) -> bool {
        *self.slot() == Slot::Closed
    }

    /// Consume a fired result without waiting
    pub fn try_take(&self) -> Option<Result<i32, SignalError>> {
        let mut slot = self.slot();
        match *slot {
            Slot::Idle => None,
            Slot::Fired(result) => {
                *slot = Slot::Idle;
                Some(Ok(result))
            }
            Slot::Closed => Some(Err(SignalError::Closed)),
        }
    }

    /// Wait up to `timeout` for a raise and consume its result
    pub async fn wait(&self, timeout: Duration) -> Result<i32, SignalError> {
        let raised = async {
            loop {
                // Register before checking so a raise or close in between is not lost
                let notified = self.notify.notified();
                if let Some(outcome) = self.try_take() {
                    return outcome;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, raised)
            .await
            .unwrap_or(Err(SignalError::Timeout(timeout)))
    }

    /// Fail current and future waits with [`SignalError::Closed`]
    pub fn close(&self) {
        *self.slot() = Slot::Closed;
        self.notify.notify_waiters();
    }

    /// Return a closed signal to idle
    pub fn reopen(&self) {
        let mut slot = self.slot();
        if *slot == Slot::Closed {
            *slot = Slot::Idle;
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// The three per-operation signals of one session
#[derive(Debug, Default)]
pub struct PendingSignals {
    connect: Signal,
    disconnect: Signal,
    publish: Signal,
}

impl PendingSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: SignalKind) -> &Signal {
        match kind {
            SignalKind::Connect => &self.connect,
            SignalKind::Disconnect => &self.disconnect,
            SignalKind::Publish => &self.publish,
        }
    }

    pub fn close_all(&self) {
        for kind in SignalKind::ALL {
            self.get(kind).close();
        }
    }

    pub fn reopen_all(&self) {
        for kind in SignalKind::ALL {
            self.get(kind).reopen();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_raise_then_wait_returns_value() {
        let signal = Signal::new();
        signal.raise(42).unwrap();

        assert_eq!(signal.wait(Duration::from_millis(10)).await, Ok(42));
        assert!(!signal.is_fired(), "wait consumes the result");
    }

    #[tokio::test]
    async fn test_wait_then_raise_from_other_task() {
        let signal = Arc::new(Signal::new());
        let raiser = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            raiser.raise(-3).unwrap();
        });

        assert_eq!(signal.wait(Duration::from_secs(1)).await, Ok(-3));
    }

    #[tokio::test]
    async fn test_second_raise_overwrites() {
        let signal = Signal::new();
        signal.raise(1).unwrap();
        signal.raise(2).unwrap();

        assert_eq!(signal.wait(Duration::from_millis(10)).await, Ok(2));
        assert_eq!(
            signal.wait(Duration::from_millis(10)).await,
            Err(SignalError::Timeout(Duration::from_millis(10)))
        );
    }

    #[tokio::test]
    async fn test_reset_never_fired_is_noop() {
        let signal = Signal::new();
        signal.reset();
        signal.reset();
        assert!(!signal.is_fired());

        signal.raise(5).unwrap();
        assert_eq!(signal.wait(Duration::from_millis(10)).await, Ok(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_unconsumed_result() {
        let signal = Signal::new();
        signal.raise(9).unwrap();
        signal.reset();

        // The stale permit left by the first raise must not leak a result
        assert_eq!(
            signal.wait(Duration::from_secs(5)).await,
            Err(SignalError::Timeout(Duration::from_secs(5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_then_wait_returns_next_raise() {
        let signal = Arc::new(Signal::new());
        signal.raise(9).unwrap();
        signal.reset();

        let raiser = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            raiser.raise(-5).unwrap();
        });

        let started = tokio::time::Instant::now();
        assert_eq!(signal.wait(Duration::from_secs(5)).await, Ok(-5));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let closer = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            closer.close();
        });

        assert_eq!(
            signal.wait(Duration::from_secs(5)).await,
            Err(SignalError::Closed)
        );
        assert_eq!(signal.raise(0), Err(SignalError::Closed));
    }

    #[tokio::test]
    async fn test_reset_keeps_closed_and_reopen_restores() {
        let signal = Signal::new();
        signal.close();
        signal.reset();
        assert!(signal.is_closed());

        signal.reopen();
        assert!(!signal.is_closed());
        signal.raise(0).unwrap();
        assert_eq!(signal.try_take(), Some(Ok(0)));
    }

    #[test]
    fn test_pending_signals_are_independent() {
        let signals = PendingSignals::new();
        signals.get(SignalKind::Publish).raise(7).unwrap();

        assert!(!signals.get(SignalKind::Connect).is_fired());
        assert!(!signals.get(SignalKind::Disconnect).is_fired());
        assert!(signals.get(SignalKind::Publish).is_fired());

        signals.close_all();
        assert!(SignalKind::ALL
            .iter()
            .all(|kind| signals.get(*kind).is_closed()));

        signals.reopen_all();
        assert!(SignalKind::ALL
            .iter()
            .all(|kind| !signals.get(*kind).is_closed()));
    }

    #[test]
    fn test_signal_kind_display() {
        assert_eq!(SignalKind::Connect.to_string(), "connect");
        assert_eq!(SignalKind::Disconnect.to_string(), "disconnect");
        assert_eq!(SignalKind::Publish.to_string(), "publish");
    }
}
