//! Bounded signal ingestion channel.
//!
//! Producers (sensor adapters, the CLI's scripted world) push [`RawSignal`]s
//! through a [`SignalSender`]; the tick loop calls
//! [`SignalReceiver::drain`] once at the start of every tick. Sending never
//! blocks: when the buffer is full the *newest* signal is rejected and
//! counted, so a flood cannot stall a producer or starve older readings.
//! Signals that arrive while a tick is running stay queued for the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbiter_types::{ArbiterError, RawSignal};
use tokio::sync::mpsc;
use tracing::warn;

/// Create a bounded ingestion channel holding at most `capacity` signals.
pub fn signal_channel(capacity: usize) -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        SignalSender { tx, dropped: Arc::clone(&dropped) },
        SignalReceiver { rx, dropped },
    )
}

#[derive(Clone, Debug)]
pub struct SignalSender {
    tx: mpsc::Sender<RawSignal>,
    dropped: Arc<AtomicU64>,
}

impl SignalSender {
    /// Enqueue `signal` without waiting.
    ///
    /// A full buffer rejects this signal and bumps the drop counter; a closed
    /// channel is reported as [`ArbiterError::Channel`].
    pub fn send(&self, signal: RawSignal) -> Result<(), ArbiterError> {
        match self.tx.try_send(signal) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(signal = %rejected.name, dropped_total = total, "signal channel full, rejecting newest");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(ArbiterError::Channel("signal channel closed".to_string()))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct SignalReceiver {
    rx: mpsc::Receiver<RawSignal>,
    dropped: Arc<AtomicU64>,
}

impl SignalReceiver {
    /// Take everything currently buffered, without waiting.
    pub fn drain(&mut self) -> Vec<RawSignal> {
        let mut batch = Vec::new();
        while let Ok(signal) = self.rx.try_recv() {
            batch.push(signal);
        }
        batch
    }

    /// Signals rejected because the buffer was full, since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::Provenance;

    #[test]
    fn overflow_rejects_newest_and_counts() {
        let (tx, mut rx) = signal_channel(2);
        for i in 0..5 {
            tx.send(RawSignal::new(format!("s{i}"), 0.5, Provenance::Env)).unwrap();
        }
        let batch = rx.drain();
        let names: Vec<_> = batch.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["s0", "s1"]);
        assert_eq!(rx.dropped(), 3);
    }

    #[test]
    fn drain_on_empty_channel_returns_immediately() {
        let (_tx, mut rx) = signal_channel(4);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn signals_sent_after_drain_wait_for_next_drain() {
        let (tx, mut rx) = signal_channel(4);
        tx.send(RawSignal::new("a", 0.1, Provenance::Body)).unwrap();
        assert_eq!(rx.drain().len(), 1);
        tx.send(RawSignal::new("b", 0.2, Provenance::Body)).unwrap();
        let next = rx.drain();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].name, "b");
    }

    #[test]
    fn send_on_closed_channel_errors() {
        let (tx, rx) = signal_channel(1);
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.send(RawSignal::new("a", 0.1, Provenance::Body)).is_err());
    }
}
