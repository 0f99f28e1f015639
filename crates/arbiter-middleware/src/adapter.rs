//! Signal source adapters.
//!
//! The arbiter never talks to a game client, a robot driver or a chat relay
//! directly. Each of those is wrapped in a [`SignalSource`] that translates
//! its native traffic into [`RawSignal`]s; [`pump`] forwards the stream into
//! the bounded ingestion channel.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use arbiter_types::RawSignal;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::SignalSender;

/// Every signal-producing adapter implements this trait.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Stable name used in logs and heartbeats.
    fn name(&self) -> &str;

    /// A live stream of raw measurements. The stream ending means the source
    /// is exhausted.
    async fn signal_stream(&self) -> BoxStream<'static, RawSignal>;
}

/// Spawn a task forwarding `source` into `sender` until the stream ends or
/// the channel closes. Resolves to the number of signals forwarded.
pub fn pump(source: std::sync::Arc<dyn SignalSource>, sender: SignalSender) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let name = source.name().to_string();
        let mut stream = source.signal_stream().await;
        let mut forwarded = 0u64;
        while let Some(signal) = stream.next().await {
            if sender.send(signal).is_err() {
                debug!(source = %name, "ingestion channel closed, stopping pump");
                break;
            }
            forwarded += 1;
        }
        info!(source = %name, forwarded, "signal source finished");
        forwarded
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::signal_channel;
    use arbiter_types::Provenance;
    use futures_util::stream;
    use std::sync::Arc;

    struct FixedSource(Vec<RawSignal>);

    #[async_trait]
    impl SignalSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn signal_stream(&self) -> BoxStream<'static, RawSignal> {
            stream::iter(self.0.clone()).boxed()
        }
    }

    #[tokio::test]
    async fn pump_forwards_every_signal() {
        let (tx, mut rx) = signal_channel(16);
        let source = Arc::new(FixedSource(vec![
            RawSignal::new("hunger", 0.4, Provenance::Body),
            RawSignal::new("night", 1.0, Provenance::Env),
        ]));
        let forwarded = pump(source, tx).await.unwrap();
        assert_eq!(forwarded, 2);
        assert_eq!(rx.drain().len(), 2);
    }

    #[tokio::test]
    async fn pump_stops_when_channel_closes() {
        let (tx, rx) = signal_channel(16);
        drop(rx);
        let source = Arc::new(FixedSource(vec![RawSignal::new("hunger", 0.4, Provenance::Body)]));
        assert_eq!(pump(source, tx).await.unwrap(), 0);
    }
}
