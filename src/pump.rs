//! Pump moves transport bytes into the framer

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::PumpConfig;
use crate::framer::FramerWriter;
use crate::transport::Transport;
use crate::{Result, TelemetryError};

/// Summary of a finished pump task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpSummary {
    pub chunks: u64,
    pub bytes: u64,
    /// Whether the pump stopped because of cancellation rather than end of stream
    pub cancelled: bool,
}

/// Pump spawns the task feeding a framer from a transport
///
/// The task owns the transport. It closes the framer however it ends, so the
/// decode side always observes the end of the stream. When the framer backlog
/// is at its cap the task stops reading and waits for the decode side.
pub struct Pump;

impl Pump {
    /// Spawn the pump task on the current tokio runtime.
    pub fn spawn<T>(
        transport: T,
        writer: FramerWriter,
        config: PumpConfig,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<PumpSummary>>
    where
        T: Transport,
    {
        tokio::spawn(async move {
            let result = Self::pump_task(transport, &writer, &config, &cancel).await;
            writer.close();
            result
        })
    }

    async fn pump_task<T>(
        mut transport: T,
        writer: &FramerWriter,
        config: &PumpConfig,
        cancel: &CancellationToken,
    ) -> Result<PumpSummary>
    where
        T: Transport,
    {
        let source = transport.describe();
        info!(source = %source, "Pump task started");
        let mut summary = PumpSummary::default();
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(source = %source, "Pump cancelled");
                    summary.cancelled = true;
                    break;
                }
                result = transport.next_chunk() => result,
            };

            match result {
                Ok(Some(chunk)) => {
                    error_count = 0;
                    summary.chunks += 1;
                    summary.bytes += chunk.len() as u64;
                    trace!(chunk = summary.chunks, bytes = chunk.len(), "Chunk received");

                    let written = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!(source = %source, "Pump cancelled while waiting for framer space");
                            summary.cancelled = true;
                            break;
                        }
                        written = writer.write_async(&chunk) => written,
                    };
                    if let Err(e) = written {
                        if cancel.is_cancelled() {
                            summary.cancelled = true;
                            break;
                        }
                        error!(source = %source, error = %e, "Framer rejected bytes");
                        return Err(e);
                    }
                }
                Ok(None) => {
                    info!(source = %source, bytes = summary.bytes, "Transport stream ended");
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    error!(
                        source = %source,
                        "Transport error ({}/{}): {}",
                        error_count, config.max_errors, e
                    );

                    if error_count >= config.max_errors {
                        error!(source = %source, "Too many transport errors, shutting down");
                        return Err(TelemetryError::transport_failed_with_source(
                            format!("{source} failed {error_count} times in a row"),
                            Box::new(e),
                        ));
                    }

                    let backoff = config.backoff(error_count);
                    debug!(?backoff, "Retrying transport");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            summary.cancelled = true;
                            break;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(source = %source, chunks = summary.chunks, bytes = summary.bytes, "Pump task ended");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FramerConfig;
    use crate::framer::Framer;
    use std::collections::VecDeque;

    /// Scripted transport returning queued results, then end of stream.
    struct Scripted {
        script: VecDeque<Result<Option<Vec<u8>>>>,
    }

    #[async_trait::async_trait]
    impl Transport for Scripted {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn fast_retries(max_errors: u32) -> PumpConfig {
        PumpConfig { max_errors, backoff_base_ms: 1 }
    }

    #[tokio::test]
    async fn forwards_chunks_and_closes_framer() {
        let (writer, mut framer) = Framer::new(&FramerConfig::default());
        framer.set_packet_size(2);
        let transport = Scripted {
            script: VecDeque::from([Ok(Some(vec![0xAA, 1])), Ok(Some(vec![0xAA, 2]))]),
        };

        let summary = Pump::spawn(transport, writer, fast_retries(3), CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary, PumpSummary { chunks: 2, bytes: 4, cancelled: false });
        assert!(framer.is_closed());
        assert_eq!(framer.read_packets(0xAA, 1).count(), 2);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let (writer, framer) = Framer::new(&FramerConfig::default());
        let transport = Scripted {
            script: VecDeque::from([
                Err(TelemetryError::transport_failed("glitch")),
                Ok(Some(vec![1, 2, 3])),
            ]),
        };

        let summary = Pump::spawn(transport, writer, fast_retries(3), CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.bytes, 3);
        assert_eq!(framer.buffered_bytes(), 3);
    }

    #[tokio::test]
    async fn persistent_errors_fail_the_pump() {
        let (writer, framer) = Framer::new(&FramerConfig::default());
        let transport = Scripted {
            script: (0..5).map(|_| Err(TelemetryError::transport_failed("unplugged"))).collect(),
        };

        let err = Pump::spawn(transport, writer, fast_retries(2), CancellationToken::new())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Transport { .. }));
        assert!(framer.is_closed());
    }

    #[tokio::test]
    async fn slow_consumer_holds_back_the_transport() {
        let config = FramerConfig { max_buffered_bytes: 64 };
        let (writer, mut framer) = Framer::new(&config);
        framer.set_packet_size(4);

        // 40 chunks of 32 packets, each chunk twice the cap
        let chunks: VecDeque<Result<Option<Vec<u8>>>> = (0..40u32)
            .map(|chunk| {
                let bytes: Vec<u8> = (0..32u32).flat_map(|i| [0xAA, ((chunk * 32 + i) % 251) as u8, 0, 0]).collect();
                Ok(Some(bytes))
            })
            .collect();
        let total = chunks.len() as u64 * 128;

        let consumer = std::thread::spawn(move || {
            let mut framed = 0usize;
            loop {
                let count = framer.read_packets(0xAA, 1).count();
                if count == 0 {
                    if framer.is_exhausted() && framer.buffered_bytes() < 4 {
                        break;
                    }
                    framer.wait_for_data(std::time::Duration::from_millis(1));
                    continue;
                }
                framed += count;
            }
            (framed, framer.dropped_bytes())
        });

        let summary = Pump::spawn(Scripted { script: chunks }, writer, fast_retries(2), CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.bytes, total);
        assert!(!summary.cancelled);

        let (framed, dropped) = consumer.join().unwrap();
        assert_eq!(framed, 40 * 32);
        assert_eq!(dropped, 0);
    }

    #[tokio::test]
    async fn dropped_consumer_fails_the_pump() {
        let config = FramerConfig { max_buffered_bytes: 4 };
        let (writer, framer) = Framer::new(&config);
        drop(framer);
        let transport = Scripted { script: VecDeque::from([Ok(Some(vec![0; 8]))]) };

        let err = Pump::spawn(transport, writer, fast_retries(2), CancellationToken::new())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Closed));
    }

    #[tokio::test]
    async fn cancel_releases_a_pump_waiting_for_space() {
        let config = FramerConfig { max_buffered_bytes: 4 };
        let (writer, framer) = Framer::new(&config);
        let transport = Scripted { script: VecDeque::from([Ok(Some(vec![0; 8]))]) };
        let cancel = CancellationToken::new();

        let pump = Pump::spawn(transport, writer, fast_retries(2), cancel.clone());
        while framer.buffered_bytes() < 4 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let summary = pump.await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert!(framer.is_closed());
        assert_eq!(framer.buffered_bytes(), 4);
    }
}
