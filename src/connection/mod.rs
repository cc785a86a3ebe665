//! Connection lifecycle.
//!
//! A [`Connection`] wires a [`Transport`] to the decode pipeline:
//!
//! ```text
//! transport --(Pump task)--> FramerWriter ==> Framer --(decode thread)--> decoder --> SampleStore
//!                                                                            |
//!                                                              progress / state watch channels
//! ```
//!
//! Starting a connection locks the layout behind an `Arc`, so it cannot change
//! while samples are being decoded. The pump runs on the tokio runtime; the
//! decoder runs on a dedicated thread with its worker pool. Fatal errors from
//! either side end the connection and are reported as the disconnect reason.

use std::sync::Arc;
use std::thread::JoinHandle as ThreadHandle;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FramewireConfig;
use crate::decoder::{CsvDecoder, DecoderStats, ParallelDecoder};
use crate::framer::Framer;
use crate::layout::PacketLayout;
use crate::layout::csv::CsvLayout;
use crate::notify::{Notification, NotificationSink, RateLimitedSink, TracingSink};
use crate::pump::{Pump, PumpSummary};
use crate::store::SampleStore;
use crate::stream::CoalesceExt;
use crate::transport::Transport;
use crate::types::{Progress, UpdateRate};
use crate::{Result, TelemetryError};


/// Lifecycle state published by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// The connection ended; `reason` is set when it ended because of an error
    Disconnected { reason: Option<String> },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Decoder variant run by the decode thread.
enum Decoding {
    Binary { decoder: ParallelDecoder, sync_word: u8, sync_word_byte_count: usize },
    Csv { decoder: CsvDecoder },
}

/// A running ingest pipeline.
pub struct Connection {
    store: Arc<SampleStore>,
    state: watch::Receiver<ConnectionState>,
    progress: watch::Receiver<Progress>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<ConnectionState>>,
    source: String,
}

impl Connection {
    /// Start decoding binary packets described by `layout` from `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: Transport>(config: FramewireConfig, layout: PacketLayout, transport: T) -> Result<Self> {
        Self::start_with_sink(config, layout, transport, Arc::new(TracingSink))
    }

    /// Like [`start`](Self::start), reporting notifications to `sink`.
    pub fn start_with_sink<T: Transport>(
        config: FramewireConfig,
        layout: PacketLayout,
        transport: T,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        if layout.packet_size() > config.framer.max_buffered_bytes {
            return Err(TelemetryError::config_error(format!(
                "packet size {} exceeds framer.max_buffered_bytes {}",
                layout.packet_size(),
                config.framer.max_buffered_bytes
            )));
        }
        let layout = Arc::new(layout);
        let store = Arc::new(SampleStore::new(layout.channel_count(), &config.store)?);
        let sink = rate_limited(&config, sink);

        let decoder = ParallelDecoder::new(
            Arc::clone(&layout),
            Arc::clone(&store),
            config.decoder.worker_count(),
            Arc::clone(&sink),
        )?;
        let decoding = Decoding::Binary {
            decoder,
            sync_word: layout.sync_word(),
            sync_word_byte_count: layout.sync_word_byte_count(),
        };

        info!(
            packet_size = layout.packet_size(),
            channels = layout.channel_count(),
            source = %transport.describe(),
            "Starting binary connection"
        );
        Self::spawn(config, layout.packet_size(), decoding, store, transport, sink)
    }

    /// Start decoding CSV lines described by `layout` from `transport`.
    pub fn start_csv<T: Transport>(config: FramewireConfig, layout: CsvLayout, transport: T) -> Result<Self> {
        Self::start_csv_with_sink(config, layout, transport, Arc::new(TracingSink))
    }

    /// Like [`start_csv`](Self::start_csv), reporting notifications to `sink`.
    pub fn start_csv_with_sink<T: Transport>(
        config: FramewireConfig,
        layout: CsvLayout,
        transport: T,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = Arc::new(layout);
        let store = Arc::new(SampleStore::new(layout.channel_count(), &config.store)?);
        let sink = rate_limited(&config, sink);
        let decoder = CsvDecoder::new(Arc::clone(&layout), Arc::clone(&store), Arc::clone(&sink));

        info!(columns = layout.channel_count(), source = %transport.describe(), "Starting CSV connection");
        Self::spawn(config, 0, Decoding::Csv { decoder }, store, transport, sink)
    }

    fn spawn<T: Transport>(
        config: FramewireConfig,
        packet_size: usize,
        decoding: Decoding,
        store: Arc<SampleStore>,
        transport: T,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let (writer, mut framer) = Framer::new(&config.framer);
        framer.set_packet_size(packet_size);

        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(Progress::default());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let source = transport.describe();

        let decode_cancel = cancel.clone();
        let poll = config.decoder.poll_interval();
        let decode_thread = std::thread::Builder::new()
            .name("framewire-dispatch".to_string())
            .spawn(move || {
                let result = decode_loop(decoding, framer, &decode_cancel, &progress_tx, poll);
                if let Err(e) = &result {
                    error!(error = %e, "Decode loop failed");
                    decode_cancel.cancel();
                }
                result
            })
            .map_err(|e| TelemetryError::Spawn { context: "decode thread".to_string(), source: e })?;

        let pump = Pump::spawn(transport, writer, config.pump.clone(), cancel.clone());
        let supervisor = tokio::spawn(supervise(pump, decode_thread, state_tx, sink, cancel.clone()));

        Ok(Self { store, state: state_rx, progress: progress_rx, cancel, supervisor: Some(supervisor), source })
    }

    /// Read access to the decoded samples.
    pub fn store(&self) -> Arc<SampleStore> {
        Arc::clone(&self.store)
    }

    /// Description of the transport.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Stream of state changes, starting with the current state.
    pub fn state_changes(&self) -> impl Stream<Item = ConnectionState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Latest progress snapshot.
    pub fn latest_progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Stream of progress snapshots at most as often as `rate` allows.
    pub fn progress(&self, rate: UpdateRate) -> impl Stream<Item = Progress> + 'static {
        let snapshots = WatchStream::new(self.progress.clone());
        match rate.interval() {
            None => snapshots.boxed(),
            Some(interval) => snapshots.coalesce(interval).boxed(),
        }
    }

    /// Wait until the connection ends on its own.
    pub async fn closed(&self) -> ConnectionState {
        let mut receiver = self.state.clone();
        match receiver.wait_for(|state| !state.is_connected()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Stop the pump and the decoder, join every thread and return the final state.
    pub async fn disconnect(mut self) -> ConnectionState {
        info!(source = %self.source, "Disconnecting");
        self.cancel.cancel();
        match self.supervisor.take() {
            Some(supervisor) => supervisor.await.unwrap_or_else(|e| ConnectionState::Disconnected {
                reason: Some(format!("supervisor task failed: {e}")),
            }),
            None => self.state(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(source = %self.source, "Dropping connection");
        self.cancel.cancel();
    }
}

fn rate_limited(config: &FramewireConfig, sink: Arc<dyn NotificationSink>) -> Arc<dyn NotificationSink> {
    Arc::new(RateLimitedSink::new(sink, config.notifications.rate_limit()))
}

/// Wait for the pump and the decode thread, then publish the final state.
async fn supervise(
    pump: JoinHandle<Result<PumpSummary>>,
    decode_thread: ThreadHandle<Result<DecoderStats>>,
    state_tx: watch::Sender<ConnectionState>,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) -> ConnectionState {
    let pump_result = pump.await;
    if !matches!(pump_result, Ok(Ok(_))) {
        // The decoder still drains what the pump delivered before failing.
        debug!("Pump ended abnormally, waiting for decoder to drain");
    }

    let decode_result = tokio::task::spawn_blocking(move || decode_thread.join()).await;

    let reason = match (decode_result, pump_result) {
        (Ok(Ok(Err(e))), _) => Some(e.to_string()),
        (Ok(Err(_)), _) | (Err(_), _) => Some("decode thread panicked".to_string()),
        (_, Ok(Err(e))) => Some(e.to_string()),
        (_, Err(e)) => Some(format!("pump task failed: {e}")),
        (Ok(Ok(Ok(stats))), Ok(Ok(summary))) => {
            info!(
                packets = stats.packets_decoded,
                checksum_failures = stats.checksum_failures,
                bytes = summary.bytes,
                cancelled = summary.cancelled || cancel.is_cancelled(),
                "Connection finished"
            );
            None
        }
    };

    if let Some(reason) = &reason {
        warn!(reason = %reason, "Connection ended with an error");
    }
    cancel.cancel();

    let state = ConnectionState::Disconnected { reason: reason.clone() };
    sink.notify(Notification::Disconnected { reason }, 0);
    state_tx.send_replace(state.clone());
    state
}

fn decode_loop(
    mut decoding: Decoding,
    mut framer: Framer,
    cancel: &CancellationToken,
    progress: &watch::Sender<Progress>,
    poll: std::time::Duration,
) -> Result<DecoderStats> {
    debug!("Decode loop started");
    let mut malformed_lines = 0;

    loop {
        if cancel.is_cancelled() {
            debug!("Decode loop cancelled");
            break;
        }

        let (advanced, store, stats) = match &mut decoding {
            Decoding::Binary { decoder, sync_word, sync_word_byte_count } => {
                let packets = framer.read_packets(*sync_word, *sync_word_byte_count);
                let advanced = if packets.is_empty() { 0 } else { decoder.decode(packets)? };
                (advanced > 0, Arc::clone(decoder.store()), decoder.stats())
            }
            Decoding::Csv { decoder } => {
                let advanced = match framer.read_line(poll)? {
                    Some(line) => {
                        decoder.decode_line(&line)?;
                        true
                    }
                    None => false,
                };
                malformed_lines = decoder.malformed_lines();
                (advanced, Arc::clone(decoder.store()), decoder.stats())
            }
        };

        progress.send_if_modified(|current| {
            let next = Progress {
                sample_count: store.sample_count(),
                checksum_failures: stats.checksum_failures,
                malformed_lines,
                dropped_bytes: framer.dropped_bytes(),
            };
            let changed = *current != next;
            *current = next;
            changed
        });

        if !advanced {
            if framer.is_exhausted() && framer.buffered_bytes() < framer.packet_size().max(1) {
                debug!("Byte stream exhausted");
                break;
            }
            if matches!(decoding, Decoding::Binary { .. }) {
                framer.wait_for_data(poll);
            }
        }
    }

    let stats = match &mut decoding {
        Decoding::Binary { decoder, .. } => {
            decoder.shutdown();
            decoder.stats()
        }
        Decoding::Csv { decoder } => decoder.stats(),
    };
    debug!(packets = stats.packets_decoded, "Decode loop ended");
    Ok(stats)
}
