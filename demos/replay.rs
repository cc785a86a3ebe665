//! Replay a recorded capture through the decode pipeline.
//!
//! ```text
//! cargo run --example replay -- <capture.bin> <layout.txt> [config.yaml] [bytes-per-second]
//! ```
//!
//! The layout file holds the `key = value` lines understood by
//! `framewire::layout::settings`. Set `RUST_LOG=framewire=debug` for pipeline logs.

use anyhow::{Context, Result, bail};
use framewire::layout::settings::import_layout;
use framewire::transports::FileReplay;
use framewire::{Connection, ConnectionState, FramewireConfig, UpdateRate};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (capture, layout_path) = match args.as_slice() {
        [capture, layout, ..] => (capture, layout),
        _ => bail!("usage: replay <capture.bin> <layout.txt> [config.yaml] [bytes-per-second]"),
    };

    let layout_text = std::fs::read_to_string(layout_path)
        .with_context(|| format!("reading layout {layout_path}"))?;
    let layout = import_layout(layout_text.lines())?;

    let config = match args.get(2) {
        Some(path) => FramewireConfig::from_yaml_file(path)?,
        None => FramewireConfig::default(),
    };

    let mut transport = FileReplay::open(capture).await?;
    if let Some(rate) = args.get(3) {
        transport = transport.with_rate(rate.parse().context("bytes-per-second must be an integer")?);
    }

    let connection = Connection::start(config, layout, transport)?;
    let mut progress = connection.progress(UpdateRate::Max(4));
    while let Some(snapshot) = progress.next().await {
        info!(
            samples = snapshot.sample_count,
            checksum_failures = snapshot.checksum_failures,
            dropped_bytes = snapshot.dropped_bytes,
            "Progress"
        );
    }

    let store = connection.store();
    match connection.closed().await {
        ConnectionState::Disconnected { reason: Some(reason) } => bail!("replay failed: {reason}"),
        _ => info!(samples = store.sample_count(), channels = store.channel_count(), "Replay finished"),
    }

    for channel in 0..store.channel_count() {
        let block_start = store.sample_count().saturating_sub(1);
        if let Some((min, max)) = store.range_in_block(channel, block_start) {
            info!(channel, min, max, "Last block range");
        }
    }
    Ok(())
}
