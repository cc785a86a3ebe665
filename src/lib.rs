//! Packet layout, byte-stream framing and parallel decoding for live telemetry.
//!
//! Framewire ingests a raw byte stream from a serial link, a socket or a
//! recorded capture, cuts it into fixed-size packets that start with a sync
//! word, validates their checksums and decodes every field into a
//! block-indexed sample store that readers can query while decoding runs.
//!
//! # Features
//!
//! - **Packet layouts**: typed field codecs, optional checksum, settings import/export
//! - **Resynchronizing framer**: recovers from garbage and partial packets
//! - **Parallel decoding**: barrier-synchronized worker pool with a serial fallback
//! - **Sample store**: per-block min/max ranges and optional eviction to disk
//! - **CSV ingest**: text telemetry through the same store
//!
//! ## Example (file replay)
//!
//! ```rust,no_run
//! use framewire::{Connection, FramewireConfig, PacketLayout, UpdateRate};
//! use framewire::transports::FileReplay;
//! use framewire::types::{Color, FieldCodec};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut layout = PacketLayout::new();
//!     layout.insert_field(1, FieldCodec::Uint16LsbFirst, "Voltage", Color::default(), "V", 1.0, 1.0)?;
//!
//!     let transport = FileReplay::open("/path/to/capture.bin").await?;
//!     let connection = Connection::start(FramewireConfig::default(), layout, transport)?;
//!
//!     let mut progress = connection.progress(UpdateRate::Max(10));
//!     while let Some(snapshot) = progress.next().await {
//!         println!("{} samples", snapshot.sample_count);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Layout and storage
pub mod config;
pub mod layout;
pub mod store;

// Decode pipeline
pub mod decoder;
pub mod framer;
pub mod notify;

// Stream-based ingest architecture
pub mod connection;
pub mod pump;
pub mod stream;
pub mod transport;
pub mod transports;

// Core exports
pub use error::*;
pub use types::*;

pub use config::FramewireConfig;
pub use connection::{Connection, ConnectionState};
pub use layout::PacketLayout;
pub use layout::csv::CsvLayout;
pub use notify::{Notification, NotificationSink};
pub use store::SampleStore;
pub use transport::Transport;
