//! Error types for telemetry ingest.
//!
//! Two layers of errors exist:
//!
//! - [`LayoutError`] is returned synchronously by the packet layout mutators
//!   (overlaps, misalignment, a full layout, ...). It never surfaces mid-decode.
//! - [`TelemetryError`] is the crate-wide error. Some variants are fatal to a
//!   connection (transport failures, buffer overflow, the sample limit) and end
//!   the decode loop; the rest describe failed operations the caller can retry
//!   or correct.
//!
//! Checksum mismatches, malformed CSV lines and framing noise are *not* errors:
//! they are recovered locally and reported through
//! [`NotificationSink`](crate::notify::NotificationSink).
//!
//! ```rust
//! use framewire::TelemetryError;
//!
//! let error = TelemetryError::transport_failed("serial port unplugged");
//! assert!(error.is_fatal());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for telemetry operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Rejections produced while editing a packet layout.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LayoutError {
    #[error("Byte 0 is reserved for the sync word")]
    SyncWordReserved,

    #[error("Layout is full: every byte before the checksum is assigned")]
    LayoutFull,

    #[error("Field at offset {offset} overlaps the checksum at offset {checksum_offset}")]
    OverlapsChecksum { offset: usize, checksum_offset: usize },

    #[error("Field at offset {offset} overlaps the existing field at offset {existing}")]
    OverlapsField { offset: usize, existing: usize },

    #[error("No field starts at offset {offset}")]
    NoFieldAt { offset: usize },

    #[error("A checksum is already defined")]
    ChecksumPresent,

    #[error("No checksum is defined")]
    ChecksumAbsent,

    #[error("Checksum at offset {offset} would precede or overlap fields ending before {packet_size}")]
    ChecksumBeforeFields { offset: usize, packet_size: usize },

    #[error("Checksum at offset {offset} is not aligned to its {width}-byte words")]
    ChecksumMisaligned { offset: usize, width: usize },

    #[error("Invalid conversion factors a={a}, b={b}")]
    InvalidConversion { a: f32, b: f32 },

    #[error("Binary field at offset {offset} has no codec")]
    MissingCodec { offset: usize },

    #[error("Column {column} would leave a gap (next free column is {next})")]
    ColumnGap { column: usize, next: usize },

    #[error("Sync word byte count must be 0 or 1, got {count}")]
    SyncWordByteCount { count: usize },
}

/// Main error type for telemetry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Invalid packet layout: {0}")]
    Layout(#[from] LayoutError),

    #[error("Telemetry file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport failed: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Buffer operation failed: {context}")]
    Buffer { context: String, buffered_bytes: usize },

    #[error("Byte stream is closed")]
    Closed,

    #[error("Maximum sample count reached ({limit})")]
    SampleLimit { limit: u64 },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Sample store failure: {context}")]
    Store {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Decode worker {worker} panicked")]
    WorkerPanicked { worker: usize },

    #[error("Failed to spawn {context}")]
    Spawn {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::Transport { .. } => true,
            TelemetryError::Buffer { .. } => true,
            TelemetryError::Layout(_) => false,
            TelemetryError::File { .. } => false,
            TelemetryError::Closed => false,
            TelemetryError::SampleLimit { .. } => false,
            TelemetryError::Parse { .. } => false,
            TelemetryError::Config { .. } => false,
            TelemetryError::Store { .. } => false,
            TelemetryError::WorkerPanicked { .. } => false,
            TelemetryError::Spawn { .. } => true,
            TelemetryError::Cancelled => false,
        }
    }

    /// Returns whether this error terminates the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TelemetryError::Transport { .. }
                | TelemetryError::Buffer { .. }
                | TelemetryError::SampleLimit { .. }
                | TelemetryError::Store { .. }
                | TelemetryError::WorkerPanicked { .. }
                | TelemetryError::Spawn { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TelemetryError::Layout(_) => vec![
                "Pick a free offset (see PacketLayout::first_available_offset)",
                "Remove the checksum before adding fields after it",
                "Check the checksum offset is aligned to its word width",
            ],
            TelemetryError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            TelemetryError::Transport { .. } => vec![
                "Check the device or socket is still connected",
                "Verify the baud rate or address",
                "Reconnect",
            ],
            TelemetryError::Buffer { .. } => vec![
                "Raise framer.max_buffered_bytes",
                "Verify the packet layout matches the device firmware",
                "Reduce the device transmit rate",
            ],
            TelemetryError::Closed => vec!["Open a new connection"],
            TelemetryError::SampleLimit { .. } => vec![
                "Export the acquired data and start a new connection",
                "Raise store.max_samples",
            ],
            TelemetryError::Parse { .. } => vec![
                "Check the settings lines follow the layout format",
                "Verify processor names are spelled exactly",
            ],
            TelemetryError::Config { .. } => vec![
                "Check configuration values against their documented ranges",
            ],
            TelemetryError::Store { .. } => vec![
                "Ensure the spill directory exists and is writable",
                "Ensure sufficient disk space",
            ],
            TelemetryError::WorkerPanicked { .. } => vec![
                "Report the panic message logged by the worker",
                "Restart the connection",
            ],
            TelemetryError::Spawn { .. } => vec![
                "Lower decoder.worker_count",
                "Check the process thread limit",
            ],
            TelemetryError::Cancelled => vec!["Restart the operation"],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        TelemetryError::File { path, source }
    }

    /// Helper constructor for transport failures.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        TelemetryError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport failures with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TelemetryError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for buffer operation errors.
    pub fn buffer_overflow(context: impl Into<String>, buffered_bytes: usize) -> Self {
        TelemetryError::Buffer { context: context.into(), buffered_bytes }
    }

    /// Helper constructor for parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        TelemetryError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        TelemetryError::Config { reason: reason.into() }
    }

    /// Helper constructor for spill file errors.
    pub fn store_error(context: impl Into<String>, source: std::io::Error) -> Self {
        TelemetryError::Store { context: context.into(), source }
    }
}
