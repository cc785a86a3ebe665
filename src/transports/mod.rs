//! Built-in transports

pub mod file;
pub mod stream;

pub use file::FileReplay;
pub use stream::StreamTransport;
