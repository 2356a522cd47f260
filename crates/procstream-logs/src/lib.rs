//! Process log streaming for procstream
//!
//! This crate provides line parsing, the reconnecting process attachment,
//! and fan-out of parsed records to storage, live subscribers and alerts.

mod backoff;
mod broadcast;
mod parser;
mod pipeline;
mod source;
mod streamer;

#[cfg(test)]
mod testing;

pub use backoff::ReconnectPolicy;
pub use broadcast::{DEFAULT_SUBSCRIBER_CAPACITY, LogBroadcaster};
pub use parser::LogParser;
pub use pipeline::LogPipeline;
pub use source::{
    Attachment, LogSource, ProcessCommand, ProcessLogSource, SourceError, SourceEvent,
};
pub use streamer::{LogStreamer, StreamerSettings};

// Re-export types used in our public API
pub use procstream_types::{LogLevel, LogRecord, StreamKind, StreamerPhase, StreamerStatus};
