//! Cross-cutting primitives shared by the stream engine that are not
//! specific to pools, message blocks, or queues: per-stream logging and a
//! handful of small formatting helpers.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod logging;

pub use logging::{LogLevel, LogSink, NoopSink};

#[cfg(feature = "std")]
pub use logging::FileSink;
