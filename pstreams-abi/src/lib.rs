//! Shared, dependency-free types for the pstreams transport engine.
//!
//! Every other crate in the workspace depends on this one for the error
//! enum, the application-facing buffer descriptor, the message band/type
//! tags, and the enumerated stream configuration. Nothing here allocates
//! or touches any host facility.

#![no_std]

pub mod buf;
pub mod config;
pub mod error;
pub mod types;

pub use buf::{EsBuf, StrBuf};
pub use config::StreamConfig;
pub use error::{PStreamsError, PStreamsResult};
pub use types::{Band, ControlCode, DeviceKind, MsgType};
