//! Unified error type for the pstreams transport engine.
//!
//! Mirrors the error enum named in the application API: a small, flat set
//! of variants any layer of the stack can return, plus the `SocketError`/
//! `ProtocolError` pair reserved for device modules that wrap a host
//! transport.

use core::fmt;

/// Error produced by any pstreams operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PStreamsError {
    /// A pool (queue, message block, data block, or payload size class)
    /// was empty when an allocation was requested.
    OutOfMemory,
    /// `getmsg`'s caller-supplied buffer could not hold the dequeued
    /// message; the message has been restored at the head of the queue.
    ReadBufferTooSmall,
    /// Non-`HIPRI` `putmsg`/`esmsgput` while the application write queue
    /// cannot currently accept more data (flow control).
    Busy,
    /// A device module's underlying host socket call failed.
    SocketError,
    /// A device module observed a malformed or out-of-protocol frame.
    ProtocolError,
    /// Any other failure (module-open rejection, invariant violation
    /// surfaced as a recoverable error, unsupported device kind, ...).
    GeneralError,
}

impl fmt::Display for PStreamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "pool exhausted"),
            Self::ReadBufferTooSmall => write!(f, "caller buffer too small for dequeued message"),
            Self::Busy => write!(f, "write queue is flow-controlled"),
            Self::SocketError => write!(f, "device socket operation failed"),
            Self::ProtocolError => write!(f, "device observed a malformed frame"),
            Self::GeneralError => write!(f, "general stream error"),
        }
    }
}

/// Result alias used throughout the workspace; `T` defaults to `()` for
/// operations that only signal success or failure.
pub type PStreamsResult<T = ()> = Result<T, PStreamsError>;
