//! The layered message-passing core: pools, queues, the stream lifecycle,
//! the cooperative scheduler, the message algebra, and the application
//! surface built on top of them.
//!
//! Every allocation comes from a pool carved once out of caller-supplied
//! memory at `Stream::open` — nothing here ever touches the host
//! allocator, so the crate runs equally well as a kernel module's data
//! path or a hosted test harness. `std` is opt-in, pulled in only for
//! `Stream::set_log_file`.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod api;
mod block;
mod module;
mod msg;
mod queue;
mod sched;
mod stream;

#[cfg(test)]
mod test_support;

pub use block::{DataBlock, MessageBlock, Payload, SizeClass, FASTBUF_CAP};
pub use module::{ModuleDescriptor, ModuleInfo, QueueProcs};
pub use msg::{
    linkb, msg1size, msgconsume, msgerase, msgread, msgsize, msgwrite, unlinkb, unwrit1bytes,
    unwritbytes, SiftRoute,
};
pub use queue::{Queue, QueueArena, QueueFlags, QUEUE_NONE};
pub use sched::{call_srvp, default_srv, generic_put};
pub use stream::Stream;

pub use pstreams_abi::buf::{EsBuf, FreeFn, StrBuf};
pub use pstreams_abi::config::StreamConfig;
pub use pstreams_abi::error::{PStreamsError, PStreamsResult};
pub use pstreams_abi::types::{Band, ControlCode, DeviceKind, MsgType, HIPRI};
pub use pstreams_lib::logging::{LogLevel, LogSink};
