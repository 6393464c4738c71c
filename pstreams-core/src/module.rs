//! The module authoring contract.
//!
//! A module is a pair of per-direction procedure sets, one per queue
//! direction, installed together by `Stream::push`. Each set is a
//! stateless capability trait object — per-instance state does not live
//! in the `impl`, it lives in the queue's `private` pointer, carved from
//! the stream's volatile region by the `open` hook (see
//! `Stream::assign_region`). That split is what lets the same `&'static`
//! procedure table back every queue of every stream that pushes the
//! module, with no heap allocation anywhere in the dispatch path.

use pstreams_abi::error::PStreamsResult;

use crate::block::MessageBlock;
use crate::stream::Stream;

/// Static facts about a module: identity, PDU size bounds, and the
/// watermarks newly pushed queues of this module are initialized with.
#[derive(Debug, Clone, Copy)]
pub struct ModuleInfo {
    pub idname: &'static str,
    pub idnum: u32,
    pub min_pdu: u32,
    pub max_pdu: u32,
    pub hiwat: u32,
    pub lowat: u32,
}

/// The procedure set for one direction (write or read) of one module.
///
/// Implementations are typically zero-sized marker types; all mutable
/// state flows through `stream` and the queue's `private` slot, never
/// through `&self`/`&mut self` here.
pub trait QueueProcs: Sync {
    fn info(&self) -> &'static ModuleInfo;

    /// Called at `push`. May carve per-queue state from the stream's
    /// volatile region via `stream.assign_region(..)` and store the
    /// result in `stream.queue_mut(q).private`.
    fn open(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        let _ = (stream, q);
        Ok(())
    }

    /// Called at `pop`. Must drain the queue's FIFO (`freemsg` everything
    /// still queued) and release any per-queue state it owns.
    fn close(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        let _ = (stream, q);
        Ok(())
    }

    /// Called synchronously by the upstream neighbor. Must forward (via
    /// `putnext` after `canput`), buffer (via `putq`), or consume
    /// (`freemsg`) — never drop `msg` without accounting for it.
    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult;

    /// Called by the scheduler. The default forwards everything it can,
    /// matching the framework's own default service procedure (§4.6).
    fn srv(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        crate::sched::default_srv(stream, q)
    }

    /// Optional debug hook reporting a module-specific counter.
    fn mchk(&self, stream: &Stream, q: u32) -> Option<u32> {
        let _ = (stream, q);
        None
    }
}

/// An installable module: one procedure set per direction.
#[derive(Clone, Copy)]
pub struct ModuleDescriptor {
    pub write: &'static dyn QueueProcs,
    pub read: &'static dyn QueueProcs,
}
