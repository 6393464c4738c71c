//! One direction of one module: a FIFO of queued messages, flow-control
//! watermarks, and the links that stitch a stream's queues into two
//! anti-parallel chains.
//!
//! Queues are carved once (at `open`) or on demand (at `push`) from a
//! [`pstreams_mm::Pool`] the same way message and data blocks are, but
//! `next`/`peer` are stored as `u32` indices into that pool rather than
//! raw pointers — the indices stay stable and comparable even though the
//! underlying storage is addressed by pointer, and a `QUEUE_NONE` index
//! reads the same as a null pointer would without needing `Option` at
//! every call site.

use pstreams_lib::logging::LogLevel;
use pstreams_mm::Pool;

use crate::block::MessageBlock;

/// Sentinel index meaning "no queue" (used for `next`/`peer` before
/// linking and after a queue is released).
pub const QUEUE_NONE: u32 = u32::MAX;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueFlags: u8 {
        /// Set when `getq` drains a queue to empty; expects the upstream
        /// neighbor to back-enable once it has more to offer.
        const WANTR = 0b0000_0001;
        /// Reserved for a write-side analogue of `WANTR`; not produced by
        /// any operation in this crate today, carried for symmetry with
        /// the flag set a module's `put`/`srv` procedures may consult.
        const WANTW = 0b0000_0010;
        /// Byte count has reached `hiwat`; `canput` returns false.
        const FULL = 0b0000_0100;
        /// This queue is the read-side queue of its module.
        const READR = 0b0000_1000;
        /// Suppress the scheduler-enable side effect of `putq`.
        const NOENB = 0b0001_0000;
    }
}

/// One direction of one module.
pub struct Queue {
    pub flags: QueueFlags,
    pub hiwat: u32,
    pub lowat: u32,
    byte_count: u32,
    msg_count: u32,
    head: *mut MessageBlock,
    tail: *mut MessageBlock,
    /// Next queue downstream (write side) or upstream (read side).
    pub next: u32,
    /// Same-module counterpart (write queue's peer is its read queue).
    pub peer: u32,
    /// Consulted by the scheduler; a queue with nothing to drain and no
    /// pending enable is skipped.
    pub enabled: bool,
    /// Per-queue log-trace filter; a call below this level never reaches
    /// the stream's sink.
    pub log_level: LogLevel,
    /// idnum of the module descriptor this queue belongs to, asserted
    /// against its peer on `pop`.
    pub module_id: u32,
    /// Module-private state carved from the stream's volatile region at
    /// `open`, opaque to the framework. Null until a module's `open` hook
    /// assigns it.
    pub private: *mut u8,
    /// The procedure set this queue dispatches `put`/`srv`/open/close
    /// through. `None` only for the four anchor queues before `open`
    /// finishes wiring them.
    pub procs: Option<&'static dyn crate::module::QueueProcs>,
}

impl Queue {
    fn empty(hiwat: u32, lowat: u32, read_side: bool, module_id: u32) -> Self {
        let mut flags = QueueFlags::empty();
        if read_side {
            flags |= QueueFlags::READR;
        }
        Self {
            flags,
            hiwat,
            lowat,
            byte_count: 0,
            msg_count: 0,
            head: core::ptr::null_mut(),
            tail: core::ptr::null_mut(),
            next: QUEUE_NONE,
            peer: QUEUE_NONE,
            enabled: false,
            log_level: LogLevel::Info1,
            module_id,
            private: core::ptr::null_mut(),
            procs: None,
        }
    }

    #[inline]
    pub fn byte_count(&self) -> u32 {
        self.byte_count
    }

    #[inline]
    pub fn msg_count(&self) -> u32 {
        self.msg_count
    }

    #[inline]
    pub fn is_read_side(&self) -> bool {
        self.flags.contains(QueueFlags::READR)
    }

    /// Append `msg` (a single logical message, possibly multi-block via
    /// `cont`) to the tail of this queue's FIFO and add `size` to the
    /// byte counter. Sets `FULL` at `hiwat`; marks the queue enabled if
    /// `WANTR` was set and `NOENB` is not.
    ///
    /// # Safety
    /// `msg` must be a live message block not already linked into any
    /// queue's FIFO.
    pub unsafe fn putq(&mut self, msg: *mut MessageBlock, size: u32) {
        // SAFETY: caller guarantees `msg` is live and unlinked.
        unsafe { (*msg).set_qnext(core::ptr::null_mut()) };
        if self.tail.is_null() {
            self.head = msg;
        } else {
            // SAFETY: `self.tail` is live whenever non-null.
            unsafe { (*self.tail).set_qnext(msg) };
        }
        self.tail = msg;
        self.msg_count += 1;
        self.byte_count += size;
        if self.byte_count >= self.hiwat {
            self.flags |= QueueFlags::FULL;
        }
        if self.flags.contains(QueueFlags::WANTR) && !self.flags.contains(QueueFlags::NOENB) {
            self.enabled = true;
        }
    }

    /// Head-insert variant of `putq`, used to restore a message a module
    /// dequeued but could not forward downstream.
    ///
    /// # Safety
    /// Same contract as `putq`.
    pub unsafe fn putbq(&mut self, msg: *mut MessageBlock, size: u32) {
        // SAFETY: caller guarantees `msg` is live and unlinked.
        unsafe { (*msg).set_qnext(self.head) };
        if self.tail.is_null() {
            self.tail = msg;
        }
        self.head = msg;
        self.msg_count += 1;
        self.byte_count += size;
        if self.byte_count >= self.hiwat {
            self.flags |= QueueFlags::FULL;
        }
        if self.flags.contains(QueueFlags::WANTR) && !self.flags.contains(QueueFlags::NOENB) {
            self.enabled = true;
        }
    }

    /// Remove the oldest message, subtract `size` from the byte counter,
    /// clear `FULL` once below `hiwat`, and set `WANTR` once the queue
    /// drains to empty. Returns `None` if the queue is empty.
    pub fn getq(&mut self, size_of: impl FnOnce(*mut MessageBlock) -> u32) -> Option<*mut MessageBlock> {
        if self.head.is_null() {
            return None;
        }
        let msg = self.head;
        // SAFETY: `msg` is the live head of this queue's FIFO.
        let next = unsafe { (*msg).qnext() };
        self.head = next;
        if next.is_null() {
            self.tail = core::ptr::null_mut();
        }
        self.msg_count -= 1;
        let size = size_of(msg);
        self.byte_count = self.byte_count.saturating_sub(size);
        if self.byte_count < self.lowat {
            self.flags.remove(QueueFlags::FULL);
        }
        if self.head.is_null() {
            self.flags.insert(QueueFlags::WANTR);
        }
        Some(msg)
    }

    /// `false` iff `FULL` is set; clearing `FULL` once the byte count has
    /// fallen below `lowat` is a documented side effect of calling this.
    pub fn canput(&mut self) -> bool {
        if self.byte_count < self.lowat {
            self.flags.remove(QueueFlags::FULL);
        }
        !self.flags.contains(QueueFlags::FULL)
    }

    /// Message count (not bytes) — used by `msgcount`/`mchk`.
    #[inline]
    pub fn qsize(&self) -> u32 {
        self.msg_count
    }
}

/// Fixed-capacity, index-addressed storage for all of a stream's queues.
///
/// Layered on top of [`Pool`] rather than duplicating its free-list logic:
/// allocation/release go through the pool, and `next`/`peer` handles are
/// this pool's slot indices, computed from its stable base address.
pub struct QueueArena {
    pool: Pool<Queue>,
}

impl QueueArena {
    pub fn carve(region: &mut pstreams_mm::Region, count: u32) -> Option<Self> {
        Pool::carve(region, count).map(|pool| Self { pool })
    }

    /// Allocate and initialize a fresh queue, returning its stable index.
    pub fn alloc(
        &mut self,
        hiwat: u32,
        lowat: u32,
        read_side: bool,
        module_id: u32,
    ) -> Option<u32> {
        let ptr = self.pool.alloc()?;
        let queue = Queue::empty(hiwat, lowat, read_side, module_id);
        // SAFETY: `ptr` was just allocated from the pool and is writable.
        unsafe { ptr.write(queue) };
        Some(self.pool.index_of_ptr(ptr))
    }

    /// Release the queue at `idx` back to the pool.
    ///
    /// # Safety
    /// The queue's FIFO must already be empty and its `private` state
    /// already released by the owning module's `close` hook.
    pub unsafe fn free(&mut self, idx: u32) {
        let ptr = self.ptr_of(idx);
        // SAFETY: caller's contract above; `ptr` was allocated by this arena.
        unsafe { self.pool.release(ptr) };
    }

    fn ptr_of(&self, idx: u32) -> *mut Queue {
        // SAFETY: `idx` is trusted to be a previously-allocated index.
        unsafe { self.pool.base_ptr().add(idx as usize) }
    }

    pub fn get(&self, idx: u32) -> &Queue {
        debug_assert_ne!(idx, QUEUE_NONE);
        // SAFETY: non-sentinel indices passed to `get`/`get_mut` always
        // name a currently-allocated queue (framework-internal invariant).
        unsafe { &*self.ptr_of(idx) }
    }

    pub fn get_mut(&mut self, idx: u32) -> &mut Queue {
        debug_assert_ne!(idx, QUEUE_NONE);
        // SAFETY: see `get`.
        unsafe { &mut *self.ptr_of(idx) }
    }

    pub fn get2_mut(&mut self, a: u32, b: u32) -> (&mut Queue, &mut Queue) {
        debug_assert_ne!(a, b, "get2_mut requires two distinct queues");
        let pa = self.ptr_of(a);
        let pb = self.ptr_of(b);
        // SAFETY: `a != b` so the two pointers are disjoint; both name
        // currently-allocated queues per the same invariant as `get`.
        unsafe { (&mut *pa, &mut *pb) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DataBlock;
    use pstreams_abi::types::MsgType;
    use pstreams_mm::Region;

    #[test]
    fn putq_sets_full_at_hiwat_and_wantr_on_drain() {
        let mut buf = [0u8; 8192];
        let mut region = unsafe { Region::new(&mut buf) };
        let mut arena = QueueArena::carve(&mut region, 4).unwrap();
        let idx = arena.alloc(64, 32, false, 1).unwrap();
        let q = arena.get_mut(idx);
        assert!(!q.flags.contains(QueueFlags::FULL));

        let mut db = DataBlock::new_inline(MsgType::Data, 0, 4);
        let mut mb = unsafe { MessageBlock::new(&mut db as *mut DataBlock, MsgType::Data, 0) };
        let msg = &mut mb as *mut MessageBlock;
        unsafe { q.putq(msg, 64) };
        assert!(q.flags.contains(QueueFlags::FULL));

        let popped = q.getq(|_| 64).unwrap();
        assert_eq!(popped, msg);
        assert!(q.flags.contains(QueueFlags::WANTR));
    }

    #[test]
    fn canput_clears_full_once_below_lowat() {
        let mut buf = [0u8; 8192];
        let mut region = unsafe { Region::new(&mut buf) };
        let mut arena = QueueArena::carve(&mut region, 4).unwrap();
        let idx = arena.alloc(64, 32, false, 1).unwrap();
        let q = arena.get_mut(idx);
        q.flags.insert(QueueFlags::FULL);
        q.byte_count = 40;
        assert!(!q.canput(), "still above lowat");
        q.byte_count = 20;
        assert!(q.canput(), "dropped below lowat, FULL should clear");
    }
}
