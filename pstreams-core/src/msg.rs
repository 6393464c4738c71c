//! The message algebra: size-class allocation, duplication, copying,
//! pullup/link, consume/erase, sift/ctlexpress, and garbage collection.
//!
//! Functions that only need to read or rewrite cursors on an existing
//! chain (`msgsize`, `linkb`, `msgconsume`, ...) are free functions over
//! raw `*mut MessageBlock` chains. Functions that allocate or release
//! pool slots (`allocb`, `dupb`, `freemsg`, ...) are `Stream` methods,
//! since the pools they draw from belong to the stream.
//!
//! None of this calls the host allocator; every failure here is a pool
//! running out, surfaced as `PStreamsError::OutOfMemory` (or, for the
//! duplicate/copy family, a plain `None`, matching §8's "`dupb` at ref
//! count 255 returns null and leaves ref count unchanged").

use pstreams_abi::buf::EsBuf;
use pstreams_abi::error::{PStreamsError, PStreamsResult};
use pstreams_abi::types::{Band, MsgType};

use crate::block::{DataBlock, MessageBlock};
use crate::stream::Stream;

impl Stream {
    /// Allocate a message block sized for `size` bytes, picking the
    /// smallest enabled size class (or the inline buffer) that fits.
    pub fn allocb(
        &mut self,
        size: usize,
        band: Band,
        msg_type: MsgType,
    ) -> PStreamsResult<*mut MessageBlock> {
        let picked = self
            .pick_size_class(size)
            .ok_or(PStreamsError::OutOfMemory)?;
        let msg_ptr = self.alloc_msg_block().ok_or(PStreamsError::OutOfMemory)?;
        let db_ptr = match self.alloc_data_block() {
            Some(p) => p,
            None => {
                // SAFETY: `msg_ptr` was just allocated from this stream's pool.
                unsafe { self.release_msg_block(msg_ptr) };
                return Err(PStreamsError::OutOfMemory);
            }
        };
        match picked {
            None => {
                let fast_len = self.fast_buf_len();
                // SAFETY: `db_ptr` is freshly allocated, writable memory.
                unsafe { db_ptr.write(DataBlock::new_inline(msg_type, band, fast_len)) };
            }
            Some(class) => {
                let slot = match self.alloc_class_slot(class) {
                    Some(s) => s,
                    None => {
                        // SAFETY: both were just allocated from this stream's pools.
                        unsafe {
                            self.release_data_block(db_ptr);
                            self.release_msg_block(msg_ptr);
                        }
                        return Err(PStreamsError::OutOfMemory);
                    }
                };
                // SAFETY: `db_ptr` is freshly allocated; `slot` is valid for
                // `class.bytes()` bytes per `alloc_class_slot`'s contract.
                unsafe { db_ptr.write(DataBlock::new_pooled(msg_type, band, class, slot)) };
            }
        }
        // SAFETY: `msg_ptr` is freshly allocated; `db_ptr` now holds a live
        // data block.
        unsafe { msg_ptr.write(MessageBlock::new(db_ptr, msg_type, band)) };
        Ok(msg_ptr)
    }

    /// Like `allocb(0, ..)` but adopts a caller-provided payload; `es`'s
    /// free routine is invoked when the last reference drops.
    pub fn esballoc(
        &mut self,
        es: EsBuf,
        band: Band,
        msg_type: MsgType,
    ) -> PStreamsResult<*mut MessageBlock> {
        let msg_ptr = self.alloc_msg_block().ok_or(PStreamsError::OutOfMemory)?;
        let db_ptr = match self.alloc_data_block() {
            Some(p) => p,
            None => {
                // SAFETY: `msg_ptr` was just allocated from this stream's pool.
                unsafe { self.release_msg_block(msg_ptr) };
                return Err(PStreamsError::OutOfMemory);
            }
        };
        // SAFETY: `db_ptr` is freshly allocated; `es` carries its own
        // validity contract (checked by its unsafe constructor).
        unsafe {
            db_ptr.write(DataBlock::new_external(
                msg_type,
                band,
                es.ptr,
                es.len,
                es.free_fn,
                es.free_arg,
            ))
        };
        // SAFETY: see `allocb`.
        unsafe { msg_ptr.write(MessageBlock::new(db_ptr, msg_type, band)) };
        Ok(msg_ptr)
    }

    /// Allocate a fresh message block sharing `msg`'s data block
    /// (incrementing its reference count). `None` if the reference count
    /// is already at the 255 maximum.
    pub fn dupb(&mut self, msg: *mut MessageBlock) -> Option<*mut MessageBlock> {
        // SAFETY: `msg` is a live message block (caller contract).
        let db = unsafe { (*msg).db() };
        // SAFETY: `db` is live because `msg` references it.
        if !unsafe { (*db).incr_ref() } {
            return None;
        }
        let new_ptr = match self.alloc_msg_block() {
            Some(p) => p,
            None => {
                // SAFETY: undo the increment above; no new block was handed out.
                unsafe { (*db).decr_ref() };
                return None;
            }
        };
        // SAFETY: `new_ptr` is freshly allocated; copy cursors and band from
        // the original so the duplicate observes the same bytes.
        unsafe {
            let mut dup = MessageBlock::new(db, (*msg).msg_type, (*msg).band);
            dup.set_rptr((*msg).rptr());
            dup.set_wptr((*msg).wptr());
            new_ptr.write(dup);
        }
        Some(new_ptr)
    }

    /// Duplicate a whole continuation chain, block by block. Rolls back
    /// (frees the partial duplicate and releases acquired references) on
    /// failure.
    pub fn dupmsg(&mut self, msg: *mut MessageBlock) -> Option<*mut MessageBlock> {
        let mut head: *mut MessageBlock = core::ptr::null_mut();
        let mut tail: *mut MessageBlock = core::ptr::null_mut();
        let mut cur = msg;
        while !cur.is_null() {
            let Some(dup) = self.dupb(cur) else {
                self.freemsg(head);
                return None;
            };
            if tail.is_null() {
                head = dup;
            } else {
                // SAFETY: `tail` is the live last block appended so far.
                unsafe { (*tail).set_cont(dup) };
            }
            tail = dup;
            // SAFETY: `cur` is live (walked from `msg`).
            cur = unsafe { (*cur).cont() };
        }
        Some(head)
    }

    /// Duplicate exactly the first `n` bytes of `msg`, trimming the last
    /// duplicated block's write pointer.
    pub fn dupnmsg(&mut self, msg: *mut MessageBlock, n: usize) -> Option<*mut MessageBlock> {
        let mut head: *mut MessageBlock = core::ptr::null_mut();
        let mut tail: *mut MessageBlock = core::ptr::null_mut();
        let mut remaining = n;
        let mut cur = msg;
        while !cur.is_null() && remaining > 0 {
            let Some(dup) = self.dupb(cur) else {
                self.freemsg(head);
                return None;
            };
            // SAFETY: `dup` is a freshly duplicated, live block.
            let take = unsafe { (*dup).len() }.min(remaining);
            // SAFETY: `dup`'s rptr/wptr were copied from `cur`, both valid.
            unsafe {
                let rptr = (*dup).rptr();
                (*dup).set_wptr(rptr.add(take));
            }
            remaining -= take;
            if tail.is_null() {
                head = dup;
            } else {
                // SAFETY: `tail` is the live last block appended so far.
                unsafe { (*tail).set_cont(dup) };
            }
            tail = dup;
            // SAFETY: `cur` is live.
            cur = unsafe { (*cur).cont() };
        }
        Some(head)
    }

    /// Allocate a fresh data block and copy `msg`'s payload bytes into it,
    /// preserving band and type.
    pub fn copyb(&mut self, msg: *mut MessageBlock) -> Option<*mut MessageBlock> {
        // SAFETY: `msg` is live.
        let (len, band, msg_type) = unsafe { ((*msg).len(), (*msg).band, (*msg).msg_type) };
        let fresh = self.allocb(len, band, msg_type).ok()?;
        // SAFETY: `msg` and `fresh` are both live, non-overlapping blocks;
        // `fresh` was just sized to hold at least `len` bytes.
        unsafe {
            core::ptr::copy_nonoverlapping((*msg).rptr(), (*fresh).wptr(), len);
            (*fresh).advance_wptr(len);
        }
        Some(fresh)
    }

    /// `copyb` applied to an entire continuation chain.
    pub fn copymsg(&mut self, msg: *mut MessageBlock) -> Option<*mut MessageBlock> {
        let mut head: *mut MessageBlock = core::ptr::null_mut();
        let mut tail: *mut MessageBlock = core::ptr::null_mut();
        let mut cur = msg;
        while !cur.is_null() {
            let Some(copy) = self.copyb(cur) else {
                self.freemsg(head);
                return None;
            };
            if tail.is_null() {
                head = copy;
            } else {
                // SAFETY: `tail` is the live last block appended so far.
                unsafe { (*tail).set_cont(copy) };
            }
            tail = copy;
            // SAFETY: `cur` is live.
            cur = unsafe { (*cur).cont() };
        }
        Some(head)
    }

    /// Collapse the first `n` bytes (or the whole message, when `n` is
    /// `None`) of `msg` into one contiguous block, appending a fresh copy
    /// of whatever remains as a continuation. The original chain is
    /// freed — every byte has been copied into the result.
    pub fn msgpullup(
        &mut self,
        msg: *mut MessageBlock,
        n: Option<usize>,
    ) -> Option<*mut MessageBlock> {
        let total = msgsize(msg) as usize;
        let want = n.unwrap_or(total).min(total);
        // SAFETY: `msg` is live.
        let (band, msg_type) = unsafe { ((*msg).band, (*msg).msg_type) };
        let head = self.allocb(want, band, msg_type).ok()?;

        let mut remaining = want;
        let mut cur = msg;
        while !cur.is_null() && remaining > 0 {
            // SAFETY: `cur` is live.
            let take = unsafe { (*cur).len() }.min(remaining);
            // SAFETY: `cur` and `head` are both live, non-overlapping, and
            // `head` has capacity for the full `want` bytes.
            unsafe {
                core::ptr::copy_nonoverlapping((*cur).rptr(), (*head).wptr(), take);
                (*head).advance_wptr(take);
                let rptr = (*cur).rptr();
                (*cur).set_rptr(rptr.add(take));
            }
            remaining -= take;
            if unsafe { (*cur).is_empty() } {
                // SAFETY: `cur` is live.
                cur = unsafe { (*cur).cont() };
            }
        }

        let remainder = if cur.is_null() || unsafe { (*cur).is_empty() && (*cur).cont().is_null() }
        {
            None
        } else {
            match self.copymsg(cur) {
                Some(r) => Some(r),
                None => {
                    self.freeb(head);
                    self.freemsg(msg);
                    return None;
                }
            }
        };

        // SAFETY: `head` is live.
        unsafe { (*head).set_cont(remainder.unwrap_or(core::ptr::null_mut())) };
        self.freemsg(msg);
        Some(head)
    }

    /// Drop one reference to `msg`'s data block, releasing the payload and
    /// the data/message block slots once the reference count reaches
    /// zero. Does not follow `cont` — see `freemsg`.
    pub fn freeb(&mut self, msg: *mut MessageBlock) {
        if msg.is_null() {
            return;
        }
        // SAFETY: `msg` is a live, owned message block.
        let db = unsafe { (*msg).db() };
        // SAFETY: `db` is live because `msg` references it.
        let last = unsafe { (*db).decr_ref() };
        if last {
            // SAFETY: `db` is about to be released; external payloads run
            // their free routine exactly once, here.
            unsafe { (*db).run_external_free() };
            if let Some(class) = unsafe { (*db).pool_class() } {
                let base = unsafe { (*db).base() };
                // SAFETY: `base` came from `alloc_class_slot(class)` when
                // this data block was created.
                unsafe { self.release_class_slot(class, base) };
            }
            // SAFETY: `db` has zero references and was allocated from this
            // stream's data-block pool.
            unsafe { self.release_data_block(db) };
        }
        // SAFETY: `msg` was allocated from this stream's message-block pool.
        unsafe { self.release_msg_block(msg) };
    }

    /// Drop references along the entire continuation chain headed by
    /// `msg`.
    pub fn freemsg(&mut self, msg: *mut MessageBlock) {
        let mut cur = msg;
        while !cur.is_null() {
            // SAFETY: `cur` is live; read `cont` before `freeb` invalidates it.
            let next = unsafe { (*cur).cont() };
            self.freeb(cur);
            cur = next;
        }
    }

    /// Unchain `msg`'s continuation list, routing each block to list A or
    /// B per `discriminate`. A block the closure refuses (returns `Err`)
    /// is a fatal outcome: the partially unchained lists and whatever is
    /// left of the original chain are all freed, and `GeneralError` is
    /// returned.
    pub fn sift(
        &mut self,
        msg: *mut MessageBlock,
        mut discriminate: impl FnMut(*mut MessageBlock) -> Result<SiftRoute, ()>,
    ) -> PStreamsResult<(Option<*mut MessageBlock>, Option<*mut MessageBlock>)> {
        let mut a: (*mut MessageBlock, *mut MessageBlock) = (core::ptr::null_mut(), core::ptr::null_mut());
        let mut b: (*mut MessageBlock, *mut MessageBlock) = (core::ptr::null_mut(), core::ptr::null_mut());
        let mut cur = msg;
        while !cur.is_null() {
            // SAFETY: `cur` is live; read `cont` before detaching it below.
            let next = unsafe { (*cur).cont() };
            // SAFETY: `cur` is live.
            unsafe { (*cur).set_cont(core::ptr::null_mut()) };
            match discriminate(cur) {
                Ok(SiftRoute::A) => append(&mut a, cur),
                Ok(SiftRoute::B) => append(&mut b, cur),
                Err(()) => {
                    self.freemsg(a.0);
                    self.freemsg(b.0);
                    self.freeb(cur);
                    self.freemsg(next);
                    return Err(PStreamsError::GeneralError);
                }
            }
            cur = next;
        }
        let to_opt = |p: *mut MessageBlock| if p.is_null() { None } else { Some(p) };
        Ok((to_opt(a.0), to_opt(b.0)))
    }

    /// Specialized three-way split: `DATA` blocks accumulate into the
    /// returned data list for the caller's service procedure to drain;
    /// control blocks (`PROTO`/`CTL`/`IOCTL`/`DELIM`) are offered to
    /// `is_mine` — claimed ones go to the returned ctl list, unclaimed
    /// ones are forwarded immediately (each as its own single-block
    /// message) to `q`'s downstream neighbor, or queued on `q` itself if
    /// the neighbor can't currently accept.
    pub fn ctlexpress(
        &mut self,
        q: u32,
        msg: *mut MessageBlock,
        mut is_mine: impl FnMut(*mut MessageBlock) -> bool,
    ) -> PStreamsResult<(Option<*mut MessageBlock>, Option<*mut MessageBlock>)> {
        let mut ctl: (*mut MessageBlock, *mut MessageBlock) = (core::ptr::null_mut(), core::ptr::null_mut());
        let mut data: (*mut MessageBlock, *mut MessageBlock) = (core::ptr::null_mut(), core::ptr::null_mut());
        let mut cur = msg;
        while !cur.is_null() {
            // SAFETY: `cur` is live; read `cont` before detaching it below.
            let next = unsafe { (*cur).cont() };
            // SAFETY: `cur` is live.
            unsafe { (*cur).set_cont(core::ptr::null_mut()) };
            // SAFETY: `cur` is live for the duration of this call.
            let msg_type = unsafe { (*cur).msg_type };
            if msg_type.is_control() {
                if is_mine(cur) {
                    append(&mut ctl, cur);
                } else {
                    let next_q = self.queue(q).next;
                    if next_q != crate::queue::QUEUE_NONE && self.canput(next_q) {
                        let _ = self.putnext(next_q, cur);
                    } else {
                        self.putq(q, cur);
                    }
                }
            } else {
                append(&mut data, cur);
            }
            cur = next;
        }
        let to_opt = |p: *mut MessageBlock| if p.is_null() { None } else { Some(p) };
        Ok((to_opt(ctl.0), to_opt(data.0)))
    }

    /// Release every zero-byte block along `msg`'s continuation chain.
    /// Returns the surviving chain, starting with the first non-empty
    /// block (or `None` if every block was empty).
    pub fn garbage_collect(&mut self, msg: *mut MessageBlock) -> Option<*mut MessageBlock> {
        let mut head: *mut MessageBlock = core::ptr::null_mut();
        let mut tail: *mut MessageBlock = core::ptr::null_mut();
        let mut cur = msg;
        while !cur.is_null() {
            // SAFETY: `cur` is live; read `cont` before possibly freeing it.
            let next = unsafe { (*cur).cont() };
            if unsafe { (*cur).is_empty() } {
                unsafe { (*cur).set_cont(core::ptr::null_mut()) };
                self.freeb(cur);
            } else {
                unsafe { (*cur).set_cont(core::ptr::null_mut()) };
                if tail.is_null() {
                    head = cur;
                } else {
                    // SAFETY: `tail` is the live last surviving block.
                    unsafe { (*tail).set_cont(cur) };
                }
                tail = cur;
            }
            cur = next;
        }
        if head.is_null() {
            None
        } else {
            Some(head)
        }
    }
}

/// Outcome of `sift`'s per-block discriminator.
pub enum SiftRoute {
    A,
    B,
}

fn append(list: &mut (*mut MessageBlock, *mut MessageBlock), block: *mut MessageBlock) {
    if list.1.is_null() {
        list.0 = block;
    } else {
        // SAFETY: `list.1` is the live last block appended to this list.
        unsafe { (*list.1).set_cont(block) };
    }
    list.1 = block;
}

/// Append `tail` to the end of `msg`'s continuation chain.
///
/// # Safety
/// `msg` and `tail` must both be live, and `tail` must not already appear
/// in `msg`'s chain (no cycles).
pub unsafe fn linkb(msg: *mut MessageBlock, tail: *mut MessageBlock) {
    let mut cur = msg;
    loop {
        // SAFETY: `cur` is live per the caller's contract.
        let next = unsafe { (*cur).cont() };
        if next.is_null() {
            // SAFETY: see above.
            unsafe { (*cur).set_cont(tail) };
            return;
        }
        cur = next;
    }
}

/// Detach and return the head of `msg`'s continuation chain, leaving
/// `msg` a standalone single block.
///
/// # Safety
/// `msg` must be live.
pub unsafe fn unlinkb(msg: *mut MessageBlock) -> *mut MessageBlock {
    // SAFETY: caller's contract.
    let rest = unsafe { (*msg).cont() };
    // SAFETY: caller's contract.
    unsafe { (*msg).set_cont(core::ptr::null_mut()) };
    rest
}

/// Sum of `wptr - rptr` along `msg`'s continuation chain.
pub fn msgsize(msg: *mut MessageBlock) -> u32 {
    let mut total = 0u32;
    let mut cur = msg;
    while !cur.is_null() {
        // SAFETY: `cur` is live (walked from a caller-supplied chain).
        total += unsafe { (*cur).len() } as u32;
        cur = unsafe { (*cur).cont() };
    }
    total
}

/// Bytes held by the head block alone.
pub fn msg1size(msg: *mut MessageBlock) -> u32 {
    if msg.is_null() {
        return 0;
    }
    // SAFETY: `msg` is live.
    unsafe { (*msg).len() as u32 }
}

/// Sum of free write capacity (`db.limit - wptr`) along the chain.
/// Resolved as unsigned bytes (`u32`), per the spec's ambiguity
/// resolution between two incompatible prior revisions.
pub fn unwritbytes(msg: *mut MessageBlock) -> u32 {
    let mut total = 0u32;
    let mut cur = msg;
    while !cur.is_null() {
        // SAFETY: `cur` and its data block are both live.
        total += unsafe { (*cur).unwrit_bytes() } as u32;
        cur = unsafe { (*cur).cont() };
    }
    total
}

/// Free write capacity of the head block alone. Unsigned, see
/// `unwritbytes`.
pub fn unwrit1bytes(msg: *mut MessageBlock) -> u32 {
    if msg.is_null() {
        return 0;
    }
    // SAFETY: `msg` and its data block are live.
    unsafe { (*msg).unwrit_bytes() as u32 }
}

/// Copy payload bytes into `buf` without consuming them. Returns the
/// number of bytes copied.
pub fn msgread(msg: *mut MessageBlock, buf: &mut [u8]) -> usize {
    let mut copied = 0usize;
    let mut cur = msg;
    while !cur.is_null() && copied < buf.len() {
        // SAFETY: `cur` is live.
        let len = unsafe { (*cur).len() };
        let take = len.min(buf.len() - copied);
        // SAFETY: `cur.rptr()` is valid for `len` bytes; `take <= len` and
        // `buf[copied..]` has room for `take` bytes by construction.
        unsafe {
            core::ptr::copy_nonoverlapping((*cur).rptr(), buf.as_mut_ptr().add(copied), take);
        }
        copied += take;
        cur = unsafe { (*cur).cont() };
    }
    copied
}

/// Copy `buf` into the head block's free capacity (subsequent blocks must
/// be empty on entry). Returns the number of bytes that did not fit.
pub fn msgwrite(msg: *mut MessageBlock, buf: &[u8]) -> usize {
    if msg.is_null() {
        return buf.len();
    }
    // SAFETY: `msg` is live.
    let room = unsafe { (*msg).unwrit_bytes() };
    let take = room.min(buf.len());
    // SAFETY: `msg.wptr()` has at least `room` bytes of capacity, and
    // `take <= room`.
    unsafe {
        core::ptr::copy_nonoverlapping(buf.as_ptr(), (*msg).wptr(), take);
        (*msg).advance_wptr(take);
    }
    buf.len() - take
}

/// Advance read pointers by `n` bytes across the chain. Returns the
/// number of bytes that could not be consumed (chain held fewer than
/// `n` bytes).
pub fn msgconsume(msg: *mut MessageBlock, n: usize) -> usize {
    let mut remaining = n;
    let mut cur = msg;
    while !cur.is_null() && remaining > 0 {
        // SAFETY: `cur` is live.
        let take = unsafe { (*cur).len() }.min(remaining);
        unsafe { (*cur).advance_rptr(take) };
        remaining -= take;
        cur = unsafe { (*cur).cont() };
    }
    remaining
}

/// Retreat write pointers from the tail of the chain by `n` bytes.
/// Returns the number of bytes that could not be erased (the chain held
/// fewer than `n` bytes total).
pub fn msgerase(msg: *mut MessageBlock, n: usize) -> usize {
    erase_from_tail(msg, n)
}

fn erase_from_tail(msg: *mut MessageBlock, n: usize) -> usize {
    if msg.is_null() {
        return n;
    }
    // SAFETY: `msg` is live.
    let next = unsafe { (*msg).cont() };
    let remaining = erase_from_tail(next, n);
    if remaining == 0 {
        return 0;
    }
    // SAFETY: `msg` is live.
    let len = unsafe { (*msg).len() };
    let erase_here = remaining.min(len);
    // SAFETY: `msg` is live.
    unsafe { (*msg).retreat_wptr(erase_here) };
    remaining - erase_here
}

#[cfg(test)]
mod tests {
    use super::*;
    use pstreams_abi::config::StreamConfig;
    use pstreams_abi::types::HIPRI;

    fn test_stream(mem: &mut [u8], pmem: &mut [u8]) -> Stream {
        let device = crate::test_support::stub_device_descriptor();
        Stream::open(mem, pmem, StreamConfig::default(), device).unwrap()
    }

    #[test]
    fn allocb_picks_inline_then_falls_back_to_pool() {
        let mut mem = [0u8; 1 << 16];
        let mut pmem = [0u8; 1 << 16];
        let mut stream = test_stream(&mut mem, &mut pmem);
        let small = stream.allocb(2, 0, MsgType::Data).unwrap();
        // SAFETY: freshly allocated, still empty.
        assert!(unsafe { (*small).unwrit_bytes() } >= 2);
        let big = stream.allocb(40, 0, MsgType::Data).unwrap();
        // SAFETY: freshly allocated, still empty.
        assert!(unsafe { (*big).unwrit_bytes() } >= 40);
        stream.freeb(small);
        stream.freeb(big);
    }

    #[test]
    fn allocb_too_large_fails() {
        let mut mem = [0u8; 1 << 16];
        let mut pmem = [0u8; 1 << 16];
        let mut stream = test_stream(&mut mem, &mut pmem);
        let err = stream.allocb(100_000, 0, MsgType::Data).unwrap_err();
        assert_eq!(err, PStreamsError::OutOfMemory);
    }

    #[test]
    fn dupb_shares_data_block_and_respects_ref_cap() {
        let mut mem = [0u8; 1 << 16];
        let mut pmem = [0u8; 1 << 16];
        let mut stream = test_stream(&mut mem, &mut pmem);
        let msg = stream.allocb(4, HIPRI, MsgType::Data).unwrap();
        msgwrite(msg, b"ab");
        let dup = stream.dupb(msg).unwrap();
        assert_eq!(msgsize(dup), msgsize(msg));
        stream.freeb(msg);
        stream.freeb(dup);
    }

    #[test]
    fn copymsg_is_independent_of_original() {
        let mut mem = [0u8; 1 << 16];
        let mut pmem = [0u8; 1 << 16];
        let mut stream = test_stream(&mut mem, &mut pmem);
        let msg = stream.allocb(4, 0, MsgType::Data).unwrap();
        msgwrite(msg, b"ab");
        let copy = stream.copymsg(msg).unwrap();
        let mut buf = [0u8; 4];
        let n = msgread(copy, &mut buf);
        assert_eq!(&buf[..n], b"ab");
        stream.freemsg(msg);
        stream.freemsg(copy);
    }

    #[test]
    fn msgpullup_concatenates_a_chain() {
        let mut mem = [0u8; 1 << 16];
        let mut pmem = [0u8; 1 << 16];
        let mut stream = test_stream(&mut mem, &mut pmem);
        let a = stream.allocb(10, 0, MsgType::Data).unwrap();
        msgwrite(a, &[1u8; 10]);
        let b = stream.allocb(5, 0, MsgType::Data).unwrap();
        msgwrite(b, &[2u8; 5]);
        let c = stream.allocb(7, 0, MsgType::Data).unwrap();
        msgwrite(c, &[3u8; 7]);
        unsafe {
            linkb(a, b);
            linkb(a, c);
        }
        let pulled = stream.msgpullup(a, None).unwrap();
        assert_eq!(msgsize(pulled), 22);
        assert!(unsafe { (*pulled).cont().is_null() });
        stream.freemsg(pulled);
    }

    #[test]
    fn msgconsume_and_msgerase_report_shortfall() {
        let mut mem = [0u8; 1 << 16];
        let mut pmem = [0u8; 1 << 16];
        let mut stream = test_stream(&mut mem, &mut pmem);
        let msg = stream.allocb(8, 0, MsgType::Data).unwrap();
        msgwrite(msg, &[7u8; 8]);
        assert_eq!(msgconsume(msg, 3), 0);
        assert_eq!(msgsize(msg), 5);
        assert_eq!(msgconsume(msg, 10), 5);
        assert_eq!(msgsize(msg), 0);
        stream.freeb(msg);
    }

    #[test]
    fn ctlexpress_splits_data_ctl_and_forwards_unclaimed() {
        let mut mem = [0u8; 1 << 16];
        let mut pmem = [0u8; 1 << 16];
        let mut stream = test_stream(&mut mem, &mut pmem);

        let claimed = stream.allocb(1, 0, MsgType::Proto).unwrap();
        msgwrite(claimed, &[1u8]);
        let unclaimed = stream.allocb(1, 0, MsgType::Proto).unwrap();
        msgwrite(unclaimed, &[2u8]);
        let data = stream.allocb(4, 0, MsgType::Data).unwrap();
        msgwrite(data, b"ab");
        // SAFETY: all three blocks are freshly allocated and unlinked.
        unsafe {
            linkb(claimed, unclaimed);
            linkb(claimed, data);
        }

        let q = stream.app_wr();
        let (ctl, data_out) = stream
            .ctlexpress(q, claimed, |block| {
                // SAFETY: `block` is live for the duration of this call.
                unsafe { core::ptr::read((*block).rptr()) == 1 }
            })
            .unwrap();

        let ctl = ctl.unwrap();
        // SAFETY: `ctl` is live.
        assert!(unsafe { (*ctl).cont().is_null() });
        let mut byte = [0u8; 1];
        let n = msgread(ctl, &mut byte);
        assert_eq!(&byte[..n], &[1]);
        stream.freemsg(ctl);

        let data_out = data_out.unwrap();
        // SAFETY: `data_out` is live.
        assert!(unsafe { (*data_out).cont().is_null() });
        let mut buf = [0u8; 2];
        let n = msgread(data_out, &mut buf);
        assert_eq!(&buf[..n], b"ab");
        stream.freemsg(data_out);

        // The unclaimed control block was forwarded straight to the
        // downstream neighbor rather than ending up in either list.
        let dev_wr = stream.dev_wr();
        let forwarded = stream.getq(dev_wr).unwrap();
        let mut byte2 = [0u8; 1];
        let n = msgread(forwarded, &mut byte2);
        assert_eq!(&byte2[..n], &[2]);
        stream.freemsg(forwarded);
    }
}
