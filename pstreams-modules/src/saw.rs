//! Stop-and-wait: a worked example of a framing module. It imposes
//! acknowledged, in-order delivery of data over whatever sits below it,
//! at the cost of one outstanding message at a time.
//!
//! Both directions of one queue pair share a single [`SawArea`]: the
//! write queue's `open` carves it, and the read queue's `open` notices
//! its peer already has `private` set and reuses the pointer, the same
//! sharing convention any module may use for peer queues.

use core::mem::{align_of, size_of};

use pstreams_core::{
    ControlCode, LogLevel, MessageBlock, ModuleDescriptor, ModuleInfo, MsgType, PStreamsError,
    PStreamsResult, QueueProcs, SiftRoute, Stream,
};

const HEADER_LEN: usize = 2;
const DEFAULT_MAX_RETX: u32 = 1;
const DEFAULT_ACK_WAIT_TIMEOUT: u32 = 2000;
const DEFAULT_SEND_ACK_TIMEOUT: u32 = 0;

struct SawArea {
    seq_no: u8,
    ack_no: u8,
    ack_wait_timer: u32,
    send_ack_timer: u32,
    current_retx_count: u32,
    max_retx_count: u32,
    ack_wait_timeout: u32,
    send_ack_timeout: u32,
    /// A duplicate of the most recently transmitted, not-yet-acknowledged
    /// message, held purely for retransmission. Never itself handed to
    /// `putnext` — every transmission sends a fresh `dupmsg` of this, so
    /// the block actually in flight can be consumed downstream without
    /// invalidating this one.
    pending: *mut MessageBlock,
}

impl SawArea {
    fn reset(&mut self) {
        self.seq_no = 0;
        self.ack_no = 0;
        self.ack_wait_timer = 0;
        self.send_ack_timer = 0;
        self.current_retx_count = 0;
        self.max_retx_count = DEFAULT_MAX_RETX;
        self.ack_wait_timeout = DEFAULT_ACK_WAIT_TIMEOUT;
        self.send_ack_timeout = DEFAULT_SEND_ACK_TIMEOUT;
        self.pending = core::ptr::null_mut();
    }
}

static WRITE_INFO: ModuleInfo = ModuleInfo {
    idname: "saw-wr",
    idnum: 30,
    min_pdu: 0,
    max_pdu: u32::MAX,
    hiwat: 4096,
    lowat: 1024,
};

static READ_INFO: ModuleInfo = ModuleInfo {
    idname: "saw-rd",
    idnum: 30,
    min_pdu: 0,
    max_pdu: u32::MAX,
    hiwat: 4096,
    lowat: 1024,
};

fn area_of(stream: &Stream, q: u32) -> *mut SawArea {
    stream.queue(q).private as *mut SawArea
}

/// Current `(seqNo, ackNo)` of the queue pair sharing `q`'s area, or
/// `None` if `q` hasn't been opened with this module. Diagnostic use
/// only.
#[cfg(any(debug_assertions, feature = "diagnostics"))]
pub fn saw_sequence_state(stream: &Stream, q: u32) -> Option<(u8, u8)> {
    let area = area_of(stream, q);
    if area.is_null() {
        return None;
    }
    // SAFETY: `area` is live whenever non-null.
    Some(unsafe { ((*area).seq_no, (*area).ack_no) })
}

/// Allocate a two-byte header block carrying the area's current
/// `(seqNo, ackNo)`.
fn gethdr(stream: &mut Stream, area: *mut SawArea) -> PStreamsResult<*mut MessageBlock> {
    let hdr = stream.allocb(HEADER_LEN, 0, MsgType::Data)?;
    // SAFETY: `hdr` was just allocated with room for `HEADER_LEN` bytes
    // and is not yet visible to anything else.
    let written = unsafe {
        let seq = (*area).seq_no;
        let ack = (*area).ack_no;
        pstreams_core::msgwrite(hdr, &[seq, ack])
    };
    debug_assert_eq!(written, HEADER_LEN);
    Ok(hdr)
}

struct SawWrite;

impl QueueProcs for SawWrite {
    fn info(&self) -> &'static ModuleInfo {
        &WRITE_INFO
    }

    fn open(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        let peer = stream.queue(q).peer;
        let shared = stream.queue(peer).private;
        let area = if shared.is_null() {
            let raw = stream
                .assign_region(size_of::<SawArea>(), align_of::<SawArea>())
                .ok_or(PStreamsError::OutOfMemory)?;
            let area = raw as *mut SawArea;
            // SAFETY: `raw` is freshly carved, sized and aligned for
            // `SawArea`, and not yet aliased.
            unsafe { (*area).reset() };
            area
        } else {
            shared as *mut SawArea
        };
        stream.queue_mut(q).private = area as *mut u8;
        Ok(())
    }

    /// Sift control traffic away from data: data-only messages just join
    /// this queue's own FIFO for `srv` to frame and transmit; any control
    /// message is claimed here (there is nothing to negotiate, so every
    /// control code is accepted) and, for `Disconnect`, resets the
    /// protocol state back to its initial sequence numbers.
    ///
    /// `ctlexpress` isn't used here: this module claims every control
    /// code it sees, so there's never an unclaimed block for it to
    /// auto-forward, and the plain data/control split `sift` gives is
    /// all this `put` needs.
    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        let (ctl, data) = stream.sift(msg, |block| {
            // SAFETY: `block` is live for the duration of this call.
            if unsafe { (*block).msg_type }.is_control() {
                Ok(SiftRoute::A)
            } else {
                Ok(SiftRoute::B)
            }
        })?;
        if let Some(c) = ctl {
            // SAFETY: `c` is a single control block, non-empty per
            // `putctl`'s contract (the only way control codes are sent).
            let code = unsafe { core::ptr::read((*c).rptr()) };
            if ControlCode::from_byte(code) == Some(ControlCode::Disconnect) {
                let area = area_of(stream, q);
                // SAFETY: `area` was carved and initialized by `open`.
                unsafe { (*area).reset() };
            }
            stream.freemsg(c);
        }
        if let Some(d) = data {
            stream.putq(q, d);
        }
        Ok(())
    }

    fn srv(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        let area = area_of(stream, q);
        let now = stream.now();

        // SAFETY: `area` is live; reads below are simple field loads.
        let idling = unsafe { (*area).ack_wait_timer == 0 };

        let mut fresh_send = false;
        let mut transmit_now = false;

        if idling {
            if let Some(msg) = stream.getq(q) {
                // SAFETY: `area` is live; nothing else can observe `pending`
                // between this write and the transmit attempt below.
                unsafe { (*area).pending = msg };
                fresh_send = true;
                transmit_now = true;
            }
        } else {
            // SAFETY: see above.
            let deadline = unsafe { (*area).ack_wait_timer };
            if now > deadline {
                // SAFETY: see above.
                let budget_left = unsafe { (*area).current_retx_count < (*area).max_retx_count };
                if budget_left {
                    // SAFETY: see above.
                    let pending = unsafe { (*area).pending };
                    if !pending.is_null() {
                        transmit_now = true;
                        // SAFETY: see above.
                        unsafe { (*area).current_retx_count += 1 };
                    }
                } else {
                    stream.log(
                        q,
                        LogLevel::Error2,
                        "saw",
                        format_args!("retransmit budget exhausted, abandoning outstanding message"),
                    );
                }
            }
        }

        if transmit_now {
            // SAFETY: `area` is live and `pending` was just set non-null,
            // either above or by a previous pass.
            let pending = unsafe { (*area).pending };
            let next = stream.queue(q).next;
            if stream.canput(next) {
                // Send a disposable duplicate; `pending` stays intact so a
                // future retransmit or the eventual ack-free still has a
                // valid block to work with.
                let Some(dup) = stream.dupmsg(pending) else {
                    stream.log(
                        q,
                        LogLevel::Error2,
                        "saw",
                        format_args!("dupmsg failed, deferring transmission"),
                    );
                    return Ok(());
                };
                let hdr = gethdr(stream, area)?;
                // SAFETY: `hdr` was just allocated with no continuation,
                // and `dup` is a live, unlinked chain.
                unsafe { pstreams_core::linkb(hdr, dup) };
                stream.putnext(next, hdr)?;
                // SAFETY: `area` is live.
                unsafe {
                    (*area).send_ack_timer = 0;
                    (*area).ack_wait_timer = now.wrapping_add((*area).ack_wait_timeout);
                }
            } else if fresh_send {
                // Nothing transmitted yet; give the message back to the
                // queue instead of leaving it stranded only in `pending`.
                // SAFETY: `area` is live.
                unsafe { (*area).pending = core::ptr::null_mut() };
                stream.putbq(q, pending);
            }
        }

        // SAFETY: `area` is live.
        let send_ack_timer = unsafe { (*area).send_ack_timer };
        if send_ack_timer > 0 && now > send_ack_timer {
            let next = stream.queue(q).next;
            if stream.canput(next) {
                let hdr = gethdr(stream, area)?;
                stream.putnext(next, hdr)?;
                // SAFETY: `area` is live.
                unsafe { (*area).send_ack_timer = 0 };
            }
        }

        Ok(())
    }

    fn close(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        while let Some(msg) = stream.getq(q) {
            stream.freemsg(msg);
        }
        let area = area_of(stream, q);
        if !area.is_null() {
            // SAFETY: `pending` is either null or a message this queue
            // exclusively owns.
            let pending = unsafe { (*area).pending };
            if !pending.is_null() {
                stream.freemsg(pending);
            }
        }
        stream.queue_mut(q).private = core::ptr::null_mut();
        Ok(())
    }
}

struct SawRead;

impl QueueProcs for SawRead {
    fn info(&self) -> &'static ModuleInfo {
        &READ_INFO
    }

    fn open(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        let peer = stream.queue(q).peer;
        let shared = stream.queue(peer).private;
        debug_assert!(
            !shared.is_null(),
            "write side opens before read side and always carves the area first"
        );
        stream.queue_mut(q).private = shared;
        Ok(())
    }

    /// Parse the two-byte header, update sequencing state, and either
    /// enqueue the remaining payload upward (a fresh, in-order message)
    /// or discard it (a duplicate, stale, or header-only ack message).
    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        let area = area_of(stream, q);

        if pstreams_core::msgsize(msg) < HEADER_LEN as u32 {
            stream.freemsg(msg);
            return Ok(());
        }
        // SAFETY: `msg` is live and at least `HEADER_LEN` bytes were just
        // confirmed present at its front.
        let mut header = [0u8; HEADER_LEN];
        unsafe {
            core::ptr::copy_nonoverlapping((*msg).rptr(), header.as_mut_ptr(), HEADER_LEN);
        }
        pstreams_core::msgconsume(msg, HEADER_LEN);
        let remote_seq = header[0];
        let remote_ack = header[1];

        if remote_seq == 0 || remote_ack == 0 {
            // Either peer reset, or we did; resynchronize on their sequence.
            // SAFETY: `area` is live.
            unsafe { (*area).ack_no = remote_seq };
        }

        // SAFETY: `area` is live.
        let waiting_for_ack = unsafe { (*area).ack_wait_timer > 0 };
        if waiting_for_ack {
            // SAFETY: `area` is live.
            let expected = unsafe { ((*area).seq_no % 255) + 1 };
            if remote_ack == expected {
                // SAFETY: `area` is live.
                unsafe {
                    (*area).seq_no = remote_ack;
                    (*area).ack_wait_timer = 0;
                    (*area).current_retx_count = 0;
                    let pending = (*area).pending;
                    (*area).pending = core::ptr::null_mut();
                    if !pending.is_null() {
                        stream.freemsg(pending);
                    }
                }
            }
        }

        // SAFETY: `area` is live.
        let fresh = unsafe { (*area).ack_no == remote_seq };
        if fresh {
            // SAFETY: `area` is live.
            unsafe {
                (*area).ack_no = ((*area).ack_no % 255) + 1;
                (*area).send_ack_timer = stream.now().wrapping_add((*area).send_ack_timeout);
            }
            if pstreams_core::msgsize(msg) > 0 {
                stream.putq(q, msg);
            } else {
                stream.freemsg(msg);
            }
        } else {
            stream.freemsg(msg);
        }

        Ok(())
    }

    fn close(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        while let Some(msg) = stream.getq(q) {
            stream.freemsg(msg);
        }
        stream.queue_mut(q).private = core::ptr::null_mut();
        Ok(())
    }
}

static SAW_WRITE: SawWrite = SawWrite;
static SAW_READ: SawRead = SawRead;

/// Acknowledged, ordered, single-outstanding-message delivery over
/// whatever module or device sits below it.
pub fn stop_and_wait() -> ModuleDescriptor {
    ModuleDescriptor {
        write: &SAW_WRITE,
        read: &SAW_READ,
    }
}
