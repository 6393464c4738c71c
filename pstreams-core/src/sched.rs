//! The cooperative service-procedure scheduler.

use pstreams_abi::error::PStreamsResult;

use crate::block::MessageBlock;
use crate::queue::QUEUE_NONE;
use crate::stream::Stream;

/// The framework's default service procedure: drain `q` for as long as
/// its downstream neighbor can accept more.
///
/// ```text
/// while canput(q.next):
///     msg = getq(q); if not msg: stop
///     if putnext(q, msg) fails: return failure
/// ```
pub fn default_srv(stream: &mut Stream, q: u32) -> PStreamsResult {
    loop {
        let next = stream.queue(q).next;
        if next == QUEUE_NONE || !stream.canput(next) {
            return Ok(());
        }
        let Some(msg) = stream.getq(q) else {
            return Ok(());
        };
        stream.putnext(next, msg)?;
    }
}

/// The generic "forward if possible, else buffer for the scheduler" put
/// procedure most pass-through modules (and the application write side)
/// use: a module's `put` must check `canput(next)` before `putnext`.
pub fn generic_put(stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
    let next = stream.queue(q).next;
    if next != QUEUE_NONE && stream.canput(next) {
        stream.putnext(next, msg)
    } else {
        stream.putq(q, msg);
        Ok(())
    }
}

/// Walk the downstream chain starting at `app-wr`, then the upstream
/// chain starting at `dev-rd`, calling each queue's service procedure.
/// The host calls this periodically (timer tick, event-loop turn, I/O
/// poll) — the framework never schedules itself. `now` is stashed on the
/// stream before the walk starts, so every `srv` call during this pass
/// observes the same clock reading via `Stream::now`.
pub fn call_srvp(stream: &mut Stream, now: u32) -> PStreamsResult {
    stream.set_now(now);
    let mut q = stream.app_wr();
    while q != QUEUE_NONE {
        run_srv(stream, q)?;
        q = stream.queue(q).next;
    }
    let mut q = stream.dev_rd();
    while q != QUEUE_NONE {
        run_srv(stream, q)?;
        q = stream.queue(q).next;
    }
    Ok(())
}

// Every queue's service procedure runs on every pass, not just when
// `enabled` is set: a timer-driven module like stop-and-wait must get a
// chance to check its retransmit clock even when flow control hasn't
// freed anything up. `enabled` remains a hint a `put`/`srv` implementation
// may consult; the scheduler itself does not gate on it.
fn run_srv(stream: &mut Stream, q: u32) -> PStreamsResult {
    let procs = stream.queue(q).procs.expect("queue has no procs");
    procs.srv(stream, q)
}
