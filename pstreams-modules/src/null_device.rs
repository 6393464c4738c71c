//! A bottom module usable without any host transport facility.
//!
//! The write side buffers whatever it's handed and, on its service pass,
//! hands it straight to its peer's queue — "transmission" is just
//! delivery to the local receive path, the same trick the loopback
//! network device uses instead of touching a wire. The read side is a
//! plain forwarder (the trait's default `srv`).

use pstreams_core::{ModuleDescriptor, ModuleInfo, PStreamsResult, QueueProcs};
use pstreams_core::MessageBlock;
use pstreams_core::Stream;

static NULL_WR_INFO: ModuleInfo = ModuleInfo {
    idname: "null-device-wr",
    idnum: 20,
    min_pdu: 0,
    max_pdu: u32::MAX,
    hiwat: 1024,
    lowat: 256,
};

static NULL_RD_INFO: ModuleInfo = ModuleInfo {
    idname: "null-device-rd",
    idnum: 20,
    min_pdu: 0,
    max_pdu: u32::MAX,
    hiwat: 1024,
    lowat: 256,
};

struct NullDeviceWrite;

impl QueueProcs for NullDeviceWrite {
    fn info(&self) -> &'static ModuleInfo {
        &NULL_WR_INFO
    }

    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        stream.putq(q, msg);
        Ok(())
    }

    fn srv(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        loop {
            let peer = stream.queue(q).peer;
            if !stream.canput(peer) {
                return Ok(());
            }
            let Some(msg) = stream.getq(q) else {
                return Ok(());
            };
            stream.putq(peer, msg);
        }
    }
}

struct NullDeviceRead;

impl QueueProcs for NullDeviceRead {
    fn info(&self) -> &'static ModuleInfo {
        &NULL_RD_INFO
    }

    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        // Nothing upstream of the device normally calls this directly;
        // buffer defensively rather than assume it can't happen.
        stream.putq(q, msg);
        Ok(())
    }

    // `srv` uses the trait default: drain toward `next` (upward, toward
    // app-rd) whenever the neighbor can accept more.
}

static NULL_DEVICE_WRITE: NullDeviceWrite = NullDeviceWrite;
static NULL_DEVICE_READ: NullDeviceRead = NullDeviceRead;

/// A device module with no external dependency: whatever is written to
/// it comes back out the read side, in order, once `callSrvp` runs.
pub fn null_device() -> ModuleDescriptor {
    ModuleDescriptor {
        write: &NULL_DEVICE_WRITE,
        read: &NULL_DEVICE_READ,
    }
}
