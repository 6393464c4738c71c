//! Minimal device module used only by this crate's own unit tests.
//!
//! The real device modules (`NullDevice`, `UdpDevice`, `TcpDevice`) live
//! one layer up in `pstreams-modules`, which depends on this crate — so
//! this crate cannot use them in its own test suite. This stub is just
//! enough of a bottom module to let `Stream::open` succeed: its write
//! side buffers everything it's handed, its read side does the same.

use pstreams_abi::error::PStreamsResult;

use crate::block::MessageBlock;
use crate::module::{ModuleDescriptor, ModuleInfo, QueueProcs};
use crate::stream::Stream;

struct StubDeviceProcs;

static STUB_INFO: ModuleInfo = ModuleInfo {
    idname: "stub-device",
    idnum: 9999,
    min_pdu: 0,
    max_pdu: u32::MAX,
    hiwat: 256,
    lowat: 128,
};

impl QueueProcs for StubDeviceProcs {
    fn info(&self) -> &'static ModuleInfo {
        &STUB_INFO
    }

    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        stream.putq(q, msg);
        Ok(())
    }
}

static STUB_DEVICE: StubDeviceProcs = StubDeviceProcs;

pub fn stub_device_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        write: &STUB_DEVICE,
        read: &STUB_DEVICE,
    }
}
