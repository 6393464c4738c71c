//! Message tags, priority bands, device selection, and device control codes.

/// An 8-bit priority tag on a message block. Band `HIPRI` (1) bypasses
/// flow control in `putmsg`.
pub type Band = u8;

/// Reserved band value meaning "bypass flow control" in `putmsg`/`esmsgput`.
pub const HIPRI: Band = 1;

/// The kind of content a message block carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Data = 0,
    Proto = 1,
    Ctl = 2,
    Ioctl = 3,
    Delim = 4,
}

impl MsgType {
    /// Control-class types routed by `ctlexpress`'s discriminator, as
    /// opposed to `Data`.
    #[inline]
    pub fn is_control(self) -> bool {
        !matches!(self, Self::Data)
    }
}

/// Which bottom (device) module `open` instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Null,
    Udp,
    Tcp,
}

/// One-byte function codes carried as `PROTO`/`CTL` messages downstream to
/// a device module, each followed by the option's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlCode {
    Raddr = 0,
    Laddr = 1,
    Sharefaddr = 2,
    Bind = 3,
    Connect = 4,
    Disconnect = 5,
    Close = 6,
}

impl ControlCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Raddr,
            1 => Self::Laddr,
            2 => Self::Sharefaddr,
            3 => Self::Bind,
            4 => Self::Connect,
            5 => Self::Disconnect,
            6 => Self::Close,
            _ => return None,
        })
    }
}
