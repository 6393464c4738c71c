//! A bottom module that moves bytes over a host TCP connection.
//!
//! `std::net::TcpStream` folds socket-creation, binding, and connecting
//! into one call, so the four-state handshake the original device
//! tracked (`Init` → `Bind` → `Connect` → `Data`) collapses here to
//! "not yet connected" vs. "connected": `Raddr` records the peer to dial,
//! `Connect` performs the dial, `Disconnect` tears it down. `Laddr` is
//! accepted and recorded but cannot be honored without a lower-level
//! socket option `std` doesn't expose, so it is a no-op beyond logging —
//! documented, not silently dropped.
//!
//! Out of scope, same as the original module: partial-write retry
//! beyond a best-effort attempt, and anything else a production
//! transport would add on top of a raw stream.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};

use pstreams_core::{
    ControlCode, LogLevel, MessageBlock, ModuleDescriptor, ModuleInfo, MsgType, PStreamsError,
    PStreamsResult, QueueProcs, Stream,
};

const MAX_SEGMENT: usize = 2048;
const ADDR_PAYLOAD_LEN: usize = 6;

struct TcpArea {
    stream: Option<TcpStream>,
    laddr: Option<SocketAddrV4>,
    raddr: Option<SocketAddrV4>,
}

fn decode_addr(payload: &[u8]) -> Option<SocketAddrV4> {
    if payload.len() < ADDR_PAYLOAD_LEN {
        return None;
    }
    let ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
    let port = u16::from_be_bytes([payload[4], payload[5]]);
    Some(SocketAddrV4::new(ip, port))
}

fn area_of(stream: &Stream, q: u32) -> *mut TcpArea {
    stream.queue(q).private as *mut TcpArea
}

fn open_shared(stream: &mut Stream, q: u32) -> PStreamsResult {
    let peer = stream.queue(q).peer;
    let shared = stream.queue(peer).private;
    let ptr = if shared.is_null() {
        Box::into_raw(Box::new(TcpArea {
            stream: None,
            laddr: None,
            raddr: None,
        })) as *mut u8
    } else {
        shared
    };
    stream.queue_mut(q).private = ptr;
    Ok(())
}

fn close_shared(stream: &mut Stream, q: u32) -> PStreamsResult {
    while let Some(msg) = stream.getq(q) {
        stream.freemsg(msg);
    }
    let ptr = area_of(stream, q);
    if !ptr.is_null() {
        let peer = stream.queue(q).peer;
        if stream.queue(peer).private.is_null() {
            // SAFETY: `ptr` was produced by `Box::into_raw` in `open_shared`
            // and the peer side has already released its reference.
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
    stream.queue_mut(q).private = core::ptr::null_mut();
    Ok(())
}

static WRITE_INFO: ModuleInfo = ModuleInfo {
    idname: "tcp-device-wr",
    idnum: 41,
    min_pdu: 0,
    max_pdu: MAX_SEGMENT as u32,
    hiwat: 8192,
    lowat: 2048,
};

static READ_INFO: ModuleInfo = ModuleInfo {
    idname: "tcp-device-rd",
    idnum: 41,
    min_pdu: 0,
    max_pdu: MAX_SEGMENT as u32,
    hiwat: 8192,
    lowat: 2048,
};

struct TcpWrite;

impl QueueProcs for TcpWrite {
    fn info(&self) -> &'static ModuleInfo {
        &WRITE_INFO
    }

    fn open(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        open_shared(stream, q)
    }

    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        // SAFETY: `msg` is a live, single-block message (caller contract).
        let msg_type = unsafe { (*msg).msg_type };
        let area = area_of(stream, q);
        if msg_type.is_control() {
            // SAFETY: `msg` carries at least the one-byte control code.
            let code_byte = unsafe { core::ptr::read((*msg).rptr()) };
            match ControlCode::from_byte(code_byte) {
                Some(ControlCode::Laddr) => {
                    let mut payload = [0u8; ADDR_PAYLOAD_LEN];
                    let n = pstreams_core::msgread(msg, &mut payload);
                    // SAFETY: `area` is live.
                    unsafe { (*area).laddr = decode_addr(&payload[..n]) };
                    stream.log(
                        q,
                        LogLevel::Warning2,
                        "tcp-device",
                        format_args!("Laddr recorded but cannot be enforced before connect"),
                    );
                }
                Some(ControlCode::Raddr) => {
                    let mut payload = [0u8; ADDR_PAYLOAD_LEN];
                    let n = pstreams_core::msgread(msg, &mut payload);
                    // SAFETY: `area` is live.
                    unsafe { (*area).raddr = decode_addr(&payload[..n]) };
                }
                Some(ControlCode::Connect) => {
                    // SAFETY: `area` is live.
                    let raddr = unsafe { (*area).raddr };
                    match raddr {
                        Some(addr) => match TcpStream::connect(addr) {
                            Ok(s) => {
                                // SAFETY: `area` is live.
                                unsafe { (*area).stream = Some(s) };
                            }
                            Err(_) => {
                                stream.freemsg(msg);
                                return Err(PStreamsError::SocketError);
                            }
                        },
                        None => {
                            stream.log(
                                q,
                                LogLevel::Error2,
                                "tcp-device",
                                format_args!("Connect received with no Raddr set"),
                            );
                        }
                    }
                }
                Some(ControlCode::Disconnect) | Some(ControlCode::Close) => {
                    // SAFETY: `area` is live.
                    if let Some(s) = unsafe { (*area).stream.take() } {
                        let _ = s.shutdown(std::net::Shutdown::Both);
                    }
                }
                _ => {
                    stream.log(
                        q,
                        LogLevel::Warning2,
                        "tcp-device",
                        format_args!("unsupported control code {code_byte}"),
                    );
                }
            }
            stream.freemsg(msg);
            return Ok(());
        }

        // SAFETY: `area` is live.
        let connected = unsafe { (*area).stream.is_some() };
        if !connected {
            stream.log(
                q,
                LogLevel::Warning2,
                "tcp-device",
                format_args!("dropping segment: not connected"),
            );
            stream.freemsg(msg);
            return Ok(());
        }

        let mut buf = [0u8; MAX_SEGMENT];
        let n = pstreams_core::msgread(msg, &mut buf);
        // Blocking inside a transport syscall during `put` is the
        // framework's documented escape hatch for device modules.
        // SAFETY: `area` is live and `stream` was just confirmed `Some`.
        let result = unsafe { (*area).stream.as_mut().unwrap().write_all(&buf[..n]) };
        stream.freemsg(msg);
        result.map_err(|_| PStreamsError::SocketError)
    }

    fn close(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        close_shared(stream, q)
    }
}

struct TcpRead;

impl QueueProcs for TcpRead {
    fn info(&self) -> &'static ModuleInfo {
        &READ_INFO
    }

    fn open(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        open_shared(stream, q)
    }

    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        stream.putq(q, msg);
        Ok(())
    }

    fn srv(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        let area = area_of(stream, q);
        // SAFETY: `area` is live.
        let has_stream = unsafe { (*area).stream.is_some() };
        if !has_stream {
            return Ok(());
        }
        loop {
            let next = stream.queue(q).next;
            if next == pstreams_core::QUEUE_NONE || !stream.canput(next) {
                return Ok(());
            }
            // SAFETY: `area` is live and was just confirmed to hold a stream;
            // nonblocking mode is set once, below, before the first read.
            let s = unsafe { (*area).stream.as_mut().unwrap() };
            if s.set_nonblocking(true).is_err() {
                return Err(PStreamsError::SocketError);
            }
            let mut buf = [0u8; MAX_SEGMENT];
            match s.read(&mut buf) {
                Ok(0) => {
                    // Peer closed the connection cleanly.
                    // SAFETY: `area` is live.
                    unsafe { (*area).stream = None };
                    return Ok(());
                }
                Ok(n) => {
                    let msg = stream.allocb(n, 0, MsgType::Data)?;
                    pstreams_core::msgwrite(msg, &buf[..n]);
                    stream.putnext(next, msg)?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(_) => return Err(PStreamsError::SocketError),
            }
        }
    }

    fn close(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        close_shared(stream, q)
    }
}

static TCP_WRITE: TcpWrite = TcpWrite;
static TCP_READ: TcpRead = TcpRead;

/// A device module backed by a host TCP stream. `Raddr` records the peer
/// to dial; `Connect` performs the dial; `Disconnect`/`Close` shut it
/// down.
pub fn tcp_device() -> ModuleDescriptor {
    ModuleDescriptor {
        write: &TCP_WRITE,
        read: &TCP_READ,
    }
}
