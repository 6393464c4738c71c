//! A bottom module that moves bytes over a host UDP socket.
//!
//! `Bind`/`Raddr` control messages carry a 6-byte address payload (4-byte
//! IPv4 octets, big-endian, followed by a 2-byte big-endian port); every
//! other control code is logged and ignored. The read side polls the
//! socket non-blockingly from its service procedure rather than
//! blocking the single cooperative thread.
//!
//! Out of scope, same as the original module: retransmission, MTU
//! discovery, and anything else a production transport would add on top
//! of a raw datagram.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use pstreams_core::{
    ControlCode, LogLevel, MessageBlock, ModuleDescriptor, ModuleInfo, MsgType, PStreamsError,
    PStreamsResult, QueueProcs, Stream,
};

const MAX_DATAGRAM: usize = 2048;
const ADDR_PAYLOAD_LEN: usize = 6;

struct UdpArea {
    socket: UdpSocket,
    remote: Option<SocketAddrV4>,
}

fn decode_addr(payload: &[u8]) -> Option<SocketAddrV4> {
    if payload.len() < ADDR_PAYLOAD_LEN {
        return None;
    }
    let ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
    let port = u16::from_be_bytes([payload[4], payload[5]]);
    Some(SocketAddrV4::new(ip, port))
}

fn area_of(stream: &Stream, q: u32) -> *mut UdpArea {
    stream.queue(q).private as *mut UdpArea
}

fn open_shared(stream: &mut Stream, q: u32) -> PStreamsResult {
    let peer = stream.queue(q).peer;
    let shared = stream.queue(peer).private;
    let ptr = if shared.is_null() {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(|_| PStreamsError::SocketError)?;
        socket
            .set_nonblocking(true)
            .map_err(|_| PStreamsError::SocketError)?;
        let area = Box::into_raw(Box::new(UdpArea {
            socket,
            remote: None,
        }));
        area as *mut u8
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
        // The write side carved the box; only release it once, when the
        // second of the pair (whichever that is) closes.
        if stream.queue(peer).private.is_null() {
            // SAFETY: `ptr` was produced by `Box::into_raw` in `open_shared`
            // and is not aliased once both queues of the pair have closed.
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
    stream.queue_mut(q).private = core::ptr::null_mut();
    Ok(())
}

static WRITE_INFO: ModuleInfo = ModuleInfo {
    idname: "udp-device-wr",
    idnum: 40,
    min_pdu: 0,
    max_pdu: MAX_DATAGRAM as u32,
    hiwat: 8192,
    lowat: 2048,
};

static READ_INFO: ModuleInfo = ModuleInfo {
    idname: "udp-device-rd",
    idnum: 40,
    min_pdu: 0,
    max_pdu: MAX_DATAGRAM as u32,
    hiwat: 8192,
    lowat: 2048,
};

struct UdpWrite;

impl QueueProcs for UdpWrite {
    fn info(&self) -> &'static ModuleInfo {
        &WRITE_INFO
    }

    fn open(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        open_shared(stream, q)
    }

    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        // SAFETY: `msg` is a live, single-block message (caller contract).
        let msg_type = unsafe { (*msg).msg_type };
        if msg_type.is_control() {
            // SAFETY: `msg` carries at least the one-byte control code.
            let code_byte = unsafe { core::ptr::read((*msg).rptr()) };
            let area = area_of(stream, q);
            match ControlCode::from_byte(code_byte) {
                Some(ControlCode::Laddr) => {
                    // The socket already bound an ephemeral local port at
                    // `open`; `std::net::UdpSocket` has no rebind call, so
                    // a `Laddr` arriving after the fact can't be honored.
                    stream.log(
                        q,
                        LogLevel::Warning2,
                        "udp-device",
                        format_args!("Laddr has no effect once the socket is open"),
                    );
                    // Drain the payload so `freemsg` below frees a consumed
                    // message regardless of whether anyone inspects it.
                    let mut payload = [0u8; ADDR_PAYLOAD_LEN];
                    let _ = pstreams_core::msgread(msg, &mut payload);
                }
                Some(ControlCode::Raddr) | Some(ControlCode::Connect) => {
                    let mut payload = [0u8; ADDR_PAYLOAD_LEN];
                    let n = pstreams_core::msgread(msg, &mut payload);
                    match decode_addr(&payload[..n]) {
                        Some(remote) => {
                            // SAFETY: `area` is live.
                            unsafe { (*area).remote = Some(remote) };
                        }
                        None => {
                            stream.log(
                                q,
                                LogLevel::Error2,
                                "udp-device",
                                format_args!("malformed remote-address payload"),
                            );
                        }
                    }
                }
                Some(ControlCode::Close) | Some(ControlCode::Disconnect) => {
                    // SAFETY: `area` is live.
                    unsafe { (*area).remote = None };
                }
                _ => {
                    stream.log(
                        q,
                        LogLevel::Warning2,
                        "udp-device",
                        format_args!("unsupported control code {code_byte}"),
                    );
                }
            }
            stream.freemsg(msg);
            return Ok(());
        }

        let area = area_of(stream, q);
        // SAFETY: `area` is live for the duration of this call.
        let remote = unsafe { (*area).remote };
        let Some(remote) = remote else {
            stream.log(
                q,
                LogLevel::Warning2,
                "udp-device",
                format_args!("dropping datagram: no remote address set"),
            );
            stream.freemsg(msg);
            return Ok(());
        };

        let mut buf = [0u8; MAX_DATAGRAM];
        let n = pstreams_core::msgread(msg, &mut buf);
        // SAFETY: `area` is live.
        let sent = unsafe { (*area).socket.send_to(&buf[..n], remote) };
        stream.freemsg(msg);
        sent.map(|_| ()).map_err(|_| PStreamsError::SocketError)
    }

    fn close(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        close_shared(stream, q)
    }
}

struct UdpRead;

impl QueueProcs for UdpRead {
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
        loop {
            let next = stream.queue(q).next;
            if next == pstreams_core::QUEUE_NONE || !stream.canput(next) {
                return Ok(());
            }
            let mut buf = [0u8; MAX_DATAGRAM];
            // SAFETY: `area` is live for the duration of this call.
            let received = unsafe { (*area).socket.recv_from(&mut buf) };
            let n = match received {
                Ok((n, _from)) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(_) => return Err(PStreamsError::SocketError),
            };
            let msg = stream.allocb(n, 0, MsgType::Data)?;
            pstreams_core::msgwrite(msg, &buf[..n]);
            stream.putnext(next, msg)?;
        }
    }

    fn close(&self, stream: &mut Stream, q: u32) -> PStreamsResult {
        close_shared(stream, q)
    }
}

static UDP_WRITE: UdpWrite = UdpWrite;
static UDP_READ: UdpRead = UdpRead;

/// A device module backed by a host UDP socket. `Bind` sets the local
/// address; `Raddr`/`Connect` set the destination datagrams are sent to.
pub fn udp_device() -> ModuleDescriptor {
    ModuleDescriptor {
        write: &UDP_WRITE,
        read: &UDP_READ,
    }
}
