//! End-to-end exercises built from real streams: every pool, queue, and
//! module wiring here goes through the same public API a host embedding
//! this framework would use, never through crate-internal test hooks.

#[cfg(test)]
mod tests {

use pstreams_abi::config::StreamConfig;
use pstreams_core::{
    linkb, unlinkb, msgread, msgsize, unwrit1bytes, ControlCode, MsgType, PStreamsError,
    Stream, StrBuf, HIPRI,
};
use pstreams_modules::{null_device, saw_sequence_state, stop_and_wait};

fn open_stream(mem: &mut [u8], pmem: &mut [u8], config: StreamConfig) -> Stream {
    Stream::open(mem, pmem, config, null_device()).unwrap()
}

#[test]
fn echo_through_loopback_device() {
    // All size-class pools disabled; the inline buffer alone is sized to
    // carry the test's payload, since a zero-everywhere pool table would
    // make any allocation past a few bytes fail outright.
    let config = StreamConfig {
        pool_16_size: 0,
        pool_64_size: 0,
        pool_256_size: 0,
        pool_512_size: 0,
        pool_1792_size: 0,
        fast_buf_size: 32,
        ..StreamConfig::default()
    };
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, config);

    let payload = b"0123456789012345678901234567890 ";
    assert_eq!(payload.len(), 33);
    let payload = &payload[..32];

    stream.putmsg(&[], payload, 0).unwrap();
    pstreams_core::call_srvp(&mut stream, 0).unwrap();

    let mut ctl_buf = [0u8; 16];
    let mut data_buf = [0u8; 64];
    let mut ctl_out = StrBuf::new(&mut ctl_buf);
    let mut data_out = StrBuf::new(&mut data_buf);
    stream.getmsg(&mut ctl_out, &mut data_out).unwrap().unwrap();
    assert_eq!(data_out.len, 32);
    assert_eq!(data_out.filled(), payload);
}

#[test]
fn flow_control_busy_and_recovery() {
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, StreamConfig::default());

    // `putmsg`'s Busy check examines `app-wr` directly, and `generic_put`
    // only buffers there when the downstream neighbor can't accept. Wedge
    // `dev-wr` permanently full with a throwaway message so every
    // subsequent `putmsg` piles up on `app-wr` instead of draining past
    // it — standing in for "a module that never drains".
    let dev_wr = stream.dev_wr();
    stream.queue_mut(dev_wr).hiwat = 0;
    stream.queue_mut(dev_wr).lowat = 0;
    let blocker = stream.allocb(1, 0, MsgType::Data).unwrap();
    stream.putq(dev_wr, blocker);

    let app_wr = stream.app_wr();
    stream.queue_mut(app_wr).hiwat = 64;
    stream.queue_mut(app_wr).lowat = 32;

    let chunk = [7u8; 16];
    for i in 0..4 {
        stream.putmsg(&[], &chunk, 0).unwrap_or_else(|e| panic!("put {i} failed: {e:?}"));
    }
    let err = stream.putmsg(&[], &chunk, 0).unwrap_err();
    assert_eq!(err, PStreamsError::Busy);
    assert_eq!(stream.last_error(), Some(PStreamsError::Busy));

    // Drain enough to cross back below lowat (32): three 16-byte messages
    // takes the remaining byte count from 64 to 16.
    for _ in 0..3 {
        let msg = stream.getq(app_wr).unwrap();
        stream.freemsg(msg);
    }

    stream.putmsg(&[], &chunk, 0).unwrap();
}

#[test]
fn size_class_selection() {
    let config = StreamConfig {
        pool_16_size: 0,
        pool_64_size: 4,
        pool_256_size: 4,
        pool_512_size: 0,
        pool_1792_size: 0,
        fast_buf_size: 0,
        ..StreamConfig::default()
    };
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, config);

    let small = stream.allocb(40, 0, MsgType::Data).unwrap();
    // SAFETY: freshly allocated, still live.
    let cap = unsafe { (*(*small).db()).capacity() };
    assert_eq!(cap, 64);
    stream.freeb(small);

    let mid = stream.allocb(100, 0, MsgType::Data).unwrap();
    // SAFETY: freshly allocated, still live.
    let cap = unsafe { (*(*mid).db()).capacity() };
    assert_eq!(cap, 256);
    stream.freeb(mid);

    let err = stream.allocb(300, 0, MsgType::Data).unwrap_err();
    assert_eq!(err, PStreamsError::OutOfMemory);
}

#[test]
fn pullup_and_link() {
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, StreamConfig::default());

    let a = stream.allocb(10, 0, MsgType::Data).unwrap();
    pstreams_core::msgwrite(a, &[b'a'; 10]);
    let b = stream.allocb(5, 0, MsgType::Data).unwrap();
    pstreams_core::msgwrite(b, &[b'b'; 5]);
    let c = stream.allocb(7, 0, MsgType::Data).unwrap();
    pstreams_core::msgwrite(c, &[b'c'; 7]);
    // SAFETY: `a`, `b`, `c` are freshly allocated, unlinked, single blocks.
    unsafe {
        linkb(a, b);
        linkb(a, c);
    }

    let mut expected = Vec::new();
    expected.extend_from_slice(&[b'a'; 10]);
    expected.extend_from_slice(&[b'b'; 5]);
    expected.extend_from_slice(&[b'c'; 7]);

    let whole = stream.dupmsg(a).unwrap();
    let pulled = stream.msgpullup(whole, None).unwrap();
    assert_eq!(msgsize(pulled), 22);
    // SAFETY: `pulled` is live.
    assert!(unsafe { (*pulled).cont().is_null() });
    let mut buf = [0u8; 22];
    let n = msgread(pulled, &mut buf);
    assert_eq!(&buf[..n], &expected[..]);
    stream.freemsg(pulled);

    let partial = stream.msgpullup(a, Some(8)).unwrap();
    assert_eq!(msgsize(partial), 8);
    // SAFETY: `partial`'s continuation, if any, is live.
    let cont = unsafe { (*partial).cont() };
    assert!(!cont.is_null());
    assert_eq!(msgsize(cont), 14);
    let mut head_buf = [0u8; 8];
    let n = msgread(partial, &mut head_buf);
    assert_eq!(&head_buf[..n], &expected[..8]);
    let mut rest_buf = [0u8; 14];
    let n = msgread(cont, &mut rest_buf);
    assert_eq!(&rest_buf[..n], &expected[8..]);
    stream.freemsg(partial);
}

#[test]
fn saw_round_trip_over_loopback() {
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, StreamConfig::default());
    stream.push(stop_and_wait()).unwrap();

    let saw_wr = stream.queue(stream.app_wr()).next;
    assert_eq!(saw_sequence_state(&stream, saw_wr), Some((0, 0)));

    let payload = [42u8; 10];
    stream.putmsg(&[], &payload, 0).unwrap();

    // One pass frames and transmits the payload and carries the frame
    // back up through the loopback device to the read side, which
    // consumes the header, advances ackNo, and schedules an ack; a
    // second pass lets the write side observe that ack and advance its
    // sequence number from 0 to 1, per the worked scenario this is
    // grounded on. Start the clock at 1 rather than 0: a zero "schedule
    // ack for now" timer reads indistinguishably from "no ack scheduled".
    pstreams_core::call_srvp(&mut stream, 1).unwrap();
    assert_eq!(saw_sequence_state(&stream, saw_wr), Some((0, 1)));

    pstreams_core::call_srvp(&mut stream, 2).unwrap();
    assert_eq!(saw_sequence_state(&stream, saw_wr), Some((1, 1)));

    let mut ctl_buf = [0u8; 16];
    let mut data_buf = [0u8; 32];
    let mut ctl_out = StrBuf::new(&mut ctl_buf);
    let mut data_out = StrBuf::new(&mut data_buf);
    stream.getmsg(&mut ctl_out, &mut data_out).unwrap().unwrap();
    assert_eq!(data_out.len, 10);
    assert_eq!(data_out.filled(), &payload[..]);

    stream.pop().unwrap();
}

#[test]
fn read_buffer_too_small_then_succeeds() {
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, StreamConfig::default());

    let payload = [9u8; 100];
    stream.putmsg(&[], &payload, 0).unwrap();
    pstreams_core::call_srvp(&mut stream, 0).unwrap();

    let mut ctl_buf = [0u8; 16];
    let mut small_data = [0u8; 50];
    let mut ctl_out = StrBuf::new(&mut ctl_buf);
    let mut data_out = StrBuf::new(&mut small_data);
    let err = stream.getmsg(&mut ctl_out, &mut data_out).unwrap_err();
    assert_eq!(err, PStreamsError::ReadBufferTooSmall);
    assert_eq!(stream.msgcount(), 1);

    let mut ctl_buf2 = [0u8; 16];
    let mut big_data = [0u8; 100];
    let mut ctl_out2 = StrBuf::new(&mut ctl_buf2);
    let mut data_out2 = StrBuf::new(&mut big_data);
    stream.getmsg(&mut ctl_out2, &mut data_out2).unwrap().unwrap();
    assert_eq!(data_out2.len, 100);
    assert_eq!(data_out2.filled(), &payload[..]);
}

#[test]
fn push_then_pop_restores_queue_pool_freecount() {
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, StreamConfig::default());

    stream.push(stop_and_wait()).unwrap();
    let popped = stream.pop().unwrap();
    assert_eq!(popped, Some(30));
    assert_eq!(stream.pop().unwrap(), None);
}

#[test]
fn disconnect_control_message_is_claimed_by_saw() {
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, StreamConfig::default());
    stream.push(stop_and_wait()).unwrap();

    let below_app = stream.queue(stream.app_wr()).next;
    stream.putctl(below_app, MsgType::Proto, ControlCode::Disconnect).unwrap();
    let msg = stream.getq(below_app).unwrap();
    stream.putnext(below_app, msg).unwrap();

    stream.pop().unwrap();
}

#[test]
fn unwrit1bytes_and_unlinkb_report_expected_values() {
    let mut mem = [0u8; 1 << 16];
    let mut pmem = [0u8; 1 << 16];
    let mut stream = open_stream(&mut mem, &mut pmem, StreamConfig::default());

    let msg = stream.allocb(8, HIPRI, MsgType::Data).unwrap();
    pstreams_core::msgwrite(msg, b"ab");
    // SAFETY: `msg` is live and has at least 2 bytes of slack beyond "ab"
    // in an 8-byte-capable block.
    assert!(unwrit1bytes(msg) >= 6);

    let tail = stream.allocb(4, 0, MsgType::Data).unwrap();
    // SAFETY: both blocks are live and unlinked.
    unsafe { linkb(msg, tail) };
    // SAFETY: `msg` is live.
    let detached = unsafe { unlinkb(msg) };
    assert_eq!(detached, tail);
    // SAFETY: `msg` is live.
    assert!(unsafe { (*msg).cont().is_null() });

    stream.freeb(msg);
    stream.freeb(tail);
}

} // mod tests
