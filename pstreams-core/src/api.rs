//! The application surface: `putmsg`, `esmsgput`, `getmsg`, `msgcount`,
//! and log-sink installation.
//!
//! This is the one place the sticky last-error field is written (besides
//! `open`/`push`/`pop` in `stream.rs`) — every other layer returns a
//! plain `PStreamsResult` and lets its caller decide what to do with it.

use pstreams_abi::buf::{EsBuf, StrBuf};
use pstreams_abi::error::{PStreamsError, PStreamsResult};
use pstreams_abi::types::{Band, MsgType, HIPRI};

use crate::msg::SiftRoute;
use crate::stream::Stream;

impl Stream {
    /// Hand a control/data buffer pair to the stream head. Fails with
    /// `Busy` if `flags != HIPRI` and the application write queue cannot
    /// currently accept more data.
    pub fn putmsg(&mut self, ctl_buf: &[u8], data_buf: &[u8], flags: Band) -> PStreamsResult {
        let app_wr = self.app_wr();
        if flags != HIPRI && !self.canput(app_wr) {
            return Err(self.set_last_error(PStreamsError::Busy));
        }
        let ctl = match self.allocb(ctl_buf.len(), flags, MsgType::Proto) {
            Ok(m) => m,
            Err(e) => return Err(self.set_last_error(e)),
        };
        crate::msg::msgwrite(ctl, ctl_buf);
        let data = match self.allocb(data_buf.len(), 0, MsgType::Data) {
            Ok(m) => m,
            Err(e) => {
                self.freeb(ctl);
                return Err(self.set_last_error(e));
            }
        };
        crate::msg::msgwrite(data, data_buf);
        // SAFETY: `ctl` and `data` are both freshly allocated, unlinked
        // message blocks.
        unsafe { crate::msg::linkb(ctl, data) };
        match self.putnext(app_wr, ctl) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.set_last_error(e)),
        }
    }

    /// Like `putmsg`, but adopts the data buffer via `esballoc` instead of
    /// copying it; `es`'s free routine is mandatory and runs once the
    /// last reference drops.
    pub fn esmsgput(&mut self, ctl_buf: &[u8], es: EsBuf, flags: Band) -> PStreamsResult {
        let app_wr = self.app_wr();
        if flags != HIPRI && !self.canput(app_wr) {
            return Err(self.set_last_error(PStreamsError::Busy));
        }
        let ctl = match self.allocb(ctl_buf.len(), flags, MsgType::Proto) {
            Ok(m) => m,
            Err(e) => return Err(self.set_last_error(e)),
        };
        crate::msg::msgwrite(ctl, ctl_buf);
        let es_len = es.len;
        let data = match self.esballoc(es, 0, MsgType::Data) {
            Ok(m) => m,
            Err(e) => {
                self.freeb(ctl);
                return Err(self.set_last_error(e));
            }
        };
        // SAFETY: `data`'s data block was just adopted with `es_len` bytes
        // of caller-owned payload.
        unsafe { (*data).advance_wptr(es_len) };
        // SAFETY: `ctl` and `data` are both freshly allocated, unlinked
        // message blocks.
        unsafe { crate::msg::linkb(ctl, data) };
        match self.putnext(app_wr, ctl) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.set_last_error(e)),
        }
    }

    /// Dequeue at most one message from `app-rd`, split it into control
    /// and data halves, and copy each into the caller's buffers.
    ///
    /// Returns `Ok(None)` if `app-rd` is empty, `Ok(Some(band))` on
    /// success (`band` is the control block's band), or
    /// `Err(ReadBufferTooSmall)` (with the message restored at the head
    /// of `app-rd`) if either output buffer cannot hold its half.
    pub fn getmsg(
        &mut self,
        ctl_out: &mut StrBuf<'_>,
        data_out: &mut StrBuf<'_>,
    ) -> PStreamsResult<Option<Band>> {
        if let Some(e) = self.last_error() {
            return Err(e);
        }
        let app_rd = self.app_rd();
        let Some(msg) = self.getq(app_rd) else {
            return Ok(None);
        };
        let (ctl, data) = match self.sift(msg, |m| {
            // SAFETY: `m` is live for the duration of this call.
            let is_ctl = unsafe { (*m).msg_type }.is_control();
            Ok(if is_ctl { SiftRoute::A } else { SiftRoute::B })
        }) {
            Ok(pair) => pair,
            Err(e) => return Err(self.set_last_error(e)),
        };

        let ctl_size = ctl.map(crate::msg::msgsize).unwrap_or(0) as usize;
        let data_size = data.map(crate::msg::msgsize).unwrap_or(0) as usize;
        if ctl_size > ctl_out.maxlen || data_size > data_out.maxlen {
            let restored = match (ctl, data) {
                (Some(c), Some(d)) => {
                    // SAFETY: both halves are live, freshly unchained blocks.
                    unsafe { crate::msg::linkb(c, d) };
                    c
                }
                (Some(c), None) => c,
                (None, Some(d)) => d,
                (None, None) => return Ok(None),
            };
            self.putbq(app_rd, restored);
            return Err(self.set_last_error(PStreamsError::ReadBufferTooSmall));
        }

        // SAFETY: `ctl`, when present, is a live message block.
        let band = ctl.map(|c| unsafe { (*c).band }).unwrap_or(0);
        let ctl_cap = ctl_out.maxlen;
        let data_cap = data_out.maxlen;
        if let Some(c) = ctl {
            ctl_out.len = crate::msg::msgread(c, &mut ctl_out.buf[..ctl_cap]);
            self.freemsg(c);
        } else {
            ctl_out.len = 0;
        }
        if let Some(d) = data {
            data_out.len = crate::msg::msgread(d, &mut data_out.buf[..data_cap]);
            self.freemsg(d);
        } else {
            data_out.len = 0;
        }
        Ok(Some(band))
    }

    /// Message count at `app-rd`.
    pub fn msgcount(&self) -> u32 {
        self.qsize(self.app_rd())
    }
}

#[cfg(feature = "std")]
impl Stream {
    /// Install a `FileSink` writing to `path` as this stream's log sink.
    /// The sink is leaked (kept alive for the process's remaining
    /// lifetime) since `Stream` only ever holds a `&'static dyn LogSink`;
    /// this is a one-time, `open`-adjacent cost, not a hot-path
    /// allocation.
    pub fn set_log_file(&mut self, path: &str) -> PStreamsResult {
        let sink = pstreams_lib::logging::FileSink::create(path)
            .map_err(|_| self.set_last_error(PStreamsError::GeneralError))?;
        let leaked: &'static pstreams_lib::logging::FileSink = std::boxed::Box::leak(std::boxed::Box::new(sink));
        self.set_log_sink(leaked);
        Ok(())
    }
}
