//! Stream lifecycle: pool placement, anchor queues, module push/pop.

use pstreams_abi::config::StreamConfig;
use pstreams_abi::error::{PStreamsError, PStreamsResult};
use pstreams_abi::types::{ControlCode, MsgType};
use pstreams_lib::logging::{LogLevel, LogSink, NoopSink};
use pstreams_mm::{Pool, Region};

use crate::block::{DataBlock, MessageBlock, SizeClass, FASTBUF_CAP};
use crate::module::ModuleDescriptor;
use crate::queue::{Queue, QueueArena, QueueFlags, QUEUE_NONE};

static DEFAULT_SINK: NoopSink = NoopSink;

/// A bidirectional pipeline of modules between an application boundary
/// and a transport device.
///
/// Owns its two caller-supplied memory regions (by raw pointer — see
/// [`Region`]'s safety contract) and every pool carved from them. Never
/// touches the host allocator after `open` returns.
pub struct Stream {
    mem: Region,
    msg_pool: Pool<MessageBlock>,
    db_pool: Pool<DataBlock>,
    pool16: Option<Pool<[u8; 16]>>,
    pool64: Option<Pool<[u8; 64]>>,
    pool256: Option<Pool<[u8; 256]>>,
    pool512: Option<Pool<[u8; 512]>>,
    pool1792: Option<Pool<[u8; 1792]>>,
    queues: QueueArena,
    app_wr: u32,
    app_rd: u32,
    dev_wr: u32,
    dev_rd: u32,
    config: StreamConfig,
    last_error: Option<PStreamsError>,
    log_sink: &'static dyn LogSink,
    /// Host-supplied clock, advanced only by `call_srvp`. A timer-driven
    /// module (stop-and-wait) reads this instead of calling a wall-clock
    /// API directly, keeping the whole framework free of a hidden
    /// dependency on host time.
    now: u32,
}

/// The fixed module sitting at the top of every stream, representing the
/// application boundary itself.
struct ApplicationProcs;

static APP_INFO: crate::module::ModuleInfo = crate::module::ModuleInfo {
    idname: "application",
    idnum: 0,
    min_pdu: 0,
    max_pdu: u32::MAX,
    hiwat: 256,
    lowat: 128,
};

impl crate::module::QueueProcs for ApplicationProcs {
    fn info(&self) -> &'static crate::module::ModuleInfo {
        &APP_INFO
    }

    fn put(&self, stream: &mut Stream, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        // Write side: forward downstream if possible, else buffer for the
        // scheduler. Read side: app-rd is the terminus for `getmsg`, so it
        // always buffers.
        if stream.queues.get(q).is_read_side() {
            // SAFETY: `msg` is a live, unlinked message block handed to us
            // by the upstream neighbor's `putnext`.
            unsafe { stream.queues.get_mut(q).putq(msg, crate::msg::msg1size(msg)) };
            return Ok(());
        }
        crate::sched::generic_put(stream, q, msg)
    }
}

static APPLICATION_MODULE: ApplicationProcs = ApplicationProcs;

impl Stream {
    /// Carve the stream's pools out of `mem`/`pmem`, install the fixed
    /// application module and the caller-selected `device` module at the
    /// two anchors, and run every queue's open hook.
    ///
    /// `device` is chosen by the caller (e.g. `pstreams_modules::null_device()`)
    /// rather than dispatched on `DeviceKind` here, because concrete device
    /// modules live in a crate layered above this one.
    pub fn open(
        mem: &mut [u8],
        pmem: &mut [u8],
        config: StreamConfig,
        device: ModuleDescriptor,
    ) -> PStreamsResult<Self> {
        if config.fast_buf_size as usize > FASTBUF_CAP {
            return Err(PStreamsError::GeneralError);
        }
        // SAFETY: caller keeps `mem`/`pmem` alive for the stream's lifetime.
        let mem_region = unsafe { Region::new(mem) };
        let mut pmem_region = unsafe { Region::new(pmem) };

        let queues = QueueArena::carve(&mut pmem_region, config.max_queues)
            .ok_or(PStreamsError::OutOfMemory)?;
        let msg_pool = Pool::carve(&mut pmem_region, config.max_msg_blocks)
            .ok_or(PStreamsError::OutOfMemory)?;
        let db_pool = Pool::carve(&mut pmem_region, config.max_data_blocks)
            .ok_or(PStreamsError::OutOfMemory)?;
        let pool16 = carve_optional(&mut pmem_region, config.pool_16_size)?;
        let pool64 = carve_optional(&mut pmem_region, config.pool_64_size)?;
        let pool256 = carve_optional(&mut pmem_region, config.pool_256_size)?;
        let pool512 = carve_optional(&mut pmem_region, config.pool_512_size)?;
        let pool1792 = carve_optional(&mut pmem_region, config.pool_1792_size)?;

        let mut stream = Stream {
            mem: mem_region,
            msg_pool,
            db_pool,
            pool16,
            pool64,
            pool256,
            pool512,
            pool1792,
            queues,
            app_wr: QUEUE_NONE,
            app_rd: QUEUE_NONE,
            dev_wr: QUEUE_NONE,
            dev_rd: QUEUE_NONE,
            config,
            last_error: None,
            log_sink: &DEFAULT_SINK,
            now: 0,
        };

        let app = ModuleDescriptor {
            write: &APPLICATION_MODULE,
            read: &APPLICATION_MODULE,
        };
        stream.app_wr = stream.new_queue(&app, false)?;
        stream.app_rd = stream.new_queue(&app, true)?;
        stream.dev_wr = stream.new_queue(&device, false)?;
        stream.dev_rd = stream.new_queue(&device, true)?;

        stream.queues.get_mut(stream.app_wr).peer = stream.app_rd;
        stream.queues.get_mut(stream.app_rd).peer = stream.app_wr;
        stream.queues.get_mut(stream.dev_wr).peer = stream.dev_rd;
        stream.queues.get_mut(stream.dev_rd).peer = stream.dev_wr;

        stream.queues.get_mut(stream.app_wr).next = stream.dev_wr;
        stream.queues.get_mut(stream.dev_rd).next = stream.app_rd;

        for q in [stream.app_wr, stream.app_rd, stream.dev_wr, stream.dev_rd] {
            if let Err(e) = stream.call_open(q) {
                let _ = stream.close();
                return Err(e);
            }
        }

        Ok(stream)
    }

    fn new_queue(&mut self, module: &ModuleDescriptor, read_side: bool) -> PStreamsResult<u32> {
        let procs = if read_side { module.read } else { module.write };
        let info = procs.info();
        let idx = self
            .queues
            .alloc(info.hiwat, info.lowat, read_side, info.idnum)
            .ok_or(PStreamsError::OutOfMemory)?;
        self.queues.get_mut(idx).procs = Some(procs);
        Ok(idx)
    }

    fn call_open(&mut self, q: u32) -> PStreamsResult {
        let procs = self.queues.get(q).procs.expect("queue has no procs");
        procs.open(self, q)
    }

    fn call_close(&mut self, q: u32) -> PStreamsResult {
        let procs = self.queues.get(q).procs.expect("queue has no procs");
        procs.close(self, q)
    }

    /// Insert `module` just below the application boundary.
    pub fn push(&mut self, module: ModuleDescriptor) -> PStreamsResult {
        match self.push_inner(module) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.set_last_error(e)),
        }
    }

    fn push_inner(&mut self, module: ModuleDescriptor) -> PStreamsResult {
        let write = self.new_queue(&module, false)?;
        let read = self.new_queue(&module, true)?;
        self.queues.get_mut(write).peer = read;
        self.queues.get_mut(read).peer = write;

        // Splice the write queue just below app-wr.
        let below_app_wr = self.queues.get(self.app_wr).next;
        self.queues.get_mut(write).next = below_app_wr;
        self.queues.get_mut(self.app_wr).next = write;

        // Walk dev-rd's read chain to find the queue whose next is app-rd.
        let mut cursor = self.dev_rd;
        while self.queues.get(cursor).next != self.app_rd {
            cursor = self.queues.get(cursor).next;
            debug_assert_ne!(cursor, QUEUE_NONE, "read chain never reaches app-rd");
        }
        self.queues.get_mut(read).next = self.app_rd;
        self.queues.get_mut(cursor).next = read;

        if let Err(e) = self.call_open(write) {
            self.unlink_pair(write, read);
            let _ = self.queues.get_mut(write);
            unsafe {
                self.queues.free(write);
                self.queues.free(read);
            }
            return Err(e);
        }
        if let Err(e) = self.call_open(read) {
            let _ = self.call_close(write);
            self.unlink_pair(write, read);
            unsafe {
                self.queues.free(write);
                self.queues.free(read);
            }
            return Err(e);
        }
        Ok(())
    }

    fn unlink_pair(&mut self, write: u32, read: u32) {
        let below_write = self.queues.get(write).next;
        self.queues.get_mut(self.app_wr).next = below_write;

        let mut cursor = self.dev_rd;
        while self.queues.get(cursor).next != read {
            cursor = self.queues.get(cursor).next;
        }
        let below_read = self.queues.get(read).next;
        self.queues.get_mut(cursor).next = below_read;
    }

    /// Pop the module just below the application boundary, returning its
    /// idnum, or `None` if only the application and device modules remain.
    pub fn pop(&mut self) -> PStreamsResult<Option<u32>> {
        match self.pop_inner() {
            Ok(v) => Ok(v),
            Err(e) => Err(self.set_last_error(e)),
        }
    }

    fn pop_inner(&mut self) -> PStreamsResult<Option<u32>> {
        let write = self.queues.get(self.app_wr).next;
        if write == self.dev_wr {
            return Ok(None);
        }
        let read = self.queues.get(write).peer;
        debug_assert_eq!(
            self.queues.get(write).module_id,
            self.queues.get(read).module_id,
            "pop: write/read sides disagree on module identity"
        );
        let idnum = self.queues.get(write).module_id;

        self.call_close(write)?;
        self.call_close(read)?;
        self.unlink_pair(write, read);
        // SAFETY: both queues were just closed by their module, which must
        // have drained its FIFO and released its private state.
        unsafe {
            self.queues.free(write);
            self.queues.free(read);
        }
        Ok(Some(idnum))
    }

    /// Pop every pushed module, close the device queues, and flush the
    /// log sink.
    pub fn close(&mut self) -> PStreamsResult {
        while self.pop()?.is_some() {}
        self.call_close(self.dev_wr)?;
        self.call_close(self.dev_rd)?;
        Ok(())
    }

    // -- queue primitives -------------------------------------------------

    pub fn queue(&self, q: u32) -> &Queue {
        self.queues.get(q)
    }

    pub fn queue_mut(&mut self, q: u32) -> &mut Queue {
        self.queues.get_mut(q)
    }

    pub fn app_wr(&self) -> u32 {
        self.app_wr
    }

    pub fn app_rd(&self) -> u32 {
        self.app_rd
    }

    pub fn dev_wr(&self) -> u32 {
        self.dev_wr
    }

    pub fn dev_rd(&self) -> u32 {
        self.dev_rd
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// `false` iff `q`'s `FULL` flag is set; `QUEUE_NONE` is treated as
    /// unable to accept more (a null queue, per §4.4).
    pub fn canput(&mut self, q: u32) -> bool {
        if q == QUEUE_NONE {
            return false;
        }
        self.queues.get_mut(q).canput()
    }

    pub fn qsize(&self, q: u32) -> u32 {
        self.queues.get(q).qsize()
    }

    /// Enqueue `msg` on `q`'s own FIFO for later draining by the
    /// scheduler.
    pub fn putq(&mut self, q: u32, msg: *mut MessageBlock) {
        let size = crate::msg::msgsize(msg);
        // SAFETY: caller hands over a live, unlinked message.
        unsafe { self.queues.get_mut(q).putq(msg, size) };
    }

    /// Head-insert variant of `putq`.
    pub fn putbq(&mut self, q: u32, msg: *mut MessageBlock) {
        let size = crate::msg::msgsize(msg);
        // SAFETY: caller hands over a live, unlinked message.
        unsafe { self.queues.get_mut(q).putbq(msg, size) };
    }

    /// Dequeue the oldest message on `q`.
    pub fn getq(&mut self, q: u32) -> Option<*mut MessageBlock> {
        self.queues.get_mut(q).getq(|m| crate::msg::msgsize(m))
    }

    /// Invoke `q`'s put procedure directly (no intermediate buffering).
    pub fn putnext(&mut self, q: u32, msg: *mut MessageBlock) -> PStreamsResult {
        let procs = self.queues.get(q).procs.expect("queue has no procs");
        procs.put(self, q, msg)
    }

    /// Allocate a zero-length control message of `code`'s type and
    /// enqueue it on `q`.
    pub fn putctl(&mut self, q: u32, msg_type: MsgType, code: ControlCode) -> PStreamsResult {
        let msg = self.allocb(1, 0, msg_type)?;
        // SAFETY: `msg` was just allocated and has room for one byte.
        unsafe {
            core::ptr::write((*msg).wptr(), code as u8);
            (*msg).advance_wptr(1);
        }
        self.putq(q, msg);
        Ok(())
    }

    /// Carve `size` bytes, aligned for `align`, from the volatile region
    /// — the primitive a module's `open` hook uses to place per-queue
    /// private state.
    pub fn assign_region(&mut self, size: usize, align: usize) -> Option<*mut u8> {
        debug_assert!(align.is_power_of_two());
        // `Region::assign` only guarantees word alignment; callers needing
        // a coarser alignment than a machine word are not supported today.
        debug_assert!(align <= core::mem::align_of::<usize>());
        self.mem.assign(size)
    }

    pub fn last_error(&self) -> Option<PStreamsError> {
        self.last_error
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn set_last_error(&mut self, e: PStreamsError) -> PStreamsError {
        self.last_error = Some(e);
        e
    }

    pub fn set_log_sink(&mut self, sink: &'static dyn LogSink) {
        self.log_sink = sink;
    }

    /// The clock value `call_srvp` was last invoked with. Timer-driven
    /// modules compare this against deadlines stashed in their private
    /// state; units are whatever the host's clock uses, consistently.
    pub fn now(&self) -> u32 {
        self.now
    }

    pub(crate) fn set_now(&mut self, now: u32) {
        self.now = now;
    }

    pub fn log(
        &self,
        q: u32,
        level: LogLevel,
        module_name: &str,
        message: core::fmt::Arguments<'_>,
    ) {
        let queue = self.queues.get(q);
        if level < queue.log_level {
            return;
        }
        self.log_sink.write_line(
            level,
            module_name,
            queue.byte_count(),
            queue.msg_count(),
            message,
        );
    }

    // -- pool accessors used by the message algebra ------------------------

    pub(crate) fn alloc_msg_block(&mut self) -> Option<*mut MessageBlock> {
        self.msg_pool.alloc()
    }

    pub(crate) unsafe fn release_msg_block(&mut self, ptr: *mut MessageBlock) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.msg_pool.release(ptr) };
    }

    pub(crate) fn alloc_data_block(&mut self) -> Option<*mut DataBlock> {
        self.db_pool.alloc()
    }

    pub(crate) unsafe fn release_data_block(&mut self, ptr: *mut DataBlock) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.db_pool.release(ptr) };
    }

    pub(crate) fn fast_buf_len(&self) -> usize {
        self.config.fast_buf_size as usize
    }

    /// Smallest enabled size class that can hold `size` bytes, or `None`
    /// if the request is too large for every enabled class (including
    /// the inline buffer).
    pub(crate) fn pick_size_class(&self, size: usize) -> Option<Option<SizeClass>> {
        if size <= self.fast_buf_len() {
            return Some(None);
        }
        for class in SizeClass::ALL {
            if class.bytes() >= size && self.pool_for(class).is_some() {
                return Some(Some(class));
            }
        }
        None
    }

    fn pool_for(&self, class: SizeClass) -> Option<u32> {
        match class {
            SizeClass::P16 => self.pool16.as_ref().map(Pool::count),
            SizeClass::P64 => self.pool64.as_ref().map(Pool::count),
            SizeClass::P256 => self.pool256.as_ref().map(Pool::count),
            SizeClass::P512 => self.pool512.as_ref().map(Pool::count),
            SizeClass::P1792 => self.pool1792.as_ref().map(Pool::count),
        }
    }

    pub(crate) fn alloc_class_slot(&mut self, class: SizeClass) -> Option<*mut u8> {
        match class {
            SizeClass::P16 => self.pool16.as_mut()?.alloc().map(|p| p as *mut u8),
            SizeClass::P64 => self.pool64.as_mut()?.alloc().map(|p| p as *mut u8),
            SizeClass::P256 => self.pool256.as_mut()?.alloc().map(|p| p as *mut u8),
            SizeClass::P512 => self.pool512.as_mut()?.alloc().map(|p| p as *mut u8),
            SizeClass::P1792 => self.pool1792.as_mut()?.alloc().map(|p| p as *mut u8),
        }
    }

    pub(crate) unsafe fn release_class_slot(&mut self, class: SizeClass, ptr: *mut u8) {
        match class {
            // SAFETY: forwarded from the caller's contract; `ptr` came from
            // `alloc_class_slot(class)` on this same stream.
            SizeClass::P16 => unsafe { self.pool16.as_mut().unwrap().release(ptr.cast()) },
            SizeClass::P64 => unsafe { self.pool64.as_mut().unwrap().release(ptr.cast()) },
            SizeClass::P256 => unsafe { self.pool256.as_mut().unwrap().release(ptr.cast()) },
            SizeClass::P512 => unsafe { self.pool512.as_mut().unwrap().release(ptr.cast()) },
            SizeClass::P1792 => unsafe { self.pool1792.as_mut().unwrap().release(ptr.cast()) },
        }
    }

    /// Walk every pool and confirm its free list is internally consistent.
    /// Diagnostic use only.
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    pub fn dump_pools(&self) -> bool {
        let mut ok = self.msg_pool.check() && self.db_pool.check();
        if let Some(p) = &self.pool16 {
            ok &= p.check();
        }
        if let Some(p) = &self.pool64 {
            ok &= p.check();
        }
        if let Some(p) = &self.pool256 {
            ok &= p.check();
        }
        if let Some(p) = &self.pool512 {
            ok &= p.check();
        }
        if let Some(p) = &self.pool1792 {
            ok &= p.check();
        }
        ok
    }
}

impl Queue {
    /// Dump this queue's flags and counters. Diagnostic use only.
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    pub fn dump(&self) -> (QueueFlags, u32, u32) {
        (self.flags, self.byte_count(), self.msg_count())
    }
}

fn carve_optional<T>(region: &mut Region, count: u32) -> PStreamsResult<Option<Pool<T>>> {
    if count == 0 {
        return Ok(None);
    }
    Pool::carve(region, count)
        .map(Some)
        .ok_or(PStreamsError::OutOfMemory)
}
