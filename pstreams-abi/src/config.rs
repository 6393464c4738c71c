//! Stream configuration — one entry per row of the configuration table.
//!
//! A `0` payload-pool size disables that size class entirely (`allocb`
//! will never select it). `Default` reproduces the pool sizing used by
//! the framework's own echo scenario (`Q=12, M=352, D=320`), the only
//! concrete numbers committed to by the worked examples.

#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Capacity of the queue pool (one pair of queues per pushed module,
    /// plus the four anchor queues).
    pub max_queues: u32,
    /// Capacity of the message-block pool.
    pub max_msg_blocks: u32,
    /// Capacity of the data-block pool.
    pub max_data_blocks: u32,
    /// Size of the inline buffer carried by every data block.
    pub fast_buf_size: u32,
    pub pool_16_size: u32,
    pub pool_64_size: u32,
    pub pool_256_size: u32,
    pub pool_512_size: u32,
    pub pool_1792_size: u32,
    /// Bytes available in the caller-supplied volatile region.
    pub region_volatile_bytes: u32,
    /// Bytes available in the caller-supplied persistent region.
    pub region_persistent_bytes: u32,
    /// Default log filter level for UDP/TCP device modules (see
    /// `pstreams_lib::logging::LogLevel`; stored as its numeric rank so
    /// this crate stays dependency-free).
    pub udp_dev_trace_level: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_queues: 12,
            max_msg_blocks: 352,
            max_data_blocks: 320,
            fast_buf_size: 4,
            pool_16_size: 64,
            pool_64_size: 64,
            pool_256_size: 32,
            pool_512_size: 16,
            pool_1792_size: 8,
            region_volatile_bytes: 64 * 1024,
            region_persistent_bytes: 16 * 1024,
            udp_dev_trace_level: 6,
        }
    }
}
