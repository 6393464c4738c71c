//! Region assignment and the fixed-count free-list pool allocator.
//!
//! This crate never touches the host allocator. Every pool it hands out
//! is carved, header and body, out of a caller-supplied byte buffer via
//! [`Region`]; after that buffer is exhausted, allocation simply fails.

#![cfg_attr(not(test), no_std)]

pub mod pool;
pub mod region;

pub use pool::Pool;
pub use region::Region;
