//! Concrete modules built on [`pstreams_core`]: a stop-and-wait framing
//! module usable over any unreliable byte path, a `NullDevice` loopback
//! bottom module with no host transport dependency, and `std`-gated
//! `UdpDevice`/`TcpDevice` bottom modules backed by real sockets.
//!
//! `no_std` by default; enabling the `std` feature pulls in the socket
//! devices along with `pstreams-core`'s own `std` surface.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod null_device;
mod saw;

#[cfg(feature = "std")]
mod tcp_device;
#[cfg(feature = "std")]
mod udp_device;

pub use null_device::null_device;
#[cfg(any(debug_assertions, feature = "diagnostics"))]
pub use saw::saw_sequence_state;
pub use saw::stop_and_wait;

#[cfg(feature = "std")]
pub use tcp_device::tcp_device;
#[cfg(feature = "std")]
pub use udp_device::udp_device;
