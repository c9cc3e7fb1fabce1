//! Fixed-Capacity Ring Buffer
//!
//! Bounded, overwrite-oldest storage for the liveness window and the
//! per-signal histories (motion, posture).

mod buffer;

pub use buffer::RingBuffer;
