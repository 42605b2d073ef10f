// src/abi/mod.rs
//! Shared ABI definitions for the user/kernel boundary: ring wire formats,
//! the notify syscall's argument/return shapes, and ABI-safe result encoding.

pub mod notify;
pub mod result;
pub mod ring;

pub use notify::{NotifyArgs, NotifyOp, NotifyOutcome};
pub use result::CompactResult;
pub use ring::{RingEvent, RingHeader, RingResult, MAX_PAYLOAD, RING_CAPACITY};
