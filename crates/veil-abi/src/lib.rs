//! Linux ABI surface for the veil kernel's time subsystem.
//!
//! This crate holds the wire-compatible time structures exchanged with guest
//! userspace (`timespec`, `timeval`, `time_t`, `statx_timestamp`,
//! `itimerspec`) and the errno values the time subsystem can return. The
//! types deliberately mirror the 64-bit Linux layouts and saturate instead of
//! wrapping when a value cannot be represented.

mod errno;
mod time;

pub use errno::{Errno, EINVAL};
pub use time::{
    ITimerSpec, StatxTimestamp, TimeSpec, TimeT, TimeVal, MICROS_PER_SECOND, NANOS_PER_MICRO,
    NANOS_PER_SECOND,
};
