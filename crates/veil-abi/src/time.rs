pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const NANOS_PER_MICRO: i64 = 1_000;

/// Linux `struct timespec` with 64-bit fields.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[repr(C)]
pub struct TimeSpec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl TimeSpec {
    /// Decomposes a nanosecond count, normalizing so that
    /// `0 <= tv_nsec < NANOS_PER_SECOND` even for negative inputs.
    pub const fn from_nanos(ns: i64) -> Self {
        Self {
            tv_sec: ns.div_euclid(NANOS_PER_SECOND),
            tv_nsec: ns.rem_euclid(NANOS_PER_SECOND),
        }
    }

    /// Reassembles the nanosecond count, saturating to `i64::MAX`/`i64::MIN`
    /// when `tv_sec` is too large in magnitude to represent in nanoseconds.
    pub fn to_nanos_capped(self) -> i64 {
        match self.tv_sec.checked_mul(NANOS_PER_SECOND) {
            Some(base) => base.saturating_add(self.tv_nsec),
            None if self.tv_sec > 0 => i64::MAX,
            None => i64::MIN,
        }
    }

    /// Whether the nanosecond field is in the range Linux accepts for
    /// syscall arguments.
    pub const fn is_valid(self) -> bool {
        self.tv_nsec >= 0 && self.tv_nsec < NANOS_PER_SECOND
    }
}

/// Linux `struct timeval` with 64-bit fields.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[repr(C)]
pub struct TimeVal {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl TimeVal {
    /// Decomposes a nanosecond count at microsecond precision, truncating
    /// sub-microsecond remainders toward negative infinity so that
    /// `0 <= tv_usec < MICROS_PER_SECOND`.
    pub const fn from_nanos(ns: i64) -> Self {
        let us = ns.div_euclid(NANOS_PER_MICRO);
        Self {
            tv_sec: us.div_euclid(MICROS_PER_SECOND),
            tv_usec: us.rem_euclid(MICROS_PER_SECOND),
        }
    }

    /// Reassembles the nanosecond count, saturating on overflow.
    pub fn to_nanos_capped(self) -> i64 {
        match self.tv_sec.checked_mul(NANOS_PER_SECOND) {
            Some(base) => base.saturating_add(self.tv_usec.saturating_mul(NANOS_PER_MICRO)),
            None if self.tv_sec > 0 => i64::MAX,
            None => i64::MIN,
        }
    }

    pub const fn is_valid(self) -> bool {
        self.tv_usec >= 0 && self.tv_usec < MICROS_PER_SECOND
    }
}

/// Linux `time_t` (seconds).
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TimeT(pub i64);

impl TimeT {
    /// Truncates a nanosecond count to whole seconds (toward zero, matching
    /// C integer division).
    pub const fn from_nanos(ns: i64) -> Self {
        Self(ns / NANOS_PER_SECOND)
    }
}

/// Linux `struct statx_timestamp`.
///
/// The nanosecond field is unsigned, so decomposition is always normalized.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[repr(C)]
pub struct StatxTimestamp {
    pub tv_sec: i64,
    pub tv_nsec: u32,
    pub __reserved: i32,
}

impl StatxTimestamp {
    pub const fn from_nanos(ns: i64) -> Self {
        Self {
            tv_sec: ns.div_euclid(NANOS_PER_SECOND),
            tv_nsec: ns.rem_euclid(NANOS_PER_SECOND) as u32,
            __reserved: 0,
        }
    }
}

/// Linux `struct itimerspec`.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[repr(C)]
pub struct ITimerSpec {
    pub it_interval: TimeSpec,
    pub it_value: TimeSpec,
}
