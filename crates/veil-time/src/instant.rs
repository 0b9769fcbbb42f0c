use std::fmt;

use veil_abi::{StatxTimestamp, TimeSpec, TimeT, TimeVal, NANOS_PER_SECOND};

/// A signed span of time in nanoseconds.
///
/// Spans may be negative: subtracting a later [`Instant`] from an earlier one
/// yields a negative `Duration`, and clock estimates for deadlines that have
/// already passed are negative as well.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    /// The most negative representable span.
    pub const MIN: Duration = Duration(i64::MIN);

    /// The most positive representable span.
    pub const MAX: Duration = Duration(i64::MAX);

    pub const fn from_nanos(ns: i64) -> Duration {
        Duration(ns)
    }

    pub const fn from_micros(us: i64) -> Duration {
        Duration(us.saturating_mul(1_000))
    }

    pub const fn from_millis(ms: i64) -> Duration {
        Duration(ms.saturating_mul(1_000_000))
    }

    pub const fn from_seconds(s: i64) -> Duration {
        Duration(s.saturating_mul(NANOS_PER_SECOND))
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub const fn micros(self) -> i64 {
        self.0 / 1_000
    }

    pub const fn seconds(self) -> i64 {
        self.0 / NANOS_PER_SECOND
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Converts to an unsigned [`std::time::Duration`], clamping negative
    /// spans to zero. Used when handing deadlines to OS sleep primitives,
    /// which treat an already-passed deadline as "fire immediately".
    pub(crate) fn to_std_clamped(self) -> std::time::Duration {
        if self.0 <= 0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_nanos(self.0 as u64)
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// An instant in time, measured in nanoseconds from its clock's zero point.
///
/// An `Instant` carries no clock identity: two instants are comparable only
/// if the caller knows they were produced by the same [`Clock`]. An instant
/// read from a wall clock is nanoseconds since the Unix epoch; an instant
/// read from a CPU-time clock has no meaning in the real world at all.
///
/// All arithmetic saturates at [`Instant::MIN`]/[`Instant::MAX`] rather than
/// wrapping.
///
/// [`Clock`]: crate::Clock
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(i64);

impl Instant {
    /// The lowest representable instant.
    pub const MIN: Instant = Instant(i64::MIN);

    /// The highest representable instant.
    pub const MAX: Instant = Instant(i64::MAX);

    /// The zero instant of an unspecified clock's domain.
    pub const ZERO: Instant = Instant(0);

    pub const fn from_nanos(ns: i64) -> Instant {
        Instant(ns)
    }

    /// Saturates when `s` seconds is not representable in nanoseconds.
    pub const fn from_seconds(s: i64) -> Instant {
        Instant(s.saturating_mul(NANOS_PER_SECOND))
    }

    /// Builds an instant from Unix `(seconds, nanoseconds)`, saturating on
    /// overflow in either direction.
    pub fn from_unix(s: i64, ns: i64) -> Instant {
        let Some(base) = s.checked_mul(NANOS_PER_SECOND) else {
            return if s > 0 { Instant::MAX } else { Instant::MIN };
        };
        Instant(base.saturating_add(ns))
    }

    pub fn from_timespec(ts: TimeSpec) -> Instant {
        Instant(ts.to_nanos_capped())
    }

    pub fn from_timeval(tv: TimeVal) -> Instant {
        Instant(tv.to_nanos_capped())
    }

    /// Nanoseconds since the zero point of this instant's clock domain.
    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub const fn micros(self) -> i64 {
        self.0 / 1_000
    }

    pub const fn seconds(self) -> i64 {
        self.0 / NANOS_PER_SECOND
    }

    /// The `(seconds, nanoseconds)` decomposition such that
    /// `seconds * 1e9 + nanoseconds == self.nanos()`.
    pub const fn unix(self) -> (i64, i64) {
        (self.0 / NANOS_PER_SECOND, self.0 % NANOS_PER_SECOND)
    }

    pub const fn timespec(self) -> TimeSpec {
        TimeSpec::from_nanos(self.0)
    }

    pub const fn timeval(self) -> TimeVal {
        TimeVal::from_nanos(self.0)
    }

    pub const fn time_t(self) -> TimeT {
        TimeT::from_nanos(self.0)
    }

    pub const fn statx_timestamp(self) -> StatxTimestamp {
        StatxTimestamp::from_nanos(self.0)
    }

    /// Adds a span, saturating to [`Instant::MAX`] on positive overflow and
    /// [`Instant::MIN`] on negative overflow.
    pub const fn add(self, d: Duration) -> Instant {
        Instant(self.0.saturating_add(d.nanos()))
    }

    /// Adds another instant interpreted as a span from the zero point.
    pub const fn add_instant(self, u: Instant) -> Instant {
        self.add(Duration::from_nanos(u.0))
    }

    /// The span `self - u`.
    ///
    /// Overflow is detected by round-tripping the wrapped difference: if
    /// `u.add(diff)` does not land back on `self`, the true difference is out
    /// of range and the result saturates to [`Duration::MIN`]/[`Duration::MAX`].
    pub fn sub(self, u: Instant) -> Duration {
        let diff = Duration::from_nanos(self.0.wrapping_sub(u.0));
        if u.add(diff) == self {
            diff
        } else if self.before(u) {
            Duration::MIN
        } else {
            Duration::MAX
        }
    }

    pub const fn before(self, u: Instant) -> bool {
        self.0 < u.0
    }

    pub const fn after(self, u: Instant) -> bool {
        self.0 > u.0
    }

    pub const fn is_min(self) -> bool {
        self.0 == i64::MIN
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn add_saturates_at_both_ends() {
        assert_eq!(Instant::MAX.add(Duration::from_nanos(1)), Instant::MAX);
        assert_eq!(Instant::MIN.add(Duration::from_nanos(-1)), Instant::MIN);
        assert_eq!(
            Instant::from_nanos(1).add(Duration::MAX),
            Instant::MAX,
        );
        assert_eq!(
            Instant::from_nanos(-1).add(Duration::MIN),
            Instant::MIN,
        );
    }

    #[test]
    fn sub_saturates_when_out_of_range() {
        assert_eq!(Instant::MAX.sub(Instant::MIN), Duration::MAX);
        assert_eq!(Instant::MIN.sub(Instant::MAX), Duration::MIN);
        assert_eq!(
            Instant::from_nanos(10).sub(Instant::from_nanos(30)),
            Duration::from_nanos(-20)
        );
    }

    #[test]
    fn from_seconds_saturates() {
        assert_eq!(Instant::from_seconds(i64::MAX / 2), Instant::MAX);
        assert_eq!(Instant::from_seconds(i64::MIN / 2), Instant::MIN);
        assert_eq!(
            Instant::from_seconds(3),
            Instant::from_nanos(3_000_000_000)
        );
    }

    #[test]
    fn from_unix_saturates() {
        assert_eq!(Instant::from_unix(i64::MAX / 2, 0), Instant::MAX);
        assert_eq!(Instant::from_unix(i64::MIN / 2, 0), Instant::MIN);
        assert_eq!(
            Instant::from_unix(i64::MAX / NANOS_PER_SECOND, i64::MAX),
            Instant::MAX
        );
        assert_eq!(
            Instant::from_unix(1, 500),
            Instant::from_nanos(1_000_000_500)
        );
        assert_eq!(Instant::from_unix(-1, 500), Instant::from_nanos(-999_999_500));
    }

    #[test]
    fn accessors_truncate_toward_zero() {
        let t = Instant::from_nanos(-1_500);
        assert_eq!(t.micros(), -1);
        assert_eq!(Instant::from_nanos(-1_500_000_000).seconds(), -1);
        assert_eq!(Instant::from_nanos(1_999_999_999).seconds(), 1);
    }

    #[test]
    fn unix_decomposition_reassembles() {
        for ns in [0i64, 1, -1, 1_500_000_000, -1_500_000_000, 999] {
            let (s, rem) = Instant::from_nanos(ns).unix();
            assert_eq!(s * NANOS_PER_SECOND + rem, ns);
        }
    }

    #[test]
    fn display_is_nanosecond_count() {
        assert_eq!(Instant::from_nanos(42).to_string(), "42ns");
        assert_eq!(Duration::from_nanos(-7).to_string(), "-7ns");
    }

    #[test]
    fn timespec_conversion_round_trips() {
        for ns in [0i64, 1, -1, 1_500_000_000, -1_500_000_000] {
            let t = Instant::from_nanos(ns);
            assert_eq!(Instant::from_timespec(t.timespec()), t);
        }
    }

    #[test]
    fn to_std_clamps_negative_spans() {
        assert_eq!(
            Duration::from_nanos(-5).to_std_clamped(),
            std::time::Duration::ZERO
        );
        assert_eq!(
            Duration::from_nanos(5).to_std_clamped(),
            std::time::Duration::from_nanos(5)
        );
    }

    proptest! {
        #[test]
        fn add_stays_in_range(t in any::<i64>(), d in any::<i64>()) {
            let got = Instant::from_nanos(t).add(Duration::from_nanos(d));
            let wide = i128::from(t) + i128::from(d);
            if wide > i128::from(i64::MAX) {
                prop_assert_eq!(got, Instant::MAX);
            } else if wide < i128::from(i64::MIN) {
                prop_assert_eq!(got, Instant::MIN);
            } else {
                prop_assert_eq!(got.nanos(), wide as i64);
            }
        }

        #[test]
        fn sub_round_trips_when_unsaturated(t in any::<i64>(), u in any::<i64>()) {
            let (t, u) = (Instant::from_nanos(t), Instant::from_nanos(u));
            let d = t.sub(u);
            if d != Duration::MIN && d != Duration::MAX {
                prop_assert_eq!(u.add(d), t);
            }
        }

        #[test]
        fn unix_round_trips_in_range(
            ns in (i64::MIN + NANOS_PER_SECOND)..(i64::MAX - NANOS_PER_SECOND)
        ) {
            let t = Instant::from_nanos(ns);
            let (s, rem) = t.unix();
            prop_assert_eq!(Instant::from_unix(s, rem), t);
        }
    }
}
