use veil_abi::{Errno, ITimerSpec, TimeSpec, EINVAL};

use crate::clock::Clock;
use crate::instant::{Duration, Instant};

/// User-controlled mutable timer properties.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct Setting {
    /// Whether the timer is running.
    pub enabled: bool,

    /// Time of the next expiration, in the associated clock's domain.
    pub next: Instant,

    /// Span between periodic expirations. Zero means one-shot.
    ///
    /// Invariant: `period >= 0`.
    pub period: Duration,
}

impl Setting {
    /// Builds a setting from a `(value, interval)` pair where `value` is
    /// relative to `now`.
    ///
    /// A negative `value` is rejected with `EINVAL`; a zero `value` yields a
    /// disabled setting that still carries `interval` for later re-arming.
    pub fn from_relative(
        value: Duration,
        interval: Duration,
        now: Instant,
    ) -> Result<Setting, Errno> {
        if value < Duration::ZERO {
            return Err(EINVAL);
        }
        if value.is_zero() {
            return Ok(Setting {
                period: interval,
                ..Setting::default()
            });
        }
        Ok(Setting {
            enabled: true,
            next: now.add(value),
            period: interval,
        })
    }

    /// Builds a setting from a `(value, interval)` pair where `value` is an
    /// absolute time.
    ///
    /// A `value` before the clock's zero point is rejected with `EINVAL`; a
    /// zero `value` yields a disabled setting that still carries `interval`.
    pub fn from_absolute(value: Instant, interval: Duration) -> Result<Setting, Errno> {
        if value.before(Instant::ZERO) {
            return Err(EINVAL);
        }
        if value.is_zero() {
            return Ok(Setting {
                period: interval,
                ..Setting::default()
            });
        }
        Ok(Setting {
            enabled: true,
            next: value,
            period: interval,
        })
    }

    /// Builds a setting from a Linux `itimerspec` read from guest memory. If
    /// `absolute`, `it_value` is an absolute time; otherwise it is relative
    /// to `clock.now()`.
    pub fn from_itimerspec(
        its: ITimerSpec,
        absolute: bool,
        clock: &dyn Clock,
    ) -> Result<Setting, Errno> {
        if !its.it_value.is_valid() || !its.it_interval.is_valid() {
            return Err(EINVAL);
        }
        let interval = Duration::from_nanos(its.it_interval.to_nanos_capped());
        if absolute {
            Setting::from_absolute(
                Instant::from_timespec(its.it_value),
                interval,
            )
        } else {
            Setting::from_relative(
                Duration::from_nanos(its.it_value.to_nanos_capped()),
                interval,
                clock.now(),
            )
        }
    }

    /// The `(value, interval)` pair reported by Linux syscalls that return a
    /// `struct itimerspec` or `struct itimerval`, relative to `now`.
    pub fn to_spec(self, now: Instant) -> (Duration, Duration) {
        if !self.enabled {
            (Duration::ZERO, self.period)
        } else {
            (self.next.sub(now), self.period)
        }
    }

    pub fn to_itimerspec(self, now: Instant) -> ITimerSpec {
        let (value, interval) = self.to_spec(now);
        ITimerSpec {
            it_interval: TimeSpec::from_nanos(interval.nanos()),
            it_value: TimeSpec::from_nanos(value.nanos()),
        }
    }

    /// Returns the setting advanced to `now`, along with the number of
    /// expirations that accrued on the way there.
    ///
    /// `advance` tolerates time moving backwards: calls with a `now` earlier
    /// than `next` leave the setting untouched and report zero expirations.
    /// This is required both for non-monotonic clocks and because the timer
    /// engine samples its clock without holding its mutex, so an older sample
    /// can be applied after a newer one.
    pub fn advance(self, now: Instant) -> (Setting, u64) {
        if !self.enabled {
            return (self, 0);
        }
        if self.next.after(now) {
            return (self, 0);
        }
        if self.period.is_zero() {
            return (
                Setting {
                    enabled: false,
                    ..self
                },
                1,
            );
        }
        let period_ns = self.period.nanos() as u64;
        let exp = 1 + (now.sub(self.next).nanos() as u64) / period_ns;
        let next = self
            .next
            .add(Duration::from_nanos(period_ns.wrapping_mul(exp) as i64));
        (Setting { next, ..self }, exp)
    }
}
