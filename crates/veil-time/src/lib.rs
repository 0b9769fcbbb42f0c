//! Sampling-clock timer core.
//!
//! The veil kernel implements POSIX interval timers (`setitimer(2)`,
//! `timer_create(2)`, `timerfd_create(2)`) on top of a single abstraction: an
//! optionally periodic [`Timer`] driven by sampling a pluggable [`Clock`].
//! Clocks may be wall clocks, monotonic clocks, thread-group CPU clocks, or
//! fully virtualized time sources, and may move backwards or change rate; the
//! expiration arithmetic in [`Setting`] is written to stay correct anyway.
//!
//! Time values are signed nanosecond counts ([`Instant`], [`Duration`]) with
//! saturating arithmetic and conversions to the Linux time formats in
//! [`veil_abi`]. In production each timer is paced by a background worker; in
//! unit tests the whole system can be driven deterministically through a
//! [`ManualClock`] and explicit [`Timer::tick`] calls.

mod clock;
mod instant;
mod setting;
mod timer;

pub use clock::{
    wall_rate_time_until, Clock, ClockEventQueue, ClockEvents, EventWaiter, ManualClock,
};
pub use instant::{Duration, Instant};
pub use setting::Setting;
pub use timer::{ChannelListener, PauseState, Timer, TimerListener, TimerState};
