use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::instant::{Duration, Instant};

bitflags! {
    /// Events a [`Clock`] may broadcast to subscribed timers.
    #[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
    pub struct ClockEvents: u32 {
        /// The clock underwent a discontinuous change (jumped forward or
        /// backward).
        const SET = 1 << 0;

        /// The clock now advances significantly faster than before, so
        /// wall-time estimates from earlier [`Clock::wall_time_until`] calls
        /// may be too large.
        const RATE_INCREASE = 1 << 1;
    }
}

/// A subscription to a [`Clock`]'s event surface.
///
/// A waiter pairs an interest mask with the coalescing signal channel of the
/// subscriber. Delivery never blocks: if a signal is already pending the new
/// event folds into it.
#[derive(Debug)]
pub struct EventWaiter {
    interest: ClockEvents,
    signal: Mutex<SyncSender<()>>,
}

impl EventWaiter {
    pub fn new(interest: ClockEvents, signal: SyncSender<()>) -> EventWaiter {
        EventWaiter {
            interest,
            signal: Mutex::new(signal),
        }
    }

    pub fn interest(&self) -> ClockEvents {
        self.interest
    }

    /// Delivers `events` if they intersect this waiter's interest mask.
    pub fn notify(&self, events: ClockEvents) {
        if self.interest.intersects(events) {
            // A full channel means a wakeup is already pending; a
            // disconnected one means the subscriber is gone. Drop either way.
            let _ = self.signal.lock().unwrap().try_send(());
        }
    }
}

/// An abstract time source.
///
/// Implementations decide what a nanosecond means: wall time, host-monotonic
/// time, accumulated thread-group CPU time, or a fully virtual timeline. The
/// timer engine only ever samples `now` and asks for wall-time scheduling
/// hints.
pub trait Clock: Send + Sync {
    /// The current time in this clock's domain.
    fn now(&self) -> Instant;

    /// Estimated wall time until `now()` will return a value `>= t`, given
    /// that a recent call returned `now`. May be zero or negative if `t` has
    /// already passed.
    ///
    /// The estimate steers when the timer engine next checks for
    /// expirations: too small causes spurious wakeups, too large causes late
    /// expirations. Implementations should err on the side of
    /// underestimating. Clocks that advance at wall rate can delegate to
    /// [`wall_rate_time_until`].
    fn wall_time_until(&self, t: Instant, now: Instant) -> Duration;

    /// Registers `waiter` for future clock events.
    ///
    /// Clocks that never generate events can rely on the default no-op.
    fn subscribe(&self, waiter: &Arc<EventWaiter>) {
        let _ = waiter;
    }

    /// Releases a registration made by [`Clock::subscribe`].
    fn unsubscribe(&self, waiter: &Arc<EventWaiter>) {
        let _ = waiter;
    }

    /// Clock events are transient, not level-triggered, so readiness is
    /// always empty.
    fn readiness(&self, mask: ClockEvents) -> ClockEvents {
        let _ = mask;
        ClockEvents::empty()
    }
}

/// `wall_time_until` for clocks that advance at the same rate as wall time.
pub fn wall_rate_time_until(t: Instant, now: Instant) -> Duration {
    t.sub(now)
}

/// A broadcast registry for clock events.
///
/// Clocks that generate events embed one and call
/// [`notify`](ClockEventQueue::notify) when the underlying time source is
/// stepped or retimed.
#[derive(Debug, Default)]
pub struct ClockEventQueue {
    waiters: Mutex<Vec<Arc<EventWaiter>>>,
}

impl ClockEventQueue {
    pub fn new() -> ClockEventQueue {
        ClockEventQueue::default()
    }

    pub fn subscribe(&self, waiter: &Arc<EventWaiter>) {
        self.waiters.lock().unwrap().push(Arc::clone(waiter));
    }

    pub fn unsubscribe(&self, waiter: &Arc<EventWaiter>) {
        self.waiters
            .lock()
            .unwrap()
            .retain(|w| !Arc::ptr_eq(w, waiter));
    }

    /// Broadcasts `events` to every subscribed waiter.
    pub fn notify(&self, events: ClockEvents) {
        for waiter in self.waiters.lock().unwrap().iter() {
            waiter.notify(events);
        }
    }
}

/// A hand-stepped [`Clock`].
///
/// The clock only moves when told to, which makes it both the unit-test
/// driver for the timer engine and a usable virtual timeline: step the clock,
/// and subscribed timers reevaluate. `wall_time_until` is unbounded because a
/// deadline on this clock never draws closer on its own; [`set_now`] and
/// [`advance`] step silently (callers tick affected timers themselves), while
/// [`jump_to`] broadcasts a discontinuity event.
///
/// [`set_now`]: ManualClock::set_now
/// [`advance`]: ManualClock::advance
/// [`jump_to`]: ManualClock::jump_to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
    events: ClockEventQueue,
}

impl ManualClock {
    pub fn new(start: Instant) -> Arc<ManualClock> {
        Arc::new(ManualClock {
            now: Mutex::new(start),
            events: ClockEventQueue::new(),
        })
    }

    /// Moves the clock to `t` without generating an event.
    pub fn set_now(&self, t: Instant) {
        *self.now.lock().unwrap() = t;
    }

    /// Steps the clock forward by `d` without generating an event.
    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = now.add(d);
    }

    /// Moves the clock to `t` and broadcasts [`ClockEvents::SET`].
    pub fn jump_to(&self, t: Instant) {
        *self.now.lock().unwrap() = t;
        self.events.notify(ClockEvents::SET);
    }

    /// Broadcasts a rate-increase event without moving the clock.
    pub fn notify_rate_increase(&self) {
        self.events.notify(ClockEvents::RATE_INCREASE);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn wall_time_until(&self, _t: Instant, _now: Instant) -> Duration {
        Duration::MAX
    }

    fn subscribe(&self, waiter: &Arc<EventWaiter>) {
        self.events.subscribe(waiter);
    }

    fn unsubscribe(&self, waiter: &Arc<EventWaiter>) {
        self.events.unsubscribe(waiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn waiter_filters_on_interest() {
        let (tx, rx) = sync_channel(1);
        let waiter = EventWaiter::new(ClockEvents::SET, tx);

        waiter.notify(ClockEvents::RATE_INCREASE);
        assert!(rx.try_recv().is_err());

        waiter.notify(ClockEvents::SET | ClockEvents::RATE_INCREASE);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn waiter_coalesces_pending_signals() {
        let (tx, rx) = sync_channel(1);
        let waiter = EventWaiter::new(ClockEvents::SET, tx);

        waiter.notify(ClockEvents::SET);
        waiter.notify(ClockEvents::SET);
        waiter.notify(ClockEvents::SET);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn queue_unsubscribe_stops_delivery() {
        let queue = ClockEventQueue::new();
        let (tx, rx) = sync_channel(1);
        let waiter = Arc::new(EventWaiter::new(ClockEvents::SET, tx));

        queue.subscribe(&waiter);
        queue.notify(ClockEvents::SET);
        assert!(rx.try_recv().is_ok());

        queue.unsubscribe(&waiter);
        queue.notify(ClockEvents::SET);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn manual_clock_steps_and_jumps() {
        let clock = ManualClock::new(Instant::ZERO);
        let (tx, rx) = sync_channel(1);
        let waiter = Arc::new(EventWaiter::new(ClockEvents::SET, tx));
        clock.subscribe(&waiter);

        clock.advance(Duration::from_nanos(10));
        assert_eq!(clock.now(), Instant::from_nanos(10));
        assert!(rx.try_recv().is_err(), "silent step must not notify");

        clock.jump_to(Instant::from_nanos(5));
        assert_eq!(clock.now(), Instant::from_nanos(5));
        assert!(rx.try_recv().is_ok(), "jump must notify");

        assert_eq!(clock.readiness(ClockEvents::all()), ClockEvents::empty());
    }
}
