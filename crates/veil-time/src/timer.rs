use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Instant as StdInstant;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::clock::{Clock, ClockEvents, EventWaiter};
use crate::instant::{Duration, Instant};
use crate::setting::Setting;

type SharedClock = Arc<dyn Clock>;

/// Clock events that force the worker to reevaluate expirations early.
const TIMER_TICK_EVENTS: ClockEvents = ClockEvents::SET.union(ClockEvents::RATE_INCREASE);

/// Receives expirations from a [`Timer`].
pub trait TimerListener: Send + Sync {
    /// Called when the associated timer expires. `exp` is the number of
    /// expirations accrued since the last notification; it is never zero.
    /// `setting` is the setting the timer is about to keep. Returning
    /// `Some(s)` installs `s` instead, which lets a listener decommission the
    /// timer (by returning a disabled setting) upon delivering an expiration.
    ///
    /// Called with the timer's mutex held: implementations must not call
    /// back into the timer and must not take any lock that precedes the
    /// timer mutex in the lock order.
    fn notify(&self, exp: u64, setting: Setting) -> Option<Setting>;
}

/// Lifecycle state of a [`Timer`].
///
/// `Unpaused` and `Paused` convert freely into each other; `Destroyed` is
/// terminal and survives save/restore.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum PauseState {
    Unpaused,
    Paused,
    Destroyed,
}

/// A one-shot wall-clock wakeup shared between a timer and its worker.
///
/// `reset` arms a deadline, nudging the worker through the signal channel
/// only when the deadline moved earlier than the one the worker may already
/// be sleeping toward; a deadline that moved later is discovered when the
/// stale sleep runs out and the worker re-reads the kicker. Once the worker
/// observes a deadline expiring it disarms the kicker, so an expired
/// deadline wakes the worker exactly once until the next `reset`. A reset
/// racing with the disarm always leaves the earlier-deadline signal queued,
/// and every tick recomputes the deadline from the live setting, so no
/// wakeup is lost.
#[derive(Debug)]
struct Kicker {
    inner: Mutex<KickerInner>,
}

#[derive(Debug)]
struct KickerInner {
    deadline: Option<StdInstant>,
    nudge: SyncSender<()>,
}

impl Kicker {
    fn new(nudge: SyncSender<()>) -> Kicker {
        Kicker {
            inner: Mutex::new(KickerInner {
                deadline: None,
                nudge,
            }),
        }
    }

    /// Arms the kicker to fire after `wall`, treating negative spans as
    /// "fire immediately".
    fn reset(&self, wall: Duration) {
        let mut inner = self.inner.lock().unwrap();
        // A deadline too far out to represent behaves like an unarmed
        // kicker: the worker just blocks on the signal channel.
        let new = StdInstant::now().checked_add(wall.to_std_clamped());
        let need_nudge = match (inner.deadline, new) {
            (None, Some(_)) => true,
            (Some(cur), Some(new)) => new < cur,
            (_, None) => false,
        };
        inner.deadline = new;
        if need_nudge {
            let _ = inner.nudge.try_send(());
        }
    }

    fn stop(&self) {
        self.inner.lock().unwrap().deadline = None;
    }

    fn deadline(&self) -> Option<StdInstant> {
        self.inner.lock().unwrap().deadline
    }

    /// Disarms only if the armed deadline is still the one the caller
    /// observed expiring, preserving any concurrent `reset`.
    fn disarm(&self, observed: StdInstant) {
        let mut inner = self.inner.lock().unwrap();
        if inner.deadline == Some(observed) {
            inner.deadline = None;
        }
    }
}

/// Resources that exist only while a timer is live; discarded on save and
/// rebuilt by [`Timer::resume`].
#[derive(Debug)]
struct Transient {
    kicker: Arc<Kicker>,
    waiter: Arc<EventWaiter>,
}

struct TimerInner {
    setting: Setting,
    pause_state: PauseState,
    transient: Option<Transient>,
}

/// An optionally periodic timer driven by sampling a [`Clock`].
///
/// `Timer` semantics support the requirements of Linux's interval timers
/// (`setitimer(2)`, `timer_create(2)`, `timerfd_create(2)`): expirations are
/// counted rather than delivered individually, time may move backwards, and
/// the clock behind a timer can be replaced atomically.
///
/// Each timer owns a worker thread that wakes on a scheduled deadline or a
/// clock event, samples the clock, and notifies the listener of any accrued
/// expirations. Timers must be cleaned up with [`Timer::destroy`]; after
/// `destroy`, only [`Timer::pause`] and [`Timer::resume`] may be called (both
/// no-ops).
pub struct Timer {
    /// Current clock. Published outside `inner` so readers that only need to
    /// sample time can skip the mutex; the double indirection keeps the
    /// swapped value a single machine word even though `dyn Clock` references
    /// are fat.
    clock: ArcSwap<SharedClock>,

    /// Notified of expirations. Immutable.
    listener: Arc<dyn TimerListener>,

    self_ref: Weak<Timer>,

    inner: Mutex<TimerInner>,
}

impl Timer {
    /// Returns a new timer reading time from `clock` and sending expirations
    /// to `listener`. The timer is initially stopped, with no expiration or
    /// period configured.
    pub fn new(clock: Arc<dyn Clock>, listener: Arc<dyn TimerListener>) -> Arc<Timer> {
        let timer = Arc::new_cyclic(|self_ref| Timer {
            clock: ArcSwap::from_pointee(clock),
            listener,
            self_ref: self_ref.clone(),
            inner: Mutex::new(TimerInner {
                setting: Setting::default(),
                pause_state: PauseState::Unpaused,
                transient: None,
            }),
        });
        let mut inner = timer.inner.lock().unwrap();
        timer.init_locked(&mut inner);
        drop(inner);
        timer
    }

    /// Captures the timer's logical state. Timers are expected to be paused
    /// before saving; a destroyed timer saves as destroyed and disabled.
    pub fn save_state(&self) -> TimerState {
        let inner = self.inner.lock().unwrap();
        TimerState {
            setting: inner.setting,
            pause_state: inner.pause_state,
        }
    }

    /// Rebuilds a timer from saved state with no transient resources. The
    /// timer stays inert until [`Timer::resume`], which must not be called
    /// before `clock` is usable again. A timer saved as destroyed is rebuilt
    /// destroyed and stays permanently dead.
    pub fn restore(
        clock: Arc<dyn Clock>,
        listener: Arc<dyn TimerListener>,
        state: TimerState,
    ) -> Arc<Timer> {
        Arc::new_cyclic(|self_ref| Timer {
            clock: ArcSwap::from_pointee(clock),
            listener,
            self_ref: self_ref.clone(),
            inner: Mutex::new(TimerInner {
                setting: state.setting,
                pause_state: state.pause_state,
                transient: None,
            }),
        })
    }

    /// Releases the resources owned by the timer. Idempotent; `pause` and
    /// `resume` remain callable afterwards as no-ops, all other methods
    /// must not be used.
    pub fn destroy(&self) {
        let transient = {
            let mut inner = self.inner.lock().unwrap();
            inner.setting.enabled = false;
            // Destroyed turns any in-flight tick into a no-op before we
            // touch the kicker.
            inner.pause_state = PauseState::Destroyed;
            inner.transient.take()
        };
        let Some(transient) = transient else {
            return;
        };
        transient.kicker.stop();
        // Unsubscribe before the channel senders are dropped so the clock
        // cannot signal a disconnected channel.
        self.clock_ref().unsubscribe(&transient.waiter);
        // Dropping `transient` drops the last senders on the worker's signal
        // channel; the worker observes the disconnect and exits.
        debug!("timer destroyed");
    }

    /// Stops expiration delivery until [`Timer::resume`]. Idempotent.
    pub fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.pause_state != PauseState::Unpaused {
            return;
        }
        inner.pause_state = PauseState::Paused;
        // The kicker does not exist if we were restored but never resumed.
        if let Some(transient) = &inner.transient {
            transient.kicker.stop();
        }
    }

    /// Ends the effect of [`Timer::pause`], rebuilding transient state if it
    /// is missing (as it is after a restore). Idempotent.
    pub fn resume(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.pause_state {
            PauseState::Destroyed => return,
            PauseState::Unpaused if inner.transient.is_some() => return,
            PauseState::Unpaused | PauseState::Paused => {}
        }
        inner.pause_state = PauseState::Unpaused;

        // Initialization is deferred to resume because restore runs before
        // the surrounding kernel has necessarily reattached the clock's
        // timekeeper; sampling the clock any earlier could observe a
        // half-restored time source.
        self.init_locked(&mut inner);

        // Kick the worker in case it already existed and was sleeping.
        if let Some(transient) = &inner.transient {
            transient.kicker.reset(Duration::ZERO);
        }
    }

    /// Samples the clock, delivers any accrued expirations, and returns the
    /// sample time and the advanced setting.
    ///
    /// # Panics
    ///
    /// Panics if the timer is paused or destroyed: a paused timer's setting
    /// cannot be advanced to the current time.
    pub fn get(&self) -> (Instant, Setting) {
        let unlocked_clock = self.clock_ref();
        let now = unlocked_clock.now();
        let mut inner = self.inner.lock().unwrap();
        if inner.pause_state != PauseState::Unpaused {
            panic!(
                "Timer::get called on timer {:p} in pause state {:?}",
                self, inner.pause_state
            );
        }
        self.advance_locked(&mut inner, unlocked_clock, now)
    }

    /// Atomically replaces the timer's setting, returning the sample time
    /// and the previous setting advanced to that time. Enabling `setting`
    /// starts the timer; disabling it stops it.
    ///
    /// # Panics
    ///
    /// Panics if the timer is paused or destroyed.
    pub fn swap(&self, setting: Setting) -> (Instant, Setting) {
        self.swap_and(setting, None::<fn()>)
    }

    /// Like [`Timer::swap`], additionally running `f` between draining the
    /// expirations of the outgoing setting and installing the new one.
    ///
    /// `f` runs with the timer mutex held and must not call timer methods.
    /// If draining the outgoing setting notifies the listener, any
    /// replacement setting the listener returns is discarded: the setting is
    /// about to be overwritten regardless.
    ///
    /// # Panics
    ///
    /// Panics if the timer is paused or destroyed.
    pub fn swap_and<F: FnOnce()>(&self, setting: Setting, f: Option<F>) -> (Instant, Setting) {
        let unlocked_clock = self.clock_ref();
        let mut now = unlocked_clock.now();
        let mut inner = self.inner.lock().unwrap();
        if inner.pause_state != PauseState::Unpaused {
            panic!(
                "Timer::swap_and called on timer {:p} in pause state {:?}",
                self, inner.pause_state
            );
        }
        let clock = self.clock_ref();
        if !Arc::ptr_eq(&clock, &unlocked_clock) {
            now = clock.now();
        }
        let (old, old_exp) = inner.setting.advance(now);
        if old_exp > 0 {
            self.listener.notify(old_exp, old);
        }
        if let Some(f) = f {
            f();
        }
        let (new, new_exp) = setting.advance(now);
        inner.setting = new;
        if new_exp > 0 {
            if let Some(replacement) = self.listener.notify(new_exp, inner.setting) {
                inner.setting = replacement;
            }
        }
        self.reset_kicker_locked(&inner, &clock, now);
        (now, old)
    }

    /// Atomically replaces the timer's clock and setting.
    pub fn set_clock(&self, clock: Arc<dyn Clock>, setting: Setting) {
        let now = if setting.enabled {
            clock.now()
        } else {
            Instant::ZERO
        };
        let mut inner = self.inner.lock().unwrap();
        inner.setting = setting;
        let old = self.clock_ref();
        if !Arc::ptr_eq(&old, &clock) {
            if let Some(transient) = &inner.transient {
                old.unsubscribe(&transient.waiter);
                clock.subscribe(&transient.waiter);
            }
            self.clock.store(Arc::new(Arc::clone(&clock)));
        }
        self.reset_kicker_locked(&inner, &clock, now);
    }

    /// The clock the timer currently reads. Lock-free.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock_ref()
    }

    /// Immediately checks for expirations and reevaluates the next wakeup.
    /// No-op on a paused or destroyed timer.
    pub fn tick(&self) {
        let unlocked_clock = self.clock_ref();
        let now = unlocked_clock.now();
        let mut inner = self.inner.lock().unwrap();
        if inner.pause_state != PauseState::Unpaused {
            return;
        }
        self.advance_locked(&mut inner, unlocked_clock, now);
    }

    /// Shared core of `tick`/`get`: advance to `now`, notify, reschedule.
    /// `now` was sampled from `unlocked_clock` without the mutex; if the
    /// clock changed in the meantime it is resampled here.
    ///
    /// Returns the sample time and the advanced (pre-listener-replacement)
    /// setting.
    fn advance_locked(
        &self,
        inner: &mut TimerInner,
        unlocked_clock: SharedClock,
        mut now: Instant,
    ) -> (Instant, Setting) {
        let clock = self.clock_ref();
        if !Arc::ptr_eq(&clock, &unlocked_clock) {
            now = clock.now();
        }
        let (s, exp) = inner.setting.advance(now);
        inner.setting = s;
        if exp > 0 {
            if let Some(replacement) = self.listener.notify(exp, inner.setting) {
                inner.setting = replacement;
            }
        }
        self.reset_kicker_locked(inner, &clock, now);
        (now, s)
    }

    fn reset_kicker_locked(&self, inner: &TimerInner, clock: &SharedClock, now: Instant) {
        if inner.setting.enabled {
            if let Some(transient) = &inner.transient {
                // wall_time_until may be negative; the kicker treats that as
                // "fire immediately".
                transient
                    .kicker
                    .reset(clock.wall_time_until(inner.setting.next, now));
            }
        }
        // When the setting is disabled the kicker is left alone: in the
        // common case this runs on the worker, whose deadline has already
        // been consumed, and at worst one spurious wakeup finds nothing to
        // do.
    }

    /// Builds the transient state if it is absent: signal channel, kicker,
    /// clock subscription, worker thread.
    fn init_locked(&self, inner: &mut TimerInner) {
        if inner.transient.is_some() {
            return;
        }
        let (signal_tx, signal_rx) = sync_channel(1);
        let kicker = Arc::new(Kicker::new(signal_tx.clone()));
        let waiter = Arc::new(EventWaiter::new(TIMER_TICK_EVENTS, signal_tx));
        self.clock_ref().subscribe(&waiter);
        let worker_ref = self.self_ref.clone();
        thread::Builder::new()
            .name("veil-timer".to_string())
            .spawn(move || run_worker(worker_ref, signal_rx))
            .expect("failed to spawn timer worker thread");
        inner.transient = Some(Transient { kicker, waiter });
    }

    fn clock_ref(&self) -> SharedClock {
        Arc::clone(&**self.clock.load())
    }

    fn kicker_deadline(&self) -> Option<StdInstant> {
        let inner = self.inner.lock().unwrap();
        inner.transient.as_ref().and_then(|t| t.kicker.deadline())
    }

    fn disarm_kicker(&self, observed: StdInstant) {
        let inner = self.inner.lock().unwrap();
        if let Some(transient) = &inner.transient {
            transient.kicker.disarm(observed);
        }
    }
}

/// Per-timer worker loop: block until the kicker deadline passes or a signal
/// (clock event, kick) arrives, then reevaluate the timer. Exits when the
/// signal channel disconnects (destroy) or the timer itself is dropped.
fn run_worker(timer: Weak<Timer>, signal: Receiver<()>) {
    loop {
        let deadline = match timer.upgrade() {
            Some(timer) => timer.kicker_deadline(),
            None => break,
        };
        let expired = match deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(StdInstant::now());
                match signal.recv_timeout(timeout) {
                    Ok(()) => None,
                    Err(RecvTimeoutError::Timeout) => Some(deadline),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match signal.recv() {
                Ok(()) => None,
                Err(_) => break,
            },
        };
        let Some(timer) = timer.upgrade() else {
            break;
        };
        if let Some(deadline) = expired {
            timer.disarm_kicker(deadline);
        }
        timer.tick();
    }
    debug!("timer worker exiting");
}

/// The portion of a [`Timer`] preserved across checkpoint/restore.
///
/// The wakeup deadline, clock subscription, and worker thread are discarded
/// at save time and rebuilt by [`Timer::resume`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerState {
    pub setting: Setting,
    pub pause_state: PauseState,
}

/// A [`TimerListener`] that signals a bounded channel on expiration.
///
/// `notify` performs a non-blocking send: if a wakeup is already pending the
/// new expirations fold into it. The receiving half disconnects once every
/// holder of the listener, including the owning timer, has been dropped.
#[derive(Debug)]
pub struct ChannelListener {
    tx: Mutex<SyncSender<()>>,
}

impl ChannelListener {
    pub fn new() -> (Arc<ChannelListener>, Receiver<()>) {
        let (tx, rx) = sync_channel(1);
        (Arc::new(ChannelListener { tx: Mutex::new(tx) }), rx)
    }
}

impl TimerListener for ChannelListener {
    fn notify(&self, _exp: u64, _setting: Setting) -> Option<Setting> {
        let _ = self.tx.lock().unwrap().try_send(());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;

    struct DiscardListener;

    impl TimerListener for DiscardListener {
        fn notify(&self, _exp: u64, _setting: Setting) -> Option<Setting> {
            None
        }
    }

    #[test]
    fn new_timer_is_unpaused_and_disabled() {
        let clock = ManualClock::new(Instant::ZERO);
        let timer = Timer::new(clock, Arc::new(DiscardListener));
        let (_, setting) = timer.get();
        assert_eq!(setting, Setting::default());
        timer.destroy();
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let clock = ManualClock::new(Instant::ZERO);
        let timer = Timer::new(clock, Arc::new(DiscardListener));
        timer.pause();
        timer.pause();
        timer.resume();
        timer.resume();
        let _ = timer.get();
        timer.destroy();
    }

    #[test]
    fn destroy_is_idempotent_and_allows_pause_resume() {
        let clock = ManualClock::new(Instant::ZERO);
        let timer = Timer::new(clock, Arc::new(DiscardListener));
        timer.destroy();
        timer.destroy();
        timer.pause();
        timer.resume();
        assert_eq!(
            timer.save_state(),
            TimerState {
                setting: Setting::default(),
                pause_state: PauseState::Destroyed,
            }
        );
    }

    #[test]
    fn restored_destroyed_timer_stays_dead() {
        let clock = ManualClock::new(Instant::ZERO);
        let timer = Timer::new(Arc::clone(&clock) as Arc<dyn Clock>, Arc::new(DiscardListener));
        timer.destroy();
        let state = timer.save_state();
        assert_eq!(state.pause_state, PauseState::Destroyed);

        // Destroyed is terminal: neither restore nor pause/resume may bring
        // the timer back to life.
        let restored = Timer::restore(clock, Arc::new(DiscardListener), state);
        restored.resume();
        restored.pause();
        restored.resume();
        assert_eq!(restored.save_state().pause_state, PauseState::Destroyed);
        restored.destroy();
        assert_eq!(restored.save_state().pause_state, PauseState::Destroyed);
    }

    #[test]
    #[should_panic(expected = "pause state")]
    fn get_on_paused_timer_panics() {
        let clock = ManualClock::new(Instant::ZERO);
        let timer = Timer::new(clock, Arc::new(DiscardListener));
        timer.pause();
        let _ = timer.get();
    }

    #[test]
    fn save_state_does_not_advance_the_setting() {
        let clock = ManualClock::new(Instant::ZERO);
        let timer = Timer::new(Arc::clone(&clock) as Arc<dyn Clock>, Arc::new(DiscardListener));
        timer.swap(Setting {
            enabled: true,
            next: Instant::from_nanos(100),
            period: Duration::ZERO,
        });

        // Pause first so the worker cannot advance the setting once the
        // deadline passes below.
        timer.pause();
        clock.set_now(Instant::from_nanos(500));

        let state = timer.save_state();
        assert!(state.setting.enabled);
        assert_eq!(state.setting.next, Instant::from_nanos(100));
        timer.destroy();
    }

    #[test]
    fn restore_round_trips_logical_state() {
        let clock = ManualClock::new(Instant::ZERO);
        let timer = Timer::new(Arc::clone(&clock) as Arc<dyn Clock>, Arc::new(DiscardListener));
        timer.swap(Setting {
            enabled: true,
            next: Instant::from_nanos(1_000),
            period: Duration::from_nanos(10),
        });
        timer.pause();
        let state = timer.save_state();
        timer.destroy();

        let restored = Timer::restore(clock, Arc::new(DiscardListener), state);
        assert_eq!(restored.save_state(), state);
        restored.resume();
        let (_, setting) = restored.get();
        assert_eq!(setting.next, Instant::from_nanos(1_000));
        restored.destroy();
    }
}
