//! Timer system for Trellis.
//!
//! Timers are driven by one internal timing thread owned by [`TimerService`].
//! When a timer expires the thread posts an [`EventKind::Timeout`] event into
//! the application queue; it never touches the object tree.
//!
//! Repeating timers are scheduled from a fixed origin: the k-th expiry is due
//! at `origin + k * interval`, independent of how late earlier expiries were
//! processed. If the thread falls behind by several intervals the missed
//! expiries are coalesced into one event whose `tick` is the latest due `k`.
//!
//! Expiry processing and posting happen while the timer lock is held, so once
//! [`TimerService::cancel`] returns no further event for that timer is posted.
//!
//! [`EventKind::Timeout`]: crate::EventKind::Timeout

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use slotmap::{SlotMap, new_key_type};

use crate::application::AppProxy;
use crate::error::TimerError;
use crate::event::Event;
use crate::object::ObjectId;

new_key_type! {
    /// A unique identifier for a timer.
    pub struct TimerId;
}

/// Result type for timer operations.
pub type TimerResult<T> = std::result::Result<T, TimerError>;

/// Lifecycle of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Registered but not counting down.
    Idle,
    /// Counting down to the next expiry.
    Armed,
    /// Armed, with the countdown frozen until resumed.
    Paused,
    /// An expiry is being posted.
    Firing,
    /// Cancelled and unregistered.
    Cancelled,
}

/// Internal timer data.
#[derive(Debug)]
struct TimerData {
    interval: Duration,
    repeating: bool,
    target: Option<ObjectId>,
    state: TimerState,
    /// Instant the current countdown was armed at.
    origin: Instant,
    /// When this timer should next fire. `None` while idle, or when the
    /// deadline is too far out to be represented.
    next_fire: Option<Instant>,
    /// Set while paused.
    paused_at: Option<Instant>,
    /// Expiries since the timer was last armed.
    ticks: u64,
}

impl TimerData {
    fn fires_once(&self) -> bool {
        !self.repeating || self.interval.is_zero()
    }
}

/// An entry in the timer queue (min-heap by fire time).
#[derive(Debug, Clone, Copy)]
struct TimerQueueEntry {
    id: TimerId,
    fire_time: Instant,
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        other.fire_time.cmp(&self.fire_time)
    }
}

/// `interval * k`, or `None` if it does not fit in a `Duration`.
fn scaled(interval: Duration, k: u64) -> Option<Duration> {
    let nanos = interval.as_nanos().checked_mul(u128::from(k))?;
    let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
    Some(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

/// Timer bookkeeping without any threads.
///
/// [`TimerService`] wraps this in a mutex and drives it from its timing
/// thread; tests can drive it directly with explicit instants.
#[derive(Debug, Default)]
pub struct TimerManager {
    timers: SlotMap<TimerId, TimerData>,
    queue: BinaryHeap<TimerQueueEntry>,
}

impl TimerManager {
    /// Create a new timer manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an idle timer.
    pub fn create(&mut self, interval: Duration, repeating: bool, target: Option<ObjectId>) -> TimerId {
        let now = Instant::now();
        let id = self.timers.insert(TimerData {
            interval,
            repeating,
            target,
            state: TimerState::Idle,
            origin: now,
            next_fire: None,
            paused_at: None,
            ticks: 0,
        });
        tracing::trace!(target: "trellis_core::timer", ?id, ?interval, repeating, "timer created");
        id
    }

    /// Arm an idle or paused timer so it first expires at `now + interval`.
    ///
    /// A deadline past the range of `Instant` leaves the timer armed but it
    /// never expires.
    pub fn arm(&mut self, id: TimerId, now: Instant) -> TimerResult<()> {
        let timer = self.timers.get(id).ok_or(TimerError::InvalidTimerId(id))?;
        if timer.state == TimerState::Armed {
            return Err(TimerError::AlreadyArmed(id));
        }
        self.schedule(id, now);
        Ok(())
    }

    /// Re-arm from `now`, whether idle or armed.
    pub fn restart(&mut self, id: TimerId, now: Instant) -> TimerResult<()> {
        if !self.timers.contains_key(id) {
            return Err(TimerError::InvalidTimerId(id));
        }
        self.schedule(id, now);
        Ok(())
    }

    /// Change the interval. An armed timer restarts its countdown from `now`;
    /// a paused one restarts it from the moment it was paused.
    pub fn set_interval(&mut self, id: TimerId, interval: Duration, now: Instant) -> TimerResult<()> {
        let timer = self.timers.get_mut(id).ok_or(TimerError::InvalidTimerId(id))?;
        timer.interval = interval;
        let state = timer.state;
        if state == TimerState::Armed {
            self.schedule(id, now);
        } else if state == TimerState::Paused
            && let Some(paused_at) = timer.paused_at
        {
            timer.origin = paused_at;
            timer.next_fire = paused_at.checked_add(interval);
            timer.ticks = 0;
        }
        Ok(())
    }

    /// Interval expressed as expiries per second.
    pub fn frequency(&self, id: TimerId) -> TimerResult<f64> {
        self.interval(id).map(|interval| interval.as_secs_f64().recip())
    }

    /// Set the interval from a frequency in Hz.
    pub fn set_frequency(&mut self, id: TimerId, hz: f64, now: Instant) -> TimerResult<()> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(TimerError::InvalidFrequency(hz.to_string()));
        }
        let interval = Duration::try_from_secs_f64(hz.recip())
            .map_err(|_| TimerError::InvalidFrequency(hz.to_string()))?;
        self.set_interval(id, interval, now)
    }

    /// Disarm a timer but keep it registered. `arm` or `restart` starts it
    /// again.
    pub fn stop(&mut self, id: TimerId) -> TimerResult<()> {
        let timer = self.timers.get_mut(id).ok_or(TimerError::InvalidTimerId(id))?;
        timer.state = TimerState::Idle;
        timer.next_fire = None;
        timer.paused_at = None;
        timer.ticks = 0;
        tracing::trace!(target: "trellis_core::timer", ?id, "timer stopped");
        Ok(())
    }

    /// Freeze an armed timer's countdown.
    pub fn pause(&mut self, id: TimerId, now: Instant) -> TimerResult<()> {
        let timer = self.timers.get_mut(id).ok_or(TimerError::InvalidTimerId(id))?;
        if timer.state != TimerState::Armed {
            return Err(TimerError::NotArmed(id));
        }
        // The heap entry goes stale with the state change.
        timer.state = TimerState::Paused;
        timer.paused_at = Some(now);
        tracing::trace!(target: "trellis_core::timer", ?id, "timer paused");
        Ok(())
    }

    /// Continue a paused countdown from where it stopped.
    ///
    /// The repeat grid moves by the length of the pause.
    pub fn resume(&mut self, id: TimerId, now: Instant) -> TimerResult<()> {
        let timer = self.timers.get_mut(id).ok_or(TimerError::InvalidTimerId(id))?;
        let paused_at = match (timer.state, timer.paused_at) {
            (TimerState::Paused, Some(paused_at)) => paused_at,
            _ => return Err(TimerError::NotPaused(id)),
        };
        let shift = now.saturating_duration_since(paused_at);
        timer.origin = timer.origin.checked_add(shift).unwrap_or(now);
        timer.next_fire = timer.next_fire.and_then(|fire| fire.checked_add(shift));
        timer.paused_at = None;
        timer.state = TimerState::Armed;
        if let Some(fire_time) = timer.next_fire {
            self.queue.push(TimerQueueEntry { id, fire_time });
        }
        tracing::trace!(target: "trellis_core::timer", ?id, ?shift, "timer resumed");
        Ok(())
    }

    fn schedule(&mut self, id: TimerId, now: Instant) {
        let Some(timer) = self.timers.get_mut(id) else {
            return;
        };
        let fire_time = now.checked_add(timer.interval);
        timer.origin = now;
        timer.next_fire = fire_time;
        timer.paused_at = None;
        timer.ticks = 0;
        timer.state = TimerState::Armed;
        // Any older heap entry for this id is now stale and skipped on pop.
        if let Some(fire_time) = fire_time {
            self.queue.push(TimerQueueEntry { id, fire_time });
        }
        tracing::trace!(target: "trellis_core::timer", ?id, ?fire_time, "timer armed");
    }

    /// Cancel and unregister a timer.
    pub fn cancel(&mut self, id: TimerId) -> TimerResult<()> {
        match self.timers.remove(id) {
            Some(_) => {
                tracing::trace!(target: "trellis_core::timer", ?id, "timer cancelled");
                Ok(())
            }
            None => Err(TimerError::InvalidTimerId(id)),
        }
    }

    /// Cancel every timer.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        self.timers.clear();
        self.queue.clear();
        count
    }

    /// State of a timer. Ids that are not registered report `Cancelled`.
    pub fn state(&self, id: TimerId) -> TimerState {
        self.timers.get(id).map_or(TimerState::Cancelled, |t| t.state)
    }

    /// Whether the id names a registered timer.
    pub fn is_registered(&self, id: TimerId) -> bool {
        self.timers.contains_key(id)
    }

    /// The configured interval.
    pub fn interval(&self, id: TimerId) -> TimerResult<Duration> {
        self.timers
            .get(id)
            .map(|t| t.interval)
            .ok_or(TimerError::InvalidTimerId(id))
    }

    /// Time left until the next expiry; `None` if the timer is idle.
    ///
    /// A paused timer reports the frozen remainder. An armed timer whose
    /// deadline cannot be represented reports `Duration::MAX`.
    pub fn remaining(&self, id: TimerId, now: Instant) -> TimerResult<Option<Duration>> {
        let timer = self.timers.get(id).ok_or(TimerError::InvalidTimerId(id))?;
        let left = |from: Instant| {
            timer
                .next_fire
                .map_or(Duration::MAX, |fire| fire.saturating_duration_since(from))
        };
        Ok(match (timer.state, timer.paused_at) {
            (TimerState::Armed | TimerState::Firing, _) => Some(left(now)),
            (TimerState::Paused, Some(paused_at)) => Some(left(paused_at)),
            _ => None,
        })
    }

    /// Whether the timer is paused.
    pub fn is_paused(&self, id: TimerId) -> bool {
        self.state(id) == TimerState::Paused
    }

    /// Whether the timer is counting down.
    pub fn is_running(&self, id: TimerId) -> bool {
        self.state(id) == TimerState::Armed
    }

    /// Number of armed timers.
    pub fn active_count(&self) -> usize {
        self.timers
            .values()
            .filter(|t| t.state == TimerState::Armed)
            .count()
    }

    /// Number of registered timers, idle or armed.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timers are registered.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Get the duration until the next timer fires, if any.
    pub fn time_until_next(&mut self, now: Instant) -> Option<Duration> {
        while let Some(entry) = self.queue.peek() {
            if self.is_stale(entry) {
                self.queue.pop();
            } else {
                break;
            }
        }
        self.queue
            .peek()
            .map(|entry| entry.fire_time.saturating_duration_since(now))
    }

    fn is_stale(&self, entry: &TimerQueueEntry) -> bool {
        self.timers
            .get(entry.id)
            .is_none_or(|t| t.state != TimerState::Armed || t.next_fire != Some(entry.fire_time))
    }

    /// Fire every timer due at `now`, handing each timeout event to `post`.
    ///
    /// Returns the number of events produced.
    #[tracing::instrument(skip(self, post), target = "trellis_core::timer", level = "trace")]
    pub fn process_expired(&mut self, now: Instant, mut post: impl FnMut(Event)) -> usize {
        let mut fired = 0;
        while let Some(&entry) = self.queue.peek() {
            if entry.fire_time > now {
                break;
            }
            self.queue.pop();
            if self.is_stale(&entry) {
                continue;
            }
            let id = entry.id;
            let Some(timer) = self.timers.get_mut(id) else {
                continue;
            };

            timer.state = TimerState::Firing;
            let (tick, scheduled) = if timer.fires_once() {
                (1, entry.fire_time)
            } else {
                let interval_nanos = timer.interval.as_nanos();
                let elapsed = now.duration_since(timer.origin).as_nanos();
                let k = u64::try_from(elapsed / interval_nanos).unwrap_or(u64::MAX).max(1);
                if k > timer.ticks + 1 {
                    tracing::debug!(target: "trellis_core::timer", ?id, missed = k - timer.ticks - 1, "coalescing missed ticks");
                }
                let scheduled = scaled(timer.interval, k)
                    .and_then(|offset| timer.origin.checked_add(offset))
                    .unwrap_or(entry.fire_time);
                (k, scheduled)
            };
            timer.ticks = tick;

            let mut event = Event::timeout(id, tick).with_timestamp(scheduled);
            if let Some(target) = timer.target {
                event = event.with_target(target);
            }
            tracing::trace!(target: "trellis_core::timer", ?id, tick, "timer fired");
            post(event);
            fired += 1;

            if timer.fires_once() {
                timer.state = TimerState::Idle;
                timer.next_fire = None;
            } else {
                let next = tick
                    .checked_add(1)
                    .and_then(|k| scaled(timer.interval, k))
                    .and_then(|offset| timer.origin.checked_add(offset));
                timer.state = TimerState::Armed;
                timer.next_fire = next;
                if let Some(fire_time) = next {
                    self.queue.push(TimerQueueEntry { id, fire_time });
                }
            }
        }
        fired
    }
}

struct ServiceState {
    manager: TimerManager,
    stopped: bool,
}

struct ServiceShared {
    state: Mutex<ServiceState>,
    changed: Condvar,
}

/// Owns the timers and the thread that fires them.
pub struct TimerService {
    shared: Arc<ServiceShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Start the timing thread. Expiries are posted through `proxy`.
    pub fn new(proxy: AppProxy) -> TimerResult<Self> {
        let shared = Arc::new(ServiceShared {
            state: Mutex::new(ServiceState {
                manager: TimerManager::new(),
                stopped: false,
            }),
            changed: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("trellis-timer".to_string())
            .spawn(move || timer_loop(&thread_shared, &proxy))
            .map_err(|e| TimerError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    fn with_manager<R>(&self, f: impl FnOnce(&mut TimerManager) -> TimerResult<R>) -> TimerResult<R> {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return Err(TimerError::ServiceStopped);
        }
        let result = f(&mut state.manager);
        drop(state);
        self.shared.changed.notify_one();
        result
    }

    /// Create and arm a timer.
    ///
    /// A zero interval fires once as soon as the timing thread runs, even
    /// when `repeating` is set.
    pub fn start(
        &self,
        interval: Duration,
        repeating: bool,
        target: Option<ObjectId>,
    ) -> TimerResult<TimerId> {
        self.with_manager(|manager| {
            let id = manager.create(interval, repeating, target);
            manager.arm(id, Instant::now())?;
            Ok(id)
        })
    }

    /// Start a one-shot timer.
    pub fn single_shot(&self, interval: Duration, target: Option<ObjectId>) -> TimerResult<TimerId> {
        self.start(interval, false, target)
    }

    /// Start a repeating timer.
    pub fn repeating(&self, interval: Duration, target: Option<ObjectId>) -> TimerResult<TimerId> {
        self.start(interval, true, target)
    }

    /// Register an idle timer; see [`arm`](Self::arm).
    pub fn create(
        &self,
        interval: Duration,
        repeating: bool,
        target: Option<ObjectId>,
    ) -> TimerResult<TimerId> {
        self.with_manager(|manager| Ok(manager.create(interval, repeating, target)))
    }

    /// Arm an idle timer. Fails if it is already armed.
    pub fn arm(&self, id: TimerId) -> TimerResult<()> {
        self.with_manager(|manager| manager.arm(id, Instant::now()))
    }

    /// Restart the countdown from now, from idle or armed.
    pub fn restart(&self, id: TimerId) -> TimerResult<()> {
        self.with_manager(|manager| manager.restart(id, Instant::now()))
    }

    /// Change the interval; an armed timer restarts from now.
    pub fn set_interval(&self, id: TimerId, interval: Duration) -> TimerResult<()> {
        self.with_manager(|manager| manager.set_interval(id, interval, Instant::now()))
    }

    /// Disarm a timer but keep it registered. No new timeout for `id` is
    /// posted after this returns; one already queued is still delivered.
    pub fn stop(&self, id: TimerId) -> TimerResult<()> {
        self.with_manager(|manager| manager.stop(id))
    }

    /// Freeze an armed timer's countdown.
    pub fn pause(&self, id: TimerId) -> TimerResult<()> {
        self.with_manager(|manager| manager.pause(id, Instant::now()))
    }

    /// Continue a paused countdown.
    pub fn resume(&self, id: TimerId) -> TimerResult<()> {
        self.with_manager(|manager| manager.resume(id, Instant::now()))
    }

    /// Interval expressed as expiries per second.
    pub fn frequency(&self, id: TimerId) -> TimerResult<f64> {
        self.shared.state.lock().manager.frequency(id)
    }

    /// Set the interval from a frequency in Hz.
    pub fn set_frequency(&self, id: TimerId, hz: f64) -> TimerResult<()> {
        self.with_manager(|manager| manager.set_frequency(id, hz, Instant::now()))
    }

    /// Cancel a timer. No timeout for `id` is posted after this returns.
    pub fn cancel(&self, id: TimerId) -> TimerResult<()> {
        let mut state = self.shared.state.lock();
        state.manager.cancel(id)
    }

    /// Time left until the next expiry; `None` if idle.
    pub fn remaining(&self, id: TimerId) -> TimerResult<Option<Duration>> {
        self.shared.state.lock().manager.remaining(id, Instant::now())
    }

    /// The configured interval.
    pub fn interval(&self, id: TimerId) -> TimerResult<Duration> {
        self.shared.state.lock().manager.interval(id)
    }

    /// State of a timer; unregistered ids report `Cancelled`.
    pub fn state(&self, id: TimerId) -> TimerState {
        self.shared.state.lock().manager.state(id)
    }

    /// Whether the id names a registered timer.
    pub fn is_registered(&self, id: TimerId) -> bool {
        self.shared.state.lock().manager.is_registered(id)
    }

    /// Whether the timer is paused.
    pub fn is_paused(&self, id: TimerId) -> bool {
        self.shared.state.lock().manager.is_paused(id)
    }

    /// Whether the timer is counting down.
    pub fn is_running(&self, id: TimerId) -> bool {
        self.shared.state.lock().manager.is_running(id)
    }

    /// Number of armed timers.
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().manager.active_count()
    }

    /// Cancel every timer and join the timing thread. Idempotent.
    pub fn shutdown(&self) {
        let cancelled = {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.manager.cancel_all()
        };
        self.shared.changed.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::warn!(target: "trellis_core::timer", "timer thread panicked");
            }
            tracing::debug!(target: "trellis_core::timer", cancelled, "timer service stopped");
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TimerService")
            .field("timers", &state.manager.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

fn timer_loop(shared: &ServiceShared, proxy: &AppProxy) {
    let mut state = shared.state.lock();
    while !state.stopped {
        let now = Instant::now();
        state.manager.process_expired(now, |event| {
            if proxy.post_event(event).is_err() {
                tracing::trace!(target: "trellis_core::timer", "event queue closed, timeout dropped");
            }
        });
        match state.manager.time_until_next(Instant::now()) {
            Some(wait) if wait.is_zero() => continue,
            Some(wait) => {
                shared.changed.wait_for(&mut state, wait);
            }
            None => shared.changed.wait(&mut state),
        }
    }
}

static_assertions::assert_impl_all!(TimerService: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::event::EventKind;

    fn collect(manager: &mut TimerManager, now: Instant) -> Vec<Event> {
        let mut events = Vec::new();
        manager.process_expired(now, |e| events.push(e));
        events
    }

    fn tick_of(event: &Event) -> u64 {
        match event.kind() {
            EventKind::Timeout { tick, .. } => *tick,
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_one_shot_fires_once_and_goes_idle() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(10), false, None);
        manager.arm(id, start).unwrap();

        assert!(collect(&mut manager, start + Duration::from_millis(5)).is_empty());
        let events = collect(&mut manager, start + Duration::from_millis(10));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timer_id(), Some(id));
        assert_eq!(manager.state(id), TimerState::Idle);
        assert!(collect(&mut manager, start + Duration::from_secs(1)).is_empty());

        // Idle timers can be re-armed.
        manager.arm(id, start).unwrap();
        assert_eq!(collect(&mut manager, start + Duration::from_millis(10)).len(), 1);
    }

    #[test]
    fn test_arm_armed_timer_fails() {
        let mut manager = TimerManager::new();
        let id = manager.create(Duration::from_millis(10), true, None);
        manager.arm(id, Instant::now()).unwrap();
        let err = manager.arm(id, Instant::now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_repeating_uses_fixed_origin() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let interval = Duration::from_millis(10);
        let id = manager.create(interval, true, None);
        manager.arm(id, start).unwrap();

        // Processed late, but the next deadline stays on the grid.
        let events = collect(&mut manager, start + Duration::from_millis(13));
        assert_eq!(events.len(), 1);
        assert_eq!(tick_of(&events[0]), 1);
        assert_eq!(manager.remaining(id, start + Duration::from_millis(13)).unwrap(), Some(Duration::from_millis(7)));

        let events = collect(&mut manager, start + Duration::from_millis(20));
        assert_eq!(tick_of(&events[0]), 2);
        assert_eq!(events[0].timestamp(), start + Duration::from_millis(20));
    }

    #[test]
    fn test_missed_ticks_are_coalesced() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(10), true, None);
        manager.arm(id, start).unwrap();

        let events = collect(&mut manager, start + Duration::from_millis(55));
        assert_eq!(events.len(), 1);
        assert_eq!(tick_of(&events[0]), 5);
        assert_eq!(
            manager.remaining(id, start + Duration::from_millis(55)).unwrap(),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_zero_interval_fires_once() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::ZERO, true, None);
        manager.arm(id, start).unwrap();

        assert_eq!(collect(&mut manager, start).len(), 1);
        assert!(collect(&mut manager, start + Duration::from_secs(1)).is_empty());
        assert_eq!(manager.state(id), TimerState::Idle);
    }

    #[test]
    fn test_cancel_unregisters() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(10), true, None);
        manager.arm(id, start).unwrap();
        manager.cancel(id).unwrap();

        assert!(!manager.is_registered(id));
        assert_eq!(manager.state(id), TimerState::Cancelled);
        assert!(collect(&mut manager, start + Duration::from_secs(1)).is_empty());
        assert_eq!(manager.cancel(id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(manager.time_until_next(start), None);
    }

    #[test]
    fn test_restart_moves_deadline() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(10), false, None);
        manager.arm(id, start).unwrap();
        manager.restart(id, start + Duration::from_millis(8)).unwrap();

        // The original deadline is stale now.
        assert!(collect(&mut manager, start + Duration::from_millis(12)).is_empty());
        assert_eq!(collect(&mut manager, start + Duration::from_millis(18)).len(), 1);
    }

    #[test]
    fn test_set_interval_rearms() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(100), true, None);
        manager.arm(id, start).unwrap();
        manager
            .set_interval(id, Duration::from_millis(5), start)
            .unwrap();

        assert_eq!(manager.interval(id).unwrap(), Duration::from_millis(5));
        assert_eq!(collect(&mut manager, start + Duration::from_millis(5)).len(), 1);
    }

    #[test]
    fn test_target_is_carried() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let target = ObjectId::default();
        let id = manager.create(Duration::from_millis(1), false, Some(target));
        manager.arm(id, start).unwrap();

        let events = collect(&mut manager, start + Duration::from_millis(1));
        assert_eq!(events[0].target(), Some(target));
    }

    #[test]
    fn test_earliest_deadline_first() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let slow = manager.create(Duration::from_millis(30), false, None);
        let fast = manager.create(Duration::from_millis(10), false, None);
        manager.arm(slow, start).unwrap();
        manager.arm(fast, start).unwrap();

        assert_eq!(manager.time_until_next(start), Some(Duration::from_millis(10)));
        let events = collect(&mut manager, start + Duration::from_millis(40));
        let ids: Vec<_> = events.iter().filter_map(Event::timer_id).collect();
        assert_eq!(ids, vec![fast, slow]);
    }

    #[test]
    fn test_unrepresentable_deadline_never_fires() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::MAX, false, None);
        manager.arm(id, start).unwrap();

        assert_eq!(manager.state(id), TimerState::Armed);
        assert_eq!(manager.remaining(id, start).unwrap(), Some(Duration::MAX));
        assert_eq!(manager.time_until_next(start), None);
        assert!(collect(&mut manager, start + Duration::from_secs(3600)).is_empty());

        manager.restart(id, start).unwrap();
        manager.set_interval(id, Duration::MAX, start).unwrap();
        let huge = manager.create(Duration::from_secs(u64::MAX), true, None);
        manager.arm(huge, start).unwrap();
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_repeat_past_instant_range_stays_armed() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        // The first expiry fits, the second is out of range on common platforms.
        let interval = Duration::from_secs(i64::MAX as u64 / 2 + 1);
        let Some(due) = start.checked_add(interval) else {
            return;
        };
        let id = manager.create(interval, true, None);
        manager.arm(id, start).unwrap();

        let events = collect(&mut manager, due);
        assert_eq!(events.len(), 1);
        assert_eq!(tick_of(&events[0]), 1);
        assert_eq!(events[0].timestamp(), due);
        assert_eq!(manager.state(id), TimerState::Armed);
        let expected = match due.checked_add(interval) {
            Some(_) => interval,
            None => Duration::MAX,
        };
        assert_eq!(manager.remaining(id, due).unwrap(), Some(expected));
    }

    #[test]
    fn test_stop_keeps_registration() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(10), true, None);
        manager.arm(id, start).unwrap();
        manager.stop(id).unwrap();

        assert!(manager.is_registered(id));
        assert_eq!(manager.state(id), TimerState::Idle);
        assert_eq!(manager.remaining(id, start).unwrap(), None);
        assert!(collect(&mut manager, start + Duration::from_millis(50)).is_empty());
        assert_eq!(manager.pause(id, start).unwrap_err(), TimerError::NotArmed(id));
        assert_eq!(manager.resume(id, start).unwrap_err().kind(), ErrorKind::InvalidState);

        let later = start + Duration::from_millis(100);
        manager.arm(id, later).unwrap();
        let events = collect(&mut manager, later + Duration::from_millis(10));
        assert_eq!(events.len(), 1);
        assert_eq!(tick_of(&events[0]), 1);
    }

    #[test]
    fn test_pause_freezes_countdown() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(10), false, None);
        manager.arm(id, start).unwrap();

        manager.pause(id, start + Duration::from_millis(4)).unwrap();
        assert!(manager.is_paused(id));
        assert!(!manager.is_running(id));
        assert_eq!(manager.active_count(), 0);
        assert_eq!(
            manager.remaining(id, start + Duration::from_millis(80)).unwrap(),
            Some(Duration::from_millis(6))
        );
        assert!(collect(&mut manager, start + Duration::from_millis(50)).is_empty());
        assert_eq!(manager.pause(id, start).unwrap_err().kind(), ErrorKind::InvalidState);

        let resumed = start + Duration::from_millis(100);
        manager.resume(id, resumed).unwrap();
        assert!(manager.is_running(id));
        assert_eq!(manager.remaining(id, resumed).unwrap(), Some(Duration::from_millis(6)));
        assert!(collect(&mut manager, resumed + Duration::from_millis(5)).is_empty());
        assert_eq!(collect(&mut manager, resumed + Duration::from_millis(6)).len(), 1);
        assert_eq!(manager.resume(id, resumed).unwrap_err(), TimerError::NotPaused(id));
    }

    #[test]
    fn test_resume_shifts_repeat_grid() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let ms = Duration::from_millis;
        let id = manager.create(ms(10), true, None);
        manager.arm(id, start).unwrap();
        assert_eq!(collect(&mut manager, start + ms(10)).len(), 1);

        manager.pause(id, start + ms(15)).unwrap();
        manager.resume(id, start + ms(45)).unwrap();

        assert!(collect(&mut manager, start + ms(49)).is_empty());
        let events = collect(&mut manager, start + ms(50));
        assert_eq!(events.len(), 1);
        assert_eq!(tick_of(&events[0]), 2);
        assert_eq!(events[0].timestamp(), start + ms(50));
    }

    #[test]
    fn test_set_interval_while_paused_restarts_frozen_countdown() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(10), false, None);
        manager.arm(id, start).unwrap();
        manager.pause(id, start + Duration::from_millis(4)).unwrap();

        manager
            .set_interval(id, Duration::from_millis(30), start + Duration::from_millis(20))
            .unwrap();
        assert!(manager.is_paused(id));
        assert_eq!(manager.remaining(id, start).unwrap(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_frequency() {
        let mut manager = TimerManager::new();
        let start = Instant::now();
        let id = manager.create(Duration::from_millis(250), true, None);
        assert_eq!(manager.frequency(id).unwrap(), 4.0);

        manager.set_frequency(id, 2.0, start).unwrap();
        assert_eq!(manager.interval(id).unwrap(), Duration::from_millis(500));

        for hz in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-300] {
            let err = manager.set_frequency(id, hz, start).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState, "{hz}");
        }
        assert_eq!(manager.interval(id).unwrap(), Duration::from_millis(500));
    }
}
