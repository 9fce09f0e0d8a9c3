//! The application's thread-safe FIFO event queue.
//!
//! Every accepted event is stamped with a sequence number under the queue
//! lock, so the order of concurrent `push` calls is the order in which they
//! took the lock. A quit request freezes the queue: later pushes fail with
//! [`TrellisError::EventQueueClosed`].

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, TrellisError};
use crate::event::Event;

/// How the dispatch loop should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitMode {
    /// Dispatch everything queued before the request, then stop.
    AfterDrain,
    /// Stop after the event currently being dispatched; discard the rest.
    Now,
}

#[derive(Debug, Clone, Copy)]
struct QuitRequest {
    mode: QuitMode,
    code: i32,
    /// Events with a sequence below this were queued before the request.
    drain_mark: u64,
}

/// An event together with the sequence number the queue assigned to it.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Position in the global posting order.
    pub sequence: u64,
    /// The event itself.
    pub event: Event,
}

/// What the dispatch loop should do next.
#[derive(Debug)]
pub(crate) enum Next {
    /// Dispatch this event.
    Dispatch(QueuedEvent),
    /// Stop with this exit code.
    Quit(i32),
    /// The queue was closed without a quit request.
    Closed,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<QueuedEvent>,
    next_sequence: u64,
    quit: Option<QuitRequest>,
    closed: bool,
}

impl QueueState {
    fn accepting(&self) -> bool {
        !self.closed && self.quit.is_none()
    }

    /// Decide the next step without blocking. `None` means wait.
    fn next(&mut self) -> Option<Next> {
        if let Some(quit) = self.quit {
            return match quit.mode {
                QuitMode::Now => {
                    let discarded = self.events.len();
                    self.events.clear();
                    if discarded > 0 {
                        tracing::debug!(target: "trellis_core::event_loop", discarded, "discarding queued events on quit");
                    }
                    Some(Next::Quit(quit.code))
                }
                QuitMode::AfterDrain => match self.events.front() {
                    Some(front) if front.sequence < quit.drain_mark => {
                        self.events.pop_front().map(Next::Dispatch)
                    }
                    _ => Some(Next::Quit(quit.code)),
                },
            };
        }
        if let Some(event) = self.events.pop_front() {
            return Some(Next::Dispatch(event));
        }
        if self.closed {
            return Some(Next::Closed);
        }
        None
    }
}

/// Multi-producer, single-consumer event queue with quit handling.
pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl EventQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    /// Append an event and return its sequence number.
    ///
    /// Fails once a quit was requested or the queue was closed.
    pub fn push(&self, event: Event) -> Result<u64> {
        let mut state = self.state.lock();
        if !state.accepting() {
            tracing::trace!(target: "trellis_core::event_loop", kind = event.kind().name(), "rejecting event, queue closed");
            return Err(TrellisError::EventQueueClosed);
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.events.push_back(QueuedEvent { sequence, event });
        drop(state);
        self.available.notify_one();
        Ok(sequence)
    }

    /// Request a stop once everything queued so far has been dispatched.
    ///
    /// Ignored if a quit was already requested. Returns whether this call
    /// installed the request.
    pub fn quit_after_drain(&self, code: i32) -> bool {
        let mut state = self.state.lock();
        if !state.accepting() {
            return false;
        }
        let drain_mark = state.next_sequence;
        state.quit = Some(QuitRequest {
            mode: QuitMode::AfterDrain,
            code,
            drain_mark,
        });
        drop(state);
        tracing::debug!(target: "trellis_core::event_loop", code, drain_mark, "quit after drain requested");
        self.available.notify_all();
        true
    }

    /// Request a stop after the current event; pending events are discarded.
    ///
    /// Overrides an earlier drain request but not an earlier immediate one.
    pub fn quit_now(&self, code: i32) -> bool {
        let mut state = self.state.lock();
        if state.closed || matches!(state.quit, Some(q) if q.mode == QuitMode::Now) {
            return false;
        }
        let drain_mark = state.next_sequence;
        state.quit = Some(QuitRequest {
            mode: QuitMode::Now,
            code,
            drain_mark,
        });
        drop(state);
        tracing::debug!(target: "trellis_core::event_loop", code, "immediate quit requested");
        self.available.notify_all();
        true
    }

    /// The pending quit mode, if any.
    pub fn quit_mode(&self) -> Option<QuitMode> {
        self.state.lock().quit.map(|q| q.mode)
    }

    /// Whether a quit was requested.
    pub fn is_quitting(&self) -> bool {
        self.state.lock().quit.is_some()
    }

    /// Whether the queue still accepts events.
    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting()
    }

    /// Number of events waiting.
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Whether no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Block until there is something for the dispatch loop to do.
    pub(crate) fn wait_next(&self) -> Next {
        let mut state = self.state.lock();
        loop {
            if let Some(next) = state.next() {
                return next;
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`wait_next`](Self::wait_next) but never blocks.
    pub(crate) fn try_next(&self) -> Option<Next> {
        self.state.lock().next()
    }

    /// Close the queue for good and drop any events left in it.
    ///
    /// Returns the number of events dropped.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.events.len();
        state.events.clear();
        drop(state);
        self.available.notify_all();
        dropped
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventQueue")
            .field("pending", &state.events.len())
            .field("next_sequence", &state.next_sequence)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn expect_dispatch(next: Option<Next>) -> QueuedEvent {
        match next {
            Some(Next::Dispatch(queued)) => queued,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let queue = EventQueue::new();
        let a = queue.push(Event::custom(1)).unwrap();
        let b = queue.push(Event::custom(2)).unwrap();
        assert!(b > a);
        assert_eq!(queue.len(), 2);

        assert_eq!(expect_dispatch(queue.try_next()).sequence, a);
        assert_eq!(expect_dispatch(queue.try_next()).sequence, b);
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn test_quit_after_drain_dispatches_earlier_events() {
        let queue = EventQueue::new();
        queue.push(Event::custom(1)).unwrap();
        queue.push(Event::custom(2)).unwrap();

        assert!(queue.quit_after_drain(3));
        let err = queue.push(Event::custom(9)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueClosed);

        expect_dispatch(queue.try_next());
        expect_dispatch(queue.try_next());
        assert!(matches!(queue.try_next(), Some(Next::Quit(3))));
    }

    #[test]
    fn test_quit_now_discards_pending() {
        let queue = EventQueue::new();
        queue.push(Event::custom(1)).unwrap();
        queue.push(Event::custom(2)).unwrap();

        assert!(queue.quit_now(5));
        assert!(matches!(queue.try_next(), Some(Next::Quit(5))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_quit_now_overrides_drain() {
        let queue = EventQueue::new();
        queue.push(Event::custom(1)).unwrap();
        assert!(queue.quit_after_drain(1));
        assert!(!queue.quit_after_drain(2));
        assert!(queue.quit_now(7));
        assert!(!queue.quit_now(8));
        assert_eq!(queue.quit_mode(), Some(QuitMode::Now));
        assert!(matches!(queue.try_next(), Some(Next::Quit(7))));
    }

    #[test]
    fn test_close_wakes_waiter() {
        let queue = Arc::new(EventQueue::new());
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || matches!(queue.wait_next(), Next::Closed))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(waiter.join().unwrap());
        assert!(!queue.is_accepting());
    }

    #[test]
    fn test_wait_next_receives_cross_thread_push() {
        let queue = Arc::new(EventQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                queue.push(Event::window_close()).unwrap()
            })
        };
        let queued = match queue.wait_next() {
            Next::Dispatch(queued) => queued,
            other => panic!("expected an event, got {other:?}"),
        };
        assert_eq!(queued.sequence, producer.join().unwrap());
    }
}
