//! Routing of queued events through the object tree.
//!
//! Each event goes to its target (or the root when it has none or the target
//! is gone) and bubbles to ancestors until a handler returns
//! [`EventResult::Handled`]. Handlers run with exclusive access to the tree
//! through a [`DispatchContext`].

use crate::application::AppProxy;
use crate::context::{Context, LogLevel};
use crate::error::{DispatchError, Result};
use crate::event::{Event, EventResult};
use crate::event_queue::QueuedEvent;
use crate::object::{ObjectId, ObjectTree};
use crate::threadpool::ThreadPool;
use crate::timer::TimerService;

/// Everything besides the tree that handlers may reach.
pub(crate) struct Services {
    pub(crate) proxy: AppProxy,
    pub(crate) timers: TimerService,
    pub(crate) pool: ThreadPool,
    pub(crate) context: Context,
}

/// What handlers see while an event is being dispatched.
pub struct DispatchContext<'a> {
    tree: &'a mut ObjectTree,
    services: &'a Services,
    current: ObjectId,
    target: ObjectId,
    sequence: u64,
}

impl<'a> DispatchContext<'a> {
    /// The object tree.
    pub fn tree(&self) -> &ObjectTree {
        self.tree
    }

    /// Mutable access to the object tree. Nodes may be added, moved or
    /// destroyed from inside a handler, including the current one.
    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        self.tree
    }

    /// The node whose handler is running.
    pub fn current(&self) -> ObjectId {
        self.current
    }

    /// The node the event was delivered to first.
    pub fn target(&self) -> ObjectId {
        self.target
    }

    /// Sequence number the queue assigned to the event.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Queue another event. It is dispatched after everything already queued.
    pub fn post_event(&self, event: Event) -> Result<u64> {
        self.services.proxy.post_event(event)
    }

    /// Stop once everything queued so far has been dispatched.
    pub fn quit_after_drain(&self, code: i32) {
        self.services.proxy.quit_after_drain(code);
    }

    /// Stop after this event; discard what is still queued.
    pub fn quit_now(&self, code: i32) {
        self.services.proxy.quit_now(code);
    }

    /// The application's timers.
    pub fn timers(&self) -> &TimerService {
        &self.services.timers
    }

    /// The application's thread pool.
    pub fn pool(&self) -> &ThreadPool {
        &self.services.pool
    }

    /// A cloneable handle for posting from other threads.
    pub fn proxy(&self) -> &AppProxy {
        &self.services.proxy
    }

    /// The application's collaborators.
    pub fn context(&self) -> &Context {
        &self.services.context
    }

    /// Log through the context's sink.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.services.context.log(level, message);
    }
}

/// How a dispatched event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// A handler consumed it.
    Handled(ObjectId),
    /// Nobody handled it, or the handling node destroyed itself.
    Unhandled,
    /// A timeout from a timer that is no longer registered.
    StaleTimer,
}

/// Deliver one event, bubbling it up the tree.
#[tracing::instrument(skip_all, target = "trellis_core::dispatch", level = "trace", fields(sequence = queued.sequence))]
pub(crate) fn dispatch(
    tree: &mut ObjectTree,
    services: &Services,
    queued: QueuedEvent,
) -> std::result::Result<Outcome, DispatchError> {
    let QueuedEvent { sequence, event } = queued;

    if let Some(timer) = event.timer_id()
        && !services.timers.is_registered(timer)
    {
        tracing::trace!(target: "trellis_core::dispatch", ?timer, "dropping timeout of cancelled timer");
        return Ok(Outcome::StaleTimer);
    }

    let target = event
        .target()
        .filter(|&id| tree.contains(id))
        .unwrap_or_else(|| tree.root());
    let mut current = target;

    loop {
        let result = match tree.take_handler(current) {
            Some(mut handler) => {
                let result = {
                    let mut cx = DispatchContext {
                        tree: &mut *tree,
                        services,
                        current,
                        target,
                        sequence,
                    };
                    handler.handle(&event, &mut cx)
                };
                if let Some(orphan) = tree.restore_handler(current, handler) {
                    // The node was destroyed during its own handler.
                    drop(orphan);
                    return match result {
                        Ok(EventResult::Handled) => Ok(Outcome::Handled(current)),
                        Ok(EventResult::Unhandled) => Ok(Outcome::Unhandled),
                        Err(source) => Err(DispatchError {
                            object: current,
                            event: event.kind().name(),
                            source,
                        }),
                    };
                }
                result
            }
            None => Ok(EventResult::Unhandled),
        };

        match result {
            Ok(EventResult::Handled) => {
                tracing::trace!(target: "trellis_core::dispatch", ?current, kind = event.kind().name(), "event handled");
                return Ok(Outcome::Handled(current));
            }
            Ok(EventResult::Unhandled) => match tree.parent(current) {
                Ok(Some(parent)) => current = parent,
                _ => {
                    tracing::trace!(target: "trellis_core::dispatch", kind = event.kind().name(), "event unhandled");
                    return Ok(Outcome::Unhandled);
                }
            },
            Err(source) => {
                return Err(DispatchError {
                    object: current,
                    event: event.kind().name(),
                    source,
                });
            }
        }
    }
}
