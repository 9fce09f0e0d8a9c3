//! Event values routed through the Trellis dispatch loop.
//!
//! An [`Event`] is immutable once built. It carries a closed [`EventKind`],
//! the instant it originated and an optional target object. The event queue
//! stamps each event with a sequence number when it is posted; that number,
//! not the timestamp, decides dispatch order.

use std::sync::Arc;
use std::time::Instant;

use crate::error::HandlerError;
use crate::object::ObjectId;
use crate::timer::TimerId;

/// The closed set of event kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A button was pressed.
    ButtonPress {
        /// Button identifier.
        button: u32,
        /// Horizontal position.
        x: i32,
        /// Vertical position.
        y: i32,
    },

    /// A timer expired.
    Timeout {
        /// The timer that expired.
        timer: TimerId,
        /// Expiry count since the timer was last armed (1 for the first expiry).
        tick: u64,
    },

    /// Bytes arrived from some source (a socket, a file, a worker).
    DataReady {
        /// The received bytes.
        data: Arc<[u8]>,
        /// Where the bytes came from, e.g. `"127.0.0.1:9000"`.
        source: String,
    },

    /// The hosting window changed size.
    WindowResize {
        /// New width.
        width: u32,
        /// New height.
        height: u32,
    },

    /// The hosting window was asked to close.
    WindowClose,

    /// User-defined custom event.
    Custom {
        /// User-defined event kind identifier.
        kind: u32,
        /// Optional payload as raw bytes.
        payload: Option<Arc<[u8]>>,
    },
}

impl EventKind {
    /// Short name of the variant, used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ButtonPress { .. } => "ButtonPress",
            Self::Timeout { .. } => "Timeout",
            Self::DataReady { .. } => "DataReady",
            Self::WindowResize { .. } => "WindowResize",
            Self::WindowClose => "WindowClose",
            Self::Custom { .. } => "Custom",
        }
    }
}

/// An event plus its origin time and optional target.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    timestamp: Instant,
    target: Option<ObjectId>,
}

impl Event {
    /// Create an untargeted event stamped with the current instant.
    ///
    /// Untargeted events are delivered to the tree root.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Instant::now(),
            target: None,
        }
    }

    /// Create a button press event.
    pub fn button_press(button: u32, x: i32, y: i32) -> Self {
        Self::new(EventKind::ButtonPress { button, x, y })
    }

    /// Create a timeout event for `timer`.
    pub fn timeout(timer: TimerId, tick: u64) -> Self {
        Self::new(EventKind::Timeout { timer, tick })
    }

    /// Create a data-ready event.
    pub fn data_ready(data: impl Into<Arc<[u8]>>, source: impl Into<String>) -> Self {
        Self::new(EventKind::DataReady {
            data: data.into(),
            source: source.into(),
        })
    }

    /// Create a window resize event.
    pub fn window_resize(width: u32, height: u32) -> Self {
        Self::new(EventKind::WindowResize { width, height })
    }

    /// Create a window close event.
    pub fn window_close() -> Self {
        Self::new(EventKind::WindowClose)
    }

    /// Create a custom event with a kind identifier.
    pub fn custom(kind: u32) -> Self {
        Self::new(EventKind::Custom {
            kind,
            payload: None,
        })
    }

    /// Create a custom event with a kind and byte payload.
    pub fn custom_with_payload(kind: u32, payload: Vec<u8>) -> Self {
        Self::new(EventKind::Custom {
            kind,
            payload: Some(payload.into()),
        })
    }

    /// Return this event addressed to `target`.
    pub fn with_target(mut self, target: ObjectId) -> Self {
        self.target = Some(target);
        self
    }

    /// Return this event with an explicit origin time.
    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The event kind.
    #[inline]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// When the event originated.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// The object the event is addressed to, if any.
    #[inline]
    pub fn target(&self) -> Option<ObjectId> {
        self.target
    }

    /// The timer id if this is a timeout event.
    pub fn timer_id(&self) -> Option<TimerId> {
        match self.kind {
            EventKind::Timeout { timer, .. } => Some(timer),
            _ => None,
        }
    }
}

/// Outcome of a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventResult {
    /// The event was consumed; propagation stops.
    Handled,
    /// The event should bubble to the parent.
    #[default]
    Unhandled,
}

impl EventResult {
    /// Whether propagation stops here.
    #[inline]
    pub fn is_handled(self) -> bool {
        matches!(self, Self::Handled)
    }
}

impl From<bool> for EventResult {
    fn from(handled: bool) -> Self {
        if handled { Self::Handled } else { Self::Unhandled }
    }
}

/// What a handler returns. An `Err` is fatal to the dispatch loop.
pub type HandlerResult = std::result::Result<EventResult, HandlerError>;

static_assertions::assert_impl_all!(Event: Send, Sync, Clone);
