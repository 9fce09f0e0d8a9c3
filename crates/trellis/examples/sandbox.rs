//! Trellis Sandbox
//!
//! Exercises the runtime end to end:
//! - An `EventTester` object counts generated vs. dispatched events per timer tick
//! - A pool task floods the queue with custom events
//! - A background thread simulates button presses on a child object
//! - The application quits after a fixed number of ticks
//!
//! Settings are read from `./config/config.ini` when present.
//!
//! Run with: RUST_LOG=trellis=info,trellis_core=debug cargo run -p trellis --example sandbox

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use trellis::logging::targets;
use trellis::prelude::*;
use trellis::settings::IniSettings;
use trellis::{HandlerError, ObjectTreeDebug};

/// Custom event kind used to measure dispatch throughput.
const TEST_EVENT: u32 = 1000;

/// Stop after this many timer ticks.
const ITERATIONS: u64 = 10;

/// Counts events per timer period and stops the application after
/// [`ITERATIONS`] ticks.
struct EventTester {
    generated: Arc<AtomicUsize>,
    dispatched: usize,
    timer: Option<TimerId>,
}

impl EventTester {
    fn new(generated: Arc<AtomicUsize>) -> Self {
        Self {
            generated,
            dispatched: 0,
            timer: None,
        }
    }

    fn on_timeout(&mut self, tick: u64, cx: &mut DispatchContext<'_>) {
        let generated = self.generated.swap(0, Ordering::Relaxed);
        cx.log(
            LogLevel::Warn,
            &format!(
                "Iteration {tick}, events generated/dispatched: {generated}/{}",
                self.dispatched
            ),
        );
        self.dispatched = 0;

        if tick >= ITERATIONS {
            if let Some(timer) = self.timer.take() {
                cx.timers().cancel(timer).ok();
            }
            cx.quit_after_drain(0);
        }
    }
}

impl Object for EventTester {
    fn handle(&mut self, event: &Event, cx: &mut DispatchContext<'_>) -> HandlerResult {
        match event.kind() {
            EventKind::Custom { kind: TEST_EVENT, .. } => {
                self.dispatched += 1;
                Ok(EventResult::Handled)
            }
            EventKind::Timeout { timer, tick } => {
                self.timer = Some(*timer);
                self.on_timeout(*tick, cx);
                Ok(EventResult::Handled)
            }
            _ => Ok(EventResult::Unhandled),
        }
    }
}

/// A leaf that only reacts to left clicks; everything else bubbles up.
struct Button {
    clicks: usize,
}

impl Object for Button {
    fn handle(&mut self, event: &Event, cx: &mut DispatchContext<'_>) -> HandlerResult {
        match event.kind() {
            EventKind::ButtonPress { button: 1, x, y } => {
                self.clicks += 1;
                cx.log(
                    LogLevel::Info,
                    &format!("Button clicked at ({x}, {y}), {} clicks", self.clicks),
                );
                Ok(EventResult::Handled)
            }
            _ => Ok(EventResult::Unhandled),
        }
    }
}

fn main() -> Result<(), HandlerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("info,{}=debug", targets::EVENT_LOOP))),
        )
        .init();

    let settings = IniSettings::load_default()?;
    let context = Context::default().with_settings(Arc::new(settings));
    let generated = Arc::new(AtomicUsize::new(0));

    let mut app = Application::from_context(context)?
        .with_args(std::env::args())
        .with_root(EventTester::new(generated.clone()));

    let root = app.root();
    let button = app.tree_mut().insert_child(root, Button { clicks: 0 })?;
    app.tree_mut().set_name(button, "button")?;
    println!("{}", ObjectTreeDebug::new(app.tree()));

    app.timers().repeating(Duration::from_millis(200), Some(root))?;

    // Flood the queue from a worker until the application stops accepting events.
    let proxy = app.proxy();
    let counter = generated.clone();
    app.pool().submit(move || {
        while proxy.post_event(Event::custom(TEST_EVENT)).is_ok() {
            counter.fetch_add(1, Ordering::Relaxed);
            if proxy.pending_events() > 10_000 {
                thread::sleep(Duration::from_millis(1));
            }
        }
    })?;

    // Simulated input from a thread the application does not own.
    let proxy = app.proxy();
    let stop = Arc::new(AtomicBool::new(false));
    let clicking = stop.clone();
    let clicker = thread::spawn(move || {
        let mut n = 0;
        while !clicking.load(Ordering::Relaxed) {
            let press = Event::button_press(1 + n % 2, 10 * n as i32, 20).with_target(button);
            if proxy.post_event(press).is_err() {
                break;
            }
            n += 1;
            thread::sleep(Duration::from_millis(150));
        }
    });

    let code = app.run();
    stop.store(true, Ordering::Relaxed);
    let _ = clicker.join();

    match code {
        Ok(code) => {
            tracing::info!(target: "trellis::app", code, "sandbox finished");
            std::process::exit(code)
        }
        Err(err) => {
            tracing::error!(target: "trellis::app", %err, "sandbox failed");
            std::process::exit(err.exit_code())
        }
    }
}
