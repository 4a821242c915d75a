#![forbid(unsafe_code)]

//! E2E scenarios for the state pipeline.
//!
//! Validates that:
//! 1. A tracker deduplicates a listener subscribed twice.
//! 2. Rapid refreshes never leave more than one staleness task behind.
//! 3. A store, a watcher, and a freshness timer cooperate to drive a
//!    background reload without redundant downstream work.
//! 4. Subscriber and comparator failures are logged at WARN and absorbed.
//! 5. Teardown leaves no pending tasks and no live subscriptions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use freshview_core::{ConfigError, LabClock, SubscriberError, TimerQueue};
use freshview_runtime::reactive::{
    ContextStore, Equality, FreshnessTimer, Listener, SelectorMemo, VersionTracker,
};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use web_time::Duration;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Roster {
    shifts: Vec<String>,
    last_sync: u64,
}

fn roster(shifts: &[&str], last_sync: u64) -> Roster {
    Roster {
        shifts: shifts.iter().map(|s| (*s).to_string()).collect(),
        last_sync,
    }
}

/// Collects the message and level of every event.
#[derive(Clone, Default)]
struct EventLog {
    events: Arc<Mutex<Vec<(tracing::Level, String)>>>,
}

impl EventLog {
    fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("event log lock")
            .iter()
            .filter(|(level, _)| *level == tracing::Level::WARN)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for EventLog {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Msg {
            message: Option<String>,
        }
        impl tracing::field::Visit for Msg {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                }
            }
        }
        let mut msg = Msg { message: None };
        event.record(&mut msg);
        if let Some(message) = msg.message {
            self.events
                .lock()
                .expect("event log lock")
                .push((*event.metadata().level(), message));
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn same_listener_twice_fires_once() {
    let tracker = VersionTracker::new();
    let calls = Rc::new(Cell::new(0u32));
    let calls_in_cb = Rc::clone(&calls);
    let log_a = Listener::new(move |_| calls_in_cb.set(calls_in_cb.get() + 1));

    let _first = tracker.subscribe(&log_a);
    let _second = tracker.subscribe(&log_a);
    tracker.increment();

    assert_eq!(calls.get(), 1);
    assert_eq!(tracker.version(), 1);
}

#[test]
fn rapid_refreshes_leave_one_task() {
    let clock = LabClock::new();
    let queue = TimerQueue::lab(&clock);
    let stale = Rc::new(Cell::new(0u32));
    let stale_in_cb = Rc::clone(&stale);
    let timer = FreshnessTimer::from_millis(queue.clone(), 1000.0)
        .expect("valid window")
        .on_stale(move || stale_in_cb.set(stale_in_cb.get() + 1));

    for _ in 0..3 {
        timer.refresh();
        assert_eq!(queue.pending(), 1);
        queue.advance(Duration::from_millis(1));
    }
    assert_eq!(stale.get(), 0);
}

#[test]
fn non_positive_window_is_a_configuration_error() {
    let queue = TimerQueue::lab(&LabClock::new());
    assert!(matches!(
        FreshnessTimer::from_millis(queue.clone(), 0.0),
        Err(ConfigError::NonPositiveStaleness { .. })
    ));
    assert!(matches!(
        FreshnessTimer::from_millis(queue.clone(), -5.0),
        Err(ConfigError::NonPositiveStaleness { .. })
    ));
    assert!(matches!(
        FreshnessTimer::from_millis(queue, f64::NAN),
        Err(ConfigError::NonFiniteStaleness { .. })
    ));
}

#[test]
fn stale_data_triggers_background_reload() {
    let clock = LabClock::new();
    let queue = TimerQueue::lab(&clock);
    let store = ContextStore::new(roster(&["mon-am", "tue-pm"], 0));

    // Downstream work: re-render whenever the shift list changes.
    let renders = Rc::new(RefCell::new(Vec::new()));
    let renders_in_cb = Rc::clone(&renders);
    let _watcher = store.watch(
        |r: &Roster| r.shifts.clone(),
        move |_: &Vec<String>, next: &Vec<String>| renders_in_cb.borrow_mut().push(next.len()),
    );

    // Reload request raised when the data goes stale; the host loop
    // services it after the timer fires.
    let reload_requested = Rc::new(Cell::new(false));
    let flag = Rc::clone(&reload_requested);
    let freshness = FreshnessTimer::from_millis(queue.clone(), 500.0)
        .expect("valid window")
        .on_stale(move || flag.set(true));

    let mut sync = 0;
    for _ in 0..4 {
        queue.advance(Duration::from_millis(250));
        if reload_requested.replace(false) {
            sync += 1;
            // Backend returns the same shifts with a new sync stamp.
            store.update(|r| Roster {
                last_sync: sync,
                ..r.clone()
            });
            freshness.refresh();
        }
    }

    assert_eq!(sync, 2);
    assert_eq!(store.version(), 2);
    assert!(renders.borrow().is_empty(), "sync churn must not re-render");

    store.set(roster(&["mon-am"], sync + 1));
    freshness.refresh();
    assert_eq!(*renders.borrow(), vec![1]);
    assert!(freshness.is_fresh());
}

#[test]
fn failures_are_logged_and_absorbed() {
    let log = EventLog::default();
    let subscriber = tracing_subscriber::registry().with(log.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let tracker = VersionTracker::new();
    let after = Rc::new(Cell::new(0u32));
    let after_in_cb = Rc::clone(&after);
    let _bad = tracker.subscribe(&Listener::fallible(|_| Err(SubscriberError::failed("render crashed"))));
    let _good = tracker.subscribe_fn(move |_| after_in_cb.set(after_in_cb.get() + 1));
    assert_eq!(tracker.increment(), 1);
    assert_eq!(after.get(), 1);

    let mut memo = SelectorMemo::with_equality(
        |r: &Roster| r.shifts.len(),
        Equality::by(|_: &usize, _: &usize| -> bool { panic!("comparator bug") }),
    );
    memo.evaluate(&Rc::new(roster(&["a"], 0)));
    assert!(memo.evaluate(&Rc::new(roster(&["a"], 1))).changed());

    let warnings = log.warnings();
    assert!(
        warnings.iter().any(|m| m == "subscriber failed during notification"),
        "missing subscriber warning in {warnings:?}"
    );
    assert!(
        warnings.iter().any(|m| m.starts_with("equality check failed")),
        "missing equality warning in {warnings:?}"
    );
}

#[test]
fn teardown_releases_everything() {
    let clock = LabClock::new();
    let queue = TimerQueue::lab(&clock);
    let store = ContextStore::new(roster(&["wed"], 0));
    let fired = Rc::new(Cell::new(false));

    {
        let fired_in_cb = Rc::clone(&fired);
        let _timer = FreshnessTimer::from_millis(queue.clone(), 100.0)
            .expect("valid window")
            .on_stale(move || fired_in_cb.set(true));
        let _watcher = store.watch(|r: &Roster| r.last_sync, |_, _| {});
        assert_eq!(queue.pending(), 1);
        assert_eq!(store.tracker().subscriber_count(), 1);
    }

    assert_eq!(queue.pending(), 0);
    assert_eq!(store.tracker().subscriber_count(), 0);
    queue.advance(Duration::from_secs(10));
    assert!(!fired.get());
}
