//! End-to-end dispatch: minted controls routed back to their handler,
//! expiry and malformed handling, startup registration errors, and the
//! worker loop's concurrency bound and shutdown drain.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use interact_bot::clock::ManualClock;
use interact_bot::component_ids::{ComponentIdGenerator, GeneratorConfig, Lifespan, MemoryStore};
use interact_bot::error::AppError;
use interact_bot::interaction::{
    CommandSpec, DispatchOutcome, Dispatcher, Envelope, HandlerRegistry, InteractionEvent,
    InteractionHandler, RegistryError, Reply, ReplySink, RunOptions,
};
use interact_bot::rate_limit::RateLimiter;

fn ttl() -> TimeDelta {
    TimeDelta::days(20)
}

#[derive(Default)]
struct Collect(Mutex<Vec<Reply>>);

impl ReplySink for Collect {
    fn present(&self, reply: Reply) {
        self.0.lock().unwrap().push(reply);
    }
}

impl Collect {
    fn texts(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|r| r.text.clone()).collect()
    }
}

/// Records button clicks and answers each with the args it got.
struct ClickRecorder {
    spec: CommandSpec,
    clicks: Mutex<Vec<Vec<String>>>,
}

impl ClickRecorder {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            spec: CommandSpec::slash(name, "records clicks"),
            clicks: Mutex::new(Vec::new()),
        })
    }
}

impl InteractionHandler for ClickRecorder {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn on_button_click(&self, _event: &InteractionEvent, args: &[String], reply: &dyn ReplySink) {
        self.clicks.lock().unwrap().push(args.to_vec());
        reply.present(Reply::text(args.join(",")));
    }
}

struct Fixture {
    clock: Arc<ManualClock>,
    generator: Arc<ComponentIdGenerator>,
    handler: Arc<ClickRecorder>,
    dispatcher: Dispatcher,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::at_epoch());
    let generator = Arc::new(
        ComponentIdGenerator::new(
            Arc::new(MemoryStore::new(ttl())),
            clock.clone(),
            GeneratorConfig::default(),
        )
        .unwrap(),
    );
    let handler = ClickRecorder::new("h");
    let mut registry = HandlerRegistry::new();
    registry.register("h", handler.clone()).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(registry), generator.clone());
    Fixture {
        clock,
        generator,
        handler,
        dispatcher,
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn mint_then_click_invokes_handler_with_args() {
    let f = fixture();
    let token = f
        .generator
        .mint("h", vec!["u42".into(), "yes".into()], Lifespan::Regular)
        .unwrap();

    f.clock.advance(TimeDelta::seconds(1));
    let sink = Collect::default();
    let outcome = f.dispatcher.dispatch(&InteractionEvent::button(token, Some("u42")), &sink);

    assert_eq!(outcome, DispatchOutcome::Routed);
    assert_eq!(
        f.handler.clicks.lock().unwrap().as_slice(),
        &[vec!["u42".to_string(), "yes".to_string()]]
    );
    assert_eq!(sink.texts(), vec!["u42,yes"]);
    assert_eq!(f.dispatcher.stats().routed, 1);
}

#[test]
fn click_after_regular_ttl_gets_expiry_notice() {
    let f = fixture();
    let token = f
        .generator
        .mint("h", vec!["u42".into(), "yes".into()], Lifespan::Regular)
        .unwrap();

    f.clock.advance(ttl() + TimeDelta::seconds(1));
    let sink = Collect::default();
    let outcome = f.dispatcher.dispatch(&InteractionEvent::button(token, Some("u42")), &sink);

    assert_eq!(outcome, DispatchOutcome::Expired);
    let texts = sink.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].to_lowercase().contains("this control has expired"));
    assert!(f.handler.clicks.lock().unwrap().is_empty());
}

#[test]
fn garbage_token_is_dropped_silently() {
    let f = fixture();
    let sink = Collect::default();
    let outcome = f
        .dispatcher
        .dispatch(&InteractionEvent::button("!!garbage!!", Some("u1")), &sink);

    assert_eq!(outcome, DispatchOutcome::Dropped);
    assert!(sink.texts().is_empty());
    assert!(f.handler.clicks.lock().unwrap().is_empty());
    assert_eq!(f.dispatcher.stats().malformed, 1);
}

#[test]
fn duplicate_prefix_fails_startup() {
    let mut registry = HandlerRegistry::new();
    registry.register("h", ClickRecorder::new("a")).unwrap();

    let err = registry.register("h", ClickRecorder::new("b")).unwrap_err();
    assert_eq!(err, RegistryError::DuplicatePrefix("h".into()));

    let app: AppError = err.into();
    assert!(app.to_string().contains("duplicate handler prefix 'h'"));
}

#[test]
fn rate_limiter_window_of_five_seconds_admits_two() {
    let limiter = RateLimiter::new(TimeDelta::seconds(5), NonZeroUsize::new(2).unwrap());
    let t = |s: i64| chrono::DateTime::UNIX_EPOCH + TimeDelta::seconds(s);

    assert!(limiter.allow(t(0)));
    assert!(limiter.allow(t(1)));
    assert!(!limiter.allow(t(2)));
    assert_eq!(limiter.next_allowed(t(2)), t(5));
    assert!(limiter.allow(t(5)));
}

// ── Worker loop ──────────────────────────────────────────────────────────────

/// Sleeps on every click and tracks how many clicks overlap.
struct Slow {
    spec: CommandSpec,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    done: AtomicUsize,
    started: AtomicBool,
}

impl Slow {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            spec: CommandSpec::slash("slow", ""),
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        })
    }
}

impl InteractionHandler for Slow {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn on_button_click(&self, _event: &InteractionEvent, _args: &[String], _reply: &dyn ReplySink) {
        self.started.store(true, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
    }
}

fn slow_dispatcher(handler: Arc<Slow>) -> (Arc<ComponentIdGenerator>, Arc<Dispatcher>) {
    let generator = Arc::new(
        ComponentIdGenerator::new(
            Arc::new(MemoryStore::new(ttl())),
            Arc::new(ManualClock::at_epoch()),
            GeneratorConfig::default(),
        )
        .unwrap(),
    );
    let mut registry = HandlerRegistry::new();
    registry.register_handler(handler).unwrap();
    (
        generator.clone(),
        Arc::new(Dispatcher::new(Arc::new(registry), generator)),
    )
}

fn envelope(token: &str, sink: &Arc<Collect>) -> Envelope {
    Envelope {
        event: InteractionEvent::button(token, Some("u1")),
        reply: sink.clone(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_loop_bounds_concurrency_to_worker_count() {
    let handler = Slow::new(Duration::from_millis(30));
    let (generator, dispatcher) = slow_dispatcher(handler.clone());
    let token = generator.mint("s-slow", vec![], Lifespan::Permanent).unwrap();
    let sink = Arc::new(Collect::default());

    let (tx, rx) = mpsc::channel(32);
    let shutdown = CancellationToken::new();
    let options = RunOptions {
        workers: NonZeroUsize::new(2).unwrap(),
        drain_deadline: Duration::from_secs(5),
    };
    let task = tokio::spawn(dispatcher.clone().run(rx, options, shutdown.clone()));

    for _ in 0..8 {
        tx.send(envelope(&token, &sink)).await.unwrap();
    }
    drop(tx);

    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("dispatcher should stop once the queue closes")
        .unwrap();

    assert_eq!(handler.done.load(Ordering::SeqCst), 8);
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(dispatcher.stats().routed, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_drains_in_flight_events() {
    let handler = Slow::new(Duration::from_millis(200));
    let (generator, dispatcher) = slow_dispatcher(handler.clone());
    let token = generator.mint("s-slow", vec![], Lifespan::Permanent).unwrap();
    let sink = Arc::new(Collect::default());

    let (tx, rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let options = RunOptions {
        workers: NonZeroUsize::new(1).unwrap(),
        drain_deadline: Duration::from_secs(5),
    };
    let task = tokio::spawn(dispatcher.clone().run(rx, options, shutdown.clone()));

    tx.send(envelope(&token, &sink)).await.unwrap();
    while !handler.started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("dispatcher should stop after draining")
        .unwrap();
    assert_eq!(handler.done.load(Ordering::SeqCst), 1);

    // The queue is closed once the loop has stopped.
    assert!(tx.send(envelope(&token, &sink)).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_deadline_abandons_stragglers() {
    let handler = Slow::new(Duration::from_millis(800));
    let (generator, dispatcher) = slow_dispatcher(handler.clone());
    let token = generator.mint("s-slow", vec![], Lifespan::Permanent).unwrap();
    let sink = Arc::new(Collect::default());

    let (tx, rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let options = RunOptions {
        workers: NonZeroUsize::new(1).unwrap(),
        drain_deadline: Duration::from_millis(50),
    };
    let task = tokio::spawn(dispatcher.run(rx, options, shutdown.clone()));

    tx.send(envelope(&token, &sink)).await.unwrap();
    while !handler.started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();

    tokio::time::timeout(Duration::from_millis(500), task)
        .await
        .expect("dispatcher should give up after the drain deadline")
        .unwrap();
    assert_eq!(handler.done.load(Ordering::SeqCst), 0);
}
