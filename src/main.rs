//! interact-bot entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Open the component-ID store and build the generator
//!   6. Register handlers
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run dispatcher, sweeper and (with -i) the console channel
//!   9. Join everything once shutdown is signalled
//!  10. Stop the runtime without waiting on abandoned blocking work

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use interact_bot::clock::{Clock, SystemClock};
use interact_bot::component_ids::sweeper::Sweeper;
use interact_bot::component_ids::{ComponentIdGenerator, SqliteStore};
use interact_bot::config::{self, Config};
use interact_bot::error::AppError;
use interact_bot::interaction::HandlerRegistry;
use interact_bot::interaction::dispatcher::{DispatchLoop, Dispatcher};
use interact_bot::logger;
use interact_bot::runtime::{Component, run_to_completion, spawn_components};

/// How long leftover blocking tasks get once `run` has returned.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() {
    if let Err(e) = run_to_completion(run(), SHUTDOWN_GRACE).and_then(|r| r) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        bot_name = %config.bot_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        interactive = %args.interactive,
        "config loaded"
    );

    std::fs::create_dir_all(&config.work_dir)?;
    let db_path = &config.component_ids.database;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::open(db_path, config.component_ids.regular_ttl)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let generator = Arc::new(ComponentIdGenerator::new(
        Arc::new(store),
        clock.clone(),
        config.component_ids.generator_config(),
    )?);
    info!(
        database = %db_path.display(),
        stored = generator.stored_count()?,
        "component id store ready"
    );

    let registry = build_registry(&config, &generator, &clock)?;
    if registry.is_empty() {
        warn!("no handlers registered; every interaction will be unrouted");
    }
    let handler_prefixes: Vec<String> = registry.prefixes().into_iter().map(String::from).collect();
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), generator.clone()));

    // Shared shutdown token: Ctrl-C cancels it, all components watch it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let (events_tx, events_rx) = mpsc::channel(config.dispatch.queue.get());

    let mut components: Vec<Box<dyn Component>> = vec![
        Box::new(DispatchLoop::new(
            dispatcher.clone(),
            events_rx,
            config.dispatch.run_options(),
        )),
        Box::new(Sweeper::new(generator.clone(), config.component_ids.sweep_interval)),
    ];

    #[cfg(feature = "channel-pty")]
    {
        if args.interactive {
            components.push(Box::new(
                interact_bot::channels::console::ConsoleChannel::new(events_tx.clone()),
            ));
        }
    }
    #[cfg(not(feature = "channel-pty"))]
    {
        if args.interactive {
            warn!("-i given but the console channel is not compiled in");
        }
    }

    print_startup_summary(&config, args.interactive, &handler_prefixes);

    // events_tx stays alive until the join below so the dispatcher only
    // stops on shutdown, never on an empty channel list.
    let result = spawn_components(components, shutdown.clone()).join().await;
    drop(events_tx);

    let counts = dispatcher.stats();
    info!(
        routed = counts.routed,
        malformed = counts.malformed,
        expired = counts.expired,
        unrouted = counts.unrouted,
        failed = counts.failed,
        "dispatcher stopped"
    );

    if args.interactive {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }

    result
}

#[cfg(feature = "plugin-eval")]
fn build_registry(
    config: &Config,
    generator: &Arc<ComponentIdGenerator>,
    clock: &Arc<dyn Clock>,
) -> Result<HandlerRegistry, AppError> {
    use interact_bot::component_ids::ComponentIds;
    use interact_bot::eval::{EvalCommand, EvalLimiter, Evaluator, HttpBackend};
    use interact_bot::rate_limit::{KeyedRateLimiter, RateLimiter};

    let mut registry = HandlerRegistry::new();
    if !config.eval.enabled {
        return Ok(registry);
    }

    let backend = HttpBackend::new(
        &config.eval.base_url,
        config.eval.timeout_seconds,
        tokio::runtime::Handle::current(),
    )
    .map_err(|e| AppError::Config(format!("eval backend: {e}")))?;

    let rl = &config.rate_limit;
    let limiter = if rl.per_user {
        EvalLimiter::PerUser(KeyedRateLimiter::new(rl.window, rl.capacity))
    } else {
        EvalLimiter::Global(RateLimiter::new(rl.window, rl.capacity))
    };
    let evaluator = Arc::new(Evaluator::new(Arc::new(backend), limiter, clock.clone()));
    let ids = ComponentIds::new(generator.clone(), EvalCommand::prefix());
    registry.register_handler(Arc::new(EvalCommand::new(
        ids,
        evaluator,
        config.eval.startup_script,
    )))?;

    Ok(registry)
}

#[cfg(not(feature = "plugin-eval"))]
fn build_registry(
    config: &Config,
    _generator: &Arc<ComponentIdGenerator>,
    _clock: &Arc<dyn Clock>,
) -> Result<HandlerRegistry, AppError> {
    if config.eval.enabled {
        warn!("eval is enabled in config but not compiled in");
    }
    Ok(HandlerRegistry::new())
}

fn print_startup_summary(config: &Config, interactive: bool, handlers: &[String]) {
    let mode = if interactive { "interactive" } else { "daemon" };
    let handlers = if handlers.is_empty() {
        "none".to_string()
    } else {
        handlers.join(", ")
    };
    let ids = &config.component_ids;

    eprintln!("─────────────────────────────────────────────");
    eprintln!(" {} ({mode}, pid {})", config.bot_name, std::process::id());
    eprintln!("─────────────────────────────────────────────");
    eprintln!(" handlers      : {handlers}");
    eprintln!(
        " component ids : ttl={}d sweep={}s db={}",
        ids.regular_ttl.num_days(),
        ids.sweep_interval.as_secs(),
        ids.database.display()
    );
    eprintln!(
        " rate limit    : {} per {}s{}",
        config.rate_limit.capacity,
        config.rate_limit.window.num_seconds(),
        if config.rate_limit.per_user { " per user" } else { "" }
    );
    eprintln!(
        " dispatch      : workers={} queue={}",
        config.dispatch.workers, config.dispatch.queue
    );
    if interactive {
        eprintln!(" console       : one JSON event per line on stdin, Ctrl-C to quit");
    }
    eprintln!("─────────────────────────────────────────────");
}

struct CliArgs {
    log_level: Option<&'static str>,
    interactive: bool,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: interact-bot [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -i, --interactive          Read JSON-lines events from stdin");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv              Increase logging verbosity");
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => eprintln!("warning: ignoring unknown argument {other:?}"),
        }
    }

    CliArgs {
        log_level: logger::level_for_verbosity(verbosity),
        interactive,
        config_path,
    }
}
