//! Console channel: reads JSON-lines interaction events from stdin and
//! prints replies to stdout as JSON.
//!
//! ```text
//! {"kind":"slash","command":"eval","user":"u1","payload":{"code":"1 + 1"}}
//! {"kind":"button","component_id":"4f1c2d3e-…","user":"u1"}
//! ```
//!
//! Runs until the `shutdown` token is cancelled or stdin is closed. Closing
//! stdin cancels `shutdown` so the rest of the bot winds down with it.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::interaction::{Envelope, InteractionEvent, Reply, ReplySink, Tone};
use crate::runtime::{Component, ComponentFuture};

// ── StdoutSink ───────────────────────────────────────────────────────────────

/// Prints each reply as one JSON line.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ReplySink for StdoutSink {
    fn present(&self, reply: Reply) {
        let line = match serde_json::to_string(&reply) {
            Ok(line) => line,
            Err(e) => {
                warn!("could not serialise reply: {e}");
                return;
            }
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!("stdout write error: {e}");
        }
    }
}

// ── ConsoleChannel ───────────────────────────────────────────────────────────

pub struct ConsoleChannel {
    events: mpsc::Sender<Envelope>,
}

impl ConsoleChannel {
    pub fn new(events: mpsc::Sender<Envelope>) -> Self {
        Self { events }
    }
}

impl Component for ConsoleChannel {
    fn id(&self) -> &str {
        "console"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            info!("console channel started, one JSON event per line. Ctrl-C to quit.");
            let stdin = BufReader::new(tokio::io::stdin());
            let sink: Arc<dyn ReplySink> = Arc::new(StdoutSink);
            run_console(stdin, self.events, sink, shutdown).await
        })
    }
}

// ── run_console ──────────────────────────────────────────────────────────────

/// Feed events read from `reader` into `events`, answering on `sink`.
pub async fn run_console<R>(
    reader: R,
    events: mpsc::Sender<Envelope>,
    sink: Arc<dyn ReplySink>,
    shutdown: CancellationToken,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("console channel shutting down");
                break;
            }

            line = lines.next_line() => {
                let input = match line {
                    Err(e) => {
                        warn!("console read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("console stdin closed");
                        shutdown.cancel();
                        break;
                    }
                    Ok(Some(input)) => input,
                };
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }

                let event: InteractionEvent = match serde_json::from_str(input) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!(%input, "unparseable console event");
                        sink.present(
                            Reply::ephemeral(format!("could not parse event: {e}"))
                                .with_tone(Tone::Error),
                        );
                        continue;
                    }
                };

                let envelope = Envelope { event, reply: sink.clone() };
                if events.send(envelope).await.is_err() {
                    warn!("dispatcher queue closed, console exiting");
                    break;
                }
            }
        }
    }

    Ok(())
}
