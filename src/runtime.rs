//! Long-running task scaffolding.
//!
//! A [`Component`] is an independently-runnable unit of the bot: the
//! dispatch loop, the component-ID sweeper, a console channel. Each captures
//! its shared state at construction; [`spawn_components`] runs them all on
//! the Tokio pool and returns a [`RuntimeHandle`] that resolves once every
//! component has exited.
//!
//! Any component error cancels the shared [`CancellationToken`], so its
//! siblings shut down cooperatively.
//!
//! [`run_to_completion`] owns the Tokio runtime itself so that exit is not
//! held up by blocking work nobody is waiting for any more.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::runtime::Builder;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its run-loop.
    ///
    /// The future should return once `shutdown` is cancelled or the
    /// component's own work is done.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

pub struct RuntimeHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl RuntimeHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Dispatch(format!("runtime task panicked: {e}"))),
        }
    }
}

/// Spawn each [`Component`] as its own task.
///
/// If any component fails or panics, `shutdown` is cancelled and the first
/// error is returned after the rest have drained.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> RuntimeHandle {
    let inner = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            debug!(component = %component.id(), "spawning component");
            set.spawn(component.run(shutdown.clone()));
        }

        let mut first_err: Option<AppError> = None;
        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Dispatch(format!("component panicked: {e}")));
                }
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    RuntimeHandle { inner }
}

/// Drive `fut` on a fresh multi-threaded runtime, then shut the runtime
/// down giving leftover tasks at most `grace`.
///
/// Handlers abandoned at the drain deadline and a pending stdin read both
/// live on the blocking pool. Dropping the runtime would wait for them.
pub fn run_to_completion<F: Future>(fut: F, grace: Duration) -> Result<F::Output, AppError> {
    let runtime = Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(fut);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Finishes(&'static str);

    impl Component for Finishes {
        fn id(&self) -> &str {
            self.0
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async { Ok(()) })
        }
    }

    struct Fails;

    impl Component for Fails {
        fn id(&self) -> &str {
            "fails"
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async { Err(AppError::Dispatch("boom".into())) })
        }
    }

    struct WaitsForShutdown;

    impl Component for WaitsForShutdown {
        fn id(&self) -> &str {
            "waits"
        }

        fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                shutdown.cancelled().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn all_clean_exits_join_ok() {
        let handle = spawn_components(
            vec![Box::new(Finishes("a")), Box::new(Finishes("b"))],
            CancellationToken::new(),
        );
        assert!(handle.join().await.is_ok());
    }

    #[test]
    fn leftover_blocking_work_does_not_delay_exit() {
        let started = std::time::Instant::now();
        let out = run_to_completion(
            async {
                let _ = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(3)));
                7
            },
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(out, 7);
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn failure_cancels_siblings_and_surfaces() {
        let shutdown = CancellationToken::new();
        let handle = spawn_components(
            vec![Box::new(WaitsForShutdown), Box::new(Fails)],
            shutdown.clone(),
        );
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(shutdown.is_cancelled());
    }
}
