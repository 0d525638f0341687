//! Background eviction of stale component IDs.
//!
//! Runs [`ComponentIdGenerator::sweep`] on a fixed cadence. Sweeps touch the
//! database, so each one runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::runtime::{Component, ComponentFuture};

use super::ComponentIdGenerator;

pub struct Sweeper {
    generator: Arc<ComponentIdGenerator>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(generator: Arc<ComponentIdGenerator>, interval: Duration) -> Self {
        Self { generator, interval }
    }
}

impl Component for Sweeper {
    fn id(&self) -> &str {
        "component-id-sweeper"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            run_sweeper(self.generator, self.interval, shutdown).await;
            Ok(())
        })
    }
}

/// Sweep immediately, then every `interval`, until `shutdown` is cancelled.
pub async fn run_sweeper(
    generator: Arc<ComponentIdGenerator>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "component id sweeper running");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("component id sweeper shutting down");
                break;
            }

            _ = ticker.tick() => {
                let generator = generator.clone();
                match tokio::task::spawn_blocking(move || generator.sweep()).await {
                    Ok(Ok(0)) => debug!("sweep: nothing to evict"),
                    Ok(Ok(count)) => debug!(count, "sweep finished"),
                    Ok(Err(e)) => warn!(error = %e, "sweep failed; will retry next interval"),
                    Err(e) => error!("sweep task panicked: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    use crate::clock::ManualClock;
    use crate::component_ids::{GeneratorConfig, Lifespan, MemoryStore};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_evicts_stale_entries_and_stops_on_shutdown() {
        let ttl = TimeDelta::hours(1);
        let clock = Arc::new(ManualClock::at_epoch());
        let generator = Arc::new(
            ComponentIdGenerator::new(
                Arc::new(MemoryStore::new(ttl)),
                clock.clone(),
                GeneratorConfig::default(),
            )
            .unwrap(),
        );
        generator.mint("s-h", vec![], Lifespan::Regular).unwrap();
        generator.mint("s-h", vec![], Lifespan::Permanent).unwrap();
        clock.advance(ttl);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            generator.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        for _ in 0..200 {
            if generator.stored_count().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(generator.stored_count().unwrap(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweeper should stop after shutdown")
            .unwrap();
    }
}
