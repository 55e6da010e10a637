//! Periodic cycle trigger.
//!
//! Fires the orchestrator once at startup (unless disabled) and then on a
//! fixed period, and sweeps expired cache entries on its own period. Each
//! cycle is spawned as a task so a slow cycle never delays the timer; the
//! orchestrator skips triggers that arrive while a cycle is still running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::config::PipelineConfig;
use super::orchestrator::Orchestrator;

/// Drives an [`Orchestrator`] on a timer.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    cycle_interval: Duration,
    sweep_interval: Duration,
    run_on_start: bool,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let config: &PipelineConfig = orchestrator.config();
        let cycle_interval = config.cycle_interval;
        let sweep_interval = config.cache_sweep_interval;
        let run_on_start = config.run_on_start;
        Self {
            orchestrator,
            cycle_interval,
            sweep_interval,
            run_on_start,
        }
    }

    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Run until `shutdown` resolves, then wait for the cycle in progress.
    ///
    /// Returns the number of cycles that were triggered.
    pub async fn run_until<F>(self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let now = Instant::now();
        let first_cycle = if self.run_on_start {
            now
        } else {
            now + self.cycle_interval
        };
        let mut cycles = interval_at(first_cycle, self.cycle_interval);
        cycles.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweeps = interval_at(now + self.sweep_interval, self.sweep_interval);
        sweeps.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.cycle_interval.as_secs(),
            run_on_start = self.run_on_start,
            "Scheduler started"
        );

        let mut in_flight = JoinSet::new();
        let mut triggered = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = cycles.tick() => {
                    triggered += 1;
                    let orchestrator = self.orchestrator.clone();
                    in_flight.spawn(async move {
                        orchestrator.run_cycle().await;
                    });
                }
                _ = sweeps.tick() => {
                    self.orchestrator.sweep_caches();
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!(error = %err, "Cycle task failed");
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!("Waiting for the running cycle to finish");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Cycle task failed");
            }
        }
        tracing::info!(cycles = triggered, "Scheduler stopped");
        triggered
    }
}
