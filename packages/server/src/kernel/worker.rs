use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domains::schedules::{next_run_at, FireOutcome, Schedule, ScheduleType};
use crate::kernel::clock::Clock;
use crate::kernel::dispatcher::Dispatcher;

/// Tunables for the background poll loop (mirrors [`crate::Config`]'s
/// worker_* fields).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: StdDuration,
    pub batch_size: i64,
    pub lock_lease_seconds: i64,
    pub max_concurrent_runs: usize,
}

/// Polls for due schedules, dispatches them under a bounded concurrency
/// limit, and writes back the outcome.
pub struct Worker {
    pool: PgPool,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_runs));
        Self {
            pool,
            dispatcher,
            clock,
            config,
            semaphore,
        }
    }

    /// Run the poll loop until `shutdown` is cancelled. Ticks are spaced so
    /// a slow tick doesn't compound: elapsed tick time is subtracted from
    /// the next sleep, never going negative.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("scheduler worker started");
        loop {
            let started = self.clock.now();

            if let Err(err) = self.tick().await {
                error!(error = %err, "worker tick failed");
            }

            let elapsed = (self.clock.now() - started)
                .to_std()
                .unwrap_or(StdDuration::ZERO);
            let sleep_for = self.config.poll_interval.saturating_sub(elapsed);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        info!("scheduler worker stopped");
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let now = self.clock.now();
        let lease_until = now + ChronoDuration::seconds(self.config.lock_lease_seconds);

        let candidate_ids = Schedule::peek_due(self.config.batch_size, now, &self.pool).await?;
        if candidate_ids.is_empty() {
            debug!("no due schedules");
            return Ok(());
        }

        let claimed = Schedule::claim(&candidate_ids, lease_until, now, &self.pool).await?;
        if claimed.is_empty() {
            return Ok(());
        }
        info!(count = claimed.len(), "due schedules claimed");

        let mut handles = Vec::with_capacity(claimed.len());
        for schedule in claimed {
            let permit = self.semaphore.clone().acquire_owned().await?;
            let pool = self.pool.clone();
            let dispatcher = self.dispatcher.clone();
            let clock = self.clock.clone();
            let id = schedule.id;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = fire_one(id, &schedule.token, schedule.user_id, schedule.scenario_id, schedule.schedule_type, &pool, &dispatcher, clock.as_ref()).await
                {
                    error!(schedule_id = %id, error = %err, "failed to record fire outcome");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn fire_one(
    id: Uuid,
    token: &str,
    user_id: i64,
    scenario_id: i64,
    schedule_type: ScheduleType,
    pool: &PgPool,
    dispatcher: &Dispatcher,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let outcome = dispatcher.fire(token, user_id, scenario_id).await;
    let fired_at = clock.now();

    debug!(
        schedule_id = %id,
        user_id,
        scenario_id,
        status = ?outcome.status_code,
        error = outcome.error.as_deref().unwrap_or("none"),
        "schedule fired"
    );

    let Some(schedule) = Schedule::get_by_id(id, pool).await? else {
        return Ok(());
    };

    let (active, next_run_at) = if schedule_type == ScheduleType::Once {
        (false, None)
    } else {
        (schedule.active, next_run_at(&schedule, fired_at))
    };

    let outcome = FireOutcome {
        last_run_at: fired_at,
        last_status_code: outcome.status_code,
        last_error: outcome.error,
        active,
        next_run_at,
    };

    Schedule::record_fire(id, &outcome, pool).await?;
    Ok(())
}
