/// Token Cleanup Scheduler
///
/// Three independent timers drive the token stores' maintenance passes:
/// - refresh-token sweep (hourly by default)
/// - reset-token expiry marking (every 30 minutes by default)
/// - reset-token purge (daily at a fixed UTC time of day)
///
/// Every run happens in its own task. An error or a panic in one run is
/// logged and the timer keeps going; the other timers are unaffected.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::configuration::{CleanupSettings, PasswordResetSettings};
use crate::error::{AppError, ConfigError};
use crate::tokens::{PasswordResetTokenStore, RefreshTokenStore};

#[derive(Debug, Clone)]
pub struct CleanupSchedule {
    pub refresh_sweep_every: StdDuration,
    pub reset_expiry_every: StdDuration,
    pub purge_at: NaiveTime,
    pub retention: Duration,
}

impl CleanupSchedule {
    pub fn from_settings(
        cleanup: &CleanupSettings,
        password_reset: &PasswordResetSettings,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            refresh_sweep_every: StdDuration::from_secs(cleanup.refresh_sweep_interval_secs),
            reset_expiry_every: StdDuration::from_secs(cleanup.reset_expiry_interval_secs),
            purge_at: cleanup.purge_time()?,
            retention: password_reset.retention(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupJob {
    RefreshSweep,
    ResetExpiry,
    ResetPurge,
}

impl CleanupJob {
    pub fn name(&self) -> &'static str {
        match self {
            CleanupJob::RefreshSweep => "refresh_token_sweep",
            CleanupJob::ResetExpiry => "reset_token_expiry",
            CleanupJob::ResetPurge => "reset_token_purge",
        }
    }
}

#[derive(Clone)]
pub struct TokenCleanupScheduler {
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    reset_tokens: Arc<dyn PasswordResetTokenStore>,
    schedule: CleanupSchedule,
}

impl TokenCleanupScheduler {
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        reset_tokens: Arc<dyn PasswordResetTokenStore>,
        schedule: CleanupSchedule,
    ) -> Self {
        Self {
            refresh_tokens,
            reset_tokens,
            schedule,
        }
    }

    /// Delete refresh tokens that expired before `now`
    pub async fn sweep_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.refresh_tokens.sweep_expired(now).await
    }

    /// Flag reset tokens that expired before `now`
    pub async fn expire_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.reset_tokens.mark_expired_batch(now).await
    }

    /// Delete reset tokens older than the retention window
    pub async fn purge_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.reset_tokens
            .purge_older_than(now - self.schedule.retention)
            .await
    }

    pub async fn run(&self, job: CleanupJob, now: DateTime<Utc>) -> Result<u64, AppError> {
        match job {
            CleanupJob::RefreshSweep => self.sweep_refresh_tokens(now).await,
            CleanupJob::ResetExpiry => self.expire_reset_tokens(now).await,
            CleanupJob::ResetPurge => self.purge_reset_tokens(now).await,
        }
    }

    /// Run one job in its own task and log the outcome
    async fn run_isolated(&self, job: CleanupJob) {
        let scheduler = self.clone();
        let outcome = tokio::spawn(async move { scheduler.run(job, Utc::now()).await }).await;

        match outcome {
            Ok(Ok(affected)) => {
                tracing::info!(job = job.name(), affected = affected, "Token cleanup completed");
            }
            Ok(Err(e)) => {
                tracing::error!(job = job.name(), error = %e, "Token cleanup failed");
            }
            Err(e) => {
                tracing::error!(job = job.name(), error = %e, "Token cleanup task aborted");
            }
        }
    }

    /// Start the three timers
    ///
    /// Interval timers first fire one full period after start.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown, _) = watch::channel(false);

        let tasks = vec![
            self.spawn_interval(
                CleanupJob::RefreshSweep,
                self.schedule.refresh_sweep_every,
                shutdown.subscribe(),
            ),
            self.spawn_interval(
                CleanupJob::ResetExpiry,
                self.schedule.reset_expiry_every,
                shutdown.subscribe(),
            ),
            self.spawn_daily(CleanupJob::ResetPurge, self.schedule.purge_at, shutdown.subscribe()),
        ];

        tracing::info!(
            refresh_sweep_secs = self.schedule.refresh_sweep_every.as_secs(),
            reset_expiry_secs = self.schedule.reset_expiry_every.as_secs(),
            purge_at = %self.schedule.purge_at,
            "Token cleanup scheduler started"
        );

        SchedulerHandle { shutdown, tasks }
    }

    fn spawn_interval(
        &self,
        job: CleanupJob,
        period: StdDuration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.run_isolated(job).await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_daily(
        &self,
        job: CleanupJob,
        at: NaiveTime,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let delay = (next_daily_run(now, at) - now)
                    .to_std()
                    .unwrap_or(StdDuration::ZERO);

                tokio::select! {
                    _ = sleep(delay) => scheduler.run_isolated(job).await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

/// Owns the running timers
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every timer and wait for them to exit. A run already in
    /// progress finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Cleanup timer exited abnormally");
            }
        }
        tracing::info!("Token cleanup scheduler stopped");
    }
}

/// Next instant strictly after `now` whose UTC time of day is `at`
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
