use std::future::Future;
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::info;

/// Thin wrapper over `JobScheduler` for cron-driven async jobs.
pub struct TaskScheduler {
    scheduler: JobScheduler,
}

impl TaskScheduler {
    pub async fn new() -> Result<Self, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler })
    }

    /// Register `job` under a six-field cron expression (seconds first).
    pub async fn add_job<F, Fut>(&self, cron_expr: &str, job: F) -> Result<(), JobSchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job = Arc::new(job);
        let cron = cron_expr.to_string();
        let scheduled = Job::new_async(cron_expr, move |_uuid, _lock| {
            let job = Arc::clone(&job);
            let cron = cron.clone();
            Box::pin(async move {
                info!(%cron, "scheduled job firing");
                job().await;
            })
        })?;

        self.scheduler.add(scheduled).await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        self.scheduler.start().await?;
        info!("task scheduler started");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<(), JobSchedulerError> {
        self.scheduler.shutdown().await?;
        info!("task scheduler stopped");
        Ok(())
    }
}
