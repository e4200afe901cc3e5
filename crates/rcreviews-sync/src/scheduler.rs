use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

use crate::importer::{ImportMode, Importer};

pub fn interval_duration(hours: u32) -> Duration {
    Duration::from_secs(u64::from(hours.max(1)) * 3600)
}

async fn scheduled_import(importer: &Importer) {
    match importer.run(ImportMode::Incremental).await {
        Ok(summary) => info!(
            run_id = %summary.run_id,
            pages = summary.pages,
            total_posts = summary.total_posts,
            "scheduled import finished"
        ),
        Err(err) => error!(error = %format!("{err:#}"), "scheduled import failed"),
    }
}

/// Runs the incremental import on a fixed hourly interval.
pub struct SyncScheduler {
    sched: JobScheduler,
    importer: Arc<Importer>,
    job: Mutex<Option<(Uuid, u32)>>,
}

impl SyncScheduler {
    pub async fn new(importer: Arc<Importer>) -> Result<Self> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        Ok(Self {
            sched,
            importer,
            job: Mutex::new(None),
        })
    }

    fn build_job(&self, hours: u32) -> Result<Job> {
        let importer = self.importer.clone();
        Job::new_repeated_async(interval_duration(hours), move |_uuid, _lock| {
            let importer = importer.clone();
            Box::pin(async move { scheduled_import(&importer).await })
        })
        .with_context(|| format!("creating sync job every {hours}h"))
    }

    /// Install the job, start ticking and kick off one import right away.
    pub async fn start(&self, hours: u32) -> Result<()> {
        self.reschedule(hours).await?;
        self.sched.start().await.context("starting scheduler")?;
        let importer = self.importer.clone();
        tokio::spawn(async move { scheduled_import(&importer).await });
        Ok(())
    }

    /// Replace the current job with one running every `hours`.
    pub async fn reschedule(&self, hours: u32) -> Result<Uuid> {
        let mut job = self.job.lock().await;
        if let Some((old, _)) = job.take() {
            self.sched
                .remove(&old)
                .await
                .context("removing previous sync job")?;
        }
        let id = self
            .sched
            .add(self.build_job(hours)?)
            .await
            .context("adding sync job")?;
        info!(%id, hours, "sync job scheduled");
        *job = Some((id, hours));
        Ok(id)
    }

    pub async fn current_job(&self) -> Option<(Uuid, u32)> {
        *self.job.lock().await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.sched.shutdown().await.context("stopping scheduler")
    }
}
