//! A small job scheduler on tokio tasks.
//!
//! Jobs run either daily at a fixed UTC time or at a fixed interval, until
//! the handle is shut down. Every run is logged as executed or failed.

use crate::EngineError;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at `hour:minute` UTC.
    DailyAt { hour: u32, minute: u32 },
    /// Every interval, first run one interval after start.
    Every(Duration),
}

impl Schedule {
    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::DailyAt { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0)
                    .unwrap_or(NaiveTime::MIN);
                let today = now.date_naive().and_time(time).and_utc();
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
            Schedule::Every(interval) => {
                now + ChronoDuration::from_std(interval).unwrap_or(ChronoDuration::seconds(1))
            }
        }
    }
}

type JobFn = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, Result<(), EngineError>> + Send + Sync>;

struct Job {
    id: String,
    schedule: Schedule,
    run: JobFn,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. It receives its scheduled fire time.
    pub fn add_job<F, Fut>(&mut self, id: &str, schedule: Schedule, job: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        self.jobs.push(Job {
            id: id.to_string(),
            schedule,
            run: Arc::new(move |at| Box::pin(job(at))),
        });
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|j| j.id.as_str())
    }

    /// Spawn one task per job.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, watcher) = watch::channel(false);
        let tasks = self
            .jobs
            .into_iter()
            .map(|job| {
                info!(job = %job.id, schedule = ?job.schedule, "Job scheduled");
                tokio::spawn(run_job(job, watcher.clone()))
            })
            .collect();
        SchedulerHandle { shutdown, tasks }
    }
}

async fn run_job(job: Job, mut shutdown: watch::Receiver<bool>) {
    loop {
        let now = Utc::now();
        let next = job.schedule.next_after(now);
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        match (job.run)(next).await {
            Ok(()) => info!(job = %job.id, scheduled = %next, "Job executed"),
            Err(e) => error!(job = %job.id, scheduled = %next, error = %e, "Job failed"),
        }
    }
}

/// Running scheduler. Dropping it also stops every job, without waiting
/// for in-flight runs.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every job to stop and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Scheduler stopped");
    }
}
