use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::counter;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vcloud_core::{topics, AssignedJob, DispatchError, JobResult};

use crate::dedup::DedupSet;
use crate::handler::JobHandler;
use crate::session::SessionContext;

const MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// 作业执行管道
///
/// Classifies each assignment, marks it processed, and executes it on its
/// own task. Duplicates and assignments without `job_id` never reach the
/// handler.
pub struct JobExecutionPipeline {
    vehicle_id: String,
    handler: Arc<dyn JobHandler>,
    dedup: Arc<DedupSet>,
    permits: Option<Arc<Semaphore>>,
}

impl JobExecutionPipeline {
    pub fn new(
        vehicle_id: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        dedup: Arc<DedupSet>,
        max_concurrent_jobs: Option<usize>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            handler,
            dedup,
            permits: max_concurrent_jobs.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    pub fn dedup(&self) -> &Arc<DedupSet> {
        &self.dedup
    }

    /// Returns the execution task, or `None` when the assignment was dropped.
    pub async fn accept(&self, ctx: &SessionContext, payload: Value) -> Option<JoinHandle<()>> {
        let job: AssignedJob = match serde_json::from_value(payload) {
            Ok(job) => job,
            Err(e) => {
                warn!("[{}] Invalid job assignment: {}", ctx.label(), e);
                counter!("vcloud_jobs_dropped_total", "reason" => "decode").increment(1);
                return None;
            }
        };

        let Some(job_id) = job.job_id.clone() else {
            warn!("[{}] Job received without job_id, ignoring.", ctx.label());
            counter!("vcloud_jobs_dropped_total", "reason" => "missing_job_id").increment(1);
            return None;
        };

        if !self.dedup.insert(&job_id).await {
            debug!("[{}] Duplicate job {} ignored.", ctx.label(), job_id);
            counter!("vcloud_jobs_duplicate_total").increment(1);
            return None;
        }

        info!("[{}] Executing job {}.", ctx.label(), job_id);
        let execution = Execution {
            vehicle_id: self.vehicle_id.clone(),
            handler: Arc::clone(&self.handler),
            permits: self.permits.clone(),
            ctx: ctx.clone(),
        };
        Some(tokio::spawn(execution.run(job_id, job)))
    }
}

struct Execution {
    vehicle_id: String,
    handler: Arc<dyn JobHandler>,
    permits: Option<Arc<Semaphore>>,
    ctx: SessionContext,
}

impl Execution {
    async fn run(self, job_id: String, job: AssignedJob) {
        let _permit = match &self.permits {
            Some(permits) => match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            None => None,
        };

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.handler.handle(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DispatchError::Panicked(panic_message(panic.as_ref()))));

        let result = match outcome {
            Ok(value) => {
                info!(
                    "[{}] Job {} completed in {:?}",
                    self.ctx.label(),
                    job_id,
                    started.elapsed()
                );
                counter!("vcloud_jobs_executed_total", "outcome" => "success").increment(1);
                JobResult::success(&job_id, &self.vehicle_id, value)
            }
            Err(e) => {
                warn!("[{}] Job {} failed: {}", self.ctx.label(), job_id, e);
                counter!("vcloud_jobs_executed_total", "outcome" => "error").increment(1);
                JobResult::failure(&job_id, &self.vehicle_id, format!("Error executing job: {e}"))
            }
        };

        let Some(client_id) = job.client_id.as_deref() else {
            warn!(
                "[{}] client_id missing in job {}. Result will not be sent.",
                self.ctx.label(),
                job_id
            );
            return;
        };

        self.publish_result(&topics::job_result(client_id), &result).await;
    }

    async fn publish_result(&self, topic: &str, result: &JobResult) {
        let mut attempts = 0;
        while attempts < MAX_PUBLISH_ATTEMPTS {
            match self.ctx.publish_json(topic, result).await {
                Ok(()) => {
                    debug!(
                        "[{}] Result for job {} published to {}",
                        self.ctx.label(),
                        result.job_id,
                        topic
                    );
                    return;
                }
                Err(e) => {
                    attempts += 1;
                    warn!(
                        "[{}] Publishing result failed (attempt {}/{}): job_id={}, error={}",
                        self.ctx.label(),
                        attempts,
                        MAX_PUBLISH_ATTEMPTS,
                        result.job_id,
                        e
                    );
                    if attempts < MAX_PUBLISH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(100 * (1 << attempts))).await;
                    }
                }
            }
        }
        error!(
            "[{}] Giving up on result for job {}",
            self.ctx.label(),
            result.job_id
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
