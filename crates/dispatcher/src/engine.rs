use async_trait::async_trait;
use vcloud_core::{topics, Job, JobResult, VcResult, VehicleRegistration};
use vcloud_node::SessionContext;

/// Publishes assignments on behalf of an [`Engine`].
#[derive(Clone)]
pub struct JobAssigner {
    ctx: SessionContext,
}

impl JobAssigner {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    /// Sends `job` to the assign topic of `vehicle_id`.
    pub async fn assign(&self, vehicle_id: &str, job: &Job) -> VcResult<()> {
        self.ctx
            .publish_json(&topics::job_assign(vehicle_id), job)
            .await
    }
}

/// 调度引擎接口
///
/// The matching policy lives behind this trait; the router only decodes
/// traffic and forwards each category here.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn register(
        &self,
        registration: VehicleRegistration,
        assigner: &JobAssigner,
    ) -> VcResult<()>;

    async fn submit(&self, job: Job, assigner: &JobAssigner) -> VcResult<()>;

    async fn complete(&self, result: JobResult) -> VcResult<()>;
}
