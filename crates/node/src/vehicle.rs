use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use vcloud_core::{
    topics, NodeIdentity, ServiceLifecycle, Transport, VcError, VcResult, VehicleAttributes,
    VehicleRegistration,
};

use crate::dedup::DedupSet;
use crate::handler::{JobHandler, RegistryDispatcher};
use crate::pipeline::JobExecutionPipeline;
use crate::registry::FunctionRegistry;
use crate::session::{NodeSession, SessionContext, SessionOptions, SessionRole};

/// Vehicle side of the session: listens for assignments, registers once
/// per start.
pub struct VehicleRole {
    registration: VehicleRegistration,
    pipeline: JobExecutionPipeline,
}

impl VehicleRole {
    pub fn pipeline(&self) -> &JobExecutionPipeline {
        &self.pipeline
    }
}

#[async_trait]
impl SessionRole for VehicleRole {
    fn role_name(&self) -> &'static str {
        "Vehicle"
    }

    fn subscriptions(&self, node_id: &str) -> Vec<String> {
        vec![topics::job_assign(node_id)]
    }

    async fn on_ready(&self, ctx: &SessionContext) -> VcResult<()> {
        tokio::time::sleep(ctx.settle_interval()).await;
        ctx.publish_json(&topics::vehicle_register(ctx.node_id()), &self.registration)
            .await?;
        info!("[{}] Registering...", ctx.label());
        Ok(())
    }

    async fn on_message(&self, ctx: &SessionContext, topic: &str, payload: Value) {
        if topic != topics::job_assign(ctx.node_id()) {
            warn!("[{}] Ignoring message on unexpected topic {}", ctx.label(), topic);
            return;
        }
        // execution is detached, the session keeps routing
        let _ = self.pipeline.accept(ctx, payload).await;
    }
}

/// 车辆节点
pub struct VehicleNode {
    session: NodeSession<VehicleRole>,
}

impl VehicleNode {
    pub fn builder(
        vehicle_id: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> VehicleNodeBuilder {
        VehicleNodeBuilder::new(vehicle_id, transport)
    }

    pub fn session(&self) -> &NodeSession<VehicleRole> {
        &self.session
    }

    pub fn dedup(&self) -> &Arc<DedupSet> {
        self.session.role().pipeline().dedup()
    }

    pub fn status(&self) -> bool {
        self.session.status()
    }
}

#[async_trait]
impl ServiceLifecycle for VehicleNode {
    fn id(&self) -> &str {
        self.session.node_id()
    }

    async fn start(&self) -> VcResult<()> {
        self.session.start().await
    }

    async fn stop(&self) -> VcResult<()> {
        self.session.stop().await
    }

    fn is_connected(&self) -> bool {
        self.session.status()
    }
}

pub struct VehicleNodeBuilder {
    vehicle_id: String,
    transport: Arc<dyn Transport>,
    attributes: Option<VehicleAttributes>,
    registry: Option<Arc<FunctionRegistry>>,
    job_handler: Option<Arc<dyn JobHandler>>,
    max_concurrent_jobs: Option<usize>,
    dedup_capacity: Option<usize>,
    options: SessionOptions,
}

impl VehicleNodeBuilder {
    pub fn new(vehicle_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            transport,
            attributes: None,
            registry: None,
            job_handler: None,
            max_concurrent_jobs: None,
            dedup_capacity: None,
            options: SessionOptions::default(),
        }
    }

    /// 设置车辆属性
    pub fn attributes(mut self, attributes: VehicleAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Function table for the default dispatcher.
    pub fn registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the registry-backed dispatcher entirely.
    pub fn job_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.job_handler = Some(handler);
        self
    }

    /// 设置最大并发作业数
    pub fn max_concurrent_jobs(mut self, max_concurrent_jobs: usize) -> Self {
        self.max_concurrent_jobs = Some(max_concurrent_jobs);
        self
    }

    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = Some(capacity);
        self
    }

    pub fn settle_interval(mut self, interval: Duration) -> Self {
        self.options.settle_interval = interval;
        self
    }

    pub fn session_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> VcResult<VehicleNode> {
        let identity = NodeIdentity::vehicle(self.vehicle_id, self.attributes);
        let registration = identity.registration().ok_or_else(|| {
            VcError::Internal(format!("{identity} has no registration payload"))
        })?;

        let handler: Arc<dyn JobHandler> = match (self.job_handler, self.registry) {
            (Some(handler), _) => handler,
            (None, Some(registry)) => Arc::new(RegistryDispatcher::new(registry)),
            (None, None) => Arc::new(RegistryDispatcher::default()),
        };
        let dedup = Arc::new(match self.dedup_capacity {
            Some(capacity) => DedupSet::with_capacity(capacity),
            None => DedupSet::new(),
        });
        let pipeline =
            JobExecutionPipeline::new(identity.id(), handler, dedup, self.max_concurrent_jobs);

        let role = VehicleRole {
            registration,
            pipeline,
        };
        Ok(VehicleNode {
            session: NodeSession::new(identity.id(), role, self.transport, self.options),
        })
    }
}
