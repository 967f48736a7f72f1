use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use vcloud_core::{topics, JobSubmission, ServiceLifecycle, Transport, VcResult};

use crate::correlation::{ResultCorrelator, ResultHandler};
use crate::session::{NodeSession, SessionContext, SessionOptions, SessionRole};

pub struct ClientRole {
    correlator: ResultCorrelator,
}

#[async_trait]
impl SessionRole for ClientRole {
    fn role_name(&self) -> &'static str {
        "Client"
    }

    fn subscriptions(&self, node_id: &str) -> Vec<String> {
        vec![topics::job_result(node_id)]
    }

    async fn on_message(&self, ctx: &SessionContext, topic: &str, payload: Value) {
        if topic != topics::job_result(ctx.node_id()) {
            warn!("[{}] Ignoring message on unexpected topic {}", ctx.label(), topic);
            return;
        }
        self.correlator.handle(ctx.label(), payload);
    }
}

/// 客户端节点
///
/// Submits jobs and receives their results asynchronously through the
/// registered [`ResultHandler`].
pub struct ClientNode {
    session: NodeSession<ClientRole>,
}

impl ClientNode {
    pub fn new(client_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_options(client_id, transport, None, SessionOptions::default())
    }

    pub fn with_result_handler(
        client_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn ResultHandler>,
    ) -> Self {
        Self::with_options(client_id, transport, Some(handler), SessionOptions::default())
    }

    pub fn with_options(
        client_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        handler: Option<Arc<dyn ResultHandler>>,
        options: SessionOptions,
    ) -> Self {
        let role = ClientRole {
            correlator: ResultCorrelator::new(handler),
        };
        Self {
            session: NodeSession::new(client_id, role, transport, options),
        }
    }

    pub fn session(&self) -> &NodeSession<ClientRole> {
        &self.session
    }

    /// Stamps the job with this client's id (and a fresh `job_id` when the
    /// submission has none), publishes it and returns the job id.
    pub async fn submit_job(&self, submission: JobSubmission) -> VcResult<String> {
        let ctx = self.session.context();
        let job = submission.into_job(ctx.node_id());
        ctx.publish_json(&topics::job_submit(ctx.node_id()), &job)
            .await?;
        debug!("[{}] Submitted job {}", ctx.label(), job.job_id);
        Ok(job.job_id)
    }
}

#[async_trait]
impl ServiceLifecycle for ClientNode {
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
