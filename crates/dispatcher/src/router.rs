use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use vcloud_core::topics::{self, TopicKind};
use vcloud_core::{
    Job, JobResult, ServiceLifecycle, Transport, VcError, VcResult, VehicleRegistration,
};
use vcloud_node::{NodeSession, SessionContext, SessionOptions, SessionRole};

use crate::engine::{Engine, JobAssigner};

/// Broker side of the session: hears every registration, submission and
/// result and hands them to the engine.
pub struct BrokerRole {
    engine: Arc<dyn Engine>,
}

impl BrokerRole {
    async fn route(&self, ctx: &SessionContext, kind: TopicKind, payload: Value) -> VcResult<()> {
        let assigner = JobAssigner::new(ctx.clone());
        match kind {
            TopicKind::RegisterRequest { vehicle_id } => {
                let registration: VehicleRegistration = serde_json::from_value(payload)?;
                if registration.vehicle_id != vehicle_id {
                    warn!(
                        "[{}] Registration of {} arrived on the topic of {}",
                        ctx.label(),
                        registration.vehicle_id,
                        vehicle_id
                    );
                }
                self.engine.register(registration, &assigner).await
            }
            TopicKind::JobSubmit { client_id } => {
                let job = decode_submission(&client_id, payload)?;
                if job.client_id != client_id {
                    warn!(
                        "[{}] Job {} from {} claims owner {}",
                        ctx.label(),
                        job.job_id,
                        client_id,
                        job.client_id
                    );
                }
                self.engine.submit(job, &assigner).await
            }
            TopicKind::JobResult { .. } => {
                let result: JobResult = serde_json::from_value(payload)?;
                self.engine.complete(result).await
            }
            TopicKind::JobAssign { .. } => Ok(()),
        }
    }
}

/// A submission must carry its `job_id`; the owner defaults to the client
/// whose topic it arrived on.
fn decode_submission(client_id: &str, mut payload: Value) -> VcResult<Job> {
    if let Some(fields) = payload.as_object_mut() {
        if !matches!(fields.get("job_id"), Some(Value::String(_))) {
            return Err(VcError::MissingCorrelation("job_id"));
        }
        fields
            .entry("client_id")
            .or_insert_with(|| Value::String(client_id.to_string()));
    }
    Ok(serde_json::from_value(payload)?)
}

#[async_trait]
impl SessionRole for BrokerRole {
    fn role_name(&self) -> &'static str {
        "Broker"
    }

    fn subscriptions(&self, _node_id: &str) -> Vec<String> {
        vec![
            topics::VEHICLE_REGISTER_FILTER.to_string(),
            topics::JOB_SUBMIT_FILTER.to_string(),
            topics::JOB_RESULT_FILTER.to_string(),
        ]
    }

    async fn on_message(&self, ctx: &SessionContext, topic: &str, payload: Value) {
        let Some(kind) = TopicKind::parse(topic) else {
            debug!("[{}] Ignoring message on {}", ctx.label(), topic);
            return;
        };
        if let Err(e) = self.route(ctx, kind, payload).await {
            warn!("[{}] Error processing message on {}: {}", ctx.label(), topic, e);
        }
    }
}

/// 中间件服务端路由
pub struct BrokerRouter {
    session: NodeSession<BrokerRole>,
}

impl BrokerRouter {
    pub fn new(
        id: impl Into<String>,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self::with_options(id, transport, engine, SessionOptions::default())
    }

    pub fn with_options(
        id: impl Into<String>,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn Engine>,
        options: SessionOptions,
    ) -> Self {
        Self {
            session: NodeSession::new(id, BrokerRole { engine }, transport, options),
        }
    }

    pub fn session(&self) -> &NodeSession<BrokerRole> {
        &self.session
    }
}

#[async_trait]
impl ServiceLifecycle for BrokerRouter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_without_job_id_is_rejected() {
        let err = decode_submission("c1", json!({"function": "add", "args": [1, 2]})).unwrap_err();
        assert!(matches!(err, VcError::MissingCorrelation("job_id")));
    }

    #[test]
    fn test_submission_owner_defaults_to_topic_client() {
        let job = decode_submission("c9", json!({"job_id": "j1", "function": "echo"})).unwrap();
        assert_eq!(job.client_id, "c9");
        assert!(job.args.is_empty());

        let job = decode_submission(
            "c9",
            json!({"job_id": "j2", "client_id": "c1", "function": "echo"}),
        )
        .unwrap();
        assert_eq!(job.client_id, "c1");
    }

    #[test]
    fn test_non_object_submission_is_a_decode_error() {
        let err = decode_submission("c1", json!([1, 2])).unwrap_err();
        assert!(matches!(err, VcError::Decode(_)));
    }
}
