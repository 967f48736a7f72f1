use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use vcloud_core::JobResult;

/// Receives results on the client side, in arrival order.
pub trait ResultHandler: Send + Sync {
    fn on_result(&self, result: JobResult);
}

impl<F> ResultHandler for F
where
    F: Fn(JobResult) + Send + Sync,
{
    fn on_result(&self, result: JobResult) {
        self(result)
    }
}

/// Forwards every result into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelResultHandler {
    tx: mpsc::UnboundedSender<JobResult>,
}

impl ChannelResultHandler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultHandler for ChannelResultHandler {
    fn on_result(&self, result: JobResult) {
        if self.tx.send(result).is_err() {
            warn!("Result receiver dropped, discarding result");
        }
    }
}

/// 结果关联
///
/// Turns raw result payloads into [`JobResult`]s and hands them to the
/// registered handler. There is no request/response pairing here; callers
/// match on `job_id` themselves.
#[derive(Clone, Default)]
pub struct ResultCorrelator {
    handler: Option<Arc<dyn ResultHandler>>,
}

impl ResultCorrelator {
    pub fn new(handler: Option<Arc<dyn ResultHandler>>) -> Self {
        Self { handler }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn handle(&self, label: &str, payload: Value) -> Option<JobResult> {
        let result: JobResult = match serde_json::from_value(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!("[{}] Invalid job result: {}", label, e);
                return None;
            }
        };

        match &self.handler {
            Some(handler) => handler.on_result(result.clone()),
            None => info!("[{}] Result received: {:?}", label, result),
        }
        Some(result)
    }
}
