use async_trait::async_trait;

use crate::VcResult;

/// Start/stop surface shared by vehicles, clients and the broker router.
///
/// The fault injector drives entities exclusively through this trait.
#[async_trait]
pub trait ServiceLifecycle: Send + Sync {
    fn id(&self) -> &str;

    /// Idempotent: starting a running service is a no-op.
    async fn start(&self) -> VcResult<()>;

    /// Idempotent: stopping a stopped service is a no-op.
    async fn stop(&self) -> VcResult<()>;

    fn is_connected(&self) -> bool;
}
