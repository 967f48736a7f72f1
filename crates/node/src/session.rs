use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vcloud_core::{EventStream, QoS, Transport, TransportEvent, VcResult};

/// Behaviour that differs between clients, vehicles and the broker router.
#[async_trait]
pub trait SessionRole: Send + Sync + 'static {
    /// Prefix used in log lines, e.g. `Vehicle`.
    fn role_name(&self) -> &'static str;

    /// Topics (or filters) to hold while connected.
    fn subscriptions(&self, node_id: &str) -> Vec<String>;

    /// Runs once per `start()`, on the first connection that succeeds.
    async fn on_ready(&self, _ctx: &SessionContext) -> VcResult<()> {
        Ok(())
    }

    /// A decoded inbound message.
    async fn on_message(&self, ctx: &SessionContext, topic: &str, payload: Value);
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Pause between subscribing and the role's `on_ready` hook.
    pub settle_interval: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub qos: QoS,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            settle_interval: Duration::from_secs(1),
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(10),
            qos: QoS::AtMostOnce,
        }
    }
}

impl SessionOptions {
    /// Uniform draw from `[reconnect_min, reconnect_max]`.
    pub fn reconnect_delay(&self) -> Duration {
        let min = self.reconnect_min.as_millis() as u64;
        let max = (self.reconnect_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// Handle roles use to talk back through the session's transport.
#[derive(Clone)]
pub struct SessionContext {
    node_id: String,
    label: String,
    transport: Arc<dyn Transport>,
    options: SessionOptions,
}

impl SessionContext {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// `"<Role> <id>"`, the prefix of every log line of this session.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn settle_interval(&self) -> Duration {
        self.options.settle_interval
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        topic: &str,
        message: &T,
    ) -> VcResult<()> {
        let payload = serde_json::to_vec(message)?;
        self.transport.publish(topic, &payload, self.options.qos).await
    }
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    router: JoinHandle<()>,
}

struct SessionInner<R> {
    role: R,
    ctx: SessionContext,
    running: AtomicBool,
    ready: AtomicBool,
}

/// 节点会话
///
/// Owns one transport connection for one node. `start()` connects and
/// subscribes, then a router task consumes transport events until `stop()`.
/// While running, an unsolicited disconnect is answered with reconnect
/// attempts spaced by a random delay; each success re-subscribes.
pub struct NodeSession<R: SessionRole> {
    inner: Arc<SessionInner<R>>,
    state: Mutex<Option<Running>>,
}

impl<R: SessionRole> NodeSession<R> {
    pub fn new(
        node_id: impl Into<String>,
        role: R,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let node_id = node_id.into();
        let label = format!("{} {}", role.role_name(), node_id);
        Self {
            inner: Arc::new(SessionInner {
                role,
                ctx: SessionContext {
                    node_id,
                    label,
                    transport,
                    options,
                },
                running: AtomicBool::new(false),
                ready: AtomicBool::new(false),
            }),
            state: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        self.inner.ctx.node_id()
    }

    pub fn context(&self) -> &SessionContext {
        &self.inner.ctx
    }

    pub fn role(&self) -> &R {
        &self.inner.role
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Connectivity of the underlying transport.
    pub fn status(&self) -> bool {
        self.inner.ctx.is_connected()
    }

    /// Idempotent. A failed first connection is not an error: the router
    /// keeps retrying in the background.
    pub async fn start(&self) -> VcResult<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            debug!("[{}] Already started", self.inner.ctx.label);
            return Ok(());
        }

        let ctx = &self.inner.ctx;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.ready.store(false, Ordering::SeqCst);

        let connected = match ctx.transport.connect(events_tx).await {
            Ok(()) => {
                self.inner.establish().await;
                true
            }
            Err(e) => {
                warn!("[{}] Error connecting to broker: {}", ctx.label, e);
                false
            }
        };

        let router = tokio::spawn(Arc::clone(&self.inner).route(events_rx, shutdown_rx, connected));
        *state = Some(Running {
            shutdown_tx,
            router,
        });
        info!("[{}] Started.", ctx.label);
        Ok(())
    }

    /// Idempotent. Waits for the router task to finish.
    pub async fn stop(&self) -> VcResult<()> {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return Ok(());
        };
        let ctx = &self.inner.ctx;
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = running.shutdown_tx.send(());

        if ctx.transport.is_connected() {
            for topic in self.inner.role.subscriptions(&ctx.node_id) {
                if let Err(e) = ctx.transport.unsubscribe(&topic).await {
                    debug!("[{}] Unsubscribe from {} failed: {}", ctx.label, topic, e);
                }
            }
        }
        if let Err(e) = ctx.transport.disconnect().await {
            warn!("[{}] Disconnect failed: {}", ctx.label, e);
        }
        if let Err(e) = running.router.await {
            error!("[{}] Router task ended abnormally: {}", ctx.label, e);
        }
        self.inner.ready.store(false, Ordering::SeqCst);
        info!("[{}] Stopped.", ctx.label);
        Ok(())
    }
}

impl<R: SessionRole> SessionInner<R> {
    /// Subscribes the role's topics and, on the first connection of this
    /// run, fires `on_ready`.
    async fn establish(&self) {
        let ctx = &self.ctx;
        for topic in self.role.subscriptions(&ctx.node_id) {
            match ctx.transport.subscribe(&topic, ctx.options.qos).await {
                Ok(()) => debug!("[{}] Subscribed to {}", ctx.label, topic),
                Err(e) => warn!("[{}] Subscribe to {} failed: {}", ctx.label, topic, e),
            }
        }

        if !self.ready.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.role.on_ready(ctx).await {
                warn!("[{}] Startup hook failed: {}", ctx.label, e);
            }
        }
    }

    async fn route(
        self: Arc<Self>,
        mut events: EventStream,
        mut shutdown_rx: broadcast::Receiver<()>,
        connected: bool,
    ) {
        let ctx = &self.ctx;
        let mut needs_reconnect = !connected;

        loop {
            if needs_reconnect {
                if !self.reconnect(&mut shutdown_rx).await {
                    break;
                }
                needs_reconnect = false;
                self.establish().await;
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                event = events.recv() => match event {
                    None => break,
                    Some(TransportEvent::Connected) => {
                        debug!("[{}] Connected to broker", ctx.label);
                    }
                    Some(TransportEvent::Disconnected { unsolicited, reason }) => {
                        info!("[{}] Disconnected from broker: {}", ctx.label, reason);
                        // stale events can arrive after a successful reconnect
                        if unsolicited
                            && self.running.load(Ordering::SeqCst)
                            && !ctx.transport.is_connected()
                        {
                            needs_reconnect = true;
                        }
                    }
                    Some(TransportEvent::Message { topic, payload }) => {
                        self.dispatch(&topic, &payload).await;
                    }
                },
            }
        }
        debug!("[{}] Router stopped", ctx.label);
    }

    /// Retries until connected (`true`) or shut down (`false`).
    async fn reconnect(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let ctx = &self.ctx;
        loop {
            let delay = ctx.options.reconnect_delay();
            info!("[{}] Trying to reconnect in {:?}...", ctx.label, delay);
            tokio::select! {
                _ = shutdown_rx.recv() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }

            match ctx.transport.reconnect().await {
                Ok(()) => {
                    info!("[{}] Reconnected to broker", ctx.label);
                    return true;
                }
                Err(e) => warn!("[{}] Reconnection failed: {}", ctx.label, e),
            }
        }
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => self.role.on_message(&self.ctx, topic, value).await,
            Err(e) => warn!(
                "[{}] Invalid JSON message on {}: {} ({})",
                self.ctx.label,
                topic,
                String::from_utf8_lossy(payload),
                e
            ),
        }
    }
}
