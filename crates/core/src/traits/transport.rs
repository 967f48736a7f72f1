use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::VcResult;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Connectivity and inbound traffic reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// `unsolicited` is false only for disconnects requested through
    /// [`Transport::disconnect`].
    Disconnected { unsolicited: bool, reason: String },
    Message { topic: String, payload: Vec<u8> },
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Where and how a transport connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    /// Keep broker-side session state across reconnects.
    pub persistent_session: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            persistent_session: true,
        }
    }
}

/// 发布/订阅传输抽象接口
///
/// Implementations deliver at-least-once per subscription and run their
/// network I/O on a background task. Connectivity changes and inbound
/// messages are pushed into the sink handed to [`Transport::connect`]; the
/// sink is retained even when the first attempt fails so that
/// [`Transport::reconnect`] can reuse it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// 建立连接
    async fn connect(&self, events: EventSink) -> VcResult<()>;

    /// 主动断开连接，不触发自动重连
    async fn disconnect(&self) -> VcResult<()>;

    /// 使用上次的事件通道重新建立连接
    async fn reconnect(&self) -> VcResult<()>;

    /// 发布消息到指定主题
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> VcResult<()>;

    /// 订阅主题（支持 `+` / `#` 通配符）
    async fn subscribe(&self, topic: &str, qos: QoS) -> VcResult<()>;

    /// 取消订阅
    async fn unsubscribe(&self, topic: &str) -> VcResult<()>;

    /// 当前是否处于连接状态
    fn is_connected(&self) -> bool;
}
