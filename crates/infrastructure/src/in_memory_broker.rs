use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vcloud_core::topics::matches_filter;
use vcloud_core::{EventSink, QoS, Transport, TransportEvent, VcError, VcResult};

/// 内存消息代理实现
///
/// 进程内的发布/订阅中枢，按 MQTT 通配符规则路由消息，适用于嵌入式部署
/// 和测试场景。代理可以被切换为离线状态以模拟故障：离线时所有已连接的
/// 会话都会收到非主动断开事件，并且新的连接请求会被拒绝。
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    hub: Arc<Hub>,
}

#[derive(Debug)]
struct Hub {
    online: AtomicBool,
    next_session: AtomicU64,
    /// 会话存储：会话号 -> 会话
    sessions: Mutex<HashMap<u64, Session>>,
}

#[derive(Debug)]
struct Session {
    client_id: String,
    sink: EventSink,
    /// 订阅过滤器
    filters: HashSet<String>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// 创建在线的内存代理
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub {
                online: AtomicBool::new(true),
                next_session: AtomicU64::new(1),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.hub.online.load(Ordering::SeqCst)
    }

    /// Switches the broker on or off. Going offline drops every session
    /// with an unsolicited disconnect.
    pub fn set_online(&self, online: bool) {
        let was_online = self.hub.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }
        if online {
            info!("In-memory broker is back online");
            return;
        }

        let dropped: Vec<Session> = self.sessions().drain().map(|(_, s)| s).collect();
        warn!(
            "In-memory broker went offline, dropping {} sessions",
            dropped.len()
        );
        for session in dropped {
            let _ = session.sink.send(TransportEvent::Disconnected {
                unsolicited: true,
                reason: "broker offline".to_string(),
            });
        }
    }

    /// Drops every session of `client_id` as if its network link failed.
    pub fn kick(&self, client_id: &str) -> usize {
        let mut sessions = self.sessions();
        let ids: Vec<u64> = sessions
            .iter()
            .filter(|(_, s)| s.client_id == client_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(session) = sessions.remove(id) {
                let _ = session.sink.send(TransportEvent::Disconnected {
                    unsolicited: true,
                    reason: "connection lost".to_string(),
                });
            }
        }
        ids.len()
    }

    /// 当前已连接的客户端标识
    pub fn connected_clients(&self) -> Vec<String> {
        let mut clients: Vec<String> = self
            .sessions()
            .values()
            .map(|s| s.client_id.clone())
            .collect();
        clients.sort();
        clients
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, Session>> {
        // a poisoned map is still structurally valid
        self.hub
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn attach(&self, client_id: &str, sink: EventSink) -> VcResult<u64> {
        if !self.is_online() {
            return Err(VcError::TransportConnect(format!(
                "broker unavailable for {client_id}"
            )));
        }
        let id = self.hub.next_session.fetch_add(1, Ordering::SeqCst);
        self.sessions().insert(
            id,
            Session {
                client_id: client_id.to_string(),
                sink,
                filters: HashSet::new(),
            },
        );
        debug!("Client {} attached as session {}", client_id, id);
        Ok(id)
    }

    fn detach(&self, session_id: u64) -> Option<EventSink> {
        self.sessions().remove(&session_id).map(|s| s.sink)
    }

    fn is_attached(&self, session_id: u64) -> bool {
        self.sessions().contains_key(&session_id)
    }

    fn update_filters(&self, session_id: u64, filter: &str, add: bool) -> VcResult<()> {
        let mut sessions = self.sessions();
        let session = sessions.get_mut(&session_id).ok_or(VcError::NotConnected)?;
        if add {
            session.filters.insert(filter.to_string());
        } else {
            session.filters.remove(filter);
        }
        Ok(())
    }

    /// Fans a message out to every session with a matching filter; each
    /// session receives it at most once.
    fn route(&self, topic: &str, payload: &[u8]) -> usize {
        let mut sessions = self.sessions();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, session) in sessions.iter() {
            if !session.filters.iter().any(|f| matches_filter(f, topic)) {
                continue;
            }
            let event = TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            if session.sink.send(event).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }

        for id in closed {
            sessions.remove(&id);
        }
        delivered
    }
}

/// [`Transport`] backed by an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    client_id: String,
    session: Mutex<Option<u64>>,
    sink: Mutex<Option<EventSink>>,
}

impl InMemoryTransport {
    pub fn new(broker: InMemoryBroker, client_id: impl Into<String>) -> Self {
        Self {
            broker,
            client_id: client_id.into(),
            session: Mutex::new(None),
            sink: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn current_session(&self) -> Option<u64> {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_session(&self, session: Option<u64>) -> Option<u64> {
        let mut guard = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, session)
    }

    fn live_session(&self) -> VcResult<u64> {
        match self.current_session() {
            Some(id) if self.broker.is_attached(id) => Ok(id),
            _ => Err(VcError::NotConnected),
        }
    }

    fn open(&self) -> VcResult<()> {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| VcError::Internal("reconnect before connect".to_string()))?;

        if let Some(stale) = self.set_session(None) {
            self.broker.detach(stale);
        }
        let id = self.broker.attach(&self.client_id, sink.clone())?;
        self.set_session(Some(id));
        let _ = sink.send(TransportEvent::Connected);
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self, events: EventSink) -> VcResult<()> {
        *self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(events);
        self.open()
    }

    async fn disconnect(&self) -> VcResult<()> {
        if let Some(id) = self.set_session(None) {
            if let Some(sink) = self.broker.detach(id) {
                let _ = sink.send(TransportEvent::Disconnected {
                    unsolicited: false,
                    reason: "client disconnect".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn reconnect(&self) -> VcResult<()> {
        self.open()
    }

    async fn publish(&self, topic: &str, payload: &[u8], _qos: QoS) -> VcResult<()> {
        self.live_session()?;
        let delivered = self.broker.route(topic, payload);
        debug!(
            "{} published to {} ({} subscribers)",
            self.client_id, topic, delivered
        );
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> VcResult<()> {
        let id = self.live_session()?;
        self.broker.update_filters(id, topic, true)
    }

    async fn unsubscribe(&self, topic: &str) -> VcResult<()> {
        let id = self.live_session()?;
        self.broker.update_filters(id, topic, false)
    }

    fn is_connected(&self) -> bool {
        self.live_session().is_ok()
    }
}
