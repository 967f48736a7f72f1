use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vcloud_core::{EventSink, QoS, Transport, TransportEvent, TransportOptions, VcError, VcResult};

const REQUEST_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLLER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT传输实现
///
/// Each connection attempt builds a fresh rumqttc client/event loop pair.
/// After the CONNACK arrives a poller task forwards inbound publishes; the
/// first polling error ends that task and surfaces as an unsolicited
/// disconnect, leaving reconnection to the caller.
pub struct MqttTransport {
    client_id: String,
    options: TransportOptions,
    connection: Mutex<Option<Connection>>,
    connected: Arc<AtomicBool>,
    sink: std::sync::Mutex<Option<EventSink>>,
}

struct Connection {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

impl MqttTransport {
    pub fn new(client_id: impl Into<String>, options: TransportOptions) -> Self {
        Self {
            client_id: client_id.into(),
            options,
            connection: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            sink: std::sync::Mutex::new(None),
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.client_id, &self.options.host, self.options.port);
        options.set_keep_alive(self.options.keep_alive);
        options.set_clean_session(!self.options.persistent_session);
        options
    }

    fn stored_sink(&self) -> VcResult<EventSink> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| VcError::Internal("reconnect before connect".to_string()))
    }

    async fn current_client(&self) -> VcResult<AsyncClient> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(VcError::NotConnected);
        }
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.client.clone())
            .ok_or(VcError::NotConnected)
    }

    async fn open(&self) -> VcResult<()> {
        let sink = self.stored_sink()?;
        let mut slot = self.connection.lock().await;
        if let Some(old) = slot.take() {
            old.poller.abort();
        }

        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);
        match tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VcError::TransportConnect(format!(
                    "no CONNACK from {}:{} within {:?}",
                    self.options.host, self.options.port, CONNECT_TIMEOUT
                )))
            }
        }

        info!(
            "{} connected to MQTT broker {}:{}",
            self.client_id, self.options.host, self.options.port
        );
        self.connected.store(true, Ordering::SeqCst);
        let _ = sink.send(TransportEvent::Connected);

        let poller = tokio::spawn(poll_events(
            self.client_id.clone(),
            eventloop,
            sink,
            Arc::clone(&self.connected),
        ));
        *slot = Some(Connection { client, poller });
        Ok(())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> VcResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(VcError::TransportConnect(format!(
                    "broker refused connection: {:?}",
                    ack.code
                )));
            }
            Ok(_) => continue,
            Err(e) => return Err(VcError::TransportConnect(e.to_string())),
        }
    }
}

async fn poll_events(
    client_id: String,
    mut eventloop: EventLoop,
    sink: EventSink,
    connected: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = TransportEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if sink.send(event).is_err() {
                    debug!("{} event receiver dropped, stopping poller", client_id);
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                // only report if nobody asked for the disconnect
                if connected.swap(false, Ordering::SeqCst) {
                    warn!("{} lost MQTT connection: {}", client_id, e);
                    let _ = sink.send(TransportEvent::Disconnected {
                        unsolicited: true,
                        reason: e.to_string(),
                    });
                }
                break;
            }
        }
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, events: EventSink) -> VcResult<()> {
        *self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(events);
        self.open().await
    }

    async fn disconnect(&self) -> VcResult<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = connection.client.disconnect().await {
            debug!("{} disconnect request failed: {}", self.client_id, e);
        }
        let mut poller = connection.poller;
        if tokio::time::timeout(POLLER_SHUTDOWN_TIMEOUT, &mut poller)
            .await
            .is_err()
        {
            poller.abort();
        }

        if was_connected {
            if let Ok(sink) = self.stored_sink() {
                let _ = sink.send(TransportEvent::Disconnected {
                    unsolicited: false,
                    reason: "client disconnect".to_string(),
                });
            }
        }
        info!("{} disconnected from MQTT broker", self.client_id);
        Ok(())
    }

    async fn reconnect(&self) -> VcResult<()> {
        self.open().await
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> VcResult<()> {
        let client = self.current_client().await?;
        client
            .publish(topic, to_mqtt_qos(qos), false, payload.to_vec())
            .await
            .map_err(|e| VcError::Transport(format!("publish to {topic} failed: {e}")))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> VcResult<()> {
        let client = self.current_client().await?;
        client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| VcError::Transport(format!("subscribe to {topic} failed: {e}")))
    }

    async fn unsubscribe(&self, topic: &str) -> VcResult<()> {
        let client = self.current_client().await?;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| VcError::Transport(format!("unsubscribe from {topic} failed: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_mqtt_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let transport = MqttTransport::new("veh1", TransportOptions::default());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("vc/x", b"{}", QoS::AtMostOnce).await,
            Err(VcError::NotConnected)
        ));
        assert!(matches!(
            transport.subscribe("vc/x", QoS::AtMostOnce).await,
            Err(VcError::NotConnected)
        ));
        // nothing to tear down yet
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_without_connect_fails() {
        let transport = MqttTransport::new("veh1", TransportOptions::default());
        assert!(matches!(
            transport.reconnect().await,
            Err(VcError::Internal(_))
        ));
    }

    #[test]
    fn test_persistent_session_disables_clean_session() {
        let transport = MqttTransport::new("veh1", TransportOptions::default());
        assert!(!transport.mqtt_options().clean_session());
    }
}
