use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use vcloud_core::{
    topics, AssignedJob, DispatchError, EventStream, JobResult, QoS, ServiceLifecycle, Transport,
    TransportEvent,
};
use vcloud_infrastructure::{InMemoryBroker, InMemoryTransport};
use vcloud_node::{JobHandler, VehicleNode};

struct Observer {
    transport: InMemoryTransport,
    events: EventStream,
}

impl Observer {
    async fn connect(broker: &InMemoryBroker, filters: &[&str]) -> Self {
        let transport = InMemoryTransport::new(broker.clone(), "observer");
        let (tx, mut events) = mpsc::unbounded_channel();
        transport.connect(tx).await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        for filter in filters {
            transport.subscribe(filter, QoS::AtMostOnce).await.unwrap();
        }
        Self { transport, events }
    }

    async fn assign(&self, vehicle_id: &str, job: Value) {
        let payload = serde_json::to_vec(&job).unwrap();
        self.transport
            .publish(&topics::job_assign(vehicle_id), &payload, QoS::AtMostOnce)
            .await
            .unwrap();
    }

    /// Everything received until the channel has been quiet for `quiet`.
    async fn drain(&mut self, quiet: Duration) -> Vec<(String, Value)> {
        let mut received = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(quiet, self.events.recv()).await {
            if let TransportEvent::Message { topic, payload } = event {
                received.push((topic, serde_json::from_slice(&payload).unwrap()));
            }
        }
        received
    }
}

async fn started_vehicle(broker: &InMemoryBroker, id: &str) -> VehicleNode {
    let transport = Arc::new(InMemoryTransport::new(broker.clone(), id));
    let vehicle = VehicleNode::builder(id, transport)
        .settle_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    vehicle.start().await.unwrap();
    vehicle
}

#[tokio::test]
async fn test_vehicle_registers_once_on_start() {
    let broker = InMemoryBroker::new();
    let mut observer = Observer::connect(&broker, &[topics::VEHICLE_REGISTER_FILTER]).await;

    let vehicle = started_vehicle(&broker, "veh1").await;
    let received = observer.drain(Duration::from_millis(100)).await;

    assert_eq!(
        received,
        vec![(
            "vc/vehicle/veh1/register/request".to_string(),
            json!({"vehicle_id": "veh1", "model": "generic", "make": "generic", "year": 2000})
        )]
    );
    vehicle.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_assignment_yields_one_result() {
    let broker = InMemoryBroker::new();
    let vehicle = started_vehicle(&broker, "veh1").await;
    let mut observer = Observer::connect(&broker, &["vc/client/+/job/result"]).await;

    let job = json!({"job_id": "j1", "client_id": "c1", "function": "add", "args": [2, 3]});
    observer.assign("veh1", job.clone()).await;
    observer.assign("veh1", job).await;

    let received = observer.drain(Duration::from_millis(200)).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "vc/client/c1/job/result");
    assert_eq!(
        received[0].1,
        json!({"job_id": "j1", "vehicle_id": "veh1", "result": 5})
    );
    assert_eq!(vehicle.dedup().len().await, 1);
    vehicle.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_job_id_is_not_executed() {
    let broker = InMemoryBroker::new();
    let vehicle = started_vehicle(&broker, "veh1").await;
    let mut observer = Observer::connect(&broker, &["vc/client/+/job/result"]).await;

    observer
        .assign("veh1", json!({"client_id": "c1", "function": "add", "args": [1, 1]}))
        .await;

    assert!(observer.drain(Duration::from_millis(200)).await.is_empty());
    assert!(vehicle.dedup().is_empty().await);
    vehicle.stop().await.unwrap();
}

#[tokio::test]
async fn test_wrongly_typed_fields_still_produce_error_results() {
    let broker = InMemoryBroker::new();
    let vehicle = started_vehicle(&broker, "veh1").await;
    let mut observer = Observer::connect(&broker, &["vc/client/+/job/result"]).await;

    observer
        .assign("veh1", json!({"job_id": "j1", "client_id": "c1", "function": "add", "args": 5}))
        .await;
    observer
        .assign("veh1", json!({"job_id": "j2", "client_id": "c1", "function": 7, "args": []}))
        .await;

    let mut received = observer.drain(Duration::from_millis(200)).await;
    received.sort_by(|a, b| a.1["job_id"].as_str().cmp(&b.1["job_id"].as_str()));
    assert_eq!(received.len(), 2);
    for ((topic, result), job_id) in received.iter().zip(["j1", "j2"]) {
        assert_eq!(topic, "vc/client/c1/job/result");
        assert_eq!(result["job_id"], job_id);
        assert_eq!(result["vehicle_id"], "veh1");
        assert!(result.get("result").is_none());
        let error = result["error"].as_str().unwrap();
        assert!(error.starts_with("Error executing job: "), "{error}");
    }
    assert!(received[0].1["error"]
        .as_str()
        .unwrap()
        .contains("expected an argument list"));
    assert_eq!(vehicle.dedup().len().await, 2);
    vehicle.stop().await.unwrap();
}

struct CountingHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, _job: &AssignedJob) -> Result<Value, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!("done"))
    }
}

#[tokio::test]
async fn test_missing_client_id_executes_without_publishing() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(CountingHandler {
        calls: AtomicUsize::new(0),
    });
    let transport = Arc::new(InMemoryTransport::new(broker.clone(), "veh1"));
    let vehicle = VehicleNode::builder("veh1", transport)
        .settle_interval(Duration::from_millis(10))
        .job_handler(handler.clone())
        .build()
        .unwrap();
    vehicle.start().await.unwrap();
    let mut observer = Observer::connect(&broker, &["vc/client/#"]).await;

    observer
        .assign("veh1", json!({"job_id": "j9", "function": "anything"}))
        .await;

    assert!(observer.drain(Duration::from_millis(200)).await.is_empty());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    vehicle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_function_reports_error() {
    let broker = InMemoryBroker::new();
    let vehicle = started_vehicle(&broker, "veh1").await;
    let mut observer = Observer::connect(&broker, &["vc/client/c1/job/result"]).await;

    observer
        .assign(
            "veh1",
            json!({"job_id": "j2", "client_id": "c1", "function": "warp_drive", "args": []}),
        )
        .await;

    let received = observer.drain(Duration::from_millis(200)).await;
    assert_eq!(received.len(), 1);
    let result: JobResult = serde_json::from_value(received[0].1.clone()).unwrap();
    assert_eq!(result.job_id, "j2");
    assert!(!result.is_success());
    assert_eq!(
        result.error(),
        Some("Error executing job: unknown function 'warp_drive'")
    );
    vehicle.stop().await.unwrap();
}

struct PanickingHandler;

#[async_trait]
impl JobHandler for PanickingHandler {
    async fn handle(&self, _job: &AssignedJob) -> Result<Value, DispatchError> {
        panic!("engine on fire")
    }
}

#[tokio::test]
async fn test_panicking_handler_is_captured() {
    let broker = InMemoryBroker::new();
    let transport = Arc::new(InMemoryTransport::new(broker.clone(), "veh1"));
    let vehicle = VehicleNode::builder("veh1", transport)
        .settle_interval(Duration::from_millis(10))
        .job_handler(Arc::new(PanickingHandler))
        .build()
        .unwrap();
    vehicle.start().await.unwrap();
    let mut observer = Observer::connect(&broker, &["vc/client/c1/job/result"]).await;

    observer
        .assign("veh1", json!({"job_id": "j3", "client_id": "c1", "function": "x"}))
        .await;

    let received = observer.drain(Duration::from_millis(200)).await;
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].1["error"],
        json!("Error executing job: function panicked: engine on fire")
    );
    vehicle.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_then_stop_disconnects() {
    let broker = InMemoryBroker::new();
    let vehicle = started_vehicle(&broker, "veh1").await;
    assert!(vehicle.is_connected());
    assert_eq!(broker.connected_clients(), vec!["veh1".to_string()]);

    vehicle.stop().await.unwrap();
    assert!(!vehicle.is_connected());
    assert!(broker.connected_clients().is_empty());

    // a restarted vehicle keeps its processed ids
    vehicle.start().await.unwrap();
    assert!(vehicle.is_connected());
    vehicle.stop().await.unwrap();
}
