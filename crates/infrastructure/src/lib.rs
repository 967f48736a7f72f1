pub mod in_memory_broker;
pub mod mqtt_transport;

pub use in_memory_broker::{InMemoryBroker, InMemoryTransport};
pub use mqtt_transport::MqttTransport;
