pub mod config;
pub mod errors;
pub mod models;
pub mod topics;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    AssignedJob, Job, JobOutcome, JobResult, JobSubmission, NodeIdentity, NodeRole,
    VehicleAttributes, VehicleRegistration,
};
pub use traits::{
    EventSink, EventStream, QoS, ServiceLifecycle, Transport, TransportEvent, TransportOptions,
};
