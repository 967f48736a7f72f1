pub mod catalog;
pub mod client;
pub mod correlation;
pub mod dedup;
pub mod handler;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod vehicle;

pub use client::{ClientNode, ClientRole};
pub use correlation::{ChannelResultHandler, ResultCorrelator, ResultHandler};
pub use dedup::DedupSet;
pub use handler::{JobHandler, RegistryDispatcher};
pub use pipeline::JobExecutionPipeline;
pub use registry::{FunctionRegistry, FunctionRegistryBuilder, JobFunction};
pub use session::{NodeSession, SessionContext, SessionOptions, SessionRole};
pub use vehicle::{VehicleNode, VehicleNodeBuilder, VehicleRole};
