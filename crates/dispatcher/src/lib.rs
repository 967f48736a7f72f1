//! Broker-side composition: the topic router and the engine it feeds.

pub mod engine;
pub mod round_robin;
pub mod router;

pub use engine::{Engine, JobAssigner};
pub use round_robin::{EngineStats, RoundRobinEngine};
pub use router::{BrokerRole, BrokerRouter};
