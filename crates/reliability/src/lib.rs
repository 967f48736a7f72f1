//! 可靠性故障注入
//!
//! Tick-driven failure/repair simulation for vehicles and the broker,
//! recording one availability sample per tick.

pub mod config;
pub mod hazard;
pub mod injector;
pub mod machine;
pub mod status_log;

pub use config::{BrokerFaultParams, FaultConfig, VehicleFaultParams};
pub use hazard::{ExponentialSampler, HazardSampler};
pub use injector::{FaultInjector, RunSummary};
pub use machine::{
    BrokerFaultModel, EntityState, FaultModel, HazardKind, ReliabilityMachine, Transition,
    VehicleFaultModel,
};
pub use status_log::StatusLog;
