//! # 数据模型
//!
//! 车载云中间件在发布/订阅主题上交换的核心数据结构。
//!
//! - [`Job`] / [`JobSubmission`]: 客户端提交的任务
//! - [`AssignedJob`]: 车辆端收到的、字段可能缺失的任务视图
//! - [`JobResult`]: 通过 `job_id` 与任务关联的执行结果
//! - [`NodeIdentity`] / [`VehicleRegistration`]: 节点身份与注册消息

pub mod job;
pub mod node;

pub use job::{AssignedJob, Job, JobOutcome, JobResult, JobSubmission};
pub use node::{NodeIdentity, NodeRole, VehicleAttributes, VehicleRegistration};
