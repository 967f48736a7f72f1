//! 配置管理
//!
//! 默认值 → 可选 TOML 文件 → 环境变量，依次覆盖。

pub mod app_config;

pub use app_config::AppConfig;
