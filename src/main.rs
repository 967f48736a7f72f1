use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vcloud_core::AppConfig;

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

fn cli() -> Command {
    let fault_dir = Arg::new("fault-dir")
        .long("fault-dir")
        .value_name("DIR")
        .help("启用故障注入，并将状态日志写入该目录")
        .value_parser(clap::value_parser!(PathBuf));

    Command::new("vcloud")
        .version("1.0.0")
        .about("车载云任务分发中间件与可靠性故障注入工具")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（TOML），环境变量优先")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty")
                .global(true),
        )
        .subcommand(
            Command::new("broker")
                .about("运行中间件路由（MQTT）")
                .arg(fault_dir.clone()),
        )
        .subcommand(
            Command::new("vehicles")
                .about("运行 NV 个车辆节点（MQTT）")
                .arg(fault_dir),
        )
        .subcommand(
            Command::new("client")
                .about("提交一个任务并打印结果")
                .arg(
                    Arg::new("client-id")
                        .long("client-id")
                        .value_name("ID")
                        .default_value("c1"),
                )
                .arg(
                    Arg::new("function")
                        .short('f')
                        .long("function")
                        .value_name("NAME")
                        .required(true),
                )
                .arg(
                    Arg::new("arg")
                        .short('a')
                        .long("arg")
                        .value_name("JSON")
                        .help("任务参数，按 JSON 解析，失败时作为字符串")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("wait-seconds")
                        .long("wait-seconds")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("进程内仿真：内存中间件、路由与车辆，全部注入故障")
                .arg(
                    Arg::new("out-dir")
                        .short('o')
                        .long("out-dir")
                        .value_name("DIR")
                        .value_parser(clap::value_parser!(PathBuf))
                        .default_value("status_logs"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config");
    let log_level = string_arg(&matches, "log-level")?;
    let log_format = string_arg(&matches, "log-format")?;

    init_logging(&log_level, &log_format)?;

    info!("启动车载云中间件");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {config_path:?}"))?;

    let app_mode = parse_app_mode(&matches)?;
    let app = Application::new(config, app_mode);

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(async move { app.run(shutdown_rx).await });

    tokio::select! {
        result = &mut app_handle => {
            return match result {
                Ok(Ok(())) => {
                    info!("运行完成");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!("应用运行失败: {e:#}");
                    Err(e)
                }
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("应用任务异常退出: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("车载云中间件已退出");
    Ok(())
}

fn string_arg(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("缺少参数: --{name}"))
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 解析子命令为运行模式
fn parse_app_mode(matches: &ArgMatches) -> Result<AppMode> {
    match matches.subcommand() {
        Some(("broker", sub)) => Ok(AppMode::Broker {
            fault_dir: sub.get_one::<PathBuf>("fault-dir").cloned(),
        }),
        Some(("vehicles", sub)) => Ok(AppMode::Vehicles {
            fault_dir: sub.get_one::<PathBuf>("fault-dir").cloned(),
        }),
        Some(("client", sub)) => {
            let args = sub
                .get_many::<String>("arg")
                .map(|values| values.map(|raw| parse_job_arg(raw)).collect())
                .unwrap_or_default();
            Ok(AppMode::Client {
                client_id: string_arg(sub, "client-id")?,
                function: string_arg(sub, "function")?,
                args,
                wait: Duration::from_secs(
                    sub.get_one::<u64>("wait-seconds").copied().unwrap_or(10),
                ),
            })
        }
        Some(("simulate", sub)) => Ok(AppMode::Simulate {
            out_dir: sub
                .get_one::<PathBuf>("out-dir")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("status_logs")),
        }),
        Some((other, _)) => Err(anyhow::anyhow!("不支持的运行模式: {other}")),
        None => Err(anyhow::anyhow!("缺少子命令")),
    }
}

/// `5` and `[1,2]` parse as JSON; anything else becomes a string.
fn parse_job_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_client_mode_parses_json_args() {
        let matches = cli().get_matches_from([
            "vcloud", "client", "--client-id", "c7", "-f", "add", "-a", "2", "-a", "3",
        ]);
        match parse_app_mode(&matches).unwrap() {
            AppMode::Client {
                client_id,
                function,
                args,
                wait,
            } => {
                assert_eq!(client_id, "c7");
                assert_eq!(function, "add");
                assert_eq!(args, vec![Value::from(2), Value::from(3)]);
                assert_eq!(wait, Duration::from_secs(10));
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_non_json_arg_becomes_string() {
        assert_eq!(parse_job_arg("hello"), Value::String("hello".to_string()));
        assert_eq!(parse_job_arg("[1,2]"), serde_json::json!([1, 2]));
    }

    #[test]
    fn test_simulate_defaults_and_global_flags() {
        let matches = cli().get_matches_from(["vcloud", "simulate", "--log-format", "json"]);
        assert_eq!(string_arg(&matches, "log-format").unwrap(), "json");
        match parse_app_mode(&matches).unwrap() {
            AppMode::Simulate { out_dir } => assert_eq!(out_dir, PathBuf::from("status_logs")),
            other => panic!("unexpected mode {other:?}"),
        }
    }
}
