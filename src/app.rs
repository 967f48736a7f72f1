use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use vcloud_core::{AppConfig, JobSubmission, ServiceLifecycle, Transport, VcResult};
use vcloud_dispatcher::{BrokerRouter, RoundRobinEngine};
use vcloud_infrastructure::{InMemoryBroker, InMemoryTransport, MqttTransport};
use vcloud_node::{ChannelResultHandler, ClientNode, FunctionRegistry, VehicleNode};
use vcloud_reliability::{
    BrokerFaultModel, ExponentialSampler, FaultConfig, FaultInjector, FaultModel,
    ReliabilityMachine, RunSummary, StatusLog, VehicleFaultModel,
};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 运行中间件路由（可选故障注入）
    Broker { fault_dir: Option<PathBuf> },
    /// 运行 NV 个车辆节点（可选故障注入）
    Vehicles { fault_dir: Option<PathBuf> },
    /// 提交单个任务并等待结果
    Client {
        client_id: String,
        function: String,
        args: Vec<Value>,
        wait: Duration,
    },
    /// 进程内完整仿真
    Simulate { out_dir: PathBuf },
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    fault: FaultConfig,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        let fault = FaultConfig::from(&config);
        Self {
            config,
            mode,
            fault,
        }
    }

    /// 运行应用程序
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match &self.mode {
            AppMode::Broker { fault_dir } => {
                self.run_broker(fault_dir.as_deref(), shutdown_rx).await
            }
            AppMode::Vehicles { fault_dir } => {
                self.run_vehicles(fault_dir.as_deref(), shutdown_rx).await
            }
            AppMode::Client {
                client_id,
                function,
                args,
                wait,
            } => {
                self.run_client(client_id, function, args.clone(), *wait, shutdown_rx)
                    .await
            }
            AppMode::Simulate { out_dir } => self.run_simulation(out_dir, shutdown_rx).await,
        }
    }

    fn mqtt_transport(&self, client_id: &str) -> Arc<dyn Transport> {
        Arc::new(MqttTransport::new(client_id, self.config.transport_options()))
    }

    /// Built-in catalog shared by every vehicle, checked against
    /// `required_functions` before any vehicle starts.
    fn function_registry(&self) -> Result<Arc<FunctionRegistry>> {
        let registry = FunctionRegistry::builtin();
        registry
            .ensure_supported(self.config.required_functions.iter().map(String::as_str))
            .context("车辆函数注册表校验失败")?;
        Ok(Arc::new(registry))
    }

    fn vehicle_ids(&self) -> impl Iterator<Item = String> {
        (1..=self.config.nv).map(|i| format!("veh{i}"))
    }

    /// 运行中间件路由
    async fn run_broker(
        &self,
        fault_dir: Option<&Path>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let router: Arc<dyn ServiceLifecycle> = Arc::new(BrokerRouter::new(
            "broker",
            self.mqtt_transport("broker"),
            Arc::new(RoundRobinEngine::new()),
        ));
        router.start().await.context("启动中间件路由失败")?;

        match fault_dir {
            Some(dir) => {
                let model = BrokerFaultModel {
                    params: self.fault.broker,
                };
                let summary = run_injector(
                    router.clone(),
                    model,
                    self.fault.entity_seed(0),
                    &self.fault,
                    dir,
                    shutdown_rx,
                )
                .await?;
                report("broker", &summary);
            }
            None => {
                let _ = shutdown_rx.recv().await;
            }
        }

        router.stop().await.context("停止中间件路由失败")?;
        info!("中间件路由已停止");
        Ok(())
    }

    /// 运行车辆节点
    async fn run_vehicles(
        &self,
        fault_dir: Option<&Path>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let registry = self.function_registry()?;
        let mut vehicles: Vec<Arc<dyn ServiceLifecycle>> = Vec::with_capacity(self.config.nv);
        for vehicle_id in self.vehicle_ids() {
            let transport = self.mqtt_transport(&vehicle_id);
            let vehicle = VehicleNode::builder(vehicle_id.as_str(), transport)
                .registry(Arc::clone(&registry))
                .build()
                .with_context(|| format!("创建车辆节点失败: {vehicle_id}"))?;
            vehicles.push(Arc::new(vehicle));
        }
        start_all(&vehicles).await?;
        info!("已启动 {} 个车辆节点", vehicles.len());

        match fault_dir {
            Some(dir) => {
                let summaries = self
                    .inject_vehicles(&vehicles, 1, dir, &shutdown_rx)
                    .await?;
                for (id, summary) in &summaries {
                    report(id, summary);
                }
            }
            None => {
                let _ = shutdown_rx.recv().await;
            }
        }

        stop_all(&vehicles).await;
        Ok(())
    }

    /// Runs one injector per vehicle concurrently. Seeds start at
    /// `first_seed_index` so that they do not collide with other entities.
    async fn inject_vehicles(
        &self,
        vehicles: &[Arc<dyn ServiceLifecycle>],
        first_seed_index: u64,
        dir: &Path,
        shutdown_rx: &broadcast::Receiver<()>,
    ) -> Result<Vec<(String, RunSummary)>> {
        let mut tasks = JoinSet::new();
        for (index, vehicle) in vehicles.iter().enumerate() {
            let model = VehicleFaultModel {
                params: self.fault.vehicle,
            };
            let seed = self.fault.entity_seed(first_seed_index + index as u64);
            let fault = self.fault.clone();
            let dir = dir.to_path_buf();
            let vehicle = Arc::clone(vehicle);
            let shutdown_rx = shutdown_rx.resubscribe();
            tasks.spawn(async move {
                let id = vehicle.id().to_string();
                run_injector(vehicle, model, seed, &fault, &dir, shutdown_rx)
                    .await
                    .map(|summary| (id, summary))
            });
        }
        collect(tasks).await
    }

    /// 提交任务并等待结果
    async fn run_client(
        &self,
        client_id: &str,
        function: &str,
        args: Vec<Value>,
        wait: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let (handler, mut results) = ChannelResultHandler::channel();
        let client = ClientNode::with_result_handler(
            client_id,
            self.mqtt_transport(client_id),
            Arc::new(handler),
        );
        client.start().await.context("启动客户端失败")?;

        let job_id = client
            .submit_job(JobSubmission::new(function, args))
            .await
            .context("提交任务失败")?;
        info!("任务已提交: {job_id}");

        let deadline = tokio::time::sleep(wait);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("等待任务结果超时: {job_id}");
                    break;
                }
                _ = shutdown_rx.recv() => break,
                Some(result) = results.recv() => {
                    println!("{}", serde_json::to_string(&result)?);
                    if result.job_id == job_id {
                        break;
                    }
                }
            }
        }

        client.stop().await.context("停止客户端失败")?;
        Ok(())
    }

    /// 进程内仿真：内存消息中心、中间件路由与 NV 个车辆，全部注入故障。
    async fn run_simulation(
        &self,
        out_dir: &Path,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let registry = self.function_registry()?;
        let hub = InMemoryBroker::new();
        let broker: Arc<dyn ServiceLifecycle> = Arc::new(SimulatedBroker::new(hub.clone()));
        broker.start().await.context("启动仿真中间件失败")?;

        let mut vehicles: Vec<Arc<dyn ServiceLifecycle>> = Vec::with_capacity(self.config.nv);
        for vehicle_id in self.vehicle_ids() {
            let transport = Arc::new(InMemoryTransport::new(hub.clone(), vehicle_id.as_str()));
            let vehicle = VehicleNode::builder(vehicle_id.as_str(), transport)
                .registry(Arc::clone(&registry))
                .build()
                .with_context(|| format!("创建车辆节点失败: {vehicle_id}"))?;
            vehicles.push(Arc::new(vehicle));
        }
        start_all(&vehicles).await?;
        info!(
            "仿真开始: {} 个车辆, {} 个周期, 输出目录 {}",
            vehicles.len(),
            self.fault.runtime_ticks,
            out_dir.display()
        );

        let broker_task = {
            let broker = Arc::clone(&broker);
            let model = BrokerFaultModel {
                params: self.fault.broker,
            };
            let seed = self.fault.entity_seed(0);
            let fault = self.fault.clone();
            let dir = out_dir.to_path_buf();
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                run_injector(broker, model, seed, &fault, &dir, shutdown_rx).await
            })
        };
        let vehicle_summaries = self
            .inject_vehicles(&vehicles, 1, out_dir, &shutdown_rx)
            .await;
        let broker_summary = broker_task.await.context("中间件故障注入任务异常退出")?;

        stop_all(&vehicles).await;
        if let Err(e) = broker.stop().await {
            warn!("停止仿真中间件失败: {e}");
        }

        report("broker", &broker_summary?);
        for (id, summary) in &vehicle_summaries? {
            report(id, summary);
        }
        info!("仿真结束");
        Ok(())
    }
}

/// Opens the entity's status log and drives it until the runtime budget
/// is spent or shutdown is signalled.
async fn run_injector<M: FaultModel>(
    service: Arc<dyn ServiceLifecycle>,
    model: M,
    seed: Option<u64>,
    fault: &FaultConfig,
    dir: &Path,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<RunSummary> {
    let mut log = StatusLog::create(dir, model.entity_kind(), service.id(), Local::now())
        .with_context(|| format!("创建状态日志失败: {}", dir.display()))?;
    let machine = ReliabilityMachine::new(model, ExponentialSampler::from_seed(seed));
    let mut injector = FaultInjector::new(service, machine, fault.runtime_ticks)
        .with_tick_interval(fault.tick_interval);
    Ok(injector.run(&mut log, shutdown_rx).await?)
}

async fn collect(
    mut tasks: JoinSet<Result<(String, RunSummary)>>,
) -> Result<Vec<(String, RunSummary)>> {
    let mut summaries = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        summaries.push(joined.context("故障注入任务异常退出")??);
    }
    summaries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(summaries)
}

/// Vehicles settle before registering, so they are started together.
async fn start_all(services: &[Arc<dyn ServiceLifecycle>]) -> Result<()> {
    try_join_all(services.iter().map(|service| service.start()))
        .await
        .context("启动车辆节点失败")?;
    Ok(())
}

async fn stop_all(services: &[Arc<dyn ServiceLifecycle>]) {
    for service in services {
        if let Err(e) = service.stop().await {
            error!("停止 {} 失败: {e}", service.id());
        }
    }
}

fn report(id: &str, summary: &RunSummary) {
    info!(
        "{id}: ticks={}, transitions={}, availability={:.4}{}",
        summary.ticks,
        summary.transitions,
        summary.availability(),
        if summary.interrupted { " (interrupted)" } else { "" }
    );
}

/// In-process broker: the hub going offline takes every session down with it.
struct SimulatedBroker {
    hub: InMemoryBroker,
    router: BrokerRouter,
}

impl SimulatedBroker {
    fn new(hub: InMemoryBroker) -> Self {
        let transport = Arc::new(InMemoryTransport::new(hub.clone(), "broker"));
        let router = BrokerRouter::new("broker", transport, Arc::new(RoundRobinEngine::new()));
        Self { hub, router }
    }
}

#[async_trait]
impl ServiceLifecycle for SimulatedBroker {
    fn id(&self) -> &str {
        self.router.id()
    }

    async fn start(&self) -> VcResult<()> {
        self.hub.set_online(true);
        self.router.start().await
    }

    async fn stop(&self) -> VcResult<()> {
        let stopped = self.router.stop().await;
        self.hub.set_online(false);
        stopped
    }

    fn is_connected(&self) -> bool {
        self.hub.is_online() && self.router.is_connected()
    }
}
