use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vcloud_core::{ServiceLifecycle, VcResult};

use crate::hazard::HazardSampler;
use crate::machine::{FaultModel, ReliabilityMachine, Transition};
use crate::status_log::StatusLog;

/// Outcome of one injector run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub up_ticks: u64,
    pub transitions: u64,
    pub interrupted: bool,
}

impl RunSummary {
    /// Fraction of ticks the service reported connected.
    pub fn availability(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.up_ticks as f64 / self.ticks as f64
    }
}

/// 故障注入器
///
/// Drives one service through its [`ReliabilityMachine`]: once per tick it
/// advances the machine, stops the service when it leaves Up, starts it when
/// it comes back, and logs whether the service is connected.
pub struct FaultInjector<M, S> {
    service: Arc<dyn ServiceLifecycle>,
    machine: ReliabilityMachine<M, S>,
    runtime_ticks: u64,
    tick_interval: Duration,
}

impl<M: FaultModel, S: HazardSampler> FaultInjector<M, S> {
    pub fn new(
        service: Arc<dyn ServiceLifecycle>,
        machine: ReliabilityMachine<M, S>,
        runtime_ticks: u64,
    ) -> Self {
        Self {
            service,
            machine,
            runtime_ticks,
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn machine(&self) -> &ReliabilityMachine<M, S> {
        &self.machine
    }

    fn label(&self) -> String {
        format!("{} {}", self.machine.model().entity_kind(), self.service.id())
    }

    /// Runs until the tick budget is spent or `shutdown` fires. The log
    /// receives exactly one line per executed tick and is flushed on exit.
    pub async fn run<W: Write>(
        &mut self,
        log: &mut StatusLog<W>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> VcResult<RunSummary> {
        let label = self.label();
        info!(
            "[{}] Starting fault injection for {} ticks",
            label, self.runtime_ticks
        );

        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = RunSummary::default();

        while summary.ticks < self.runtime_ticks {
            tokio::select! {
                _ = shutdown.recv() => {
                    summary.interrupted = true;
                    break;
                }
                _ = ticker.tick() => {}
            }

            if let Some(transition) = self.machine.tick() {
                summary.transitions += 1;
                // a start can block on connect and settle; shutdown must not wait for it
                tokio::select! {
                    _ = shutdown.recv() => {
                        summary.interrupted = true;
                        break;
                    }
                    _ = self.apply(&label, &transition) => {}
                }
            }

            let up = self.service.is_connected();
            if let Err(e) = log.append(up) {
                error!("[{}] Failed to write status sample: {}", label, e);
            }
            summary.ticks += 1;
            if up {
                summary.up_ticks += 1;
            }
        }

        if summary.interrupted {
            info!("[{}] Interrupted after {} ticks", label, summary.ticks);
            if let Err(e) = self.service.stop().await {
                warn!("[{}] Failed to stop service: {}", label, e);
            }
            self.machine.force_up();
        }

        if let Err(e) = log.flush() {
            error!("[{}] Failed to flush status log: {}", label, e);
        }
        info!(
            "[{}] Fault injection finished: ticks={}, transitions={}, availability={:.4}",
            label,
            summary.ticks,
            summary.transitions,
            summary.availability()
        );
        Ok(summary)
    }

    async fn apply(&self, label: &str, transition: &Transition) {
        info!(
            "[{}] {} -> {} ({:?}) at tick {}",
            label, transition.from, transition.to, transition.hazard, transition.tick
        );
        counter!(
            "vcloud_fault_transitions_total",
            "entity" => self.machine.model().entity_kind(),
            "to" => transition.to.label()
        )
        .increment(1);

        if transition.leaves_up() {
            if let Err(e) = self.service.stop().await {
                warn!("[{}] Failed to stop service: {}", label, e);
            }
        } else if transition.enters_up() {
            if let Err(e) = self.service.start().await {
                warn!("[{}] Failed to start service: {}", label, e);
            }
        } else {
            debug!("[{}] Transition keeps the service state", label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerFaultParams;
    use crate::hazard::ScriptedSampler;
    use crate::machine::{BrokerFaultModel, EntityState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeService {
        start_delay: Duration,
        up: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ServiceLifecycle for FakeService {
        fn id(&self) -> &str {
            "fake"
        }

        async fn start(&self) -> VcResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if !self.start_delay.is_zero() {
                tokio::time::sleep(self.start_delay).await;
            }
            self.up.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> VcResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.up.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }
    }

    fn broker_machine(durations: &[f64]) -> ReliabilityMachine<BrokerFaultModel, ScriptedSampler> {
        ReliabilityMachine::new(
            BrokerFaultModel {
                params: BrokerFaultParams {
                    mean_time_to_failure: 10.0,
                    mean_repair_time: 2.0,
                },
            },
            ScriptedSampler::new(durations),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_is_logged_and_service_restarted() {
        let service = Arc::new(FakeService::default());
        service.start().await.unwrap();
        // fail during tick 3, repaired during tick 5
        let mut injector = FaultInjector::new(service.clone(), broker_machine(&[2.5, 1.5]), 8);
        let mut log = StatusLog::new(Vec::new());
        let (_tx, rx) = broadcast::channel(1);

        let summary = injector.run(&mut log, rx).await.unwrap();

        assert_eq!(summary.ticks, 8);
        assert_eq!(summary.transitions, 2);
        assert!(!summary.interrupted);
        assert_eq!(log.into_inner(), b"1\n1\n0\n0\n1\n1\n1\n1\n");
        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
        assert_eq!(service.starts.load(Ordering::SeqCst), 2);
        assert_eq!(summary.up_ticks, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_service_and_forces_up() {
        let service = Arc::new(FakeService::default());
        service.start().await.unwrap();
        let mut injector = FaultInjector::new(service.clone(), broker_machine(&[0.5]), 3600);
        let mut log = StatusLog::new(Vec::new());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let summary = injector.run(&mut log, rx).await.unwrap();
            (summary, log, injector.machine().state())
        });
        tokio::time::sleep(Duration::from_millis(4500)).await;
        tx.send(()).unwrap();

        let (summary, log, state) = handle.await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.ticks, 4);
        assert_eq!(log.lines(), 4);
        assert_eq!(state, EntityState::Up);
        assert!(!service.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_does_not_wait_for_a_slow_start() {
        let service = Arc::new(FakeService {
            start_delay: Duration::from_secs(60),
            ..FakeService::default()
        });
        service.up.store(true, Ordering::SeqCst);
        // down at tick 1, repair begins a 60 s start at tick 2
        let mut injector = FaultInjector::new(service.clone(), broker_machine(&[0.5, 0.5]), 3600);
        let mut log = StatusLog::new(Vec::new());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let summary = injector.run(&mut log, rx).await.unwrap();
            (summary, log, injector.machine().state())
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(()).unwrap();

        let (summary, log, state) = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("injector kept waiting on start")
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.ticks, 1);
        assert_eq!(log.into_inner(), b"0\n");
        assert_eq!(state, EntityState::Up);
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
        assert!(!service.is_connected());
    }
}
