use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vcloud_core::{Job, JobResult, VcResult, VehicleRegistration};

use crate::engine::{Engine, JobAssigner};

/// Minimal stand-in engine: vehicles in registration order, jobs handed
/// out in turn. Jobs submitted before any vehicle registered are queued.
#[derive(Debug, Default)]
pub struct RoundRobinEngine {
    counter: AtomicUsize,
    state: Mutex<EngineState>,
}

#[derive(Debug, Default)]
struct EngineState {
    vehicles: Vec<VehicleRegistration>,
    pending: VecDeque<Job>,
    /// job_id -> vehicle_id
    in_flight: HashMap<String, String>,
    completed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub vehicles: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
}

impl RoundRobinEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> EngineStats {
        let state = self.state.lock().await;
        EngineStats {
            vehicles: state.vehicles.len(),
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            completed: state.completed,
        }
    }

    fn select_vehicle(&self, vehicles: &[VehicleRegistration]) -> Option<String> {
        if vehicles.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % vehicles.len();
        debug!(
            "Round robin selected vehicle {} ({}/{})",
            vehicles[index].vehicle_id,
            index,
            vehicles.len()
        );
        Some(vehicles[index].vehicle_id.clone())
    }

    async fn dispatch(
        &self,
        state: &mut EngineState,
        job: Job,
        assigner: &JobAssigner,
    ) -> VcResult<()> {
        let Some(vehicle_id) = self.select_vehicle(&state.vehicles) else {
            debug!("No vehicle registered yet, queueing job {}", job.job_id);
            state.pending.push_back(job);
            return Ok(());
        };

        match assigner.assign(&vehicle_id, &job).await {
            Ok(()) => {
                info!("Assigned job {} to vehicle {}", job.job_id, vehicle_id);
                state.in_flight.insert(job.job_id, vehicle_id);
                Ok(())
            }
            Err(e) => {
                warn!("Assigning job {} failed, keeping it queued: {}", job.job_id, e);
                state.pending.push_front(job);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Engine for RoundRobinEngine {
    async fn register(
        &self,
        registration: VehicleRegistration,
        assigner: &JobAssigner,
    ) -> VcResult<()> {
        let mut state = self.state.lock().await;
        match state
            .vehicles
            .iter_mut()
            .find(|v| v.vehicle_id == registration.vehicle_id)
        {
            Some(existing) => *existing = registration,
            None => {
                info!("Vehicle {} registered", registration.vehicle_id);
                state.vehicles.push(registration);
            }
        }

        while let Some(job) = state.pending.pop_front() {
            self.dispatch(&mut state, job, assigner).await?;
        }
        Ok(())
    }

    async fn submit(&self, job: Job, assigner: &JobAssigner) -> VcResult<()> {
        let mut state = self.state.lock().await;
        self.dispatch(&mut state, job, assigner).await
    }

    async fn complete(&self, result: JobResult) -> VcResult<()> {
        let mut state = self.state.lock().await;
        match state.in_flight.remove(&result.job_id) {
            Some(vehicle_id) => debug!("Job {} completed by {}", result.job_id, vehicle_id),
            None => debug!("Result for untracked job {}", result.job_id),
        }
        state.completed += 1;
        Ok(())
    }
}
