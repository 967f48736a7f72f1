use std::fmt;

use crate::config::{BrokerFaultParams, VehicleFaultParams};
use crate::hazard::HazardSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    Up,
    Failed,
    UnderRepair,
    /// vehicles only
    RentedOut,
}

impl EntityState {
    pub fn is_up(self) -> bool {
        self == EntityState::Up
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityState::Up => "up",
            EntityState::Failed => "failed",
            EntityState::UnderRepair => "under_repair",
            EntityState::RentedOut => "rented_out",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HazardKind {
    Failure,
    Repair,
    Rental,
    RentalReturn,
}

/// Which hazards an entity is exposed to in each state and where they lead.
pub trait FaultModel: Send {
    /// `vehicle` or `broker`
    fn entity_kind(&self) -> &'static str;

    /// Hazards armed on entry to `state`, each with its mean in seconds.
    fn hazards(&self, state: EntityState) -> Vec<(HazardKind, f64)>;

    fn next_state(&self, state: EntityState, hazard: HazardKind) -> EntityState;
}

/// Up → UnderRepair on breakdown, Up → RentedOut on rental; both return to Up.
#[derive(Debug, Clone, Copy)]
pub struct VehicleFaultModel {
    pub params: VehicleFaultParams,
}

impl FaultModel for VehicleFaultModel {
    fn entity_kind(&self) -> &'static str {
        "vehicle"
    }

    fn hazards(&self, state: EntityState) -> Vec<(HazardKind, f64)> {
        match state {
            EntityState::Up => vec![
                (HazardKind::Failure, self.params.mean_time_to_failure),
                (HazardKind::Rental, self.params.mean_time_to_rental),
            ],
            EntityState::UnderRepair => vec![(HazardKind::Repair, self.params.mean_repair_time)],
            EntityState::RentedOut => {
                vec![(HazardKind::RentalReturn, self.params.mean_rental_duration)]
            }
            EntityState::Failed => Vec::new(),
        }
    }

    fn next_state(&self, _state: EntityState, hazard: HazardKind) -> EntityState {
        match hazard {
            HazardKind::Failure => EntityState::UnderRepair,
            HazardKind::Rental => EntityState::RentedOut,
            HazardKind::Repair | HazardKind::RentalReturn => EntityState::Up,
        }
    }
}

/// Up ↔ Failed.
#[derive(Debug, Clone, Copy)]
pub struct BrokerFaultModel {
    pub params: BrokerFaultParams,
}

impl FaultModel for BrokerFaultModel {
    fn entity_kind(&self) -> &'static str {
        "broker"
    }

    fn hazards(&self, state: EntityState) -> Vec<(HazardKind, f64)> {
        match state {
            EntityState::Up => vec![(HazardKind::Failure, self.params.mean_time_to_failure)],
            EntityState::Failed => vec![(HazardKind::Repair, self.params.mean_repair_time)],
            EntityState::UnderRepair | EntityState::RentedOut => Vec::new(),
        }
    }

    fn next_state(&self, state: EntityState, hazard: HazardKind) -> EntityState {
        match hazard {
            HazardKind::Failure => EntityState::Failed,
            HazardKind::Repair | HazardKind::RentalReturn => EntityState::Up,
            HazardKind::Rental => state,
        }
    }
}

/// A state change applied by [`ReliabilityMachine::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub tick: u64,
    pub from: EntityState,
    pub to: EntityState,
    pub hazard: HazardKind,
    /// the sampled instant that fired
    pub due_at: f64,
}

impl Transition {
    pub fn leaves_up(&self) -> bool {
        self.from.is_up() && !self.to.is_up()
    }

    pub fn enters_up(&self) -> bool {
        !self.from.is_up() && self.to.is_up()
    }
}

/// 可靠性状态机
///
/// Every entry into a state draws that state's hazards afresh, as absolute
/// instants on the tick clock. On each tick the earliest due instant wins;
/// every other armed hazard is discarded with the old state.
pub struct ReliabilityMachine<M, S> {
    model: M,
    sampler: S,
    state: EntityState,
    elapsed: u64,
    armed: Vec<(HazardKind, f64)>,
}

impl<M: FaultModel, S: HazardSampler> ReliabilityMachine<M, S> {
    pub fn new(model: M, sampler: S) -> Self {
        let mut machine = Self {
            model,
            sampler,
            state: EntityState::Up,
            elapsed: 0,
            armed: Vec::new(),
        };
        machine.arm();
        machine
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Pending `(hazard, instant)` pairs.
    pub fn armed(&self) -> &[(HazardKind, f64)] {
        &self.armed
    }

    fn arm(&mut self) {
        let now = self.elapsed as f64;
        self.armed = self
            .model
            .hazards(self.state)
            .into_iter()
            .map(|(kind, mean)| (kind, now + self.sampler.sample(mean)))
            .collect();
    }

    /// Advances the clock by one tick and applies at most one transition.
    pub fn tick(&mut self) -> Option<Transition> {
        self.elapsed += 1;
        let now = self.elapsed as f64;

        // on exact ties the first-armed hazard wins
        let (hazard, due_at) = self
            .armed
            .iter()
            .copied()
            .filter(|(_, instant)| *instant <= now)
            .fold(None, |best: Option<(HazardKind, f64)>, candidate| match best {
                Some(current) if current.1 <= candidate.1 => Some(current),
                _ => Some(candidate),
            })?;

        let from = self.state;
        self.state = self.model.next_state(from, hazard);
        self.arm();
        Some(Transition {
            tick: self.elapsed,
            from,
            to: self.state,
            hazard,
            due_at,
        })
    }

    /// Puts the entity back to Up with fresh hazards, keeping the clock.
    pub fn force_up(&mut self) {
        self.state = EntityState::Up;
        self.arm();
    }
}
