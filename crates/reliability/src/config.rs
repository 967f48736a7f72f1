use std::time::Duration;

use vcloud_core::AppConfig;

/// Means in seconds of the vehicle's competing hazards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleFaultParams {
    pub mean_time_to_failure: f64,
    pub mean_repair_time: f64,
    pub mean_time_to_rental: f64,
    pub mean_rental_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrokerFaultParams {
    pub mean_time_to_failure: f64,
    pub mean_repair_time: f64,
}

/// Immutable simulator parameters, resolved once from [`AppConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    pub vehicle: VehicleFaultParams,
    pub broker: BrokerFaultParams,
    /// number of ticks to run
    pub runtime_ticks: u64,
    pub tick_interval: Duration,
    pub seed: Option<u64>,
}

impl FaultConfig {
    /// Seed for the `index`-th entity of a run, so that entities draw
    /// independent but reproducible streams.
    pub fn entity_seed(&self, index: u64) -> Option<u64> {
        self.seed
            .map(|seed| seed.wrapping_add(index.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }
}

impl From<&AppConfig> for FaultConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            vehicle: VehicleFaultParams {
                mean_time_to_failure: config.mtbvf,
                mean_repair_time: config.mtbvr,
                mean_time_to_rental: config.mtbr,
                mean_rental_duration: config.mtbrr,
            },
            broker: BrokerFaultParams {
                mean_time_to_failure: config.mtbbf,
                mean_repair_time: config.mtbbr,
            },
            runtime_ticks: config.runtime,
            tick_interval: Duration::from_secs(1),
            seed: config.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_app_config() {
        let app = AppConfig {
            runtime: 120,
            seed: Some(7),
            ..AppConfig::default()
        };
        let config = FaultConfig::from(&app);
        assert_eq!(config.vehicle.mean_time_to_failure, 1080.0);
        assert_eq!(config.vehicle.mean_rental_duration, 17.28);
        assert_eq!(config.broker.mean_repair_time, 3.6);
        assert_eq!(config.runtime_ticks, 120);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_entity_seeds_differ() {
        let config = FaultConfig::from(&AppConfig {
            seed: Some(42),
            ..AppConfig::default()
        });
        assert_ne!(config.entity_seed(0), config.entity_seed(1));
        assert_eq!(config.entity_seed(3), config.entity_seed(3));

        let unseeded = FaultConfig::from(&AppConfig::default());
        assert_eq!(unseeded.entity_seed(0), None);
    }
}
