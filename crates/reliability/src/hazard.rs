use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

/// Source of hazard durations.
pub trait HazardSampler: Send {
    /// A duration in seconds drawn for a hazard with the given mean.
    /// `f64::INFINITY` means the hazard never fires.
    fn sample(&mut self, mean: f64) -> f64;
}

/// Exponential durations from a seedable ChaCha8 stream.
#[derive(Debug, Clone)]
pub struct ExponentialSampler {
    rng: ChaCha8Rng,
}

impl ExponentialSampler {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }
}

impl HazardSampler for ExponentialSampler {
    fn sample(&mut self, mean: f64) -> f64 {
        if !mean.is_finite() || mean <= 0.0 {
            return f64::INFINITY;
        }
        match Exp::new(1.0 / mean) {
            Ok(exp) => exp.sample(&mut self.rng),
            Err(_) => f64::INFINITY,
        }
    }
}

/// Replays fixed durations in order, then never fires again.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedSampler {
    durations: std::collections::VecDeque<f64>,
}

#[cfg(test)]
impl ScriptedSampler {
    pub(crate) fn new(durations: &[f64]) -> Self {
        Self {
            durations: durations.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
impl HazardSampler for ScriptedSampler {
    fn sample(&mut self, _mean: f64) -> f64 {
        self.durations.pop_front().unwrap_or(f64::INFINITY)
    }
}
