//! Cost estimation boundary contract (§1, §4.D step 2).
//!
//! Billing itself is out of scope, but the scheduler still needs *a* place
//! to ask "roughly what will this cost" for display on the job record —
//! this trait is that seam, with an in-process linear-model default
//! standing in for the (out of scope) payment service.

use compute_protocol::Requirements;

pub trait CostEstimator: Send + Sync {
    /// Estimated cost in dollars over the job's full timeout window.
    fn estimate(&self, requirements: &Requirements, timeout_secs: u64) -> f64;
}

/// A linear model over a base per-dimension hourly rate table, matching
/// §4.D step 2 ("linear model over requirements and a base rate table").
pub struct LinearCostEstimator {
    pub cpu_rate_per_hour: f64,
    pub memory_rate_per_gb_hour: f64,
    pub gpu_rate_per_hour: f64,
}

impl Default for LinearCostEstimator {
    fn default() -> Self {
        Self {
            cpu_rate_per_hour: 0.04,
            memory_rate_per_gb_hour: 0.01,
            gpu_rate_per_hour: 0.90,
        }
    }
}

impl CostEstimator for LinearCostEstimator {
    fn estimate(&self, requirements: &Requirements, timeout_secs: u64) -> f64 {
        let hours = timeout_secs as f64 / 3600.0;
        let memory_gb = requirements.memory_mb / 1024.0;
        let hourly = requirements.cpu_cores * self.cpu_rate_per_hour
            + memory_gb * self.memory_rate_per_gb_hour
            + requirements.gpu_count * self.gpu_rate_per_hour;
        hourly * hours
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_timeout() {
        let estimator = LinearCostEstimator::default();
        let requirements = Requirements {
            cpu_cores: 4.0,
            memory_mb: 16384.0,
            ..Default::default()
        };
        let one_hour = estimator.estimate(&requirements, 3600);
        let two_hours = estimator.estimate(&requirements, 7200);
        assert!((two_hours - one_hour * 2.0).abs() < 1e-9);
    }
}
