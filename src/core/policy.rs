use std::time::Duration;

use rand::Rng;
use serde_derive::{Deserialize, Serialize};

/// Timeout and retry budget for one capability kind. Every suspension
/// point in the pipeline (source fetch, transform, publish) runs under
/// one of these; nothing is hardcoded at the call site.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CallPolicy {
    pub timeout_secs: u64,
    /// Total attempts, first try included.
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Fractional jitter applied to each delay, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl CallPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `attempt` (1-based), with jitter applied.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32 - 1);
        let jitter = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((base * jitter).max(0.0) as u64)
    }
}

/// Policies for each capability kind plus the scheduler's run-level retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CallPolicies {
    pub source: CallPolicy,
    pub transform: CallPolicy,
    pub publish: CallPolicy,
}

impl Default for CallPolicies {
    fn default() -> Self {
        Self {
            source: CallPolicy {
                timeout_secs: 20,
                attempts: 3,
                base_delay_ms: 500,
                multiplier: 2.0,
                jitter: 0.2,
            },
            transform: CallPolicy {
                timeout_secs: 10,
                attempts: 2,
                base_delay_ms: 250,
                multiplier: 2.0,
                jitter: 0.2,
            },
            publish: CallPolicy {
                timeout_secs: 30,
                attempts: 3,
                base_delay_ms: 1_000,
                multiplier: 2.0,
                jitter: 0.2,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially_within_jitter_bounds() {
        let policy = CallPolicy {
            timeout_secs: 1,
            attempts: 4,
            base_delay_ms: 100,
            multiplier: 2.0,
            jitter: 0.2,
        };
        let d1 = policy.delay_before(1).as_millis() as f64;
        let d3 = policy.delay_before(3).as_millis() as f64;
        assert!((80.0..=120.0).contains(&d1), "d1={}", d1);
        assert!((320.0..=480.0).contains(&d3), "d3={}", d3);
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = CallPolicy {
            timeout_secs: 1,
            attempts: 2,
            base_delay_ms: 100,
            multiplier: 3.0,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(2), Duration::from_millis(300));
    }
}
