//! Iteration circuit breaker for section refinement loops
//!
//! Each (topic, section) pair gets a circuit that admits at most
//! `max_iterations` refinements, spaced at least one second apart.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{CircuitConfig, RegistryConfig};
use crate::error::{GuardError, IterationBlock, Result};
use crate::registry::Registry;

/// Minimum spacing between two registered iterations of one circuit
pub const MIN_ITERATION_INTERVAL: Duration = Duration::from_secs(1);

/// Iteration counters for one (topic, section) pair
#[derive(Debug, Clone)]
pub struct IterationCircuit {
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub created_at: Instant,
    /// None until the first iteration is registered
    pub last_iteration_time: Option<Instant>,
}

impl IterationCircuit {
    pub fn new(max_iterations: u32, now: Instant) -> Self {
        Self {
            iteration_count: 0,
            max_iterations,
            created_at: now,
            last_iteration_time: None,
        }
    }

    /// Why another iteration is not allowed right now, if it isn't.
    pub fn blocked_by(&self, now: Instant) -> Option<IterationBlock> {
        if self.iteration_count >= self.max_iterations {
            return Some(IterationBlock::CeilingReached);
        }
        if let Some(last) = self.last_iteration_time {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < MIN_ITERATION_INTERVAL {
                return Some(IterationBlock::TooSoon {
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        None
    }

    pub fn can_iterate(&self, now: Instant) -> bool {
        self.blocked_by(now).is_none()
    }

    pub fn register_iteration(&mut self, now: Instant) {
        self.iteration_count += 1;
        self.last_iteration_time = Some(now);
    }
}

/// Read-only view of a circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub circuit_id: String,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub can_iterate: bool,
}

/// Admission authority for refinement iterations
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    circuits: Registry<IterationCircuit>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig, registry: &RegistryConfig) -> Self {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CircuitConfig,
        registry: &RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            circuits: Registry::new("iteration_circuits", registry),
            clock,
        }
    }

    pub fn default_max_iterations(&self) -> u32 {
        self.config.default_max_iterations
    }

    /// Register one iteration on `circuit_id`, or fail if the circuit is tripped.
    ///
    /// `max_iterations` only applies when the circuit is created; an existing
    /// circuit keeps its ceiling. Returns the iteration count after this one.
    pub fn check_and_register(
        &self,
        circuit_id: &str,
        max_iterations: Option<u32>,
    ) -> Result<u32> {
        let max_iterations = max_iterations.unwrap_or(self.config.default_max_iterations);
        let now = self.clock.now();

        let outcome = self.circuits.with_entry(
            circuit_id,
            now,
            || IterationCircuit::new(max_iterations, now),
            |circuit| match circuit.blocked_by(now) {
                Some(reason) => Err(GuardError::IterationLimitExceeded {
                    circuit_id: circuit_id.to_string(),
                    iterations: circuit.iteration_count,
                    max_iterations: circuit.max_iterations,
                    reason,
                }),
                None => {
                    circuit.register_iteration(now);
                    Ok(circuit.iteration_count)
                }
            },
        )?;

        match &outcome {
            Ok(count) => debug!(circuit_id, iteration = *count, "Iteration registered"),
            Err(e) => warn!(circuit_id, "Iteration rejected: {}", e),
        }
        outcome
    }

    /// Discard a circuit so the pair starts with a fresh budget. Idempotent.
    pub fn reset_circuit(&self, circuit_id: &str) -> Result<()> {
        if self.circuits.remove(circuit_id)? {
            info!(circuit_id, "Circuit reset");
        }
        Ok(())
    }

    pub fn circuit_snapshot(&self, circuit_id: &str) -> Result<Option<CircuitSnapshot>> {
        let now = self.clock.now();
        self.circuits.peek(circuit_id, now, |circuit| CircuitSnapshot {
            circuit_id: circuit_id.to_string(),
            iteration_count: circuit.iteration_count,
            max_iterations: circuit.max_iterations,
            can_iterate: circuit.can_iterate(now),
        })
    }

    pub fn circuit_count(&self) -> Result<usize> {
        self.circuits.len(self.clock.now())
    }
}
