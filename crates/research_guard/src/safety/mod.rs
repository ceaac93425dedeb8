//! Safety Module
//!
//! Protections against runaway research tasks:
//! - Rate limiting per research session and per client
//! - Iteration circuit breakers per report section
//!
//! `AdmissionControl` bundles both gates into one explicitly constructed
//! service. Cloning it is cheap and every clone shares the same counters.

pub mod circuit_breaker;
pub mod rate_limit;

pub use circuit_breaker::*;
pub use rate_limit::*;

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::error::Result;
use crate::identity::derive_circuit_id;

#[derive(Debug, Clone)]
pub struct AdmissionControl {
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AdmissionControl {
    /// Build both gates from a validated configuration
    pub fn from_config(config: &GuardConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &GuardConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let rate_limiter = RateLimiter::with_clock(
            config.rate_limit.clone(),
            &config.registry,
            Arc::clone(&clock),
        );
        let circuit_breaker =
            CircuitBreaker::with_clock(config.circuit.clone(), &config.registry, clock);

        info!(
            max_queries_per_hour = config.rate_limit.max_queries_per_hour,
            max_queries_per_research = config.rate_limit.max_queries_per_research,
            cost_limit_usd = config.rate_limit.cost_limit_usd,
            default_max_iterations = config.circuit.default_max_iterations,
            "Admission control initialized"
        );

        Ok(Self {
            rate_limiter: Arc::new(rate_limiter),
            circuit_breaker: Arc::new(circuit_breaker),
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Gate an external query
    pub fn admit_query(
        &self,
        client_id: &str,
        topic: Option<&str>,
        estimated_cost_usd: f64,
    ) -> Result<Admission> {
        self.rate_limiter.check_limit(client_id, topic, estimated_cost_usd)
    }

    /// Gate one refinement pass over `section` of the report on `topic`
    pub fn admit_iteration(
        &self,
        topic: &str,
        section: &str,
        max_iterations: Option<u32>,
    ) -> Result<u32> {
        let circuit_id = derive_circuit_id(topic, section);
        self.circuit_breaker.check_and_register(&circuit_id, max_iterations)
    }

    pub fn reset_iterations(&self, topic: &str, section: &str) -> Result<()> {
        self.circuit_breaker
            .reset_circuit(&derive_circuit_id(topic, section))
    }
}
