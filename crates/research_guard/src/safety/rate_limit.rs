//! Research Rate Limiter
//!
//! Multi-dimensional quotas for research sessions. Each call is checked, in
//! order, against the session's query count, its wall-clock age and its
//! accumulated cost, and then counted against the calling client's hourly
//! quota. The first violated dimension wins and nothing after it is applied.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{RateLimitConfig, RegistryConfig};
use crate::error::{GuardError, LimitViolation, Result};
use crate::identity::{derive_session_id, DEFAULT_CLIENT_ID};
use crate::registry::Registry;

/// Maximum wall-clock age of a research session
pub const RESEARCH_TIME_LIMIT: Duration = Duration::from_secs(10 * 60);

/// Length of the per-client quota window
pub const HOURLY_WINDOW: Duration = Duration::from_secs(3600);

/// Cost charged when the caller has no better estimate
pub const DEFAULT_ESTIMATED_COST_USD: f64 = 0.05;

/// Resource counters for one research session
#[derive(Debug, Clone)]
pub struct ResourceTracker {
    pub session_id: String,
    pub query_count: u32,
    pub start_time: Instant,
    pub total_cost_usd: f64,
    pub last_query_time: Instant,
}

impl ResourceTracker {
    pub fn new(session_id: String, now: Instant) -> Self {
        Self {
            session_id,
            query_count: 0,
            start_time: now,
            total_cost_usd: 0.0,
            last_query_time: now,
        }
    }

    pub fn elapsed_minutes(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.start_time).as_secs_f64() / 60.0
    }

    /// First violated dimension for a query costing `estimated_cost_usd`, if any.
    fn violation(
        &self,
        config: &RateLimitConfig,
        estimated_cost_usd: f64,
        now: Instant,
    ) -> Option<LimitViolation> {
        if self.query_count >= config.max_queries_per_research {
            return Some(LimitViolation::ResearchQueries {
                observed: self.query_count,
                limit: config.max_queries_per_research,
            });
        }

        if now.saturating_duration_since(self.start_time) > RESEARCH_TIME_LIMIT {
            return Some(LimitViolation::ResearchTime {
                elapsed_minutes: self.elapsed_minutes(now),
                limit_minutes: RESEARCH_TIME_LIMIT.as_secs_f64() / 60.0,
            });
        }

        if self.total_cost_usd + estimated_cost_usd > config.cost_limit_usd {
            return Some(LimitViolation::ResearchCost {
                total_cost_usd: self.total_cost_usd,
                estimated_cost_usd,
                limit_usd: config.cost_limit_usd,
            });
        }

        None
    }

    fn record(&mut self, estimated_cost_usd: f64, now: Instant) {
        self.query_count += 1;
        self.total_cost_usd += estimated_cost_usd;
        self.last_query_time = now;
    }
}

/// Per-client query counts for the current hourly window.
///
/// The window is reset in full once it is older than an hour; this is a hard
/// reset, not a sliding window.
#[derive(Debug)]
struct HourlyQuota {
    window_start: Instant,
    per_client: HashMap<String, u32>,
}

impl HourlyQuota {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            per_client: HashMap::new(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) > HOURLY_WINDOW
    }

    fn roll_if_expired(&mut self, now: Instant) {
        if self.is_expired(now) {
            let cleared = self.per_client.len();
            self.per_client.clear();
            self.window_start = now;
            info!(cleared_clients = cleared, "Hourly quota window reset");
        }
    }

    fn increment(&mut self, client_id: &str) -> u32 {
        let count = self.per_client.entry(client_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn total(&self) -> u64 {
        self.per_client.values().map(|c| u64::from(*c)).sum()
    }
}

/// Outcome of an admitted query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Admission {
    /// Session display id, when a topic was given
    pub session_id: Option<String>,
    /// Session query count after this query
    pub query_count: Option<u32>,
    /// Session cost after this query
    pub total_cost_usd: Option<f64>,
    /// Client's count in the current hourly window
    pub hourly_count: u32,
}

/// Read-only view of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchStats {
    pub session_id: String,
    pub query_count: u32,
    pub elapsed_minutes: f64,
    pub total_cost_usd: f64,
}

/// Read-only view of the limiter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    pub hourly_queries: u64,
    pub active_researches: usize,
    pub config: RateLimitConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchStats>,
}

/// Admission authority for research queries
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    trackers: Registry<ResourceTracker>,
    hourly: Mutex<HourlyQuota>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter using the system clock
    pub fn new(config: RateLimitConfig, registry: &RegistryConfig) -> Self {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RateLimitConfig,
        registry: &RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            config,
            trackers: Registry::new("research_trackers", registry),
            hourly: Mutex::new(HourlyQuota::new(now)),
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit one query for the default client at the default cost estimate
    pub fn check_query(&self, topic: Option<&str>) -> Result<Admission> {
        self.check_limit(DEFAULT_CLIENT_ID, topic, DEFAULT_ESTIMATED_COST_USD)
    }

    /// Admit one query or fail with the first violated limit.
    ///
    /// Session checks and the session update happen under one shard lock, so
    /// two concurrent callers can never both pass the last free slot.
    pub fn check_limit(
        &self,
        client_id: &str,
        topic: Option<&str>,
        estimated_cost_usd: f64,
    ) -> Result<Admission> {
        if !estimated_cost_usd.is_finite() || estimated_cost_usd < 0.0 {
            return Err(GuardError::InvalidInput(format!(
                "estimated cost must be a non-negative number, got {}",
                estimated_cost_usd
            )));
        }

        let now = self.clock.now();

        self.hourly
            .lock()
            .map_err(|_| GuardError::poisoned("hourly quota"))?
            .roll_if_expired(now);

        let mut admission = Admission {
            session_id: None,
            query_count: None,
            total_cost_usd: None,
            hourly_count: 0,
        };

        if let Some(topic) = topic {
            let outcome = self.trackers.with_entry(
                topic,
                now,
                || ResourceTracker::new(derive_session_id(topic), now),
                |tracker| match tracker.violation(&self.config, estimated_cost_usd, now) {
                    Some(violation) => Err((tracker.session_id.clone(), violation)),
                    None => {
                        tracker.record(estimated_cost_usd, now);
                        Ok((
                            tracker.session_id.clone(),
                            tracker.query_count,
                            tracker.total_cost_usd,
                        ))
                    }
                },
            )?;

            match outcome {
                Ok((session_id, query_count, total_cost_usd)) => {
                    admission.session_id = Some(session_id);
                    admission.query_count = Some(query_count);
                    admission.total_cost_usd = Some(total_cost_usd);
                }
                Err((session_id, violation)) => {
                    warn!(
                        session_id = %session_id,
                        kind = violation.kind().as_str(),
                        "Research query rejected: {}",
                        violation
                    );
                    return Err(GuardError::ResourceLimitExceeded(violation));
                }
            }
        }

        let hourly_count = self
            .hourly
            .lock()
            .map_err(|_| GuardError::poisoned("hourly quota"))?
            .increment(client_id);

        if hourly_count > self.config.max_queries_per_hour {
            let violation = LimitViolation::HourlyQueries {
                client_id: client_id.to_string(),
                observed: hourly_count,
                limit: self.config.max_queries_per_hour,
            };
            warn!(
                client_id,
                kind = violation.kind().as_str(),
                "Query rejected: {}",
                violation
            );
            return Err(GuardError::ResourceLimitExceeded(violation));
        }

        admission.hourly_count = hourly_count;
        debug!(
            client_id,
            session_id = admission.session_id.as_deref().unwrap_or("-"),
            hourly_count,
            "Query admitted"
        );
        Ok(admission)
    }

    /// Snapshot of the limiter's counters. Never mutates state.
    pub fn get_stats(&self, topic: Option<&str>) -> Result<LimiterStats> {
        let now = self.clock.now();

        let hourly_queries = {
            let hourly = self
                .hourly
                .lock()
                .map_err(|_| GuardError::poisoned("hourly quota"))?;
            if hourly.is_expired(now) {
                0
            } else {
                hourly.total()
            }
        };

        let research = match topic {
            Some(topic) => self.trackers.peek(topic, now, |tracker| ResearchStats {
                session_id: tracker.session_id.clone(),
                query_count: tracker.query_count,
                elapsed_minutes: tracker.elapsed_minutes(now),
                total_cost_usd: tracker.total_cost_usd,
            })?,
            None => None,
        };

        Ok(LimiterStats {
            hourly_queries,
            active_researches: self.trackers.len(now)?,
            config: self.config.clone(),
            research,
        })
    }

    /// Count for `client_id` in the current window (0 once the window expired).
    pub fn hourly_count(&self, client_id: &str) -> Result<u32> {
        let now = self.clock.now();
        let hourly = self
            .hourly
            .lock()
            .map_err(|_| GuardError::poisoned("hourly quota"))?;
        if hourly.is_expired(now) {
            return Ok(0);
        }
        Ok(hourly.per_client.get(client_id).copied().unwrap_or(0))
    }

    /// Forget a research session so the topic starts with a fresh budget.
    pub fn reset_session(&self, topic: &str) -> Result<()> {
        if self.trackers.remove(topic)? {
            info!(session_id = %derive_session_id(topic), "Research session reset");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LimitKind;
    use approx::assert_relative_eq;

    fn limiter(config: RateLimitConfig) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter =
            RateLimiter::with_clock(config, &RegistryConfig::default(), Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn small_config() -> RateLimitConfig {
        RateLimitConfig {
            max_queries_per_research: 3,
            cost_limit_usd: 1.0,
            ..Default::default()
        }
    }

    fn kind_of(result: Result<Admission>) -> Option<LimitKind> {
        result.err().and_then(|e| e.limit_kind())
    }

    #[test]
    fn test_first_query_creates_tracker() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        let admission = limiter.check_query(Some("solar")).unwrap();

        assert_eq!(admission.query_count, Some(1));
        assert_eq!(admission.hourly_count, 1);
        assert_eq!(admission.session_id, Some(derive_session_id("solar")));
        assert_eq!(limiter.get_stats(None).unwrap().active_researches, 1);
    }

    #[test]
    fn test_query_count_checked_before_cost() {
        let (limiter, _) = limiter(small_config());

        for _ in 0..3 {
            limiter.check_limit("c", Some("topic"), 0.30).unwrap();
        }
        let stats = limiter.get_stats(Some("topic")).unwrap().research.unwrap();
        assert_relative_eq!(stats.total_cost_usd, 0.90, epsilon = 1e-9);

        // Cost would also exceed, but the count check fires first
        assert_eq!(
            kind_of(limiter.check_limit("c", Some("topic"), 0.30)),
            Some(LimitKind::ResearchQueries)
        );
    }

    #[test]
    fn test_query_count_rejection_is_sticky() {
        let (limiter, _) = limiter(small_config());
        for _ in 0..3 {
            limiter.check_limit("c", Some("topic"), 0.0).unwrap();
        }
        for _ in 0..5 {
            assert_eq!(
                kind_of(limiter.check_limit("c", Some("topic"), 0.0)),
                Some(LimitKind::ResearchQueries)
            );
        }
    }

    #[test]
    fn test_cost_rejection_has_no_side_effects() {
        let (limiter, _) = limiter(small_config());
        limiter.check_limit("c", Some("topic"), 0.60).unwrap();

        let err = limiter.check_limit("c", Some("topic"), 0.50).unwrap_err();
        match err {
            GuardError::ResourceLimitExceeded(LimitViolation::ResearchCost {
                total_cost_usd,
                estimated_cost_usd,
                limit_usd,
            }) => {
                assert_relative_eq!(total_cost_usd, 0.60);
                assert_relative_eq!(estimated_cost_usd, 0.50);
                assert_relative_eq!(limit_usd, 1.0);
            }
            other => panic!("Expected ResearchCost, got {:?}", other),
        }

        let stats = limiter.get_stats(Some("topic")).unwrap().research.unwrap();
        assert_eq!(stats.query_count, 1);
        assert_relative_eq!(stats.total_cost_usd, 0.60);
        assert_eq!(limiter.hourly_count("c").unwrap(), 1);
    }

    #[test]
    fn test_cost_exactly_at_limit_is_admitted() {
        let (limiter, _) = limiter(RateLimitConfig {
            cost_limit_usd: 1.0,
            ..Default::default()
        });
        limiter.check_limit("c", Some("topic"), 0.5).unwrap();
        limiter.check_limit("c", Some("topic"), 0.5).unwrap();
        assert_eq!(
            kind_of(limiter.check_limit("c", Some("topic"), 0.01)),
            Some(LimitKind::ResearchCost)
        );
    }

    #[test]
    fn test_research_time_limit() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        limiter.check_query(Some("slow")).unwrap();

        clock.advance_secs(600);
        // Exactly ten minutes is still within the ceiling
        limiter.check_query(Some("slow")).unwrap();

        clock.advance_secs(1);
        let err = limiter.check_query(Some("slow")).unwrap_err();
        match err {
            GuardError::ResourceLimitExceeded(LimitViolation::ResearchTime {
                elapsed_minutes,
                limit_minutes,
            }) => {
                assert!(elapsed_minutes > 10.0);
                assert_relative_eq!(limit_minutes, 10.0);
            }
            other => panic!("Expected ResearchTime, got {:?}", other),
        }
    }

    #[test]
    fn test_time_limit_ignores_count_and_cost() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        limiter.check_limit("c", Some("t"), 0.0).unwrap();
        clock.advance_secs(11 * 60);
        assert_eq!(
            kind_of(limiter.check_limit("c", Some("t"), 0.0)),
            Some(LimitKind::ResearchTime)
        );
    }

    #[test]
    fn test_hourly_limit_without_topic() {
        let (limiter, _) = limiter(RateLimitConfig {
            max_queries_per_hour: 2,
            ..Default::default()
        });

        limiter.check_query(None).unwrap();
        limiter.check_query(None).unwrap();
        let err = limiter.check_query(None).unwrap_err();
        assert_eq!(
            err.limit_kind(),
            Some(LimitKind::HourlyQueries),
            "third query should hit the hourly quota"
        );
        assert!(err.to_string().contains("3/2"));
    }

    #[test]
    fn test_hourly_window_reset() {
        let (limiter, clock) = limiter(RateLimitConfig {
            max_queries_per_hour: 5,
            ..Default::default()
        });

        for _ in 0..5 {
            limiter.check_query(None).unwrap();
        }
        assert_eq!(limiter.hourly_count(DEFAULT_CLIENT_ID).unwrap(), 5);
        assert!(limiter.check_query(None).is_err());

        clock.advance_secs(3601);
        assert_eq!(limiter.hourly_count(DEFAULT_CLIENT_ID).unwrap(), 0);

        let admission = limiter.check_query(None).unwrap();
        assert_eq!(admission.hourly_count, 1);
    }

    #[test]
    fn test_hourly_window_boundary_is_strict() {
        let (limiter, clock) = limiter(RateLimitConfig {
            max_queries_per_hour: 1,
            ..Default::default()
        });
        limiter.check_query(None).unwrap();
        clock.advance_secs(3600);
        assert!(limiter.check_query(None).is_err());
    }

    #[test]
    fn test_clients_are_independent() {
        let (limiter, _) = limiter(RateLimitConfig {
            max_queries_per_hour: 1,
            ..Default::default()
        });
        limiter.check_limit("alice", None, 0.0).unwrap();
        limiter.check_limit("bob", None, 0.0).unwrap();
        assert!(limiter.check_limit("alice", None, 0.0).is_err());
    }

    #[test]
    fn test_rejects_invalid_cost() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        for cost in [-0.01, f64::NAN, f64::INFINITY] {
            let err = limiter.check_limit("c", Some("t"), cost).unwrap_err();
            assert!(matches!(err, GuardError::InvalidInput(_)));
        }
        assert_eq!(limiter.get_stats(None).unwrap().active_researches, 0);
        assert_eq!(limiter.hourly_count("c").unwrap(), 0);
    }

    #[test]
    fn test_stats_do_not_mutate() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        limiter.check_query(Some("a")).unwrap();

        let before = limiter.get_stats(Some("a")).unwrap();
        let after = limiter.get_stats(Some("a")).unwrap();
        assert_eq!(before, after);
        assert_eq!(before.hourly_queries, 1);

        // Unknown topics are not created by stats
        let stats = limiter.get_stats(Some("unknown")).unwrap();
        assert!(stats.research.is_none());
        assert_eq!(stats.active_researches, 1);
    }

    #[test]
    fn test_reset_session() {
        let (limiter, _) = limiter(small_config());
        for _ in 0..3 {
            limiter.check_limit("c", Some("topic"), 0.1).unwrap();
        }
        assert!(limiter.check_limit("c", Some("topic"), 0.1).is_err());

        limiter.reset_session("topic").unwrap();
        limiter.reset_session("topic").unwrap();

        let admission = limiter.check_limit("c", Some("topic"), 0.1).unwrap();
        assert_eq!(admission.query_count, Some(1));
    }

    #[test]
    fn test_hourly_rejection_still_charges_session() {
        let (limiter, _) = limiter(RateLimitConfig {
            max_queries_per_hour: 1,
            ..Default::default()
        });
        limiter.check_limit("c", Some("topic"), 0.25).unwrap();

        let err = limiter.check_limit("c", Some("topic"), 0.25).unwrap_err();
        assert_eq!(err.limit_kind(), Some(LimitKind::HourlyQueries));

        // The session update runs before the hourly check
        let stats = limiter.get_stats(Some("topic")).unwrap().research.unwrap();
        assert_eq!(stats.query_count, 2);
        assert_relative_eq!(stats.total_cost_usd, 0.50);
    }

    #[test]
    fn test_idle_sessions_leave_active_count() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        limiter.check_query(Some("stale")).unwrap();
        assert_eq!(limiter.get_stats(None).unwrap().active_researches, 1);

        clock.advance_secs(3600);
        let stats = limiter.get_stats(Some("stale")).unwrap();
        assert!(stats.research.is_none());
        assert_eq!(stats.active_researches, 0);
    }

    #[test]
    fn test_topics_do_not_share_budget() {
        let (limiter, _) = limiter(small_config());
        for _ in 0..3 {
            limiter.check_limit("c", Some("first"), 0.1).unwrap();
        }
        assert!(limiter.check_limit("c", Some("second"), 0.1).is_ok());
    }
}
