//! Per-tool execution metrics and health classification.
//!
//! Every remote tool call reports its outcome here. Health is derived from
//! the success rate over the last [`HEALTH_WINDOW`] executions:
//!
//! ```text
//!   executions == 0        → Unknown   (eligible, optimistic default)
//!   success_rate <  0.5    → Unhealthy
//!   0.5 <= rate  <  0.8    → Degraded
//!   success_rate >= 0.8    → Healthy
//! ```
//!
//! An unhealthy tool is excluded from routing until its cooldown has passed
//! since the last failure, or until [`HealthMonitor::allow_retry`] is called.
//! It then gets a half-open trial:
//!
//! ```text
//! ┌─────────┐  rate < 0.5   ┌───────────┐  cooldown / retry  ┌───────────┐
//! │ Healthy ├──────────────►│ Unhealthy ├───────────────────►│ Half-open │
//! └───▲─────┘               └─────▲─────┘                    └─────┬─────┘
//!     │  success (window reset)   │  failure                       │
//!     └───────────────────────────┴────────────────────────────────┘
//! ```
//!
//! The monitor is shared by every in-flight query, so its map sits behind a
//! [`Mutex`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Success rate below which a tool is unhealthy.
pub const UNHEALTHY_BELOW: f64 = 0.5;

/// Success rate at or above which a tool is healthy.
pub const HEALTHY_FROM: f64 = 0.8;

/// Number of most recent executions health is computed over.
pub const HEALTH_WINDOW: usize = 20;

/// Default wait after the last failure before an unhealthy tool is retried.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Health classification of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// No recorded executions yet.
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Classify a tool from its success rate and execution count.
    pub fn classify(success_rate: f64, executions: u64) -> Self {
        if executions == 0 {
            Self::Unknown
        } else if success_rate < UNHEALTHY_BELOW {
            Self::Unhealthy
        } else if success_rate < HEALTHY_FROM {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    /// Whether the orchestrator may route queries to a tool in this state.
    pub fn is_eligible(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running execution statistics for one tool.
///
/// Counts and response time are lifetime totals; health uses only the
/// recent window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolMetrics {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_response_time: Duration,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub health: HealthStatus,
    /// Outcomes of the last [`HEALTH_WINDOW`] executions, oldest first.
    recent: VecDeque<bool>,
    last_failure_at: Option<Instant>,
    /// An unhealthy tool has been granted one trial call.
    half_open: bool,
}

impl ToolMetrics {
    pub fn total_executions(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Share of successes over the recent window, or 0 with no executions.
    pub fn success_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        self.recent.iter().filter(|ok| **ok).count() as f64 / self.recent.len() as f64
    }

    fn push(&mut self, ok: bool) {
        if self.recent.len() == HEALTH_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(ok);
    }

    /// Mean response time over all executions, or zero with none.
    pub fn avg_response_time(&self) -> Duration {
        let total = self.total_executions();
        if total == 0 {
            return Duration::ZERO;
        }
        self.total_response_time.div_f64(total as f64)
    }

    fn refresh_health(&mut self) {
        self.health = HealthStatus::classify(self.success_rate(), self.recent.len() as u64);
    }

    fn is_eligible(&self, cooldown: Duration) -> bool {
        self.health.is_eligible()
            || self.half_open
            || self
                .last_failure_at
                .is_none_or(|at| at.elapsed() >= cooldown)
    }
}

/// One row of the health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolHealthReport {
    pub tool_name: String,
    pub health_status: HealthStatus,
    pub success_rate: f64,
    /// Seconds.
    pub average_response_time: f64,
    pub total_executions: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Aggregate health of every known tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub tools: Vec<ToolHealthReport>,
    pub overall_health: HealthStatus,
    /// Tools that are healthy or not yet measured.
    pub healthy_tools: usize,
    pub total_tools: usize,
}

/// Process-wide tracker of tool outcomes.
#[derive(Debug)]
pub struct HealthMonitor {
    tools: Mutex<HashMap<String, ToolMetrics>>,
    cooldown: Duration,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::with_cooldown(DEFAULT_COOLDOWN)
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A monitor that retries unhealthy tools `cooldown` after their last failure.
    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ToolMetrics>> {
        // Metrics stay usable even if a holder panicked mid-update.
        self.tools.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a successful call that took `elapsed`.
    ///
    /// A success from an unhealthy tool ends its trial: the recent window is
    /// cleared so the tool starts over as healthy.
    pub fn record_success(&self, tool: &str, elapsed: Duration) {
        let mut tools = self.lock();
        let metrics = tools.entry(tool.to_owned()).or_default();
        if metrics.health == HealthStatus::Unhealthy {
            tracing::info!(tool, "tool recovered");
            metrics.recent.clear();
        }
        metrics.half_open = false;
        metrics.success_count += 1;
        metrics.total_response_time += elapsed;
        metrics.last_success = Some(Utc::now());
        metrics.push(true);
        metrics.refresh_health();
    }

    /// Record a failed call that took `elapsed`.
    pub fn record_failure(&self, tool: &str, elapsed: Duration, error: &str) {
        let mut tools = self.lock();
        let metrics = tools.entry(tool.to_owned()).or_default();
        metrics.failure_count += 1;
        metrics.total_response_time += elapsed;
        metrics.last_failure = Some(Utc::now());
        metrics.last_failure_at = Some(Instant::now());
        metrics.last_error = Some(error.to_owned());
        metrics.half_open = false;
        metrics.push(false);
        metrics.refresh_health();
    }

    /// Snapshot of one tool's metrics (default metrics if never seen).
    pub fn metrics(&self, tool: &str) -> ToolMetrics {
        self.lock().get(tool).cloned().unwrap_or_default()
    }

    pub fn status(&self, tool: &str) -> HealthStatus {
        self.lock().get(tool).map_or(HealthStatus::Unknown, |m| m.health)
    }

    /// Whether queries may be routed to `tool`: it is not unhealthy, or it
    /// is due a trial call.
    pub fn is_eligible(&self, tool: &str) -> bool {
        self.lock()
            .get(tool)
            .is_none_or(|m| m.is_eligible(self.cooldown))
    }

    /// Grant every unhealthy tool one trial call without waiting for its
    /// cooldown. History is kept; the next outcome decides.
    pub fn allow_retry(&self) {
        for metrics in self.lock().values_mut() {
            if metrics.health == HealthStatus::Unhealthy {
                metrics.half_open = true;
            }
        }
    }

    /// Build a report covering `tool_names`, in the given order.
    pub fn report(&self, tool_names: &[String]) -> HealthReport {
        let tools = self.lock();
        let rows: Vec<ToolHealthReport> = tool_names
            .iter()
            .map(|name| {
                let metrics = tools.get(name).cloned().unwrap_or_default();
                ToolHealthReport {
                    tool_name: name.clone(),
                    health_status: metrics.health,
                    success_rate: metrics.success_rate(),
                    average_response_time: metrics.avg_response_time().as_secs_f64(),
                    total_executions: metrics.total_executions(),
                    last_success: metrics.last_success,
                    last_failure: metrics.last_failure,
                }
            })
            .collect();

        let healthy_tools = rows
            .iter()
            .filter(|r| matches!(r.health_status, HealthStatus::Healthy | HealthStatus::Unknown))
            .count();
        let total_tools = rows.len();
        let overall_health = if total_tools == 0 {
            HealthStatus::Unknown
        } else if healthy_tools == total_tools {
            HealthStatus::Healthy
        } else if rows
            .iter()
            .all(|r| r.health_status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            tools: rows,
            overall_health,
            healthy_tools,
            total_tools,
        }
    }

    /// Forget every recorded outcome.
    pub fn reset(&self) {
        self.lock().clear();
    }
}
