//! Vision model usage and budget tracking.
//!
//! Process-local counters owned by the app state and shared behind an `Arc`. Every
//! model call reserves a slot first (rate limit plus daily and monthly budgets) and
//! records its estimated cost afterwards. Callers pass `now` so window rollover is
//! deterministic under test.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ServiceError};

/// USD per million tokens as (input, output).
fn pricing(model: &str) -> (f64, f64) {
    let model = model.to_lowercase();
    if model.contains("pro") {
        (1.25, 5.00)
    } else if model.contains("flash-8b") {
        (0.0375, 0.15)
    } else {
        (0.075, 0.30)
    }
}

/// Estimated USD cost of one call.
pub fn estimate_cost(model: &str, prompt_tokens: u32, output_tokens: u32) -> f64 {
    let (input, output) = pricing(model);
    (prompt_tokens as f64 * input + output_tokens as f64 * output) / 1_000_000.0
}

#[derive(Debug, Clone, Copy)]
pub struct UsageLimits {
    pub daily_requests: u32,
    pub monthly_cost_usd: f64,
    pub requests_per_minute: u32,
}

#[derive(Debug, Default)]
struct ModelUsage {
    recent: VecDeque<DateTime<Utc>>,
    requests: u64,
    cost_usd: f64,
}

#[derive(Debug, Default)]
struct UsageState {
    day: Option<NaiveDate>,
    month: Option<(i32, u32)>,
    daily_requests: u32,
    monthly_cost_usd: f64,
    models: HashMap<String, ModelUsage>,
}

impl UsageState {
    /// Reset daily and monthly counters when `now` has moved into a new period.
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                info!(daily_requests = self.daily_requests, "Daily usage window reset");
            }
            self.day = Some(today);
            self.daily_requests = 0;
        }

        let month = (now.year(), now.month());
        if self.month != Some(month) {
            if self.month.is_some() {
                info!(monthly_cost_usd = self.monthly_cost_usd, "Monthly usage window reset");
            }
            self.month = Some(month);
            self.monthly_cost_usd = 0.0;
        }
    }
}

fn prune(recent: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let cutoff = now - Duration::minutes(1);
    while recent.front().is_some_and(|t| *t <= cutoff) {
        recent.pop_front();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsageSnapshot {
    pub requests_last_minute: usize,
    pub total_requests: u64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub daily_requests: u32,
    pub daily_request_limit: u32,
    pub monthly_cost_usd: f64,
    pub monthly_cost_limit_usd: f64,
    pub requests_per_minute_limit: u32,
    pub models: BTreeMap<String, ModelUsageSnapshot>,
}

pub struct UsageTracker {
    limits: UsageLimits,
    state: Mutex<UsageState>,
}

impl UsageTracker {
    pub fn new(limits: UsageLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(UsageState::default()),
        }
    }

    /// Check every limit and, if all pass, count the request.
    ///
    /// Budget exhaustion is permanent for the current window; a full rate limit window
    /// is transient and the retry executor will back off on it.
    pub fn check_and_reserve(&self, model: &str, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        state.roll(now);

        if state.daily_requests >= self.limits.daily_requests {
            warn!(limit = self.limits.daily_requests, "Daily AI request budget exhausted");
            return Err(ServiceError::new(
                ErrorKind::BudgetExceeded,
                format!(
                    "Daily AI request limit of {} reached",
                    self.limits.daily_requests
                ),
            ));
        }
        if state.monthly_cost_usd >= self.limits.monthly_cost_usd {
            warn!(
                spent = state.monthly_cost_usd,
                limit = self.limits.monthly_cost_usd,
                "Monthly AI cost budget exhausted"
            );
            return Err(ServiceError::new(
                ErrorKind::BudgetExceeded,
                format!(
                    "Monthly AI cost limit of ${:.2} reached",
                    self.limits.monthly_cost_usd
                ),
            ));
        }

        let usage = state.models.entry(model.to_string()).or_default();
        prune(&mut usage.recent, now);
        if usage.recent.len() >= self.limits.requests_per_minute as usize {
            let retry_in = usage
                .recent
                .front()
                .map(|oldest| (*oldest + Duration::minutes(1) - now).num_seconds().max(1))
                .unwrap_or(60);
            return Err(ServiceError::new(
                ErrorKind::RateLimited,
                format!(
                    "Rate limit reached for {}: {} requests per minute, retry in {}s",
                    model, self.limits.requests_per_minute, retry_in
                ),
            ));
        }

        usage.recent.push_back(now);
        usage.requests += 1;
        state.daily_requests += 1;
        debug!(model, daily_requests = state.daily_requests, "AI request reserved");
        Ok(())
    }

    /// Add the cost of a completed call.
    pub fn record(&self, model: &str, cost_usd: f64, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.roll(now);
        let cost = cost_usd.max(0.0);
        state.monthly_cost_usd += cost;
        state.models.entry(model.to_string()).or_default().cost_usd += cost;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> UsageSnapshot {
        let mut state = self.state.lock();
        state.roll(now);

        let models = state
            .models
            .iter_mut()
            .map(|(name, usage)| {
                prune(&mut usage.recent, now);
                (
                    name.clone(),
                    ModelUsageSnapshot {
                        requests_last_minute: usage.recent.len(),
                        total_requests: usage.requests,
                        total_cost_usd: usage.cost_usd,
                    },
                )
            })
            .collect();

        UsageSnapshot {
            daily_requests: state.daily_requests,
            daily_request_limit: self.limits.daily_requests,
            monthly_cost_usd: state.monthly_cost_usd,
            monthly_cost_limit_usd: self.limits.monthly_cost_usd,
            requests_per_minute_limit: self.limits.requests_per_minute,
            models,
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = UsageState::default();
        info!("AI usage counters reset");
    }
}
