//! Daily token budget tracking

use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;

use super::patterns::{Issue, Severity};

/// Budget thresholds as percentages of the daily limit
const WARN_THRESHOLD_PCT: f64 = 50.0;
const ALERT_THRESHOLD_PCT: f64 = 80.0;
const BLOCK_THRESHOLD_PCT: f64 = 100.0;

/// Per-agent token counters with hourly and daily rotation. Owned
/// exclusively by the guardian.
pub struct BudgetTracker {
    daily_limit: i64,
    daily_counts: HashMap<String, i64>,
    hourly_counts: HashMap<String, i64>,
    reset_date: String,
    reset_hour: u32,
}

impl BudgetTracker {
    pub fn new(daily_limit: i64) -> Self {
        let now = Utc::now();
        Self {
            daily_limit,
            daily_counts: HashMap::new(),
            hourly_counts: HashMap::new(),
            reset_date: now.format("%Y-%m-%d").to_string(),
            reset_hour: now.hour(),
        }
    }

    pub fn track(&mut self, agent: &str, tokens: i64) {
        if tokens <= 0 {
            return;
        }
        *self.daily_counts.entry(agent.to_string()).or_insert(0) += tokens;
        *self.hourly_counts.entry(agent.to_string()).or_insert(0) += tokens;
    }

    /// Zero the hourly counter on hour roll, the daily counter on day roll.
    pub fn rotate(&mut self, now: DateTime<Utc>) {
        let today = now.format("%Y-%m-%d").to_string();
        if today != self.reset_date {
            tracing::info!(yesterday_total = self.total_today(), "Daily cost reset");
            self.daily_counts.clear();
            self.reset_date = today;
        }
        if now.hour() != self.reset_hour {
            self.hourly_counts.clear();
            self.reset_hour = now.hour();
        }
    }

    pub fn total_today(&self) -> i64 {
        self.daily_counts.values().sum()
    }

    pub fn total_this_hour(&self) -> i64 {
        self.hourly_counts.values().sum()
    }

    fn pct_used(&self) -> f64 {
        if self.daily_limit <= 0 {
            return 0.0;
        }
        self.total_today() as f64 / self.daily_limit as f64 * 100.0
    }

    /// Threshold issues for the current spend: 50% medium, 80% high, 100%
    /// critical.
    pub fn check(&self) -> Vec<Issue> {
        let pct = self.pct_used();
        let total = self.total_today();

        if pct >= BLOCK_THRESHOLD_PCT {
            vec![Issue::new(
                Severity::Critical,
                "cost",
                format!("Daily token budget EXCEEDED: {total} / {} ({pct:.1}%)", self.daily_limit),
                "cost_tracker",
                "Wait until daily reset or increase budget",
            )]
        } else if pct >= ALERT_THRESHOLD_PCT {
            vec![Issue::new(
                Severity::High,
                "cost",
                format!("Approaching daily budget: {total} / {} ({pct:.1}%)", self.daily_limit),
                "cost_tracker",
                "Reduce usage or increase budget",
            )]
        } else if pct >= WARN_THRESHOLD_PCT {
            vec![Issue::new(
                Severity::Medium,
                "cost",
                format!("Budget at {pct:.1}%: {total} / {} tokens", self.daily_limit),
                "cost_tracker",
                "Monitor usage",
            )]
        } else {
            Vec::new()
        }
    }

    /// Cost report for direct guardian queries.
    pub fn report(&self) -> serde_json::Value {
        let remaining = (self.daily_limit - self.total_today()).max(0);
        let pct_remaining = if self.daily_limit > 0 {
            remaining as f64 / self.daily_limit as f64 * 100.0
        } else {
            0.0
        };

        serde_json::json!({
            "tokens_this_hour": self.total_this_hour(),
            "tokens_today": self.total_today(),
            "daily_budget": self.daily_limit,
            "budget_remaining_pct": (pct_remaining * 10.0).round() / 10.0,
            "per_agent_today": self.daily_counts,
            "per_agent_this_hour": self.hourly_counts,
        })
    }
}
