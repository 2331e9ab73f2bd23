//! Engine metrics plane.
//!
//! All counters update under a single aggregator mutex; snapshots are deep
//! copies so callers can never alias the live state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::models::duration_nanos;
use crate::domain::models::{Execution, ExecutionStatus};

/// Snapshot of the engine's counters. Monotonic unless noted.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Events accepted onto the event queue.
    pub events_processed: u64,
    /// Events dropped for any reason: queue full, excluded, or filtered.
    pub events_dropped: u64,
    /// Subset of drops caused by the include/exclude/organization sets.
    pub events_excluded: u64,
    /// Matched tasks dropped because the task queue was full.
    pub tasks_dropped: u64,
    pub rules_evaluated: u64,
    pub rules_matched: u64,
    pub rules_executed: u64,
    pub execution_errors: u64,
    pub evaluation_errors: u64,
    /// Pairwise running mean `avg' = (avg + sample) / 2`: a smoothing
    /// biased toward recent executions, not a true arithmetic mean. Reset
    /// only on process restart.
    #[serde(with = "duration_nanos")]
    pub average_execution_time: Duration,
    pub event_type_distribution: HashMap<String, u64>,
    pub executions_by_status: HashMap<String, u64>,
    pub last_processed_event: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
}

impl EngineMetrics {
    fn new() -> Self {
        Self {
            events_processed: 0,
            events_dropped: 0,
            events_excluded: 0,
            tasks_dropped: 0,
            rules_evaluated: 0,
            rules_matched: 0,
            rules_executed: 0,
            execution_errors: 0,
            evaluation_errors: 0,
            average_execution_time: Duration::ZERO,
            event_type_distribution: HashMap::new(),
            executions_by_status: HashMap::new(),
            last_processed_event: None,
            start_time: Utc::now(),
        }
    }
}

/// Shared counter plane owned by the engine.
pub struct MetricsAggregator {
    inner: Mutex<EngineMetrics>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EngineMetrics::new()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut EngineMetrics) -> R) -> R {
        let mut metrics = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut metrics)
    }

    /// An event was accepted onto the event queue.
    pub fn record_enqueued(&self, event_type: &str) {
        self.with(|m| {
            m.events_processed += 1;
            *m.event_type_distribution
                .entry(event_type.to_string())
                .or_insert(0) += 1;
            m.last_processed_event = Some(Utc::now());
        });
    }

    /// An event was rejected because the event queue was full.
    pub fn record_queue_full(&self) {
        self.with(|m| m.events_dropped += 1);
    }

    /// An event was dropped by the include/exclude/organization sets or the
    /// external filter.
    pub fn record_excluded(&self) {
        self.with(|m| {
            m.events_dropped += 1;
            m.events_excluded += 1;
        });
    }

    /// A matched task was dropped because the task queue was full.
    pub fn record_task_dropped(&self) {
        self.with(|m| m.tasks_dropped += 1);
    }

    pub fn record_rules_evaluated(&self, count: u64) {
        self.with(|m| m.rules_evaluated += count);
    }

    pub fn record_rule_matched(&self) {
        self.with(|m| m.rules_matched += 1);
    }

    pub fn record_evaluation_error(&self) {
        self.with(|m| m.evaluation_errors += 1);
    }

    /// A finished execution: counts status, errors, and folds the duration
    /// into the running average.
    pub fn record_execution(&self, execution: &Execution) {
        self.with(|m| {
            m.rules_executed += 1;
            *m.executions_by_status
                .entry(execution.status.as_str().to_string())
                .or_insert(0) += 1;
            if matches!(
                execution.status,
                ExecutionStatus::Failed | ExecutionStatus::Timeout
            ) {
                m.execution_errors += 1;
            }
            m.average_execution_time = if m.average_execution_time.is_zero() {
                execution.duration
            } else {
                (m.average_execution_time + execution.duration) / 2
            };
        });
    }

    /// Deep copy of the current counters.
    pub fn snapshot(&self) -> EngineMetrics {
        self.with(|m| m.clone())
    }
}
