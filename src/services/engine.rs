//! The event automation engine.
//!
//! Owns two bounded channels (events, tasks), two worker pools (match,
//! execute), a detached retry scheduler, the active-execution map, and the
//! metrics aggregator. Lifecycle is `start → submit* → stop`; stop drains
//! in-flight executions up to a deadline and returns even if it elapses.
//!
//! Backpressure: neither channel producer ever blocks beyond the immediate
//! send attempt. Overflow is a counted drop, so memory stays bounded under
//! sustained overload and the pools stay isolated from each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    EngineConfig, Event, Execution, ExecutionContext, ExecutionStatus, Rule, TriggerType,
};
use crate::domain::ports::{EventFilter, EventValidator};
use crate::services::metrics::{EngineMetrics, MetricsAggregator};
use crate::services::registry::RuleRegistry;
use crate::services::retry::task_retry_delay;

/// Base delay unit for the engine-level retry schedule.
const TASK_RETRY_BASE: Duration = Duration::from_secs(1);
/// How often the drain loop re-checks the active-execution map.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A matched rule scheduled for execution.
#[derive(Clone)]
pub struct ExecutionTask {
    /// Execution id; a retry inherits it.
    pub id: Uuid,
    pub rule: Arc<Rule>,
    pub context: ExecutionContext,
    /// Engine-level retry counter (0 on first dispatch).
    pub retry: u32,
}

struct ActiveExecution {
    record: Execution,
    cancel: CancellationToken,
}

/// Channels and workers that exist only while the engine runs.
struct Runtime {
    event_tx: mpsc::Sender<Event>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// State shared by all workers of one engine instance.
struct WorkerShared {
    config: EngineConfig,
    registry: Arc<RuleRegistry>,
    metrics: Arc<MetricsAggregator>,
    active: Arc<RwLock<HashMap<Uuid, ActiveExecution>>>,
    task_tx: mpsc::Sender<ExecutionTask>,
    shutdown: CancellationToken,
}

/// Rule-driven event automation engine.
///
/// Multiple engines may coexist: every queue, worker, and counter is owned
/// by the instance.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<RuleRegistry>,
    validator: Option<Arc<dyn EventValidator>>,
    filter: Option<Arc<dyn EventFilter>>,
    metrics: Arc<MetricsAggregator>,
    active: Arc<RwLock<HashMap<Uuid, ActiveExecution>>>,
    runtime: RwLock<Option<Runtime>>,
}

impl Engine {
    pub fn new(config: EngineConfig, registry: Arc<RuleRegistry>) -> Self {
        Self {
            config,
            registry,
            validator: None,
            filter: None,
            metrics: Arc::new(MetricsAggregator::new()),
            active: Arc::new(RwLock::new(HashMap::new())),
            runtime: RwLock::new(None),
        }
    }

    /// Add an external event validator consulted by `submit`.
    pub fn with_validator(mut self, validator: Arc<dyn EventValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Add an external event filter, applied when rule filtering is enabled.
    pub fn with_filter(mut self, filter: Arc<dyn EventFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Start the worker pools. Fails if the engine is already running.
    pub async fn start(&self) -> EngineResult<()> {
        let mut runtime = self.runtime.write().await;
        if runtime.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let (event_tx, event_rx) = mpsc::channel::<Event>(self.config.event_buffer_size);
        let (task_tx, task_rx) = mpsc::channel::<ExecutionTask>(self.config.task_buffer_size());
        let shutdown = CancellationToken::new();

        let shared = Arc::new(WorkerShared {
            config: self.config.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            active: self.active.clone(),
            task_tx,
            shutdown: shutdown.clone(),
        });

        let event_rx = Arc::new(Mutex::new(event_rx));
        let task_rx = Arc::new(Mutex::new(task_rx));

        let mut workers = Vec::new();
        for _ in 0..self.config.max_workers.max(1) {
            workers.push(tokio::spawn(match_worker(shared.clone(), event_rx.clone())));
        }
        for _ in 0..self.config.execute_workers() {
            workers.push(tokio::spawn(execute_worker(shared.clone(), task_rx.clone())));
        }
        if self.config.enable_metrics {
            workers.push(tokio::spawn(metrics_collector(shared.clone())));
        }

        *runtime = Some(Runtime {
            event_tx,
            shutdown,
            workers,
        });

        info!(
            match_workers = self.config.max_workers.max(1),
            execute_workers = self.config.execute_workers(),
            event_buffer = self.config.event_buffer_size,
            "engine started"
        );
        Ok(())
    }

    /// Cooperative shutdown: signal the workers, then wait for active
    /// executions up to the drain deadline. Returns even if the deadline
    /// elapses, logging the abandoned count.
    pub async fn stop(&self) -> EngineResult<()> {
        let runtime = self.runtime.write().await.take();
        let Some(runtime) = runtime else {
            return Err(EngineError::NotRunning);
        };

        info!("engine stopping");
        runtime.shutdown.cancel();
        drop(runtime.event_tx);

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout();
        let mut abandoned = 0;
        loop {
            let active = self.active.read().await.len();
            if active == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    abandoned = active,
                    "drain deadline elapsed, abandoning executions"
                );
                abandoned = active;
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        // drained cleanly: the workers are idle and exit promptly
        if abandoned == 0 {
            futures::future::join_all(runtime.workers).await;
        }

        info!("engine stopped");
        Ok(())
    }

    /// Offer an event to the engine: validate, apply the external filter
    /// and the include/exclude sets, then enqueue without blocking.
    pub async fn submit(&self, event: Event) -> EngineResult<()> {
        let runtime = self.runtime.read().await;
        let Some(runtime) = runtime.as_ref() else {
            return Err(EngineError::NotRunning);
        };

        event.validate()?;
        if let Some(validator) = &self.validator {
            validator.validate(&event)?;
        }

        if self.config.enable_rule_filtering {
            if let Some(filter) = &self.filter {
                if !filter.accept(&event) {
                    debug!(event_id = %event.id, "event rejected by filter");
                    self.metrics.record_excluded();
                    return Ok(());
                }
            }
        }

        if self.is_excluded(&event) {
            debug!(event_id = %event.id, event_type = %event.event_type, "event excluded");
            self.metrics.record_excluded();
            return Ok(());
        }

        let event_type = event.event_type.clone();
        match runtime.event_tx.try_send(event) {
            Ok(()) => {
                self.metrics.record_enqueued(&event_type);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_queue_full();
                Err(EngineError::QueueFull { queue: "event" })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngineError::NotRunning),
        }
    }

    fn is_excluded(&self, event: &Event) -> bool {
        if self
            .config
            .excluded_event_types
            .contains(&event.event_type)
        {
            return true;
        }
        // a non-empty include set is a whitelist
        if !self.config.included_event_types.is_empty()
            && !self.config.included_event_types.contains(&event.event_type)
        {
            return true;
        }
        if !self.config.organizations.is_empty()
            && !self.config.organizations.contains(&event.organization)
        {
            return true;
        }
        false
    }

    /// Deep copy of the aggregated counters.
    pub async fn metrics(&self) -> EngineMetrics {
        self.metrics.snapshot()
    }

    /// Snapshot of in-flight execution ids to their records.
    pub async fn active_executions(&self) -> HashMap<Uuid, Execution> {
        self.active
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.record.clone()))
            .collect()
    }

    /// Cancel a running execution. The action loop aborts at its next
    /// suspension point and the record finishes as `cancelled`.
    pub async fn cancel_execution(&self, id: Uuid) -> EngineResult<()> {
        let active = self.active.read().await;
        match active.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                Ok(())
            }
            None => Err(EngineError::Validation(format!(
                "execution {id} is not active"
            ))),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

async fn match_worker(shared: Arc<WorkerShared>, rx: Arc<Mutex<mpsc::Receiver<Event>>>) {
    loop {
        let event = {
            let mut rx = rx.lock().await;
            tokio::select! {
                () = shared.shutdown.cancelled() => None,
                event = rx.recv() => event,
            }
        };
        let Some(event) = event else { break };
        // items dequeued in the same instant as shutdown are abandoned
        if shared.shutdown.is_cancelled() {
            break;
        }
        process_event(&shared, event).await;
    }
    debug!("match worker exiting");
}

/// Match one event against its organization's rules and dispatch tasks for
/// the matches, in evaluation order.
async fn process_event(shared: &WorkerShared, event: Event) {
    let rules = match shared.registry.list_rules(&event.organization).await {
        Ok(rules) => rules,
        Err(e) => {
            error!(organization = %event.organization, error = %e, "failed to load rules");
            return;
        }
    };

    let ctx = ExecutionContext::from_event(&event, shared.config.environment.as_str());
    let mut evaluated = 0u64;

    for rule in rules.into_iter().filter(|r| r.enabled) {
        evaluated += 1;
        let outcome = shared.registry.evaluate(&rule, &event, &ctx);
        for err in &outcome.errors {
            warn!(rule_name = %rule.name, error = %err, "condition evaluation error");
            shared.metrics.record_evaluation_error();
        }
        if !outcome.matched {
            continue;
        }

        shared.metrics.record_rule_matched();
        debug!(rule_name = %rule.name, event_id = %event.id, "rule matched");

        let task = ExecutionTask {
            id: Uuid::new_v4(),
            rule: rule.clone(),
            context: ctx.clone(),
            retry: 0,
        };

        if shared.config.enable_async_execution {
            match shared.task_tx.try_send(task) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(task)) => {
                    shared.metrics.record_task_dropped();
                    warn!(
                        rule_name = %task.rule.name,
                        event_id = %event.id,
                        "task queue full, dropping task"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        } else {
            execute_task(shared, task).await;
        }
    }

    shared.metrics.record_rules_evaluated(evaluated);
}

async fn execute_worker(shared: Arc<WorkerShared>, rx: Arc<Mutex<mpsc::Receiver<ExecutionTask>>>) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                () = shared.shutdown.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else { break };
        if shared.shutdown.is_cancelled() {
            break;
        }
        execute_task(&shared, task).await;
    }
    debug!("execute worker exiting");
}

/// Run one task: register it active, execute the rule under the task
/// deadline, record the outcome, and schedule an engine-level retry when
/// the envelope allows.
async fn execute_task(shared: &WorkerShared, task: ExecutionTask) {
    // independent of the shutdown token: stop() drains running executions
    // instead of cancelling them
    let cancel = CancellationToken::new();

    let mut record = Execution::new(
        task.id,
        task.rule.id,
        TriggerType::Event,
        task.context.clone(),
    );
    if let Err(e) = record.transition(ExecutionStatus::Running) {
        error!(error = %e, "fresh execution could not start");
        return;
    }
    if task.retry > 0 {
        record
            .metadata
            .insert("retry".to_string(), task.retry.to_string());
    }

    shared.active.write().await.insert(
        task.id,
        ActiveExecution {
            record: record.clone(),
            cancel: cancel.clone(),
        },
    );

    let finished = match tokio::time::timeout(
        shared.config.execution_timeout(),
        shared.registry.execute(record.clone(), &task.rule, &cancel),
    )
    .await
    {
        Ok(execution) => execution,
        Err(_) => {
            let mut timed_out = record;
            if let Err(e) = timed_out.finish(
                ExecutionStatus::Timeout,
                Some("execution deadline elapsed".to_string()),
            ) {
                warn!(error = %e, "timeout transition failed");
            }
            shared.registry.save_execution(&timed_out).await;
            timed_out
        }
    };

    shared.active.write().await.remove(&task.id);
    shared.metrics.record_execution(&finished);

    let retryable = matches!(
        finished.status,
        ExecutionStatus::Failed | ExecutionStatus::Timeout
    );
    if retryable && task.retry < shared.config.max_retries {
        schedule_retry(shared, task);
    }
}

/// Re-enqueue a failed task after a linear backoff, from a detached timer
/// that respects shutdown.
fn schedule_retry(shared: &WorkerShared, task: ExecutionTask) {
    if shared.shutdown.is_cancelled() {
        debug!(task_id = %task.id, "shutting down, retry not scheduled");
        return;
    }

    let delay = task_retry_delay(
        TASK_RETRY_BASE,
        shared.config.retry_backoff_factor,
        task.retry,
    );
    let next = ExecutionTask {
        retry: task.retry + 1,
        ..task
    };
    debug!(
        task_id = %next.id,
        retry = next.retry,
        delay_ms = delay.as_millis() as u64,
        "scheduling task retry"
    );

    let task_tx = shared.task_tx.clone();
    let shutdown = shared.shutdown.clone();
    let metrics = shared.metrics.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(task_id = %next.id, "retry cancelled by shutdown");
            }
            () = tokio::time::sleep(delay) => {
                if let Err(mpsc::error::TrySendError::Full(_)) = task_tx.try_send(next) {
                    metrics.record_task_dropped();
                }
            }
        }
    });
}

/// Logs a metrics snapshot once per minute until shutdown.
async fn metrics_collector(shared: Arc<WorkerShared>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // consume the immediate first tick
    interval.tick().await;
    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            _ = interval.tick() => {
                let m = shared.metrics.snapshot();
                info!(
                    events_processed = m.events_processed,
                    events_dropped = m.events_dropped,
                    rules_evaluated = m.rules_evaluated,
                    rules_matched = m.rules_matched,
                    rules_executed = m.rules_executed,
                    execution_errors = m.execution_errors,
                    avg_execution_ms = m.average_execution_time.as_millis() as u64,
                    "engine metrics"
                );
            }
        }
    }
}
