//! Rule registry.
//!
//! CRUD over rules, rule sets, and templates; validation; a read-through
//! cache over the store; and the evaluate→execute pipeline that turns a
//! `(rule, event)` pair into a persisted execution record.
//!
//! Cache contract: writes update the store first, then the cache, so the
//! cache is always a subset of persisted rules. Cached rules are immutable
//! snapshots (`Arc<Rule>`); writers replace entries rather than mutating in
//! place.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    Action, ActionResult, ActionStatus, Event, Execution, ExecutionContext, ExecutionStatus,
    FailurePolicy, RetryPolicy, Rule, RuleSet, RuleTemplate, TriggerType,
};
use crate::domain::ports::{JsonMap, RuleStore};
use crate::services::evaluator::{ConditionEvaluator, EvalOutcome};
use crate::services::executors::ExecutorRegistry;
use crate::services::retry::{action_retry_delay, sleep_cancellable};

/// One problem found while validating a rule.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub suggestion: String,
}

/// Rule validation output with a 0-100 quality score.
#[derive(Debug, Clone)]
pub struct RuleValidation {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub score: u8,
}

/// Registry over a rule store, evaluator, and executor registry.
pub struct RuleRegistry {
    store: Arc<dyn RuleStore>,
    executors: Arc<ExecutorRegistry>,
    evaluator: ConditionEvaluator,
    cache: RwLock<HashMap<(String, Uuid), Arc<Rule>>>,
}

impl RuleRegistry {
    pub fn new(
        store: Arc<dyn RuleStore>,
        executors: Arc<ExecutorRegistry>,
        evaluator: ConditionEvaluator,
    ) -> Self {
        Self {
            store,
            executors,
            evaluator,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn evaluator(&self) -> &ConditionEvaluator {
        &self.evaluator
    }

    // ------------------------------------------------------------------
    // Rule CRUD
    // ------------------------------------------------------------------

    #[instrument(skip(self, rule), fields(rule_name = %rule.name, org = %rule.organization))]
    pub async fn create_rule(&self, mut rule: Rule) -> EngineResult<Rule> {
        let validation = self.validate_rule(&rule);
        if !validation.valid {
            return Err(EngineError::Validation(join_issues(&validation.errors)));
        }
        let now = Utc::now();
        rule.created_at = now;
        rule.updated_at = now;

        self.store.create_rule(&rule).await?;
        self.cache.write().await.insert(
            (rule.organization.clone(), rule.id),
            Arc::new(rule.clone()),
        );
        debug!(rule_id = %rule.id, "rule created");
        Ok(rule)
    }

    /// Read through the cache; misses fall through to the store and prime it.
    pub async fn get_rule(&self, organization: &str, id: Uuid) -> EngineResult<Arc<Rule>> {
        let key = (organization.to_string(), id);
        if let Some(rule) = self.cache.read().await.get(&key) {
            return Ok(rule.clone());
        }

        let rule = self
            .store
            .get_rule(organization, id)
            .await?
            .ok_or(EngineError::RuleNotFound(id))?;
        let rule = Arc::new(rule);
        self.cache.write().await.insert(key, rule.clone());
        Ok(rule)
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub async fn update_rule(&self, mut rule: Rule) -> EngineResult<Rule> {
        let validation = self.validate_rule(&rule);
        if !validation.valid {
            return Err(EngineError::Validation(join_issues(&validation.errors)));
        }
        rule.updated_at = Utc::now();
        rule.metadata.version += 1;

        self.store.update_rule(&rule).await?;
        self.cache.write().await.insert(
            (rule.organization.clone(), rule.id),
            Arc::new(rule.clone()),
        );
        Ok(rule)
    }

    /// Delete from the store; the cache entry goes only after the store
    /// confirms.
    pub async fn delete_rule(&self, organization: &str, id: Uuid) -> EngineResult<()> {
        self.store.delete_rule(organization, id).await?;
        self.cache
            .write()
            .await
            .remove(&(organization.to_string(), id));
        Ok(())
    }

    /// Rules of an organization in evaluation order (priority descending,
    /// creation ascending). Primes the cache.
    pub async fn list_rules(&self, organization: &str) -> EngineResult<Vec<Arc<Rule>>> {
        let rules = self.store.list_rules(organization).await?;
        let mut cache = self.cache.write().await;
        let mut out = Vec::with_capacity(rules.len());
        for rule in rules {
            let rule = Arc::new(rule);
            cache.insert((rule.organization.clone(), rule.id), rule.clone());
            out.push(rule);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Validate a rule and produce a quality score. Deductions: 25 for a
    /// missing name/organization/action list, 15 per condition error, 10
    /// per invalid action.
    pub fn validate_rule(&self, rule: &Rule) -> RuleValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut score: i32 = 100;

        if rule.name.trim().is_empty() {
            errors.push(ValidationIssue {
                field: "name".to_string(),
                message: "rule name is empty".to_string(),
                suggestion: "give the rule a descriptive name".to_string(),
            });
            score -= 25;
        }
        if rule.organization.trim().is_empty() {
            errors.push(ValidationIssue {
                field: "organization".to_string(),
                message: "organization is empty".to_string(),
                suggestion: "rules are scoped to an organization".to_string(),
            });
            score -= 25;
        }
        if rule.actions.is_empty() {
            errors.push(ValidationIssue {
                field: "actions".to_string(),
                message: "rule has no actions".to_string(),
                suggestion: "add at least one action".to_string(),
            });
            score -= 25;
        }
        if rule.actions.len() > 10 {
            warnings.push(format!(
                "rule has {} actions; consider splitting it",
                rule.actions.len()
            ));
        }

        let conditions = self.evaluator.validate(&rule.conditions);
        for issue in conditions.errors {
            errors.push(ValidationIssue {
                field: issue.field,
                message: issue.message,
                suggestion: issue.suggestion,
            });
            score -= 15;
        }

        for (i, action) in rule.actions.iter().enumerate() {
            if let Err(e) = self.executors.validate_action(action) {
                errors.push(ValidationIssue {
                    field: format!("actions[{i}]"),
                    message: e.to_string(),
                    suggestion: String::new(),
                });
                score -= 10;
            }
            if let FailurePolicy::Other(other) = &action.on_failure {
                warnings.push(format!(
                    "action '{}' has unknown failure policy '{other}'; it will behave as \
                     'continue'",
                    action.id
                ));
            }
        }

        RuleValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
            score: score.clamp(0, 100) as u8,
        }
    }

    // ------------------------------------------------------------------
    // Rule sets
    // ------------------------------------------------------------------

    pub async fn create_rule_set(&self, set: RuleSet) -> EngineResult<RuleSet> {
        if set.name.trim().is_empty() {
            return Err(EngineError::Validation("rule set name is empty".to_string()));
        }
        self.store.create_rule_set(&set).await?;
        Ok(set)
    }

    pub async fn get_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<RuleSet> {
        self.store
            .get_rule_set(organization, id)
            .await?
            .ok_or(EngineError::RuleSetNotFound(id))
    }

    pub async fn list_rule_sets(&self, organization: &str) -> EngineResult<Vec<RuleSet>> {
        self.store.list_rule_sets(organization).await
    }

    pub async fn delete_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<()> {
        self.store.delete_rule_set(organization, id).await
    }

    /// Enable or disable every member rule of a set, store first then cache.
    pub async fn set_rule_set_enabled(
        &self,
        organization: &str,
        id: Uuid,
        enabled: bool,
    ) -> EngineResult<()> {
        let mut set = self.get_rule_set(organization, id).await?;
        for rule_id in &set.rule_ids {
            let Some(mut rule) = self.store.get_rule(organization, *rule_id).await? else {
                warn!(rule_id = %rule_id, "rule set member missing, skipping");
                continue;
            };
            rule.enabled = enabled;
            rule.updated_at = Utc::now();
            self.store.update_rule(&rule).await?;
            self.cache
                .write()
                .await
                .insert((rule.organization.clone(), rule.id), Arc::new(rule));
        }
        set.enabled = enabled;
        set.updated_at = Utc::now();
        self.store.update_rule_set(&set).await
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub async fn create_template(&self, template: RuleTemplate) -> EngineResult<RuleTemplate> {
        if template.name.trim().is_empty() {
            return Err(EngineError::Validation("template name is empty".to_string()));
        }
        self.store.create_template(&template).await?;
        Ok(template)
    }

    pub async fn get_template(&self, id: Uuid) -> EngineResult<RuleTemplate> {
        self.store
            .get_template(id)
            .await?
            .ok_or(EngineError::TemplateNotFound(id))
    }

    pub async fn list_templates(&self) -> EngineResult<Vec<RuleTemplate>> {
        self.store.list_templates().await
    }

    pub async fn delete_template(&self, id: Uuid) -> EngineResult<()> {
        self.store.delete_template(id).await
    }

    /// Materialize a rule from a template and a variable map: required
    /// variables enforced, defaults seeded, `{{name}}` placeholders
    /// substituted textually through the rule body. The result must pass
    /// full validation; it is not persisted.
    pub async fn instantiate_template(
        &self,
        template_id: Uuid,
        variables: &HashMap<String, String>,
    ) -> EngineResult<Rule> {
        let template = self.get_template(template_id).await?;

        let mut resolved: HashMap<String, String> = HashMap::new();
        for var in &template.variables {
            match variables.get(&var.name).or(var.default.as_ref()) {
                Some(value) => {
                    resolved.insert(var.name.clone(), value.clone());
                }
                None if var.required => {
                    return Err(EngineError::Validation(format!(
                        "template variable '{}' is required",
                        var.name
                    )));
                }
                None => {}
            }
        }

        let mut body = serde_json::to_string(&template.rule)?;
        for (name, value) in &resolved {
            // escape the value for embedding inside JSON string literals
            let escaped = serde_json::to_string(value)?;
            let escaped = escaped.trim_matches('"');
            body = body.replace(&format!("{{{{{name}}}}}"), escaped);
        }
        if body.contains("{{") {
            return Err(EngineError::Validation(
                "template body has unresolved placeholders".to_string(),
            ));
        }

        let mut rule: Rule = serde_json::from_str(&body)?;
        rule.id = Uuid::new_v4();
        let now = Utc::now();
        rule.created_at = now;
        rule.updated_at = now;

        let validation = self.validate_rule(&rule);
        if !validation.valid {
            return Err(EngineError::Validation(join_issues(&validation.errors)));
        }
        Ok(rule)
    }

    // ------------------------------------------------------------------
    // Execution history
    // ------------------------------------------------------------------

    pub async fn get_execution(&self, id: Uuid) -> EngineResult<Option<Execution>> {
        self.store.get_execution(id).await
    }

    pub async fn list_executions(
        &self,
        rule_id: Uuid,
        limit: usize,
    ) -> EngineResult<Vec<Execution>> {
        self.store.list_executions(rule_id, limit).await
    }

    /// Persist an execution record. Store failures are logged, never
    /// propagated: an execution in flight must not fail on bookkeeping.
    pub async fn save_execution(&self, execution: &Execution) {
        if let Err(e) = self.store.save_execution(execution).await {
            warn!(execution_id = %execution.id, error = %e, "failed to persist execution");
        }
    }

    // ------------------------------------------------------------------
    // Evaluate → execute pipeline
    // ------------------------------------------------------------------

    /// Evaluate a rule's conditions against an event.
    pub fn evaluate(&self, rule: &Rule, event: &Event, ctx: &ExecutionContext) -> EvalOutcome {
        self.evaluator.evaluate(&rule.conditions, event, ctx)
    }

    /// Run a rule's actions under an execution record created by the
    /// caller (status `running`, already registered as active).
    ///
    /// Iterates enabled actions in declared order, applying each failure
    /// policy; `retry` enters the bounded backoff loop with the original
    /// context reused on every attempt. The final record is persisted and
    /// returned; store errors never fail the execution.
    pub async fn execute(
        &self,
        mut execution: Execution,
        rule: &Rule,
        cancel: &CancellationToken,
    ) -> Execution {
        self.save_execution(&execution).await;

        let ctx = execution.context.clone();
        let mut stop_error: Option<String> = None;
        let mut last_failed = false;
        let mut cancelled = false;

        for action in rule.actions.iter().filter(|a| a.enabled) {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let result = self.run_action(action, &ctx, cancel).await;
            last_failed = result.status == ActionStatus::Failed;
            let error = result.error.clone();
            execution.actions.push(result);

            if last_failed {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let policy = effective_policy(action);
                match policy {
                    // an exhausted retry loop propagates its error like stop
                    FailurePolicy::Stop | FailurePolicy::Retry => {
                        stop_error = error;
                        break;
                    }
                    FailurePolicy::Continue | FailurePolicy::Skip => {
                        debug!(
                            action_id = %action.id,
                            policy = policy.as_str(),
                            "action failed, continuing"
                        );
                    }
                    FailurePolicy::Other(_) => unreachable!("normalized by effective_policy"),
                }
            }
        }

        let (status, error) = if cancelled {
            (
                ExecutionStatus::Cancelled,
                Some("execution cancelled".to_string()),
            )
        } else if let Some(error) = stop_error {
            (ExecutionStatus::Failed, Some(error))
        } else if last_failed {
            // the final action's failure decides the outcome
            let error = execution.actions.last().and_then(|r| r.error.clone());
            (ExecutionStatus::Failed, error)
        } else {
            (ExecutionStatus::Completed, None)
        };

        if let Err(e) = execution.finish(status, error) {
            warn!(execution_id = %execution.id, error = %e, "invalid final transition");
        }
        self.save_execution(&execution).await;
        execution
    }

    /// Convenience wrapper that builds the execution record itself.
    pub async fn execute_rule(
        &self,
        rule: &Rule,
        trigger_type: TriggerType,
        ctx: ExecutionContext,
        cancel: &CancellationToken,
    ) -> Execution {
        let mut execution = Execution::new(Uuid::new_v4(), rule.id, trigger_type, ctx);
        if let Err(e) = execution.transition(ExecutionStatus::Running) {
            warn!(error = %e, "fresh execution could not start");
        }
        self.execute(execution, rule, cancel).await
    }

    /// Execute one action under its own timeout and retry envelope.
    ///
    /// `Ready → Executing → {Succeeded, Failed}`; a failure with retries
    /// left backs off `min(base·factor^k, cap)` and re-executes, the sleep
    /// raced against cancellation.
    async fn run_action(
        &self,
        action: &Action,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let started_at = Utc::now();
        let start = std::time::Instant::now();
        let retry_policy = action.retry_policy.clone().unwrap_or_default();
        let retries_allowed = matches!(effective_policy(action), FailurePolicy::Retry);

        let mut attempt: u32 = 0;
        let outcome = loop {
            match self.attempt_action(action, ctx, cancel).await {
                Ok(result) => break Ok(result),
                Err(e) => {
                    let cancelled = matches!(e, EngineError::Cancelled(_));
                    let retries_left =
                        retries_allowed && !cancelled && attempt < retry_policy.max_retries;
                    if !retries_left {
                        break Err(e);
                    }

                    let delay = action_retry_delay(&retry_policy, attempt);
                    debug!(
                        action_id = %action.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "action failed, backing off"
                    );
                    if !sleep_cancellable(delay, cancel).await {
                        // cancellation during backoff ends the loop with the
                        // last error wrapped
                        break Err(EngineError::Cancelled(e.to_string()));
                    }
                    attempt += 1;
                }
            }
        };

        let completed_at = Utc::now();
        match outcome {
            Ok(result) => ActionResult {
                action_id: action.id.clone(),
                action_type: action.action_type.clone(),
                status: ActionStatus::Completed,
                started_at,
                completed_at,
                duration: start.elapsed(),
                result,
                error: None,
                retry_count: attempt,
            },
            Err(e) => ActionResult {
                action_id: action.id.clone(),
                action_type: action.action_type.clone(),
                status: ActionStatus::Failed,
                started_at,
                completed_at,
                duration: start.elapsed(),
                result: JsonMap::new(),
                error: Some(e.to_string()),
                retry_count: attempt,
            },
        }
    }

    /// One attempt: dispatch to the strategy, raced against the action
    /// timeout and the ambient cancellation token.
    async fn attempt_action(
        &self,
        action: &Action,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> EngineResult<JsonMap> {
        let executor =
            self.executors
                .get(&action.action_type)
                .ok_or_else(|| EngineError::ActionFailure {
                    action_id: action.id.clone(),
                    message: format!("unknown action type '{}'", action.action_type),
                })?;

        let fut = executor.execute(action, ctx);
        tokio::select! {
            () = cancel.cancelled() => Err(EngineError::Cancelled(format!(
                "action {} interrupted", action.id
            ))),
            result = async {
                match action.timeout {
                    Some(timeout) => tokio::time::timeout(timeout, fut)
                        .await
                        .map_err(|_| EngineError::Timeout)?,
                    None => fut.await,
                }
            } => result,
        }
    }
}

/// Normalize the failure policy: unknown strings behave as `continue` with
/// a warning.
fn effective_policy(action: &Action) -> FailurePolicy {
    match &action.on_failure {
        FailurePolicy::Other(other) => {
            warn!(
                action_id = %action.id,
                policy = %other,
                "unknown failure policy, treating as continue"
            );
            FailurePolicy::Continue
        }
        policy => policy.clone(),
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ActionType;
    use crate::domain::ports::InMemoryRuleStore;
    use serde_json::json;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(
            Arc::new(InMemoryRuleStore::new()),
            Arc::new(ExecutorRegistry::local_only()),
            ConditionEvaluator::default(),
        )
    }

    fn notification_rule(name: &str) -> Rule {
        Rule::new(name, "acme").with_action(
            Action::new("a1", ActionType::Notification).with_parameter("message", json!("hi")),
        )
    }

    #[tokio::test]
    async fn create_rejects_invalid_rules() {
        let registry = registry();

        // no actions
        let err = registry.create_rule(Rule::new("r", "acme")).await;
        assert!(matches!(err, Err(EngineError::Validation(_))));

        // empty name
        let err = registry.create_rule(notification_rule("")).await;
        assert!(matches!(err, Err(EngineError::Validation(_))));

        registry
            .create_rule(notification_rule("valid"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn validation_scores_deduct_per_error_class() {
        let registry = registry();

        let good = notification_rule("good");
        let v = registry.validate_rule(&good);
        assert!(v.valid);
        assert_eq!(v.score, 100);
        assert!(v.warnings.is_empty());

        let mut bad = Rule::new("", "");
        bad.actions
            .push(Action::new("", ActionType::Notification));
        let v = registry.validate_rule(&bad);
        assert!(!v.valid);
        // 25 (name) + 25 (org) + 10 (bad action) = 60 deducted
        assert_eq!(v.score, 40);
    }

    #[tokio::test]
    async fn more_than_ten_actions_warns() {
        let registry = registry();
        let mut rule = Rule::new("many", "acme");
        for i in 0..11 {
            rule.actions.push(
                Action::new(format!("a{i}"), ActionType::Notification)
                    .with_parameter("message", json!("m")),
            );
        }
        let v = registry.validate_rule(&rule);
        assert!(v.valid);
        assert_eq!(v.warnings.len(), 1);
    }

    #[tokio::test]
    async fn cache_serves_reads_and_clears_on_delete() {
        let store = Arc::new(InMemoryRuleStore::new());
        let registry = RuleRegistry::new(
            store.clone(),
            Arc::new(ExecutorRegistry::local_only()),
            ConditionEvaluator::default(),
        );

        let rule = registry
            .create_rule(notification_rule("cached"))
            .await
            .unwrap();

        // remove behind the registry's back; the cache still serves it
        store.delete_rule("acme", rule.id).await.unwrap();
        assert!(registry.get_rule("acme", rule.id).await.is_ok());

        // a registry delete clears the cache entry too
        let rule2 = registry
            .create_rule(notification_rule("gone"))
            .await
            .unwrap();
        registry.delete_rule("acme", rule2.id).await.unwrap();
        assert!(matches!(
            registry.get_rule("acme", rule2.id).await,
            Err(EngineError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_bumps_version_and_replaces_cache_entry() {
        let registry = registry();
        let mut rule = registry
            .create_rule(notification_rule("v1"))
            .await
            .unwrap();
        assert_eq!(rule.metadata.version, 1);

        rule.description = "updated".to_string();
        let updated = registry.update_rule(rule.clone()).await.unwrap();
        assert_eq!(updated.metadata.version, 2);

        let cached = registry.get_rule("acme", rule.id).await.unwrap();
        assert_eq!(cached.description, "updated");
    }

    #[tokio::test]
    async fn template_instantiation_substitutes_and_validates() {
        let registry = registry();

        let body = Rule::new("{{team}} alerts", "{{org}}").with_action(
            Action::new("notify", ActionType::Notification)
                .with_parameter("message", json!("ping {{team}}")),
        );
        let template = RuleTemplate::new("alerts", body)
            .with_variable(crate::domain::models::TemplateVariable::required("org"))
            .with_variable(crate::domain::models::TemplateVariable::optional(
                "team", "platform",
            ));
        let template = registry.create_template(template).await.unwrap();

        // missing required variable
        let err = registry
            .instantiate_template(template.id, &HashMap::new())
            .await;
        assert!(matches!(err, Err(EngineError::Validation(_))));

        let vars: HashMap<String, String> =
            [("org".to_string(), "acme".to_string())].into();
        let rule = registry
            .instantiate_template(template.id, &vars)
            .await
            .unwrap();
        assert_eq!(rule.name, "platform alerts");
        assert_eq!(rule.organization, "acme");
        assert_eq!(
            rule.actions[0].param_str("message"),
            Some("ping platform")
        );
        assert_ne!(rule.id, template.rule.id);
    }

    #[tokio::test]
    async fn rule_set_toggle_flips_members() {
        let registry = registry();
        let r1 = registry
            .create_rule(notification_rule("one"))
            .await
            .unwrap();
        let r2 = registry
            .create_rule(notification_rule("two"))
            .await
            .unwrap();

        let mut set = RuleSet::new("bulk", "acme");
        set.rule_ids = vec![r1.id, r2.id];
        let set = registry.create_rule_set(set).await.unwrap();

        registry
            .set_rule_set_enabled("acme", set.id, false)
            .await
            .unwrap();
        assert!(!registry.get_rule("acme", r1.id).await.unwrap().enabled);
        assert!(!registry.get_rule("acme", r2.id).await.unwrap().enabled);

        registry
            .set_rule_set_enabled("acme", set.id, true)
            .await
            .unwrap();
        assert!(registry.get_rule("acme", r1.id).await.unwrap().enabled);
    }
}
