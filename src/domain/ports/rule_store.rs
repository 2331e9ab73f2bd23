//! Rule store port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::{Execution, Rule, RuleSet, RuleTemplate};

/// Persistence interface for rules, rule sets, templates, and executions.
///
/// Writers must honor the cache contract: the registry updates the store
/// first and its in-memory cache second, so implementations may assume a
/// successful return means the write is durable.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create_rule(&self, rule: &Rule) -> EngineResult<()>;

    async fn get_rule(&self, organization: &str, id: Uuid) -> EngineResult<Option<Rule>>;

    async fn update_rule(&self, rule: &Rule) -> EngineResult<()>;

    async fn delete_rule(&self, organization: &str, id: Uuid) -> EngineResult<()>;

    /// List the rules of an organization ordered by priority descending,
    /// ties broken by creation time ascending. This is the engine's
    /// evaluation order.
    async fn list_rules(&self, organization: &str) -> EngineResult<Vec<Rule>>;

    async fn create_rule_set(&self, set: &RuleSet) -> EngineResult<()>;

    async fn get_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<Option<RuleSet>>;

    async fn update_rule_set(&self, set: &RuleSet) -> EngineResult<()>;

    async fn delete_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<()>;

    async fn list_rule_sets(&self, organization: &str) -> EngineResult<Vec<RuleSet>>;

    async fn create_template(&self, template: &RuleTemplate) -> EngineResult<()>;

    async fn get_template(&self, id: Uuid) -> EngineResult<Option<RuleTemplate>>;

    async fn delete_template(&self, id: Uuid) -> EngineResult<()>;

    async fn list_templates(&self) -> EngineResult<Vec<RuleTemplate>>;

    /// Insert or update an execution record. Called on start and on final
    /// state; the final write wins.
    async fn save_execution(&self, execution: &Execution) -> EngineResult<()>;

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<Execution>>;

    /// Most recent executions of a rule, newest first.
    async fn list_executions(&self, rule_id: Uuid, limit: usize) -> EngineResult<Vec<Execution>>;
}

/// Sort rules into the engine's evaluation order: priority descending,
/// creation time ascending.
pub fn sort_for_evaluation(rules: &mut [Rule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}
