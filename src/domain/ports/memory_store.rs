//! In-memory rule store.
//!
//! Backs tests and embedded deployments that do not want SQLite. Shares the
//! `RuleStore` contract with the database implementation, including the
//! evaluation ordering of `list_rules`.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Execution, Rule, RuleSet, RuleTemplate};

use super::rule_store::{sort_for_evaluation, RuleStore};

/// Process-local `RuleStore` over tokio-guarded maps.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<(String, Uuid), Rule>>,
    rule_sets: RwLock<HashMap<(String, Uuid), RuleSet>>,
    templates: RwLock<HashMap<Uuid, RuleTemplate>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored execution records (all rules).
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn create_rule(&self, rule: &Rule) -> EngineResult<()> {
        let mut rules = self.rules.write().await;
        let key = (rule.organization.clone(), rule.id);
        if rules.contains_key(&key) {
            return Err(EngineError::Store(format!(
                "rule {} already exists in {}",
                rule.id, rule.organization
            )));
        }
        rules.insert(key, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, organization: &str, id: Uuid) -> EngineResult<Option<Rule>> {
        let rules = self.rules.read().await;
        Ok(rules.get(&(organization.to_string(), id)).cloned())
    }

    async fn update_rule(&self, rule: &Rule) -> EngineResult<()> {
        let mut rules = self.rules.write().await;
        let key = (rule.organization.clone(), rule.id);
        if !rules.contains_key(&key) {
            return Err(EngineError::RuleNotFound(rule.id));
        }
        rules.insert(key, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, organization: &str, id: Uuid) -> EngineResult<()> {
        let mut rules = self.rules.write().await;
        rules
            .remove(&(organization.to_string(), id))
            .map(|_| ())
            .ok_or(EngineError::RuleNotFound(id))
    }

    async fn list_rules(&self, organization: &str) -> EngineResult<Vec<Rule>> {
        let rules = self.rules.read().await;
        let mut out: Vec<Rule> = rules
            .iter()
            .filter(|((org, _), _)| org == organization)
            .map(|(_, rule)| rule.clone())
            .collect();
        sort_for_evaluation(&mut out);
        Ok(out)
    }

    async fn create_rule_set(&self, set: &RuleSet) -> EngineResult<()> {
        let mut sets = self.rule_sets.write().await;
        sets.insert((set.organization.clone(), set.id), set.clone());
        Ok(())
    }

    async fn get_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<Option<RuleSet>> {
        let sets = self.rule_sets.read().await;
        Ok(sets.get(&(organization.to_string(), id)).cloned())
    }

    async fn update_rule_set(&self, set: &RuleSet) -> EngineResult<()> {
        let mut sets = self.rule_sets.write().await;
        let key = (set.organization.clone(), set.id);
        if !sets.contains_key(&key) {
            return Err(EngineError::RuleSetNotFound(set.id));
        }
        sets.insert(key, set.clone());
        Ok(())
    }

    async fn delete_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<()> {
        let mut sets = self.rule_sets.write().await;
        sets.remove(&(organization.to_string(), id))
            .map(|_| ())
            .ok_or(EngineError::RuleSetNotFound(id))
    }

    async fn list_rule_sets(&self, organization: &str) -> EngineResult<Vec<RuleSet>> {
        let sets = self.rule_sets.read().await;
        let mut out: Vec<RuleSet> = sets
            .iter()
            .filter(|((org, _), _)| org == organization)
            .map(|(_, set)| set.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn create_template(&self, template: &RuleTemplate) -> EngineResult<()> {
        let mut templates = self.templates.write().await;
        templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> EngineResult<Option<RuleTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates.get(&id).cloned())
    }

    async fn delete_template(&self, id: Uuid) -> EngineResult<()> {
        let mut templates = self.templates.write().await;
        templates
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::TemplateNotFound(id))
    }

    async fn list_templates(&self) -> EngineResult<Vec<RuleTemplate>> {
        let templates = self.templates.read().await;
        let mut out: Vec<RuleTemplate> = templates.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn save_execution(&self, execution: &Execution) -> EngineResult<()> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<Execution>> {
        let executions = self.executions.read().await;
        Ok(executions.get(&id).cloned())
    }

    async fn list_executions(&self, rule_id: Uuid, limit: usize) -> EngineResult<Vec<Execution>> {
        let executions = self.executions.read().await;
        let mut out: Vec<Execution> = executions
            .values()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rule_crud_round_trip() {
        let store = InMemoryRuleStore::new();
        let rule = Rule::new("r", "acme");
        store.create_rule(&rule).await.unwrap();

        // duplicate create is rejected
        assert!(store.create_rule(&rule).await.is_err());

        let fetched = store.get_rule("acme", rule.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "r");

        // org scoping
        assert!(store.get_rule("other", rule.id).await.unwrap().is_none());

        store.delete_rule("acme", rule.id).await.unwrap();
        assert!(store.get_rule("acme", rule.id).await.unwrap().is_none());
        assert!(store.delete_rule("acme", rule.id).await.is_err());
    }

    #[test]
    fn list_rules_orders_by_priority() {
        tokio_test::block_on(async {
            let store = InMemoryRuleStore::new();
            store
                .create_rule(&Rule::new("low", "acme").with_priority(1))
                .await
                .unwrap();
            store
                .create_rule(&Rule::new("high", "acme").with_priority(9))
                .await
                .unwrap();

            let rules = store.list_rules("acme").await.unwrap();
            assert_eq!(rules[0].name, "high");
            assert_eq!(rules[1].name, "low");
        });
    }
}
