//! SQLite store round trips and the registry running on top of it.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hookflow::domain::models::{
    Action, ActionType, Conditions, ExecutionContext, ExecutionStatus, MatchOperator,
    PayloadMatcher, RetryPolicy, Rule, RuleSet, RuleTemplate, TemplateVariable, TriggerType,
};
use hookflow::domain::ports::RuleStore;
use hookflow::infrastructure::database::{DatabaseConnection, SqliteRuleStore};
use hookflow::services::registry::RuleRegistry;

use common::{push_event, push_rule, record_action, test_registry, RecordingExecutor};

async fn sqlite_store() -> (TempDir, Arc<SqliteRuleStore>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let conn = DatabaseConnection::new(&url, 5).await.expect("connect");
    (dir, Arc::new(SqliteRuleStore::new(conn.pool())))
}

fn rich_rule() -> Rule {
    let mut rule = Rule::new("deploy-gate", "acme")
        .with_description("gate deploys on label")
        .with_priority(25)
        .with_action(
            Action::new("notify", ActionType::Notification)
                .with_parameter("message", serde_json::json!("deploying ${repository}"))
                .with_timeout(Duration::from_secs(5))
                .with_retry_policy(RetryPolicy::default()),
        );
    rule.conditions = Conditions {
        event_types: vec!["pull_request".to_string()],
        actions: vec!["labeled".to_string()],
        branch_patterns: vec!["release/*".to_string()],
        payload_matchers: vec![PayloadMatcher {
            path: "label.name".to_string(),
            operator: MatchOperator::Equals,
            value: serde_json::json!("deploy"),
            case_sensitive: false,
        }],
        ..Default::default()
    };
    rule.tags = vec!["deploy".to_string(), "gate".to_string()];
    rule.created_by = "octocat".to_string();
    rule
}

#[tokio::test]
async fn rule_round_trip_preserves_every_field() {
    let (_dir, store) = sqlite_store().await;
    let rule = rich_rule();
    store.create_rule(&rule).await.unwrap();

    let loaded = store.get_rule("acme", rule.id).await.unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&loaded).unwrap(),
        serde_json::to_value(&rule).unwrap()
    );

    // wrong organization sees nothing
    assert!(store.get_rule("globex", rule.id).await.unwrap().is_none());
}

#[tokio::test]
async fn update_and_delete_report_missing_rules() {
    let (_dir, store) = sqlite_store().await;
    let mut rule = rich_rule();

    assert!(store.update_rule(&rule).await.is_err());
    store.create_rule(&rule).await.unwrap();

    rule.enabled = false;
    rule.priority = 99;
    store.update_rule(&rule).await.unwrap();
    let loaded = store.get_rule("acme", rule.id).await.unwrap().unwrap();
    assert!(!loaded.enabled);
    assert_eq!(loaded.priority, 99);

    store.delete_rule("acme", rule.id).await.unwrap();
    assert!(store.delete_rule("acme", rule.id).await.is_err());
}

#[tokio::test]
async fn list_rules_orders_by_priority_then_age() {
    let (_dir, store) = sqlite_store().await;

    let mut old_low = Rule::new("old-low", "acme").with_priority(10);
    old_low.actions.push(record_action("a"));
    let mut new_low = Rule::new("new-low", "acme").with_priority(10);
    new_low.actions.push(record_action("a"));
    new_low.created_at = old_low.created_at + chrono::Duration::seconds(5);
    let mut high = Rule::new("high", "acme").with_priority(50);
    high.actions.push(record_action("a"));

    store.create_rule(&new_low).await.unwrap();
    store.create_rule(&high).await.unwrap();
    store.create_rule(&old_low).await.unwrap();

    let names: Vec<String> = store
        .list_rules("acme")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["high", "old-low", "new-low"]);
}

#[tokio::test]
async fn rule_sets_round_trip() {
    let (_dir, store) = sqlite_store().await;
    let mut set = RuleSet::new("nightly", "acme");
    set.rule_ids = vec![uuid::Uuid::new_v4(), uuid::Uuid::new_v4()];
    store.create_rule_set(&set).await.unwrap();

    let loaded = store.get_rule_set("acme", set.id).await.unwrap().unwrap();
    assert_eq!(loaded.rule_ids, set.rule_ids);

    let listed = store.list_rule_sets("acme").await.unwrap();
    assert_eq!(listed.len(), 1);

    store.delete_rule_set("acme", set.id).await.unwrap();
    assert!(store.get_rule_set("acme", set.id).await.unwrap().is_none());
}

#[tokio::test]
async fn templates_round_trip() {
    let (_dir, store) = sqlite_store().await;
    let template = RuleTemplate::new("standard-alerts", rich_rule())
        .with_variable(TemplateVariable::required("org"))
        .with_variable(TemplateVariable::optional("channel", "#alerts"));
    store.create_template(&template).await.unwrap();

    let loaded = store.get_template(template.id).await.unwrap().unwrap();
    assert_eq!(loaded.variables.len(), 2);
    assert_eq!(loaded.rule.name, "deploy-gate");

    assert_eq!(store.list_templates().await.unwrap().len(), 1);
    store.delete_template(template.id).await.unwrap();
    assert!(store.delete_template(template.id).await.is_err());
}

#[tokio::test]
async fn executions_upsert_and_list_newest_first() {
    let (_dir, store) = sqlite_store().await;

    let event = push_event("acme");
    let ctx = ExecutionContext::from_event(&event, "test");
    let rule_id = uuid::Uuid::new_v4();

    let mut first = hookflow::domain::models::Execution::new(
        uuid::Uuid::new_v4(),
        rule_id,
        TriggerType::Event,
        ctx.clone(),
    );
    first.transition(ExecutionStatus::Running).unwrap();
    store.save_execution(&first).await.unwrap();

    // the final write for the same id wins
    first
        .finish(ExecutionStatus::Completed, None)
        .unwrap();
    store.save_execution(&first).await.unwrap();

    let mut second = hookflow::domain::models::Execution::new(
        uuid::Uuid::new_v4(),
        rule_id,
        TriggerType::Manual,
        ctx,
    );
    second.started_at = first.started_at + chrono::Duration::seconds(10);
    second.transition(ExecutionStatus::Running).unwrap();
    second
        .finish(ExecutionStatus::Failed, Some("boom".to_string()))
        .unwrap();
    store.save_execution(&second).await.unwrap();

    let loaded = store.get_execution(first.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.trigger_event_id, event.id);

    let listed = store.list_executions(rule_id, 10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[0].trigger_type, TriggerType::Manual);

    let limited = store.list_executions(rule_id, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn registry_pipeline_over_sqlite() {
    let (_dir, store) = sqlite_store().await;
    let recorder = RecordingExecutor::new();
    let registry: Arc<RuleRegistry> = test_registry(store.clone(), recorder.clone());

    let rule = registry
        .create_rule(push_rule("sqlite-backed", "acme", 5, record_action("a1")))
        .await
        .unwrap();

    let event = push_event("acme");
    let ctx = ExecutionContext::from_event(&event, "test");
    let outcome = registry.evaluate(&rule, &event, &ctx);
    assert!(outcome.matched);

    let cancel = CancellationToken::new();
    let execution = registry
        .execute_rule(&rule, TriggerType::Event, ctx, &cancel)
        .await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let history = registry.list_executions(rule.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].actions.len(), 1);
    assert_eq!(history[0].actions[0].action_id, "a1");

    // template flow end to end
    let template = registry
        .create_template(
            RuleTemplate::new(
                "templated",
                push_rule("{{name}}", "{{org}}", 1, record_action("t1")),
            )
            .with_variable(TemplateVariable::required("org"))
            .with_variable(TemplateVariable::optional("name", "templated-rule")),
        )
        .await
        .unwrap();

    let vars: HashMap<String, String> = [("org".to_string(), "acme".to_string())].into();
    let materialized = registry.instantiate_template(template.id, &vars).await.unwrap();
    assert_eq!(materialized.name, "templated-rule");
    let created = registry.create_rule(materialized).await.unwrap();
    assert!(store.get_rule("acme", created.id).await.unwrap().is_some());
}
