//! SQLite implementation of the `RuleStore` port using sqlx.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    Execution, ExecutionStatus, Rule, RuleSet, RuleTemplate, TriggerType,
};
use crate::domain::ports::RuleStore;

use super::utils::parse_datetime;

/// SQLite-backed rule store.
pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_rule(row: &SqliteRow) -> EngineResult<Rule> {
        Ok(Rule {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            description: row.get("description"),
            organization: row.get("organization"),
            enabled: row.get::<i64, _>("enabled") != 0,
            priority: row.get::<i64, _>("priority") as i32,
            conditions: serde_json::from_str(&row.get::<String, _>("conditions"))?,
            actions: serde_json::from_str(&row.get::<String, _>("actions"))?,
            schedule: row.get("schedule"),
            metadata: serde_json::from_str(&row.get::<String, _>("metadata"))?,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
            created_by: row.get("created_by"),
            tags: serde_json::from_str(&row.get::<String, _>("tags"))?,
        })
    }

    fn row_to_rule_set(row: &SqliteRow) -> EngineResult<RuleSet> {
        Ok(RuleSet {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            description: row.get("description"),
            organization: row.get("organization"),
            enabled: row.get::<i64, _>("enabled") != 0,
            rule_ids: serde_json::from_str(&row.get::<String, _>("rule_ids"))?,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
        })
    }

    fn row_to_template(row: &SqliteRow) -> EngineResult<RuleTemplate> {
        Ok(RuleTemplate {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            description: row.get("description"),
            variables: serde_json::from_str(&row.get::<String, _>("variables"))?,
            rule: serde_json::from_str(&row.get::<String, _>("rule"))?,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
        })
    }

    fn row_to_execution(row: &SqliteRow) -> EngineResult<Execution> {
        let status = ExecutionStatus::from_str(&row.get::<String, _>("status"))
            .ok_or_else(|| EngineError::Store("unknown execution status".to_string()))?;
        let trigger_type: TriggerType =
            serde_json::from_value(serde_json::Value::String(row.get("trigger_type")))?;
        Ok(Execution {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            rule_id: parse_uuid(&row.get::<String, _>("rule_id"))?,
            trigger_event_id: row.get("trigger_event_id"),
            started_at: parse_datetime(&row.get::<String, _>("started_at"))?,
            completed_at: row
                .get::<Option<String>, _>("completed_at")
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            status,
            trigger_type,
            context: serde_json::from_str(&row.get::<String, _>("context"))?,
            actions: serde_json::from_str(&row.get::<String, _>("actions"))?,
            error: row.get("error"),
            duration: Duration::from_nanos(row.get::<i64, _>("duration_ns").max(0) as u64),
            metadata: serde_json::from_str(&row.get::<String, _>("metadata"))?,
        })
    }
}

fn parse_uuid(s: &str) -> EngineResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| EngineError::Store(format!("invalid uuid '{s}': {e}")))
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn create_rule(&self, rule: &Rule) -> EngineResult<()> {
        let id = rule.id.to_string();
        let conditions = serde_json::to_string(&rule.conditions)?;
        let actions = serde_json::to_string(&rule.actions)?;
        let metadata = serde_json::to_string(&rule.metadata)?;
        let tags = serde_json::to_string(&rule.tags)?;

        sqlx::query(
            "INSERT INTO rules (id, organization, name, description, enabled, priority, \
             conditions, actions, schedule, metadata, tags, created_at, updated_at, created_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&rule.organization)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(i64::from(rule.enabled))
        .bind(i64::from(rule.priority))
        .bind(&conditions)
        .bind(&actions)
        .bind(&rule.schedule)
        .bind(&metadata)
        .bind(&tags)
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .bind(&rule.created_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rule(&self, organization: &str, id: Uuid) -> EngineResult<Option<Rule>> {
        let row = sqlx::query("SELECT * FROM rules WHERE organization = ? AND id = ?")
            .bind(organization)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_rule).transpose()
    }

    async fn update_rule(&self, rule: &Rule) -> EngineResult<()> {
        let conditions = serde_json::to_string(&rule.conditions)?;
        let actions = serde_json::to_string(&rule.actions)?;
        let metadata = serde_json::to_string(&rule.metadata)?;
        let tags = serde_json::to_string(&rule.tags)?;

        let result = sqlx::query(
            "UPDATE rules SET name = ?, description = ?, enabled = ?, priority = ?, \
             conditions = ?, actions = ?, schedule = ?, metadata = ?, tags = ?, \
             updated_at = ?, created_by = ? WHERE organization = ? AND id = ?",
        )
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(i64::from(rule.enabled))
        .bind(i64::from(rule.priority))
        .bind(&conditions)
        .bind(&actions)
        .bind(&rule.schedule)
        .bind(&metadata)
        .bind(&tags)
        .bind(rule.updated_at.to_rfc3339())
        .bind(&rule.created_by)
        .bind(&rule.organization)
        .bind(rule.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RuleNotFound(rule.id));
        }
        Ok(())
    }

    async fn delete_rule(&self, organization: &str, id: Uuid) -> EngineResult<()> {
        let result = sqlx::query("DELETE FROM rules WHERE organization = ? AND id = ?")
            .bind(organization)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::RuleNotFound(id));
        }
        Ok(())
    }

    async fn list_rules(&self, organization: &str) -> EngineResult<Vec<Rule>> {
        let rows = sqlx::query(
            "SELECT * FROM rules WHERE organization = ? \
             ORDER BY priority DESC, created_at ASC",
        )
        .bind(organization)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn create_rule_set(&self, set: &RuleSet) -> EngineResult<()> {
        let rule_ids = serde_json::to_string(&set.rule_ids)?;
        sqlx::query(
            "INSERT OR REPLACE INTO rule_sets \
             (id, organization, name, description, enabled, rule_ids, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(set.id.to_string())
        .bind(&set.organization)
        .bind(&set.name)
        .bind(&set.description)
        .bind(i64::from(set.enabled))
        .bind(&rule_ids)
        .bind(set.created_at.to_rfc3339())
        .bind(set.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<Option<RuleSet>> {
        let row = sqlx::query("SELECT * FROM rule_sets WHERE organization = ? AND id = ?")
            .bind(organization)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_rule_set).transpose()
    }

    async fn update_rule_set(&self, set: &RuleSet) -> EngineResult<()> {
        let rule_ids = serde_json::to_string(&set.rule_ids)?;
        let result = sqlx::query(
            "UPDATE rule_sets SET name = ?, description = ?, enabled = ?, rule_ids = ?, \
             updated_at = ? WHERE organization = ? AND id = ?",
        )
        .bind(&set.name)
        .bind(&set.description)
        .bind(i64::from(set.enabled))
        .bind(&rule_ids)
        .bind(set.updated_at.to_rfc3339())
        .bind(&set.organization)
        .bind(set.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::RuleSetNotFound(set.id));
        }
        Ok(())
    }

    async fn delete_rule_set(&self, organization: &str, id: Uuid) -> EngineResult<()> {
        let result = sqlx::query("DELETE FROM rule_sets WHERE organization = ? AND id = ?")
            .bind(organization)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::RuleSetNotFound(id));
        }
        Ok(())
    }

    async fn list_rule_sets(&self, organization: &str) -> EngineResult<Vec<RuleSet>> {
        let rows =
            sqlx::query("SELECT * FROM rule_sets WHERE organization = ? ORDER BY created_at ASC")
                .bind(organization)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_rule_set).collect()
    }

    async fn create_template(&self, template: &RuleTemplate) -> EngineResult<()> {
        let variables = serde_json::to_string(&template.variables)?;
        let rule = serde_json::to_string(&template.rule)?;
        sqlx::query(
            "INSERT OR REPLACE INTO templates \
             (id, name, description, variables, rule, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(&template.description)
        .bind(&variables)
        .bind(&rule)
        .bind(template.created_at.to_rfc3339())
        .bind(template.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> EngineResult<Option<RuleTemplate>> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_template).transpose()
    }

    async fn delete_template(&self, id: Uuid) -> EngineResult<()> {
        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::TemplateNotFound(id));
        }
        Ok(())
    }

    async fn list_templates(&self) -> EngineResult<Vec<RuleTemplate>> {
        let rows = sqlx::query("SELECT * FROM templates ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_template).collect()
    }

    async fn save_execution(&self, execution: &Execution) -> EngineResult<()> {
        let context = serde_json::to_string(&execution.context)?;
        let actions = serde_json::to_string(&execution.actions)?;
        let metadata = serde_json::to_string(&execution.metadata)?;
        let trigger_type = serde_json::to_value(execution.trigger_type)?
            .as_str()
            .unwrap_or("event")
            .to_string();

        sqlx::query(
            "INSERT OR REPLACE INTO executions \
             (id, rule_id, trigger_event_id, status, trigger_type, started_at, completed_at, \
              context, actions, error, duration_ns, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id.to_string())
        .bind(execution.rule_id.to_string())
        .bind(&execution.trigger_event_id)
        .bind(execution.status.as_str())
        .bind(&trigger_type)
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .bind(&context)
        .bind(&actions)
        .bind(&execution.error)
        .bind(i64::try_from(execution.duration.as_nanos()).unwrap_or(i64::MAX))
        .bind(&metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn list_executions(&self, rule_id: Uuid, limit: usize) -> EngineResult<Vec<Execution>> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE rule_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(rule_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_execution).collect()
    }
}
