//! Condition tree model.
//!
//! A `Conditions` node carries a set of leaf predicates (all AND-combined)
//! plus an optional logical combinator over sub-conditions. Sub-conditions
//! form a tree by construction: nodes own their children.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Combinator over a node's sub-conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
    #[serde(rename = "NOT")]
    Not,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
        }
    }
}

/// Comparison operator applied by a payload matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
    Empty,
    NotEmpty,
}

impl MatchOperator {
    /// Operators that never look at the matcher's value.
    pub fn is_presence_check(&self) -> bool {
        matches!(
            self,
            Self::Exists | Self::NotExists | Self::Empty | Self::NotEmpty
        )
    }
}

/// A single predicate over the event payload.
///
/// The path expression is a restricted subset: dotted field names and
/// numeric array indices (`pull_request.labels.0.name`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadMatcher {
    pub path: String,
    pub operator: MatchOperator,
    #[serde(default)]
    pub value: serde_json::Value,
    /// When false, string comparisons lower-case both sides.
    #[serde(default)]
    pub case_sensitive: bool,
}

/// Inclusive wall-clock window, `HH:MM` bounds. May wrap midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// A tree of boolean predicates over an event and evaluation context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    /// Event type allow set; empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,
    /// Event action allow set; empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// Glob patterns matched against the repository full name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repository_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_template: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branch_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_patterns: Vec<String>,
    /// Like `file_patterns` but also matches any parent directory of a
    /// changed file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// 0 = Sunday.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<u8>,
    /// 0-23.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hours_of_day: Vec<u8>,
    /// Weekday and 9 <= hour < 17 in the evaluation timezone.
    #[serde(default)]
    pub business_hours: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_matchers: Vec<PayloadMatcher>,
    /// Opaque key/value equality against context variables.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_filters: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_conditions: Vec<Conditions>,
}

impl Conditions {
    /// A node with no predicates and no combinator matches every event.
    pub fn is_empty(&self) -> bool {
        self.event_types.is_empty()
            && self.actions.is_empty()
            && self.organization.is_none()
            && self.repository.is_none()
            && self.sender.is_none()
            && self.repository_patterns.is_empty()
            && self.languages.is_empty()
            && self.topics.is_empty()
            && self.visibility.is_none()
            && self.is_archived.is_none()
            && self.is_template.is_none()
            && self.branch_patterns.is_empty()
            && self.file_patterns.is_empty()
            && self.path_patterns.is_empty()
            && self.time_range.is_none()
            && self.days_of_week.is_empty()
            && self.hours_of_day.is_empty()
            && !self.business_hours
            && self.payload_matchers.is_empty()
            && self.custom_filters.is_empty()
            && self.logical_operator.is_none()
            && self.sub_conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn logical_operator_serializes_uppercase() {
        assert_eq!(serde_json::to_value(LogicalOperator::And).unwrap(), "AND");
        assert_eq!(serde_json::to_value(LogicalOperator::Not).unwrap(), "NOT");
        let op: LogicalOperator = serde_json::from_value(json!("OR")).unwrap();
        assert_eq!(op, LogicalOperator::Or);
    }

    #[test]
    fn match_operator_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(MatchOperator::StartsWith).unwrap(),
            "starts_with"
        );
        assert_eq!(
            serde_json::to_value(MatchOperator::NotExists).unwrap(),
            "not_exists"
        );
    }

    #[test]
    fn empty_conditions_round_trip_to_empty_object() {
        let conds = Conditions::default();
        assert!(conds.is_empty());
        let json = serde_json::to_value(&conds).unwrap();
        assert_eq!(json, json!({ "business_hours": false }));
        let back: Conditions = serde_json::from_value(json!({})).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn nested_conditions_round_trip() {
        let conds = Conditions {
            event_types: vec!["push".to_string()],
            logical_operator: Some(LogicalOperator::Or),
            sub_conditions: vec![
                Conditions {
                    branch_patterns: vec!["main".to_string()],
                    ..Default::default()
                },
                Conditions {
                    branch_patterns: vec!["release/*".to_string()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let json = serde_json::to_string(&conds).unwrap();
        let back: Conditions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sub_conditions.len(), 2);
        assert_eq!(back.logical_operator, Some(LogicalOperator::Or));
    }
}
