//! Condition evaluator.
//!
//! Decides whether an event matches a rule's condition tree under an
//! execution context. The evaluator is referentially transparent: identical
//! inputs always yield identical outputs. Time predicates evaluate against
//! the event's arrival time shifted into the configured fixed UTC offset,
//! never against the wall clock.

use chrono::{Datelike, FixedOffset, NaiveTime, Timelike};
use globset::Glob;
use regex::Regex;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::domain::models::{
    Conditions, Event, ExecutionContext, LogicalOperator, MatchOperator, PayloadMatcher,
    TimeRange,
};
use crate::services::payload;

/// Result of evaluating one rule's conditions against one event.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub matched: bool,
    pub duration: Duration,
    /// Evaluation errors (bad globs, regexes, paths). Any error forces a
    /// non-match for the rule but never halts evaluation of other rules.
    pub errors: Vec<String>,
}

/// One problem found by the validator.
#[derive(Debug, Clone)]
pub struct ConditionIssue {
    pub field: String,
    pub message: String,
    pub suggestion: String,
}

/// Validator output: malformed conditions are rejected before runtime.
#[derive(Debug, Clone)]
pub struct ConditionValidation {
    pub valid: bool,
    pub errors: Vec<ConditionIssue>,
    pub score: u8,
}

/// Pure evaluator over `(Conditions, Event, ExecutionContext)`.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    timezone: FixedOffset,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new(FixedOffset::east_opt(0).expect("zero offset is valid"))
    }
}

impl ConditionEvaluator {
    pub fn new(timezone: FixedOffset) -> Self {
        Self { timezone }
    }

    /// Build an evaluator from an offset in minutes east of UTC. Falls back
    /// to UTC when the offset is out of range.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes.saturating_mul(60))
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self::new(offset)
    }

    /// Evaluate a condition tree against an event.
    pub fn evaluate(
        &self,
        conditions: &Conditions,
        event: &Event,
        ctx: &ExecutionContext,
    ) -> EvalOutcome {
        let start = Instant::now();
        let mut errors = Vec::new();
        let matched = self.eval_node(conditions, event, ctx, &mut errors);
        EvalOutcome {
            // any evaluation error is a non-match for the whole rule
            matched: matched && errors.is_empty(),
            duration: start.elapsed(),
            errors,
        }
    }

    fn eval_node(
        &self,
        c: &Conditions,
        event: &Event,
        ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> bool {
        // Leaf predicates AND-combine with the combinator result; a false
        // leaf short-circuits the subtree.
        if !self.leaf_matches(c, event, ctx, errors) {
            return false;
        }

        match c.logical_operator {
            None => true,
            Some(LogicalOperator::And) => {
                for sub in &c.sub_conditions {
                    if !self.eval_node(sub, event, ctx, errors) {
                        return false;
                    }
                }
                true
            }
            Some(LogicalOperator::Or) => {
                for sub in &c.sub_conditions {
                    if self.eval_node(sub, event, ctx, errors) {
                        return true;
                    }
                }
                false
            }
            Some(LogicalOperator::Not) => match c.sub_conditions.first() {
                Some(first) => !self.eval_node(first, event, ctx, errors),
                None => {
                    errors.push("NOT combinator has no sub-condition".to_string());
                    false
                }
            },
        }
    }

    #[allow(clippy::too_many_lines)]
    fn leaf_matches(
        &self,
        c: &Conditions,
        event: &Event,
        ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> bool {
        if !c.event_types.is_empty() && !c.event_types.contains(&event.event_type) {
            return false;
        }
        if !c.actions.is_empty() {
            match &event.action {
                Some(action) if c.actions.contains(action) => {}
                _ => return false,
            }
        }
        if let Some(org) = &c.organization {
            if org != &event.organization {
                return false;
            }
        }
        if let Some(repo) = &c.repository {
            if event.repository.as_deref() != Some(repo.as_str()) {
                return false;
            }
        }
        if let Some(sender) = &c.sender {
            if event.sender.as_deref() != Some(sender.as_str()) {
                return false;
            }
        }

        if !c.repository_patterns.is_empty() {
            let repo_name = event
                .repository
                .clone()
                .or_else(|| ctx.repository.as_ref().map(|r| r.full_name.clone()));
            let Some(repo_name) = repo_name else {
                return false;
            };
            if !self.match_globs(&c.repository_patterns, &[repo_name], errors) {
                return false;
            }
        }

        // repository attribute filters need resolved repo info
        if !c.languages.is_empty() {
            let Some(lang) = ctx.repository.as_ref().and_then(|r| r.language.clone())
            else {
                return false;
            };
            if !c.languages.contains(&lang) {
                return false;
            }
        }
        if !c.topics.is_empty() {
            let Some(repo) = ctx.repository.as_ref() else {
                return false;
            };
            // every listed topic must be present on the repository
            if !c.topics.iter().all(|t| repo.topics.contains(t)) {
                return false;
            }
        }
        if let Some(visibility) = &c.visibility {
            let Some(repo) = ctx.repository.as_ref() else {
                return false;
            };
            if &repo.visibility != visibility {
                return false;
            }
        }
        if let Some(archived) = c.is_archived {
            let Some(repo) = ctx.repository.as_ref() else {
                return false;
            };
            if repo.is_archived != archived {
                return false;
            }
        }
        if let Some(template) = c.is_template {
            let Some(repo) = ctx.repository.as_ref() else {
                return false;
            };
            if repo.is_template != template {
                return false;
            }
        }

        if !c.branch_patterns.is_empty() {
            let Some(branch) = event.branch() else {
                return false;
            };
            if !self.match_globs(&c.branch_patterns, &[branch], errors) {
                return false;
            }
        }
        if !c.file_patterns.is_empty()
            && !self.match_globs(&c.file_patterns, &event.changed_files(), errors)
        {
            return false;
        }
        if !c.path_patterns.is_empty() {
            let files = event.changed_files();
            let mut candidates = files.clone();
            // a path pattern may also name a parent directory of a change
            for file in &files {
                let mut path = std::path::Path::new(file);
                while let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        candidates.push(parent.to_string_lossy().to_string());
                    }
                    path = parent;
                }
            }
            if !self.match_globs(&c.path_patterns, &candidates, errors) {
                return false;
            }
        }

        if !self.time_matches(c, event, errors) {
            return false;
        }

        for matcher in &c.payload_matchers {
            match self.match_payload(matcher, &event.payload) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    errors.push(e);
                    return false;
                }
            }
        }

        for (key, expected) in &c.custom_filters {
            if ctx.variables.get(key) != Some(expected) {
                return false;
            }
        }

        true
    }

    fn match_globs(
        &self,
        patterns: &[String],
        candidates: &[String],
        errors: &mut Vec<String>,
    ) -> bool {
        for pattern in patterns {
            let matcher = match Glob::new(pattern) {
                Ok(glob) => glob.compile_matcher(),
                Err(e) => {
                    errors.push(format!("invalid glob '{pattern}': {e}"));
                    return false;
                }
            };
            if candidates.iter().any(|c| matcher.is_match(c)) {
                return true;
            }
        }
        false
    }

    fn time_matches(&self, c: &Conditions, event: &Event, errors: &mut Vec<String>) -> bool {
        if c.time_range.is_none()
            && c.days_of_week.is_empty()
            && c.hours_of_day.is_empty()
            && !c.business_hours
        {
            return true;
        }

        let local = event.timestamp.with_timezone(&self.timezone);

        if let Some(range) = &c.time_range {
            match parse_time_range(range) {
                Ok((start, end)) => {
                    let t = local.time();
                    let inside = if start <= end {
                        t >= start && t <= end
                    } else {
                        // wraps midnight
                        t >= start || t <= end
                    };
                    if !inside {
                        return false;
                    }
                }
                Err(e) => {
                    errors.push(e);
                    return false;
                }
            }
        }

        let day = local.weekday().num_days_from_sunday() as u8;
        if !c.days_of_week.is_empty() && !c.days_of_week.contains(&day) {
            return false;
        }

        let hour = local.hour() as u8;
        if !c.hours_of_day.is_empty() && !c.hours_of_day.contains(&hour) {
            return false;
        }

        if c.business_hours {
            let weekday = (1..=5).contains(&day);
            if !(weekday && (9..17).contains(&hour)) {
                return false;
            }
        }

        true
    }

    fn match_payload(&self, m: &PayloadMatcher, payload: &Value) -> Result<bool, String> {
        let resolved = payload::resolve(payload, &m.path);

        match m.operator {
            MatchOperator::Exists => return Ok(resolved.is_some()),
            MatchOperator::NotExists => return Ok(resolved.is_none()),
            MatchOperator::Empty => {
                return Ok(resolved.is_none_or(payload::is_empty_value));
            }
            MatchOperator::NotEmpty => {
                return Ok(resolved.is_some_and(|v| !payload::is_empty_value(v)));
            }
            _ => {}
        }

        let Some(actual) = resolved else {
            return Ok(false);
        };

        let raw_actual = payload::value_to_string(actual);
        let raw_expected = payload::value_to_string(&m.value);
        let (actual_s, expected_s) = if m.case_sensitive {
            (raw_actual.clone(), raw_expected.clone())
        } else {
            (raw_actual.to_lowercase(), raw_expected.to_lowercase())
        };

        let result = match m.operator {
            MatchOperator::Equals => actual_s == expected_s,
            MatchOperator::NotEquals => actual_s != expected_s,
            MatchOperator::Contains => contains(actual, &actual_s, &expected_s, m.case_sensitive),
            MatchOperator::NotContains => {
                !contains(actual, &actual_s, &expected_s, m.case_sensitive)
            }
            MatchOperator::StartsWith => actual_s.starts_with(&expected_s),
            MatchOperator::EndsWith => actual_s.ends_with(&expected_s),
            MatchOperator::Regex => {
                let pattern = if m.case_sensitive {
                    raw_expected.clone()
                } else {
                    format!("(?i){raw_expected}")
                };
                let re = Regex::new(&pattern)
                    .map_err(|e| format!("invalid regex '{raw_expected}': {e}"))?;
                re.is_match(&raw_actual)
            }
            MatchOperator::GreaterThan | MatchOperator::LessThan => {
                let ordering =
                    match (payload::as_number(actual), payload::as_number(&m.value)) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => Some(actual_s.cmp(&expected_s)),
                    };
                match (m.operator, ordering) {
                    (MatchOperator::GreaterThan, Some(std::cmp::Ordering::Greater)) => true,
                    (MatchOperator::LessThan, Some(std::cmp::Ordering::Less)) => true,
                    _ => false,
                }
            }
            // presence checks handled above
            _ => unreachable!("presence operators return early"),
        };

        Ok(result)
    }

    /// Validate a condition tree without executing any predicate.
    pub fn validate(&self, conditions: &Conditions) -> ConditionValidation {
        let mut errors = Vec::new();
        self.validate_node(conditions, "conditions", &mut errors);
        let score = 100u8.saturating_sub((errors.len() as u8).saturating_mul(15));
        ConditionValidation {
            valid: errors.is_empty(),
            errors,
            score,
        }
    }

    fn validate_node(&self, c: &Conditions, field: &str, errors: &mut Vec<ConditionIssue>) {
        match c.logical_operator {
            Some(LogicalOperator::Not) if c.sub_conditions.len() != 1 => {
                errors.push(ConditionIssue {
                    field: format!("{field}.logical_operator"),
                    message: format!(
                        "NOT takes exactly one sub-condition, found {}",
                        c.sub_conditions.len()
                    ),
                    suggestion: "wrap additional clauses in an AND sub-condition".to_string(),
                });
            }
            Some(op) if c.sub_conditions.is_empty() => {
                errors.push(ConditionIssue {
                    field: format!("{field}.logical_operator"),
                    message: format!("{} combinator has no sub-conditions", op.as_str()),
                    suggestion: "add sub_conditions or remove the operator".to_string(),
                });
            }
            _ => {}
        }
        if c.logical_operator.is_none() && !c.sub_conditions.is_empty() {
            errors.push(ConditionIssue {
                field: format!("{field}.sub_conditions"),
                message: "sub-conditions present without a logical operator".to_string(),
                suggestion: "set logical_operator to AND, OR, or NOT".to_string(),
            });
        }

        for (name, patterns) in [
            ("repository_patterns", &c.repository_patterns),
            ("branch_patterns", &c.branch_patterns),
            ("file_patterns", &c.file_patterns),
            ("path_patterns", &c.path_patterns),
        ] {
            for pattern in patterns {
                if let Err(e) = Glob::new(pattern) {
                    errors.push(ConditionIssue {
                        field: format!("{field}.{name}"),
                        message: format!("invalid glob '{pattern}': {e}"),
                        suggestion: "use glob syntax such as 'release/*'".to_string(),
                    });
                }
            }
        }

        for (i, matcher) in c.payload_matchers.iter().enumerate() {
            let mfield = format!("{field}.payload_matchers[{i}]");
            if let Err(e) = payload::validate_path(&matcher.path) {
                errors.push(ConditionIssue {
                    field: format!("{mfield}.path"),
                    message: e,
                    suggestion: "use dotted names and numeric indices, e.g. \
                                 'pull_request.labels.0.name'"
                        .to_string(),
                });
            }
            if matcher.operator == MatchOperator::Regex {
                let pattern = payload::value_to_string(&matcher.value);
                if let Err(e) = Regex::new(&pattern) {
                    errors.push(ConditionIssue {
                        field: format!("{mfield}.value"),
                        message: format!("invalid regex: {e}"),
                        suggestion: String::new(),
                    });
                }
            }
            if !matcher.operator.is_presence_check() && matcher.value.is_null() {
                errors.push(ConditionIssue {
                    field: format!("{mfield}.value"),
                    message: format!(
                        "operator {:?} requires a comparison value",
                        matcher.operator
                    ),
                    suggestion: "set value, or use exists/empty operators".to_string(),
                });
            }
        }

        if let Some(range) = &c.time_range {
            if let Err(e) = parse_time_range(range) {
                errors.push(ConditionIssue {
                    field: format!("{field}.time_range"),
                    message: e,
                    suggestion: "use HH:MM bounds, e.g. 09:00-17:30".to_string(),
                });
            }
        }
        for day in &c.days_of_week {
            if *day > 6 {
                errors.push(ConditionIssue {
                    field: format!("{field}.days_of_week"),
                    message: format!("day {day} out of range"),
                    suggestion: "days are 0 (Sunday) through 6 (Saturday)".to_string(),
                });
            }
        }
        for hour in &c.hours_of_day {
            if *hour > 23 {
                errors.push(ConditionIssue {
                    field: format!("{field}.hours_of_day"),
                    message: format!("hour {hour} out of range"),
                    suggestion: "hours are 0 through 23".to_string(),
                });
            }
        }

        for (i, sub) in c.sub_conditions.iter().enumerate() {
            self.validate_node(sub, &format!("{field}.sub_conditions[{i}]"), errors);
        }
    }
}

fn parse_time_range(range: &TimeRange) -> Result<(NaiveTime, NaiveTime), String> {
    let start = NaiveTime::parse_from_str(&range.start, "%H:%M")
        .map_err(|e| format!("invalid time_range start '{}': {e}", range.start))?;
    let end = NaiveTime::parse_from_str(&range.end, "%H:%M")
        .map_err(|e| format!("invalid time_range end '{}': {e}", range.end))?;
    Ok((start, end))
}

fn contains(actual: &Value, actual_s: &str, expected_s: &str, case_sensitive: bool) -> bool {
    // arrays contain an element; strings contain a substring
    if let Value::Array(items) = actual {
        return items.iter().any(|item| {
            let s = payload::value_to_string(item);
            if case_sensitive {
                s == expected_s
            } else {
                s.to_lowercase() == expected_s
            }
        });
    }
    actual_s.contains(expected_s)
}
