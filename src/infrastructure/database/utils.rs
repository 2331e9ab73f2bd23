//! Row-mapping helpers.

use chrono::{DateTime, Utc};

use crate::domain::errors::{EngineError, EngineResult};

/// Parse an RFC 3339 timestamp stored as TEXT.
pub fn parse_datetime(s: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Store(format!("invalid timestamp '{s}': {e}")))
}
