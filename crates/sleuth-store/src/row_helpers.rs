use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get a nullable column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    get(row, idx, table, column)
}

/// Decode a JSON text column into `T`, returning CorruptRow on failure.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Current time as fixed-width RFC 3339, so text ordering matches time ordering.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::events::EventType;
    use sleuth_core::plan::Plan;

    #[test]
    fn parse_enum_success() {
        let ty: EventType = parse_enum("step.findings", "events", "type").unwrap();
        assert_eq!(ty, EventType::StepFindings);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<EventType, _> = parse_enum("step.exploded", "events", "type");
        assert!(matches!(result, Err(StoreError::CorruptRow { table: "events", column: "type", .. })));
    }

    #[test]
    fn parse_json_into_plan() {
        let plan: Plan = parse_json(r#"{"steps": [{"step_id": 1, "intent": "x"}]}"#, "rounds", "plan_json").unwrap();
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<Plan, _> = parse_json("not valid json", "rounds", "plan_json");
        assert!(matches!(result, Err(StoreError::CorruptRow { table: "rounds", column: "plan_json", .. })));
    }

    #[test]
    fn parse_timestamp_roundtrip() {
        let now = now_timestamp();
        let parsed = parse_timestamp(&now, "events", "timestamp").unwrap();
        assert_eq!(parsed.to_rfc3339_opts(chrono::SecondsFormat::Micros, true), now);
        assert!(parse_timestamp("yesterday", "events", "timestamp").is_err());
    }
}
