//! Tests for advanced filter trees translated through the engine.

use gridplan::config::EngineSettings;
use gridplan::error::EngineError;
use gridplan::exec::MemoryTable;
use gridplan::registry::{ColumnDefinition, ColumnRegistry, DataKind};
use gridplan::request::{ColumnVO, GetRowsRequest};
use gridplan::sql::test_utils::validate_sql;
use gridplan::sql::Dialect;
use gridplan::value::Value;
use gridplan::Engine;
use serde_json::json;

const TABLE: &str = "olympic_winners";

fn registry() -> ColumnRegistry {
    ColumnRegistry::builder()
        .column(ColumnDefinition::new("athlete", DataKind::Text).filterable())
        .column(ColumnDefinition::new("age", DataKind::Number).filterable())
        .column(
            ColumnDefinition::new("country", DataKind::Text)
                .filterable()
                .groupable(),
        )
        .column(ColumnDefinition::new("date", DataKind::DateString).filterable())
        .column(ColumnDefinition::new("olympian", DataKind::Boolean).filterable())
        .column(ColumnDefinition::new("gold", DataKind::Number).aggregable())
        .build()
        .unwrap()
}

fn engine(configure: impl FnOnce(&mut EngineSettings)) -> Engine {
    let mut settings = EngineSettings::default();
    settings.source.table = TABLE.into();
    settings.filtering.advanced_filter = true;
    configure(&mut settings);
    Engine::builder(registry()).settings(settings).build().unwrap()
}

fn table() -> MemoryTable {
    MemoryTable::from_json(
        TABLE,
        &registry(),
        &[
            json!({"athlete": "Michael Phelps", "age": 23, "country": "United States", "date": "2008-08-24", "olympian": true, "gold": 8}),
            json!({"athlete": "Ian Thorpe", "age": 17, "country": "Australia", "date": "2000-10-01", "olympian": true, "gold": 3}),
            json!({"athlete": "Leisel Jones", "age": 22, "country": "Australia", "date": "2008-08-24", "olympian": false, "gold": 2}),
            json!({"athlete": "Kirsty Coventry", "age": 24, "country": "Zimbabwe", "date": "2008-08-24", "olympian": true, "gold": 1}),
        ],
    )
    .unwrap()
}

fn request(tree: serde_json::Value) -> GetRowsRequest {
    GetRowsRequest {
        filter_model: Some(tree),
        ..Default::default()
    }
}

fn athletes(engine: &Engine, request: &GetRowsRequest) -> Vec<Value> {
    let plan = engine.translate_without_pivot_values(request).unwrap();
    table().execute(&plan).unwrap().values("athlete")
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

#[test]
fn test_join_of_column_leaves() {
    let engine = engine(|_| {});
    let req = request(json!({
        "filterType": "join",
        "type": "AND",
        "conditions": [
            {"filterType": "text", "colId": "country", "type": "equals", "filter": "australia"},
            {"filterType": "number", "colId": "age", "type": "greaterThan", "filter": 20}
        ]
    }));

    let sql = engine
        .translate_without_pivot_values(&req)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(
        sql.contains("WHERE LOWER(\"country\") = 'australia' AND \"age\" > 20"),
        "SQL: {}",
        sql
    );
    validate_sql(&sql, Dialect::Postgres).unwrap();

    assert_eq!(athletes(&engine, &req), vec![text("Leisel Jones")]);
}

#[test]
fn test_nested_or_is_parenthesized() {
    let engine = engine(|_| {});
    let req = request(json!({
        "filterType": "join",
        "type": "AND",
        "conditions": [
            {
                "filterType": "join",
                "type": "OR",
                "conditions": [
                    {"filterType": "text", "colId": "athlete", "type": "startsWith", "filter": "ian"},
                    {"filterType": "text", "colId": "athlete", "type": "endsWith", "filter": "coventry"}
                ]
            },
            {"filterType": "boolean", "colId": "olympian", "type": "true"}
        ]
    }));

    let sql = engine
        .translate_without_pivot_values(&req)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(
        sql.contains("(LOWER(\"athlete\") LIKE 'ian%' ESCAPE '\\' OR LOWER(\"athlete\") LIKE '%coventry' ESCAPE '\\') AND \"olympian\" = true"),
        "SQL: {}",
        sql
    );
    validate_sql(&sql, Dialect::Postgres).unwrap();

    assert_eq!(
        athletes(&engine, &req),
        vec![text("Ian Thorpe"), text("Kirsty Coventry")]
    );
}

#[test]
fn test_date_string_leaf_compares_iso_text() {
    let engine = engine(|_| {});
    let req = request(json!({
        "filterType": "dateString",
        "colId": "date",
        "type": "lessThan",
        "filter": "2008-01-01"
    }));

    let sql = engine
        .translate_without_pivot_values(&req)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(sql.contains("\"date\" < '2008-01-01'"), "SQL: {}", sql);
    assert_eq!(athletes(&engine, &req), vec![text("Ian Thorpe")]);
}

#[test]
fn test_boolean_false_and_blank() {
    let engine = engine(|_| {});
    let req = request(json!({"filterType": "boolean", "colId": "olympian", "type": "false"}));
    assert_eq!(athletes(&engine, &req), vec![text("Leisel Jones")]);

    let req = request(json!({"filterType": "boolean", "colId": "olympian", "type": "blank"}));
    assert!(athletes(&engine, &req).is_empty());
}

#[test]
fn test_unknown_column_and_operator() {
    let engine = engine(|_| {});
    let req = request(json!({"filterType": "text", "colId": "coach", "type": "equals", "filter": "x"}));
    assert!(matches!(
        engine.translate_without_pivot_values(&req),
        Err(EngineError::ColumnNotFound { ref field }) if field == "coach"
    ));

    let req = request(json!({"filterType": "number", "colId": "age", "type": "between", "filter": 1}));
    assert!(matches!(
        engine.translate_without_pivot_values(&req),
        Err(EngineError::UnrecognizedFilter { .. })
    ));
}

#[test]
fn test_column_map_is_rejected_when_not_an_object_without_advanced() {
    let engine = engine(|s| s.filtering.advanced_filter = false);
    let req = request(json!([{"filterType": "text", "type": "equals", "filter": "x"}]));
    assert!(matches!(
        engine.translate_without_pivot_values(&req),
        Err(EngineError::MalformedRequest(_))
    ));
}

#[test]
fn test_suppressed_at_group_level_applied_at_leaves() {
    let engine = engine(|s| s.grouping.suppress_agg_filtered_only = true);
    let tree = json!({"filterType": "number", "colId": "age", "type": "lessThan", "filter": 20});

    let header = GetRowsRequest {
        row_group_cols: vec![ColumnVO::new("country")],
        value_cols: vec![ColumnVO::with_agg("gold", "sum")],
        filter_model: Some(tree.clone()),
        ..Default::default()
    };
    let plan = engine.translate_without_pivot_values(&header).unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    assert!(!sql.contains("WHERE"), "SQL: {}", sql);
    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.len(), 3);

    let leaves = GetRowsRequest {
        row_group_cols: vec![ColumnVO::new("country")],
        group_keys: vec![json!("Australia")],
        filter_model: Some(tree),
        ..Default::default()
    };
    assert_eq!(athletes(&engine, &leaves), vec![text("Ian Thorpe")]);
}
