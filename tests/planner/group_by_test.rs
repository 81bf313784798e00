//! Tests for row grouping, group expansion and count plans.

use gridplan::config::EngineSettings;
use gridplan::error::EngineError;
use gridplan::exec::MemoryTable;
use gridplan::planner::{GroupLevel, ROW_COUNT};
use gridplan::registry::{ColumnDefinition, ColumnRegistry, DataKind};
use gridplan::request::{ColumnVO, GetRowsRequest, SortModelItem};
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
        .column(
            ColumnDefinition::new("sport", DataKind::Text)
                .filterable()
                .groupable(),
        )
        .column(
            ColumnDefinition::new("year", DataKind::Number)
                .filterable()
                .groupable(),
        )
        .column(
            ColumnDefinition::new("gold", DataKind::Number)
                .filterable()
                .aggregable(),
        )
        .build()
        .unwrap()
}

fn engine(configure: impl FnOnce(&mut EngineSettings)) -> Engine {
    let mut settings = EngineSettings::default();
    settings.source.table = TABLE.into();
    configure(&mut settings);
    Engine::builder(registry()).settings(settings).build().unwrap()
}

fn table() -> MemoryTable {
    MemoryTable::from_json(
        TABLE,
        &registry(),
        &[
            json!({"athlete": "Michael Phelps", "age": 23, "country": "United States", "sport": "Swimming", "year": 2008, "gold": 8}),
            json!({"athlete": "Michael Phelps", "age": 19, "country": "United States", "sport": "Swimming", "year": 2004, "gold": 6}),
            json!({"athlete": "Natalie Coughlin", "age": 25, "country": "United States", "sport": "Swimming", "year": 2008, "gold": 1}),
            json!({"athlete": "Ian Thorpe", "age": 17, "country": "Australia", "sport": "Swimming", "year": 2000, "gold": 3}),
            json!({"athlete": "Aleksey Nemov", "age": 24, "country": "Russia", "sport": "Gymnastics", "year": 2000, "gold": 2}),
            json!({"athlete": "Cindy Klassen", "age": 26, "country": "Canada", "sport": "Speed Skating", "year": 2006, "gold": 1}),
            json!({"athlete": "Unlisted", "age": 30, "country": null, "sport": "Rowing", "year": 2008, "gold": 0}),
        ],
    )
    .unwrap()
}

fn grouped(keys: Vec<serde_json::Value>) -> GetRowsRequest {
    GetRowsRequest {
        row_group_cols: vec![
            ColumnVO::new("country"),
            ColumnVO::new("sport"),
            ColumnVO::new("year"),
        ],
        value_cols: vec![ColumnVO::with_agg("gold", "sum")],
        group_keys: keys,
        ..Default::default()
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

// =============================================================================
// Levels
// =============================================================================

#[test]
fn test_top_level_groups_by_first_column() {
    let engine = engine(|_| {});
    let plan = engine.translate_without_pivot_values(&grouped(vec![])).unwrap();

    assert_eq!(plan.group_level, Some(GroupLevel { depth: 0, leaf: false }));
    let sql = plan.to_sql(Dialect::DuckDb);
    insta::assert_snapshot!(sql, @r#"
    SELECT
      "country",
      SUM("gold") AS "gold"
    FROM "olympic_winners"
    GROUP BY "country"
    "#);
    validate_sql(&sql, Dialect::DuckDb).unwrap();

    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows.get(0, "gold"), Some(&Value::Int(15)));
}

#[test]
fn test_expanded_path_binds_keys_and_groups_next_level() {
    let engine = engine(|_| {});
    let req = grouped(vec![json!("United States"), json!("Swimming")]);
    let plan = engine.translate_without_pivot_values(&req).unwrap();

    let sql = plan.to_sql(Dialect::Postgres);
    assert!(
        sql.contains("WHERE \"country\" = 'United States' AND \"sport\" = 'Swimming'"),
        "SQL: {}",
        sql
    );
    assert!(
        sql.contains("GROUP BY \"country\", \"sport\", \"year\""),
        "SQL: {}",
        sql
    );
    validate_sql(&sql, Dialect::Postgres).unwrap();

    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.values("year"), vec![Value::Int(2008), Value::Int(2004)]);
    assert_eq!(rows.values("gold"), vec![Value::Int(9), Value::Int(6)]);
}

#[test]
fn test_full_path_returns_leaf_rows() {
    let engine = engine(|_| {});
    let req = grouped(vec![json!("United States"), json!("Swimming"), json!(2008)]);
    let plan = engine.translate_without_pivot_values(&req).unwrap();

    assert_eq!(plan.group_level, Some(GroupLevel { depth: 3, leaf: true }));
    assert!(plan.group_by.is_empty());
    assert_eq!(
        plan.projected_aliases().collect::<Vec<_>>(),
        vec!["athlete", "age", "gold"]
    );

    let rows = table().execute(&plan).unwrap();
    assert_eq!(
        rows.values("athlete"),
        vec![text("Michael Phelps"), text("Natalie Coughlin")]
    );
}

#[test]
fn test_string_key_is_coerced_to_column_kind() {
    let engine = engine(|_| {});
    let req = grouped(vec![json!("Australia"), json!("Swimming"), json!("2000")]);
    let sql = engine
        .translate_without_pivot_values(&req)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(sql.contains("\"year\" = 2000"), "SQL: {}", sql);

    let bad = grouped(vec![json!("Australia"), json!("Swimming"), json!("two thousand")]);
    assert!(matches!(
        engine.translate_without_pivot_values(&bad),
        Err(EngineError::InvalidValue { .. })
    ));
}

#[test]
fn test_null_key_binds_is_null() {
    let engine = engine(|_| {});
    let req = grouped(vec![json!(null)]);
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    assert!(sql.contains("WHERE \"country\" IS NULL"), "SQL: {}", sql);

    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.values("sport"), vec![text("Rowing")]);
}

#[test]
fn test_no_group_columns_returns_all_columns() {
    let engine = engine(|_| {});
    let req = GetRowsRequest {
        value_cols: vec![ColumnVO::with_agg("gold", "sum")],
        ..Default::default()
    };
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    assert_eq!(plan.group_level, None);
    assert_eq!(plan.projected_aliases().count(), registry().len());
    assert_eq!(table().execute(&plan).unwrap().len(), 7);
}

#[test]
fn test_invalid_grouping_requests() {
    let engine = engine(|_| {});

    let mut too_deep = grouped(vec![json!("a"), json!("b"), json!(1), json!(2)]);
    assert!(matches!(
        engine.translate_without_pivot_values(&too_deep),
        Err(EngineError::MalformedRequest(_))
    ));

    too_deep.group_keys.clear();
    too_deep.row_group_cols = vec![ColumnVO::new("athlete")];
    assert!(matches!(
        engine.translate_without_pivot_values(&too_deep),
        Err(EngineError::ColumnNotGroupable { ref field }) if field == "athlete"
    ));
}

// =============================================================================
// Child counts
// =============================================================================

#[test]
fn test_child_count_projected_after_group_columns() {
    let engine = engine(|s| s.grouping.child_count_field = Some("childCount".into()));
    let mut req = grouped(vec![]);
    req.sort_model = vec![SortModelItem::asc("country")];
    let plan = engine.translate_without_pivot_values(&req).unwrap();

    assert_eq!(
        plan.projected_aliases().collect::<Vec<_>>(),
        vec!["country", "childCount", "gold"]
    );
    assert_eq!(plan.child_count_alias.as_deref(), Some("childCount"));

    let rows = table().execute(&plan).unwrap();
    assert_eq!(
        rows.values("country"),
        vec![
            Value::Null,
            text("Australia"),
            text("Canada"),
            text("Russia"),
            text("United States")
        ]
    );
    assert_eq!(rows.get(4, "childCount"), Some(&Value::Int(3)));
}

#[test]
fn test_leaf_rows_have_no_child_count() {
    let engine = engine(|s| s.grouping.child_count_field = Some("childCount".into()));
    let req = grouped(vec![json!("Russia"), json!("Gymnastics"), json!(2000)]);
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    assert!(!plan.projected_aliases().any(|a| a == "childCount"));
}

// =============================================================================
// Count plans
// =============================================================================

#[test]
fn test_count_of_top_level_groups() {
    let engine = engine(|_| {});
    let plan = engine.count_plan(&grouped(vec![json!("United States")])).unwrap();

    let sql = plan.to_sql(Dialect::DuckDb);
    insta::assert_snapshot!(sql, @r#"
    SELECT
      COUNT(*) AS "rowCount"
    FROM (SELECT
      "country"
    FROM "olympic_winners"
    GROUP BY "country") AS "grouped"
    "#);
    validate_sql(&sql, Dialect::DuckDb).unwrap();

    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.get(0, ROW_COUNT), Some(&Value::Int(5)));
}

#[test]
fn test_count_of_child_groups_when_paginating() {
    let engine = engine(|s| s.grouping.paginate_child_rows = true);
    let plan = engine
        .count_plan(&grouped(vec![json!("United States"), json!("Swimming")]))
        .unwrap();

    let sql = plan.to_sql(Dialect::Postgres);
    assert!(
        sql.contains("GROUP BY \"country\", \"sport\", \"year\") AS \"grouped\""),
        "SQL: {}",
        sql
    );
    validate_sql(&sql, Dialect::Postgres).unwrap();

    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.get(0, ROW_COUNT), Some(&Value::Int(2)));
}

#[test]
fn test_count_of_leaf_rows() {
    let engine = engine(|_| {});
    let req = grouped(vec![json!("United States"), json!("Swimming"), json!(2008)]);
    let plan = engine.count_plan(&req).unwrap();
    assert!(plan.derived.is_none());
    assert_eq!(
        table().execute(&plan).unwrap().get(0, ROW_COUNT),
        Some(&Value::Int(2))
    );
}

#[test]
fn test_count_applies_group_aggregate_filters() {
    let engine = engine(|s| s.grouping.group_agg_filtering = true);
    let mut req = grouped(vec![]);
    req.filter_model = Some(json!({
        "gold": {"filterType": "number", "type": "greaterThanOrEqual", "filter": 3}
    }));

    let plan = engine.count_plan(&req).unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    assert!(sql.contains("HAVING SUM(\"gold\") >= 3)"), "SQL: {}", sql);
    assert!(sql.contains("FROM \"olympic_winners\" AS \"src\""), "SQL: {}", sql);
    validate_sql(&sql, Dialect::Postgres).unwrap();
    // Russia (2), Canada (1) and the null country (0) have no passing group or leaf.
    assert_eq!(
        table().execute(&plan).unwrap().get(0, ROW_COUNT),
        Some(&Value::Int(2))
    );
}

// =============================================================================
// Group aggregate filtering
// =============================================================================

#[test]
fn test_value_column_filter_placement() {
    let filter = json!({"gold": {"filterType": "number", "type": "greaterThan", "filter": 2}});
    let mut req = grouped(vec![]);
    req.filter_model = Some(filter);

    let per_row = engine(|_| {});
    let plan = per_row.translate_without_pivot_values(&req).unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    assert!(sql.contains("WHERE \"gold\" > 2"), "SQL: {}", sql);
    assert!(!sql.contains("HAVING"), "SQL: {}", sql);
    assert_eq!(
        table().execute(&plan).unwrap().values("country"),
        vec![text("United States"), text("Australia")]
    );

    let per_group = engine(|s| s.grouping.group_agg_filtering = true);
    let plan = per_group.translate_without_pivot_values(&req).unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    assert!(
        sql.contains(
            "WHERE EXISTS (SELECT 1 FROM \"olympic_winners\" WHERE \"country\" = \"src\".\"country\" AND \"gold\" > 2)"
        ),
        "SQL: {}",
        sql
    );
    assert!(
        sql.contains(
            "OR EXISTS (SELECT 1 FROM \"olympic_winners\" WHERE \"country\" = \"src\".\"country\" GROUP BY \"country\" HAVING SUM(\"gold\") > 2)"
        ),
        "SQL: {}",
        sql
    );
    assert_eq!(sql.matches("EXISTS").count(), 4, "SQL: {}", sql);
    assert!(!sql.contains("\nHAVING"), "SQL: {}", sql);
    validate_sql(&sql, Dialect::Postgres).unwrap();
    validate_sql(&plan.to_sql(Dialect::TSql), Dialect::TSql).unwrap();
    assert_eq!(
        table().execute(&plan).unwrap().values("country"),
        vec![text("United States"), text("Australia")]
    );
}

/// Sums per level: A 12 (A/X 7, A/Y 5), B 7 (one leaf of 7), C 7 (C/U 2,
/// C/V 5), D 1.
fn levels_table() -> MemoryTable {
    let row = |country: &str, sport: &str, year: i64, gold: i64| {
        json!({"athlete": format!("{}{}{}", country, sport, year), "age": 20,
               "country": country, "sport": sport, "year": year, "gold": gold})
    };
    MemoryTable::from_json(
        TABLE,
        &registry(),
        &[
            row("A", "X", 2000, 3),
            row("A", "X", 2004, 4),
            row("A", "Y", 2000, 5),
            row("B", "Z", 2000, 7),
            row("C", "U", 2000, 2),
            row("C", "V", 2004, 5),
            row("D", "W", 2000, 1),
        ],
    )
    .unwrap()
}

#[test]
fn test_group_aggregate_filter_checks_every_level() {
    let engine = engine(|s| s.grouping.group_agg_filtering = true);
    let request = |keys: Vec<serde_json::Value>| GetRowsRequest {
        row_group_cols: vec![ColumnVO::new("country"), ColumnVO::new("sport")],
        value_cols: vec![ColumnVO::with_agg("gold", "sum")],
        group_keys: keys,
        filter_model: Some(json!({"gold": {"filterType": "number", "type": "equals", "filter": 7}})),
        ..Default::default()
    };
    let table = levels_table();

    // A through its sport X, B through a leaf, C through its own total.
    let plan = engine.translate_without_pivot_values(&request(vec![])).unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    assert!(
        sql.contains(
            "GROUP BY \"country\", \"sport\" HAVING SUM(\"gold\") = 7"
        ),
        "SQL: {}",
        sql
    );
    validate_sql(&sql, Dialect::Postgres).unwrap();
    assert_eq!(
        table.execute(&plan).unwrap().values("country"),
        vec![text("A"), text("B"), text("C")]
    );

    let count = engine.count_plan(&request(vec![])).unwrap();
    assert_eq!(table.execute(&count).unwrap().get(0, ROW_COUNT), Some(&Value::Int(3)));

    // Under A only the passing sport remains; under C both do, as C passes.
    let plan = engine
        .translate_without_pivot_values(&request(vec![json!("A")]))
        .unwrap();
    assert_eq!(table.execute(&plan).unwrap().values("sport"), vec![text("X")]);
    let plan = engine
        .translate_without_pivot_values(&request(vec![json!("C")]))
        .unwrap();
    assert_eq!(
        table.execute(&plan).unwrap().values("sport"),
        vec![text("U"), text("V")]
    );
}

#[test]
fn test_group_aggregate_filtering_defers_other_filters() {
    let engine = engine(|s| s.grouping.group_agg_filtering = true);
    let mut req = grouped(vec![]);
    req.filter_model = Some(json!({"age": {"filterType": "number", "type": "lessThan", "filter": 20}}));

    let plan = engine.translate_without_pivot_values(&req).unwrap();
    assert!(!plan.to_sql(Dialect::Postgres).contains("\"age\""));
    assert_eq!(table().execute(&plan).unwrap().len(), 5);

    req.filter_model = Some(json!({
        "age": {"filterType": "number", "type": "lessThan", "filter": 20},
        "gold": {"filterType": "number", "type": "greaterThan", "filter": 2}
    }));
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    assert!(!sql.contains("\"age\""), "SQL: {}", sql);
    assert!(sql.contains("EXISTS"), "SQL: {}", sql);

    req.filter_model = Some(json!({
        "medal": {"filterType": "text", "type": "equals", "filter": "gold"},
        "gold": {"filterType": "number", "type": "greaterThan", "filter": 2}
    }));
    assert!(matches!(
        engine.translate_without_pivot_values(&req),
        Err(EngineError::ColumnNotFound { .. })
    ));
}

#[test]
fn test_suppressed_column_filters_wait_for_leaves() {
    let engine = engine(|s| s.grouping.suppress_agg_filtered_only = true);
    let mut req = grouped(vec![]);
    req.filter_model = Some(json!({"age": {"filterType": "number", "type": "lessThan", "filter": 20}}));

    let plan = engine.translate_without_pivot_values(&req).unwrap();
    assert_eq!(table().execute(&plan).unwrap().len(), 5);

    req.group_keys = vec![json!("United States"), json!("Swimming"), json!(2004)];
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.values("age"), vec![Value::Int(19)]);
}
