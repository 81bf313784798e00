//! Tree data: levels keyed by parent id, rollups over descendants.

use gridplan::config::EngineSettings;
use gridplan::error::EngineError;
use gridplan::exec::MemoryTable;
use gridplan::planner::ROW_COUNT;
use gridplan::registry::{ColumnDefinition, ColumnRegistry, DataKind};
use gridplan::request::{ColumnVO, GetRowsRequest, SortModelItem};
use gridplan::rows::{LoadSuccess, HAS_CHILDREN};
use gridplan::sql::test_utils::validate_sql;
use gridplan::sql::Dialect;
use gridplan::value::Value;
use gridplan::Engine;
use serde_json::json;

const TABLE: &str = "files";

fn registry() -> ColumnRegistry {
    ColumnRegistry::builder()
        .column(ColumnDefinition::new("id", DataKind::Number))
        .column(ColumnDefinition::new("parentId", DataKind::Number))
        .column(ColumnDefinition::new("path", DataKind::Text))
        .column(ColumnDefinition::new("name", DataKind::Text).filterable())
        .column(
            ColumnDefinition::new("size", DataKind::Number)
                .filterable()
                .aggregable(),
        )
        .build()
        .unwrap()
}

/// docs/{reports/{q1.pdf, q2.pdf}, notes.txt}, music/song.mp3, readme.md
fn table() -> MemoryTable {
    MemoryTable::from_json(
        TABLE,
        &registry(),
        &[
            json!({"id": 1, "parentId": null, "path": "1", "name": "docs", "size": null}),
            json!({"id": 2, "parentId": 1, "path": "1/2", "name": "reports", "size": null}),
            json!({"id": 3, "parentId": 2, "path": "1/2/3", "name": "q1.pdf", "size": 10}),
            json!({"id": 4, "parentId": 2, "path": "1/2/4", "name": "q2.pdf", "size": 20}),
            json!({"id": 5, "parentId": 1, "path": "1/5", "name": "notes.txt", "size": 5}),
            json!({"id": 6, "parentId": null, "path": "6", "name": "music", "size": null}),
            json!({"id": 7, "parentId": 6, "path": "6/7", "name": "song.mp3", "size": 40}),
            json!({"id": 8, "parentId": null, "path": "8", "name": "readme.md", "size": 1}),
        ],
    )
    .unwrap()
}

fn engine(configure: impl FnOnce(&mut EngineSettings)) -> Engine {
    let mut settings = EngineSettings::default();
    settings.source.table = TABLE.into();
    settings.tree_data.enabled = true;
    configure(&mut settings);
    Engine::builder(registry()).settings(settings).build().unwrap()
}

fn level(keys: &[i64]) -> GetRowsRequest {
    GetRowsRequest {
        value_cols: vec![ColumnVO::with_agg("size", "sum")],
        group_keys: keys.iter().map(|k| json!(k.to_string())).collect(),
        ..Default::default()
    }
}

fn names(engine: &Engine, req: &GetRowsRequest) -> Vec<Value> {
    let plan = engine.translate_without_pivot_values(req).unwrap();
    table().execute(&plan).unwrap().values("name")
}

fn text(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::Text(v.to_string())).collect()
}

#[test]
fn test_root_level_rolls_up_descendants() {
    let engine = engine(|_| {});
    let plan = engine.translate_without_pivot_values(&level(&[])).unwrap();
    let rows = table().execute(&plan).unwrap();

    assert_eq!(rows.values("name"), text(&["docs", "music", "readme.md"]));
    assert_eq!(
        rows.values("isServerSideGroup"),
        vec![Value::Bool(true), Value::Bool(true), Value::Bool(false)]
    );
    assert_eq!(
        rows.values("size"),
        vec![Value::Int(35), Value::Int(40), Value::Int(1)]
    );

    let count = table().execute(&engine.count_plan(&level(&[])).unwrap()).unwrap();
    assert_eq!(count.get(0, ROW_COUNT), Some(&Value::Int(3)));
}

#[test]
fn test_expanded_level_with_child_counts() {
    let engine = engine(|s| s.grouping.child_count_field = Some("childCount".into()));
    let plan = engine.translate_without_pivot_values(&level(&[1])).unwrap();
    let rows = table().execute(&plan).unwrap();

    assert_eq!(rows.values("name"), text(&["reports", "notes.txt"]));
    assert_eq!(rows.values("size"), vec![Value::Int(30), Value::Int(5)]);
    assert_eq!(rows.values("childCount"), vec![Value::Int(2), Value::Null]);

    let load = LoadSuccess::from_rows(&plan, &rows, None, &engine.settings().output);
    assert_eq!(load.row_data[0]["isServerSideGroup"], json!(true));
    assert!(load.row_data[0].get(HAS_CHILDREN).is_none());
}

#[test]
fn test_filter_keeps_ancestors_of_matches() {
    let engine = engine(|_| {});
    let mut req = level(&[]);
    req.filter_model = Some(json!({
        "name": {"filterType": "text", "type": "contains", "filter": "q2"}
    }));

    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.values("name"), text(&["docs"]));
    // only the matching descendant is rolled up
    assert_eq!(rows.values("size"), vec![Value::Int(20)]);

    req.group_keys = vec![json!("1")];
    assert_eq!(names(&engine, &req), text(&["reports"]));
    req.group_keys = vec![json!("1"), json!("2")];
    assert_eq!(names(&engine, &req), text(&["q2.pdf"]));

    let count = table().execute(&engine.count_plan(&req).unwrap()).unwrap();
    assert_eq!(count.get(0, ROW_COUNT), Some(&Value::Int(1)));
}

#[test]
fn test_filter_keeps_descendants_of_matches() {
    let engine = engine(|_| {});
    let mut req = level(&[1, 2]);
    req.filter_model = Some(json!({
        "name": {"filterType": "text", "type": "equals", "filter": "reports"}
    }));
    assert_eq!(names(&engine, &req), text(&["q1.pdf", "q2.pdf"]));

    req.group_keys = vec![];
    assert_eq!(names(&engine, &req), text(&["docs"]));
}

#[test]
fn test_deferred_filters_leave_rollups_whole() {
    let engine = engine(|s| s.grouping.suppress_agg_filtered_only = true);
    let mut req = level(&[]);
    req.filter_model = Some(json!({
        "name": {"filterType": "text", "type": "contains", "filter": "q2"}
    }));

    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let rows = table().execute(&plan).unwrap();
    assert_eq!(rows.values("name"), text(&["docs"]));
    assert_eq!(rows.values("size"), vec![Value::Int(35)]);
}

#[test]
fn test_sort_on_rolled_up_value() {
    let engine = engine(|_| {});
    let mut req = level(&[]);
    req.sort_model = vec![SortModelItem::desc("size")];
    req.end_row = Some(2);
    assert_eq!(names(&engine, &req), text(&["music", "docs"]));
}

#[test]
fn test_row_grouping_is_ignored() {
    let engine = engine(|_| {});
    let mut req = level(&[]);
    req.row_group_cols = vec![ColumnVO::new("name")];
    assert_eq!(names(&engine, &req), text(&["docs", "music", "readme.md"]));
}

#[test]
fn test_rendered_sql_is_correlated() {
    let engine = engine(|s| s.grouping.child_count_field = Some("childCount".into()));
    let mut req = level(&[1]);
    req.filter_model = Some(json!({
        "size": {"filterType": "number", "type": "greaterThan", "filter": 4}
    }));
    req.sort_model = vec![SortModelItem::asc("name")];
    let plan = engine.translate_without_pivot_values(&req).unwrap();

    let postgres = plan.to_sql(Dialect::Postgres);
    assert!(postgres.contains("FROM \"files\" AS \"src\""), "SQL: {}", postgres);
    assert!(postgres.contains("WHERE \"parentId\" = 1 AND ("), "SQL: {}", postgres);
    assert!(
        postgres.contains("EXISTS (SELECT 1 FROM \"files\" WHERE \"id\" = 1 AND \"size\" > 4)"),
        "SQL: {}",
        postgres
    );
    validate_sql(&postgres, Dialect::Postgres).unwrap();

    let tsql = plan.to_sql(Dialect::TSql);
    assert!(tsql.contains("FROM [files] AS [src]"), "SQL: {}", tsql);
    validate_sql(&tsql, Dialect::TSql).unwrap();
}

#[test]
fn test_bad_requests() {
    let engine = engine(|_| {});

    let mut req = level(&[]);
    req.group_keys = vec![json!("docs")];
    assert!(matches!(
        engine.validate(&req),
        Err(EngineError::InvalidValue { .. })
    ));

    let mut req = level(&[]);
    req.filter_model = Some(json!({"owner": {"filterType": "text", "type": "equals", "filter": "x"}}));
    assert!(matches!(
        engine.translate_without_pivot_values(&req),
        Err(EngineError::ColumnNotFound { field }) if field == "owner"
    ));
}
