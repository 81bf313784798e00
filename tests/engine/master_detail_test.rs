//! Master/detail: master rows from one table, detail rows from another.

use gridplan::config::EngineSettings;
use gridplan::error::EngineError;
use gridplan::exec::MemoryTable;
use gridplan::registry::{ColumnDefinition, ColumnRegistry, DataKind};
use gridplan::request::{ColumnVO, GetRowsRequest, SortModelItem};
use gridplan::rows::{LoadSuccess, MASTER_ID};
use gridplan::sql::test_utils::validate_sql;
use gridplan::sql::Dialect;
use gridplan::value::Value;
use gridplan::Engine;
use serde_json::json;

fn winners_registry() -> ColumnRegistry {
    ColumnRegistry::builder()
        .column(ColumnDefinition::new("id", DataKind::Number))
        .column(ColumnDefinition::new("athlete", DataKind::Text).filterable())
        .column(
            ColumnDefinition::new("country", DataKind::Text)
                .groupable()
                .pivotable(),
        )
        .build()
        .unwrap()
}

fn winners() -> MemoryTable {
    MemoryTable::from_json(
        "winners",
        &winners_registry(),
        &[
            json!({"id": 1, "athlete": "Michael Phelps", "country": "United States"}),
            json!({"id": 2, "athlete": "Ian Thorpe", "country": "Australia"}),
            json!({"id": 3, "athlete": "Ryan Lochte", "country": "United States"}),
        ],
    )
    .unwrap()
}

fn medals() -> MemoryTable {
    let registry = ColumnRegistry::builder()
        .column(ColumnDefinition::new("winnerId", DataKind::Number))
        .column(ColumnDefinition::new("event", DataKind::Text))
        .column(ColumnDefinition::new("medal", DataKind::Text))
        .build()
        .unwrap();
    MemoryTable::from_json(
        "medals",
        &registry,
        &[
            json!({"winnerId": 1, "event": "200m butterfly", "medal": "gold"}),
            json!({"winnerId": 2, "event": "400m freestyle", "medal": "gold"}),
            json!({"winnerId": 1, "event": "100m butterfly", "medal": "gold"}),
            json!({"winnerId": 2, "event": "200m freestyle", "medal": "silver"}),
        ],
    )
    .unwrap()
}

fn engine(configure: impl FnOnce(&mut EngineSettings)) -> Engine {
    let mut settings = EngineSettings::default();
    settings.source.table = "winners".into();
    let detail = &mut settings.master_detail;
    detail.enabled = true;
    detail.detail_table = "medals".into();
    detail.detail_master_id_field = "winnerId".into();
    detail.detail_columns = vec!["event".into(), "medal".into()];
    configure(&mut settings);
    Engine::builder(winners_registry())
        .settings(settings)
        .build()
        .unwrap()
}

#[test]
fn test_detail_rows_of_one_master() {
    let engine = engine(|_| {});
    let plan = engine
        .detail_plan(&json!({"id": 1, "athlete": "Michael Phelps"}))
        .unwrap();
    let sql = plan.to_sql(Dialect::Postgres);
    insta::assert_snapshot!(sql, @r#"
    SELECT
      "event",
      "medal"
    FROM "medals"
    WHERE "winnerId" = 1
    "#);
    validate_sql(&sql, Dialect::Postgres).unwrap();

    let rows = medals().execute(&plan).unwrap();
    assert_eq!(rows.columns, vec!["event", "medal"]);
    assert_eq!(
        rows.values("event"),
        vec![
            Value::Text("200m butterfly".into()),
            Value::Text("100m butterfly".into())
        ]
    );
}

#[test]
fn test_master_row_needs_primary_value() {
    let engine = engine(|_| {});
    for row in [json!({"athlete": "Ian Thorpe"}), json!({"id": null})] {
        assert!(matches!(
            engine.detail_plan(&row),
            Err(EngineError::MalformedRequest(msg)) if msg.contains("'id'")
        ));
    }
    assert!(matches!(
        engine.detail_plan(&json!({"id": "two"})),
        Err(EngineError::InvalidValue { .. })
    ));
}

#[test]
fn test_page_of_masters_gets_details_attached() {
    let engine = engine(|_| {});
    let req = GetRowsRequest {
        sort_model: vec![SortModelItem::asc("id")],
        ..Default::default()
    };
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let masters = winners().execute(&plan).unwrap();
    let mut load = LoadSuccess::from_rows(&plan, &masters, None, &engine.settings().output);

    let details_plan = engine.detail_rows_plan(&load.row_data).unwrap();
    let sql = details_plan.to_sql(Dialect::Postgres);
    assert!(sql.contains("\"winnerId\" AS \"__masterId\""), "SQL: {}", sql);
    assert!(sql.ends_with("WHERE \"winnerId\" IN (1, 2, 3)"), "SQL: {}", sql);
    validate_sql(&sql, Dialect::Postgres).unwrap();

    let details = medals().execute(&details_plan).unwrap();
    assert!(details.column(MASTER_ID).is_some());
    load.attach_details(&details, &engine.settings().master_detail, &engine.settings().output);

    assert_eq!(
        load.row_data[1]["detail"],
        json!([
            {"event": "400m freestyle", "medal": "gold"},
            {"event": "200m freestyle", "medal": "silver"}
        ])
    );
    assert_eq!(load.row_data[0]["detail"].as_array().map(Vec::len), Some(2));
    assert_eq!(load.row_data[2]["detail"], json!([]));
}

#[test]
fn test_custom_detail_field_and_schema() {
    let engine = engine(|s| {
        s.master_detail.row_data_field = "medals".into();
        s.master_detail.detail_schema = Some("games".into());
    });
    let plan = engine.detail_plan(&json!({"id": "2"})).unwrap();
    assert!(
        plan.to_sql(Dialect::TSql).contains("FROM [games].[medals]"),
        "SQL: {}",
        plan
    );

    let none = engine.detail_rows_plan(&[]).unwrap();
    assert!(none.to_string().contains("WHERE"), "SQL: {}", none);
}

#[test]
fn test_master_grid_never_pivots() {
    let engine = engine(|_| {});
    let req = GetRowsRequest {
        pivot_mode: true,
        pivot_cols: vec![ColumnVO::new("country")],
        ..Default::default()
    };
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    assert!(plan.pivot_result_fields.is_empty());
    assert_eq!(winners().execute(&plan).unwrap().len(), 3);
}

#[test]
fn test_master_rows_group_like_any_others() {
    let engine = engine(|_| {});
    let req = GetRowsRequest {
        row_group_cols: vec![ColumnVO::new("country")],
        group_keys: vec![json!("United States")],
        ..Default::default()
    };
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let rows = winners().execute(&plan).unwrap();
    assert_eq!(
        rows.values("athlete"),
        vec![
            Value::Text("Michael Phelps".into()),
            Value::Text("Ryan Lochte".into())
        ]
    );
}

#[test]
fn test_unknown_primary_field_fails_build() {
    let mut settings = EngineSettings::default();
    settings.master_detail.enabled = true;
    settings.master_detail.primary_field = "winner".into();
    settings.master_detail.detail_table = "medals".into();
    settings.master_detail.detail_master_id_field = "winnerId".into();
    settings.master_detail.detail_columns = vec!["medal".into()];
    let err = Engine::builder(winners_registry()).settings(settings).build().err();
    assert!(matches!(err, Some(EngineError::ColumnNotFound { field }) if field == "winner"));
}
