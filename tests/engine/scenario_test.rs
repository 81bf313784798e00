//! End-to-end scenarios: request JSON in, plan executed, grid rows out.

use gridplan::config::{EngineSettings, SettingsError};
use gridplan::error::{EngineError, EngineResult};
use gridplan::exec::MemoryTable;
use gridplan::planner::logical::{CompareOp, Predicate, ValueExpr};
use gridplan::planner::{FirstLastPolicy, ROW_COUNT};
use gridplan::registry::{ColumnDefinition, ColumnRegistry, DataKind};
use gridplan::request::{ColumnVO, GetRowsRequest};
use gridplan::rows::LoadSuccess;
use gridplan::sql::Dialect;
use gridplan::value::Value;
use gridplan::Engine;
use serde_json::json;

// =============================================================================
// Products
// =============================================================================

fn products() -> (Engine, MemoryTable) {
    let registry = ColumnRegistry::builder()
        .column(ColumnDefinition::new("product", DataKind::Text).groupable())
        .build()
        .unwrap();
    let table = MemoryTable::from_json(
        "sales",
        &registry,
        &[
            json!({"product": "A"}),
            json!({"product": "A"}),
            json!({"product": "B"}),
        ],
    )
    .unwrap();

    let mut settings = EngineSettings::default();
    settings.source.table = "sales".into();
    settings.grouping.child_count_field = Some("childCount".into());
    let engine = Engine::builder(registry).settings(settings).build().unwrap();
    (engine, table)
}

#[test]
fn test_product_groups_with_counts() {
    let (engine, table) = products();
    let req = GetRowsRequest::from_json(
        r#"{"rowGroupCols": [{"id": "product", "field": "product"}], "groupKeys": []}"#,
    )
    .unwrap();

    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let rows = table.execute(&plan).unwrap();
    assert_eq!(rows.values("product"), vec![Value::Text("A".into()), Value::Text("B".into())]);
    assert_eq!(rows.values("childCount"), vec![Value::Int(2), Value::Int(1)]);

    let count = table.execute(&engine.count_plan(&req).unwrap()).unwrap();
    let total = match count.get(0, ROW_COUNT) {
        Some(Value::Int(n)) => *n as u64,
        other => panic!("unexpected count {:?}", other),
    };

    let load = LoadSuccess::from_rows(&plan, &rows, Some(total), &engine.settings().output);
    assert_eq!(
        serde_json::to_value(&load).unwrap(),
        json!({
            "rowData": [
                {"product": "A", "childCount": 2, "hasChildren": true},
                {"product": "B", "childCount": 1, "hasChildren": true}
            ],
            "rowCount": 2
        })
    );
}

#[test]
fn test_expanded_product_returns_leaves() {
    let (engine, table) = products();
    let req = GetRowsRequest {
        row_group_cols: vec![ColumnVO::new("product")],
        group_keys: vec![json!("A")],
        ..Default::default()
    };
    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let rows = table.execute(&plan).unwrap();
    assert_eq!(rows.len(), 2);

    let load = LoadSuccess::from_rows(&plan, &rows, None, &engine.settings().output);
    assert!(load.row_data.iter().all(|r| r.get("hasChildren").is_none()));
}

// =============================================================================
// Olympic winners
// =============================================================================

const TABLE: &str = "olympic_winners";

fn registry() -> ColumnRegistry {
    ColumnRegistry::builder()
        .column(ColumnDefinition::new("athlete", DataKind::Text).filterable())
        .column(
            ColumnDefinition::new("country", DataKind::Text)
                .filterable()
                .groupable(),
        )
        .column(ColumnDefinition::new("year", DataKind::Number).filterable())
        .column(
            ColumnDefinition::new("gold", DataKind::Number)
                .filterable()
                .aggregable(),
        )
        .build()
        .unwrap()
}

fn table() -> MemoryTable {
    MemoryTable::from_json(
        TABLE,
        &registry(),
        &[
            json!({"athlete": "Michael Phelps", "country": "United States", "year": 2010, "gold": 8}),
            json!({"athlete": "Natalie Coughlin", "country": "United States", "year": 2006, "gold": 1}),
            json!({"athlete": "Ian Thorpe", "country": "Australia", "year": 2000, "gold": 3}),
            json!({"athlete": "Aleksey Nemov", "country": "Russia", "year": 2000, "gold": 2}),
        ],
    )
    .unwrap()
}

fn settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.source.table = TABLE.into();
    settings.source.dialect = Dialect::Postgres;
    settings.filtering.quick_filter_fields = vec!["athlete".into(), "country".into()];
    settings
}

fn min_gold(raw: &serde_json::Value) -> EngineResult<Predicate> {
    let Some(min) = raw.get("minGold").and_then(|v| v.as_i64()) else {
        return Err(EngineError::MalformedRequest(
            "externalFilter needs minGold".to_string(),
        ));
    };
    Ok(Predicate::compare(
        ValueExpr::column("gold"),
        CompareOp::Gte,
        ValueExpr::lit(Value::Int(min)),
    ))
}

fn engine() -> Engine {
    Engine::builder(registry())
        .settings(settings())
        .external_filter(min_gold)
        .build()
        .unwrap()
}

fn athletes(engine: &Engine, req: &GetRowsRequest) -> Vec<Value> {
    let plan = engine.translate_without_pivot_values(req).unwrap();
    table().execute(&plan).unwrap().values("athlete")
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

#[test]
fn test_year_greater_than() {
    let engine = engine();
    let req = GetRowsRequest::from_json(
        r#"{"filterModel": {"year": {"filterType": "number", "type": "greaterThan", "filter": 2005}}}"#,
    )
    .unwrap();

    let plan = engine.translate_without_pivot_values(&req).unwrap();
    let years = table().execute(&plan).unwrap().values("year");
    assert_eq!(years, vec![Value::Int(2010), Value::Int(2006)]);
}

#[test]
fn test_quick_filter_words_and_fields() {
    let engine = engine();
    let req = GetRowsRequest {
        quick_filter: Some("  united   phelps ".into()),
        ..Default::default()
    };
    let sql = engine
        .translate_without_pivot_values(&req)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(
        sql.contains("LOWER(\"country\") LIKE '%united%' ESCAPE '\\'"),
        "SQL: {}",
        sql
    );
    assert_eq!(athletes(&engine, &req), vec![text("Michael Phelps")]);

    let blank = GetRowsRequest {
        quick_filter: Some("   ".into()),
        ..Default::default()
    };
    assert_eq!(athletes(&engine, &blank).len(), 4);
}

#[test]
fn test_quick_filter_case_sensitive_and_matcher() {
    let mut settings = settings();
    settings.filtering.quick_filter_case_sensitive = true;
    let engine = Engine::builder(registry()).settings(settings).build().unwrap();
    let lower = GetRowsRequest {
        quick_filter: Some("phelps".into()),
        ..Default::default()
    };
    assert!(athletes(&engine, &lower).is_empty());

    let engine = Engine::builder(registry())
        .settings(self::settings())
        .quick_filter_matcher(|words: &[String]| {
            ValueExpr::column("country").eq_value(&Value::Text(words.join(" ")))
        })
        .build()
        .unwrap();
    let req = GetRowsRequest {
        quick_filter: Some("Australia".into()),
        ..Default::default()
    };
    assert_eq!(athletes(&engine, &req), vec![text("Ian Thorpe")]);
}

#[test]
fn test_quick_filter_parser_keeps_phrases() {
    let engine = Engine::builder(registry())
        .settings(settings())
        .quick_filter_parser(|input: &str| {
            input
                .split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect()
        })
        .build()
        .unwrap();

    let phrase = GetRowsRequest {
        quick_filter: Some("ian thorpe, australia".into()),
        ..Default::default()
    };
    assert_eq!(athletes(&engine, &phrase), vec![text("Ian Thorpe")]);

    let reversed = GetRowsRequest {
        quick_filter: Some("thorpe ian".into()),
        ..Default::default()
    };
    assert!(athletes(&engine, &reversed).is_empty());
    assert_eq!(athletes(&self::engine(), &reversed), vec![text("Ian Thorpe")]);
}

#[test]
fn test_quick_filter_text_formatter() {
    let mut settings = settings();
    settings.filtering.quick_filter_case_sensitive = true;
    let engine = Engine::builder(registry())
        .settings(settings)
        .quick_filter_text_formatter(|expr| ValueExpr::func("UPPER", vec![expr]))
        .build()
        .unwrap();
    let req = GetRowsRequest {
        quick_filter: Some("phelps".into()),
        ..Default::default()
    };

    let sql = engine
        .translate_without_pivot_values(&req)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(
        sql.contains("UPPER(\"athlete\") LIKE CONCAT('%', UPPER('phelps'), '%') ESCAPE '\\'"),
        "SQL: {}",
        sql
    );
    assert_eq!(athletes(&engine, &req), vec![text("Michael Phelps")]);
}

#[test]
fn test_quick_filter_fields_must_exist() {
    let mut settings = settings();
    settings.filtering.quick_filter_fields = vec!["coach".into()];
    assert!(matches!(
        Engine::builder(registry()).settings(settings).build(),
        Err(EngineError::ColumnNotFound { .. })
    ));
}

#[test]
fn test_external_filter_after_column_filters() {
    let engine = engine();
    let req = GetRowsRequest {
        filter_model: Some(json!({
            "year": {"filterType": "number", "type": "greaterThan", "filter": 2005}
        })),
        external_filter: Some(json!({"minGold": 3})),
        ..Default::default()
    };
    let sql = engine
        .translate_without_pivot_values(&req)
        .unwrap()
        .to_sql(Dialect::Postgres);
    assert!(sql.contains("WHERE \"year\" > 2005 AND \"gold\" >= 3"), "SQL: {}", sql);
    assert_eq!(athletes(&engine, &req), vec![text("Michael Phelps")]);

    let bad = GetRowsRequest {
        external_filter: Some(json!({"maxGold": 3})),
        ..Default::default()
    };
    assert!(matches!(
        engine.translate_without_pivot_values(&bad),
        Err(EngineError::MalformedRequest(_))
    ));
}

#[test]
fn test_external_filter_without_hook_is_ignored() {
    let engine = Engine::builder(registry()).settings(settings()).build().unwrap();
    let req = GetRowsRequest {
        external_filter: Some(json!({"minGold": 3})),
        ..Default::default()
    };
    assert_eq!(athletes(&engine, &req).len(), 4);
}

#[test]
fn test_validate_collects_problems_in_request_order() {
    let engine = engine();
    let req = GetRowsRequest::from_json(
        r#"{
            "startRow": 10,
            "endRow": 5,
            "rowGroupCols": [{"id": "country"}],
            "valueCols": [{"id": "athlete", "aggFunc": "sum"}],
            "filterModel": {"coach": {"filterType": "text", "type": "equals", "filter": "x"}},
            "sortModel": [{"colId": "medals", "sort": "asc"}]
        }"#,
    )
    .unwrap();

    let problems = engine.problems(&req);
    assert_eq!(problems.len(), 4, "{:?}", problems);
    assert!(matches!(problems[0], EngineError::MalformedRequest(_)));
    assert!(matches!(problems[1], EngineError::UnsupportedAggregation { .. }));
    assert!(matches!(problems[2], EngineError::ColumnNotFound { ref field } if field == "coach"));
    assert!(matches!(problems[3], EngineError::ColumnNotFound { ref field } if field == "medals"));

    assert!(matches!(engine.validate(&req), Err(EngineError::MalformedRequest(_))));
    assert!(engine.validate(&GetRowsRequest::default()).is_ok());
}

#[test]
fn test_request_json_errors() {
    assert!(matches!(
        GetRowsRequest::from_json("{\"startRow\": \"zero\"}"),
        Err(EngineError::Json(_))
    ));
}

#[test]
fn test_engine_is_shared_across_threads() {
    let engine = engine();
    let table = table();
    let counts: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = ["united", "thorpe", "nobody"]
            .into_iter()
            .map(|word| {
                let (engine, table) = (&engine, &table);
                s.spawn(move || {
                    let req = GetRowsRequest {
                        quick_filter: Some(word.to_string()),
                        ..Default::default()
                    };
                    let plan = engine.translate_without_pivot_values(&req).unwrap();
                    table.execute(&plan).unwrap().len()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(counts, vec![2, 1, 0]);
}

// =============================================================================
// Result shaping and settings
// =============================================================================

#[test]
fn test_dotted_fields_nest_in_row_data() {
    let registry = ColumnRegistry::builder()
        .column(ColumnDefinition::new("athlete", DataKind::Text))
        .column(ColumnDefinition::new("address.city", DataKind::Text))
        .build()
        .unwrap();
    let table = MemoryTable::from_json(
        "rows",
        &registry,
        &[json!({"athlete": "Ian Thorpe", "address.city": "Sydney"})],
    )
    .unwrap();
    let engine = Engine::builder(registry).build().unwrap();

    let plan = engine
        .translate_without_pivot_values(&GetRowsRequest::default())
        .unwrap();
    let rows = table.execute(&plan).unwrap();

    let mut output = engine.settings().output.clone();
    let load = LoadSuccess::from_rows(&plan, &rows, None, &output);
    assert_eq!(
        load.row_data,
        vec![json!({"athlete": "Ian Thorpe", "address": {"city": "Sydney"}})]
    );

    output.suppress_field_dot_notation = true;
    let load = LoadSuccess::from_rows(&plan, &rows, None, &output);
    assert_eq!(load.row_data[0]["address.city"], json!("Sydney"));
}

#[test]
fn test_settings_from_toml() {
    let settings = EngineSettings::from_toml_str(
        r#"
        [source]
        table = "olympic_winners"
        dialect = "postgres"

        [grouping]
        child_count_field = "childCount"

        [pivot]
        max_generated_columns = 50

        [aggregation]
        first_last = "omit"
        "#,
    )
    .unwrap();
    assert_eq!(settings.source.dialect, Dialect::Postgres);
    assert_eq!(settings.aggregation.first_last, FirstLastPolicy::Omit);
    assert_eq!(settings.pivot.result_field_separator, "_");
    assert_eq!(settings.pivot.max_generated_columns, Some(50));
    assert!(!settings.filtering.advanced_filter);

    let engine = Engine::builder(registry()).settings(settings).build().unwrap();
    let req = GetRowsRequest {
        row_group_cols: vec![ColumnVO::new("country")],
        value_cols: vec![ColumnVO::with_agg("gold", "sum")],
        ..Default::default()
    };
    let sql = engine.translate_without_pivot_values(&req).unwrap().to_string();
    assert!(sql.contains("COUNT(*) AS \"childCount\""), "SQL: {}", sql);

    assert!(matches!(
        EngineSettings::from_toml_str("[pivot]\nresult_field_separator = \"\""),
        Err(SettingsError::InvalidConfig(_))
    ));
    assert!(matches!(
        EngineSettings::from_toml_str("[source]\ndialect = \"oracle\""),
        Err(SettingsError::ParseError(_))
    ));

    let mut empty_table = EngineSettings::default();
    empty_table.source.table = " ".into();
    assert!(matches!(
        Engine::builder(registry()).settings(empty_table).build(),
        Err(EngineError::Settings(_))
    ));
}
