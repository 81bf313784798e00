//! Shaping executed rows into the grid's `LoadSuccessParams`.

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::config::{MasterDetailSettings, OutputSettings};
use crate::exec::ResultSet;
use crate::planner::logical::QueryPlan;
use crate::value::Value;

/// Marker on group header rows.
pub const HAS_CHILDREN: &str = "hasChildren";

/// Alias of the master id projected by batched detail plans.
pub const MASTER_ID: &str = "__masterId";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSuccess {
    pub row_data: Vec<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pivot_result_fields: Option<Vec<String>>,
}

impl LoadSuccess {
    /// Build the grid response for rows produced by `plan`.
    pub fn from_rows(
        plan: &QueryPlan,
        rows: &ResultSet,
        row_count: Option<u64>,
        output: &OutputSettings,
    ) -> Self {
        let header = plan.group_level.is_some_and(|level| !level.leaf);

        let row_data = rows
            .rows
            .iter()
            .map(|values| {
                let mut object = row_object(&rows.columns, values, output);
                if header {
                    object.insert(HAS_CHILDREN.to_string(), Json::Bool(true));
                }
                Json::Object(object)
            })
            .collect();

        let pivot_result_fields =
            (!plan.pivot_result_fields.is_empty()).then(|| plan.pivot_result_fields.clone());

        Self {
            row_data,
            row_count,
            pivot_result_fields,
        }
    }

    /// Attach detail rows, read with a batched detail plan, to their master
    /// rows under `row_data_field`. Masters without details get an empty
    /// list. Ids match by their text form.
    pub fn attach_details(
        &mut self,
        details: &ResultSet,
        settings: &MasterDetailSettings,
        output: &OutputSettings,
    ) {
        let Some(id_column) = details.column(MASTER_ID) else {
            tracing::warn!("detail rows carry no master id, nothing attached");
            return;
        };
        let columns: Vec<String> = details
            .columns
            .iter()
            .filter(|c| *c != MASTER_ID)
            .cloned()
            .collect();

        let mut grouped: Vec<(String, Vec<Json>)> = vec![];
        for values in &details.rows {
            let id = values[id_column].to_string();
            let kept: Vec<Value> = values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id_column)
                .map(|(_, v)| v.clone())
                .collect();
            let row = Json::Object(row_object(&columns, &kept, output));
            match grouped.iter_mut().find(|(k, _)| *k == id) {
                Some((_, rows)) => rows.push(row),
                None => grouped.push((id, vec![row])),
            }
        }

        for master in &mut self.row_data {
            let Json::Object(object) = master else {
                continue;
            };
            let id = object
                .get(&settings.primary_field)
                .map(|raw| Value::from_json(raw).to_string());
            let rows = id
                .and_then(|id| grouped.iter().find(|(k, _)| *k == id))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default();
            object.insert(settings.row_data_field.clone(), Json::Array(rows));
        }
    }
}

fn row_object(columns: &[String], values: &[Value], output: &OutputSettings) -> Map<String, Json> {
    let mut object = Map::new();
    for (alias, value) in columns.iter().zip(values) {
        if output.suppress_field_dot_notation {
            object.insert(alias.clone(), value.to_json());
        } else {
            insert_dotted(&mut object, alias, value.to_json());
        }
    }
    object
}

/// `a.b.c = v` becomes `{"a": {"b": {"c": v}}}`. A path through a non-object
/// value replaces it.
fn insert_dotted(object: &mut Map<String, Json>, path: &str, value: Json) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = object
                .entry(head.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
            if !child.is_object() {
                *child = Json::Object(Map::new());
            }
            if let Json::Object(map) = child {
                insert_dotted(map, rest, value);
            }
        }
    }
}
