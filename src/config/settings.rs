//! TOML-based engine settings.
//!
//! Every section is optional; missing keys take their defaults. String values
//! support `${VAR}` / `$VAR` environment expansion through [`expand_env_vars`]
//! when resolved with [`EngineSettings::resolved_source`].
//!
//! Example configuration:
//! ```toml
//! [source]
//! table = "olympic_winners"
//! schema = "${GRID_SCHEMA}"
//! dialect = "postgres"
//!
//! [grouping]
//! paginate_child_rows = false
//! group_agg_filtering = true
//! child_count_field = "childCount"
//!
//! [pivot]
//! result_field_separator = "_"
//! max_generated_columns = 200
//!
//! [filtering]
//! quick_filter_fields = ["athlete", "country"]
//!
//! [aggregation]
//! first_last = "omit"
//!
//! [output]
//! suppress_field_dot_notation = false
//!
//! [tree_data]
//! enabled = false
//! primary_field = "id"
//! parent_id_field = "parentId"
//! data_path_field = "path"
//!
//! [master_detail]
//! enabled = false
//! primary_field = "id"
//! detail_table = "medals"
//! detail_master_id_field = "winnerId"
//! detail_columns = ["event", "medal"]
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::planner::aggregation::FirstLastPolicy;
use crate::sql::dialect::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    pub source: SourceSettings,
    pub grouping: GroupingSettings,
    pub pivot: PivotSettings,
    pub filtering: FilteringSettings,
    pub aggregation: AggregationSettings,
    pub output: OutputSettings,
    pub tree_data: TreeDataSettings,
    pub master_detail: MasterDetailSettings,
}

/// The table every plan reads from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSettings {
    pub table: String,
    pub schema: Option<String>,
    /// Dialect for diagnostic SQL and dialect-dependent aggregate support.
    pub dialect: Dialect,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            table: "rows".to_string(),
            schema: None,
            dialect: Dialect::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GroupingSettings {
    /// Count and paginate children of the first unexpanded level.
    pub paginate_child_rows: bool,
    /// Group rows are kept when a descendant leaf, or the aggregates of a
    /// group at any level, pass the value column filters. Implies
    /// `suppress_agg_filtered_only`.
    pub group_agg_filtering: bool,
    /// Column filters apply at leaf level only.
    pub suppress_agg_filtered_only: bool,
    /// Alias of the child count projected on group rows.
    pub child_count_field: Option<String>,
}

impl GroupingSettings {
    /// Whether column filters wait for the leaf level.
    pub fn defers_column_filters(&self) -> bool {
        self.suppress_agg_filtered_only || self.group_agg_filtering
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PivotSettings {
    pub result_field_separator: String,
    /// Upper bound on generated pivot value combinations.
    pub max_generated_columns: Option<usize>,
}

impl Default for PivotSettings {
    fn default() -> Self {
        Self {
            result_field_separator: "_".to_string(),
            max_generated_columns: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilteringSettings {
    /// Treat `filterModel` as an advanced filter tree.
    pub advanced_filter: bool,
    /// Columns searched by the quick filter.
    pub quick_filter_fields: Vec<String>,
    pub quick_filter_case_sensitive: bool,
    pub quick_filter_trim_input: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub first_last: FirstLastPolicy,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Keep dotted aliases flat instead of nesting them into objects.
    pub suppress_field_dot_notation: bool,
}

/// Rows form a hierarchy through a parent id column. The materialized path
/// column lists a row's ancestors' ids, then its own, joined by the
/// separator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TreeDataSettings {
    pub enabled: bool,
    pub primary_field: String,
    /// Null on root rows.
    pub parent_id_field: String,
    pub data_path_field: String,
    pub data_path_separator: String,
    /// Alias of the has-children flag projected on every row.
    pub is_server_side_group_field: String,
}

impl Default for TreeDataSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            primary_field: "id".to_string(),
            parent_id_field: "parentId".to_string(),
            data_path_field: "path".to_string(),
            data_path_separator: "/".to_string(),
            is_server_side_group_field: "isServerSideGroup".to_string(),
        }
    }
}

/// Master rows expand into detail rows read from a second table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MasterDetailSettings {
    pub enabled: bool,
    /// Master column identifying a master row.
    pub primary_field: String,
    pub detail_table: String,
    pub detail_schema: Option<String>,
    /// Detail column holding the master's primary value.
    pub detail_master_id_field: String,
    /// Projected detail columns, in order.
    pub detail_columns: Vec<String>,
    /// Key holding the detail rows on an attached master row.
    pub row_data_field: String,
}

impl Default for MasterDetailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            primary_field: "id".to_string(),
            detail_table: String::new(),
            detail_schema: None,
            detail_master_id_field: String::new(),
            detail_columns: vec![],
            row_data_field: "detail".to_string(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: EngineSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the file named by `GRIDPLAN_CONFIG`, then `./gridplan.toml`,
    /// falling back to defaults.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("GRIDPLAN_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("gridplan.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(EngineSettings::default())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.source.table.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "source.table must not be empty".to_string(),
            ));
        }
        if self.pivot.result_field_separator.is_empty() {
            return Err(SettingsError::InvalidConfig(
                "pivot.result_field_separator must not be empty".to_string(),
            ));
        }
        if self.pivot.max_generated_columns == Some(0) {
            return Err(SettingsError::InvalidConfig(
                "pivot.max_generated_columns must be at least 1".to_string(),
            ));
        }

        let tree = &self.tree_data;
        if tree.enabled {
            if self.master_detail.enabled {
                return Err(SettingsError::InvalidConfig(
                    "tree_data and master_detail cannot both be enabled".to_string(),
                ));
            }
            for (key, value) in [
                ("primary_field", &tree.primary_field),
                ("parent_id_field", &tree.parent_id_field),
                ("data_path_field", &tree.data_path_field),
                ("data_path_separator", &tree.data_path_separator),
                ("is_server_side_group_field", &tree.is_server_side_group_field),
            ] {
                if value.is_empty() {
                    return Err(SettingsError::InvalidConfig(format!(
                        "tree_data.{} must not be empty",
                        key
                    )));
                }
            }
        }

        let detail = &self.master_detail;
        if detail.enabled {
            for (key, value) in [
                ("primary_field", &detail.primary_field),
                ("detail_table", &detail.detail_table),
                ("detail_master_id_field", &detail.detail_master_id_field),
                ("row_data_field", &detail.row_data_field),
            ] {
                if value.trim().is_empty() {
                    return Err(SettingsError::InvalidConfig(format!(
                        "master_detail.{} must not be empty",
                        key
                    )));
                }
            }
            if detail.detail_columns.is_empty() {
                return Err(SettingsError::InvalidConfig(
                    "master_detail.detail_columns must name at least one column".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Table and schema with environment variables expanded.
    pub fn resolved_source(&self) -> Result<(String, Option<String>), SettingsError> {
        let table = expand_env_vars(&self.source.table)?;
        let schema = self
            .source
            .schema
            .as_deref()
            .map(expand_env_vars)
            .transpose()?;
        Ok((table, schema))
    }

    /// Detail table and schema with environment variables expanded.
    pub fn resolved_detail_source(&self) -> Result<(String, Option<String>), SettingsError> {
        let table = expand_env_vars(&self.master_detail.detail_table)?;
        let schema = self
            .master_detail
            .detail_schema
            .as_deref()
            .map(expand_env_vars)
            .transpose()?;
        Ok((table, schema))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            if var_name.is_empty() {
                // A lone '$' stays.
                result.push('$');
                continue;
            }
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name))?;
        result.push_str(&value);
    }

    Ok(result)
}
