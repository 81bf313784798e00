//! Configuration module.
//!
//! Handles engine settings loaded from TOML and environment variables.

mod settings;

pub use settings::{
    expand_env_vars, AggregationSettings, EngineSettings, FilteringSettings, GroupingSettings,
    MasterDetailSettings, OutputSettings, PivotSettings, SettingsError, SourceSettings,
    TreeDataSettings,
};
