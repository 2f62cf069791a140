//! Pure data transformations behind the experiment-tracking views: logged and
//! registered model merging, run table CSV export, URL query-state encoding and
//! the small string/URI formatting helpers used across run pages.

pub mod csv;
pub mod format;
pub mod models;
pub mod plot_state;
pub mod source;
pub mod tags;
pub mod uri;

pub use csv::{
    collect_keys, csv_escape, merge_runs, run_infos_to_csv, table_to_csv, CsvExport, KeyValue, RunRow,
    CSV_CONTENT_TYPE, DEFAULT_EXPORT_FILE_NAME,
};
pub use format::{
    base_name, compare_by_step_and_timestamp, compare_experiments, curve_info_from_key, curve_key,
    drop_extension, format_duration, format_metric, format_timestamp, pluralize, truncate_string, CurveInfo,
    MetricPoint,
};
pub use models::{
    concat_and_group_by_key, logged_model_uri, logged_models_from_tags, merge_logged_and_registered_models,
    model_rank_tie_breakers, parse_logged_models, parse_mlmodel, rank_models, LoggedModel, MergedModel,
    MlModelMetadata, ModelSignature, ModelVersionInfo, RegisteredModelVersion,
};
pub use plot_state::{
    decode_metric_plot_state, decode_search_params, encode_metric_plot_state,
    encode_search_state, plot_layout_from_search, set_query_params, MetricPlotState,
};
pub use source::{
    format_source, git_commit_url, git_repo_url, parse_git_repo, render_source, render_version,
    GitHost, GitRepo, SourceLink, VersionLink, SHORT_COMMIT_LEN,
};
pub use tags::{visible_tag_keys, RunInfo, RunTag, RunTagKey, RunTags};
pub use uri::normalize;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("malformed tag {key}: {reason}")]
    MalformedTag { key: String, reason: String },
    #[error("metadata error: {0}")]
    Metadata(String),
}
