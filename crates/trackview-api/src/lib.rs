use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trackview_core::source::SHORT_COMMIT_LEN;
use trackview_core::uri::artifact_path_from_source;
use trackview_core::{
    collect_keys, decode_metric_plot_state, decode_search_params, encode_metric_plot_state,
    encode_search_state, format_duration, format_source, format_timestamp, git_repo_url,
    merge_logged_and_registered_models, merge_runs, model_rank_tie_breakers, normalize,
    parse_logged_models, parse_mlmodel, plot_layout_from_search, render_source, render_version,
    run_infos_to_csv, set_query_params, visible_tag_keys, CsvExport, LoggedModel, MergedModel,
    MetricPlotState, MlModelMetadata, ModelVersionInfo, RunRow, RunTagKey, RunTags, SourceLink,
    VersionLink, DEFAULT_EXPORT_FILE_NAME,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Behaviour switches shared by every entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    /// When false, registry versions are ignored and only logged models are listed.
    pub registry_enabled: bool,
    pub export_file_name: String,
    /// Commit labels are cut to this many characters; `None` keeps the full hash.
    pub short_commit_len: Option<usize>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            registry_enabled: true,
            export_file_name: DEFAULT_EXPORT_FILE_NAME.to_string(),
            short_commit_len: Some(SHORT_COMMIT_LEN),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggedModelsRequest {
    #[serde(default)]
    pub tags: RunTags,
}

/// Registry rows are kept as raw JSON and read one at a time, so a malformed
/// row drops only itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeModelsRequest {
    /// Run that owns the tags; when set, merged rows carry a `runs:/` model URI.
    #[serde(default)]
    pub run_uuid: String,
    #[serde(default)]
    pub tags: RunTags,
    #[serde(default)]
    pub model_versions: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeModelsResult {
    pub registry_enabled: bool,
    /// Registry rows dropped because they could not be read.
    pub skipped_versions: usize,
    pub tie_breakers: Vec<String>,
    pub models: Vec<MergedModel>,
}

/// Runs to export. Omitted key lists default to every param and metric key
/// seen across the runs and every visible tag key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunsCsvRequest {
    pub runs: Vec<RunRow>,
    #[serde(default)]
    pub param_keys: Option<Vec<String>>,
    #[serde(default)]
    pub metric_keys: Option<Vec<String>>,
    #[serde(default)]
    pub tag_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompareRunsRequest {
    pub runs: Vec<RunRow>,
}

/// Params and metrics of several runs pivoted by key, plus each run's start
/// time and duration for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunComparison {
    pub run_uuids: Vec<String>,
    pub start_times: BTreeMap<String, String>,
    pub durations: BTreeMap<String, String>,
    pub params: BTreeMap<String, BTreeMap<String, Value>>,
    pub metrics: BTreeMap<String, BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizeUrisRequest {
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedUri {
    pub input: String,
    pub normalized: String,
    pub artifact_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodePlotStateRequest {
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodePlotStateRequest {
    pub state: MetricPlotState,
    /// Page URL whose query is replaced by the encoded state.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// A query string (without `?`) and, when a base URL was given, that URL
/// with the query applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodedQuery {
    pub query: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodeSearchRequest {
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedSearch {
    pub params: BTreeMap<String, String>,
    pub plot_layout: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodeSearchRequest {
    /// `null` values are written as empty parameters.
    pub params: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescribeSourceRequest {
    #[serde(default)]
    pub run_uuid: String,
    #[serde(default)]
    pub tags: RunTags,
    /// Origin of the hosting workspace; notebook and job links hang off it.
    #[serde(default)]
    pub origin: Option<String>,
    /// Query carried onto notebook and job links.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDescription {
    pub run_display_name: String,
    pub source_type: String,
    pub source: String,
    pub source_link: SourceLink,
    pub repo_url: Option<String>,
    pub version: Option<VersionLink>,
    pub cluster_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackviewApi {
    config: ApiConfig,
}

impl TrackviewApi {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Logged models recorded in a run's tags. A malformed history tag is
    /// reported and treated as empty.
    #[must_use]
    pub fn logged_models(&self, request: &LoggedModelsRequest) -> Vec<LoggedModel> {
        let Some(raw) = request.tags.get(RunTagKey::LoggedModels) else {
            tracing::debug!("run has no logged model history");
            return Vec::new();
        };
        match parse_logged_models(raw) {
            Ok(models) => {
                tracing::debug!(count = models.len(), "extracted logged models");
                models
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable logged model history");
                Vec::new()
            }
        }
    }

    /// Logged models from the run's tags joined with registry versions, in display order.
    /// Registry rows that cannot be read are reported and left out.
    #[must_use]
    pub fn merge_models(&self, request: &MergeModelsRequest) -> MergeModelsResult {
        let logged = self.logged_models(&LoggedModelsRequest { tags: request.tags.clone() });
        let (versions, skipped_versions) = if self.config.registry_enabled {
            read_model_versions(&request.model_versions)
        } else {
            if !request.model_versions.is_empty() {
                tracing::debug!(
                    ignored = request.model_versions.len(),
                    "model registry disabled, ignoring registered versions"
                );
            }
            (Vec::new(), 0)
        };

        let orphans = versions
            .iter()
            .filter(|version| artifact_path_from_source(&version.source).is_none())
            .count();
        if orphans > 0 {
            tracing::warn!(orphans, "registered versions without an artifact path are listed unmerged");
        }

        let mut models = merge_logged_and_registered_models(&logged, &versions);
        if !request.run_uuid.is_empty() {
            models = models.into_iter().map(|model| model.with_run(&request.run_uuid)).collect();
        }

        MergeModelsResult {
            registry_enabled: self.config.registry_enabled,
            skipped_versions,
            tie_breakers: model_rank_tie_breakers(),
            models,
        }
    }

    /// Render the runs table as a CSV download.
    #[must_use]
    pub fn export_runs_csv(&self, request: &RunsCsvRequest) -> CsvExport {
        let (seen_params, seen_metrics) = collect_keys(&request.runs);
        let param_keys = request.param_keys.clone().unwrap_or(seen_params);
        let metric_keys = request.metric_keys.clone().unwrap_or(seen_metrics);
        let tag_keys = request.tag_keys.clone().unwrap_or_else(|| {
            let tags = request.runs.iter().map(|run| run.tags.clone()).collect::<Vec<_>>();
            visible_tag_keys(&tags)
        });

        let body = run_infos_to_csv(&request.runs, &param_keys, &metric_keys, &tag_keys);
        tracing::debug!(rows = request.runs.len(), bytes = body.len(), "rendered runs csv");
        CsvExport::new(self.config.export_file_name.clone(), request.runs.len(), body)
    }

    /// Params and metrics of `runs` side by side.
    #[must_use]
    pub fn compare_runs(&self, request: &CompareRunsRequest) -> RunComparison {
        let runs = &request.runs;
        let start_times = runs
            .iter()
            .map(|run| (run.info.run_uuid.clone(), format_timestamp(run.info.start_time)))
            .collect();
        let durations = runs
            .iter()
            .filter_map(|run| {
                let (start, end) = (run.info.start_time?, run.info.end_time?);
                Some((run.info.run_uuid.clone(), format_duration(end.saturating_sub(start))))
            })
            .collect();
        tracing::debug!(runs = runs.len(), "comparing runs");

        RunComparison {
            run_uuids: runs.iter().map(|run| run.info.run_uuid.clone()).collect(),
            start_times,
            durations,
            params: merge_runs(runs, |run| run.params.as_slice()),
            metrics: merge_runs(runs, |run| run.metrics.as_slice()),
        }
    }

    #[must_use]
    pub fn normalize_uris(&self, request: &NormalizeUrisRequest) -> Vec<NormalizedUri> {
        request
            .uris
            .iter()
            .map(|uri| NormalizedUri {
                input: uri.clone(),
                normalized: normalize(uri),
                artifact_path: artifact_path_from_source(uri),
            })
            .collect()
    }

    #[must_use]
    pub fn decode_plot_state(&self, request: &DecodePlotStateRequest) -> MetricPlotState {
        decode_metric_plot_state(&request.search)
    }

    /// Encode plot state as a query string, and into `base_url` when one is given.
    ///
    /// # Errors
    /// Returns an error when `base_url` is not an absolute URL.
    pub fn encode_plot_state(&self, request: &EncodePlotStateRequest) -> Result<EncodedQuery> {
        encoded_query(encode_metric_plot_state(&request.state), request.base_url.as_deref())
    }

    /// Every parameter of a query string, plus its `plot_layout` object.
    #[must_use]
    pub fn decode_search(&self, request: &DecodeSearchRequest) -> DecodedSearch {
        DecodedSearch {
            params: decode_search_params(&request.search),
            plot_layout: plot_layout_from_search(&request.search),
        }
    }

    /// Encode a flat parameter map as a query string, and into `base_url` when one is given.
    ///
    /// # Errors
    /// Returns an error when `base_url` is not an absolute URL.
    pub fn encode_search(&self, request: &EncodeSearchRequest) -> Result<EncodedQuery> {
        encoded_query(encode_search_state(&request.params), request.base_url.as_deref())
    }

    /// Describe where a run came from.
    ///
    /// # Errors
    /// Returns an error when `origin` is not an absolute URL.
    pub fn describe_source(&self, request: &DescribeSourceRequest) -> Result<SourceDescription> {
        let tags = &request.tags;
        let base_url = match request.origin.as_deref() {
            Some(origin) => set_query_params(origin, request.query.as_deref())
                .with_context(|| format!("failed to build source links from {origin}"))?,
            None => String::new(),
        };
        Ok(SourceDescription {
            run_display_name: tags.run_display_name(&request.run_uuid),
            source_type: tags.source_type().to_string(),
            source: format_source(tags),
            source_link: render_source(tags, &base_url, &request.run_uuid),
            repo_url: git_repo_url(tags.source_name()),
            version: render_version(tags, self.config.short_commit_len),
            cluster_id: tags.get(RunTagKey::ClusterId).map(str::to_string),
        })
    }

    /// Parse an `MLmodel` document.
    ///
    /// # Errors
    /// Returns an error when the document is not valid model metadata.
    pub fn model_metadata(&self, document: &str) -> Result<MlModelMetadata> {
        parse_mlmodel(document).context("failed to parse model metadata")
    }
}

fn encoded_query(query: String, base_url: Option<&str>) -> Result<EncodedQuery> {
    let url = base_url
        .map(|base_url| {
            set_query_params(base_url, Some(&query))
                .with_context(|| format!("failed to attach query to {base_url}"))
        })
        .transpose()?;
    Ok(EncodedQuery { query, url })
}

fn read_model_versions(entries: &[Value]) -> (Vec<ModelVersionInfo>, usize) {
    let mut versions = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for (index, entry) in entries.iter().enumerate() {
        match ModelVersionInfo::deserialize(entry) {
            Ok(version) => versions.push(version),
            Err(err) => {
                skipped += 1;
                tracing::warn!(index, error = %err, "skipping unreadable registered model version");
            }
        }
    }
    (versions, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_tags() -> RunTags {
        RunTags::new().with(
            RunTagKey::LoggedModels.as_str(),
            r#"[{"artifact_path": "model", "flavors": {"python_function": {}, "sklearn": {}}, "utc_time_created": "2020-07-02 04:48:15"}]"#,
        )
    }

    fn version(source: &str) -> Value {
        serde_json::json!({
            "name": "churn",
            "version": "3",
            "source": source,
            "creation_timestamp": "1600000000000",
            "run_id": "run-1"
        })
    }

    #[test]
    fn merge_joins_history_with_registry_versions() {
        let api = TrackviewApi::default();
        let result = api.merge_models(&MergeModelsRequest {
            run_uuid: "run-1".to_string(),
            tags: history_tags(),
            model_versions: vec![version("s3://bucket/1/run-1/artifacts/model/")],
        });

        assert!(result.registry_enabled);
        assert_eq!(result.skipped_versions, 0);
        assert_eq!(result.models.len(), 1);
        let model = &result.models[0];
        assert_eq!(model.artifact_path.as_deref(), Some("model"));
        assert_eq!(model.flavors.as_deref(), Some(&["sklearn".to_string()][..]));
        assert_eq!(model.registered_model_name.as_deref(), Some("churn"));
        assert_eq!(model.model_uri.as_deref(), Some("runs:/run-1/model"));
        assert_eq!(result.tie_breakers, model_rank_tie_breakers());
    }

    #[test]
    fn unreadable_registry_rows_are_dropped_individually() -> Result<()> {
        let request: MergeModelsRequest = serde_json::from_value(serde_json::json!({
            "tags": history_tags(),
            "model_versions": [
                {"name": "churn", "version": "3", "source": "s3://bucket/1/run-1/artifacts/model", "creation_timestamp": "n/a"},
                {"name": "no-source", "version": "1", "creation_timestamp": "1"},
                {"name": "bad-version", "version": ["1"], "source": "s3://bucket/artifacts/other"}
            ]
        }))?;
        let result = TrackviewApi::default().merge_models(&request);

        assert_eq!(result.skipped_versions, 2);
        assert_eq!(result.models.len(), 1);
        let model = &result.models[0];
        assert_eq!(model.artifact_path.as_deref(), Some("model"));
        assert_eq!(model.registered_model_name.as_deref(), Some("churn"));
        assert_eq!(model.registered_model_creation_timestamp, Some(0));
        assert_eq!(model.model_uri, None);
        Ok(())
    }

    #[test]
    fn disabled_registry_lists_only_logged_models() {
        let api = TrackviewApi::new(ApiConfig { registry_enabled: false, ..ApiConfig::default() });
        let result = api.merge_models(&MergeModelsRequest {
            tags: history_tags(),
            model_versions: vec![version("s3://bucket/1/run-1/artifacts/other")],
            ..MergeModelsRequest::default()
        });
        assert_eq!(result.models.len(), 1);
        assert_eq!(result.skipped_versions, 0);
        assert!(!result.models[0].is_registered());
    }

    #[test]
    fn malformed_history_yields_no_models() {
        let api = TrackviewApi::default();
        let tags = RunTags::new().with(RunTagKey::LoggedModels.as_str(), "{broken");
        assert!(api.logged_models(&LoggedModelsRequest { tags }).is_empty());
    }

    #[test]
    fn csv_export_defaults_to_every_seen_key() -> Result<()> {
        let runs: Vec<RunRow> = serde_json::from_value(serde_json::json!([
            {
                "info": {"run_uuid": "r1", "status": "FINISHED"},
                "params": [{"key": "lr", "value": "0.1"}],
                "metrics": [{"key": "acc", "value": 0.9}],
                "tags": [{"key": "team", "value": "a"}, {"key": "mlflow.user", "value": "ann"}]
            }
        ]))?;
        let export = TrackviewApi::default().export_runs_csv(&RunsCsvRequest { runs, ..RunsCsvRequest::default() });

        assert_eq!(export.file_name, "runs.csv");
        assert_eq!(export.content_type, "application/csv;charset=utf-8");
        assert_eq!(export.row_count, 1);
        assert_eq!(
            export.body,
            "Run ID,Name,Source Type,Source Name,User,Status,lr,acc,team\nr1,,,,ann,FINISHED,0.1,0.9,a\n"
        );
        Ok(())
    }

    #[test]
    fn run_comparison_pivots_params_and_metrics() -> Result<()> {
        let runs: Vec<RunRow> = serde_json::from_value(serde_json::json!([
            {
                "info": {"run_uuid": "r1", "start_time": 1593665295215_i64, "end_time": 1593665296715_i64},
                "params": [{"key": "lr", "value": "0.1"}],
                "metrics": [{"key": "acc", "value": 0.9}]
            },
            {
                "info": {"run_uuid": "r2"},
                "params": [{"key": "lr", "value": "0.2"}, {"key": "depth", "value": "4"}]
            }
        ]))?;
        let comparison = TrackviewApi::default().compare_runs(&CompareRunsRequest { runs });

        assert_eq!(comparison.run_uuids, vec!["r1", "r2"]);
        assert_eq!(comparison.start_times["r1"], "2020-07-02 04:48:15");
        assert_eq!(comparison.start_times["r2"], "(unknown)");
        assert_eq!(comparison.durations["r1"], "1.5s");
        assert!(!comparison.durations.contains_key("r2"));
        assert_eq!(comparison.params["lr"]["r2"], "0.2");
        assert_eq!(comparison.params["depth"].len(), 1);
        assert_eq!(comparison.metrics["acc"]["r1"], 0.9);
        Ok(())
    }

    #[test]
    fn search_params_round_trip_through_the_facade() -> Result<()> {
        let api = TrackviewApi::default();
        let params = BTreeMap::from([
            ("searchInput".to_string(), Some("metrics.acc > 0.5".to_string())),
            ("orderByAsc".to_string(), None),
        ]);
        let encoded = api.encode_search(&EncodeSearchRequest {
            params,
            base_url: Some("http://localhost:5000/#/experiments/0".to_string()),
        })?;
        assert_eq!(encoded.query, "orderByAsc=&searchInput=metrics.acc+%3E+0.5");
        assert_eq!(
            encoded.url.as_deref(),
            Some("http://localhost:5000/?orderByAsc=&searchInput=metrics.acc+%3E+0.5#/experiments/0")
        );

        let decoded = api.decode_search(&DecodeSearchRequest {
            search: format!("?{}&plot_layout=%7B%22width%22%3A3%7D", encoded.query),
        });
        assert_eq!(decoded.params["searchInput"], "metrics.acc > 0.5");
        assert_eq!(decoded.params["orderByAsc"], "");
        assert_eq!(decoded.plot_layout, serde_json::json!({"width": 3}));
        Ok(())
    }

    #[test]
    fn normalized_uris_report_artifact_paths() {
        let results = TrackviewApi::default().normalize_uris(&NormalizeUrisRequest {
            uris: vec!["dbfs:///runs//1/artifacts/model/".to_string(), "models:/m/1".to_string()],
        });
        assert_eq!(results[0].normalized, "dbfs:/runs/1/artifacts/model");
        assert_eq!(results[0].artifact_path.as_deref(), Some("model"));
        assert_eq!(results[1].artifact_path, None);
    }

    #[test]
    fn plot_state_encodes_into_base_url() -> Result<()> {
        let api = TrackviewApi::default();
        let state = MetricPlotState { show_point: true, ..MetricPlotState::default() };
        let encoded = api.encode_plot_state(&EncodePlotStateRequest {
            state: state.clone(),
            base_url: Some("http://localhost:5000/#/metric".to_string()),
        })?;

        let url = encoded.url.unwrap_or_else(|| panic!("url should be set"));
        assert!(url.starts_with("http://localhost:5000/?x_axis=relative&"));
        assert!(url.ends_with("#/metric"));
        assert_eq!(api.decode_plot_state(&DecodePlotStateRequest { search: encoded.query }), state);

        let invalid = api.encode_plot_state(&EncodePlotStateRequest { state, base_url: Some("nope".to_string()) });
        assert!(invalid.is_err());
        Ok(())
    }

    #[test]
    fn source_description_uses_configured_commit_length() -> Result<()> {
        let request = DescribeSourceRequest {
            run_uuid: "abc".to_string(),
            tags: RunTags::new()
                .with("mlflow.source.type", "PROJECT")
                .with("mlflow.source.name", "https://github.com/org/repo#examples")
                .with("mlflow.source.git.commit", "fedcba9876543210"),
            ..DescribeSourceRequest::default()
        };
        let description = TrackviewApi::new(ApiConfig { short_commit_len: Some(8), ..ApiConfig::default() })
            .describe_source(&request)?;

        assert_eq!(description.run_display_name, "Run abc");
        assert_eq!(description.source, "repo#examples");
        assert_eq!(description.source_link.url, description.repo_url);
        assert_eq!(description.repo_url.as_deref(), Some("https://github.com/org/repo/tree/master/examples"));
        let version = description.version.unwrap_or_else(|| panic!("version should render"));
        assert_eq!(version.label, "fedcba98");
        assert_eq!(
            version.url.as_deref(),
            Some("https://github.com/org/repo/tree/fedcba9876543210/examples")
        );
        Ok(())
    }

    #[test]
    fn notebook_source_links_hang_off_the_origin() -> Result<()> {
        let api = TrackviewApi::default();
        let mut request = DescribeSourceRequest {
            run_uuid: "abc".to_string(),
            tags: RunTags::new()
                .with("mlflow.source.type", "NOTEBOOK")
                .with("mlflow.source.name", "/Users/ann/churn")
                .with("mlflow.databricks.notebookID", "17")
                .with("mlflow.databricks.notebookRevisionID", "99")
                .with("mlflow.databricks.cluster.id", "0101-abc"),
            origin: Some("https://workspace.example".to_string()),
            query: Some("?o=42".to_string()),
        };
        let description = api.describe_source(&request)?;
        assert_eq!(description.source_link.label, "churn");
        assert_eq!(
            description.source_link.url.as_deref(),
            Some("https://workspace.example/?o=42#notebook/17/revision/99/mlflow/run/abc")
        );
        assert_eq!(description.cluster_id.as_deref(), Some("0101-abc"));

        request.origin = Some("not an origin".to_string());
        assert!(api.describe_source(&request).is_err());
        Ok(())
    }

    #[test]
    fn model_metadata_errors_carry_context() {
        let err = TrackviewApi::default()
            .model_metadata("flavors: [unclosed")
            .err()
            .unwrap_or_else(|| panic!("invalid yaml should fail"));
        assert!(err.to_string().contains("failed to parse model metadata"));
    }
}
