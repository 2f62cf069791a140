use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Prefix reserved for tags written by the tracking client itself.
pub const INTERNAL_TAG_PREFIX: &str = "mlflow.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunTagKey {
    RunName,
    SourceName,
    SourceType,
    GitCommit,
    EntryPoint,
    Backend,
    User,
    LoggedModels,
    NotebookId,
    NotebookRevisionId,
    JobId,
    JobRunId,
    ClusterId,
}

impl RunTagKey {
    pub const ALL: [Self; 13] = [
        Self::RunName,
        Self::SourceName,
        Self::SourceType,
        Self::GitCommit,
        Self::EntryPoint,
        Self::Backend,
        Self::User,
        Self::LoggedModels,
        Self::NotebookId,
        Self::NotebookRevisionId,
        Self::JobId,
        Self::JobRunId,
        Self::ClusterId,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunName => "mlflow.runName",
            Self::SourceName => "mlflow.source.name",
            Self::SourceType => "mlflow.source.type",
            Self::GitCommit => "mlflow.source.git.commit",
            Self::EntryPoint => "mlflow.project.entryPoint",
            Self::Backend => "mlflow.project.backend",
            Self::User => "mlflow.user",
            Self::LoggedModels => "mlflow.log-model.history",
            Self::NotebookId => "mlflow.databricks.notebookID",
            Self::NotebookRevisionId => "mlflow.databricks.notebookRevisionID",
            Self::JobId => "mlflow.databricks.jobID",
            Self::JobRunId => "mlflow.databricks.jobRunID",
            Self::ClusterId => "mlflow.databricks.cluster.id",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

/// Tags of one run, keyed by tag key.
///
/// Deserializes from a `{key: {key, value}}` map, a `[{key, value}]` list or a
/// flat `{key: value}` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(from = "RunTagsRepr", into = "BTreeMap<String, RunTag>")]
pub struct RunTags(BTreeMap<String, RunTag>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RunTagsRepr {
    Map(BTreeMap<String, RunTag>),
    List(Vec<RunTag>),
    Flat(BTreeMap<String, String>),
}

impl From<RunTagsRepr> for RunTags {
    fn from(repr: RunTagsRepr) -> Self {
        match repr {
            RunTagsRepr::Map(map) => Self(map),
            RunTagsRepr::List(list) => list.into_iter().collect(),
            RunTagsRepr::Flat(flat) => flat
                .into_iter()
                .map(|(key, value)| RunTag { key, value })
                .collect(),
        }
    }
}

impl From<RunTags> for BTreeMap<String, RunTag> {
    fn from(tags: RunTags) -> Self {
        tags.0
    }
}

impl FromIterator<RunTag> for RunTags {
    fn from_iter<T: IntoIterator<Item = RunTag>>(iter: T) -> Self {
        Self(iter.into_iter().map(|tag| (tag.key.clone(), tag)).collect())
    }
}

impl RunTags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), RunTag { key: key.to_string(), value: value.to_string() });
        self
    }

    #[must_use]
    pub fn get(&self, key: RunTagKey) -> Option<&str> {
        self.get_raw(key.as_str())
    }

    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|tag| tag.value.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn run_name(&self) -> &str {
        self.get(RunTagKey::RunName).unwrap_or_default()
    }

    #[must_use]
    pub fn source_name(&self) -> &str {
        self.get(RunTagKey::SourceName).unwrap_or_default()
    }

    #[must_use]
    pub fn source_type(&self) -> &str {
        self.get(RunTagKey::SourceType).unwrap_or_default()
    }

    #[must_use]
    pub fn source_version(&self) -> &str {
        self.get(RunTagKey::GitCommit).unwrap_or_default()
    }

    #[must_use]
    pub fn entry_point_name(&self) -> &str {
        self.get(RunTagKey::EntryPoint).unwrap_or_default()
    }

    #[must_use]
    pub fn backend(&self) -> &str {
        self.get(RunTagKey::Backend).unwrap_or_default()
    }

    /// The run name tag, or `Run <uuid>` when the run was never named.
    #[must_use]
    pub fn run_display_name(&self, run_uuid: &str) -> String {
        match self.run_name() {
            "" => format!("Run {run_uuid}"),
            name => name.to_string(),
        }
    }

    /// Tags a user set explicitly, in key order.
    pub fn visible(&self) -> impl Iterator<Item = &RunTag> {
        self.0.values().filter(|tag| !tag.key.starts_with(INTERNAL_TAG_PREFIX))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunInfo {
    pub run_uuid: String,
    #[serde(default)]
    pub experiment_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub lifecycle_stage: String,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
}

impl RunInfo {
    /// The `mlflow.user` tag, falling back to the deprecated `user_id` field.
    #[must_use]
    pub fn user<'a>(&'a self, tags: &'a RunTags) -> &'a str {
        tags.get(RunTagKey::User).unwrap_or(self.user_id.as_str())
    }
}

/// Unique visible tag keys across runs, in first-seen order.
#[must_use]
pub fn visible_tag_keys(tags_list: &[RunTags]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for tags in tags_list {
        for tag in tags.visible() {
            if seen.insert(tag.key.as_str()) {
                keys.push(tag.key.clone());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_keys_round_trip_through_parse() {
        for key in RunTagKey::ALL {
            assert_eq!(RunTagKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(RunTagKey::parse("team"), None);
    }

    #[test]
    fn accessors_default_to_empty_strings() {
        let tags = RunTags::new().with("mlflow.runName", "baseline");
        assert_eq!(tags.run_name(), "baseline");
        assert_eq!(tags.source_name(), "");
        assert_eq!(tags.backend(), "");
        assert_eq!(tags.run_display_name("abc"), "baseline");
        assert_eq!(RunTags::new().run_display_name("abc"), "Run abc");
    }

    #[test]
    fn user_prefers_tag_over_run_info() {
        let info = RunInfo { run_uuid: "r1".to_string(), user_id: "legacy".to_string(), ..RunInfo::default() };
        assert_eq!(info.user(&RunTags::new()), "legacy");
        assert_eq!(info.user(&RunTags::new().with("mlflow.user", "alice")), "alice");
    }

    #[test]
    fn deserializes_map_and_list_forms() {
        let from_map: RunTags = serde_json::from_str(
            r#"{"team": {"key": "team", "value": "vision"}}"#,
        )
        .unwrap_or_else(|err| panic!("map form should parse: {err}"));
        let from_list: RunTags = serde_json::from_str(r#"[{"key": "team", "value": "vision"}]"#)
            .unwrap_or_else(|err| panic!("list form should parse: {err}"));
        let from_flat: RunTags = serde_json::from_str(r#"{"team": "vision"}"#)
            .unwrap_or_else(|err| panic!("flat form should parse: {err}"));
        assert_eq!(from_map, from_list);
        assert_eq!(from_map, from_flat);
        assert_eq!(from_list.get_raw("team"), Some("vision"));
    }

    #[test]
    fn visible_tag_keys_skip_internal_tags_and_duplicates() {
        let first = RunTags::new().with("mlflow.user", "a").with("team", "x").with("env", "prod");
        let second = RunTags::new().with("team", "y").with("owner", "z");
        assert_eq!(visible_tag_keys(&[first, second]), vec!["env", "team", "owner"]);
    }
}
