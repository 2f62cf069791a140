//! Logged and registered model metadata: extraction from run tags, the
//! artifact-path join between the two, and the display ranking of the result.

mod logged;
mod merge;
mod mlmodel;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use logged::{
    logged_model_uri, logged_models_from_tags, parse_logged_models, parse_utc_time_created,
};
pub use merge::{
    concat_and_group_by_key, merge_logged_and_registered_models, model_rank_tie_breakers,
    rank_models, FieldMerge,
};
pub use mlmodel::{parse_mlmodel, MlModelMetadata, ModelSignature};

/// Flavor key written by every model that can be loaded as a generic predict function.
pub const PYTHON_FUNCTION_FLAVOR: &str = "python_function";
/// Display name used when `python_function` is the only flavor.
pub const PYFUNC_FLAVOR: &str = "pyfunc";

/// A model artifact recorded by a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggedModel {
    pub artifact_path: String,
    pub flavors: Vec<String>,
    pub utc_time_created: f64,
}

/// One model version as returned by the registry listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelVersionInfo {
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    pub source: String,
    #[serde(default, deserialize_with = "integer_or_numeric_string")]
    pub creation_timestamp: i64,
    #[serde(default)]
    pub run_id: Option<String>,
}

/// A registry entry keyed by the artifact path its source points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredModelVersion {
    pub registered_model_name: String,
    pub artifact_path: Option<String>,
    pub registered_model_version: String,
    pub registered_model_creation_timestamp: i64,
}

impl From<&ModelVersionInfo> for RegisteredModelVersion {
    fn from(info: &ModelVersionInfo) -> Self {
        Self {
            registered_model_name: info.name.clone(),
            artifact_path: crate::uri::artifact_path_from_source(&info.source),
            registered_model_version: info.version.clone(),
            registered_model_creation_timestamp: info.creation_timestamp,
        }
    }
}

/// A model row for display, carrying whatever logged and registered fields
/// were found for its artifact path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MergedModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_time_created: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_model_creation_timestamp: Option<i64>,
    /// `runs:/<run_uuid>/<artifact_path>`, set once the owning run is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_uri: Option<String>,
}

impl MergedModel {
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered_model_version.as_deref().is_some_and(|version| !version.is_empty())
    }

    #[must_use]
    pub fn has_flavors(&self) -> bool {
        self.flavors.is_some()
    }

    /// Returns a copy whose `model_uri` points at this row's artifact in `run_uuid`.
    /// Rows without an artifact path are returned unchanged.
    #[must_use]
    pub fn with_run(mut self, run_uuid: &str) -> Self {
        if let Some(artifact_path) = &self.artifact_path {
            self.model_uri = Some(logged_model_uri(run_uuid, artifact_path));
        }
        self
    }
}

impl From<LoggedModel> for MergedModel {
    fn from(model: LoggedModel) -> Self {
        Self {
            artifact_path: Some(model.artifact_path),
            flavors: Some(model.flavors),
            utc_time_created: Some(model.utc_time_created),
            ..Self::default()
        }
    }
}

impl From<RegisteredModelVersion> for MergedModel {
    fn from(version: RegisteredModelVersion) -> Self {
        Self {
            artifact_path: version.artifact_path,
            registered_model_name: Some(version.registered_model_name),
            registered_model_version: Some(version.registered_model_version),
            registered_model_creation_timestamp: Some(
                version.registered_model_creation_timestamp,
            ),
            ..Self::default()
        }
    }
}

/// Flavor names for display: `python_function` is hidden unless it is the only
/// flavor, in which case the model is shown as `pyfunc`.
pub(crate) fn display_flavors<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let flavors: Vec<String> = names
        .into_iter()
        .filter(|name| *name != PYTHON_FUNCTION_FLAVOR)
        .map(str::to_string)
        .collect();
    if flavors.is_empty() {
        vec![PYFUNC_FLAVOR.to_string()]
    } else {
        flavors
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

fn integer_or_numeric_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(value) => value
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("expected integer, got {value}"))),
        Value::String(value) => Ok(crate::format::leading_integer(&value).unwrap_or_default()),
        other => Err(serde::de::Error::custom(format!("expected integer, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_function_is_hidden_unless_alone() {
        assert_eq!(display_flavors(["python_function", "sklearn"]), vec!["sklearn"]);
        assert_eq!(display_flavors(["python_function"]), vec!["pyfunc"]);
        assert_eq!(display_flavors(Vec::<&str>::new()), vec!["pyfunc"]);
    }

    #[test]
    fn model_version_accepts_string_and_numeric_fields() {
        let from_strings: ModelVersionInfo = serde_json::from_str(
            r#"{"name": "m", "version": "3", "source": "s3://b/artifacts/model", "creation_timestamp": "1600000000000"}"#,
        )
        .unwrap_or_else(|err| panic!("string form should parse: {err}"));
        let from_numbers: ModelVersionInfo = serde_json::from_str(
            r#"{"name": "m", "version": 3, "source": "s3://b/artifacts/model", "creation_timestamp": 1600000000000}"#,
        )
        .unwrap_or_else(|err| panic!("numeric form should parse: {err}"));
        assert_eq!(from_strings, from_numbers);
        assert_eq!(from_numbers.creation_timestamp, 1_600_000_000_000);

        let unreadable: ModelVersionInfo = serde_json::from_str(
            r#"{"name": "m", "version": "3", "source": "s3://b/artifacts/model", "creation_timestamp": "n/a"}"#,
        )
        .unwrap_or_else(|err| panic!("non-numeric timestamp should degrade: {err}"));
        assert_eq!(unreadable.creation_timestamp, 0);
    }

    #[test]
    fn merged_rows_point_at_their_run_artifact() {
        let logged = MergedModel::from(LoggedModel {
            artifact_path: "model".to_string(),
            flavors: vec!["sklearn".to_string()],
            utc_time_created: 1.0,
        })
        .with_run("abc");
        assert_eq!(logged.model_uri.as_deref(), Some("runs:/abc/model"));

        let orphan = MergedModel { registered_model_name: Some("m".to_string()), ..MergedModel::default() };
        assert_eq!(orphan.with_run("abc").model_uri, None);
    }

    #[test]
    fn registered_version_derives_artifact_path_from_source() {
        let info = ModelVersionInfo {
            name: "churn".to_string(),
            version: "2".to_string(),
            source: "dbfs:/databricks/mlflow/0/abc/artifacts//model/".to_string(),
            creation_timestamp: 10,
            run_id: None,
        };
        let version = RegisteredModelVersion::from(&info);
        assert_eq!(version.artifact_path.as_deref(), Some("model"));
        assert_eq!(version.registered_model_version, "2");
    }
}
