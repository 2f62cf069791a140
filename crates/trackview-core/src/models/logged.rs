use std::collections::BTreeSet;

use serde_json::Value;
use time::macros::format_description;
use time::PrimitiveDateTime;

use super::{display_flavors, LoggedModel};
use crate::tags::{RunTagKey, RunTags};
use crate::CoreError;

/// Logged models recorded in a run's `mlflow.log-model.history` tag, newest
/// first, with one entry per artifact path.
///
/// A missing or unreadable tag yields no models; use [`parse_logged_models`]
/// to see why a present tag was rejected.
#[must_use]
pub fn logged_models_from_tags(tags: &RunTags) -> Vec<LoggedModel> {
    tags.get(RunTagKey::LoggedModels)
        .and_then(|raw| parse_logged_models(raw).ok())
        .unwrap_or_default()
}

/// Scheme of URIs that address an artifact through the run that logged it.
pub const RUNS_URI_SCHEME: &str = "runs:/";

/// `runs:/<run_uuid>/<artifact_path>`, the URI model loaders accept for a logged model.
#[must_use]
pub fn logged_model_uri(run_uuid: &str, artifact_path: &str) -> String {
    format!("{RUNS_URI_SCHEME}{run_uuid}/{}", artifact_path.trim_start_matches('/'))
}

/// Parse the JSON value of a `mlflow.log-model.history` tag.
///
/// Entries without an `artifact_path` are skipped. Entries sharing an
/// artifact path collapse to the most recently created one.
///
/// # Errors
/// Returns [`CoreError::MalformedTag`] when the value is not a JSON list.
pub fn parse_logged_models(raw: &str) -> Result<Vec<LoggedModel>, CoreError> {
    let malformed = |reason: String| CoreError::MalformedTag {
        key: RunTagKey::LoggedModels.as_str().to_string(),
        reason,
    };

    let value: Value = serde_json::from_str(raw).map_err(|err| malformed(err.to_string()))?;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Null => Vec::new(),
        other => return Err(malformed(format!("expected a list of models, got {other}"))),
    };

    let mut models: Vec<LoggedModel> = entries.iter().filter_map(logged_model_from_entry).collect();
    // Stable sort keeps tag order among equal timestamps.
    models.sort_by(|lhs, rhs| rhs.utc_time_created.total_cmp(&lhs.utc_time_created));

    let mut seen = BTreeSet::new();
    models.retain(|model| seen.insert(model.artifact_path.clone()));
    Ok(models)
}

fn logged_model_from_entry(entry: &Value) -> Option<LoggedModel> {
    let artifact_path = entry.get("artifact_path").and_then(Value::as_str)?;
    let flavor_names = entry
        .get("flavors")
        .and_then(Value::as_object)
        .map(|flavors| flavors.keys().map(String::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    let utc_time_created =
        entry.get("utc_time_created").and_then(parse_utc_time_created).unwrap_or(0.0);

    Some(LoggedModel {
        artifact_path: artifact_path.to_string(),
        flavors: display_flavors(flavor_names),
        utc_time_created,
    })
}

/// Creation time of a logged model in epoch seconds.
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.ffffff]` in UTC (a `T` separator and a
/// trailing `Z` are tolerated) or a number already in epoch seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn parse_utc_time_created(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let format = format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
            );
            let cleaned = text.trim().trim_end_matches('Z').replacen('T', " ", 1);
            let parsed = PrimitiveDateTime::parse(&cleaned, format).ok()?.assume_utc();
            Some(parsed.unix_timestamp() as f64 + f64::from(parsed.nanosecond()) / 1e9)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn model_uri_joins_run_and_artifact_path() {
        assert_eq!(logged_model_uri("abc", "model"), "runs:/abc/model");
        assert_eq!(logged_model_uri("abc", "/nested/model"), "runs:/abc/nested/model");
    }

    fn tags_with_history(history: &Value) -> RunTags {
        RunTags::new().with(RunTagKey::LoggedModels.as_str(), &history.to_string())
    }

    #[test]
    fn duplicate_artifact_paths_keep_newest_entry() {
        let tags = tags_with_history(&json!([
            {"artifact_path": "model", "flavors": {"sklearn": {}}, "utc_time_created": 100},
            {"artifact_path": "model", "flavors": {"keras": {}}, "utc_time_created": 200},
        ]));

        let models = logged_models_from_tags(&tags);
        assert_eq!(models.len(), 1);
        assert!((models[0].utc_time_created - 200.0).abs() < f64::EPSILON);
        assert_eq!(models[0].flavors, vec!["keras"]);
    }

    #[test]
    fn models_are_sorted_newest_first() {
        let tags = tags_with_history(&json!([
            {"artifact_path": "a", "flavors": {"python_function": {}}, "utc_time_created": "2020-07-02 04:48:15.215071"},
            {"artifact_path": "b", "flavors": {"python_function": {}, "sklearn": {}}, "utc_time_created": "2020-07-03 04:48:15"},
        ]));

        let models = logged_models_from_tags(&tags);
        let paths: Vec<_> = models.iter().map(|model| model.artifact_path.as_str()).collect();
        assert_eq!(paths, vec!["b", "a"]);
        assert_eq!(models[0].flavors, vec!["sklearn"]);
        assert_eq!(models[1].flavors, vec!["pyfunc"]);
    }

    #[test]
    fn flavor_order_follows_the_tag() {
        let tags = tags_with_history(&json!([
            {"artifact_path": "m", "flavors": {"tensorflow": {}, "python_function": {}, "keras": {}}, "utc_time_created": 1},
        ]));
        assert_eq!(logged_models_from_tags(&tags)[0].flavors, vec!["tensorflow", "keras"]);
    }

    #[test]
    fn missing_or_malformed_tag_yields_no_models() {
        assert!(logged_models_from_tags(&RunTags::new()).is_empty());

        let malformed = RunTags::new().with(RunTagKey::LoggedModels.as_str(), "[{not json");
        assert!(logged_models_from_tags(&malformed).is_empty());
        assert!(matches!(
            parse_logged_models("[{not json"),
            Err(CoreError::MalformedTag { .. })
        ));
        assert!(parse_logged_models(r#"{"artifact_path": "m"}"#).is_err());
        assert_eq!(parse_logged_models("null"), Ok(Vec::new()));
    }

    #[test]
    fn entries_without_artifact_path_are_skipped() {
        let models = parse_logged_models(r#"[{"flavors": {"sklearn": {}}}, {"artifact_path": "m"}]"#)
            .unwrap_or_else(|err| panic!("history should parse: {err}"));
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].flavors, vec!["pyfunc"]);
        assert!(models[0].utc_time_created.abs() < f64::EPSILON);
    }

    #[test]
    fn utc_time_created_parses_datetime_strings() {
        assert_eq!(parse_utc_time_created(&json!("1970-01-01 00:01:40")), Some(100.0));
        assert_eq!(parse_utc_time_created(&json!("1970-01-01T00:01:40.5Z")), Some(100.5));
        assert_eq!(parse_utc_time_created(&json!(42)), Some(42.0));
        assert_eq!(parse_utc_time_created(&json!("yesterday")), None);
        assert_eq!(parse_utc_time_created(&json!(true)), None);
    }
}
