//! CSV rendering for the runs table download.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tags::{RunInfo, RunTags};

pub const CSV_CONTENT_TYPE: &str = "application/csv;charset=utf-8";
pub const DEFAULT_EXPORT_FILE_NAME: &str = "runs.csv";

/// Leading columns of every runs export, before params, metrics and tags.
pub const RUN_COLUMNS: [&str; 6] =
    ["Run ID", "Name", "Source Type", "Source Name", "User", "Status"];

/// Quote a field when it contains a comma, quote, carriage return or newline.
/// A missing value is an empty field.
#[must_use]
pub fn csv_escape(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render a header row followed by data rows. Every row, including the last,
/// ends with a newline.
#[must_use]
pub fn table_to_csv<C, R>(columns: &[C], rows: &[R]) -> String
where
    C: AsRef<str>,
    R: AsRef<[Option<String>]>,
{
    let mut csv = String::new();
    push_row(&mut csv, columns.iter().map(|column| Some(column.as_ref())));
    for row in rows {
        push_row(&mut csv, row.as_ref().iter().map(Option::as_deref));
    }
    csv
}

fn push_row<'a>(csv: &mut String, fields: impl Iterator<Item = Option<&'a str>>) {
    for (index, field) in fields.enumerate() {
        if index > 0 {
            csv.push(',');
        }
        csv.push_str(&csv_escape(field));
    }
    csv.push('\n');
}

/// A key/value pair logged against a run (param or latest metric).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: serde_json::Value,
}

impl KeyValue {
    fn display_value(&self) -> String {
        match &self.value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// One row of the runs table as provided by the tracking server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRow {
    pub info: RunInfo,
    #[serde(default)]
    pub params: Vec<KeyValue>,
    #[serde(default)]
    pub metrics: Vec<KeyValue>,
    #[serde(default)]
    pub tags: RunTags,
}

/// Rendered CSV body with the file name and content type a download should use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsvExport {
    pub file_name: String,
    pub content_type: String,
    pub row_count: usize,
    pub body: String,
}

impl CsvExport {
    #[must_use]
    pub fn new(file_name: impl Into<String>, row_count: usize, body: String) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: CSV_CONTENT_TYPE.to_string(),
            row_count,
            body,
        }
    }
}

/// Render runs as CSV with the fixed run columns followed by the requested
/// param, metric and tag columns. Values a run lacks are left empty.
#[must_use]
pub fn run_infos_to_csv(
    runs: &[RunRow],
    param_keys: &[String],
    metric_keys: &[String],
    tag_keys: &[String],
) -> String {
    let columns: Vec<&str> = RUN_COLUMNS
        .iter()
        .copied()
        .chain(param_keys.iter().map(String::as_str))
        .chain(metric_keys.iter().map(String::as_str))
        .chain(tag_keys.iter().map(String::as_str))
        .collect();

    let rows: Vec<Vec<Option<String>>> = runs
        .iter()
        .map(|run| {
            let params = by_key(&run.params);
            let metrics = by_key(&run.metrics);
            let mut row = vec![
                Some(run.info.run_uuid.clone()),
                Some(run.tags.run_name().to_string()),
                Some(run.tags.source_type().to_string()),
                Some(run.tags.source_name().to_string()),
                Some(run.info.user(&run.tags).to_string()),
                Some(run.info.status.clone()),
            ];
            row.extend(param_keys.iter().map(|key| params.get(key.as_str()).cloned()));
            row.extend(metric_keys.iter().map(|key| metrics.get(key.as_str()).cloned()));
            row.extend(tag_keys.iter().map(|key| run.tags.get_raw(key).map(str::to_string)));
            row
        })
        .collect();

    table_to_csv(&columns, &rows)
}

/// Sorted union of param and metric keys across runs, for building columns.
#[must_use]
pub fn collect_keys(runs: &[RunRow]) -> (Vec<String>, Vec<String>) {
    let mut param_keys = std::collections::BTreeSet::new();
    let mut metric_keys = std::collections::BTreeSet::new();
    for run in runs {
        param_keys.extend(run.params.iter().map(|param| param.key.clone()));
        metric_keys.extend(run.metrics.iter().map(|metric| metric.key.clone()));
    }
    (param_keys.into_iter().collect(), metric_keys.into_iter().collect())
}

/// Pivot one kind of per-run values into key -> (run uuid -> value), the shape
/// the run comparison table reads. `select` picks params or metrics from a run.
#[must_use]
pub fn merge_runs<F>(runs: &[RunRow], select: F) -> BTreeMap<String, BTreeMap<String, serde_json::Value>>
where
    F: Fn(&RunRow) -> &[KeyValue],
{
    let mut merged: BTreeMap<String, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
    for run in runs {
        for key_value in select(run) {
            merged
                .entry(key_value.key.clone())
                .or_default()
                .insert(run.info.run_uuid.clone(), key_value.value.clone());
        }
    }
    merged
}

fn by_key(values: &[KeyValue]) -> BTreeMap<&str, String> {
    values.iter().map(|value| (value.key.as_str(), value.display_value())).collect()
}
