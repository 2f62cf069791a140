//! Shareable view state carried in URL query strings.
//!
//! Every function here takes the query string or URL explicitly; nothing reads
//! the location of a hosting page.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::{form_urlencoded, Url};

use crate::CoreError;

pub const X_AXIS_PARAM: &str = "x_axis";
pub const METRIC_KEYS_PARAM: &str = "plot_metric_keys";
pub const SHOW_POINT_PARAM: &str = "show_point";
pub const Y_AXIS_SCALE_PARAM: &str = "y_axis_scale";
pub const LINE_SMOOTHNESS_PARAM: &str = "line_smoothness";
pub const LAYOUT_PARAM: &str = "plot_layout";
pub const DESELECTED_CURVES_PARAM: &str = "deselected_curves";
pub const LAST_LINEAR_RANGE_PARAM: &str = "last_linear_y_axis_range";

pub const DEFAULT_X_AXIS: &str = "relative";

/// Configuration of the metric plot page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricPlotState {
    pub selected_x_axis: String,
    pub selected_metric_keys: Vec<String>,
    pub show_point: bool,
    pub y_axis_log_scale: bool,
    pub line_smoothness: f64,
    pub layout: Value,
    pub deselected_curves: Vec<String>,
    pub last_linear_y_axis_range: Vec<f64>,
}

impl Default for MetricPlotState {
    fn default() -> Self {
        Self {
            selected_x_axis: DEFAULT_X_AXIS.to_string(),
            selected_metric_keys: Vec::new(),
            show_point: false,
            y_axis_log_scale: false,
            line_smoothness: 0.0,
            layout: default_layout(),
            deselected_curves: Vec::new(),
            last_linear_y_axis_range: Vec::new(),
        }
    }
}

fn default_layout() -> Value {
    serde_json::json!({ "autosize": true })
}

/// All parameters of a query string, with or without its leading `?`.
/// A repeated key keeps its last value.
#[must_use]
pub fn decode_search_params(search: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(search.strip_prefix('?').unwrap_or(search).as_bytes())
        .into_owned()
        .collect()
}

/// Metric plot state from a query string. Absent or unparseable fields take
/// their defaults.
#[must_use]
pub fn decode_metric_plot_state(search: &str) -> MetricPlotState {
    let params = decode_search_params(search);
    let param = |name: &str| params.get(name).map(String::as_str).filter(|value| !value.is_empty());

    MetricPlotState {
        selected_x_axis: param(X_AXIS_PARAM).unwrap_or(DEFAULT_X_AXIS).to_string(),
        selected_metric_keys: json_param(param(METRIC_KEYS_PARAM)).unwrap_or_default(),
        show_point: param(SHOW_POINT_PARAM) == Some("true"),
        y_axis_log_scale: param(Y_AXIS_SCALE_PARAM) == Some("log"),
        line_smoothness: param(LINE_SMOOTHNESS_PARAM)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .unwrap_or(0.0),
        layout: json_param::<Value>(param(LAYOUT_PARAM))
            .filter(Value::is_object)
            .unwrap_or_else(default_layout),
        deselected_curves: json_param(param(DESELECTED_CURVES_PARAM)).unwrap_or_default(),
        last_linear_y_axis_range: json_param(param(LAST_LINEAR_RANGE_PARAM)).unwrap_or_default(),
    }
}

/// Query string (without `?`) that [`decode_metric_plot_state`] reads back to `state`.
#[must_use]
pub fn encode_metric_plot_state(state: &MetricPlotState) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(X_AXIS_PARAM, &state.selected_x_axis)
        .append_pair(METRIC_KEYS_PARAM, &to_json(&state.selected_metric_keys))
        .append_pair(SHOW_POINT_PARAM, if state.show_point { "true" } else { "false" })
        .append_pair(Y_AXIS_SCALE_PARAM, if state.y_axis_log_scale { "log" } else { "linear" })
        .append_pair(LINE_SMOOTHNESS_PARAM, &state.line_smoothness.to_string())
        .append_pair(LAYOUT_PARAM, &to_json(&state.layout))
        .append_pair(DESELECTED_CURVES_PARAM, &to_json(&state.deselected_curves))
        .append_pair(LAST_LINEAR_RANGE_PARAM, &to_json(&state.last_linear_y_axis_range))
        .finish()
}

/// Query string for a flat state map. `None` values are written as empty strings.
#[must_use]
pub fn encode_search_state(state: &BTreeMap<String, Option<String>>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in state {
        serializer.append_pair(key, value.as_deref().unwrap_or_default());
    }
    serializer.finish()
}

/// The `plot_layout` object of a query string, or `{}` when absent.
#[must_use]
pub fn plot_layout_from_search(search: &str) -> Value {
    let params = decode_search_params(search);
    json_param::<Value>(params.get(LAYOUT_PARAM).map(String::as_str))
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
}

/// `url` with its query replaced by `query`; `None` or an empty query clears it.
///
/// # Errors
/// Returns [`CoreError::InvalidUrl`] when `url` is not an absolute URL.
pub fn set_query_params(url: &str, query: Option<&str>) -> Result<String, CoreError> {
    let mut parsed = Url::parse(url).map_err(|err| CoreError::InvalidUrl(format!("{url}: {err}")))?;
    let query = query.map(|value| value.strip_prefix('?').unwrap_or(value)).filter(|value| !value.is_empty());
    parsed.set_query(query);
    Ok(parsed.to_string())
}

fn json_param<T: DeserializeOwned>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|value| serde_json::from_str(value).ok())
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
