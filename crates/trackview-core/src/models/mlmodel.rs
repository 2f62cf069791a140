use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{display_flavors, logged::parse_utc_time_created};
use crate::CoreError;

/// File name of the metadata document stored next to every logged model.
pub const MLMODEL_FILE_NAME: &str = "MLmodel";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSignature {
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlModelMetadata {
    pub artifact_path: Option<String>,
    pub run_id: Option<String>,
    pub utc_time_created: Option<f64>,
    pub flavors: Vec<String>,
    pub signature: Option<ModelSignature>,
}

#[derive(Debug, Deserialize)]
struct MlModelDocument {
    artifact_path: Option<String>,
    run_id: Option<String>,
    utc_time_created: Option<serde_yaml::Value>,
    #[serde(default)]
    flavors: serde_yaml::Mapping,
    signature: Option<SignatureDocument>,
}

#[derive(Debug, Deserialize)]
struct SignatureDocument {
    inputs: Option<String>,
    outputs: Option<String>,
}

/// Parse an `MLmodel` YAML document.
///
/// The signature's `inputs` and `outputs` are JSON-encoded column specs; an
/// absent side is an empty list.
///
/// # Errors
/// Returns [`CoreError::Metadata`] when the YAML or an embedded signature is malformed.
pub fn parse_mlmodel(document: &str) -> Result<MlModelMetadata, CoreError> {
    let parsed: MlModelDocument = serde_yaml::from_str(document)
        .map_err(|err| CoreError::Metadata(format!("invalid {MLMODEL_FILE_NAME} yaml: {err}")))?;

    let signature = parsed
        .signature
        .map(|signature| -> Result<ModelSignature, CoreError> {
            Ok(ModelSignature {
                inputs: parse_column_specs("inputs", signature.inputs.as_deref())?,
                outputs: parse_column_specs("outputs", signature.outputs.as_deref())?,
            })
        })
        .transpose()?;

    let utc_time_created = parsed.utc_time_created.and_then(|value| match value {
        serde_yaml::Value::String(text) => parse_utc_time_created(&Value::String(text)),
        serde_yaml::Value::Number(number) => number.as_f64(),
        _ => None,
    });

    Ok(MlModelMetadata {
        artifact_path: parsed.artifact_path,
        run_id: parsed.run_id,
        utc_time_created,
        flavors: display_flavors(parsed.flavors.keys().filter_map(serde_yaml::Value::as_str)),
        signature,
    })
}

fn parse_column_specs(side: &str, raw: Option<&str>) -> Result<Vec<Value>, CoreError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw)
        .map_err(|err| CoreError::Metadata(format!("invalid signature {side}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
artifact_path: model
flavors:
  python_function:
    env: conda.yaml
    loader_module: mlflow.sklearn
  sklearn:
    pickled_model: model.pkl
    sklearn_version: 0.23.1
run_id: 8f7e0a3c
signature:
  inputs: '[{"name": "sepal length (cm)", "type": "double"}]'
  outputs: '[{"type": "long"}]'
utc_time_created: '2020-07-02 04:48:15.215071'
"#;

    #[test]
    fn parses_flavors_signature_and_creation_time() {
        let metadata =
            parse_mlmodel(DOCUMENT).unwrap_or_else(|err| panic!("document should parse: {err}"));
        assert_eq!(metadata.artifact_path.as_deref(), Some("model"));
        assert_eq!(metadata.run_id.as_deref(), Some("8f7e0a3c"));
        assert_eq!(metadata.flavors, vec!["sklearn"]);
        assert!(metadata.utc_time_created.is_some_and(|created| created > 1_593_000_000.0));

        let signature = metadata.signature.unwrap_or_else(|| panic!("signature should be present"));
        assert_eq!(signature.inputs.len(), 1);
        assert_eq!(signature.inputs[0]["type"], "double");
        assert_eq!(signature.outputs[0]["type"], "long");
    }

    #[test]
    fn missing_signature_is_none() {
        let metadata = parse_mlmodel("artifact_path: m\nflavors:\n  python_function: {}\n")
            .unwrap_or_else(|err| panic!("document should parse: {err}"));
        assert!(metadata.signature.is_none());
        assert_eq!(metadata.flavors, vec!["pyfunc"]);
    }

    #[test]
    fn malformed_signature_is_an_error() {
        let result = parse_mlmodel("signature:\n  inputs: '[{broken'\n");
        assert!(matches!(result, Err(CoreError::Metadata(_))));
        assert!(matches!(parse_mlmodel("flavors: [unclosed"), Err(CoreError::Metadata(_))));
    }
}
