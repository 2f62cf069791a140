use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use trackview_api::{
    ApiConfig, CompareRunsRequest, DecodePlotStateRequest, DecodeSearchRequest, DecodedSearch,
    DescribeSourceRequest, EncodePlotStateRequest, EncodeSearchRequest, EncodedQuery,
    LoggedModelsRequest, MergeModelsRequest, MergeModelsResult, NormalizeUrisRequest,
    NormalizedUri, RunComparison, RunsCsvRequest, SourceDescription, TrackviewApi,
    API_CONTRACT_VERSION,
};
use trackview_core::{LoggedModel, MetricPlotState, MlModelMetadata, SHORT_COMMIT_LEN};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: Arc<TrackviewApi>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    registry_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
struct LoggedModelsResponse {
    models: Vec<LoggedModel>,
}

#[derive(Debug, Clone, Serialize)]
struct NormalizeUrisResponse {
    uris: Vec<NormalizedUri>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelMetadataRequest {
    document: String,
}

#[derive(Debug, Parser)]
#[command(name = "trackview-service")]
#[command(about = "Local HTTP service for experiment tracking data helpers")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_filter: String,
    #[arg(long, default_value_t = false)]
    no_registry: bool,
    /// Characters of a commit hash to show; 0 keeps the full hash.
    #[arg(long, default_value_t = SHORT_COMMIT_LEN)]
    short_commit_len: usize,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn new(config: ApiConfig) -> Self {
        Self { api: Arc::new(TrackviewApi::new(config)) }
    }

    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn request_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload.map(|Json(request)| request).map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected request body");
        ServiceState::error(rejection.body_text())
    })
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/models/logged", post(models_logged))
        .route("/v1/models/merge", post(models_merge))
        .route("/v1/models/metadata", post(models_metadata))
        .route("/v1/runs/csv", post(runs_csv))
        .route("/v1/runs/compare", post(runs_compare))
        .route("/v1/uri/normalize", post(uri_normalize))
        .route("/v1/plot-state/decode", post(plot_state_decode))
        .route("/v1/plot-state/encode", post(plot_state_encode))
        .route("/v1/search/decode", post(search_decode))
        .route("/v1/search/encode", post(search_encode))
        .route("/v1/source/describe", post(source_describe))
        .with_state(state)
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_filter);

    let state = ServiceState::new(ApiConfig {
        registry_enabled: !args.no_registry,
        short_commit_len: (args.short_commit_len > 0).then_some(args.short_commit_len),
        ..ApiConfig::default()
    });
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "trackview service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok", registry_enabled: state.api.config().registry_enabled }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn models_logged(
    State(state): State<ServiceState>,
    payload: Result<Json<LoggedModelsRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<LoggedModelsResponse>>, ServiceError> {
    let request = request_body(payload)?;
    let models = state.api.logged_models(&request);
    Ok(Json(envelope(LoggedModelsResponse { models })))
}

async fn models_merge(
    State(state): State<ServiceState>,
    payload: Result<Json<MergeModelsRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<MergeModelsResult>>, ServiceError> {
    let request = request_body(payload)?;
    Ok(Json(envelope(state.api.merge_models(&request))))
}

async fn models_metadata(
    State(state): State<ServiceState>,
    payload: Result<Json<ModelMetadataRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<MlModelMetadata>>, ServiceError> {
    let request = request_body(payload)?;
    let metadata = state
        .api
        .model_metadata(&request.document)
        .map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(metadata)))
}

async fn runs_csv(
    State(state): State<ServiceState>,
    payload: Result<Json<RunsCsvRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let request = request_body(payload)?;
    let export = state.api.export_runs_csv(&request);
    let disposition = format!("attachment; filename=\"{}\"", export.file_name);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, export.content_type), (header::CONTENT_DISPOSITION, disposition)],
        export.body,
    )
        .into_response())
}

async fn runs_compare(
    State(state): State<ServiceState>,
    payload: Result<Json<CompareRunsRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<RunComparison>>, ServiceError> {
    let request = request_body(payload)?;
    Ok(Json(envelope(state.api.compare_runs(&request))))
}

async fn uri_normalize(
    State(state): State<ServiceState>,
    payload: Result<Json<NormalizeUrisRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<NormalizeUrisResponse>>, ServiceError> {
    let request = request_body(payload)?;
    Ok(Json(envelope(NormalizeUrisResponse { uris: state.api.normalize_uris(&request) })))
}

async fn plot_state_decode(
    State(state): State<ServiceState>,
    payload: Result<Json<DecodePlotStateRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<MetricPlotState>>, ServiceError> {
    let request = request_body(payload)?;
    Ok(Json(envelope(state.api.decode_plot_state(&request))))
}

async fn plot_state_encode(
    State(state): State<ServiceState>,
    payload: Result<Json<EncodePlotStateRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<EncodedQuery>>, ServiceError> {
    let request = request_body(payload)?;
    let encoded = state
        .api
        .encode_plot_state(&request)
        .map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(encoded)))
}

async fn search_decode(
    State(state): State<ServiceState>,
    payload: Result<Json<DecodeSearchRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<DecodedSearch>>, ServiceError> {
    let request = request_body(payload)?;
    Ok(Json(envelope(state.api.decode_search(&request))))
}

async fn search_encode(
    State(state): State<ServiceState>,
    payload: Result<Json<EncodeSearchRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<EncodedQuery>>, ServiceError> {
    let request = request_body(payload)?;
    let encoded = state
        .api
        .encode_search(&request)
        .map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(encoded)))
}

async fn source_describe(
    State(state): State<ServiceState>,
    payload: Result<Json<DescribeSourceRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<SourceDescription>>, ServiceError> {
    let request = request_body(payload)?;
    let description = state
        .api
        .describe_source(&request)
        .map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(description)))
}
