use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use trackview_api::{
    ApiConfig, CompareRunsRequest, DecodePlotStateRequest, DecodeSearchRequest,
    DescribeSourceRequest, EncodePlotStateRequest, EncodeSearchRequest, LoggedModelsRequest,
    MergeModelsRequest, NormalizeUrisRequest, RunsCsvRequest, TrackviewApi, API_CONTRACT_VERSION,
};
use trackview_core::{MetricPlotState, RunRow, RunTags, DEFAULT_EXPORT_FILE_NAME};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "tv")]
#[command(about = "Experiment tracking data helpers")]
struct Cli {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_filter: String,

    /// Ignore registry versions when merging models.
    #[arg(long, global = true, default_value_t = false)]
    no_registry: bool,

    /// Characters of a commit hash to show; 0 keeps the full hash.
    #[arg(long, global = true, default_value_t = trackview_core::SHORT_COMMIT_LEN)]
    short_commit_len: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
    Uri {
        #[command(subcommand)]
        command: UriCommand,
    },
    PlotState {
        #[command(subcommand)]
        command: PlotStateCommand,
    },
    Search {
        #[command(subcommand)]
        command: SearchCommand,
    },
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ModelsCommand {
    Logged(TagsArgs),
    Merge(MergeArgs),
    Metadata(MetadataArgs),
}

#[derive(Debug, Args)]
struct TagsArgs {
    #[arg(long)]
    tags: PathBuf,
}

#[derive(Debug, Args)]
struct MergeArgs {
    #[arg(long)]
    tags: PathBuf,
    #[arg(long)]
    versions: Option<PathBuf>,
    /// Run owning the tags; adds a `runs:/` URI to each row.
    #[arg(long, default_value = "")]
    run_uuid: String,
}

#[derive(Debug, Args)]
struct MetadataArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Subcommand)]
enum RunsCommand {
    ExportCsv(ExportCsvArgs),
    Compare(CompareArgs),
}

#[derive(Debug, Args)]
struct CompareArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct ExportCsvArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value = DEFAULT_EXPORT_FILE_NAME)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum UriCommand {
    Normalize(NormalizeArgs),
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    #[arg(required = true)]
    uris: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum PlotStateCommand {
    Decode(DecodeArgs),
    Encode(EncodeArgs),
}

#[derive(Debug, Args)]
struct DecodeArgs {
    #[arg(long, allow_hyphen_values = true)]
    search: String,
}

#[derive(Debug, Args)]
struct EncodeArgs {
    #[arg(long)]
    state: PathBuf,
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum SearchCommand {
    Decode(DecodeArgs),
    Encode(EncodeSearchArgs),
}

#[derive(Debug, Args)]
struct EncodeSearchArgs {
    /// JSON object of parameter names to string or null values.
    #[arg(long)]
    params: PathBuf,
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum SourceCommand {
    Describe(DescribeArgs),
}

#[derive(Debug, Args)]
struct DescribeArgs {
    #[arg(long)]
    tags: PathBuf,
    #[arg(long, default_value = "")]
    run_uuid: String,
    /// Workspace origin for notebook and job links.
    #[arg(long)]
    origin: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    query: Option<String>,
}

/// Registry listings arrive either bare or wrapped the way the REST API returns them.
/// Rows stay raw so one unreadable row does not reject the file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionsInput {
    Wrapped { model_versions: Vec<Value> },
    Bare(Vec<Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RunsInput {
    Request(RunsCsvRequest),
    Bare(Vec<RunRow>),
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            object.insert(
                "api_contract_version".to_string(),
                Value::String(API_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "api_contract_version": API_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("failed to parse JSON in {}", path.display()))
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_filter);

    let api = TrackviewApi::new(ApiConfig {
        registry_enabled: !cli.no_registry,
        short_commit_len: (cli.short_commit_len > 0).then_some(cli.short_commit_len),
        ..ApiConfig::default()
    });
    match cli.command {
        Command::Models { command } => run_models(&api, command),
        Command::Runs { command } => run_runs(&api, command),
        Command::Uri { command } => run_uri(&api, command),
        Command::PlotState { command } => run_plot_state(&api, command),
        Command::Search { command } => run_search(&api, command),
        Command::Source { command } => run_source(&api, command),
    }
}

fn run_models(api: &TrackviewApi, command: ModelsCommand) -> Result<()> {
    match command {
        ModelsCommand::Logged(args) => {
            let tags: RunTags = read_json(&args.tags)?;
            let models = api.logged_models(&LoggedModelsRequest { tags });
            emit_json(serde_json::json!({ "models": models }))
        }
        ModelsCommand::Merge(args) => {
            let tags: RunTags = read_json(&args.tags)?;
            let model_versions = match &args.versions {
                Some(path) => match read_json::<VersionsInput>(path)? {
                    VersionsInput::Wrapped { model_versions } | VersionsInput::Bare(model_versions) => {
                        model_versions
                    }
                },
                None => Vec::new(),
            };
            let result = api.merge_models(&MergeModelsRequest { run_uuid: args.run_uuid, tags, model_versions });
            emit_json(serde_json::to_value(result)?)
        }
        ModelsCommand::Metadata(args) => {
            let document = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let metadata = api.model_metadata(&document)?;
            emit_json(serde_json::to_value(metadata)?)
        }
    }
}

fn run_runs(api: &TrackviewApi, command: RunsCommand) -> Result<()> {
    match command {
        RunsCommand::ExportCsv(args) => {
            let request = match read_json::<RunsInput>(&args.input)? {
                RunsInput::Request(request) => request,
                RunsInput::Bare(runs) => RunsCsvRequest { runs, ..RunsCsvRequest::default() },
            };
            let export = api.export_runs_csv(&request);
            fs::write(&args.out, &export.body)
                .with_context(|| format!("failed to write {}", args.out.display()))?;
            tracing::info!(out = %args.out.display(), rows = export.row_count, "wrote runs csv");

            emit_json(serde_json::json!({
                "out": args.out.display().to_string(),
                "file_name": export.file_name,
                "content_type": export.content_type,
                "row_count": export.row_count,
                "bytes": export.body.len(),
            }))
        }
        RunsCommand::Compare(args) => {
            let runs = match read_json::<RunsInput>(&args.input)? {
                RunsInput::Request(request) => request.runs,
                RunsInput::Bare(runs) => runs,
            };
            emit_json(serde_json::to_value(api.compare_runs(&CompareRunsRequest { runs }))?)
        }
    }
}

fn run_uri(api: &TrackviewApi, command: UriCommand) -> Result<()> {
    match command {
        UriCommand::Normalize(args) => {
            let results = api.normalize_uris(&NormalizeUrisRequest { uris: args.uris });
            emit_json(serde_json::json!({ "uris": results }))
        }
    }
}

fn run_plot_state(api: &TrackviewApi, command: PlotStateCommand) -> Result<()> {
    match command {
        PlotStateCommand::Decode(args) => {
            let state = api.decode_plot_state(&DecodePlotStateRequest { search: args.search });
            emit_json(serde_json::to_value(state)?)
        }
        PlotStateCommand::Encode(args) => {
            let state: MetricPlotState = read_json(&args.state)?;
            let encoded = api.encode_plot_state(&EncodePlotStateRequest { state, base_url: args.base_url })?;
            emit_json(serde_json::to_value(encoded)?)
        }
    }
}

fn run_search(api: &TrackviewApi, command: SearchCommand) -> Result<()> {
    match command {
        SearchCommand::Decode(args) => {
            let decoded = api.decode_search(&DecodeSearchRequest { search: args.search });
            emit_json(serde_json::to_value(decoded)?)
        }
        SearchCommand::Encode(args) => {
            let params: BTreeMap<String, Option<String>> = read_json(&args.params)?;
            let encoded = api.encode_search(&EncodeSearchRequest { params, base_url: args.base_url })?;
            emit_json(serde_json::to_value(encoded)?)
        }
    }
}

fn run_source(api: &TrackviewApi, command: SourceCommand) -> Result<()> {
    match command {
        SourceCommand::Describe(args) => {
            let tags: RunTags = read_json(&args.tags)?;
            let description = api.describe_source(&DescribeSourceRequest {
                run_uuid: args.run_uuid,
                tags,
                origin: args.origin,
                query: args.query,
            })?;
            emit_json(serde_json::to_value(description)?)
        }
    }
}
