// crates/canon-cli/src/main.rs
// ============================================================================
// Module: Canon CLI Entry Point
// Description: Command dispatcher for loading model manifests, ingesting
// records, and running the association/projection/parent-resolution
// pipeline against a chosen storage backend.
// Dependencies: canon-config, canon-core, canon-engine, canon-materializer-demo,
// canon-store-memory, canon-store-sqlite, clap, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! `canon` has two subcommands: `ingest` appends raw records to one model's
//! intake set, and `run` starts the three pipeline workers as cancellable
//! tasks over every model named in a manifest file, until interrupted.
//! Models are not compiled in; a manifest file registers them at startup so
//! the same binary serves any schema.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use canon_config::PipelineOptions;
use canon_core::ModelDescriptor;
use canon_core::ModelName;
use canon_core::ModelRegistry;
use canon_core::ParentDeclaration;
use canon_core::SetKind;
use canon_core::StageRecord;
use canon_core::Storage;
use canon_core::StoredRecord;
use canon_core::set_name;
use canon_engine::AssociationWorker;
use canon_engine::MaterializationRegistry;
use canon_engine::ParentResolutionService;
use canon_engine::PipelineContext;
use canon_engine::ProjectionWorker;
use canon_engine::PurgeWorker;
use canon_engine::cancel_pair;
use canon_materializer_demo::FirstSeenMaterializer;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "canon", arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Append records from a JSON file to one model's intake set.
    Ingest(IngestArgs),
    /// Run the association, projection, and parent resolution workers.
    Run(RunArgs),
}

/// Storage backend selection shared by every subcommand.
#[derive(Args, Debug)]
struct StorageArgs {
    /// Which storage backend to open.
    #[arg(long, value_enum, default_value_t = StoreKind::Memory)]
    store: StoreKind,
    /// SQLite file path, required when `--store sqlite` is chosen.
    #[arg(long, value_name = "PATH")]
    sqlite_path: Option<PathBuf>,
    /// Path to the model manifest JSON file.
    #[arg(long, value_name = "PATH")]
    models: PathBuf,
    /// Path to a pipeline options TOML file; falls back to
    /// `PipelineOptions::load`'s own resolution order when absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Storage backend kinds exposed on the command line.
#[derive(ValueEnum, Copy, Clone, Debug)]
enum StoreKind {
    /// In-memory store; contents are lost on exit.
    Memory,
    /// Durable SQLite-backed store.
    Sqlite,
}

/// Arguments for the `ingest` command.
#[derive(Args, Debug)]
struct IngestArgs {
    #[command(flatten)]
    storage: StorageArgs,
    /// Model to ingest into; must appear in the model manifest.
    #[arg(long)]
    model: String,
    /// JSON file containing an array of [`IngestRecord`] values.
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    storage: StorageArgs,
    /// Seconds between parent resolution sweep passes.
    #[arg(long, default_value_t = 30)]
    parent_sweep_interval_secs: u64,
}

// ============================================================================
// SECTION: Model Manifest
// ============================================================================

/// One model's entry in the manifest file; converts to a [`ModelDescriptor`].
#[derive(Debug, Deserialize)]
struct ModelManifestEntry {
    name: String,
    #[serde(default)]
    aggregation_tags: Vec<String>,
    #[serde(default)]
    external_id_keys: Vec<String>,
    #[serde(default)]
    parent: Option<ParentManifestEntry>,
}

/// A manifest entry's parent relationship, tagged by `kind`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ParentManifestEntry {
    /// Maps to [`ParentDeclaration::EntityParent`].
    Entity { parent_model: String, parent_key_path: String },
    /// Maps to [`ParentDeclaration::ValueObjectParent`].
    ValueObject { parent_model: String, parent_key_path: String },
}

impl From<ModelManifestEntry> for ModelDescriptor {
    fn from(entry: ModelManifestEntry) -> Self {
        let mut descriptor =
            ModelDescriptor::root(entry.name, entry.aggregation_tags).with_external_id_keys(entry.external_id_keys);
        if let Some(parent) = entry.parent {
            descriptor = descriptor.with_parent(match parent {
                ParentManifestEntry::Entity { parent_model, parent_key_path } => {
                    ParentDeclaration::EntityParent { parent_model: ModelName::new(parent_model), parent_key_path }
                }
                ParentManifestEntry::ValueObject { parent_model, parent_key_path } => {
                    ParentDeclaration::ValueObjectParent { parent_model: ModelName::new(parent_model), parent_key_path }
                }
            });
        }
        descriptor
    }
}

/// An intake record as read from an `ingest --file` JSON array; maps
/// directly onto [`StageRecord`] minus the fields assigned at intake time.
#[derive(Debug, Deserialize)]
struct IngestRecord {
    source_id: String,
    #[serde(default)]
    policy_version: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    source: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper covering every failure mode across subcommands.
#[derive(Debug, Error)]
enum CliError {
    /// A file could not be read from disk.
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    /// A file's contents did not parse as the expected JSON shape.
    #[error("failed to parse {path}: {source}")]
    Json { path: PathBuf, source: serde_json::Error },
    /// The pipeline config file failed to load or validate.
    #[error("config error: {0}")]
    Config(#[from] canon_config::ConfigError),
    /// The model manifest registered a descriptor that conflicted with one
    /// already registered, or named an unknown model.
    #[error("model registry error: {0}")]
    Registry(#[from] canon_core::RegistryError),
    /// `--store sqlite` was chosen without `--sqlite-path`.
    #[error("--sqlite-path is required when --store sqlite is chosen")]
    MissingSqlitePath,
    /// Opening the SQLite backend failed.
    #[error("failed to open sqlite store: {0}")]
    Sqlite(#[from] canon_store_sqlite::SqliteStoreError),
    /// `--model` named a model absent from the manifest.
    #[error("model {0:?} is not present in the model manifest")]
    UnknownModel(String),
    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] canon_core::StorageError),
}

type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "canon exited with an error");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed CLI command.
async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => command_ingest(args),
        Commands::Run(args) => command_run(args).await,
    }
}

// ============================================================================
// SECTION: Shared Setup
// ============================================================================

/// Reads and parses a JSON file into `T`.
fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> CliResult<T> {
    let bytes = fs::read(path).map_err(|source| CliError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_slice(&bytes).map_err(|source| CliError::Json { path: path.to_path_buf(), source })
}

/// Builds the model registry from the manifest named in `args`.
fn load_registry(path: &std::path::Path) -> CliResult<ModelRegistry> {
    let entries: Vec<ModelManifestEntry> = read_json(path)?;
    let registry = ModelRegistry::new();
    for entry in entries {
        registry.register(ModelDescriptor::from(entry))?;
    }
    Ok(registry)
}

/// Opens the storage backend named in `args`.
fn open_storage(args: &StorageArgs) -> CliResult<Arc<dyn Storage>> {
    match args.store {
        StoreKind::Memory => Ok(Arc::new(canon_store_memory::InMemoryStorage::new())),
        StoreKind::Sqlite => {
            let path = args.sqlite_path.as_ref().ok_or(CliError::MissingSqlitePath)?;
            Ok(Arc::new(canon_store_sqlite::SqliteStorage::open(path)?))
        }
    }
}

/// Builds a [`PipelineContext`] from `args`: opens storage, loads the model
/// manifest, and loads pipeline options.
fn build_context(args: &StorageArgs) -> CliResult<PipelineContext> {
    let storage = open_storage(args)?;
    let registry = Arc::new(load_registry(&args.models)?);
    let options = PipelineOptions::load(args.config.as_deref())?;
    Ok(PipelineContext::new(storage, registry, options))
}

/// Binds a [`FirstSeenMaterializer`] as the default materializer for every
/// non-value-object model the registry knows about.
fn default_materializers(context: &PipelineContext, model_names: &[ModelName]) -> MaterializationRegistry {
    let mut materializers = MaterializationRegistry::new();
    for model in model_names {
        if let Some(descriptor) = context.registry.get(model) {
            if !descriptor.parent.is_value_object() {
                materializers.register_materializer(model.clone(), Arc::new(FirstSeenMaterializer));
            }
        }
    }
    materializers
}

// ============================================================================
// SECTION: Ingest Command
// ============================================================================

/// Executes the `ingest` command: reads a JSON array of records and upserts
/// each into the named model's intake set with a freshly minted intake id.
fn command_ingest(args: IngestArgs) -> CliResult<()> {
    let context = build_context(&args.storage)?;
    let model = ModelName::new(args.model.clone());
    if context.registry.get(&model).is_none() {
        return Err(CliError::UnknownModel(args.model));
    }

    let records: Vec<IngestRecord> = read_json(&args.file)?;
    let intake_set = set_name(&model, SetKind::StageIntake);
    let mut ingested = 0u64;
    for record in records {
        let stage_record = StageRecord {
            id: canon_core::ReferenceId::generate().to_string(),
            source_id: record.source_id,
            occurred_at: time::OffsetDateTime::now_utc(),
            policy_version: record.policy_version,
            correlation_id: record.correlation_id,
            data: record.data,
            source: record.source,
            reference_id: None,
        };
        let payload = serde_json::to_value(&stage_record).map_err(|source| CliError::Json {
            path: args.file.clone(),
            source,
        })?;
        context.storage.upsert(&intake_set, StoredRecord { id: stage_record.id, payload, sequence: 0 })?;
        ingested += 1;
    }
    tracing::info!(model = %model, ingested, "ingest complete");
    Ok(())
}

// ============================================================================
// SECTION: Run Command
// ============================================================================

/// Executes the `run` command: starts every worker over every model in the
/// manifest and waits for Ctrl-C.
async fn command_run(args: RunArgs) -> CliResult<()> {
    let context = Arc::new(build_context(&args.storage)?);
    let model_names = context.registry.model_names();

    let materializers = Arc::new(default_materializers(&context, &model_names));
    let association = AssociationWorker::new(Arc::clone(&context));
    let projection = ProjectionWorker::new(Arc::clone(&context), materializers);
    let parent_resolution = ParentResolutionService::new(Arc::clone(&context));
    let purge = PurgeWorker::new(Arc::clone(&context));

    let (cancel_handle, cancel_signal) = cancel_pair();
    let parent_sweep_interval = std::time::Duration::from_secs(args.parent_sweep_interval_secs);

    let association_task =
        tokio::spawn({ let models = model_names.clone(); let signal = cancel_signal.clone(); async move { association.run(models, signal).await } });
    let projection_task =
        tokio::spawn({ let models = model_names.clone(); let signal = cancel_signal.clone(); async move { projection.run(models, signal).await } });
    let parent_resolution_task = tokio::spawn({
        let models = model_names.clone();
        let signal = cancel_signal.clone();
        async move { parent_resolution.run(models, parent_sweep_interval, signal).await }
    });
    let purge_task =
        tokio::spawn({ let models = model_names.clone(); let signal = cancel_signal.clone(); async move { purge.run(models, signal).await } });

    tracing::info!(models = ?model_names, "canon pipeline running, press Ctrl-C to stop");
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested, draining workers");
    cancel_handle.cancel();

    let _ = tokio::join!(association_task, projection_task, parent_resolution_task, purge_task);
    Ok(())
}
