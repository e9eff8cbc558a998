use std::path::Path;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bucket_audit::app::{App, DeleteRequest, LogSink, ReviewRequest};
use bucket_audit::config::{Config, ConfigLoader, DEFAULT_CONFIG_FILE};
use bucket_audit::error::AuditError;
use bucket_audit::metadata::GraphQlMetadataClient;
use bucket_audit::output::JsonOutput;
use bucket_audit::report::{ReportKind, ReportLocation};
use bucket_audit::storage::{GcsHttpClient, LocalBucketClient, StorageClient};

#[derive(Parser)]
#[command(name = "bucket-audit")]
#[command(about = "Audit upload buckets against sequencing metadata and clean up aligned reads")]
#[command(version, author)]
struct Cli {
    /// Audit config file (JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, env = "METADATA_API_URL")]
    metadata_url: Option<String>,

    #[arg(long, global = true, env = "METADATA_API_TOKEN", hide_env_values = true)]
    metadata_token: Option<String>,

    #[arg(long, global = true, env = "STORAGE_ACCESS_TOKEN", hide_env_values = true)]
    storage_token: Option<String>,

    /// Serve buckets from directories under this root instead of cloud storage
    #[arg(long, global = true)]
    local_root: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Compare metadata with bucket contents and write reports")]
    Audit(AuditArgs),
    #[command(about = "Annotate report rows with an action and comment")]
    Review(ReviewArgs),
    #[command(about = "Delete files marked DELETE in a report")]
    Delete(DeleteArgs),
}

#[derive(Args)]
struct AuditArgs {
    #[arg(long)]
    dataset: Option<String>,

    #[arg(long)]
    results_folder: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    dataset: Option<String>,

    #[arg(long)]
    reports_bucket: Option<String>,

    /// Folder of the audit run whose reports are used
    #[arg(long)]
    results_folder: String,
}

#[derive(Args)]
struct ReviewArgs {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, value_enum, default_value = "files_to_review")]
    report: ReportKind,

    /// DELETE, INGEST or REVIEW
    #[arg(long)]
    action: String,

    #[arg(long, default_value = "")]
    comment: String,

    /// Row filter such as "filesize > 1000 and sg_type == genome"; repeatable
    #[arg(long = "filter")]
    filters: Vec<String>,
}

#[derive(Args)]
struct DeleteArgs {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, value_enum, default_value = "files_to_delete")]
    report: ReportKind,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(audit) = report.downcast_ref::<AuditError>() {
            return ExitCode::from(map_exit_code(audit));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AuditError) -> u8 {
    match error {
        AuditError::InvalidEnumValue { .. }
        | AuditError::InvalidReviewAction(_)
        | AuditError::InvalidFileType(_)
        | AuditError::InvalidReportName(_)
        | AuditError::InvalidFilter(_)
        | AuditError::MissingConfig(_)
        | AuditError::ConfigRead(_)
        | AuditError::ConfigParse(_)
        | AuditError::MissingSetting(_) => 2,
        AuditError::MetadataHttp(_)
        | AuditError::MetadataStatus { .. }
        | AuditError::MetadataQuery(_)
        | AuditError::StorageHttp(_)
        | AuditError::StorageStatus { .. } => 3,
        AuditError::MissingJustification { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let metadata_url = cli
        .metadata_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| AuditError::MissingSetting("metadata URL (METADATA_API_URL)".to_string()))?;
    let metadata = GraphQlMetadataClient::new(&metadata_url, cli.metadata_token.clone())?;

    match cli.local_root.clone() {
        Some(root) => dispatch(&cli, App::new(metadata, LocalBucketClient::new(root))),
        None => {
            let storage = GcsHttpClient::new(cli.storage_token.clone())?;
            dispatch(&cli, App::new(metadata, storage))
        }
    }
}

fn dispatch<S: StorageClient>(
    cli: &Cli,
    app: App<GraphQlMetadataClient, S>,
) -> miette::Result<()> {
    match &cli.command {
        Commands::Audit(args) => {
            let mut config = load_config(cli.config.as_deref(), args.dataset.as_deref())?;
            if let Some(folder) = &args.results_folder {
                config.results_folder = Some(folder.clone());
            }
            let config = app.resolve_config(config)?;
            let outcome = app.audit(&config, &LogSink)?;
            JsonOutput::print_audit(&outcome).into_diagnostic()?;
        }
        Commands::Review(args) => {
            let (_, location) = resolve_run(cli, &args.run)?;
            let request = ReviewRequest {
                location,
                source: args.report,
                action: args.action.clone(),
                comment: args.comment.clone(),
                filters: args.filters.clone(),
            };
            let result = app.review(&request, &LogSink)?;
            JsonOutput::print_review(&result).into_diagnostic()?;
        }
        Commands::Delete(args) => {
            let (dataset, location) = resolve_run(cli, &args.run)?;
            let request = DeleteRequest {
                dataset,
                location,
                source: args.report,
                dry_run: args.dry_run,
            };
            let result = app.delete(&request, &LogSink)?;
            JsonOutput::print_delete(&result).into_diagnostic()?;
        }
    }
    Ok(())
}

/// A `--dataset` without a config file audits that dataset with defaults.
fn load_config(path: Option<&str>, dataset: Option<&str>) -> Result<Config, AuditError> {
    let config_missing = path.is_none() && !Path::new(DEFAULT_CONFIG_FILE).exists();
    let mut config = match dataset {
        Some(dataset) if config_missing => Config::for_dataset(dataset),
        _ => ConfigLoader::load(path)?,
    };
    if let Some(dataset) = dataset {
        config.dataset = dataset.to_string();
    }
    Ok(config)
}

fn resolve_run(cli: &Cli, args: &RunArgs) -> Result<(String, ReportLocation), AuditError> {
    let config = load_config(cli.config.as_deref(), args.dataset.as_deref())?;
    let dataset = config.dataset.trim().to_string();
    if dataset.is_empty() {
        return Err(AuditError::MissingSetting("dataset".to_string()));
    }
    let reports_bucket = args
        .reports_bucket
        .clone()
        .or(config.reports_bucket)
        .filter(|bucket| !bucket.trim().is_empty())
        .unwrap_or_else(|| format!("{dataset}-main-analysis"));
    let results_folder = args.results_folder.trim();
    if results_folder.is_empty() {
        return Err(AuditError::MissingSetting("results folder".to_string()));
    }
    Ok((dataset, ReportLocation::new(&reports_bucket, results_folder)))
}
