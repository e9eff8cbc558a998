use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::analyzer::AuditAnalyzer;
use crate::config::{AuditConfig, Config, ConfigLoader};
use crate::delete::{DeleteOrchestrator, DeletionResult};
use crate::error::AuditError;
use crate::metadata::MetadataClient;
use crate::report::{
    AuditReportEntry, AuditSummary, ReportKind, ReportLocation, Reporter, WrittenReports,
    generate_summary_statistics,
};
use crate::review::{ReviewOrchestrator, ReviewResult};
use crate::storage::StorageClient;

#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    pub dataset: String,
    pub results_folder: String,
    pub summary: AuditSummary,
    pub reports: WrittenReports,
}

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub location: ReportLocation,
    pub source: ReportKind,
    pub action: String,
    pub comment: String,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub dataset: String,
    pub location: ReportLocation,
    pub source: ReportKind,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress events to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

/// Owns both collaborators for the lifetime of a command.
pub struct App<M: MetadataClient, S: StorageClient> {
    metadata: M,
    storage: S,
}

impl<M: MetadataClient, S: StorageClient> App<M, S> {
    pub fn new(metadata: M, storage: S) -> Self {
        Self { metadata, storage }
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn resolve_config(&self, config: Config) -> Result<AuditConfig, AuditError> {
        ConfigLoader::resolve_config(config, &self.metadata)
    }

    pub fn audit(
        &self,
        config: &AuditConfig,
        sink: &dyn ProgressSink,
    ) -> Result<AuditOutcome, AuditError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; sequencing groups for {}", config.dataset),
            elapsed: None,
        });
        let mut sequencing_groups = self.metadata.get_sequencing_groups(
            &config.dataset,
            &config.sequencing_types,
            &config.sequencing_technologies,
            &config.sequencing_platforms,
        )?;
        let sg_ids = sequencing_groups
            .iter()
            .map(|sg| sg.id.clone())
            .collect::<Vec<_>>();

        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; analyses for {} groups, scanning gs://{}",
                sg_ids.len(),
                config.upload_bucket
            ),
            elapsed: Some(started.elapsed()),
        });
        let extensions = config.extensions();
        let (analyses, bucket_files) = thread::scope(|scope| {
            let analyses = scope.spawn(|| {
                self.metadata.get_analyses_for_sequencing_groups(
                    &config.dataset,
                    &sg_ids,
                    &config.analysis_types,
                )
            });
            let bucket_files = self.storage.list_blobs(
                &config.upload_bucket,
                &extensions,
                &config.excluded_prefixes,
            );
            let analyses = analyses.join().map_err(|_| {
                AuditError::MetadataQuery("analysis fetch worker panicked".to_string())
            })?;
            Ok::<_, AuditError>((analyses?, bucket_files?))
        })?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Analyze; {} groups, {} analyses, {} bucket files",
                sequencing_groups.len(),
                analyses.len(),
                bucket_files.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        let result = AuditAnalyzer::new().analyze(
            &mut sequencing_groups,
            &bucket_files,
            &analyses,
            &config.excluded_sequencing_groups,
        );

        let location = ReportLocation::new(&config.reports_bucket, &config.results_folder);
        sink.event(ProgressEvent {
            message: format!("phase=Report; writing to {}", location.prefix()),
            elapsed: Some(started.elapsed()),
        });
        let reports = Reporter::new(&self.storage, location).write_audit_reports(&result, config)?;

        Ok(AuditOutcome {
            dataset: config.dataset.clone(),
            results_folder: config.results_folder.clone(),
            summary: generate_summary_statistics(&result),
            reports,
        })
    }

    pub fn review(
        &self,
        request: &ReviewRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ReviewResult, AuditError> {
        let started = Instant::now();
        let reporter = Reporter::new(&self.storage, request.location.clone());
        sink.event(ProgressEvent {
            message: format!("phase=Load; report {}", request.source),
            elapsed: None,
        });
        let rows = load_entry_rows(&reporter, request.source)?;

        sink.event(ProgressEvent {
            message: format!("phase=Review; {} rows", rows.len()),
            elapsed: Some(started.elapsed()),
        });
        let mut result = ReviewOrchestrator::new(&self.storage).review(
            &rows,
            &request.action,
            &request.comment,
            &request.filters,
        )?;

        if !result.reviewed_files.is_empty() {
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Report; {} reviewed files",
                    result.reviewed_files.len()
                ),
                elapsed: Some(started.elapsed()),
            });
            result.report_path =
                Some(reporter.write_report(ReportKind::ReviewedFiles, &result.reviewed_files)?);
        }
        Ok(result)
    }

    pub fn delete(
        &self,
        request: &DeleteRequest,
        sink: &dyn ProgressSink,
    ) -> Result<DeletionResult, AuditError> {
        let started = Instant::now();
        let reporter = Reporter::new(&self.storage, request.location.clone());
        sink.event(ProgressEvent {
            message: format!("phase=Load; report {}", request.source),
            elapsed: None,
        });
        let rows = load_entry_rows(&reporter, request.source)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Delete; {} rows{}",
                rows.len(),
                if request.dry_run { " (dry run)" } else { "" }
            ),
            elapsed: Some(started.elapsed()),
        });
        DeleteOrchestrator::new(
            &self.metadata,
            &self.storage,
            &request.dataset,
            request.location.clone(),
        )
        .delete(&rows, request.source, request.dry_run)
    }
}

fn load_entry_rows<S: StorageClient>(
    reporter: &Reporter<'_, S>,
    source: ReportKind,
) -> Result<Vec<AuditReportEntry>, AuditError> {
    if !source.is_entry_report() {
        return Err(AuditError::InvalidReportName(format!(
            "{source} holds sequencing groups, not files"
        )));
    }
    reporter.get_report_rows_from_name(source)
}
