use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::ReviewAction;
use crate::error::AuditError;
use crate::metadata::MetadataClient;
use crate::report::{AuditReportEntry, ReportKind, ReportLocation, Reporter};
use crate::storage::StorageClient;

/// Recorded on the dataset's `audit_deletion` analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionStats {
    pub dataset: String,
    pub results_folder: String,
    pub report_name: String,
    pub deleted_files: usize,
    pub deleted_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionResult {
    pub dry_run: bool,
    pub deleted_files: Vec<AuditReportEntry>,
    pub missing_files: Vec<String>,
    pub not_marked: usize,
    pub total_bytes: u64,
    pub report_path: Option<String>,
    pub analysis_id: Option<i64>,
}

/// Executes reviewed deletions and records them in the metadata service.
pub struct DeleteOrchestrator<'a, M: MetadataClient, S: StorageClient> {
    metadata: &'a M,
    storage: &'a S,
    reporter: Reporter<'a, S>,
    dataset: String,
}

impl<'a, M: MetadataClient, S: StorageClient> DeleteOrchestrator<'a, M, S> {
    pub fn new(metadata: &'a M, storage: &'a S, dataset: &str, location: ReportLocation) -> Self {
        Self {
            metadata,
            storage,
            reporter: Reporter::new(storage, location),
            dataset: dataset.to_string(),
        }
    }

    /// Rows outside `files_to_delete` need a review comment; one missing
    /// comment rejects the whole batch before anything is touched.
    ///
    /// A report is written even when no row survives, so an empty run still
    /// leaves a header-only `deleted_files` report. If storage fails partway,
    /// the files already deleted are reported and recorded before the error
    /// is returned.
    pub fn delete(
        &self,
        rows: &[AuditReportEntry],
        source: ReportKind,
        dry_run: bool,
    ) -> Result<DeletionResult, AuditError> {
        let marked = rows
            .iter()
            .filter(|row| row.action == Some(ReviewAction::Delete))
            .collect::<Vec<_>>();
        let mut result = DeletionResult {
            dry_run,
            not_marked: rows.len() - marked.len(),
            ..DeletionResult::default()
        };

        if source != ReportKind::FilesToDelete {
            let unjustified = marked
                .iter()
                .filter(|row| !row.has_review_comment())
                .count();
            if unjustified > 0 {
                return Err(AuditError::MissingJustification {
                    report: source.name().to_string(),
                    count: unjustified,
                });
            }
        }

        let mut candidates = Vec::with_capacity(marked.len());
        for row in marked {
            if !self.storage.check_blob_exists(&row.filepath)? {
                warn!(path = %row.filepath, "file no longer exists, skipping delete");
                result.missing_files.push(row.filepath.clone());
                continue;
            }
            candidates.push(row.clone());
        }
        if candidates.is_empty() {
            info!(report = %source, "nothing to delete");
        }

        let mut failure = None;
        if dry_run {
            for row in &candidates {
                info!(path = %row.filepath, size = row.filesize.unwrap_or(0), "would delete");
            }
            result.deleted_files = candidates;
        } else {
            for row in candidates {
                let deleted = self.storage.delete_blobs(std::slice::from_ref(&row.filepath));
                if let Err(err) = deleted {
                    error!(path = %row.filepath, %err, "delete failed, stopping batch");
                    failure = Some(err);
                    break;
                }
                result.deleted_files.push(row);
            }
        }
        result.total_bytes = result
            .deleted_files
            .iter()
            .map(|row| row.filesize.unwrap_or(0))
            .sum();

        if let Some(err) = failure.take_if(|_| result.deleted_files.is_empty()) {
            return Err(err);
        }
        info!(
            files = result.deleted_files.len(),
            bytes = result.total_bytes,
            dry_run,
            "deletion batch complete"
        );

        let report_kind = if dry_run {
            ReportKind::DeletedFilesDryRun
        } else {
            ReportKind::DeletedFiles
        };
        let report_path = self.reporter.write_report(report_kind, &result.deleted_files)?;
        result.report_path = Some(report_path.clone());

        if !dry_run {
            result.analysis_id = Some(self.record_deletion(&report_path, report_kind)?);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Upserts the `audit_deletion` analysis keyed by the report path, with
    /// stats covering every row the report now holds.
    fn record_deletion(&self, report_path: &str, kind: ReportKind) -> Result<i64, AuditError> {
        let rows = self.reporter.get_report_rows(report_path)?;
        let location = self.reporter.location();
        let stats = DeletionStats {
            dataset: self.dataset.clone(),
            results_folder: location.results_folder.clone(),
            report_name: kind.name().to_string(),
            deleted_files: rows.len(),
            deleted_bytes: rows.iter().map(|row| row.filesize.unwrap_or(0)).sum(),
        };

        let analysis_id = match self
            .metadata
            .get_audit_deletion_analysis(&self.dataset, report_path)?
        {
            Some(existing) => {
                info!(analysis_id = existing.id, "updating audit deletion analysis");
                self.metadata
                    .update_audit_deletion_analysis(&existing, kind.name(), &stats)?
            }
            None => {
                let cohort_name = format!("{}_{}", self.dataset, location.results_folder);
                info!(cohort = %cohort_name, "creating audit deletion analysis");
                self.metadata.create_audit_deletion_analysis(
                    &self.dataset,
                    &cohort_name,
                    report_path,
                    &stats,
                )?
            }
        };
        Ok(analysis_id)
    }
}
