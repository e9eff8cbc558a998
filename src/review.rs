use serde::Serialize;
use tracing::{info, warn};

use crate::domain::ReviewAction;
use crate::error::AuditError;
use crate::filter::filter_rows;
use crate::report::AuditReportEntry;
use crate::storage::StorageClient;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewResult {
    pub reviewed_files: Vec<AuditReportEntry>,
    pub missing_files: Vec<String>,
    pub total_bytes: u64,
    pub report_path: Option<String>,
}

/// Annotates report rows with an action and comment. Never deletes anything.
pub struct ReviewOrchestrator<'a, S: StorageClient> {
    storage: &'a S,
}

impl<'a, S: StorageClient> ReviewOrchestrator<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub fn review(
        &self,
        rows: &[AuditReportEntry],
        action: &str,
        comment: &str,
        filters: &[String],
    ) -> Result<ReviewResult, AuditError> {
        let action: ReviewAction = action.parse()?;
        let selected = if filters.is_empty() {
            rows.to_vec()
        } else {
            filter_rows(filters, rows)?
        };

        let mut result = ReviewResult::default();
        for row in &selected {
            if !self.storage.check_blob_exists(&row.filepath)? {
                warn!(path = %row.filepath, "file no longer exists, skipping review");
                result.missing_files.push(row.filepath.clone());
                continue;
            }
            result.total_bytes += row.filesize.unwrap_or(0);
            result.reviewed_files.push(row.reviewed(action, comment));
        }
        info!(
            %action,
            reviewed = result.reviewed_files.len(),
            missing = result.missing_files.len(),
            "review complete"
        );
        Ok(result)
    }
}
