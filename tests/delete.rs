mod common;

use assert_matches::assert_matches;

use bucket_audit::delete::{DeleteOrchestrator, DeletionStats};
use bucket_audit::domain::ReviewAction;
use bucket_audit::error::AuditError;
use bucket_audit::report::{AuditReportEntry, ReportKind, ReportLocation, Reporter};
use bucket_audit::domain::FileMetadata;
use bucket_audit::storage::{LocalBucketClient, StorageClient};

use common::{MockMetadata, local_buckets};

const REPORT_PATH: &str = "gs://analysis/audit_results/run1/deleted_files.csv";

fn location() -> ReportLocation {
    ReportLocation::new("analysis", "run1")
}

/// Fails deletes of one path with a server error.
struct FailingDelete {
    inner: LocalBucketClient,
    failing_path: &'static str,
}

impl StorageClient for FailingDelete {
    fn list_blobs(
        &self,
        bucket: &str,
        extensions: &[String],
        excluded_prefixes: &[String],
    ) -> Result<Vec<FileMetadata>, AuditError> {
        self.inner.list_blobs(bucket, extensions, excluded_prefixes)
    }

    fn check_blob_exists(&self, path: &str) -> Result<bool, AuditError> {
        self.inner.check_blob_exists(path)
    }

    fn delete_blobs(&self, paths: &[String]) -> Result<(), AuditError> {
        if paths.iter().any(|path| path == self.failing_path) {
            return Err(AuditError::StorageStatus {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        self.inner.delete_blobs(paths)
    }

    fn read_text(&self, path: &str) -> Result<Option<String>, AuditError> {
        self.inner.read_text(path)
    }

    fn write_text(&self, path: &str, content: &str) -> Result<(), AuditError> {
        self.inner.write_text(path, content)
    }
}

fn marked(path: &str, size: u64, comment: Option<&str>) -> AuditReportEntry {
    AuditReportEntry {
        filepath: path.to_string(),
        filesize: Some(size),
        sg_id: Some("SG01".to_string()),
        action: Some(ReviewAction::Delete),
        review_comment: comment.map(str::to_string),
        ..AuditReportEntry::default()
    }
}

#[test]
fn canonical_report_needs_no_comment() {
    let metadata = MockMetadata::default();
    let (_temp, storage) = local_buckets(&[("gs://up/SG01_R1.fq", "reads")]);
    let rows = vec![marked("gs://up/SG01_R1.fq", 5, None)];

    let result = DeleteOrchestrator::new(&metadata, &storage, "tob", location())
        .delete(&rows, ReportKind::FilesToDelete, false)
        .unwrap();

    assert_eq!(result.deleted_files.len(), 1);
    assert_eq!(result.total_bytes, 5);
    assert!(!storage.check_blob_exists("gs://up/SG01_R1.fq").unwrap());
    assert_eq!(result.report_path.as_deref(), Some(REPORT_PATH));
    assert_eq!(result.analysis_id, Some(9000));
}

#[test]
fn reviewed_row_without_comment_fails_whole_batch() {
    let metadata = MockMetadata::default();
    let (_temp, storage) = local_buckets(&[
        ("gs://up/SG01_R1.fq", "reads"),
        ("gs://up/SG01_R2.fq", "reads"),
    ]);
    let rows = vec![
        marked("gs://up/SG01_R1.fq", 5, Some("aligned elsewhere")),
        marked("gs://up/SG01_R2.fq", 5, None),
    ];

    let result = DeleteOrchestrator::new(&metadata, &storage, "tob", location()).delete(
        &rows,
        ReportKind::FilesToReview,
        false,
    );

    assert_matches!(
        result,
        Err(AuditError::MissingJustification { count: 1, .. })
    );
    assert!(storage.check_blob_exists("gs://up/SG01_R1.fq").unwrap());
    assert!(storage.check_blob_exists("gs://up/SG01_R2.fq").unwrap());
    assert!(metadata.created().is_empty());
}

#[test]
fn dry_run_leaves_storage_and_metadata_alone() {
    let metadata = MockMetadata::default();
    let (_temp, storage) = local_buckets(&[("gs://up/SG01_R1.fq", "reads")]);
    let rows = vec![marked("gs://up/SG01_R1.fq", 5, None)];

    let result = DeleteOrchestrator::new(&metadata, &storage, "tob", location())
        .delete(&rows, ReportKind::FilesToDelete, true)
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.deleted_files.len(), 1);
    assert!(storage.check_blob_exists("gs://up/SG01_R1.fq").unwrap());
    assert_eq!(
        result.report_path.as_deref(),
        Some("gs://analysis/audit_results/run1/deleted_files_dry_run.csv")
    );
    assert!(result.analysis_id.is_none());
    assert!(metadata.created().is_empty());
    assert!(metadata.updated().is_empty());
}

#[test]
fn rows_not_marked_delete_are_ignored() {
    let metadata = MockMetadata::default();
    let (_temp, storage) = local_buckets(&[("gs://up/keep.fq", "keep")]);
    let rows = vec![
        AuditReportEntry {
            filepath: "gs://up/keep.fq".to_string(),
            action: Some(ReviewAction::Ingest),
            ..AuditReportEntry::default()
        },
        AuditReportEntry {
            filepath: "gs://up/keep.fq".to_string(),
            ..AuditReportEntry::default()
        },
    ];

    let result = DeleteOrchestrator::new(&metadata, &storage, "tob", location())
        .delete(&rows, ReportKind::ReviewedFiles, false)
        .unwrap();

    assert_eq!(result.not_marked, 2);
    assert!(result.deleted_files.is_empty());
    assert!(storage.check_blob_exists("gs://up/keep.fq").unwrap());

    assert_eq!(result.report_path.as_deref(), Some(REPORT_PATH));
    let report = storage.read_text(REPORT_PATH).unwrap().unwrap();
    assert_eq!(report.lines().count(), 1);
    assert_eq!(metadata.created()[0].stats.deleted_files, 0);
}

#[test]
fn missing_files_are_skipped() {
    let metadata = MockMetadata::default();
    let (_temp, storage) = local_buckets(&[("gs://up/a.fq", "aa")]);
    let rows = vec![
        marked("gs://up/a.fq", 2, None),
        marked("gs://up/already_gone.fq", 8, None),
    ];

    let result = DeleteOrchestrator::new(&metadata, &storage, "tob", location())
        .delete(&rows, ReportKind::FilesToDelete, false)
        .unwrap();

    assert_eq!(result.missing_files, vec!["gs://up/already_gone.fq".to_string()]);
    assert_eq!(result.deleted_files.len(), 1);
    assert_eq!(result.total_bytes, 2);
}

#[test]
fn first_deletion_creates_analysis_and_rerun_updates_it() {
    let metadata = MockMetadata::default();
    let (_temp, storage) = local_buckets(&[
        ("gs://up/a.fq", "aa"),
        ("gs://up/b.fq", "bbb"),
    ]);
    let orchestrator = DeleteOrchestrator::new(&metadata, &storage, "tob", location());

    orchestrator
        .delete(&[marked("gs://up/a.fq", 2, None)], ReportKind::FilesToDelete, false)
        .unwrap();
    let created = metadata.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].dataset, "tob");
    assert_eq!(created[0].cohort_name, "tob_run1");
    assert_eq!(created[0].output_path, REPORT_PATH);
    assert_eq!(
        created[0].stats,
        DeletionStats {
            dataset: "tob".to_string(),
            results_folder: "run1".to_string(),
            report_name: "deleted_files".to_string(),
            deleted_files: 1,
            deleted_bytes: 2,
        }
    );

    orchestrator
        .delete(
            &[marked("gs://up/b.fq", 3, Some("confirmed"))],
            ReportKind::ReviewedFiles,
            false,
        )
        .unwrap();
    let updated = metadata.updated();
    assert_eq!(metadata.created().len(), 1);
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].analysis_id, 9000);
    assert_eq!(updated[0].stats.deleted_files, 2);
    assert_eq!(updated[0].stats.deleted_bytes, 5);

    let reporter = Reporter::new(&storage, location());
    let rows = reporter
        .get_report_rows_from_name(ReportKind::DeletedFiles)
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn storage_failure_still_records_completed_deletions() {
    let metadata = MockMetadata::default();
    let (_temp, inner) = local_buckets(&[
        ("gs://up/a.fq", "aa"),
        ("gs://up/b.fq", "bbb"),
        ("gs://up/c.fq", "c"),
    ]);
    let storage = FailingDelete {
        inner,
        failing_path: "gs://up/b.fq",
    };
    let rows = vec![
        marked("gs://up/a.fq", 2, None),
        marked("gs://up/b.fq", 3, None),
        marked("gs://up/c.fq", 1, None),
    ];

    let result = DeleteOrchestrator::new(&metadata, &storage, "tob", location()).delete(
        &rows,
        ReportKind::FilesToDelete,
        false,
    );

    assert_matches!(result, Err(AuditError::StorageStatus { status: 503, .. }));
    assert!(!storage.check_blob_exists("gs://up/a.fq").unwrap());
    assert!(storage.check_blob_exists("gs://up/b.fq").unwrap());
    assert!(storage.check_blob_exists("gs://up/c.fq").unwrap());

    let reported = Reporter::new(&storage, location())
        .get_report_rows_from_name(ReportKind::DeletedFiles)
        .unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].filepath, "gs://up/a.fq");

    let created = metadata.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].stats.deleted_files, 1);
    assert_eq!(created[0].stats.deleted_bytes, 2);
}

#[test]
fn failure_on_first_file_writes_no_report() {
    let metadata = MockMetadata::default();
    let (_temp, inner) = local_buckets(&[("gs://up/a.fq", "aa")]);
    let storage = FailingDelete {
        inner,
        failing_path: "gs://up/a.fq",
    };

    let result = DeleteOrchestrator::new(&metadata, &storage, "tob", location()).delete(
        &[marked("gs://up/a.fq", 2, None)],
        ReportKind::FilesToDelete,
        false,
    );

    assert_matches!(result, Err(AuditError::StorageStatus { .. }));
    assert!(storage.read_text(REPORT_PATH).unwrap().is_none());
    assert!(metadata.created().is_empty());
}
