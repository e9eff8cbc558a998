mod common;

use assert_matches::assert_matches;

use bucket_audit::domain::ReviewAction;
use bucket_audit::error::AuditError;
use bucket_audit::report::AuditReportEntry;
use bucket_audit::review::ReviewOrchestrator;
use bucket_audit::storage::StorageClient;

use common::local_buckets;

fn row(path: &str, size: u64, sg_type: Option<&str>) -> AuditReportEntry {
    AuditReportEntry {
        filepath: path.to_string(),
        filesize: Some(size),
        sg_type: sg_type.map(str::to_string),
        ..AuditReportEntry::default()
    }
}

#[test]
fn invalid_action_is_rejected() {
    let (_temp, storage) = local_buckets(&[("gs://up/a.fq", "a")]);
    let orchestrator = ReviewOrchestrator::new(&storage);

    let result = orchestrator.review(&[row("gs://up/a.fq", 1, None)], "archive", "why", &[]);

    assert_matches!(result, Err(AuditError::InvalidReviewAction(value)) if value == "archive");
}

#[test]
fn rows_are_annotated_without_mutating_input() {
    let (_temp, storage) = local_buckets(&[("gs://up/a.fq", "a"), ("gs://up/b.fq", "b")]);
    let rows = vec![row("gs://up/a.fq", 1, None), row("gs://up/b.fq", 2, None)];

    let result = ReviewOrchestrator::new(&storage)
        .review(&rows, "delete", "  duplicate upload ", &[])
        .unwrap();

    assert_eq!(result.reviewed_files.len(), 2);
    assert_eq!(result.total_bytes, 3);
    for reviewed in &result.reviewed_files {
        assert_eq!(reviewed.action, Some(ReviewAction::Delete));
        assert_eq!(reviewed.review_comment.as_deref(), Some("duplicate upload"));
    }
    assert!(rows.iter().all(|row| row.action.is_none()));
    assert!(storage.check_blob_exists("gs://up/a.fq").unwrap());
}

#[test]
fn filters_narrow_the_rows() {
    let (_temp, storage) = local_buckets(&[
        ("gs://up/a.fq", "a"),
        ("gs://up/b.fq", "b"),
        ("gs://up/c.fq", "c"),
    ]);
    let rows = vec![
        row("gs://up/a.fq", 100, Some("genome")),
        row("gs://up/b.fq", 5000, Some("genome")),
        row("gs://up/c.fq", 9000, Some("exome")),
    ];

    let result = ReviewOrchestrator::new(&storage)
        .review(
            &rows,
            "INGEST",
            "",
            &["sg_type == genome".to_string(), "File Size > 1000".to_string()],
        )
        .unwrap();

    assert_eq!(result.reviewed_files.len(), 1);
    assert_eq!(result.reviewed_files[0].filepath, "gs://up/b.fq");
    assert_eq!(result.reviewed_files[0].action, Some(ReviewAction::Ingest));
    assert!(result.reviewed_files[0].review_comment.is_none());
}

#[test]
fn malformed_filter_fails() {
    let (_temp, storage) = local_buckets(&[]);

    let result = ReviewOrchestrator::new(&storage).review(
        &[row("gs://up/a.fq", 1, None)],
        "REVIEW",
        "",
        &["filesize bigger 10".to_string()],
    );

    assert_matches!(result, Err(AuditError::InvalidFilter(_)));
}

#[test]
fn missing_files_are_skipped() {
    let (_temp, storage) = local_buckets(&[("gs://up/a.fq", "a")]);
    let rows = vec![row("gs://up/a.fq", 1, None), row("gs://up/gone.fq", 2, None)];

    let result = ReviewOrchestrator::new(&storage)
        .review(&rows, "REVIEW", "check later", &[])
        .unwrap();

    assert_eq!(result.reviewed_files.len(), 1);
    assert_eq!(result.missing_files, vec!["gs://up/gone.fq".to_string()]);
}
