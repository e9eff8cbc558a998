mod common;

use assert_matches::assert_matches;

use bucket_audit::error::AuditError;
use bucket_audit::storage::StorageClient;

use common::local_buckets;

fn extensions(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn listing_filters_by_extension_and_prefix() {
    let (_temp, storage) = local_buckets(&[
        ("gs://up/batch1/a_R1.fq.gz", "aaaa"),
        ("gs://up/batch1/notes.txt", "ignored"),
        ("gs://up/tmp/b_R1.fq.gz", "bb"),
        ("gs://up/c.bam", "ccc"),
        ("gs://other/d.bam", "d"),
    ]);

    let files = storage
        .list_blobs(
            "up",
            &extensions(&[".fq.gz", ".bam"]),
            &["tmp/".to_string()],
        )
        .unwrap();

    let listed = files
        .iter()
        .map(|file| (file.path.as_str(), file.size))
        .collect::<Vec<_>>();
    assert_eq!(
        listed,
        vec![
            ("gs://up/batch1/a_R1.fq.gz", Some(4)),
            ("gs://up/c.bam", Some(3)),
        ]
    );
    assert!(files.iter().all(|file| file.checksum.is_none()));
}

#[test]
fn excluded_prefix_may_be_a_full_uri() {
    let (_temp, storage) = local_buckets(&[
        ("gs://up/keep/a.bam", "a"),
        ("gs://up/skip/b.bam", "b"),
    ]);

    let files = storage
        .list_blobs("up", &extensions(&[".bam"]), &["gs://up/skip".to_string()])
        .unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "gs://up/keep/a.bam");
}

#[test]
fn missing_bucket_lists_nothing() {
    let (_temp, storage) = local_buckets(&[]);

    let files = storage.list_blobs("absent", &extensions(&[".bam"]), &[]).unwrap();

    assert!(files.is_empty());
}

#[test]
fn text_round_trip_and_delete() {
    let (_temp, storage) = local_buckets(&[("gs://up/a.bam", "a")]);

    storage
        .write_text("gs://reports/run/report.csv", "x,y\n1,2\n")
        .unwrap();
    assert_eq!(
        storage
            .read_text("gs://reports/run/report.csv")
            .unwrap()
            .as_deref(),
        Some("x,y\n1,2\n")
    );
    assert!(storage.read_text("gs://reports/run/none.csv").unwrap().is_none());

    assert!(storage.check_blob_exists("gs://up/a.bam").unwrap());
    storage
        .delete_blobs(&["gs://up/a.bam".to_string(), "gs://up/gone.bam".to_string()])
        .unwrap();
    assert!(!storage.check_blob_exists("gs://up/a.bam").unwrap());
}

#[test]
fn paths_outside_a_bucket_are_rejected() {
    let (_temp, storage) = local_buckets(&[]);

    assert_matches!(
        storage.check_blob_exists("/local/file.bam"),
        Err(AuditError::InvalidBlobPath(_))
    );
    assert_matches!(
        storage.read_text("gs://up/../secret"),
        Err(AuditError::InvalidBlobPath(_))
    );
}
