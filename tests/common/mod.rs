#![allow(dead_code)]

use std::fs;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use bucket_audit::delete::DeletionStats;
use bucket_audit::domain::{
    Analysis, Assay, EnumKind, ExternalIds, FileMetadata, Participant, Sample, SequencingGroup,
};
use bucket_audit::error::AuditError;
use bucket_audit::metadata::{AUDIT_DELETION_TYPE, MetadataClient};
use bucket_audit::storage::LocalBucketClient;

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedDeletion {
    pub dataset: String,
    pub cohort_name: String,
    pub output_path: String,
    pub stats: DeletionStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedDeletion {
    pub analysis_id: i64,
    pub report_name: String,
    pub stats: DeletionStats,
}

#[derive(Default)]
pub struct MockMetadata {
    pub sequencing_groups: Vec<SequencingGroup>,
    pub analyses: Vec<Analysis>,
    pub deletion_analyses: Mutex<Vec<Analysis>>,
    pub created: Mutex<Vec<CreatedDeletion>>,
    pub updated: Mutex<Vec<UpdatedDeletion>>,
}

impl MockMetadata {
    pub fn new(sequencing_groups: Vec<SequencingGroup>, analyses: Vec<Analysis>) -> Self {
        Self {
            sequencing_groups,
            analyses,
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<CreatedDeletion> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<UpdatedDeletion> {
        self.updated.lock().unwrap().clone()
    }
}

impl MetadataClient for MockMetadata {
    fn get_sequencing_groups(
        &self,
        _dataset: &str,
        _sequencing_types: &[String],
        _technologies: &[String],
        _platforms: &[String],
    ) -> Result<Vec<SequencingGroup>, AuditError> {
        Ok(self.sequencing_groups.clone())
    }

    fn get_analyses_for_sequencing_groups(
        &self,
        _dataset: &str,
        sg_ids: &[String],
        analysis_types: &[String],
    ) -> Result<Vec<Analysis>, AuditError> {
        Ok(self
            .analyses
            .iter()
            .filter(|analysis| {
                analysis
                    .sequencing_group_id
                    .as_ref()
                    .is_some_and(|sg_id| sg_ids.contains(sg_id))
            })
            .filter(|analysis| {
                analysis_types
                    .iter()
                    .any(|kind| kind.eq_ignore_ascii_case(&analysis.analysis_type))
            })
            .cloned()
            .collect())
    }

    fn get_enum_values(&self, kind: EnumKind) -> Result<Vec<String>, AuditError> {
        let values: &[&str] = match kind {
            EnumKind::SequencingType => &["genome", "exome"],
            EnumKind::SequencingTechnology => &["short-read", "long-read"],
            EnumKind::SequencingPlatform => &["illumina", "pacbio"],
            EnumKind::AnalysisType => &["cram", "gvcf", AUDIT_DELETION_TYPE],
        };
        Ok(values.iter().map(|value| value.to_string()).collect())
    }

    fn get_audit_deletion_analysis(
        &self,
        _dataset: &str,
        output_path: &str,
    ) -> Result<Option<Analysis>, AuditError> {
        Ok(self
            .deletion_analyses
            .lock()
            .unwrap()
            .iter()
            .find(|analysis| analysis.output_path() == Some(output_path))
            .cloned())
    }

    fn create_audit_deletion_analysis(
        &self,
        dataset: &str,
        cohort_name: &str,
        output_path: &str,
        stats: &DeletionStats,
    ) -> Result<i64, AuditError> {
        let mut existing = self.deletion_analyses.lock().unwrap();
        let id = 9000 + existing.len() as i64;
        existing.push(Analysis {
            id,
            analysis_type: AUDIT_DELETION_TYPE.to_string(),
            output_file: Some(FileMetadata::new(output_path, None, None)),
            original_file: None,
            sequencing_group_id: None,
            timestamp_completed: Utc::now(),
            meta: serde_json::Value::Null,
        });
        self.created.lock().unwrap().push(CreatedDeletion {
            dataset: dataset.to_string(),
            cohort_name: cohort_name.to_string(),
            output_path: output_path.to_string(),
            stats: stats.clone(),
        });
        Ok(id)
    }

    fn update_audit_deletion_analysis(
        &self,
        existing: &Analysis,
        report_name: &str,
        stats: &DeletionStats,
    ) -> Result<i64, AuditError> {
        self.updated.lock().unwrap().push(UpdatedDeletion {
            analysis_id: existing.id,
            report_name: report_name.to_string(),
            stats: stats.clone(),
        });
        Ok(existing.id)
    }
}

pub fn file(path: &str, size: u64, checksum: Option<&str>) -> FileMetadata {
    FileMetadata::new(path, Some(size), checksum)
}

/// One sample, one participant and a single assay holding `reads`.
pub fn sequencing_group(
    id: &str,
    sample_external_id: &str,
    participant_external_id: &str,
    reads: Vec<FileMetadata>,
) -> SequencingGroup {
    let number = id
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse::<i64>()
        .unwrap_or(0);
    SequencingGroup {
        id: id.to_string(),
        sequencing_type: "genome".to_string(),
        technology: "short-read".to_string(),
        platform: "illumina".to_string(),
        sample: Sample {
            id: format!("XPG{number:03}"),
            external_ids: ExternalIds::single("", sample_external_id),
            participant: Participant {
                id: 100 + number,
                external_ids: ExternalIds::single("", participant_external_id),
            },
        },
        assays: if reads.is_empty() {
            Vec::new()
        } else {
            vec![Assay {
                id: 500 + number,
                read_files: reads,
            }]
        },
        cram_analysis: None,
    }
}

pub fn timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn cram(id: i64, sg_id: &str, output_path: &str, completed: &str) -> Analysis {
    Analysis {
        id,
        analysis_type: "cram".to_string(),
        output_file: Some(FileMetadata::new(output_path, Some(1), None)),
        original_file: None,
        sequencing_group_id: Some(sg_id.to_string()),
        timestamp_completed: timestamp(completed),
        meta: serde_json::Value::Null,
    }
}

/// A local bucket root with the given `gs://` objects created on disk.
pub fn local_buckets(objects: &[(&str, &str)]) -> (TempDir, LocalBucketClient) {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let client = LocalBucketClient::new(root);
    for (path, content) in objects {
        let target = client.blob_file(path).unwrap();
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, content).unwrap();
    }
    (temp, client)
}
