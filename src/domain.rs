use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// Organisation → external identifier mapping carried by samples and participants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds(BTreeMap<String, String>);

impl ExternalIds {
    pub fn new(ids: BTreeMap<String, String>) -> Self {
        Self(ids)
    }

    pub fn single(org: &str, id: &str) -> Self {
        let mut ids = BTreeMap::new();
        ids.insert(org.to_string(), id.to_string());
        Self(ids)
    }

    /// The primary id exists only when exactly one external id is recorded.
    pub fn primary(&self) -> Option<&str> {
        if self.0.len() == 1 {
            self.0.values().next().map(String::as_str)
        } else {
            None
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rendered as `org=id` pairs for reports; a lone id is written bare.
    pub fn to_report_value(&self) -> String {
        if let Some(primary) = self.primary() {
            return primary.to_string();
        }
        self.0
            .iter()
            .map(|(org, id)| format!("{org}={id}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// A file as recorded in metadata or observed in a bucket.
///
/// Two records denote the same physical object when their checksums match, or
/// when their basename and size match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
}

impl FileMetadata {
    pub fn new(path: &str, size: Option<u64>, checksum: Option<&str>) -> Self {
        Self {
            path: normalize_path(path),
            size,
            checksum: checksum
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        }
    }

    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let rest = rest.split('/').filter(|part| !part.is_empty()).collect::<Vec<_>>();
            format!("{scheme}://{}", rest.join("/"))
        }
        None => trimmed.to_string(),
    }
}

/// A file known by content whose bucket location differs from its recorded path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedFile {
    pub original_path: String,
    pub new_path: String,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub external_ids: ExternalIds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub external_ids: ExternalIds,
    pub participant: Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assay {
    pub id: i64,
    pub read_files: Vec<FileMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub analysis_type: String,
    pub output_file: Option<FileMetadata>,
    /// Pre-ingestion artifact the output was produced from, when recorded.
    pub original_file: Option<FileMetadata>,
    pub sequencing_group_id: Option<String>,
    pub timestamp_completed: DateTime<Utc>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl Analysis {
    pub fn is_cram(&self) -> bool {
        self.analysis_type.eq_ignore_ascii_case("cram")
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output_file.as_ref().map(|file| file.path.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingGroup {
    pub id: String,
    pub sequencing_type: String,
    pub technology: String,
    pub platform: String,
    pub sample: Sample,
    pub assays: Vec<Assay>,
    /// Set by the analyzer from the linked CRAM analysis.
    #[serde(default)]
    pub cram_analysis: Option<Analysis>,
}

impl SequencingGroup {
    pub fn is_complete(&self) -> bool {
        self.cram_analysis.is_some()
    }

    pub fn read_files(&self) -> impl Iterator<Item = (&Assay, &FileMetadata)> {
        self.assays
            .iter()
            .flat_map(|assay| assay.read_files.iter().map(move |file| (assay, file)))
    }

    pub fn total_read_size(&self) -> u64 {
        self.read_files()
            .map(|(_, file)| file.size.unwrap_or(0))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewAction {
    Delete,
    Ingest,
    Review,
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewAction::Delete => write!(f, "DELETE"),
            ReviewAction::Ingest => write!(f, "INGEST"),
            ReviewAction::Review => write!(f, "REVIEW"),
        }
    }
}

impl FromStr for ReviewAction {
    type Err = AuditError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DELETE" => Ok(ReviewAction::Delete),
            "INGEST" => Ok(ReviewAction::Ingest),
            "REVIEW" => Ok(ReviewAction::Review),
            _ => Err(AuditError::InvalidReviewAction(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileType {
    Fastq,
    Bam,
    Cram,
    Gvcf,
    Vcf,
    Archive,
}

impl FileType {
    pub const ALL: [FileType; 6] = [
        FileType::Fastq,
        FileType::Bam,
        FileType::Cram,
        FileType::Gvcf,
        FileType::Vcf,
        FileType::Archive,
    ];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileType::Fastq => &[".fq", ".fq.gz", ".fastq", ".fastq.gz"],
            FileType::Bam => &[".bam"],
            FileType::Cram => &[".cram"],
            FileType::Gvcf => &[".g.vcf.gz"],
            FileType::Vcf => &[".vcf", ".vcf.gz", ".vcf.bgz"],
            FileType::Archive => &[".tar", ".tar.gz", ".zip"],
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Fastq => "FASTQ",
            FileType::Bam => "BAM",
            FileType::Cram => "CRAM",
            FileType::Gvcf => "GVCF",
            FileType::Vcf => "VCF",
            FileType::Archive => "ARCHIVE",
        };
        write!(f, "{name}")
    }
}

impl FromStr for FileType {
    type Err = AuditError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FASTQ" => Ok(FileType::Fastq),
            "BAM" => Ok(FileType::Bam),
            "CRAM" => Ok(FileType::Cram),
            "GVCF" => Ok(FileType::Gvcf),
            "VCF" => Ok(FileType::Vcf),
            "ARCHIVE" => Ok(FileType::Archive),
            _ => Err(AuditError::InvalidFileType(value.to_string())),
        }
    }
}

/// Metadata enums whose values are looked up at config resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKind {
    SequencingType,
    SequencingTechnology,
    SequencingPlatform,
    AnalysisType,
}

impl EnumKind {
    pub fn graphql_field(self) -> &'static str {
        match self {
            EnumKind::SequencingType => "sequencingType",
            EnumKind::SequencingTechnology => "sequencingTechnology",
            EnumKind::SequencingPlatform => "sequencingPlatform",
            EnumKind::AnalysisType => "analysisType",
        }
    }
}

impl fmt::Display for EnumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumKind::SequencingType => write!(f, "sequencing type"),
            EnumKind::SequencingTechnology => write!(f, "sequencing technology"),
            EnumKind::SequencingPlatform => write!(f, "sequencing platform"),
            EnumKind::AnalysisType => write!(f, "analysis type"),
        }
    }
}
