use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Serialize;
use tracing::{error, info};

use crate::analyzer::AuditResult;
use crate::config::AuditConfig;
use crate::domain::{FileMetadata, ReviewAction, SequencingGroup};
use crate::error::AuditError;
use crate::filter::{FieldAccess, Value};
use crate::storage::StorageClient;

/// A flat report row: one file plus everything known about its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReportEntry {
    pub filepath: String,
    pub filesize: Option<u64>,
    pub sg_id: Option<String>,
    pub sg_type: Option<String>,
    pub sg_technology: Option<String>,
    pub sg_platform: Option<String>,
    pub assay_id: Option<i64>,
    pub sample_id: Option<String>,
    pub sample_external_id: Option<String>,
    pub participant_id: Option<i64>,
    pub participant_external_id: Option<String>,
    pub cram_analysis_id: Option<i64>,
    pub cram_file_path: Option<String>,
    pub action: Option<ReviewAction>,
    pub review_comment: Option<String>,
}

impl AuditReportEntry {
    /// A bare row carrying only the file location and size.
    pub fn for_file(file: &FileMetadata) -> Self {
        Self {
            filepath: file.path.clone(),
            filesize: file.size,
            ..Self::default()
        }
    }

    pub fn for_sequencing_group(
        sg: &SequencingGroup,
        assay_id: Option<i64>,
        file: &FileMetadata,
    ) -> Self {
        let cram = sg.cram_analysis.as_ref();
        Self {
            filepath: file.path.clone(),
            filesize: file.size,
            sg_id: Some(sg.id.clone()),
            sg_type: Some(sg.sequencing_type.clone()),
            sg_technology: Some(sg.technology.clone()),
            sg_platform: Some(sg.platform.clone()),
            assay_id,
            sample_id: Some(sg.sample.id.clone()),
            sample_external_id: non_empty(sg.sample.external_ids.to_report_value()),
            participant_id: Some(sg.sample.participant.id),
            participant_external_id: non_empty(
                sg.sample.participant.external_ids.to_report_value(),
            ),
            cram_analysis_id: cram.map(|analysis| analysis.id),
            cram_file_path: cram
                .and_then(|analysis| analysis.output_path())
                .map(str::to_string),
            action: None,
            review_comment: None,
        }
    }

    pub fn with_action(self, action: ReviewAction) -> Self {
        Self {
            action: Some(action),
            ..self
        }
    }

    /// The reviewed form of this row; the original is left untouched.
    pub fn reviewed(&self, action: ReviewAction, comment: &str) -> Self {
        Self {
            action: Some(action),
            review_comment: non_empty(comment.trim().to_string()),
            ..self.clone()
        }
    }

    pub fn has_review_comment(&self) -> bool {
        self.review_comment
            .as_deref()
            .is_some_and(|comment| !comment.trim().is_empty())
    }

    pub fn to_report_record(&self) -> Vec<String> {
        ReportField::ALL
            .iter()
            .map(|field| field.render(self))
            .collect()
    }

    pub fn to_report_dict(&self) -> BTreeMap<String, String> {
        ReportField::ALL
            .iter()
            .map(|field| (field.header().to_string(), field.render(self)))
            .collect()
    }

    pub fn from_report_dict(row: &BTreeMap<String, String>) -> Result<Self, AuditError> {
        let text = |field: ReportField| {
            row.get(field.header())
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let number = |field: ReportField| -> Result<Option<i64>, AuditError> {
            text(field)
                .map(|value| {
                    value.parse::<i64>().map_err(|_| AuditError::ReportParse {
                        path: field.header().to_string(),
                        message: format!("not an integer: {value}"),
                    })
                })
                .transpose()
        };

        let filepath = text(ReportField::FilePath).ok_or_else(|| AuditError::ReportParse {
            path: ReportField::FilePath.header().to_string(),
            message: "row without a file path".to_string(),
        })?;
        let filesize = number(ReportField::FileSize)?
            .map(|value| {
                u64::try_from(value).map_err(|_| AuditError::ReportParse {
                    path: ReportField::FileSize.header().to_string(),
                    message: format!("negative size: {value}"),
                })
            })
            .transpose()?;
        let action = text(ReportField::Action)
            .map(|value| value.parse::<ReviewAction>())
            .transpose()?;

        Ok(Self {
            filepath,
            filesize,
            sg_id: text(ReportField::SgId),
            sg_type: text(ReportField::SgType),
            sg_technology: text(ReportField::SgTechnology),
            sg_platform: text(ReportField::SgPlatform),
            assay_id: number(ReportField::AssayId)?,
            sample_id: text(ReportField::SampleId),
            sample_external_id: text(ReportField::SampleExternalId),
            participant_id: number(ReportField::ParticipantId)?,
            participant_external_id: text(ReportField::ParticipantExternalId),
            cram_analysis_id: number(ReportField::CramAnalysisId)?,
            cram_file_path: text(ReportField::CramPath),
            action,
            review_comment: text(ReportField::ReviewComment),
        })
    }
}

impl FieldAccess for AuditReportEntry {
    fn field(&self, name: &str) -> Option<Value> {
        ReportField::from_name(name).map(|field| field.value(self))
    }
}

/// Columns of the entry reports, in header order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportField {
    FilePath,
    FileSize,
    SgId,
    SgType,
    SgTechnology,
    SgPlatform,
    AssayId,
    SampleId,
    SampleExternalId,
    ParticipantId,
    ParticipantExternalId,
    CramAnalysisId,
    CramPath,
    Action,
    ReviewComment,
}

impl ReportField {
    pub const ALL: [ReportField; 15] = [
        ReportField::FilePath,
        ReportField::FileSize,
        ReportField::SgId,
        ReportField::SgType,
        ReportField::SgTechnology,
        ReportField::SgPlatform,
        ReportField::AssayId,
        ReportField::SampleId,
        ReportField::SampleExternalId,
        ReportField::ParticipantId,
        ReportField::ParticipantExternalId,
        ReportField::CramAnalysisId,
        ReportField::CramPath,
        ReportField::Action,
        ReportField::ReviewComment,
    ];

    pub fn header(self) -> &'static str {
        match self {
            ReportField::FilePath => "File Path",
            ReportField::FileSize => "File Size",
            ReportField::SgId => "SG ID",
            ReportField::SgType => "SG Type",
            ReportField::SgTechnology => "SG Technology",
            ReportField::SgPlatform => "SG Platform",
            ReportField::AssayId => "Assay ID",
            ReportField::SampleId => "Sample ID",
            ReportField::SampleExternalId => "Sample External ID",
            ReportField::ParticipantId => "Participant ID",
            ReportField::ParticipantExternalId => "Participant External ID",
            ReportField::CramAnalysisId => "CRAM Analysis ID",
            ReportField::CramPath => "CRAM Path",
            ReportField::Action => "Action",
            ReportField::ReviewComment => "Review Comment",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            ReportField::FilePath => "filepath",
            ReportField::FileSize => "filesize",
            ReportField::SgId => "sg_id",
            ReportField::SgType => "sg_type",
            ReportField::SgTechnology => "sg_technology",
            ReportField::SgPlatform => "sg_platform",
            ReportField::AssayId => "assay_id",
            ReportField::SampleId => "sample_id",
            ReportField::SampleExternalId => "sample_external_id",
            ReportField::ParticipantId => "participant_id",
            ReportField::ParticipantExternalId => "participant_external_id",
            ReportField::CramAnalysisId => "cram_analysis_id",
            ReportField::CramPath => "cram_file_path",
            ReportField::Action => "action",
            ReportField::ReviewComment => "review_comment",
        }
    }

    /// Accepts either the snake-case key or the report header, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|field| {
            field.key().eq_ignore_ascii_case(name) || field.header().eq_ignore_ascii_case(name)
        })
    }

    pub fn value(self, entry: &AuditReportEntry) -> Value {
        let text = |value: &Option<String>| match value {
            Some(value) => Value::Str(value.clone()),
            None => Value::Null,
        };
        let number = |value: Option<i64>| match value {
            Some(value) => Value::Number(value as f64),
            None => Value::Null,
        };
        match self {
            ReportField::FilePath => Value::Str(entry.filepath.clone()),
            ReportField::FileSize => match entry.filesize {
                Some(size) => Value::Number(size as f64),
                None => Value::Null,
            },
            ReportField::SgId => text(&entry.sg_id),
            ReportField::SgType => text(&entry.sg_type),
            ReportField::SgTechnology => text(&entry.sg_technology),
            ReportField::SgPlatform => text(&entry.sg_platform),
            ReportField::AssayId => number(entry.assay_id),
            ReportField::SampleId => text(&entry.sample_id),
            ReportField::SampleExternalId => text(&entry.sample_external_id),
            ReportField::ParticipantId => number(entry.participant_id),
            ReportField::ParticipantExternalId => text(&entry.participant_external_id),
            ReportField::CramAnalysisId => number(entry.cram_analysis_id),
            ReportField::CramPath => text(&entry.cram_file_path),
            ReportField::Action => match entry.action {
                Some(action) => Value::Str(action.to_string()),
                None => Value::Null,
            },
            ReportField::ReviewComment => text(&entry.review_comment),
        }
    }

    fn render(self, entry: &AuditReportEntry) -> String {
        let int = |value: Option<i64>| value.map(|v| v.to_string()).unwrap_or_default();
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        match self {
            ReportField::FilePath => entry.filepath.clone(),
            ReportField::FileSize => entry.filesize.map(|v| v.to_string()).unwrap_or_default(),
            ReportField::SgId => text(&entry.sg_id),
            ReportField::SgType => text(&entry.sg_type),
            ReportField::SgTechnology => text(&entry.sg_technology),
            ReportField::SgPlatform => text(&entry.sg_platform),
            ReportField::AssayId => int(entry.assay_id),
            ReportField::SampleId => text(&entry.sample_id),
            ReportField::SampleExternalId => text(&entry.sample_external_id),
            ReportField::ParticipantId => int(entry.participant_id),
            ReportField::ParticipantExternalId => text(&entry.participant_external_id),
            ReportField::CramAnalysisId => int(entry.cram_analysis_id),
            ReportField::CramPath => text(&entry.cram_file_path),
            ReportField::Action => entry.action.map(|a| a.to_string()).unwrap_or_default(),
            ReportField::ReviewComment => text(&entry.review_comment),
        }
    }
}

pub const UNALIGNED_HEADERS: [&str; 10] = [
    "SG ID",
    "SG Type",
    "SG Technology",
    "SG Platform",
    "Sample ID",
    "Sample External ID",
    "Participant ID",
    "Participant External ID",
    "Assay Count",
    "Total Read Size",
];

fn unaligned_record(sg: &SequencingGroup) -> Vec<String> {
    vec![
        sg.id.clone(),
        sg.sequencing_type.clone(),
        sg.technology.clone(),
        sg.platform.clone(),
        sg.sample.id.clone(),
        sg.sample.external_ids.to_report_value(),
        sg.sample.participant.id.to_string(),
        sg.sample.participant.external_ids.to_report_value(),
        sg.assays.len().to_string(),
        sg.total_read_size().to_string(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ReportKind {
    #[value(name = "files_to_delete")]
    FilesToDelete,
    #[value(name = "files_to_review")]
    FilesToReview,
    #[value(name = "moved_files")]
    MovedFiles,
    #[value(name = "unaligned_sgs")]
    UnalignedSgs,
    #[value(name = "reviewed_files")]
    ReviewedFiles,
    #[value(name = "deleted_files")]
    DeletedFiles,
    #[value(name = "deleted_files_dry_run")]
    DeletedFilesDryRun,
}

impl ReportKind {
    pub const ALL: [ReportKind; 7] = [
        ReportKind::FilesToDelete,
        ReportKind::FilesToReview,
        ReportKind::MovedFiles,
        ReportKind::UnalignedSgs,
        ReportKind::ReviewedFiles,
        ReportKind::DeletedFiles,
        ReportKind::DeletedFilesDryRun,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReportKind::FilesToDelete => "files_to_delete",
            ReportKind::FilesToReview => "files_to_review",
            ReportKind::MovedFiles => "moved_files",
            ReportKind::UnalignedSgs => "unaligned_sgs",
            ReportKind::ReviewedFiles => "reviewed_files",
            ReportKind::DeletedFiles => "deleted_files",
            ReportKind::DeletedFilesDryRun => "deleted_files_dry_run",
        }
    }

    /// Per-file reports that review and delete can read rows from.
    pub fn is_entry_report(self) -> bool {
        self != ReportKind::UnalignedSgs
    }

    pub fn file_name(self) -> String {
        match self {
            ReportKind::UnalignedSgs => format!("{}.tsv", self.name()),
            _ => format!("{}.csv", self.name()),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ReportKind {
    type Err = AuditError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let stem = trimmed
            .strip_suffix(".csv")
            .or_else(|| trimmed.strip_suffix(".tsv"))
            .unwrap_or(trimmed);
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == stem)
            .ok_or_else(|| AuditError::InvalidReportName(value.to_string()))
    }
}

/// Where one audit run's reports live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLocation {
    pub bucket: String,
    pub results_folder: String,
}

impl ReportLocation {
    pub fn new(bucket: &str, results_folder: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            results_folder: results_folder.to_string(),
        }
    }

    pub fn prefix(&self) -> String {
        format!("gs://{}/audit_results/{}", self.bucket, self.results_folder)
    }

    pub fn report_path(&self, kind: ReportKind) -> String {
        format!("{}/{}", self.prefix(), kind.file_name())
    }

    pub fn config_path(&self) -> String {
        format!("{}/audit_config.json", self.prefix())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub files_to_delete: usize,
    pub files_to_delete_size_bytes: u64,
    pub moved_files: usize,
    pub files_to_review: usize,
    pub files_to_review_size_bytes: u64,
    pub unaligned_sgs: usize,
}

pub fn generate_summary_statistics(result: &AuditResult) -> AuditSummary {
    let total = |entries: &[AuditReportEntry]| -> u64 {
        entries.iter().map(|entry| entry.filesize.unwrap_or(0)).sum()
    };
    AuditSummary {
        files_to_delete: result.files_to_delete.len(),
        files_to_delete_size_bytes: total(&result.files_to_delete),
        moved_files: result.moved_files.len(),
        files_to_review: result.files_to_review.len(),
        files_to_review_size_bytes: total(&result.files_to_review),
        unaligned_sgs: result.unaligned_sequencing_groups.len(),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WrittenReports {
    pub config_path: String,
    pub reports: Vec<String>,
}

/// Renders audit output into append-only report files.
pub struct Reporter<'a, S: StorageClient> {
    storage: &'a S,
    location: ReportLocation,
}

impl<'a, S: StorageClient> Reporter<'a, S> {
    pub fn new(storage: &'a S, location: ReportLocation) -> Self {
        Self { storage, location }
    }

    pub fn location(&self) -> &ReportLocation {
        &self.location
    }

    pub fn write_audit_reports(
        &self,
        result: &AuditResult,
        config: &AuditConfig,
    ) -> Result<WrittenReports, AuditError> {
        let config_path = self.location.config_path();
        let config_json = serde_json::to_string_pretty(config).map_err(|err| {
            AuditError::ReportWrite {
                path: config_path.clone(),
                message: err.to_string(),
            }
        })?;
        self.storage.write_text(&config_path, &config_json)?;

        let mut reports = Vec::new();
        for (kind, entries) in [
            (ReportKind::FilesToDelete, &result.files_to_delete),
            (ReportKind::FilesToReview, &result.files_to_review),
            (ReportKind::MovedFiles, &result.moved_files),
        ] {
            if entries.is_empty() {
                continue;
            }
            let path = self.location.report_path(kind);
            self.write_csv_report(&path, entries, kind.name())?;
            reports.push(path);
        }

        if !result.unaligned_sequencing_groups.is_empty() {
            let path = self.location.report_path(ReportKind::UnalignedSgs);
            let records = result
                .unaligned_sequencing_groups
                .iter()
                .map(unaligned_record)
                .collect::<Vec<_>>();
            self.merge_records(&path, &UNALIGNED_HEADERS, records, b'\t', None)?;
            reports.push(path);
        }

        Ok(WrittenReports {
            config_path,
            reports,
        })
    }

    /// Appends rows not already present at `path`; returns how many were added.
    pub fn write_csv_report(
        &self,
        path: &str,
        entries: &[AuditReportEntry],
        name: &str,
    ) -> Result<usize, AuditError> {
        let headers = ReportField::ALL.map(ReportField::header);
        let records = entries
            .iter()
            .map(AuditReportEntry::to_report_record)
            .collect::<Vec<_>>();
        let sort_column = (name == ReportKind::FilesToDelete.name())
            .then(|| headers.iter().position(|h| *h == ReportField::SgId.header()))
            .flatten();
        let added = self.merge_records(path, &headers, records, delimiter_for(path), sort_column)?;
        info!(report = name, path, added, "report written");
        Ok(added)
    }

    pub fn write_report(
        &self,
        kind: ReportKind,
        entries: &[AuditReportEntry],
    ) -> Result<String, AuditError> {
        let path = self.location.report_path(kind);
        self.write_csv_report(&path, entries, kind.name())?;
        Ok(path)
    }

    /// Missing reports yield no rows.
    pub fn get_report_rows(&self, path: &str) -> Result<Vec<AuditReportEntry>, AuditError> {
        let Some(content) = self.storage.read_text(path)? else {
            error!(path, "report does not exist");
            return Ok(Vec::new());
        };
        parse_records(path, &content, delimiter_for(path))?
            .1
            .iter()
            .map(AuditReportEntry::from_report_dict)
            .collect()
    }

    pub fn get_report_rows_from_name(
        &self,
        kind: ReportKind,
    ) -> Result<Vec<AuditReportEntry>, AuditError> {
        self.get_report_rows(&self.location.report_path(kind))
    }

    fn merge_records(
        &self,
        path: &str,
        headers: &[&str],
        records: Vec<Vec<String>>,
        delimiter: u8,
        sort_column: Option<usize>,
    ) -> Result<usize, AuditError> {
        let mut merged: Vec<Vec<String>> = Vec::new();
        if let Some(existing) = self
            .storage
            .read_text(path)?
            .filter(|content| !content.trim().is_empty())
        {
            let (_, rows) = parse_records(path, &existing, delimiter)?;
            merged.extend(rows.into_iter().map(|row| {
                headers
                    .iter()
                    .map(|header| row.get(*header).cloned().unwrap_or_default())
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = merged.iter().cloned().collect::<HashSet<_>>();
        let mut added = 0usize;
        for record in records {
            if seen.insert(record.clone()) {
                merged.push(record);
                added += 1;
            }
        }

        if let Some(column) = sort_column {
            merged.sort_by(|a, b| a[column].cmp(&b[column]));
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(Vec::new());
        let write_err = |err: csv::Error| AuditError::ReportWrite {
            path: path.to_string(),
            message: err.to_string(),
        };
        writer.write_record(headers).map_err(write_err)?;
        for record in &merged {
            writer.write_record(record).map_err(write_err)?;
        }
        let bytes = writer.into_inner().map_err(|err| AuditError::ReportWrite {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        let content = String::from_utf8(bytes).map_err(|err| AuditError::ReportWrite {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        self.storage.write_text(path, &content)?;
        Ok(added)
    }
}

fn delimiter_for(path: &str) -> u8 {
    if path.ends_with(".tsv") { b'\t' } else { b',' }
}

fn parse_records(
    path: &str,
    content: &str,
    delimiter: u8,
) -> Result<(Vec<String>, Vec<BTreeMap<String, String>>), AuditError> {
    let parse_err = |err: csv::Error| AuditError::ReportParse {
        path: path.to_string(),
        message: err.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(|header| header.trim().to_string())
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(parse_err)?;
        let row = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect::<BTreeMap<_, _>>();
        rows.push(row);
    }
    Ok((headers, rows))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
