use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuditError {
    #[error("invalid {kind} value: {value} (allowed: {allowed})")]
    InvalidEnumValue {
        kind: String,
        value: String,
        allowed: String,
    },

    #[error("invalid review action: {0} (expected DELETE, INGEST or REVIEW)")]
    InvalidReviewAction(String),

    #[error("invalid file type: {0}")]
    InvalidFileType(String),

    #[error("invalid report name: {0}")]
    InvalidReportName(String),

    #[error("invalid filter expression: {0}")]
    InvalidFilter(String),

    #[error("{count} row(s) from report {report} are marked DELETE without a review comment")]
    #[diagnostic(help("run `bucket-audit review` with --comment before deleting"))]
    MissingJustification { report: String, count: usize },

    #[error("missing config file {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing required setting: {0}")]
    MissingSetting(String),

    #[error("metadata request failed: {0}")]
    MetadataHttp(String),

    #[error("metadata service returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("metadata query failed: {0}")]
    MetadataQuery(String),

    #[error("storage request failed: {0}")]
    StorageHttp(String),

    #[error("storage returned status {status}: {message}")]
    StorageStatus { status: u16, message: String },

    #[error("invalid blob path: {0}")]
    InvalidBlobPath(String),

    #[error("failed to parse report {path}: {message}")]
    ReportParse { path: String, message: String },

    #[error("failed to write report {path}: {message}")]
    ReportWrite { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
