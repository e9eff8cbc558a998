use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{EnumKind, FileType};
use crate::error::AuditError;
use crate::metadata::MetadataClient;

pub const DEFAULT_CONFIG_FILE: &str = "audit-config.json";
pub const ALL: &str = "all";

/// Either the literal `"all"` or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ValueSelection {
    Keyword(String),
    List(Vec<String>),
}

impl ValueSelection {
    pub fn all() -> Self {
        ValueSelection::Keyword(ALL.to_string())
    }

    fn values(&self) -> Vec<String> {
        match self {
            ValueSelection::Keyword(value) => vec![value.clone()],
            ValueSelection::List(values) => values.clone(),
        }
    }

    fn is_all(&self) -> bool {
        self.values()
            .iter()
            .any(|value| value.trim().eq_ignore_ascii_case(ALL))
    }
}

impl Default for ValueSelection {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub dataset: String,
    #[serde(default)]
    pub sequencing_types: ValueSelection,
    #[serde(default)]
    pub sequencing_technologies: ValueSelection,
    #[serde(default)]
    pub sequencing_platforms: ValueSelection,
    #[serde(default = "default_analysis_types")]
    pub analysis_types: ValueSelection,
    #[serde(default = "default_file_types")]
    pub file_types: ValueSelection,
    #[serde(default)]
    pub excluded_prefixes: Vec<String>,
    #[serde(default)]
    pub excluded_sequencing_groups: Vec<String>,
    #[serde(default)]
    pub upload_bucket: Option<String>,
    #[serde(default)]
    pub reports_bucket: Option<String>,
    #[serde(default)]
    pub results_folder: Option<String>,
}

impl Config {
    pub fn for_dataset(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            sequencing_types: ValueSelection::all(),
            sequencing_technologies: ValueSelection::all(),
            sequencing_platforms: ValueSelection::all(),
            analysis_types: default_analysis_types(),
            file_types: default_file_types(),
            excluded_prefixes: Vec::new(),
            excluded_sequencing_groups: Vec::new(),
            upload_bucket: None,
            reports_bucket: None,
            results_folder: None,
        }
    }
}

fn default_analysis_types() -> ValueSelection {
    ValueSelection::List(vec!["cram".to_string()])
}

fn default_file_types() -> ValueSelection {
    ValueSelection::List(vec![
        "FASTQ".to_string(),
        "BAM".to_string(),
        "CRAM".to_string(),
    ])
}

/// Immutable parameters of one audit run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditConfig {
    pub dataset: String,
    pub sequencing_types: Vec<String>,
    pub sequencing_technologies: Vec<String>,
    pub sequencing_platforms: Vec<String>,
    pub analysis_types: Vec<String>,
    pub file_types: Vec<FileType>,
    pub excluded_prefixes: Vec<String>,
    pub excluded_sequencing_groups: Vec<String>,
    pub upload_bucket: String,
    pub reports_bucket: String,
    pub results_folder: String,
}

impl AuditConfig {
    pub fn extensions(&self) -> Vec<String> {
        let mut extensions = self
            .file_types
            .iter()
            .flat_map(|file_type| file_type.extensions().iter().map(|ext| ext.to_string()))
            .collect::<Vec<_>>();
        extensions.sort();
        extensions.dedup();
        extensions
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&str>) -> Result<Config, AuditError> {
        let config_path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if !config_path.exists() {
            return Err(AuditError::MissingConfig(config_path));
        }
        let content = fs::read_to_string(&config_path)
            .map_err(|_| AuditError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| AuditError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config<M: MetadataClient + ?Sized>(
        config: Config,
        metadata: &M,
    ) -> Result<AuditConfig, AuditError> {
        let dataset = config.dataset.trim().to_string();
        if dataset.is_empty() {
            return Err(AuditError::MissingSetting("dataset".to_string()));
        }

        let sequencing_types =
            resolve_enum(&config.sequencing_types, EnumKind::SequencingType, metadata)?;
        let sequencing_technologies = resolve_enum(
            &config.sequencing_technologies,
            EnumKind::SequencingTechnology,
            metadata,
        )?;
        let sequencing_platforms = resolve_enum(
            &config.sequencing_platforms,
            EnumKind::SequencingPlatform,
            metadata,
        )?;
        let analysis_types =
            resolve_enum(&config.analysis_types, EnumKind::AnalysisType, metadata)?;

        let file_types = if config.file_types.is_all() {
            FileType::ALL.to_vec()
        } else {
            let mut file_types = config
                .file_types
                .values()
                .iter()
                .map(|value| value.parse::<FileType>())
                .collect::<Result<Vec<_>, AuditError>>()?;
            file_types.sort();
            file_types.dedup();
            file_types
        };

        let upload_bucket = config
            .upload_bucket
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("{dataset}-main-upload"));
        let reports_bucket = config
            .reports_bucket
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("{dataset}-main-analysis"));
        let results_folder = config
            .results_folder
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(default_results_folder);

        Ok(AuditConfig {
            dataset,
            sequencing_types,
            sequencing_technologies,
            sequencing_platforms,
            analysis_types,
            file_types,
            excluded_prefixes: config.excluded_prefixes,
            excluded_sequencing_groups: config.excluded_sequencing_groups,
            upload_bucket,
            reports_bucket,
            results_folder,
        })
    }
}

pub fn default_results_folder() -> String {
    chrono::Utc::now().format("%Y-%m-%d_%H%M%S").to_string()
}

/// Expands `all` and maps each value onto its canonical enum spelling.
fn resolve_enum<M: MetadataClient + ?Sized>(
    selection: &ValueSelection,
    kind: EnumKind,
    metadata: &M,
) -> Result<Vec<String>, AuditError> {
    let allowed = metadata.get_enum_values(kind)?;
    if selection.is_all() {
        return Ok(allowed);
    }
    let mut resolved = Vec::new();
    for value in selection.values() {
        let canonical = allowed
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| AuditError::InvalidEnumValue {
                kind: kind.to_string(),
                value: value.clone(),
                allowed: allowed.join(", "),
            })?;
        if !resolved.contains(canonical) {
            resolved.push(canonical.clone());
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config: Config = serde_json::from_str(
            r#"{"dataset": "tob", "sequencing_types": "all", "file_types": ["fastq", "bam"]}"#,
        )
        .unwrap();
        assert_eq!(config.sequencing_types, ValueSelection::all());
        assert_eq!(config.analysis_types, default_analysis_types());
        assert!(config.excluded_prefixes.is_empty());
    }

    #[test]
    fn extensions_cover_all_file_types() {
        let config = AuditConfig {
            dataset: "tob".to_string(),
            sequencing_types: Vec::new(),
            sequencing_technologies: Vec::new(),
            sequencing_platforms: Vec::new(),
            analysis_types: Vec::new(),
            file_types: vec![FileType::Fastq, FileType::Bam],
            excluded_prefixes: Vec::new(),
            excluded_sequencing_groups: Vec::new(),
            upload_bucket: "up".to_string(),
            reports_bucket: "an".to_string(),
            results_folder: "run".to_string(),
        };
        let extensions = config.extensions();
        assert!(extensions.contains(&".bam".to_string()));
        assert!(extensions.contains(&".fastq.gz".to_string()));
        assert!(!extensions.contains(&".cram".to_string()));
    }
}
