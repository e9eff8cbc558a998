use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::delete::DeletionStats;
use crate::domain::{
    Analysis, Assay, EnumKind, ExternalIds, FileMetadata, Participant, Sample, SequencingGroup,
};
use crate::error::AuditError;

pub const AUDIT_DELETION_TYPE: &str = "audit_deletion";

pub trait MetadataClient: Send + Sync {
    fn get_sequencing_groups(
        &self,
        dataset: &str,
        sequencing_types: &[String],
        technologies: &[String],
        platforms: &[String],
    ) -> Result<Vec<SequencingGroup>, AuditError>;
    fn get_analyses_for_sequencing_groups(
        &self,
        dataset: &str,
        sg_ids: &[String],
        analysis_types: &[String],
    ) -> Result<Vec<Analysis>, AuditError>;
    fn get_enum_values(&self, kind: EnumKind) -> Result<Vec<String>, AuditError>;
    fn get_audit_deletion_analysis(
        &self,
        dataset: &str,
        output_path: &str,
    ) -> Result<Option<Analysis>, AuditError>;
    fn create_audit_deletion_analysis(
        &self,
        dataset: &str,
        cohort_name: &str,
        output_path: &str,
        stats: &DeletionStats,
    ) -> Result<i64, AuditError>;
    fn update_audit_deletion_analysis(
        &self,
        existing: &Analysis,
        report_name: &str,
        stats: &DeletionStats,
    ) -> Result<i64, AuditError>;
}

const SEQUENCING_GROUPS_QUERY: &str = r#"
query DatasetSequencingGroups($dataset: String!, $types: [String!], $technologies: [String!], $platforms: [String!]) {
  project(name: $dataset) {
    sequencingGroups(type: {in_: $types}, technology: {in_: $technologies}, platform: {in_: $platforms}) {
      id
      type
      technology
      platform
      sample {
        id
        externalIds
        participant {
          id
          externalIds
        }
      }
      assays {
        id
        meta
      }
    }
  }
}
"#;

const ANALYSES_QUERY: &str = r#"
query SequencingGroupAnalyses($dataset: String!, $sgIds: [String!], $analysisTypes: [String!]) {
  sequencingGroups(id: {in_: $sgIds}, project: {eq: $dataset}) {
    id
    analyses(status: {eq: COMPLETED}, type: {in_: $analysisTypes}, project: {eq: $dataset}) {
      id
      type
      meta
      output
      outputs
      timestampCompleted
    }
  }
}
"#;

const AUDIT_DELETION_QUERY: &str = r#"
query AuditDeletionAnalyses($dataset: String!, $analysisType: String!) {
  project(name: $dataset) {
    analyses(type: {eq: $analysisType}) {
      id
      type
      meta
      output
      outputs
      timestampCompleted
    }
  }
}
"#;

const CREATE_ANALYSIS_MUTATION: &str = r#"
mutation CreateAuditDeletion($dataset: String!, $analysis: AnalysisInput!) {
  analysis {
    createAnalysis(project: $dataset, analysis: $analysis) {
      id
    }
  }
}
"#;

const UPDATE_ANALYSIS_MUTATION: &str = r#"
mutation UpdateAuditDeletion($analysisId: Int!, $analysis: AnalysisUpdateInput!) {
  analysis {
    updateAnalysis(analysisId: $analysisId, analysis: $analysis) {
      id
    }
  }
}
"#;

/// Blocking GraphQL client for the sample metadata service.
#[derive(Clone)]
pub struct GraphQlMetadataClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GraphQlMetadataClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, AuditError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bucket-audit/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AuditError::MetadataHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| AuditError::MetadataHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|value| !value.trim().is_empty()),
        })
    }

    fn graphql(&self, query: &str, variables: Value) -> Result<Value, AuditError> {
        let url = format!("{}/graphql", self.base_url);
        let body = json!({ "query": query, "variables": variables });
        let response = self.send_with_retries(|| {
            let request = self.client.post(&url).json(&body);
            match &self.token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "metadata request failed".to_string());
            return Err(AuditError::MetadataStatus { status, message });
        }
        let payload: Value = response
            .json()
            .map_err(|err| AuditError::MetadataHttp(err.to_string()))?;
        if let Some(errors) = payload
            .get("errors")
            .and_then(Value::as_array)
            .filter(|errors| !errors.is_empty())
        {
            let message = errors
                .iter()
                .filter_map(|error| error.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AuditError::MetadataQuery(message));
        }
        payload
            .get("data")
            .cloned()
            .ok_or_else(|| AuditError::MetadataQuery("response without data".to_string()))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, AuditError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(AuditError::MetadataHttp(err.to_string()));
                }
            }
        }
    }
}

impl MetadataClient for GraphQlMetadataClient {
    fn get_sequencing_groups(
        &self,
        dataset: &str,
        sequencing_types: &[String],
        technologies: &[String],
        platforms: &[String],
    ) -> Result<Vec<SequencingGroup>, AuditError> {
        let data = self.graphql(
            SEQUENCING_GROUPS_QUERY,
            json!({
                "dataset": dataset,
                "types": sequencing_types,
                "technologies": technologies,
                "platforms": platforms,
            }),
        )?;
        let groups = data
            .pointer("/project/sequencingGroups")
            .and_then(Value::as_array)
            .map(|groups| groups.iter().filter_map(parse_sequencing_group).collect())
            .unwrap_or_default();
        Ok(groups)
    }

    fn get_analyses_for_sequencing_groups(
        &self,
        dataset: &str,
        sg_ids: &[String],
        analysis_types: &[String],
    ) -> Result<Vec<Analysis>, AuditError> {
        if sg_ids.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.graphql(
            ANALYSES_QUERY,
            json!({
                "dataset": dataset,
                "sgIds": sg_ids,
                "analysisTypes": analysis_types,
            }),
        )?;
        let mut analyses = Vec::new();
        for group in data
            .get("sequencingGroups")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let sg_id = group.get("id").and_then(Value::as_str);
            for raw in group
                .get("analyses")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(analysis) = parse_analysis(raw, sg_id) {
                    analyses.push(analysis);
                }
            }
        }
        debug!(dataset, count = analyses.len(), "fetched analyses");
        Ok(analyses)
    }

    fn get_enum_values(&self, kind: EnumKind) -> Result<Vec<String>, AuditError> {
        let query = format!("query EnumValues {{ enum {{ {} }} }}", kind.graphql_field());
        let data = self.graphql(&query, json!({}))?;
        let values = data
            .get("enum")
            .and_then(|value| value.get(kind.graphql_field()))
            .and_then(Value::as_array)
            .ok_or_else(|| AuditError::MetadataQuery(format!("no values for {kind}")))?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        Ok(values)
    }

    fn get_audit_deletion_analysis(
        &self,
        dataset: &str,
        output_path: &str,
    ) -> Result<Option<Analysis>, AuditError> {
        let data = self.graphql(
            AUDIT_DELETION_QUERY,
            json!({ "dataset": dataset, "analysisType": AUDIT_DELETION_TYPE }),
        )?;
        let existing = data
            .pointer("/project/analyses")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|raw| parse_analysis(raw, None))
            .find(|analysis| analysis.output_path() == Some(output_path));
        Ok(existing)
    }

    fn create_audit_deletion_analysis(
        &self,
        dataset: &str,
        cohort_name: &str,
        output_path: &str,
        stats: &DeletionStats,
    ) -> Result<i64, AuditError> {
        let data = self.graphql(
            CREATE_ANALYSIS_MUTATION,
            json!({
                "dataset": dataset,
                "analysis": {
                    "type": AUDIT_DELETION_TYPE,
                    "status": "COMPLETED",
                    "output": output_path,
                    "meta": {
                        "cohort_name": cohort_name,
                        "stats": stats,
                    },
                },
            }),
        )?;
        data.pointer("/analysis/createAnalysis/id")
            .and_then(Value::as_i64)
            .ok_or_else(|| AuditError::MetadataQuery("create returned no analysis id".to_string()))
    }

    fn update_audit_deletion_analysis(
        &self,
        existing: &Analysis,
        report_name: &str,
        stats: &DeletionStats,
    ) -> Result<i64, AuditError> {
        let mut meta = existing.meta.as_object().cloned().unwrap_or_default();
        meta.insert("report_name".to_string(), json!(report_name));
        meta.insert("stats".to_string(), json!(stats));
        let data = self.graphql(
            UPDATE_ANALYSIS_MUTATION,
            json!({
                "analysisId": existing.id,
                "analysis": {
                    "status": "COMPLETED",
                    "meta": meta,
                },
            }),
        )?;
        data.pointer("/analysis/updateAnalysis/id")
            .and_then(Value::as_i64)
            .ok_or_else(|| AuditError::MetadataQuery("update returned no analysis id".to_string()))
    }
}

pub fn parse_sequencing_group(raw: &Value) -> Option<SequencingGroup> {
    let Some(id) = raw.get("id").and_then(Value::as_str) else {
        warn!("dropping sequencing group without id");
        return None;
    };
    let Some(sample_raw) = raw.get("sample") else {
        warn!(sg_id = id, "dropping sequencing group without sample");
        return None;
    };
    let participant_raw = sample_raw.get("participant");
    let participant = Participant {
        id: participant_raw
            .and_then(|participant| participant.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or_default(),
        external_ids: participant_raw
            .map(|participant| parse_external_ids(participant.get("externalIds")))
            .unwrap_or_default(),
    };
    let sample = Sample {
        id: text(sample_raw.get("id")).unwrap_or_default(),
        external_ids: parse_external_ids(sample_raw.get("externalIds")),
        participant,
    };
    let assays = raw
        .get("assays")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|assay| Assay {
            id: assay.get("id").and_then(Value::as_i64).unwrap_or_default(),
            read_files: parse_reads(id, assay.pointer("/meta/reads")),
        })
        .collect();

    Some(SequencingGroup {
        id: id.to_string(),
        sequencing_type: text(raw.get("type")).unwrap_or_default(),
        technology: text(raw.get("technology")).unwrap_or_default(),
        platform: text(raw.get("platform")).unwrap_or_default(),
        sample,
        assays,
        cram_analysis: None,
    })
}

/// Accepts a single read object, a list of them, or a list of read pairs.
pub fn parse_reads(sg_id: &str, reads: Option<&Value>) -> Vec<FileMetadata> {
    let mut files = Vec::new();
    let Some(reads) = reads else {
        return files;
    };
    let mut pending = match reads {
        Value::Object(_) => vec![reads],
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => {
            warn!(sg_id, reads = %other, "dropping non-object reads field");
            return files;
        }
    };
    while let Some(item) = pending.pop() {
        match item {
            Value::Object(_) => match parse_file(item) {
                Some(file) => files.push(file),
                None => warn!(sg_id, "dropping read without a location"),
            },
            Value::Array(nested) => pending.extend(nested.iter()),
            other => warn!(sg_id, read = %other, "dropping non-object read entry"),
        }
    }
    files.reverse();
    files
}

pub fn parse_analysis(raw: &Value, sg_id: Option<&str>) -> Option<Analysis> {
    let Some(id) = raw.get("id").and_then(Value::as_i64) else {
        warn!("dropping analysis without id");
        return None;
    };
    let output_file = match raw.get("outputs") {
        Some(outputs @ Value::Object(_)) => parse_file(outputs),
        _ => None,
    }
    .or_else(|| {
        text(raw.get("output")).map(|path| FileMetadata::new(&path, None, None))
    });
    let Some(output_file) = output_file else {
        warn!(analysis_id = id, "dropping analysis without output path");
        return None;
    };
    let meta = raw.get("meta").cloned().unwrap_or(Value::Null);
    let original_file = meta.get("original_file").and_then(|original| match original {
        Value::String(path) => Some(FileMetadata::new(path, None, None)),
        Value::Object(_) => parse_file(original),
        _ => None,
    });
    let timestamp_completed = parse_timestamp(id, raw.get("timestampCompleted"));
    let sequencing_group_id = sg_id
        .map(str::to_string)
        .or_else(|| text(meta.get("sequencing_group")));

    Some(Analysis {
        id,
        analysis_type: text(raw.get("type")).unwrap_or_default(),
        output_file: Some(output_file),
        original_file,
        sequencing_group_id,
        timestamp_completed,
        meta,
    })
}

/// Unparseable or missing timestamps sort first.
pub fn parse_timestamp(analysis_id: i64, raw: Option<&Value>) -> DateTime<Utc> {
    let Some(value) = raw.and_then(Value::as_str) else {
        warn!(analysis_id, "analysis without completion timestamp");
        return DateTime::<Utc>::MIN_UTC;
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return parsed.and_utc();
    }
    warn!(analysis_id, timestamp = value, "unparseable completion timestamp");
    DateTime::<Utc>::MIN_UTC
}

fn parse_file(raw: &Value) -> Option<FileMetadata> {
    let path = text(raw.get("location"))
        .or_else(|| text(raw.get("path")))
        .filter(|path| !path.trim().is_empty())?;
    let size = raw.get("size").and_then(|size| match size {
        Value::Number(number) => number.as_u64(),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    });
    let checksum = text(raw.get("checksum")).or_else(|| text(raw.get("file_checksum")));
    Some(FileMetadata::new(&path, size, checksum.as_deref()))
}

fn parse_external_ids(raw: Option<&Value>) -> ExternalIds {
    let ids = raw
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(org, id)| text(Some(id)).map(|id| (org.clone(), id)))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();
    ExternalIds::new(ids)
}

fn text(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(value) => Some(value.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
