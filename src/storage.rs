use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::FileMetadata;
use crate::error::AuditError;

pub const BLOB_SCHEME: &str = "gs://";

/// A `gs://bucket/object` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPath {
    pub bucket: String,
    pub object: String,
}

impl BlobPath {
    pub fn parse(path: &str) -> Result<Self, AuditError> {
        let rest = path
            .trim()
            .strip_prefix(BLOB_SCHEME)
            .ok_or_else(|| AuditError::InvalidBlobPath(path.to_string()))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| AuditError::InvalidBlobPath(path.to_string()))?;
        if bucket.is_empty() || object.is_empty() {
            return Err(AuditError::InvalidBlobPath(path.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    pub fn uri(&self) -> String {
        format!("{BLOB_SCHEME}{}/{}", self.bucket, self.object)
    }
}

pub trait StorageClient: Send + Sync {
    /// Lists objects in `bucket`, keeping names ending in one of `extensions`
    /// (all objects when empty) and dropping those under `excluded_prefixes`.
    fn list_blobs(
        &self,
        bucket: &str,
        extensions: &[String],
        excluded_prefixes: &[String],
    ) -> Result<Vec<FileMetadata>, AuditError>;
    fn check_blob_exists(&self, path: &str) -> Result<bool, AuditError>;
    fn delete_blobs(&self, paths: &[String]) -> Result<(), AuditError>;
    /// Returns `None` when the object does not exist.
    fn read_text(&self, path: &str) -> Result<Option<String>, AuditError>;
    fn write_text(&self, path: &str, content: &str) -> Result<(), AuditError>;
}

pub fn blob_selected(blob: &BlobPath, extensions: &[String], excluded_prefixes: &[String]) -> bool {
    let uri = blob.uri();
    let excluded = excluded_prefixes.iter().any(|prefix| {
        let prefix = prefix.trim();
        !prefix.is_empty() && (uri.starts_with(prefix) || blob.object.starts_with(prefix))
    });
    if excluded {
        return false;
    }
    if extensions.is_empty() {
        return true;
    }
    let name = blob.object.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
}

/// Google Cloud Storage JSON API client.
#[derive(Clone)]
pub struct GcsHttpClient {
    client: Client,
    api_url: String,
    upload_url: String,
    token: Option<String>,
}

impl GcsHttpClient {
    pub fn new(token: Option<String>) -> Result<Self, AuditError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bucket-audit/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AuditError::StorageHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| AuditError::StorageHttp(err.to_string()))?;
        Ok(Self {
            client,
            api_url: "https://storage.googleapis.com/storage/v1".to_string(),
            upload_url: "https://storage.googleapis.com/upload/storage/v1".to_string(),
            token: token.filter(|value| !value.trim().is_empty()),
        })
    }

    pub fn object_url(&self, blob: &BlobPath) -> Result<Url, AuditError> {
        let mut url = Url::parse(&format!("{}/b/{}/o", self.api_url, blob.bucket))
            .map_err(|err| AuditError::InvalidBlobPath(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| AuditError::InvalidBlobPath(blob.uri()))?
            .push(&blob.object);
        Ok(url)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, AuditError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "storage request failed".to_string());
        Err(AuditError::StorageStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, AuditError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = self.authorize(make_req()).send();
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
                    return Err(AuditError::StorageHttp(err.to_string()));
                }
            }
        }
    }
}

impl StorageClient for GcsHttpClient {
    fn list_blobs(
        &self,
        bucket: &str,
        extensions: &[String],
        excluded_prefixes: &[String],
    ) -> Result<Vec<FileMetadata>, AuditError> {
        let url = format!("{}/b/{bucket}/o", self.api_url);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let response = self.send_with_retries(|| {
                let mut request = self.client.get(&url).query(&[
                    ("fields", "items(name,size,crc32c),nextPageToken"),
                    ("maxResults", "1000"),
                ]);
                if let Some(token) = &page_token {
                    request = request.query(&[("pageToken", token.as_str())]);
                }
                request
            })?;
            let page: Value = Self::handle_status(response)?
                .json()
                .map_err(|err| AuditError::StorageHttp(err.to_string()))?;

            for item in page
                .get("items")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let Some(name) = item.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let blob = BlobPath {
                    bucket: bucket.to_string(),
                    object: name.to_string(),
                };
                if !blob_selected(&blob, extensions, excluded_prefixes) {
                    continue;
                }
                let size = item
                    .get("size")
                    .and_then(Value::as_str)
                    .and_then(|value| value.parse::<u64>().ok());
                let checksum = item.get("crc32c").and_then(Value::as_str);
                files.push(FileMetadata::new(&blob.uri(), size, checksum));
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        debug!(bucket, count = files.len(), "listed bucket objects");
        Ok(files)
    }

    fn check_blob_exists(&self, path: &str) -> Result<bool, AuditError> {
        let url = self.object_url(&BlobPath::parse(path)?)?;
        let response = self.send_with_retries(|| self.client.get(url.clone()))?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        Self::handle_status(response)?;
        Ok(true)
    }

    fn delete_blobs(&self, paths: &[String]) -> Result<(), AuditError> {
        for path in paths {
            let url = self.object_url(&BlobPath::parse(path)?)?;
            let response = self.send_with_retries(|| self.client.delete(url.clone()))?;
            if response.status().as_u16() == 404 {
                warn!(path = %path, "object already absent during delete");
                continue;
            }
            Self::handle_status(response)?;
        }
        Ok(())
    }

    fn read_text(&self, path: &str) -> Result<Option<String>, AuditError> {
        let url = self.object_url(&BlobPath::parse(path)?)?;
        let response =
            self.send_with_retries(|| self.client.get(url.clone()).query(&[("alt", "media")]))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let text = Self::handle_status(response)?
            .text()
            .map_err(|err| AuditError::StorageHttp(err.to_string()))?;
        Ok(Some(text))
    }

    fn write_text(&self, path: &str, content: &str) -> Result<(), AuditError> {
        let blob = BlobPath::parse(path)?;
        let url = format!("{}/b/{}/o", self.upload_url, blob.bucket);
        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .query(&[("uploadType", "media"), ("name", blob.object.as_str())])
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(content.to_string())
        })?;
        Self::handle_status(response)?;
        Ok(())
    }
}

/// Emulates buckets as directories below a local root: `gs://b/o` lives at `<root>/b/o`.
#[derive(Debug, Clone)]
pub struct LocalBucketClient {
    root: Utf8PathBuf,
}

impl LocalBucketClient {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn blob_file(&self, path: &str) -> Result<Utf8PathBuf, AuditError> {
        let blob = BlobPath::parse(path)?;
        if blob.object.split('/').any(|part| part == "..") {
            return Err(AuditError::InvalidBlobPath(path.to_string()));
        }
        Ok(self.root.join(&blob.bucket).join(&blob.object))
    }
}

impl StorageClient for LocalBucketClient {
    fn list_blobs(
        &self,
        bucket: &str,
        extensions: &[String],
        excluded_prefixes: &[String],
    ) -> Result<Vec<FileMetadata>, AuditError> {
        let bucket_root = self.root.join(bucket);
        if !bucket_root.as_std_path().exists() {
            warn!(bucket, "bucket directory does not exist");
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for path in walk_dir(bucket_root.as_std_path())? {
            if !path.is_file() {
                continue;
            }
            let relative = path
                .strip_prefix(bucket_root.as_std_path())
                .map_err(|err| AuditError::Filesystem(err.to_string()))?;
            let object = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let blob = BlobPath {
                bucket: bucket.to_string(),
                object,
            };
            if !blob_selected(&blob, extensions, excluded_prefixes) {
                continue;
            }
            let size = fs::metadata(&path)
                .map_err(|err| AuditError::Filesystem(err.to_string()))?
                .len();
            files.push(FileMetadata::new(&blob.uri(), Some(size), None));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn check_blob_exists(&self, path: &str) -> Result<bool, AuditError> {
        Ok(self.blob_file(path)?.as_std_path().is_file())
    }

    fn delete_blobs(&self, paths: &[String]) -> Result<(), AuditError> {
        for path in paths {
            let file = self.blob_file(path)?;
            match fs::remove_file(file.as_std_path()) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path, "object already absent during delete");
                }
                Err(err) => return Err(AuditError::Filesystem(err.to_string())),
            }
        }
        Ok(())
    }

    fn read_text(&self, path: &str) -> Result<Option<String>, AuditError> {
        let file = self.blob_file(path)?;
        if !file.as_std_path().is_file() {
            return Ok(None);
        }
        fs::read_to_string(file.as_std_path())
            .map(Some)
            .map_err(|err| AuditError::Filesystem(err.to_string()))
    }

    fn write_text(&self, path: &str, content: &str) -> Result<(), AuditError> {
        let file = self.blob_file(path)?;
        let parent = file
            .parent()
            .ok_or_else(|| AuditError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| AuditError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("bucket-audit-blob")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| AuditError::Filesystem(err.to_string()))?;
        temp.write_all(content.as_bytes())
            .map_err(|err| AuditError::Filesystem(err.to_string()))?;
        temp.persist(file.as_std_path())
            .map_err(|err| AuditError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, AuditError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| AuditError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| AuditError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
