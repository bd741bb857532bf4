// API client module: a small blocking HTTP client that talks to the remote
// encryption service. It knows the base URL and the optional bearer token,
// applies the timeout and retry policy, and turns responses into typed
// results. The service itself is opaque: status, encrypt and versions are
// the only capabilities the client relies on.

use crate::error::{single_line, ClientError, Result};
use log::{debug, info, warn};
use reqwest::blocking::{multipart, Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Health endpoint path.
pub const STATUS_ENDPOINT: &str = "/status";
/// Encryption endpoint path.
pub const ENCRYPT_ENDPOINT: &str = "/encrypt";
/// Supported interpreter versions endpoint path.
pub const VERSIONS_ENDPOINT: &str = "/python-versions";

/// Suffix appended to the source file name to name the artifact.
pub const ARTIFACT_SUFFIX: &str = ".enc";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);
/// Slowest transfer rate we still wait for; large files get a longer timeout.
const MIN_THROUGHPUT_BYTES_PER_SEC: u64 = 64 * 1024;
const COPY_BUFFER_SIZE: usize = 64 * 1024;
/// Longest remote error body echoed back to the user.
const MAX_REASON_LEN: usize = 512;

/// How often and how patiently transient network failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay; the n-th retry waits `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent. `op` receives the zero-based attempt number.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {}/{}",
                        what, e, attempt, self.max_retries
                    );
                    thread::sleep(self.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Health report for the configured service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResult {
    pub reachable: bool,
    pub version: Option<String>,
    pub message: Option<String>,
}

impl StatusResult {
    fn unreachable(message: impl Into<String>) -> Self {
        Self {
            reachable: false,
            version: None,
            message: Some(message.into()),
        }
    }
}

/// Body of `GET /status`. All fields optional: any 2xx is healthy unless the
/// service explicitly reports a status other than "ok".
#[derive(Deserialize, Debug, Default)]
struct StatusBody {
    status: Option<String>,
    version: Option<String>,
    message: Option<String>,
}

/// A file to encrypt and the directory the artifact should land in.
#[derive(Debug, Clone)]
pub struct EncryptRequest {
    pub file_path: PathBuf,
    pub output_dir: PathBuf,
    pub python_version: Option<String>,
}

impl EncryptRequest {
    pub fn new(file_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            output_dir: output_dir.into(),
            python_version: None,
        }
    }

    pub fn with_python_version(mut self, version: Option<String>) -> Self {
        self.python_version = version;
        self
    }

    /// Local checks done before any request: the source must be a readable
    /// regular file and the output directory must exist or be creatable.
    /// Returns the source file name and its size.
    pub fn validate(&self) -> Result<(String, u64)> {
        let source = self.validate_source()?;
        prepare_output_dir(&self.output_dir)?;
        Ok(source)
    }

    /// Check the source file only; touches nothing on disk.
    pub fn validate_source(&self) -> Result<(String, u64)> {
        let path = &self.file_path;
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::LocalIo(format!("file not found: {}", path.display())));
            }
            Err(e) => return Err(ClientError::local_io(format_args!("cannot access {}", path.display()), e)),
        };
        if !metadata.is_file() {
            return Err(ClientError::LocalIo(format!("not a regular file: {}", path.display())));
        }
        File::open(path).map_err(|e| ClientError::local_io(format_args!("cannot read {}", path.display()), e))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ClientError::Usage(format!("file name is not valid UTF-8: {}", path.display())))?;

        Ok((file_name, metadata.len()))
    }

    /// Where the artifact for this request is written.
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(artifact_name(file_name))
    }
}

/// Source code passed as text instead of a file on disk.
#[derive(Debug, Clone)]
pub struct TextRequest {
    /// File name the service sees, e.g. `test.py`.
    pub name: String,
    pub content: String,
    pub output_dir: PathBuf,
    pub python_version: Option<String>,
}

impl TextRequest {
    pub fn new(name: impl Into<String>, content: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            output_dir: output_dir.into(),
            python_version: None,
        }
    }

    pub fn with_python_version(mut self, version: Option<String>) -> Self {
        self.python_version = version;
        self
    }

    /// The name must be a bare file name so the artifact stays inside
    /// `output_dir`.
    pub fn validate_name(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ClientError::Usage(format!(
                "--name must be a plain file name such as main.py, got '{}'",
                self.name
            )));
        }
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(artifact_name(self.name.trim()))
    }
}

/// Make sure `dir` is a directory, creating it (and its parents) if missing.
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(ClientError::LocalIo(format!("output path is not a directory: {}", dir.display())));
    }
    fs::create_dir_all(dir)
        .map_err(|e| ClientError::local_io(format_args!("cannot create output directory {}", dir.display()), e))
}

/// Name of the artifact produced for a source file name.
pub fn artifact_name(file_name: &str) -> String {
    format!("{file_name}{ARTIFACT_SUFFIX}")
}

/// Outcome of an encryption call.
#[derive(Debug)]
pub enum EncryptStatus {
    Success,
    Failure(ClientError),
}

#[derive(Debug)]
pub struct EncryptResult {
    pub output_path: PathBuf,
    pub size_bytes: u64,
    pub status: EncryptStatus,
}

impl EncryptResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, EncryptStatus::Success)
    }
}

/// One interpreter the service can target.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PythonVersion {
    pub version: String,
    #[serde(default)]
    pub full_version: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Body of `GET /python-versions`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PythonVersions {
    #[serde(default)]
    pub versions: Vec<PythonVersion>,
    #[serde(default)]
    pub default_version: Option<PythonVersion>,
}

/// Builder for [`ServiceClient`]; lets callers (and tests) tune timeouts and
/// the retry policy.
#[derive(Debug, Clone)]
pub struct ServiceClientBuilder {
    base_url: String,
    token: Option<String>,
    status_timeout: Duration,
    transfer_timeout: Duration,
    retry: RetryPolicy,
}

impl ServiceClientBuilder {
    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    /// Floor for encryption requests; large files get proportionally more.
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<ServiceClient> {
        let base_url = normalize_base_url(&self.base_url)?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(auth_headers(self.token.as_deref())?)
            .build()
            .map_err(|e| ClientError::Usage(format!("failed to build HTTP client: {e}")))?;
        Ok(ServiceClient {
            client,
            base_url,
            status_timeout: self.status_timeout,
            transfer_timeout: self.transfer_timeout,
            retry: self.retry,
        })
    }
}

/// Blocking client for the encryption service. Holds one reqwest client for
/// the lifetime of a command.
#[derive(Clone, Debug)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
    status_timeout: Duration,
    transfer_timeout: Duration,
    retry: RetryPolicy,
}

impl ServiceClient {
    pub fn builder(base_url: impl Into<String>) -> ServiceClientBuilder {
        ServiceClientBuilder {
            base_url: base_url.into(),
            token: None,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Normalized base URL (no trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Call `GET /status`. Failures are reported in the result, never as an
    /// error.
    pub fn check_status(&self) -> StatusResult {
        let url = self.url(STATUS_ENDPOINT);
        debug!("GET {}", url);

        let response = self.retry.run("status check", |_| {
            self.client
                .get(&url)
                .timeout(self.status_timeout)
                .send()
                .map_err(ClientError::from)
        });
        let response = match response {
            Ok(response) => response,
            Err(e) => return StatusResult::unreachable(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return StatusResult::unreachable(service_error(response).to_string());
        }

        // A healthy service may answer with an empty or non-JSON body.
        let text = response.text().unwrap_or_default();
        let body: StatusBody = serde_json::from_str(&text).unwrap_or_default();
        match body.status.as_deref() {
            Some(state) if !state.eq_ignore_ascii_case("ok") => StatusResult {
                reachable: false,
                version: body.version,
                message: Some(body.message.unwrap_or_else(|| format!("service reported status '{state}'"))),
            },
            _ => StatusResult {
                reachable: true,
                version: body.version,
                message: body.message,
            },
        }
    }

    /// Upload the request's file and store the returned artifact. Every
    /// failure is reported in the result.
    pub fn encrypt_file(&self, request: &EncryptRequest) -> EncryptResult {
        let fallback_path = request
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| request.output_path(name))
            .unwrap_or_else(|| request.output_dir.clone());
        into_result(fallback_path, self.try_encrypt_file(request))
    }

    /// Upload source text as if it were a file called `request.name`.
    pub fn encrypt_text(&self, request: &TextRequest) -> EncryptResult {
        let output_path = request.output_path();
        let outcome = request
            .validate_name()
            .and_then(|()| prepare_output_dir(&request.output_dir))
            .and_then(|()| {
                let bytes = request.content.as_bytes();
                self.upload(
                    request.name.trim(),
                    bytes.len() as u64,
                    request.python_version.as_deref(),
                    &output_path,
                    || Ok(multipart::Part::bytes(bytes.to_vec())),
                )
            })
            .map(|size| (output_path.clone(), size));
        into_result(output_path, outcome)
    }

    fn try_encrypt_file(&self, request: &EncryptRequest) -> Result<(PathBuf, u64)> {
        let (file_name, file_size) = request.validate()?;
        let output_path = request.output_path(&file_name);
        info!("Uploading {} ({} bytes)", request.file_path.display(), file_size);

        // The form consumes its reader, so every attempt re-opens the file.
        let size = self.upload(&file_name, file_size, request.python_version.as_deref(), &output_path, || {
            let file = File::open(&request.file_path).map_err(|e| {
                ClientError::local_io(format_args!("cannot read {}", request.file_path.display()), e)
            })?;
            Ok(multipart::Part::reader_with_length(file, file_size))
        })?;
        Ok((output_path, size))
    }

    /// `POST /encrypt` with retries; `part` builds a fresh `file` part for
    /// each attempt. The artifact is stored at `output_path`.
    fn upload(
        &self,
        file_name: &str,
        size: u64,
        python_version: Option<&str>,
        output_path: &Path,
        mut part: impl FnMut() -> Result<multipart::Part>,
    ) -> Result<u64> {
        let url = self.url(ENCRYPT_ENDPOINT);
        let timeout = self.timeout_for(size);

        self.retry.run("encryption request", |attempt| {
            debug!("POST {} (attempt {})", url, attempt + 1);
            let file_part = part()?
                .file_name(file_name.to_string())
                .mime_str("application/octet-stream")?;
            let mut form = multipart::Form::new().part("file", file_part);
            if let Some(version) = python_version {
                form = form.text("python_version", version.to_string());
            }

            let response = self.client.post(&url).timeout(timeout).multipart(form).send()?;
            if !response.status().is_success() {
                return Err(service_error(response));
            }
            store_artifact(response, output_path)
        })
    }

    /// List the interpreter versions the service can target.
    pub fn python_versions(&self) -> Result<PythonVersions> {
        let url = self.url(VERSIONS_ENDPOINT);
        debug!("GET {}", url);
        let response = self.retry.run("versions request", |_| {
            Ok(self.client.get(&url).timeout(self.status_timeout).send()?)
        })?;
        if !response.status().is_success() {
            return Err(service_error(response));
        }
        response
            .json::<PythonVersions>()
            .map_err(|e| ClientError::MalformedResponse(format!("cannot parse versions list: {e}")))
    }

    fn timeout_for(&self, size_bytes: u64) -> Duration {
        let proportional = Duration::from_secs(size_bytes / MIN_THROUGHPUT_BYTES_PER_SEC);
        self.transfer_timeout.max(proportional)
    }
}

fn into_result(fallback_path: PathBuf, outcome: Result<(PathBuf, u64)>) -> EncryptResult {
    match outcome {
        Ok((output_path, size_bytes)) => EncryptResult {
            output_path,
            size_bytes,
            status: EncryptStatus::Success,
        },
        Err(e) => EncryptResult {
            output_path: fallback_path,
            size_bytes: 0,
            status: EncryptStatus::Failure(e),
        },
    }
}

/// Validate a base URL and strip trailing slashes.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|e| ClientError::Usage(format!("invalid base URL '{trimmed}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::Usage(format!(
            "invalid base URL '{trimmed}': scheme must be http or https"
        )));
    }
    if url.host_str().is_none() {
        return Err(ClientError::Usage(format!("invalid base URL '{trimmed}': missing host")));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Default headers for every request: the bearer token, when configured.
fn auth_headers(token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::Usage("API token contains characters not allowed in an HTTP header".into()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/// Turn a non-success response into a `Service` error, keeping the remote
/// diagnostic (JSON `error`/`message` field, or the raw text).
fn service_error(response: Response) -> ClientError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        message: Option<String>,
    }

    let status = response.status();
    let text = response.text().unwrap_or_default();
    let reason = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.error.or(body.message))
        .unwrap_or(text);
    let mut reason = single_line(&reason);
    if reason.is_empty() {
        reason = status.canonical_reason().unwrap_or("no details").to_string();
    }
    if reason.len() > MAX_REASON_LEN {
        let mut cut = MAX_REASON_LEN;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
        reason.push_str("...");
    }
    ClientError::Service {
        status: status.as_u16(),
        reason,
    }
}

/// Stream the response body into a temporary file next to `output_path` and
/// rename it into place once complete. Returns the number of bytes written.
/// A body that ends before its declared length surfaces as a read error and
/// is treated as a lost connection.
fn store_artifact(mut response: Response, output_path: &Path) -> Result<u64> {
    let output_dir = output_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(output_dir).map_err(|e| {
        ClientError::local_io(format_args!("cannot create temporary file in {}", output_dir.display()), e)
    })?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;
    loop {
        let n = match response.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ClientError::Network {
                    reason: format!("connection lost while receiving artifact: {e}"),
                    transient: true,
                })
            }
        };
        temp.write_all(&buf[..n])
            .map_err(|e| ClientError::local_io(format_args!("cannot write {}", output_path.display()), e))?;
        written += n as u64;
    }

    temp.as_file_mut()
        .sync_all()
        .map_err(|e| ClientError::local_io(format_args!("cannot write {}", output_path.display()), e))?;
    temp.persist(output_path)
        .map_err(|e| ClientError::local_io(format_args!("cannot move artifact to {}", output_path.display()), e.error))?;

    info!("Wrote {} bytes to {}", written, output_path.display());
    Ok(written)
}
