// src/http/client.rs

//! HTTP client for upstream metadata and distfiles
//!
//! Wraps a blocking reqwest client with a retry budget, a linear backoff
//! between attempts and an optional per-host rate limiter. Redirects never
//! carry a `Referer` header; some mirror networks reject redirected
//! requests that do.

use super::limiter::HostRateLimiter;
use crate::error::{Error, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{IsTerminal, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per request before giving up
pub const MAX_RETRIES: u32 = 3;

/// Base retry delay in milliseconds, multiplied by the attempt number
pub const RETRY_DELAY_MS: u64 = 1000;

const STREAM_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    /// Requests per second and burst per host
    pub rate_limit: Option<(u32, u32)>,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: HTTP_TIMEOUT,
            retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            rate_limit: None,
            user_agent: format!("mark-devkit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client wrapper with retry support
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
    limiter: Option<Arc<HostRateLimiter>>,
}

/// Outcome of one attempt
enum Attempt {
    Done(Response),
    Retry(String),
    Fail(Error),
}

impl HttpClient {
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .referer(false)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: options.retries.max(1),
            retry_delay: options.retry_delay,
            limiter: options
                .rate_limit
                .map(|(rps, burst)| Arc::new(HostRateLimiter::new(rps, burst))),
        })
    }

    /// Client with default options
    pub fn with_defaults() -> Result<Self> {
        Self::new(&HttpOptions::default())
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn throttle(&self, url: &str) {
        if let Some(limiter) = &self.limiter
            && let Ok(parsed) = url::Url::parse(url)
            && let Some(host) = parsed.host_str()
        {
            limiter.acquire(host);
        }
    }

    fn attempt(&self, url: &str, build: &dyn Fn(&Client) -> RequestBuilder) -> Attempt {
        self.throttle(url);
        match build(&self.client).send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Attempt::Done(response)
                } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Attempt::Retry(format!("HTTP {} from {}", status, url))
                } else {
                    Attempt::Fail(Error::DownloadError(format!("HTTP {} from {}", status, url)))
                }
            }
            Err(e) if e.is_builder() => {
                Attempt::Fail(Error::DownloadError(format!("Invalid request {}: {}", url, e)))
            }
            Err(e) => Attempt::Retry(format!("{}: {}", url, e)),
        }
    }

    /// Send a request, retrying transport failures and 5xx/429 answers
    pub fn send_with_retry(
        &self,
        url: &str,
        build: &dyn Fn(&Client) -> RequestBuilder,
    ) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(url, build) {
                Attempt::Done(response) => return Ok(response),
                Attempt::Fail(e) => return Err(e),
                Attempt::Retry(reason) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed after {attempt} attempts: {reason}"
                        )));
                    }
                    warn!("Attempt {} failed: {}, retrying...", attempt, reason);
                    std::thread::sleep(self.retry_delay * attempt);
                }
            }
        }
    }

    pub fn get(&self, url: &str) -> Result<Response> {
        self.send_with_retry(url, &|c| c.get(url))
    }

    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get(url)?
            .bytes()
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {}", e)))?;
        Ok(bytes.to_vec())
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        self.get(url)?
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {}", e)))
    }

    /// GET and decode JSON, sending the given extra headers
    pub fn get_json_with<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<T> {
        let response = self.send_with_retry(url, &|c| {
            let mut req = c.get(url).header("Accept", "application/json");
            for (name, value) in headers {
                req = req.header(name.as_str(), value.as_str());
            }
            req
        })?;
        response
            .json()
            .map_err(|e| Error::ParseError(format!("Invalid JSON from {}: {}", url, e)))
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get_json_with(url, &[])
    }

    /// POST a JSON body; non-2xx answers are errors carrying the body
    pub fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        headers: &[(String, String)],
    ) -> Result<T> {
        self.throttle(url);
        let mut req = self.client.post(url).json(body);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let response = req
            .send()
            .map_err(|e| Error::DownloadError(format!("POST {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(Error::DownloadError(format!("HTTP {} from {}: {}", status, url, text)));
        }
        response
            .json()
            .map_err(|e| Error::ParseError(format!("Invalid JSON from {}: {}", url, e)))
    }

    /// `Content-Length` announced by a HEAD request, if any
    pub fn head_content_length(&self, url: &str) -> Result<Option<u64>> {
        let response = self.send_with_retry(url, &|c| c.head(url))?;
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|len| *len > 0))
    }

    /// Download `url` into `dest_path` through a temporary file
    ///
    /// Returns the number of bytes written.
    pub fn download_file(&self, url: &str, dest_path: &Path, progress: Option<&ProgressBar>) -> Result<u64> {
        debug!("Downloading {} to {}", url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let response = self.get(url)?;
        let total_size = response.content_length().unwrap_or(0);

        let temp_path = temp_path_for(dest_path);
        let mut file = File::create(&temp_path).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {e}", temp_path.display()))
        })?;

        let downloaded = match stream_response_to_file(response, &mut file, total_size, progress) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        fs::rename(&temp_path, dest_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                dest_path.display()
            ))
        })?;

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        Ok(downloaded)
    }
}

fn temp_path_for(dest: &Path) -> std::path::PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn stream_response_to_file(
    mut response: Response,
    file: &mut File,
    total_size: u64,
    progress: Option<&ProgressBar>,
) -> Result<u64> {
    if let Some(pb) = progress
        && total_size > 0
    {
        pb.set_length(total_size);
    }

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])
            .map_err(|e| Error::IoError(format!("Failed to write data: {e}")))?;
        downloaded += bytes_read as u64;
        if let Some(pb) = progress {
            pb.set_position(downloaded);
        }
    }
    Ok(downloaded)
}

/// Progress bar for one download, hidden when stderr is not a terminal
pub fn download_bar(name: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(name.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_keeps_full_name() {
        assert_eq!(
            temp_path_for(Path::new("/d/foo-1.0.tar.gz")),
            Path::new("/d/foo-1.0.tar.gz.part")
        );
    }

    #[test]
    fn test_unreachable_host_exhausts_retries() {
        let client = HttpClient::new(&HttpOptions {
            retries: 2,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        let err = client.get_bytes("http://127.0.0.1:1/x").unwrap_err();
        assert!(matches!(err, Error::DownloadError(msg) if msg.contains("2 attempts")));
    }
}
