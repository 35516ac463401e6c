//! Downloads remote sources into a local staging file.
//!
//! Servers that drop the connection halfway are common for large media files,
//! so a short read is not an error: the fetcher waits, then asks for the rest
//! with a byte range when the server supports it, or starts over when it does
//! not.

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderName, RANGE,
};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use crate::config::FetchPreferences;
use crate::error::FetchError;

const FIRST_DELAY_SECS: u64 = 15;
const SHORT_STEP_SECS: u64 = 15;
const SHORT_STEP_LIMIT_SECS: u64 = 60;
const LONG_STEP_SECS: u64 = 60;
const LONG_STEP_LIMIT_SECS: u64 = 360;
const READ_CHUNK: usize = 64 * 1024;

/// Headers and body of one GET.
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub accept_ranges: Option<String>,
    pub content_range: Option<String>,
    pub body: Box<dyn Read>,
}

pub trait Transport {
    /// Issues a GET; a non-zero `offset` asks for `bytes=offset-`.
    fn get(&self, url: &str, offset: u64) -> Result<TransportResponse, FetchError>;
}

/// Blocking HTTP(S) transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(preferences: &FetchPreferences) -> Result<Self, FetchError> {
        let mut builder = Client::builder().user_agent(preferences.user_agent.clone());
        if let Some(secs) = preferences.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, offset: u64) -> Result<TransportResponse, FetchError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_length = header(CONTENT_LENGTH).and_then(|value| value.trim().parse().ok());
        let accept_ranges = header(ACCEPT_RANGES);
        let content_range = header(CONTENT_RANGE);

        Ok(TransportResponse {
            status: status.as_u16(),
            content_type,
            content_length,
            accept_ranges,
            content_range,
            body: Box::new(response),
        })
    }
}

/// Delays between attempts: 15s steps up to a minute, then minute steps until
/// the delay passes six minutes, where it stays.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: Duration::from_secs(FIRST_DELAY_SECS),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let secs = current.as_secs();
        let step = if secs <= SHORT_STEP_LIMIT_SECS {
            SHORT_STEP_SECS
        } else if secs < LONG_STEP_LIMIT_SECS {
            LONG_STEP_SECS
        } else {
            0
        };
        self.next = Duration::from_secs(secs + step);
        Some(current)
    }
}

/// Bytes received so far for one source.
#[derive(Debug, Default)]
pub struct DownloadBuffer {
    pub bytes: Vec<u8>,
    pub expected_length: Option<u64>,
    pub resume_supported: bool,
}

impl DownloadBuffer {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        match self.expected_length {
            Some(expected) => self.len() >= expected,
            None => true,
        }
    }
}

/// A downloaded source. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    len: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Staged(StagedFile),
    /// The server answered with an HTML page instead of the asset.
    NotFound,
}

pub struct Fetcher<T = HttpTransport> {
    transport: T,
    max_attempts: Option<u32>,
    sleep: Box<dyn Fn(Duration)>,
}

impl Fetcher<HttpTransport> {
    pub fn from_preferences(preferences: &FetchPreferences) -> Result<Self, FetchError> {
        Ok(Fetcher::new(HttpTransport::new(preferences)?).with_max_attempts(preferences.max_attempts))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_attempts: None,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// `None` keeps retrying short reads for as long as the server answers.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.filter(|max| *max > 0);
        self
    }

    pub fn with_sleeper<F>(mut self, sleep: F) -> Self
    where
        F: Fn(Duration) + 'static,
    {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        info!(url, "Reading file");
        let mut buffer = DownloadBuffer::default();
        let mut backoff = Backoff::default();
        let mut resume = false;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let offset = if resume { buffer.len() } else { 0 };
            if offset > 0 {
                info!(url, offset, "Resuming download");
            }

            let mut response = self.transport.get(url, offset)?;
            if is_html(response.content_type.as_deref()) {
                warn!(url, "Couldn't download the file: the requested URL was not found on server");
                return Ok(FetchOutcome::NotFound);
            }

            buffer.resume_supported = response
                .accept_ranges
                .as_deref()
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"));

            let continued = offset > 0 && response.status == 206;
            if continued {
                if let Some(total) = response.content_range.as_deref().and_then(content_range_total) {
                    buffer.expected_length = Some(total);
                }
            } else {
                if offset > 0 {
                    debug!(url, "Server ignored the range request; starting over");
                }
                buffer.bytes.clear();
                buffer.expected_length = response.content_length;
            }

            let interrupted = read_body(&mut response.body, &mut buffer.bytes).err();

            let Some(expected) = buffer.expected_length else {
                if let Some(err) = interrupted {
                    warn!(url, error = %err, received = buffer.len(), "Download of unknown length interrupted");
                    return Err(err.into());
                }
                warn!(url, "Length check of retrieved data not possible");
                break;
            };
            if let Some(err) = &interrupted {
                warn!(url, error = %err, received = buffer.len(), "Download interrupted");
            }
            if buffer.is_complete() {
                break;
            }

            info!(
                url,
                received = buffer.len(),
                expected,
                "Connection closed at byte {} ({} left)",
                buffer.len(),
                expected - buffer.len()
            );
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts,
                    received: buffer.len(),
                    expected,
                });
            }

            resume = buffer.resume_supported && !buffer.is_empty();
            let delay = backoff.next().unwrap_or(Duration::from_secs(FIRST_DELAY_SECS));
            info!(url, delay_secs = delay.as_secs(), "Sleeping before retry");
            (self.sleep)(delay);
        }

        stage(buffer).map(FetchOutcome::Staged)
    }
}

fn is_html(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|value| value.to_ascii_lowercase().contains("text/html"))
}

/// Total length from `bytes 400-999/1000`; `*` yields nothing.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// Reads until EOF. Bytes received before a broken connection stay in `bytes`.
fn read_body(body: &mut dyn Read, bytes: &mut Vec<u8>) -> io::Result<()> {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match body.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(read) => bytes.extend_from_slice(&chunk[..read]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

fn stage(buffer: DownloadBuffer) -> Result<StagedFile, FetchError> {
    let mut file = NamedTempFile::new()?;
    file.write_all(&buffer.bytes)?;
    file.flush()?;
    let len = buffer.len();
    let path = file.into_temp_path();
    debug!(path = %path.display(), len, "Staged download");
    Ok(StagedFile { path, len })
}
