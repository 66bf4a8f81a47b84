use std::io::Read;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{FetchCause, FetchError};
use crate::ingest::hasher;
use crate::utils::config::AudioSettings;

const MAX_ATTEMPTS: u32 = 99;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(320);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(4);

/// Headers that make scraped sites treat us like a regular browser.
pub fn get_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("DNT", "1"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "cross-site"),
        ("Sec-Fetch-User", "?1"),
        (
            "User-Agent",
            "Mozilla/5.0 (X11; Linux x86_64; rv:136.0) Gecko/20100101 Firefox/136.0",
        ),
    ]
}

/// A complete response body plus the headers used for change detection.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Downloaded {
    pub fn signature(&self) -> String {
        hasher::remote_signature(self.etag.as_deref(), self.last_modified.as_deref(), &self.bytes)
    }
}

/// Blocking HTTP client shared by the loader, the download pipeline and
/// remote providers. Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    attempts: u32,
    retry_delay: Duration,
}

impl HttpClient {
    /// `attempts` is the total number of tries. Only timeouts are retried.
    pub fn new(attempts: u32) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .build();
        Self {
            agent,
            attempts: attempts.clamp(1, MAX_ATTEMPTS),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn from_settings(settings: &AudioSettings) -> Self {
        Self::new(settings.attempts)
    }

    /// Base delay before the second attempt. Later attempts double it.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// GET with up to `attempts` tries. A timeout, whether connecting or
    /// reading the body, triggers another try. Any other failure, including
    /// a non-2xx status, is returned at once.
    pub fn get_with_retry(&self, url: &str, timeout: Duration) -> Result<Downloaded, FetchError> {
        let mut attempt = 1u32;
        loop {
            match self.get_once(url, timeout) {
                Ok(downloaded) => return Ok(downloaded),
                Err(error) if error.is_timeout() && attempt < self.attempts => {
                    let backoff = timeout_backoff_delay(self.retry_delay, attempt);
                    warn!(
                        "timeout: {} (attempt {} of {}), retrying in {:?}",
                        url, attempt, self.attempts, backoff
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Text body of a page, decoded lossily.
    pub fn get_text(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let downloaded = self.get_with_retry(url, timeout)?;
        Ok(String::from_utf8_lossy(&downloaded.bytes).into_owned())
    }

    /// Signature of a remote document from a HEAD request. `None` if the
    /// server does not say anything usable about the content.
    pub fn head_signature(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<String>, FetchError> {
        let response = self
            .agent
            .head(url)
            .timeout(timeout)
            .call()
            .map_err(|error| classify_ureq_failure(url, &error))?;
        Ok(hasher::header_signature(
            response.header("ETag"),
            response.header("Last-Modified"),
        ))
    }

    fn get_once(&self, url: &str, timeout: Duration) -> Result<Downloaded, FetchError> {
        let mut request = self.agent.get(url).timeout(timeout);
        for (name, value) in get_headers() {
            request = request.set(name, value);
        }
        let response = request.call().map_err(|error| classify_ureq_failure(url, &error))?;

        let etag = response.header("ETag").map(str::to_string);
        let last_modified = response.header("Last-Modified").map(str::to_string);

        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes).map_err(|error| {
            let cause = if is_io_timeout(&error) {
                FetchCause::Timeout
            } else {
                FetchCause::Transport(error.to_string())
            };
            FetchError::new(
                url,
                format!("{} download failed while reading body: {}", url, error),
                cause,
            )
        })?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);

        Ok(Downloaded {
            bytes,
            etag,
            last_modified,
        })
    }
}

fn timeout_backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let multiplier = 1u32 << exponent;
    base_delay
        .checked_mul(multiplier)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

fn classify_ureq_failure(url: &str, error: &ureq::Error) -> FetchError {
    match error {
        ureq::Error::Status(code, _) => FetchError::new(
            url,
            format!("{} download failed with return code {}", url, code),
            FetchCause::Status(*code),
        ),
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            let lowered = message.to_ascii_lowercase();
            let cause = if transport_timed_out(transport)
                || lowered.contains("timed out")
                || lowered.contains("timeout")
            {
                FetchCause::Timeout
            } else {
                FetchCause::Transport(message.clone())
            };
            FetchError::new(url, format!("{} download failed: {}", url, message), cause)
        }
    }
}

fn transport_timed_out(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(error) = source {
        if let Some(io) = error.downcast_ref::<std::io::Error>() {
            if is_io_timeout(io) {
                return true;
            }
        }
        source = error.source();
    }
    false
}

fn is_io_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    ) || error.to_string().to_ascii_lowercase().contains("timed out")
}
