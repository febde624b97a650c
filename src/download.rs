//! Resilient downloads from the catalog's CDN.
//!
//! The CDN rate limits aggressively and occasionally answers with error
//! pages, truncated bodies or the wrong content. Every download therefore:
//!
//! 1. is attempted up to `attempts` times, sleeping with exponential
//!    backoff and jitter in between;
//! 2. presents a fresh random browser identity on every attempt;
//! 3. is validated for status, content type, announced length and a
//!    minimum size;
//! 4. is written to `<dest>.part` first and only renamed to `dest` once it
//!    validated, so `dest` never holds a partial file.
//!
//! Cancellation is honored before every attempt and while sleeping between
//! attempts, never in the middle of one.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, ORIGIN, REFERER, USER_AGENT};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::{Config, DownloadPolicy},
    error::{Error, Result},
    http::Client as HttpClient,
};

/// Kind of content a download must have.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContentFamily {
    Audio,
    Image,
}

impl ContentFamily {
    /// Generic binary content is accepted for every family: the CDN serves
    /// many files that way.
    const GENERIC: &'static str = "application/octet-stream";

    /// Whether a `Content-Type` header value belongs to this family.
    #[must_use]
    pub fn accepts(self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let prefix = match self {
            Self::Audio => "audio/",
            Self::Image => "image/",
        };

        essence.starts_with(prefix) || essence == Self::GENERIC
    }
}

/// What a download must look like to be accepted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Expect {
    pub family: ContentFamily,

    /// Smallest acceptable size in bytes.
    pub min_size: u64,
}

impl Expect {
    #[must_use]
    pub fn audio(policy: &DownloadPolicy) -> Self {
        Self {
            family: ContentFamily::Audio,
            min_size: policy.min_audio_size,
        }
    }

    #[must_use]
    pub fn image(policy: &DownloadPolicy) -> Self {
        Self {
            family: ContentFamily::Image,
            min_size: policy.min_image_size,
        }
    }
}

pub struct Downloader {
    http_client: HttpClient,
    policy: DownloadPolicy,
}

impl Downloader {
    /// Site that downloads claim to come from.
    const SITE: &'static str = "https://music.163.com";

    /// Client address as claimed to the CDN.
    const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

    /// Browser versions to pick a `User-Agent` from.
    const CHROME_VERSIONS: [&'static str; 6] = [
        "91.0.4472.124",
        "92.0.4515.107",
        "93.0.4577.63",
        "94.0.4606.61",
        "95.0.4638.54",
        "96.0.4664.45",
    ];

    /// Creates a downloader with its own cookie-less HTTP client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::without_cookies(config)?,
            policy: config.download.clone(),
        })
    }

    #[must_use]
    pub fn policy(&self) -> &DownloadPolicy {
        &self.policy
    }

    /// Downloads `url` to `dest`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// * `Cancelled` if `cancel` was triggered before or between attempts
    /// * `Unavailable` if every attempt failed, carrying the last failure
    /// * I/O errors of the final rename
    pub async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        expect: &Expect,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let part = part_path(dest);
        let attempts = self.policy.attempts.max(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!(
                    "download of {} cancelled",
                    dest.display()
                )));
            }

            match self.attempt(url, &part, expect).await {
                Ok(size) => {
                    fs::rename(&part, dest).await?;
                    debug!("downloaded {size} bytes to {}", dest.display());
                    return Ok(size);
                }
                Err(e) => {
                    remove_part(&part).await;
                    warn!(
                        "download of {} failed (attempt {attempt}/{attempts}): {e}",
                        dest.display()
                    );
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                let delay = self.policy.delay(attempt);
                debug!("retrying in {:.1}s", delay.as_secs_f32());
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(Error::cancelled(format!(
                            "download of {} cancelled",
                            dest.display()
                        )));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        let last_error = last_error
            .map_or_else(|| "no attempt made".to_owned(), |e| e.to_string());
        Err(Error::unavailable(format!(
            "giving up on {} after {attempts} attempts: {last_error}",
            dest.display()
        )))
    }

    /// One download attempt into `part`.
    async fn attempt(&self, url: &Url, part: &Path, expect: &Expect) -> Result<u64> {
        let mut request = self.http_client.get(url.clone());
        let headers = request.headers_mut();
        headers.insert(USER_AGENT, HeaderValue::from_str(&Self::random_user_agent())?);
        headers.insert(REFERER, HeaderValue::from_static("https://music.163.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static(Self::SITE));
        headers.insert(Self::X_REAL_IP, HeaderValue::from_str(&Self::random_ip())?);

        let mut response = self.http_client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, url.path()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !expect.family.accepts(&content_type) {
            return Err(Error::failed_precondition(format!(
                "expected {:?} content but got \"{content_type}\"",
                expect.family
            )));
        }

        let announced = response.content_length();
        let mut file = fs::File::create(part).await?;
        let mut size = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if let Some(announced) = announced {
            if size != announced {
                return Err(Error::data_loss(format!(
                    "received {size} of {announced} bytes"
                )));
            }
        }
        if size < expect.min_size {
            return Err(Error::data_loss(format!(
                "{size} bytes is less than the minimum of {}",
                expect.min_size
            )));
        }

        Ok(size)
    }

    fn random_user_agent() -> String {
        let version = Self::CHROME_VERSIONS[fastrand::usize(..Self::CHROME_VERSIONS.len())];
        format!("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version} Safari/537.36")
    }

    fn random_ip() -> String {
        format!(
            "{}.{}.{}.{}",
            fastrand::u8(100..),
            fastrand::u8(..),
            fastrand::u8(..),
            fastrand::u8(..)
        )
    }
}

/// The temporary file a download is written to before it validated.
#[must_use]
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    dest.with_file_name(name)
}

async fn remove_part(part: &Path) {
    if let Err(e) = fs::remove_file(part).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("cannot remove {}: {e}", part.display());
        }
    }
}
