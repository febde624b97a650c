//! Runtime configuration.
//!
//! Configuration is layered, from lowest to highest precedence:
//!
//! 1. Defaults built into [`Config::default`]
//! 2. An optional TOML file loaded with [`Config::from_file`]
//! 3. Command line arguments, applied by the binary
//!
//! Every key of the TOML file is optional:
//!
//! ```toml
//! api_url = "https://interface3.music.163.com"
//! level = "lossless"
//! output = "albums"
//! workers = 4
//! upgrade_http = true
//!
//! [download]
//! attempts = 3
//! base_delay_ms = 1000
//! jitter = 0.1
//! min_audio_size = 102400
//! min_image_size = 1024
//! ```

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;

use crate::{
    error::{Error, Result},
    protocol::Level,
};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the catalog API, without trailing path.
    pub api_url: Url,

    /// `User-Agent` for catalog API calls. Downloads use a random browser
    /// agent instead.
    pub user_agent: String,

    /// Device identifier sent in cookies and in encrypted request headers.
    pub device_id: String,

    /// Requested quality tier.
    pub level: Level,

    /// Directory below which album directories are created.
    pub output: PathBuf,

    /// Maximum number of tracks processed concurrently per album.
    pub workers: usize,

    /// Upgrade plain `http` streaming and cover URLs to `https`.
    pub upgrade_http: bool,

    pub download: DownloadPolicy,
}

impl Config {
    /// Default catalog API host.
    pub const API_URL: &'static str = "https://interface3.music.163.com";

    /// Desktop client `User-Agent` the catalog expects for encrypted calls.
    pub const USER_AGENT: &'static str = "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Safari/537.36 Chrome/91.0.4472.164 NeteaseMusicDesktop/2.10.2.200154";

    pub const DEVICE_ID: &'static str = "pyncm!";

    pub const WORKERS: usize = 4;

    /// Configuration files are small; refuse to read anything bigger.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Parses configuration from TOML text on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the text is not valid TOML, has unknown
    /// keys or fails [`Config::validate`].
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from a TOML file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large or cannot
    /// be parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_size = std::fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large",
                path.display()
            )));
        }

        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(|e| {
            Error::new(e.kind, format!("{}: {}", path.display(), e.error))
        })
    }

    /// Checks values that parse but make no sense.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_argument("workers must be at least 1"));
        }
        if !self.api_url.scheme().starts_with("http") {
            return Err(Error::invalid_argument(format!(
                "api_url must be an http(s) URL: {}",
                self.api_url
            )));
        }
        if self.level == Level::Unknown {
            return Err(Error::invalid_argument("level must be a known tier"));
        }
        self.download.validate()
    }

    /// Joins `path` onto the catalog API base URL.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.api_url.as_str().trim_end_matches('/');
        Ok(format!("{base}{path}").parse::<Url>()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Parsing a constant valid URL cannot fail.
            api_url: Url::parse(Self::API_URL).expect("invalid default API URL"),
            user_agent: Self::USER_AGENT.to_owned(),
            device_id: Self::DEVICE_ID.to_owned(),
            level: Level::default(),
            output: PathBuf::from("."),
            workers: Self::WORKERS,
            upgrade_http: true,
            download: DownloadPolicy::default(),
        }
    }
}

/// How downloads are retried and validated.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,

    /// Delay before the second attempt; doubles for every further attempt.
    #[serde(rename = "base_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,

    /// Relative random deviation of every delay, from 0 to 1.
    pub jitter: f32,

    /// Smallest acceptable audio file in bytes.
    pub min_audio_size: u64,

    /// Smallest acceptable cover image in bytes.
    pub min_image_size: u64,
}

impl DownloadPolicy {
    pub const ATTEMPTS: u32 = 3;
    pub const BASE_DELAY: Duration = Duration::from_secs(1);
    pub const JITTER: f32 = 0.1;

    /// Truncated or error pages are far smaller than any real track.
    pub const MIN_AUDIO_SIZE: u64 = 100 * 1024;
    pub const MIN_IMAGE_SIZE: u64 = 1024;

    /// Upper bound of a single backoff delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(60);

    /// Delay before retry number `retry`, counting from 1.
    ///
    /// The delay doubles with every retry starting at `base_delay`, is
    /// capped at [`Self::MAX_DELAY`] and deviates randomly by up to `jitter`
    /// in either direction.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1 << exponent)
            .min(Self::MAX_DELAY);

        let deviation = (fastrand::f32() * 2.0 - 1.0) * self.jitter;
        delay.mul_f32(1.0 + deviation)
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` for zero attempts or a jitter outside 0..=1.
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(Error::invalid_argument("attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::invalid_argument(format!(
                "jitter must be between 0 and 1, not {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            attempts: Self::ATTEMPTS,
            base_delay: Self::BASE_DELAY,
            jitter: Self::JITTER,
            min_audio_size: Self::MIN_AUDIO_SIZE,
            min_image_size: Self::MIN_IMAGE_SIZE,
        }
    }
}
