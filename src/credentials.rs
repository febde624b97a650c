//! Session credentials for the catalog.
//!
//! The catalog authenticates requests by cookies. A logged-in browser or
//! desktop session yields a set of `name=value` pairs, of which `MUSIC_U`
//! identifies the account. How those pairs are obtained (scanning a QR code,
//! copying them from a browser) is outside of this crate: anything that can
//! produce them implements [`CredentialProvider`].
//!
//! # Format
//!
//! Credentials are parsed from the same text a browser shows in its
//! `Cookie` header, or one pair per line:
//!
//! ```text
//! MUSIC_U=00A1...; __csrf=3f2e...; os=pc
//! ```
//!
//! # Security
//!
//! Credential values grant access to the account. They are redacted from
//! debug output and files are size-checked before reading.

use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use veil::Redact;

use crate::error::{Error, Result};

/// Cookie that identifies a logged-in account.
pub const ACCOUNT_COOKIE: &str = "MUSIC_U";

/// A set of session cookies.
#[derive(Clone, Default, PartialEq, Eq, Redact)]
pub struct Credentials {
    #[redact]
    cookies: BTreeMap<String, String>,
}

impl Credentials {
    /// Credentials without any cookies: anonymous access.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Whether the account cookie is present.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.get(ACCOUNT_COOKIE).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl FromStr for Credentials {
    type Err = Error;

    /// Parses `name=value` pairs separated by `;` or newlines.
    ///
    /// Names and values are trimmed and blank entries are skipped. The value
    /// is everything after the first `=`, so values may contain `=` too.
    fn from_str(s: &str) -> Result<Self> {
        let mut credentials = Self::default();
        for pair in s
            .split(|c: char| c == ';' || c == '\n')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
        {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                Error::invalid_argument("credentials should be name=value pairs")
            })?;

            let name = name.trim();
            if name.is_empty() {
                return Err(Error::invalid_argument("credential name is empty"));
            }

            credentials.insert(name, value.trim());
        }

        Ok(credentials)
    }
}

/// Source of session credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produces the current credentials.
    async fn credentials(&self) -> Result<Credentials>;
}

/// Credentials kept in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Credentials read from a text file on every request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    /// Maximum size of a credentials file. Real sessions are well below
    /// 4 KiB; anything larger is not a credentials file.
    pub const MAX_SIZE: u64 = 64 * 1024;

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for FileCredentials {
    /// # Errors
    ///
    /// * `NotFound` if the file does not exist
    /// * `OutOfRange` if the file is larger than [`Self::MAX_SIZE`]
    /// * `InvalidArgument` if the contents cannot be parsed
    async fn credentials(&self) -> Result<Credentials> {
        // Prevent out-of-memory condition: credential files should be small.
        let file_size = tokio::fs::metadata(&self.path).await?.len();
        if file_size > Self::MAX_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large: {file_size} bytes",
                self.path.display()
            )));
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        let credentials = contents.parse::<Credentials>()?;
        debug!(
            "read {} credentials from {}",
            credentials.len(),
            self.path.display()
        );

        Ok(credentials)
    }
}
