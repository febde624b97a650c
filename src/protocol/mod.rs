//! Wire types of the NetEase Cloud Music catalog.
//!
//! This module contains the request and response schemas of the catalog
//! endpoints used by this crate, and the parsing logic shared between them.
//!
//! # Submodules
//!
//! * [`level`] - Quality tiers as named on the wire
//! * [`player`] - Encrypted streaming URL lookup
//! * [`detail`] - Song details: title, artists, album and cover
//! * [`lyric`] - Original and translated lyrics
//!
//! # Shared Functionality
//!
//! Every catalog response carries a numeric `code` that is `200` on
//! success, regardless of the HTTP status. [`Status`] captures it so that
//! callers can check it before looking at the payload.
//!
//! # Usage Example
//!
//! ```
//! use ncmfetch::protocol;
//!
//! // Parse and log JSON response
//! let response: player::Response = protocol::json(&body, "song/enhance/player/url/v1")?;
//!
//! // Response is logged at:
//! // - TRACE level if successful
//! // - ERROR level with details if parsing fails
//! ```

pub mod detail;
pub mod level;
pub mod lyric;
pub mod player;

pub use level::Level;

use std::fmt::Debug;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Response code of a successful catalog call.
pub const CODE_OK: i64 = 200;

/// Response code the catalog sends when the session cookies are missing or
/// expired.
pub const CODE_NEEDS_LOGIN: i64 = 301;

/// Parses and logs JSON responses from catalog endpoints.
///
/// # Arguments
///
/// * `body` - Response body text to parse
/// * `origin` - Description of API endpoint for logging
///
/// # Errors
///
/// Returns `InvalidArgument` if:
/// * Response body is not valid JSON
/// * JSON structure doesn't match type `T`
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error and raw text at ERROR level
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(Error::invalid_argument(format!(
                "{origin}: unexpected response: {e}"
            )))
        }
    }
}

/// Status part of every catalog response.
pub trait Status {
    /// The response `code` field.
    fn code(&self) -> i64;

    /// Optional human readable message accompanying a failure.
    fn message(&self) -> Option<&str> {
        None
    }

    /// Checks that the response code signals success.
    ///
    /// # Errors
    ///
    /// * `Unauthenticated` for [`CODE_NEEDS_LOGIN`]
    /// * `InvalidArgument` for any other code than [`CODE_OK`]
    fn check(&self, origin: &str) -> Result<()> {
        let code = self.code();
        let message = self.message().unwrap_or("no message");
        match code {
            CODE_OK => Ok(()),
            CODE_NEEDS_LOGIN => Err(Error::unauthenticated(format!(
                "{origin}: login required ({message}); refresh your credentials"
            ))),
            _ => Err(Error::invalid_argument(format!(
                "{origin}: catalog returned code {code} ({message})"
            ))),
        }
    }
}

/// Deserializes `null` and empty strings to `None`.
pub(crate) fn non_empty<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
