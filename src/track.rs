//! Track identifiers and the records produced for a track.
//!
//! A track travels through the pipeline as a [`TrackId`]. The catalog turns
//! it into a [`ResolvedTrack`] (where to download it) and a
//! [`TrackMetadata`] (how to tag it). Both records are immutable once built;
//! the track number is not part of either, as it depends on the album the
//! track is assembled into.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{Error, Result},
    protocol::{detail, lyric, player, Level},
};

/// Matches the `id` query parameter of share URLs, also behind a fragment
/// such as `https://music.163.com/#/song?id=123`.
static ID_PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]id=(\d+)").expect("invalid id pattern"));

/// Numeric catalog identifier of a track.
///
/// Serializes as a JSON number. Endpoints that want strings wrap it with
/// `serde_with::DisplayFromStr`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(u64);

impl TrackId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for TrackId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for TrackId {
    type Err = Error;

    /// Parses a bare number or any URL carrying an `id=<digits>` parameter.
    ///
    /// Short links cannot be parsed without following them; see
    /// [`crate::catalog::Catalog::track_id`].
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Self(s.parse()?));
        }

        ID_PARAMETER
            .captures(s)
            .and_then(|captures| captures.get(1))
            .ok_or_else(|| Error::invalid_argument(format!("no track id in \"{s}\"")))
            .and_then(|id| Ok(Self(id.as_str().parse()?)))
    }
}

/// Where to download a track, as granted by the catalog.
///
/// A track without `url` is denied: the catalog knows it, but this account
/// may not stream it at any level. That is a regular outcome, not an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedTrack {
    pub id: TrackId,

    /// Time-limited streaming URL, always `https`.
    pub url: Option<Url>,

    /// Size in bytes as announced by the catalog.
    pub size: u64,

    /// The granted level, which may be lower than the requested one.
    pub level: Level,

    /// Container as reported by the catalog, in lowercase.
    pub encoding: Option<String>,
}

impl ResolvedTrack {
    /// Builds the record from a streaming grant.
    #[must_use]
    pub fn from_grant(grant: player::Data) -> Self {
        Self {
            id: grant.id,
            url: grant.url,
            size: grant.size,
            level: grant.level.unwrap_or(Level::Unknown),
            encoding: grant
                .encoding
                .or(grant.encode_type)
                .map(|encoding| encoding.to_ascii_lowercase()),
        }
    }

    /// Upgrades a plain `http` URL to `https`; the CDN serves both.
    #[must_use]
    pub fn upgraded(mut self) -> Self {
        self.url = self.url.map(secure);
        self
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.url.is_none()
    }

    /// File extension for the downloaded stream.
    ///
    /// Taken from the URL path if it has one, then from the reported
    /// encoding, and finally guessed from the level.
    #[must_use]
    pub fn extension(&self) -> String {
        self.url
            .as_ref()
            .and_then(|url| {
                let (_, extension) = url.path().rsplit_once('.')?;
                let valid = !extension.is_empty()
                    && extension.len() <= 5
                    && extension.chars().all(|c| c.is_ascii_alphanumeric());
                valid.then(|| extension.to_ascii_lowercase())
            })
            .or_else(|| self.encoding.clone())
            .unwrap_or_else(|| self.level.extension().to_owned())
    }
}

/// Descriptive fields of a track, used for tagging and naming files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackMetadata {
    pub id: Option<TrackId>,
    pub title: String,

    /// All artists joined with `/`.
    pub artist: String,
    pub album: String,
    pub cover_url: Option<Url>,
    pub lyrics: Option<String>,
    pub translated_lyrics: Option<String>,
}

impl TrackMetadata {
    /// Combines a song detail with its optional lyrics.
    #[must_use]
    pub fn from_song(song: &detail::Song, lyrics: Option<&lyric::Response>) -> Self {
        Self {
            id: Some(song.id),
            title: song.name.clone(),
            artist: song.artist(),
            album: song.album.name.clone().unwrap_or_default(),
            cover_url: song.album.cover_url(),
            lyrics: lyrics.and_then(lyric::Response::lyrics).map(str::to_owned),
            translated_lyrics: lyrics
                .and_then(lyric::Response::translated)
                .map(str::to_owned),
        }
    }

    /// Upgrades a plain `http` cover URL to `https`.
    #[must_use]
    pub fn upgraded(mut self) -> Self {
        self.cover_url = self.cover_url.map(secure);
        self
    }
}

/// Upgrades plain `http` URLs to `https`.
#[must_use]
pub fn secure(mut url: Url) -> Url {
    if url.scheme() == "http" && url.set_scheme("https").is_err() {
        warn!("cannot upgrade {url} to https");
    }
    url
}
