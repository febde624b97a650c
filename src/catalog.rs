//! Client of the NetEase Cloud Music catalog.
//!
//! The catalog answers three questions about a track:
//!
//! * where it can be downloaded ([`Catalog::resolve`]), through the
//!   encrypted player endpoint;
//! * what it is called ([`Catalog::detail`]);
//! * what its lyrics are ([`Catalog::lyrics`]).
//!
//! All calls share one rate-limited HTTP client whose cookie jar carries
//! the device cookies and the user's session credentials. Calls take
//! `&self`, so a single `Catalog` can serve many concurrent tracks.
//!
//! # Example
//!
//! ```rust
//! use ncmfetch::{
//!     catalog::Catalog, config::Config, credentials::Credentials, protocol::Level,
//! };
//!
//! let catalog = Catalog::new(&Config::default(), &Credentials::anonymous())?;
//! let id = catalog.track_id("https://music.163.com/#/song?id=1901371647").await?;
//! let track = catalog.resolve(id, Level::Lossless).await?;
//! if let Some(url) = track.url {
//!     println!("{url}");
//! }
//! ```

use reqwest::cookie::Jar;
use url::Url;

use crate::{
    config::Config,
    credentials::{CredentialProvider, Credentials},
    eapi,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self, detail, lyric,
        player::{self, Header},
        Level, Status,
    },
    track::{ResolvedTrack, TrackId, TrackMetadata},
};

pub struct Catalog {
    http_client: HttpClient,
    config: Config,
}

impl Catalog {
    /// Hosts that serve short share links redirecting to a track page.
    const SHORT_LINK_HOSTS: [&'static str; 1] = ["163cn.tv"];

    /// Creates a catalog client for the given session.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &Config, credentials: &Credentials) -> Result<Self> {
        let cookie_jar = Self::cookie_jar(config, credentials);
        let http_client = HttpClient::with_cookies(config, cookie_jar)?;

        if credentials.is_logged_in() {
            debug!("using session credentials");
        } else {
            warn!("no account cookie present; only standard quality may be available");
        }

        Ok(Self {
            http_client,
            config: config.clone(),
        })
    }

    /// Creates a catalog client with credentials from `provider`.
    ///
    /// # Errors
    ///
    /// Returns error if the provider fails or the HTTP client cannot be
    /// created.
    pub async fn with_provider(config: &Config, provider: &dyn CredentialProvider) -> Result<Self> {
        let credentials = provider.credentials().await?;
        Self::new(config, &credentials)
    }

    /// Creates a cookie jar holding the desktop client cookies, overlaid
    /// by the session credentials.
    fn cookie_jar(config: &Config, credentials: &Credentials) -> Jar {
        let cookie_jar = Jar::default();
        let origin = &config.api_url;

        let device = [
            ("os", Header::OS),
            ("appver", ""),
            ("osver", ""),
            ("deviceId", config.device_id.as_str()),
        ];
        for (name, value) in device.into_iter().chain(credentials.iter()) {
            cookie_jar.add_cookie_str(&format!("{name}={value}; Path=/"), origin);
        }

        cookie_jar
    }

    /// Posts a form and decodes the JSON response.
    async fn call<T>(&self, path: &str, fields: &[(&str, String)]) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de> + std::fmt::Debug + Status,
    {
        // Check the URL early to not needlessly hit the rate limiter.
        let url = self.config.endpoint(path)?;
        let request = self.http_client.post_form(url, fields);

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, path));
        }

        let body = response.text().await?;
        let result: T = protocol::json(&body, path)?;
        result.check(path)?;

        Ok(result)
    }

    /// Resolves a track to a streaming URL at the requested level.
    ///
    /// A track the account may not stream resolves successfully with
    /// `url: None`.
    ///
    /// # Errors
    ///
    /// * `Internal` if the request cannot be encoded
    /// * `Unauthenticated` if the catalog asks to log in
    /// * `InvalidArgument` if the response is not understood
    /// * any network error
    pub async fn resolve(&self, id: TrackId, level: Level) -> Result<ResolvedTrack> {
        let request_id = fastrand::u32(player::REQUEST_ID_RANGE);
        self.resolve_with(id, level, request_id).await
    }

    /// Like [`Catalog::resolve`], with a fixed correlation id.
    ///
    /// # Errors
    ///
    /// See [`Catalog::resolve`].
    pub async fn resolve_with(
        &self,
        id: TrackId,
        level: Level,
        request_id: u32,
    ) -> Result<ResolvedTrack> {
        let header = Header::desktop(&self.config.device_id, request_id);
        let payload = player::Request::new(id, level, header);
        let signed = eapi::sign(player::PATH, &payload)?;
        trace!("{}: {}", player::PATH, signed.payload);

        let response: player::Response = self
            .call(player::PATH, &[("params", signed.params)])
            .await?;

        let grant = response.data.into_iter().next().ok_or_else(|| {
            Error::invalid_argument(format!("{}: no data for track {id}", player::PATH))
        })?;
        if grant.id != id {
            warn!("requested track {id} but catalog answered for {}", grant.id);
        }

        let mut track = ResolvedTrack::from_grant(grant);
        if self.config.upgrade_http {
            track = track.upgraded();
        }
        if track.is_denied() {
            info!("track {id} is not available to this account");
        } else if track.level != level {
            info!(
                "track {id} is available in {} instead of {level}",
                track.level
            );
        }

        Ok(track)
    }

    /// Looks up the details of a track.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the catalog does not know the track.
    pub async fn detail(&self, id: TrackId) -> Result<detail::Song> {
        let response: detail::Response = self
            .call(detail::PATH, &[("c", detail::Request::form_value(id)?)])
            .await?;

        response
            .songs
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("track {id} not found")))
    }

    /// Looks up the lyrics of a track.
    ///
    /// # Errors
    ///
    /// Returns error if the call fails. A track without lyrics is not an
    /// error.
    pub async fn lyrics(&self, id: TrackId) -> Result<lyric::Response> {
        self.call(lyric::PATH, &lyric::form(id)).await
    }

    /// Looks up everything needed to tag a track.
    ///
    /// Lyrics are optional: failing to get them is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns error if the detail lookup fails.
    pub async fn metadata(&self, id: TrackId) -> Result<TrackMetadata> {
        let song = self.detail(id).await?;

        let lyrics = match self.lyrics(id).await {
            Ok(lyrics) => Some(lyrics),
            Err(e) => {
                warn!("no lyrics for track {id}: {e}");
                None
            }
        };

        let metadata = TrackMetadata::from_song(&song, lyrics.as_ref());
        Ok(if self.config.upgrade_http {
            metadata.upgraded()
        } else {
            metadata
        })
    }

    /// Whether `reference` is a short share link that must be followed to
    /// find the track id.
    #[must_use]
    pub fn is_short_link(reference: &str) -> bool {
        Url::parse(reference.trim())
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .is_some_and(|host| {
                Self::SHORT_LINK_HOSTS
                    .iter()
                    .any(|short| host == *short || host.ends_with(&format!(".{short}")))
            })
    }

    /// Turns a track reference into a track id.
    ///
    /// References are bare numbers, share URLs with an `id` parameter, or
    /// short links, which are followed to the URL they redirect to.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if no track id can be found.
    pub async fn track_id(&self, reference: &str) -> Result<TrackId> {
        if !Self::is_short_link(reference) {
            return reference.parse();
        }

        let url = Url::parse(reference.trim())?;
        let request = self.http_client.get(url);
        let response = self.http_client.execute(request).await?;
        let target = response.url().as_str();
        debug!("{} redirects to {target}", reference.trim());

        target.parse()
    }
}
