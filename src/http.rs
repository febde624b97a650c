//! Rate limited HTTP client shared by catalog calls and downloads.
//!
//! Each [`Client`] throttles itself to 25 requests per 5 seconds, bursting
//! up to the full quota. Requests beyond it wait for the limiter instead of
//! failing. The catalog and the CDN get separate clients, so downloads never
//! hold up catalog calls and the other way around.
//!
//! The catalog client carries the session cookies; the CDN client carries
//! none.
//!
//! # Example
//!
//! ```rust
//! use ncmfetch::http::Client;
//!
//! let client = Client::with_cookies(&config, cookie_jar)?;
//! let request = client.post_form(url, &[("params", params)]);
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    cookie::Jar,
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method, Url,
};

use crate::{config::Config, error::Result};

pub struct Client {
    inner: reqwest::Client,
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Window in which at most [`Self::CALLS_PER_INTERVAL`] requests start.
    const INTERVAL: Duration = Duration::from_secs(5);

    const CALLS_PER_INTERVAL: u32 = 25;

    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Longest stall between two reads. Bounds hangs, not transfer time:
    /// a large download may take much longer as long as data flows.
    const READ_TIMEOUT: Duration = Duration::from_secs(30);

    const FORM_CONTENT: HeaderValue =
        HeaderValue::from_static("application/x-www-form-urlencoded");

    /// Creates a client that stores and sends cookies from `cookie_jar`.
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialized.
    pub fn with_cookies(config: &Config, cookie_jar: Jar) -> Result<Self> {
        Self::build(config, Some(Arc::new(cookie_jar)))
    }

    /// Creates a client that neither stores nor sends cookies.
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialized.
    pub fn without_cookies(config: &Config) -> Result<Self> {
        Self::build(config, None)
    }

    fn build(config: &Config, cookie_jar: Option<Arc<Jar>>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let mut builder = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);
        if let Some(jar) = cookie_jar {
            builder = builder.cookie_provider(jar);
        }

        Ok(Self {
            inner: builder.build()?,
            rate_limiter: governor::RateLimiter::direct(Self::quota()),
        })
    }

    fn quota() -> Quota {
        let replenish_interval = Self::INTERVAL / Self::CALLS_PER_INTERVAL;
        Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(NonZeroU32::new(Self::CALLS_PER_INTERVAL).expect("calls per interval is zero"))
    }

    /// Builds a POST request with a URL encoded form body.
    #[must_use]
    pub fn post_form<K, V>(&self, url: Url, fields: &[(K, V)]) -> reqwest::Request
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
            .finish();

        let mut request = reqwest::Request::new(Method::POST, url);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, Self::FORM_CONTENT);
        *request.body_mut() = Some(body.into());
        request
    }

    #[must_use]
    pub fn get(&self, url: Url) -> reqwest::Request {
        reqwest::Request::new(Method::GET, url)
    }

    /// Sends `request` once the rate limiter allows it.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or no response arrives.
    /// HTTP error statuses are left to the caller.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        self.rate_limiter
            .until_ready()
            .then(|()| self.inner.execute(request).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Body;

    #[tokio::test]
    async fn form_posts_are_url_encoded() {
        let client = Client::without_cookies(&Config::default()).unwrap();
        let url: Url = "https://example.com/api/song/lyric".parse().unwrap();

        let request = client.post_form(url, &[("id", "1"), ("c", "[{\"id\":1}]")]);
        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );

        let body = request.body().and_then(Body::as_bytes).unwrap();
        assert_eq!(body, b"id=1&c=%5B%7B%22id%22%3A1%7D%5D");
    }

    #[tokio::test]
    async fn get_has_no_body() {
        let client = Client::without_cookies(&Config::default()).unwrap();
        let request = client.get("https://example.com/a.flac".parse().unwrap());
        assert_eq!(request.method(), Method::GET);
        assert!(request.body().is_none());
    }
}
