//! Original and translated lyrics in LRC format.
//!
//! # Wire Format
//!
//! Request (form encoded):
//! `id=12345&cp=false&tv=0&lv=0&rv=0&kv=0&yv=0&ytv=0&yrv=0`
//!
//! Response:
//! ```json
//! {
//!     "code": 200,
//!     "lrc": {"version": 3, "lyric": "[00:00.00] ..."},
//!     "tlyric": {"version": 1, "lyric": ""}
//! }
//! ```
//!
//! Instrumentals carry `"nolyric": true` and no `lrc` object at all.

use serde::Deserialize;

use crate::track::TrackId;

use super::{non_empty, Status};

/// Path of the plain lyric endpoint.
pub const PATH: &str = "/api/song/lyric";

/// Form fields of a lyric request.
#[must_use]
pub fn form(id: TrackId) -> Vec<(&'static str, String)> {
    let mut fields = vec![("id", id.to_string()), ("cp", "false".to_owned())];
    fields.extend(
        ["tv", "lv", "rv", "kv", "yv", "ytv", "yrv"]
            .into_iter()
            .map(|version| (version, "0".to_owned())),
    );
    fields
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub code: i64,

    #[serde(default)]
    pub lrc: Option<Lyric>,

    #[serde(default)]
    pub tlyric: Option<Lyric>,
}

impl Response {
    /// Original lyrics, unless absent or blank.
    #[must_use]
    pub fn lyrics(&self) -> Option<&str> {
        self.lrc.as_ref().and_then(|lrc| lrc.lyric.as_deref())
    }

    /// Translated lyrics, unless absent or blank.
    #[must_use]
    pub fn translated(&self) -> Option<&str> {
        self.tlyric.as_ref().and_then(|lrc| lrc.lyric.as_deref())
    }
}

impl Status for Response {
    fn code(&self) -> i64 {
        self.code
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Lyric {
    #[serde(default, deserialize_with = "non_empty")]
    pub lyric: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_pins_all_versions_to_zero() {
        let form = form(TrackId::new(42));
        assert_eq!(form[0], ("id", "42".to_owned()));
        assert_eq!(form[1], ("cp", "false".to_owned()));
        assert_eq!(form.len(), 9);
        assert!(form[2..].iter().all(|(_, value)| value == "0"));
    }

    #[test]
    fn blank_lyrics_become_none() {
        let response: Response = serde_json::from_str(
            r#"{"code":200,"lrc":{"version":3,"lyric":"[00:01.00]hello"},"tlyric":{"version":0,"lyric":""}}"#,
        )
        .unwrap();
        assert_eq!(response.lyrics(), Some("[00:01.00]hello"));
        assert_eq!(response.translated(), None);
    }

    #[test]
    fn instrumental_has_no_lyrics() {
        let response: Response =
            serde_json::from_str(r#"{"code":200,"nolyric":true,"sgc":false}"#).unwrap();
        assert!(response.lyrics().is_none());
        assert!(response.translated().is_none());
    }
}
