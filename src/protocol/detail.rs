//! Song details: title, artists, album and cover art.
//!
//! # Wire Format
//!
//! Request (form encoded): `c=[{"id":12345,"v":0}]`
//!
//! Response:
//! ```json
//! {
//!     "code": 200,
//!     "songs": [{
//!         "id": 12345,
//!         "name": "Title",
//!         "ar": [{"id": 1, "name": "Artist"}],
//!         "al": {"id": 2, "name": "Album", "picUrl": "http://p1.music.126.net/..."}
//!     }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{Error, Result},
    track::TrackId,
};

use super::{non_empty, Status};

/// Path of the plain detail endpoint.
pub const PATH: &str = "/api/v3/song/detail";

/// One entry of the `c` form field.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
pub struct Request {
    pub id: TrackId,
    pub v: u32,
}

impl Request {
    /// Serializes the `c` form field for a single track.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn form_value(id: TrackId) -> Result<String> {
        serde_json::to_string(&[Self { id, v: 0 }])
            .map_err(|e| Error::internal(format!("cannot encode detail request: {e}")))
    }
}

/// Response of the detail endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub code: i64,

    #[serde(default, deserialize_with = "non_empty")]
    pub message: Option<String>,

    #[serde(default)]
    pub songs: Vec<Song>,
}

impl Status for Response {
    fn code(&self) -> i64 {
        self.code
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Song {
    pub id: TrackId,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "ar")]
    pub artists: Vec<Artist>,

    #[serde(default, rename = "al")]
    pub album: Album,
}

impl Song {
    /// Artist names joined with `/`, skipping unnamed entries.
    #[must_use]
    pub fn artist(&self) -> String {
        self.artists
            .iter()
            .filter_map(|artist| artist.name.as_deref())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Artist {
    #[serde(default, deserialize_with = "non_empty")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Album {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "picUrl", deserialize_with = "non_empty")]
    pub pic_url: Option<String>,
}

impl Album {
    /// The cover URL, if present and valid.
    #[must_use]
    pub fn cover_url(&self) -> Option<Url> {
        self.pic_url.as_deref().and_then(|url| Url::parse(url).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_value_is_compact_array() {
        assert_eq!(
            Request::form_value(TrackId::new(12345)).unwrap(),
            r#"[{"id":12345,"v":0}]"#
        );
    }

    #[test]
    fn decodes_song_with_several_artists() {
        let response: Response = serde_json::from_str(
            r#"{"code":200,"songs":[{"id":7,"name":"晴天","ar":[{"id":1,"name":"周杰伦"},{"id":2,"name":"Guest"},{"id":3,"name":null}],"al":{"id":9,"name":"叶惠美","picUrl":"http://p1.music.126.net/x.jpg"}}],"privileges":[]}"#,
        )
        .unwrap();

        let song = &response.songs[0];
        assert_eq!(song.name, "晴天");
        assert_eq!(song.artist(), "周杰伦/Guest");
        assert_eq!(song.album.name.as_deref(), Some("叶惠美"));
        assert_eq!(
            song.album.cover_url().unwrap().as_str(),
            "http://p1.music.126.net/x.jpg"
        );
    }

    #[test]
    fn missing_album_and_cover_are_tolerated() {
        let response: Response =
            serde_json::from_str(r#"{"code":200,"songs":[{"id":7,"name":"x","ar":[],"al":{"picUrl":""}}]}"#)
                .unwrap();
        let song = &response.songs[0];
        assert!(song.album.cover_url().is_none());
        assert!(song.artist().is_empty());

        let response: Response = serde_json::from_str(r#"{"code":200,"songs":[]}"#).unwrap();
        assert!(response.songs.is_empty());
    }
}
