//! Streaming URL lookup through the encrypted player endpoint.
//!
//! The request is signed and encrypted by [`crate::eapi`] before posting;
//! this module only describes its JSON payload and the decoded response.
//!
//! # Wire Format
//!
//! Request payload (before encryption):
//! ```json
//! {
//!     "ids": ["12345"],
//!     "level": "lossless",
//!     "encodeType": "flac",
//!     "header": "{\"os\":\"pc\",\"appver\":\"\",\"osver\":\"\",\"deviceId\":\"pyncm!\",\"requestId\":\"25000000\"}",
//!     "immerseType": "c51"
//! }
//! ```
//!
//! `header` is a JSON document serialized into a string. `immerseType` is
//! only present for spatial audio.
//!
//! Response:
//! ```json
//! {
//!     "code": 200,
//!     "data": [{
//!         "id": 12345,
//!         "url": "http://m801.music.126.net/...",
//!         "size": 31457280,
//!         "level": "lossless",
//!         "type": "flac",
//!         "encodeType": "flac"
//!     }]
//! }
//! ```
//!
//! A `null` URL means that the catalog denies streaming the track at any
//! level to this account.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_with::{json::JsonString, serde_as, DisplayFromStr};
use url::Url;

use crate::track::TrackId;

use super::{non_empty, Level, Status};

/// Path of the encrypted player endpoint.
pub const PATH: &str = "/eapi/song/enhance/player/url/v1";

/// Container requested from the catalog. The catalog transcodes lossy
/// tiers to MP3 regardless.
pub const ENCODE_TYPE: &str = "flac";

/// Range from which correlation ids are drawn.
pub const REQUEST_ID_RANGE: RangeInclusive<u32> = 20_000_000..=29_999_999;

/// Encrypted payload of the player endpoint.
#[serde_as]
#[derive(Clone, Debug, Serialize, PartialEq, Eq, Hash)]
pub struct Request {
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub ids: Vec<TrackId>,

    pub level: Level,

    #[serde(rename = "encodeType")]
    pub encode_type: String,

    #[serde_as(as = "JsonString")]
    pub header: Header,

    #[serde(rename = "immerseType")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immerse_type: Option<String>,
}

impl Request {
    /// Builds the payload for a single track.
    #[must_use]
    pub fn new(id: TrackId, level: Level, header: Header) -> Self {
        Self {
            ids: vec![id],
            level,
            encode_type: ENCODE_TYPE.to_owned(),
            header,
            immerse_type: level.immerse_type().map(str::to_owned),
        }
    }
}

/// Client description embedded in every encrypted request.
#[serde_as]
#[derive(Clone, Debug, Serialize, PartialEq, Eq, Hash)]
pub struct Header {
    pub os: String,
    pub appver: String,
    pub osver: String,

    #[serde(rename = "deviceId")]
    pub device_id: String,

    #[serde(rename = "requestId")]
    #[serde_as(as = "DisplayFromStr")]
    pub request_id: u32,
}

impl Header {
    /// Operating system the catalog expects from desktop clients.
    pub const OS: &'static str = "pc";

    /// Builds a desktop client header for `device_id`.
    #[must_use]
    pub fn desktop(device_id: &str, request_id: u32) -> Self {
        Self {
            os: Self::OS.to_owned(),
            appver: String::new(),
            osver: String::new(),
            device_id: device_id.to_owned(),
            request_id,
        }
    }
}

/// Response of the player endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub code: i64,

    #[serde(default, deserialize_with = "non_empty")]
    pub message: Option<String>,

    #[serde(default)]
    pub data: Vec<Data>,
}

impl Status for Response {
    fn code(&self) -> i64 {
        self.code
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Streaming grant for one track.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Data {
    pub id: TrackId,

    #[serde(default)]
    pub url: Option<Url>,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub level: Option<Level>,

    /// Container of the stream as reported by the catalog, e.g. `flac`.
    #[serde(default, rename = "type", deserialize_with = "non_empty")]
    pub encoding: Option<String>,

    #[serde(default, rename = "encodeType", deserialize_with = "non_empty")]
    pub encode_type: Option<String>,

    /// Bit rate in bits per second.
    #[serde(default)]
    pub br: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eapi;

    fn request(level: Level) -> Request {
        Request::new(TrackId::new(12345), level, Header::desktop("pyncm!", 25_000_000))
    }

    #[test]
    fn payload_field_order_and_header_string() {
        let signed = eapi::sign(PATH, &request(Level::Lossless)).unwrap();

        assert_eq!(
            signed.payload,
            r#"{"ids":["12345"],"level":"lossless","encodeType":"flac","header":"{\"os\":\"pc\",\"appver\":\"\",\"osver\":\"\",\"deviceId\":\"pyncm!\",\"requestId\":\"25000000\"}"}"#
        );
        assert_eq!(signed.digest, "820354368488c408f15d8f46de8354c1");
        assert_eq!(
            signed.params,
            "fa90b329e9614f79e79598f37dc2edb487f00d1bc4c9b24cd57e6c318b907356\
             9338432cd7d98d1a3626e997a2c531213e7d76e095f5c5eb0553fa73c199eb83\
             b27212c5dc2167a55fc55d6b4b0f0fe1c0e6eb1f8d8b631a9cf98f8b260413bc\
             21874c123f71e6bf2d12341572e5ae8ff1f8fefedd860826cf84cd1e9de81b6d\
             55b53f542953730ba88deb13abbeab08d3cf48f6bcc071f219a920eec311bc04\
             42fa5124294f3478ea2474090dbd8545f2939ec19afe0e3d445c1893cf5781a0\
             3efa8b36e5358c08dba797dd4e9cba2a8631bf2dc3c432213bcbf4af796a9761\
             0780d1c952bef4dc8284fef36014836516a18a2ee7132aa227b04ddd1d2be790"
        );
    }

    #[test]
    fn spatial_adds_immerse_type() {
        let json = serde_json::to_string(&request(Level::Spatial)).unwrap();
        assert!(json.contains(r#""level":"sky""#));
        assert!(json.ends_with(r#","immerseType":"c51"}"#));

        let json = serde_json::to_string(&request(Level::HiRes)).unwrap();
        assert!(!json.contains("immerseType"));
    }

    #[test]
    fn denied_track_has_null_url() {
        let response: Response = serde_json::from_str(
            r#"{"code":200,"data":[{"id":12345,"url":null,"size":0,"level":null,"type":null,"br":0}]}"#,
        )
        .unwrap();

        let data = &response.data[0];
        assert_eq!(data.id, TrackId::new(12345));
        assert!(data.url.is_none());
        assert!(data.level.is_none());
        assert!(data.encoding.is_none());
    }

    #[test]
    fn granted_track_decodes() {
        let response: Response = serde_json::from_str(
            r#"{"code":200,"data":[{"id":1,"url":"http://m801.music.126.net/a/b.flac","size":31457280,"level":"hires","type":"FLAC","encodeType":"flac","br":1999000,"md5":"x"}]}"#,
        )
        .unwrap();

        let data = &response.data[0];
        assert_eq!(data.url.as_ref().unwrap().scheme(), "http");
        assert_eq!(data.size, 31_457_280);
        assert_eq!(data.level, Some(Level::HiRes));
        assert_eq!(data.encoding.as_deref(), Some("FLAC"));
    }
}
