//! Quality tiers ("levels") of the catalog.
//!
//! The catalog names its tiers with short wire strings. Not every tier is
//! available for every track, and the catalog may grant a lower tier than
//! requested without saying so other than in the response.
//!
//! | Wire name | Meaning | Typical container |
//! |---|---|---|
//! | `standard` | 128 kbps | MP3 |
//! | `exhigh` | 320 kbps | MP3 |
//! | `lossless` | CD quality | FLAC |
//! | `hires` | high resolution | FLAC |
//! | `sky` | spatial (immersive) audio | FLAC |
//! | `jyeffect` | high resolution surround | FLAC |
//! | `jymaster` | studio master | FLAC |

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Quality tier as requested from and granted by the catalog.
///
/// Levels are ordered by fidelity, with [`Level::Unknown`] lowest.
#[derive(Copy, Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// 128 kbps MP3
    Standard,

    /// 320 kbps MP3
    #[serde(rename = "exhigh")]
    High,

    /// CD quality FLAC (default)
    #[default]
    Lossless,

    /// High resolution FLAC
    #[serde(rename = "hires")]
    HiRes,

    /// Spatial audio; requires an extra `immerseType` request field
    #[serde(rename = "sky")]
    Spatial,

    /// High resolution surround
    #[serde(rename = "jyeffect")]
    Surround,

    /// Studio master
    #[serde(rename = "jymaster")]
    Master,

    /// A tier this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl Level {
    /// All tiers that can be requested.
    pub const REQUESTABLE: [Level; 7] = [
        Level::Standard,
        Level::High,
        Level::Lossless,
        Level::HiRes,
        Level::Spatial,
        Level::Surround,
        Level::Master,
    ];

    /// The name of this tier on the wire.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Level::Unknown => "unknown",
            Level::Standard => "standard",
            Level::High => "exhigh",
            Level::Lossless => "lossless",
            Level::HiRes => "hires",
            Level::Spatial => "sky",
            Level::Surround => "jyeffect",
            Level::Master => "jymaster",
        }
    }

    /// The `immerseType` request field this tier needs, if any.
    ///
    /// Without it a spatial request silently yields a regular stream.
    #[must_use]
    pub fn immerse_type(self) -> Option<&'static str> {
        match self {
            Level::Spatial => Some("c51"),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Level::Unknown => 0,
            Level::Standard => 1,
            Level::High => 2,
            Level::Lossless => 3,
            Level::HiRes => 4,
            Level::Spatial => 5,
            Level::Surround => 6,
            Level::Master => 7,
        }
    }

    /// File extension to expect when the response does not tell.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Level::Unknown | Level::Standard | Level::High => "mp3",
            _ => "flac",
        }
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Unknown => write!(f, "Unknown"),
            Level::Standard => write!(f, "Standard"),
            Level::High => write!(f, "High Quality"),
            Level::Lossless => write!(f, "Lossless"),
            Level::HiRes => write!(f, "Hi-Res"),
            Level::Spatial => write!(f, "Spatial Audio"),
            Level::Surround => write!(f, "Hi-Res Surround"),
            Level::Master => write!(f, "Master"),
        }
    }
}

impl FromStr for Level {
    type Err = Error;

    /// Parses wire names as well as friendlier aliases, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let variant = match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Level::Standard,
            "exhigh" | "high" => Level::High,
            "lossless" => Level::Lossless,
            "hires" | "hi-res" => Level::HiRes,
            "sky" | "spatial" => Level::Spatial,
            "jyeffect" | "surround" | "hi-res-surround" => Level::Surround,
            "jymaster" | "master" => Level::Master,
            _ => return Err(Error::invalid_argument(format!("unknown quality level: {s}"))),
        };

        Ok(variant)
    }
}
