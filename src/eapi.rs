//! Request signing for the catalog's encrypted API.
//!
//! Endpoints below `/eapi/` do not accept plain form fields. Instead the
//! request body carries one field, `params`, holding an encrypted envelope
//! around the JSON payload:
//!
//! 1. The path is rewritten from `/eapi/...` to `/api/...`. The rewritten
//!    path is only used inside the envelope; the request itself is still
//!    posted to the `/eapi/` path.
//! 2. An MD5 digest is taken over `nobody{path}use{json}md5forencrypt`.
//! 3. The envelope plaintext is `{path}-36cd479b6b5-{json}-36cd479b6b5-{digest}`.
//! 4. The plaintext is PKCS#7 padded and encrypted with AES-128 in ECB mode
//!    under a fixed key.
//! 5. The ciphertext is hex encoded.
//!
//! The key and separators are public protocol constants. They are not
//! secrets; a single changed byte makes the catalog reject the request with
//! an error code in an otherwise successful HTTP response.
//!
//! # Example
//!
//! ```rust
//! use ncmfetch::eapi;
//!
//! let signed = eapi::sign("/eapi/song/enhance/player/url/v1", &payload)?;
//! let body = [("params", signed.params.as_str())];
//! ```

use std::fmt::Write;

use aes::Aes128;
use ecb::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit};
use md5::{Digest, Md5};
use serde::Serialize;

use crate::error::{Error, Result};

/// Fixed AES-128 key of the protocol.
pub const KEY: &[u8; 16] = b"e82ckenh8dichen8";

/// Separator between the fields of the envelope plaintext.
pub const SEPARATOR: &str = "-36cd479b6b5-";

/// Prefix of encrypted API paths.
const EAPI_PREFIX: &str = "/eapi/";

/// Prefix that replaces [`EAPI_PREFIX`] inside the envelope.
const API_PREFIX: &str = "/api/";

type Encryptor = ecb::Encryptor<Aes128>;
type Decryptor = ecb::Decryptor<Aes128>;

/// A signed and encrypted request, ready to be posted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SignedRequest {
    /// Path as used inside the envelope, with `/api/` instead of `/eapi/`.
    pub path: String,

    /// The exact serialized JSON payload that was digested and encrypted.
    pub payload: String,

    /// Lowercase hex MD5 digest of the salted path and payload.
    pub digest: String,

    /// Lowercase hex ciphertext: the value of the `params` form field.
    pub params: String,
}

impl SignedRequest {
    /// The envelope plaintext this request was encrypted from.
    #[must_use]
    pub fn plaintext(&self) -> String {
        canonical(&self.path, &self.payload, &self.digest)
    }
}

/// Signs and encrypts `payload` for the encrypted API endpoint at `path`.
///
/// The payload is serialized with `serde_json` in its declared field order.
/// Use structs rather than maps to keep that order stable.
///
/// # Errors
///
/// Returns `Internal` if the payload cannot be serialized. This is a
/// defect, not a runtime condition, and is never retried.
pub fn sign<T>(path: &str, payload: &T) -> Result<SignedRequest>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string(payload)
        .map_err(|e| Error::internal(format!("cannot encode payload for {path}: {e}")))?;

    let path = api_path(path);
    let digest = digest(&path, &payload);
    let plaintext = canonical(&path, &payload, &digest);

    let ciphertext = Encryptor::new(KEY.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(SignedRequest {
        path,
        payload,
        digest,
        params: to_hex(&ciphertext),
    })
}

/// Decrypts a `params` value back into its envelope plaintext.
///
/// # Errors
///
/// Returns `InvalidArgument` if `params` is not valid hex, if the padding
/// is invalid or if the plaintext is not UTF-8.
pub fn open(params: &str) -> Result<String> {
    let ciphertext = from_hex(params)?;
    let plaintext = Decryptor::new(KEY.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| Error::invalid_argument(format!("cannot decrypt params: {e}")))?;

    String::from_utf8(plaintext).map_err(|e| Error::invalid_argument(e.to_string()))
}

/// The three fields of a decrypted envelope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Envelope {
    pub path: String,
    pub payload: String,
    pub digest: String,
}

impl Envelope {
    /// Splits an envelope plaintext into its fields.
    ///
    /// The payload may itself contain the separator, so the path is split
    /// off the front and the digest off the back.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either separator is missing.
    pub fn parse(plaintext: &str) -> Result<Self> {
        let malformed = || Error::invalid_argument("envelope is missing a separator");

        let (path, rest) = plaintext.split_once(SEPARATOR).ok_or_else(malformed)?;
        let (payload, digest) = rest.rsplit_once(SEPARATOR).ok_or_else(malformed)?;

        Ok(Self {
            path: path.to_owned(),
            payload: payload.to_owned(),
            digest: digest.to_owned(),
        })
    }

    /// Whether the digest matches the path and payload.
    #[must_use]
    pub fn verify(&self) -> bool {
        digest(&self.path, &self.payload) == self.digest
    }
}

/// Rewrites the first `/eapi/` segment of `path` to `/api/`.
#[must_use]
pub fn api_path(path: &str) -> String {
    path.replacen(EAPI_PREFIX, API_PREFIX, 1)
}

/// Computes the lowercase hex MD5 digest over the salted path and payload.
#[must_use]
pub fn digest(path: &str, payload: &str) -> String {
    format!(
        "{:x}",
        Md5::digest(format!("nobody{path}use{payload}md5forencrypt"))
    )
}

fn canonical(path: &str, payload: &str, digest: &str) -> String {
    format!("{path}{SEPARATOR}{payload}{SEPARATOR}{digest}")
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut hex, byte| {
            // Writing to a `String` cannot fail.
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

fn from_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(Error::invalid_argument("params is not a hex string"));
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(Into::into))
        .collect()
}
