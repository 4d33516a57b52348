//! Payload decoding
//!
//! Remote sources pick their own obfuscation. The decoder unwraps a bitmap
//! container if present, then walks an ordered table of text encodings and
//! applies the first whose predicate matches. Finally relative references in
//! the decoded text are rewritten against the source URL.

use crate::core::crypto::{aes128_cbc_decrypt, pad_key};
use crate::core::error::{DecodeError, DecodeStage};
use crate::core::url::fix_relative_refs;
use crate::source::bitmap::{self, LENIENT_BASE64};
use base64::Engine as _;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Eight alphanumerics followed by `**`, marking the start of a Base64 body
    static ref BASE64_MARKER_REGEX: Regex = Regex::new(r"[A-Za-z0-9]{8}\*\*").unwrap();
}

/// Hex of `$#`, the opening key delimiter of an encrypted payload
const CIPHER_MARKER: &str = "2423";
/// Hex of `#$`, after which the ciphertext starts
const CIPHERTEXT_MARKER: &str = "2324";
/// Hex length of the 13-byte IV trailer
const CIPHER_TRAILER_LEN: usize = 26;
const IV_CHARS: usize = 13;

/// Fully decoded, path-fixed content of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub text: String,
    pub original_url: String,
}

/// Text encodings recognised after any container has been unwrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    PrefixedBase64,
    AesCbcHex,
}

/// Result of a single decoding stage
#[derive(Debug)]
enum Outcome {
    Decoded(String),
    FallThrough,
}

struct Stage {
    encoding: Encoding,
    applies: fn(&str) -> bool,
    decode: fn(&str, &str) -> Result<Outcome, DecodeError>,
}

/// Ordered decoding table: the first stage that applies and decodes wins
const STAGES: &[Stage] = &[
    Stage {
        encoding: Encoding::Plain,
        applies: is_json_container,
        decode: decode_plain,
    },
    Stage {
        encoding: Encoding::PrefixedBase64,
        applies: has_base64_marker,
        decode: decode_prefixed_base64,
    },
    Stage {
        encoding: Encoding::AesCbcHex,
        applies: has_cipher_marker,
        decode: decode_cbc,
    },
];

/// Stateless decoder for fetched source payloads
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadDecoder;

impl PayloadDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `raw` fetched from `source_url`
    ///
    /// # Arguments
    /// * `raw` - the response body exactly as fetched
    /// * `source_url` - URL the body came from, used to resolve relative references
    ///
    /// # Returns
    /// The decoded text, or the stage at which a branch that applied failed
    pub fn decode(&self, raw: &[u8], source_url: &str) -> Result<DecodedPayload, DecodeError> {
        let text = if bitmap::is_bitmap(raw) {
            let hidden = bitmap::extract_payload(raw)
                .map_err(|e| DecodeError::new(source_url, DecodeStage::Bitmap, e.to_string()))?;
            tracing::debug!(url = %source_url, len = hidden.len(), "Extracted payload from bitmap");
            hidden
        } else {
            bytes_to_text(raw)
        };

        if text.is_empty() {
            return Err(DecodeError::new(source_url, DecodeStage::Empty, "payload is empty"));
        }

        let (encoding, decoded) = decode_text(&text, source_url)?;
        tracing::debug!(url = %source_url, encoding = ?encoding, "Decoded payload");

        Ok(DecodedPayload {
            text: fix_relative_refs(source_url, &decoded),
            original_url: source_url.to_string(),
        })
    }
}

/// Run `text` through the stage table
///
/// Returns `None` as the encoding when no stage decoded the text and it is
/// passed through unchanged.
pub fn decode_text(text: &str, source_url: &str) -> Result<(Option<Encoding>, String), DecodeError> {
    for stage in STAGES {
        if !(stage.applies)(text) {
            continue;
        }
        match (stage.decode)(text, source_url)? {
            Outcome::Decoded(decoded) => return Ok((Some(stage.encoding), decoded)),
            Outcome::FallThrough => {
                tracing::trace!(url = %source_url, encoding = ?stage.encoding, "Stage fell through");
            }
        }
    }
    Ok((None, text.to_string()))
}

/// UTF-8 text, or Latin-1 when the bytes are not valid UTF-8, trimmed
fn bytes_to_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.trim().to_string(),
        Err(_) => bitmap::latin1(raw).trim().to_string(),
    }
}

fn is_json_container(text: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(text),
        Ok(serde_json::Value::Object(_)) | Ok(serde_json::Value::Array(_))
    )
}

fn has_base64_marker(text: &str) -> bool {
    text.contains("**")
}

fn has_cipher_marker(text: &str) -> bool {
    text.starts_with(CIPHER_MARKER)
}

fn decode_plain(text: &str, _source_url: &str) -> Result<Outcome, DecodeError> {
    Ok(Outcome::Decoded(text.to_string()))
}

fn decode_prefixed_base64(text: &str, _source_url: &str) -> Result<Outcome, DecodeError> {
    let Some(marker) = BASE64_MARKER_REGEX.find(text) else {
        return Ok(Outcome::FallThrough);
    };

    let start = marker.start() + 10;
    if start >= text.len() {
        return Ok(Outcome::FallThrough);
    }

    let body: String = text[start..].chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = match LENIENT_BASE64.decode(body.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "Prefixed Base64 body did not decode");
            return Ok(Outcome::FallThrough);
        }
    };

    if decoded.is_empty() || decoded == text {
        return Ok(Outcome::FallThrough);
    }
    Ok(Outcome::Decoded(decoded))
}

/// Decrypt an AES-128-CBC payload carried as hex
///
/// Layout, as hex: `$#` key `#$` ciphertext iv, where the IV is the last 13
/// characters. Key and IV are read from the lowercased text form of the
/// whole blob and padded with `'0'` to 16 bytes.
fn decode_cbc(text: &str, source_url: &str) -> Result<Outcome, DecodeError> {
    let cipher_err = |reason: &str| DecodeError::new(source_url, DecodeStage::Cipher, reason);
    let hex_err = |e: hex::FromHexError| DecodeError::new(source_url, DecodeStage::Hex, e.to_string());

    let blob = hex::decode(text).map_err(hex_err)?;
    let blob = String::from_utf8_lossy(&blob).to_lowercase();

    let key_start = blob.find("$#").map(|i| i + 2).ok_or_else(|| cipher_err("key start marker not found"))?;
    let key_end = blob.find("#$").ok_or_else(|| cipher_err("key end marker not found"))?;
    if key_end <= key_start {
        return Err(cipher_err("key markers out of order"));
    }

    let iv: String = {
        let chars: Vec<char> = blob.chars().collect();
        if chars.len() < IV_CHARS {
            return Err(cipher_err("payload too short for IV"));
        }
        chars[chars.len() - IV_CHARS..].iter().collect()
    };

    let key = pad_key(&blob[key_start..key_end]);
    let iv = pad_key(&iv);

    let data_start = text
        .find(CIPHERTEXT_MARKER)
        .map(|i| i + CIPHERTEXT_MARKER.len())
        .ok_or_else(|| cipher_err("ciphertext marker not found"))?;
    let data_end = text
        .len()
        .checked_sub(CIPHER_TRAILER_LEN)
        .filter(|end| *end > data_start)
        .ok_or_else(|| cipher_err("no ciphertext between marker and trailer"))?;

    let ciphertext = hex::decode(&text[data_start..data_end]).map_err(hex_err)?;
    let plain = aes128_cbc_decrypt(&key, &iv, &ciphertext).map_err(|e| cipher_err(&e.to_string()))?;

    String::from_utf8(plain)
        .map(Outcome::Decoded)
        .map_err(|e| DecodeError::new(source_url, DecodeStage::Text, e.to_string()))
}
