//! Payload hidden behind the pixel data of a BMP file
//!
//! Some sources distribute their config as an image: a valid bitmap whose
//! file is longer than its declared pixel region. Everything after the
//! pixel region is the payload.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use thiserror::Error;

/// Size of BITMAPFILEHEADER + BITMAPINFOHEADER
pub const HEADER_LEN: usize = 54;

/// Base64 engine that accepts input with or without trailing padding
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitmapError {
    #[error("file too short for a bitmap header ({0} bytes)")]
    TooShort(usize),

    #[error("invalid bitmap geometry: {0}")]
    InvalidGeometry(String),

    #[error("no payload after pixel data (pixel data ends at {end}, file is {len} bytes)")]
    NoPayload { end: usize, len: usize },
}

pub fn is_bitmap(bytes: &[u8]) -> bool {
    bytes.len() > 2 && bytes.starts_with(b"BM")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapHeader {
    pub pixel_offset: u32,
    pub width: i32,
    pub height: i32,
    pub bits_per_pixel: u16,
}

impl BitmapHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, BitmapError> {
        if bytes.len() < HEADER_LEN {
            return Err(BitmapError::TooShort(bytes.len()));
        }

        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        Ok(Self {
            pixel_offset: u32_at(10),
            width: u32_at(18) as i32,
            height: u32_at(22) as i32,
            bits_per_pixel: u16::from_le_bytes([bytes[28], bytes[29]]),
        })
    }

    /// Bytes per pixel row, padded to a 4-byte boundary
    pub fn row_size(&self) -> Result<usize, BitmapError> {
        if self.width <= 0 {
            return Err(BitmapError::InvalidGeometry(format!("width {}", self.width)));
        }
        if self.bits_per_pixel == 0 {
            return Err(BitmapError::InvalidGeometry("bits per pixel is 0".to_string()));
        }

        let bits = u64::from(self.bits_per_pixel) * self.width as u64;
        usize::try_from((bits + 31) / 32 * 4)
            .map_err(|_| BitmapError::InvalidGeometry("row size overflows".to_string()))
    }

    /// File offset at which the declared pixel data ends
    pub fn pixel_data_end(&self) -> Result<usize, BitmapError> {
        let rows = self.height.unsigned_abs() as usize;
        self.row_size()?
            .checked_mul(rows)
            .and_then(|size| size.checked_add(self.pixel_offset as usize))
            .ok_or_else(|| BitmapError::InvalidGeometry("pixel data size overflows".to_string()))
    }
}

/// Bytes stored after the declared pixel region
pub fn hidden_slice(bytes: &[u8]) -> Result<&[u8], BitmapError> {
    let header = BitmapHeader::parse(bytes)?;
    let end = header.pixel_data_end()?;

    tracing::debug!(
        width = header.width,
        height = header.height,
        bpp = header.bits_per_pixel,
        offset = header.pixel_offset,
        pixel_data_end = end,
        file_len = bytes.len(),
        "Parsed bitmap header"
    );

    if end >= bytes.len() {
        return Err(BitmapError::NoPayload { end, len: bytes.len() });
    }
    Ok(&bytes[end..])
}

/// Recover the hidden text of a bitmap container
///
/// The slice is read as UTF-8 text, then as Base64 over its Latin-1 form, and
/// finally returned as plain Latin-1 when neither yields non-blank text.
pub fn extract_payload(bytes: &[u8]) -> Result<String, BitmapError> {
    let hidden = hidden_slice(bytes)?;

    if let Ok(text) = std::str::from_utf8(hidden) {
        let text = text.trim();
        if !text.is_empty() {
            return Ok(text.to_string());
        }
    }

    let latin1 = latin1(hidden);
    let compact: String = latin1.chars().filter(|c| !c.is_whitespace()).collect();
    if let Ok(decoded) = LENIENT_BASE64.decode(compact.as_bytes()) {
        let text = String::from_utf8_lossy(&decoded);
        let text = text.trim();
        if !text.is_empty() {
            return Ok(text.to_string());
        }
    }

    Ok(latin1.trim().to_string())
}

/// ISO-8859-1 view of raw bytes
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
