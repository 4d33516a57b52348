//! Cryptographic helpers for payload decryption and artifact checksums
//!
//! Encrypted source payloads use AES-128-CBC with PKCS#5/7 padding and keys
//! carried as short text fields, so keys and IVs are normalised to exactly
//! 16 bytes before use. Spider artifacts are pinned by an MD5 or SHA-256 hex
//! digest depending on the digest length.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const AES_BLOCK_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key or IV length")]
    InvalidLength,

    #[error("Ciphertext is not a whole number of blocks ({0} bytes)")]
    Unaligned(usize),

    #[error("Bad padding after decryption")]
    BadPadding,
}

/// Right-pad `text` with ASCII `'0'` or truncate it so it is exactly 16 bytes
///
/// Operates on the UTF-8 bytes, so a multi-byte character may be split at the
/// truncation point. That matches how the keys are produced upstream.
pub fn pad_key(text: &str) -> [u8; AES_BLOCK_LEN] {
    let mut key = [b'0'; AES_BLOCK_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(AES_BLOCK_LEN);
    key[..len].copy_from_slice(&bytes[..len]);
    key
}

/// Decrypt AES-128-CBC ciphertext with PKCS#7 padding
///
/// # Arguments
/// * `key` - 16-byte key
/// * `iv` - 16-byte initialisation vector
/// * `ciphertext` - raw ciphertext, a multiple of the block size
pub fn aes128_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::Unaligned(ciphertext.len()));
    }

    let decryptor = Aes128CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidLength)?;

    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::BadPadding)
}

/// Lowercase hex MD5 digest of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Lowercase hex SHA-256 digest of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Expected digest of a pinned artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Md5(String),
    Sha256(String),
}

impl Checksum {
    /// Parse a hex digest, choosing the algorithm by its length
    ///
    /// Returns `None` for blank input or a digest of any other length.
    pub fn parse(hex_digest: &str) -> Option<Self> {
        let digest = hex_digest.trim().to_ascii_lowercase();
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        match digest.len() {
            32 => Some(Checksum::Md5(digest)),
            64 => Some(Checksum::Sha256(digest)),
            _ => None,
        }
    }

    pub fn expected(&self) -> &str {
        match self {
            Checksum::Md5(d) | Checksum::Sha256(d) => d,
        }
    }

    /// Digest of `data` using this checksum's algorithm
    pub fn compute(&self, data: &[u8]) -> String {
        match self {
            Checksum::Md5(_) => md5_hex(data),
            Checksum::Sha256(_) => sha256_hex(data),
        }
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        self.compute(data) == self.expected()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    pub(crate) fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    #[test]
    fn test_pad_key() {
        assert_eq!(&pad_key("abc"), b"abc0000000000000");
        assert_eq!(&pad_key("0123456789abcdefXYZ"), b"0123456789abcdef");
        assert_eq!(&pad_key(""), b"0000000000000000");
    }

    #[test]
    fn test_decrypt_roundtrip() {
        let key = pad_key("secret");
        let iv = pad_key("1234567890123");
        let ciphertext = encrypt(&key, &iv, "{\"sites\":[]}".as_bytes());

        let plain = aes128_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(plain, b"{\"sites\":[]}");
    }

    #[test]
    fn test_decrypt_rejects_unaligned() {
        let key = pad_key("k");
        assert_eq!(
            aes128_cbc_decrypt(&key, &key, &[1, 2, 3]),
            Err(CryptoError::Unaligned(3))
        );
    }

    #[test]
    fn test_decrypt_wrong_key_fails_or_garbles() {
        let key = pad_key("right");
        let iv = pad_key("iv");
        let ciphertext = encrypt(&key, &iv, b"hello world");

        let result = aes128_cbc_decrypt(&pad_key("wrong"), &iv, &ciphertext);
        assert_ne!(result, Ok(b"hello world".to_vec()));
    }

    #[test]
    fn test_checksum_algorithm_by_length() {
        let data = b"spider";
        let md5 = Checksum::parse(&md5_hex(data).to_uppercase()).unwrap();
        assert!(matches!(md5, Checksum::Md5(_)));
        assert!(md5.matches(data));

        let sha = Checksum::parse(&sha256_hex(data)).unwrap();
        assert!(matches!(sha, Checksum::Sha256(_)));
        assert!(sha.matches(data));
        assert!(!sha.matches(b"other"));

        assert!(Checksum::parse("").is_none());
        assert!(Checksum::parse("abc").is_none());
        assert!(Checksum::parse(&"z".repeat(32)).is_none());
    }

    #[test]
    fn test_md5_known_vector() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
