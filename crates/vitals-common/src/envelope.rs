//! Body envelopes shared by the HTTP sender and receiver: gzip compression,
//! HMAC-SHA-256 signing and RSA PKCS#1 v1.5 encryption.
//!
//! The sender applies transforms in the order compress-or-encrypt, then sign,
//! so the signature always covers the bytes on the wire. The receiver must
//! verify before decrypting or decompressing to stay symmetric.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::io::{Read, Write};
use std::path::Path;

/// Request header carrying the base64 (unpadded) HMAC-SHA-256 of the body.
pub const HASH_HEADER: &str = "HashSHA256";
/// Request header marking an RSA-encrypted body.
pub const ENCRYPTION_HEADER: &str = "X-Encrypted";
/// Value of [`ENCRYPTION_HEADER`] for the only supported scheme.
pub const ENCRYPTION_SCHEME: &str = "rsa";
/// Request header carrying the sender's outbound IPv4 address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// PKCS#1 v1.5 padding overhead in bytes.
const RSA_PADDING_OVERHEAD: usize = 11;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("gzip error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid key format: {0}")]
    KeyFormat(String),

    #[error("payload of {len} bytes exceeds RSA limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("rsa error: {0}")]
    Crypto(#[from] rsa::Error),
}

pub fn compress(body: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

pub fn decompress(body: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Computes the `HashSHA256` header value for a body.
pub fn sign(key: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(body);
    STANDARD_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Verifies a `HashSHA256` header value against a body in constant time.
pub fn verify(key: &[u8], body: &[u8], header: &str) -> bool {
    let Ok(sum) = STANDARD_NO_PAD.decode(header) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&sum).is_ok()
}

pub fn load_public_key(path: &Path) -> Result<RsaPublicKey, EnvelopeError> {
    let pem = std::fs::read_to_string(path).map_err(|source| EnvelopeError::KeyFile {
        path: path.display().to_string(),
        source,
    })?;

    RsaPublicKey::from_public_key_pem(&pem).map_err(|e| EnvelopeError::KeyFormat(e.to_string()))
}

pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, EnvelopeError> {
    let pem = std::fs::read_to_string(path).map_err(|source| EnvelopeError::KeyFile {
        path: path.display().to_string(),
        source,
    })?;

    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| EnvelopeError::KeyFormat(e.to_string()))
}

pub fn encrypt(key: &RsaPublicKey, body: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let max = key.size() - RSA_PADDING_OVERHEAD;
    if body.len() > max {
        return Err(EnvelopeError::PayloadTooLarge {
            len: body.len(),
            max,
        });
    }

    let mut rng = rand::thread_rng();
    Ok(key.encrypt(&mut rng, Pkcs1v15Encrypt, body)?)
}

pub fn decrypt(key: &RsaPrivateKey, body: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    Ok(key.decrypt(Pkcs1v15Encrypt, body)?)
}
