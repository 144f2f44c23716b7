//! Encrypted, compressed encoding of a [`SessionRecord`] suitable for a cookie.
//!
//! Layout: `base64url(nonce || chacha20poly1305(zstd(bincode(envelope))))`.
//! The cipher key is a SHA-256 digest of the configured secret, and
//! every seal draws a fresh random nonce. The envelope records when the value
//! was issued so that stale cookies are rejected even if the browser keeps
//! sending them.

use crate::types::SessionRecord;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sessions and their cookies expire 358 minutes after being issued.
pub const DEFAULT_TTL: Duration = Duration::from_secs(358 * 60);

const COMPRESSION_LEVEL: i32 = 1;
const NONCE_LEN: usize = 12;
const KEY_CONTEXT: &[u8] = b"dashboard session cookie v1";
// Upper bound on the decompressed envelope; cookies are limited to ~4KiB.
const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("malformed session value")]
    Malformed,

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("session value failed authentication")]
    Unauthenticated,

    #[error("session expired")]
    Expired,

    #[error("system clock is before the unix epoch")]
    Clock,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    issued_at: u64,
    record: &'a SessionRecord,
}

#[derive(Deserialize)]
struct Envelope {
    issued_at: u64,
    record: SessionRecord,
}

pub struct SessionCodec {
    cipher: ChaCha20Poly1305,
    ttl: Duration,
    config: bincode::config::Configuration,
}

impl SessionCodec {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        SessionCodec {
            cipher: ChaCha20Poly1305::new(&derive_key(secret)),
            ttl,
            // standard defaults to little-endian + varint
            config: bincode::config::standard(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn seal(&self, record: &SessionRecord) -> Result<String, SessionError> {
        self.seal_at(record, SystemTime::now())
    }

    /// Seals `record` as if issued at `issued_at`. Re-sealing an existing
    /// session with its original issue time keeps its expiry unchanged.
    pub fn seal_at(&self, record: &SessionRecord, issued_at: SystemTime) -> Result<String, SessionError> {
        let envelope = EnvelopeRef {
            issued_at: unix_secs(issued_at)?,
            record,
        };
        let encoded = bincode::serde::encode_to_vec(&envelope, self.config)?;
        let payload = zstd::bulk::compress(&encoded, COMPRESSION_LEVEL)?;

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload.as_slice())
            .map_err(|_| SessionError::Unauthenticated)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    pub fn open(&self, value: &str) -> Result<SessionRecord, SessionError> {
        self.open_at(value, SystemTime::now())
    }

    pub fn open_at(&self, value: &str, now: SystemTime) -> Result<SessionRecord, SessionError> {
        self.open_with_issue_time_at(value, now).map(|(record, _)| record)
    }

    /// Opens `value` and also returns when it was first issued.
    pub fn open_with_issue_time(&self, value: &str) -> Result<(SessionRecord, SystemTime), SessionError> {
        self.open_with_issue_time_at(value, SystemTime::now())
    }

    pub fn open_with_issue_time_at(
        &self,
        value: &str,
        now: SystemTime,
    ) -> Result<(SessionRecord, SystemTime), SessionError> {
        let sealed = URL_SAFE_NO_PAD.decode(value)?;
        if sealed.len() <= NONCE_LEN {
            return Err(SessionError::Malformed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        // Authenticate before touching the payload with the decompressor.
        let payload = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SessionError::Unauthenticated)?;

        let decoded = zstd::bulk::decompress(&payload, MAX_DECOMPRESSED_SIZE)?;
        let (envelope, _): (Envelope, usize) =
            bincode::serde::decode_from_slice(&decoded, self.config)?;

        if unix_secs(now)?.saturating_sub(envelope.issued_at) > self.ttl.as_secs() {
            return Err(SessionError::Expired);
        }

        let issued_at = UNIX_EPOCH + Duration::from_secs(envelope.issued_at);
        Ok((envelope.record, issued_at))
    }

    /// Lifetime left at `now` for a session issued at `issued_at`.
    pub fn remaining(&self, issued_at: SystemTime, now: SystemTime) -> Duration {
        let age = now.duration_since(issued_at).unwrap_or_default();
        self.ttl.saturating_sub(age)
    }
}

fn derive_key(secret: &[u8]) -> chacha20poly1305::Key {
    Sha256::new()
        .chain_update(KEY_CONTEXT)
        .chain_update(secret)
        .finalize()
}

fn unix_secs(time: SystemTime) -> Result<u64, SessionError> {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| SessionError::Clock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Scope, ServerToken};
    use std::collections::BTreeSet;

    fn record() -> SessionRecord {
        SessionRecord {
            is_logged_in: true,
            username: "alice".into(),
            display_name: "Alice".into(),
            avatar_url: None,
            active_server_index: Some(0),
            tokens: vec![
                ServerToken {
                    name: "Zen4".into(),
                    description: "x86-64-v4 builders".into(),
                    url: "https://zen4.example.com".into(),
                    token: "tok-zen4".into(),
                    scopes: BTreeSet::from([Scope::Read, Scope::Write]),
                },
                ServerToken {
                    name: "Standard".into(),
                    description: "generic builders".into(),
                    url: "https://standard.example.com".into(),
                    ..Default::default()
                },
            ],
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    #[test]
    fn test_seal_and_open() {
        let codec = SessionCodec::new(b"0123456789abcdef0123456789abcdef", DEFAULT_TTL);
        let sealed = codec.seal(&record()).unwrap();

        assert!(!sealed.contains(';'));
        assert!(!sealed.contains(' '));
        assert_eq!(codec.open(&sealed).unwrap(), record());
    }

    #[test]
    fn test_tokens_are_not_readable_from_the_cookie() {
        let codec = SessionCodec::new(b"0123456789abcdef0123456789abcdef", DEFAULT_TTL);
        let sealed = codec.seal(&record()).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(&sealed).unwrap();

        assert!(!contains(&bytes, b"tok-zen4"));
        assert!(!contains(&bytes, b"alice"));
        // Neither the whole value nor the part after the nonce is a zstd frame.
        assert!(zstd::bulk::decompress(&bytes, MAX_DECOMPRESSED_SIZE).is_err());
        assert!(zstd::bulk::decompress(&bytes[NONCE_LEN..], MAX_DECOMPRESSED_SIZE).is_err());

        // A fresh nonce per seal.
        assert_ne!(codec.seal(&record()).unwrap(), sealed);
    }

    #[test]
    fn test_tampered_value_is_rejected() {
        let codec = SessionCodec::new(b"0123456789abcdef0123456789abcdef", DEFAULT_TTL);
        let sealed = codec.seal(&record()).unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[NONCE_LEN] ^= 0xff;
        let tampered = URL_SAFE_NO_PAD.encode(&bytes);
        assert!(matches!(
            codec.open(&tampered).unwrap_err(),
            SessionError::Unauthenticated
        ));

        bytes[NONCE_LEN] ^= 0xff;
        bytes[last] ^= 0x01;
        assert!(matches!(
            codec.open(&URL_SAFE_NO_PAD.encode(&bytes)).unwrap_err(),
            SessionError::Unauthenticated
        ));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let codec = SessionCodec::new(b"0123456789abcdef0123456789abcdef", DEFAULT_TTL);
        let other = SessionCodec::new(b"fedcba9876543210fedcba9876543210", DEFAULT_TTL);
        let sealed = codec.seal(&record()).unwrap();

        assert!(matches!(
            other.open(&sealed).unwrap_err(),
            SessionError::Unauthenticated
        ));
    }

    #[test]
    fn test_expiry() {
        let codec = SessionCodec::new(b"0123456789abcdef0123456789abcdef", DEFAULT_TTL);
        let issued = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let sealed = codec.seal_at(&record(), issued).unwrap();

        let just_before = issued + DEFAULT_TTL;
        assert!(codec.open_at(&sealed, just_before).is_ok());

        let after = issued + DEFAULT_TTL + Duration::from_secs(1);
        assert!(matches!(
            codec.open_at(&sealed, after).unwrap_err(),
            SessionError::Expired
        ));
    }

    #[test]
    fn test_malformed_values() {
        let codec = SessionCodec::new(b"0123456789abcdef0123456789abcdef", DEFAULT_TTL);
        assert!(matches!(
            codec.open("dG9vLXNob3J0").unwrap_err(),
            SessionError::Malformed
        ));
        assert!(matches!(
            codec.open("!!!.???").unwrap_err(),
            SessionError::Base64(_)
        ));
        assert!(matches!(
            codec.open("").unwrap_err(),
            SessionError::Malformed
        ));
    }
}
