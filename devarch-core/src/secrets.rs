use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Error, Result};

const SEALED_PREFIX: &str = "enc:v1:";
const PLACEHOLDER_PREFIX: &str = "${secret:";
const PLACEHOLDER_SUFFIX: &str = "}";

/// File-keyed AEAD boundary for secret env values at rest.
///
/// The key file holds 32 raw bytes (or their base64 encoding). Values are
/// sealed as `enc:v1:<base64(nonce || ciphertext)>`.
pub struct SecretsBox {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SecretsBox {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            Error::from(e).with_suggestion(format!(
                "create a 32-byte key file at {}",
                path.display()
            ))
        })?;
        let key_bytes = decode_key(&raw)?;
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| Error::internal("failed to construct AEAD key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::internal("rng failure while sealing secret"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut buf = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut buf)
            .map_err(|_| Error::internal("failed to seal secret"))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + buf.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&buf);
        Ok(format!("{}{}", SEALED_PREFIX, B64.encode(payload)))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let encoded = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| Error::validation("value is not a sealed secret"))?;
        let payload = B64
            .decode(encoded)
            .map_err(|e| Error::validation(format!("malformed sealed secret: {}", e)))?;
        if payload.len() < NONCE_LEN {
            return Err(Error::validation("sealed secret too short"));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| Error::validation("malformed secret nonce"))?;

        let mut buf = ciphertext.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| Error::validation("secret does not decrypt with the configured key"))?;
        String::from_utf8(plain.to_vec())
            .map_err(|_| Error::internal("decrypted secret is not valid utf-8"))
    }
}

fn decode_key(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() == 32 {
        return Ok(raw.to_vec());
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::validation("secrets key file must hold 32 bytes"))?
        .trim();
    if let Ok(decoded) = B64.decode(text) {
        if decoded.len() == 32 {
            return Ok(decoded);
        }
    }
    Err(Error::validation(
        "secrets key file must hold 32 raw bytes or their base64 encoding",
    ))
}

pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}

/// Export-time stand-in for a secret value.
pub fn placeholder(key: &str) -> String {
    format!("{}{}{}", PLACEHOLDER_PREFIX, key, PLACEHOLDER_SUFFIX)
}

/// Returns the secret key name when `value` is a `${secret:<key>}`
/// placeholder.
pub fn parse_placeholder(value: &str) -> Option<&str> {
    value
        .strip_prefix(PLACEHOLDER_PREFIX)?
        .strip_suffix(PLACEHOLDER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_box() -> SecretsBox {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, [7u8; 32]).unwrap();
        SecretsBox::load(&path).await.unwrap()
    }

    #[tokio::test]
    async fn seal_open_round_trip() {
        let sb = test_box().await;
        let sealed = sb.seal("hunter2").unwrap();
        assert!(is_sealed(&sealed));
        assert_ne!(sealed, "hunter2");
        assert_eq!(sb.open(&sealed).unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn open_rejects_tampered_payload() {
        let sb = test_box().await;
        let sealed = sb.seal("hunter2").unwrap();
        let mut broken = sealed.into_bytes();
        let last = broken.len() - 1;
        broken[last] = if broken[last] == b'A' { b'B' } else { b'A' };
        let broken = String::from_utf8(broken).unwrap();
        assert!(sb.open(&broken).is_err());
    }

    #[test]
    fn placeholder_round_trip() {
        let p = placeholder("DB_PASSWORD");
        assert_eq!(p, "${secret:DB_PASSWORD}");
        assert_eq!(parse_placeholder(&p), Some("DB_PASSWORD"));
        assert_eq!(parse_placeholder("plain"), None);
    }

    #[tokio::test]
    async fn key_file_accepts_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.b64");
        std::fs::write(&path, B64.encode([9u8; 32])).unwrap();
        let sb = SecretsBox::load(&path).await.unwrap();
        let sealed = sb.seal("x").unwrap();
        assert_eq!(sb.open(&sealed).unwrap(), "x");
    }
}
