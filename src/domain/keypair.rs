//! Ed25519 signing identity.

use super::Pubkey;
use ed25519_dalek::{Signer as _, SigningKey};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeypairError {
    #[error("failed to read keypair file {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("keypair file is not a JSON byte array: {0}")]
    Format(String),
    #[error("expected 64 keypair bytes, got {0}")]
    WrongLength(usize),
    #[error("public key half does not match the secret key")]
    Mismatch,
}

/// Signing capability held by a client for its whole lifetime.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Build from a 32-byte ed25519 secret seed.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    /// Build from the 64-byte `secret || public` layout used by keypair files.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeypairError> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| KeypairError::WrongLength(bytes.len()))?;
        let signing = SigningKey::from_keypair_bytes(&arr).map_err(|_| KeypairError::Mismatch)?;
        Ok(Self { signing })
    }

    /// Load a JSON keypair file (`[u8; 64]` array).
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, KeypairError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| KeypairError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let bytes: Vec<u8> =
            serde_json::from_str(&content).map_err(|e| KeypairError::Format(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new(self.signing.verifying_key().to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.signing.to_keypair_bytes()
    }

    pub fn sign_message(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use std::io::Write;

    #[test]
    fn test_pubkey_from_secret() {
        let kp = Keypair::from_secret(&[7u8; 32]);
        assert_eq!(
            kp.pubkey().to_string(),
            "GmaDrppBC7P5ARKV8g3djiwP89vz1jLK23V2GBjuAEGB"
        );
    }

    #[test]
    fn test_keypair_bytes_roundtrip_and_mismatch() {
        let kp = Keypair::from_secret(&[7u8; 32]);
        let bytes = kp.to_bytes();
        assert_eq!(Keypair::from_bytes(&bytes).unwrap().pubkey(), kp.pubkey());

        let mut tampered = bytes;
        tampered[40] ^= 0xff;
        assert!(matches!(
            Keypair::from_bytes(&tampered),
            Err(KeypairError::Mismatch)
        ));
        assert!(matches!(
            Keypair::from_bytes(&bytes[..32]),
            Err(KeypairError::WrongLength(32))
        ));
    }

    #[test]
    fn test_signature_verifies() {
        let kp = Keypair::from_secret(&[3u8; 32]);
        let sig = kp.sign_message(b"message");
        let vk = VerifyingKey::from_bytes(kp.pubkey().as_bytes()).unwrap();
        assert!(vk.verify(b"message", &Signature::from_bytes(&sig)).is_ok());
    }

    #[test]
    fn test_read_from_file() {
        let kp = Keypair::from_secret(&[9u8; 32]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&kp.to_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = Keypair::read_from_file(file.path()).unwrap();
        assert_eq!(loaded.pubkey(), kp.pubkey());
    }

    #[test]
    fn test_read_from_missing_file() {
        let err = Keypair::read_from_file("/nonexistent/id.json").unwrap_err();
        assert!(matches!(err, KeypairError::Io { .. }));
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = Keypair::from_secret(&[7u8; 32]);
        let rendered = format!("{:?}", kp);
        assert!(rendered.contains("GmaDrppBC7P5ARKV8g3djiwP89vz1jLK23V2GBjuAEGB"));
        assert!(!rendered.contains("signing"));
    }
}
