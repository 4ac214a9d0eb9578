//! Narinfo signatures and Nix public keys
//!
//! Both use the `<key name>:<base64 bytes>` form. Signatures are Ed25519 over
//! the narinfo fingerprint (see [`crate::NarInfo::fingerprint`]).

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from key and signature decoding
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("expected `<name>:<base64>`, got {0:?}")]
    Malformed(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// One `Sig:` entry of a narinfo, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Wrap a raw `name:base64` signature string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key name: everything before the first `:` (the whole string if absent).
    pub fn key_name(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// Decoded signature bytes.
    pub fn bytes(&self) -> Result<Vec<u8>, SignatureError> {
        let (_, encoded) = self
            .0
            .split_once(':')
            .ok_or_else(|| SignatureError::Malformed(self.0.clone()))?;
        Ok(STANDARD.decode(encoded)?)
    }

    /// Raw `name:base64` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A Nix binary cache public key (`cache.example.org-1:<base64 ed25519 key>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    name: String,
    key: VerifyingKey,
}

impl PublicKey {
    /// Key name as it appears in signatures.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check `signature` over `fingerprint`.
    ///
    /// Returns false when the signature belongs to another key name or its
    /// bytes do not decode; only a cryptographically valid match is true.
    pub fn verify(&self, fingerprint: &str, signature: &Signature) -> bool {
        if signature.key_name() != self.name {
            return false;
        }

        let Ok(bytes) = signature.bytes() else {
            return false;
        };
        let Ok(sig) = Ed25519Signature::from_slice(&bytes) else {
            return false;
        };

        self.key.verify(fingerprint.as_bytes(), &sig).is_ok()
    }
}

impl FromStr for PublicKey {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, encoded) = s
            .split_once(':')
            .filter(|(name, encoded)| !name.is_empty() && !encoded.is_empty())
            .ok_or_else(|| SignatureError::Malformed(s.to_string()))?;

        let bytes = STANDARD.decode(encoded)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| SignatureError::InvalidKey(format!("{} bytes, expected 32", b.len())))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair(name: &str, seed: u8) -> (SigningKey, PublicKey) {
        let signing = SigningKey::from_bytes(&[seed; 32]);
        let public = format!(
            "{}:{}",
            name,
            STANDARD.encode(signing.verifying_key().to_bytes())
        );
        (signing, public.parse().unwrap())
    }

    fn sign(name: &str, key: &SigningKey, fingerprint: &str) -> Signature {
        let sig = key.sign(fingerprint.as_bytes());
        Signature::new(format!("{}:{}", name, STANDARD.encode(sig.to_bytes())))
    }

    #[test]
    fn test_key_name_prefix() {
        assert_eq!(Signature::new("keyA:c2ln").key_name(), "keyA");
        assert_eq!(Signature::new("a:b:c").key_name(), "a");
        assert_eq!(Signature::new("bare").key_name(), "bare");
    }

    #[test]
    fn test_valid_signature_verifies() {
        let (signing, public) = keypair("cache-1", 7);
        let sig = sign("cache-1", &signing, "1;/nix/store/a-b;sha256:x;10;");
        assert!(public.verify("1;/nix/store/a-b;sha256:x;10;", &sig));
    }

    #[test]
    fn test_tampered_fingerprint_fails() {
        let (signing, public) = keypair("cache-1", 7);
        let sig = sign("cache-1", &signing, "1;/nix/store/a-b;sha256:x;10;");
        assert!(!public.verify("1;/nix/store/a-b;sha256:y;10;", &sig));
    }

    #[test]
    fn test_other_key_name_does_not_verify() {
        let (signing, public) = keypair("cache-1", 7);
        let sig = sign("cache-2", &signing, "fp");
        assert!(!public.verify("fp", &sig));
    }

    #[test]
    fn test_garbage_signature_bytes() {
        let (_, public) = keypair("cache-1", 7);
        assert!(!public.verify("fp", &Signature::new("cache-1:!!!")));
        assert!(!public.verify("fp", &Signature::new("cache-1:c2ln")));
    }

    #[test]
    fn test_public_key_parse_errors() {
        assert!("no-colon".parse::<PublicKey>().is_err());
        assert!("name:".parse::<PublicKey>().is_err());
        assert!(matches!(
            "name:c2hvcnQ=".parse::<PublicKey>(),
            Err(SignatureError::InvalidKey(_))
        ));
    }
}
