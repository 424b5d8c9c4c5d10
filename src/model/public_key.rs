use std::fmt;

use sha2::{Digest, Sha256};

use super::{KeyAlgorithm, KeySpec};

/// Public half of a key pair held by a crypto token
#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519([u8; 32]),
    /// SEC1 uncompressed point
    Secp256r1(Vec<u8>),
}

impl PublicKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.key_spec().algorithm()
    }

    /// Rebuilds a key from its encoding; `None` when the bytes are not a valid key
    pub fn from_encoded(algorithm: KeyAlgorithm, bytes: &[u8]) -> Option<Self> {
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                let bytes = <[u8; 32]>::try_from(bytes).ok()?;
                ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .ok()
                    .map(PublicKey::from)
            }
            KeyAlgorithm::Ecdsa => p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                .ok()
                .map(|key| PublicKey::from(&key)),
            KeyAlgorithm::Rsa => None,
        }
    }

    pub fn key_spec(&self) -> KeySpec {
        match self {
            PublicKey::Ed25519(_) => KeySpec::Ed25519,
            PublicKey::Secp256r1(_) => KeySpec::Secp256r1,
        }
    }

    pub fn key_specification(&self) -> String {
        self.key_spec().canonical()
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PublicKey::Ed25519(bytes) => bytes,
            PublicKey::Secp256r1(bytes) => bytes,
        }
    }

    /// Leftmost 160 bits of SHA-256 over the encoded key (RFC 7093, method 1), hex encoded
    pub fn subject_key_id(&self) -> String {
        let digest = Sha256::digest(self.as_bytes());
        hex::encode(&digest[..20])
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(bytes) => {
                let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(bytes) else {
                    return false;
                };
                let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify_strict(data, &signature).is_ok()
            }
            PublicKey::Secp256r1(bytes) => {
                use p256::ecdsa::signature::Verifier;

                let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes) else {
                    return false;
                };
                let Ok(signature) = p256::ecdsa::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify(data, &signature).is_ok()
            }
        }
    }
}

impl From<ed25519_dalek::VerifyingKey> for PublicKey {
    fn from(key: ed25519_dalek::VerifyingKey) -> Self {
        PublicKey::Ed25519(key.to_bytes())
    }
}

impl From<&p256::ecdsa::VerifyingKey> for PublicKey {
    fn from(key: &p256::ecdsa::VerifyingKey) -> Self {
        PublicKey::Secp256r1(key.to_encoded_point(false).as_bytes().to_vec())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.as_bytes();
        write!(
            f,
            "PublicKey({}, {})",
            self.key_specification(),
            hex::encode(&bytes[..bytes.len().min(8)])
        )
    }
}
