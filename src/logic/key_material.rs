//! Key generation and signing primitives shared by the software keystore and
//! the simulated device slot

use rand::{rng, RngCore};
use zeroize::Zeroizing;

use crate::model::{KeyAlgorithm, KeySpec, PublicKey};

/// Freshly generated key pair; the private half is wiped on drop
pub struct GeneratedKeyPair {
    pub private: Zeroizing<Vec<u8>>,
    pub public: PublicKey,
}

/// Generates a key pair, or `None` when the spec has no software implementation
pub fn generate_key_pair(spec: &KeySpec) -> Option<GeneratedKeyPair> {
    match spec {
        KeySpec::Ed25519 => {
            let mut secret = Zeroizing::new([0u8; 32]);
            rng().fill_bytes(&mut *secret);
            let signing_key = ed25519_dalek::SigningKey::from_bytes(&secret);
            Some(GeneratedKeyPair {
                private: Zeroizing::new(secret.to_vec()),
                public: signing_key.verifying_key().into(),
            })
        }
        KeySpec::Secp256r1 => loop {
            let mut secret = Zeroizing::new([0u8; 32]);
            rng().fill_bytes(&mut *secret);
            // Out-of-range scalars are rejected; draw again
            if let Ok(signing_key) = p256::ecdsa::SigningKey::from_slice(&secret[..]) {
                return Some(GeneratedKeyPair {
                    private: Zeroizing::new(secret.to_vec()),
                    public: PublicKey::from(signing_key.verifying_key()),
                });
            }
        },
        KeySpec::Rsa { .. } => None,
    }
}

pub fn random_secret(len: usize) -> Zeroizing<Vec<u8>> {
    let mut secret = Zeroizing::new(vec![0u8; len]);
    rng().fill_bytes(&mut secret);
    secret
}

/// Random data for a sign/verify round trip
pub fn challenge() -> [u8; 32] {
    let mut data = [0u8; 32];
    rng().fill_bytes(&mut data);
    data
}

/// Signs with raw private key bytes; `None` when they do not form a key
pub fn sign(algorithm: KeyAlgorithm, private: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    match algorithm {
        KeyAlgorithm::Ed25519 => {
            use ed25519_dalek::Signer;

            let secret = Zeroizing::new(<[u8; 32]>::try_from(private).ok()?);
            let signing_key = ed25519_dalek::SigningKey::from_bytes(&secret);
            Some(signing_key.sign(data).to_bytes().to_vec())
        }
        KeyAlgorithm::Ecdsa => {
            use p256::ecdsa::signature::Signer;

            let signing_key = p256::ecdsa::SigningKey::from_slice(private).ok()?;
            let signature: p256::ecdsa::Signature = signing_key.sign(data);
            Some(signature.to_bytes().to_vec())
        }
        KeyAlgorithm::Rsa => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_sign_ed25519() {
        let pair = generate_key_pair(&KeySpec::Ed25519).unwrap();
        let data = challenge();
        let signature = sign(KeyAlgorithm::Ed25519, &pair.private, &data).unwrap();
        assert!(pair.public.verify(&data, &signature));
    }

    #[test]
    fn test_generate_and_sign_p256() {
        let pair = generate_key_pair(&KeySpec::Secp256r1).unwrap();
        let data = challenge();
        let signature = sign(KeyAlgorithm::Ecdsa, &pair.private, &data).unwrap();
        assert!(pair.public.verify(&data, &signature));
    }

    #[test]
    fn test_rsa_not_generated() {
        assert!(generate_key_pair(&KeySpec::Rsa { bits: 2048 }).is_none());
        assert!(sign(KeyAlgorithm::Rsa, &[1, 2, 3], b"data").is_none());
    }

    #[test]
    fn test_sign_rejects_malformed_private_key() {
        assert!(sign(KeyAlgorithm::Ed25519, &[1u8; 5], b"data").is_none());
    }

    #[test]
    fn test_random_secret_length() {
        assert_eq!(random_secret(24).len(), 24);
    }
}
