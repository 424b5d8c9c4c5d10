//! Sealed software keystore
//!
//! The persisted blob is a JSON envelope: PBKDF2-HMAC-SHA256 derives a
//! ChaCha20-Poly1305 key from the authentication code and a random salt, and
//! the serialized entry map is encrypted under it with the format tag as
//! associated data. Plaintext only ever lives in zeroizing buffers.

use std::collections::BTreeMap;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::{rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::model::{AuthCode, KeyAlgorithm, SecretKeySpec};

const FORMAT: &str = "ctm-keystore-v1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug)]
pub(crate) enum KeystoreError {
    /// Code did not open the keystore
    WrongCode,
    /// Blob is not a keystore this crate wrote
    Corrupt(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: String,
    iterations: u32,
    #[serde(with = "hex::serde")]
    salt: Vec<u8>,
    #[serde(with = "hex::serde")]
    nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    ciphertext: Vec<u8>,
}

/// Decrypted keystore contents
#[derive(Clone, Default, Serialize, Deserialize)]
pub(crate) struct KeyStoreContents {
    pub entries: BTreeMap<String, StoredEntry>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub(crate) enum StoredEntry {
    KeyPair {
        algorithm: KeyAlgorithm,
        #[serde(with = "secret_hex")]
        private: Zeroizing<Vec<u8>>,
        #[serde(with = "hex::serde")]
        public: Vec<u8>,
    },
    Secret {
        spec: SecretKeySpec,
        #[serde(with = "secret_hex")]
        key: Zeroizing<Vec<u8>>,
    },
}

mod secret_hex {
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(bytes: &Zeroizing<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(hex::encode(bytes.as_slice()));
        s.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Zeroizing<Vec<u8>>, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(d)?);
        hex::decode(encoded.as_str())
            .map(Zeroizing::new)
            .map_err(serde::de::Error::custom)
    }
}

fn derive_key(code: &AuthCode, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(code.as_bytes(), salt, iterations, &mut *key);
    key
}

/// Encrypts the contents under `code` with a fresh salt and nonce
pub(crate) fn seal(
    contents: &KeyStoreContents,
    code: &AuthCode,
    iterations: u32,
) -> Result<Vec<u8>, KeystoreError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(contents).map_err(|e| KeystoreError::Corrupt(e.to_string()))?,
    );

    let mut salt = vec![0u8; SALT_LEN];
    let mut nonce = vec![0u8; NONCE_LEN];
    rng().fill_bytes(&mut salt);
    rng().fill_bytes(&mut nonce);

    let key = derive_key(code, &salt, iterations);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plaintext,
                aad: FORMAT.as_bytes(),
            },
        )
        .map_err(|_| KeystoreError::Corrupt("encryption failed".to_string()))?;

    let envelope = Envelope {
        format: FORMAT.to_string(),
        iterations,
        salt,
        nonce,
        ciphertext,
    };
    serde_json::to_vec(&envelope).map_err(|e| KeystoreError::Corrupt(e.to_string()))
}

/// Decrypts a sealed blob; the iteration count travels with the blob
pub(crate) fn open(sealed: &[u8], code: &AuthCode) -> Result<KeyStoreContents, KeystoreError> {
    let envelope: Envelope =
        serde_json::from_slice(sealed).map_err(|e| KeystoreError::Corrupt(e.to_string()))?;
    if envelope.format != FORMAT {
        return Err(KeystoreError::Corrupt(format!(
            "unsupported format {}",
            envelope.format
        )));
    }
    if envelope.nonce.len() != NONCE_LEN {
        return Err(KeystoreError::Corrupt("bad nonce length".to_string()));
    }

    let key = derive_key(code, &envelope.salt, envelope.iterations);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload {
                msg: &envelope.ciphertext,
                aad: FORMAT.as_bytes(),
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| KeystoreError::WrongCode)?;

    serde_json::from_slice(&plaintext).map_err(|e| KeystoreError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERATIONS: u32 = 10;

    fn code(value: &str) -> AuthCode {
        AuthCode::new(value).unwrap()
    }

    fn sample_contents() -> KeyStoreContents {
        let mut contents = KeyStoreContents::default();
        contents.entries.insert(
            "aes".to_string(),
            StoredEntry::Secret {
                spec: SecretKeySpec::Aes128,
                key: Zeroizing::new(vec![5u8; 16]),
            },
        );
        contents
    }

    #[test]
    fn test_seal_and_open() {
        let sealed = seal(&sample_contents(), &code("foo123"), ITERATIONS).unwrap();
        let opened = open(&sealed, &code("foo123")).unwrap();

        match opened.entries.get("aes") {
            Some(StoredEntry::Secret { spec, key }) => {
                assert_eq!(*spec, SecretKeySpec::Aes128);
                assert_eq!(key.as_slice(), &[5u8; 16]);
            }
            _ => panic!("secret entry missing"),
        }
    }

    #[test]
    fn test_wrong_code() {
        let sealed = seal(&sample_contents(), &code("foo123"), ITERATIONS).unwrap();
        assert!(matches!(
            open(&sealed, &code("bar456")),
            Err(KeystoreError::WrongCode)
        ));
    }

    #[test]
    fn test_corrupt_blob() {
        assert!(matches!(
            open(b"not a keystore", &code("foo123")),
            Err(KeystoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_sealed_blob_hides_plaintext() {
        let sealed = seal(&sample_contents(), &code("foo123"), ITERATIONS).unwrap();
        let text = String::from_utf8_lossy(&sealed);
        assert!(!text.contains("aes"));
        assert!(!text.contains(&hex::encode([5u8; 16])));
    }
}
