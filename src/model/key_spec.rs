//! Key specifications accepted by crypto tokens

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Family of an asymmetric key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "ECDSA")]
    Ecdsa,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Ecdsa => "ECDSA",
            KeyAlgorithm::Ed25519 => "Ed25519",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asymmetric key specification in canonical form
///
/// Parsing accepts the vendor-prefixed and alias spellings callers send
/// (`RSA2048`, `prime256v1`, `P-256`, `ed25519`) and maps them to one
/// canonical value per key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpec {
    Rsa { bits: u32 },
    Secp256r1,
    Ed25519,
}

const SECP256R1_ALIASES: [&str; 4] = ["secp256r1", "prime256v1", "p-256", "nistp256"];

impl KeySpec {
    pub fn parse(raw: &str) -> Result<Self, KeySpecError> {
        let spec = raw.trim();
        let unrecognized = || KeySpecError::Unrecognized {
            spec: raw.to_string(),
        };

        if spec.eq_ignore_ascii_case("ed25519") {
            return Ok(KeySpec::Ed25519);
        }
        if SECP256R1_ALIASES
            .iter()
            .any(|alias| spec.eq_ignore_ascii_case(alias))
        {
            return Ok(KeySpec::Secp256r1);
        }

        let digits = match spec.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("RSA") => &spec[3..],
            _ => spec,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unrecognized());
        }
        let bits = digits.parse::<u32>().map_err(|_| unrecognized())?;
        Ok(KeySpec::Rsa { bits })
    }

    /// Canonical string; RSA keeps the legacy bare-length form
    pub fn canonical(&self) -> String {
        match self {
            KeySpec::Rsa { bits } => bits.to_string(),
            KeySpec::Secp256r1 => "secp256r1".to_string(),
            KeySpec::Ed25519 => "Ed25519".to_string(),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeySpec::Rsa { .. } => KeyAlgorithm::Rsa,
            KeySpec::Secp256r1 => KeyAlgorithm::Ecdsa,
            KeySpec::Ed25519 => KeyAlgorithm::Ed25519,
        }
    }

    /// Rejects key lengths outside the policy
    pub fn check_policy(&self, policy: &KeyPolicy) -> Result<(), KeySpecError> {
        if let KeySpec::Rsa { bits } = *self {
            if bits < policy.min_rsa_bits {
                return Err(KeySpecError::TooShort {
                    spec: self.canonical(),
                    bits,
                    min: policy.min_rsa_bits,
                });
            }
            if bits > KeyPolicy::MAX_RSA_BITS {
                return Err(KeySpecError::TooLong {
                    spec: self.canonical(),
                    bits,
                    max: KeyPolicy::MAX_RSA_BITS,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for KeySpec {
    type Err = KeySpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Symmetric key specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecretKeySpec {
    Aes128,
    Aes192,
    Aes256,
}

impl SecretKeySpec {
    pub fn parse(raw: &str) -> Result<Self, KeySpecError> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "AES128" => Ok(SecretKeySpec::Aes128),
            "AES192" => Ok(SecretKeySpec::Aes192),
            "AES256" => Ok(SecretKeySpec::Aes256),
            _ => Err(KeySpecError::Unrecognized {
                spec: raw.to_string(),
            }),
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            SecretKeySpec::Aes128 => 16,
            SecretKeySpec::Aes192 => 24,
            SecretKeySpec::Aes256 => 32,
        }
    }

    pub fn canonical(self) -> &'static str {
        match self {
            SecretKeySpec::Aes128 => "AES128",
            SecretKeySpec::Aes192 => "AES192",
            SecretKeySpec::Aes256 => "AES256",
        }
    }
}

/// Key length policy applied before generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    pub min_rsa_bits: u32,
}

impl KeyPolicy {
    pub const DEFAULT_MIN_RSA_BITS: u32 = 1024;

    pub const MAX_RSA_BITS: u32 = 16384;
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            min_rsa_bits: Self::DEFAULT_MIN_RSA_BITS,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeySpecError {
    #[error("unrecognized key specification {spec}")]
    Unrecognized { spec: String },

    #[error("key length {bits} is below the minimum of {min}")]
    TooShort { spec: String, bits: u32, min: u32 },

    #[error("key length {bits} is above the maximum of {max}")]
    TooLong { spec: String, bits: u32, max: u32 },
}

impl KeySpecError {
    pub fn spec(&self) -> &str {
        match self {
            KeySpecError::Unrecognized { spec }
            | KeySpecError::TooShort { spec, .. }
            | KeySpecError::TooLong { spec, .. } => spec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsa_prefix_normalized() {
        assert_eq!(KeySpec::parse("RSA2048").unwrap(), KeySpec::Rsa { bits: 2048 });
        assert_eq!(KeySpec::parse("2048").unwrap(), KeySpec::Rsa { bits: 2048 });
        assert_eq!(KeySpec::parse("RSA4096").unwrap().canonical(), "4096");
    }

    #[test]
    fn test_ec_aliases() {
        for alias in ["secp256r1", "prime256v1", "P-256", "nistp256"] {
            assert_eq!(KeySpec::parse(alias).unwrap(), KeySpec::Secp256r1);
        }
        assert_eq!(KeySpec::Secp256r1.canonical(), "secp256r1");
    }

    #[test]
    fn test_ed25519() {
        assert_eq!(KeySpec::parse("ed25519").unwrap(), KeySpec::Ed25519);
        assert_eq!(KeySpec::Ed25519.algorithm(), KeyAlgorithm::Ed25519);
    }

    #[test]
    fn test_unrecognized() {
        for raw in ["", "RSA", "RSAxyz", "brainpool", "DSA1024"] {
            assert!(matches!(
                KeySpec::parse(raw),
                Err(KeySpecError::Unrecognized { .. })
            ));
        }
    }

    #[test]
    fn test_policy() {
        let policy = KeyPolicy::default();
        assert!(KeySpec::Rsa { bits: 1024 }.check_policy(&policy).is_ok());
        assert!(matches!(
            KeySpec::Rsa { bits: 512 }.check_policy(&policy),
            Err(KeySpecError::TooShort { bits: 512, min: 1024, .. })
        ));
        assert!(matches!(
            KeySpec::Rsa { bits: 32768 }.check_policy(&policy),
            Err(KeySpecError::TooLong { .. })
        ));
        assert!(KeySpec::Secp256r1.check_policy(&policy).is_ok());
    }

    #[test]
    fn test_secret_key_spec() {
        assert_eq!(SecretKeySpec::parse("AES-256").unwrap(), SecretKeySpec::Aes256);
        assert_eq!(SecretKeySpec::parse("aes128").unwrap().key_len(), 16);
        assert!(SecretKeySpec::parse("DES").is_err());
    }
}
