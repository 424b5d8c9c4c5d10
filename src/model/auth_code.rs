use std::fmt;

use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Secret used to activate a crypto token: a keystore passphrase or a slot PIN.
///
/// The value is wiped from memory on drop and never shows up in `Debug`.
#[derive(Clone)]
pub struct AuthCode(Zeroizing<String>);

impl AuthCode {
    pub fn new(code: impl Into<String>) -> Result<Self, AuthCodeError> {
        let code = Zeroizing::new(code.into());
        if code.is_empty() {
            return Err(AuthCodeError::Empty);
        }
        Ok(Self(code))
    }

    /// Treats a missing or empty input as no code at all
    pub fn from_optional(code: Option<&str>) -> Option<Self> {
        code.and_then(|c| Self::new(c).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Constant-time comparison
    pub fn matches(&self, other: &AuthCode) -> bool {
        self.as_bytes().ct_eq(other.as_bytes()).into()
    }
}

impl PartialEq for AuthCode {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for AuthCode {}

impl fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthCode([REDACTED])")
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCodeError {
    #[error("authentication code must not be empty")]
    Empty,
}
