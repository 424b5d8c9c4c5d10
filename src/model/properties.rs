use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::AuthCode;

/// Reserved key holding the auto-activation PIN
pub const AUTO_ACTIVATION_PIN_KEY: &str = "pin";

/// Save-time flag asking to carry the current auto-activation PIN forward
pub const KEEP_AUTO_ACTIVATION_PIN_KEY: &str = "keepAutoActivationPin";

/// Label of the device slot a hardware token binds to
pub const SLOT_LABEL_KEY: &str = "slotLabelValue";

/// Ordered backend configuration of a crypto token
///
/// The auto-activation PIN lives here under [`AUTO_ACTIVATION_PIN_KEY`]. It
/// is masked in `Debug`, stripped by [`TokenProperties::redacted`] and wiped
/// when removed or dropped.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenProperties(BTreeMap<String, String>);

impl TokenProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(mut previous) = self.0.insert(key, value.into()) {
            previous.zeroize();
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn auto_activation_pin(&self) -> Option<AuthCode> {
        AuthCode::from_optional(self.get(AUTO_ACTIVATION_PIN_KEY))
    }

    pub fn has_auto_activation_pin(&self) -> bool {
        self.auto_activation_pin().is_some()
    }

    pub fn set_auto_activation_pin(&mut self, pin: &AuthCode) {
        self.insert(AUTO_ACTIVATION_PIN_KEY, pin.as_str());
    }

    /// Returns whether a PIN was present
    pub fn remove_auto_activation_pin(&mut self) -> bool {
        match self.0.remove(AUTO_ACTIVATION_PIN_KEY) {
            Some(mut pin) => {
                pin.zeroize();
                true
            }
            None => false,
        }
    }

    /// Removes the keep flag and reports whether it was set to `true`
    pub fn take_keep_auto_activation_flag(&mut self) -> bool {
        self.0
            .remove(KEEP_AUTO_ACTIVATION_PIN_KEY)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    /// Copy without the auto-activation PIN
    pub fn redacted(&self) -> TokenProperties {
        let mut copy = self.clone();
        copy.remove_auto_activation_pin();
        copy
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TokenProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = TokenProperties::new();
        for (key, value) in iter {
            properties.insert(key, value);
        }
        properties
    }
}

impl Drop for TokenProperties {
    fn drop(&mut self) {
        if let Some(pin) = self.0.get_mut(AUTO_ACTIVATION_PIN_KEY) {
            pin.zeroize();
        }
    }
}

impl fmt::Debug for TokenProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| {
                if k == AUTO_ACTIVATION_PIN_KEY {
                    (k.as_str(), "[REDACTED]")
                } else {
                    (k.as_str(), v.as_str())
                }
            }))
            .finish()
    }
}
