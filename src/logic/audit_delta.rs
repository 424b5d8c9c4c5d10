//! Redacted change-sets for the audit trail
//!
//! Every mutating operation describes what it changed as an ordered list of
//! `key -> value` details. Property changes are tagged `added:<key>`,
//! `removed:<key>` or `changed:<key>`. The auto-activation PIN is reported
//! only as `autoActivation: added|removed|pin changed`; its value never
//! reaches the details.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::model::{TokenProperties, AUTO_ACTIVATION_PIN_KEY};

/// Detail key used for PIN transitions
pub const AUTO_ACTIVATION_DETAIL: &str = "autoActivation";

/// Ordered detail map attached to an audit record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditDetails(Vec<(String, String)>);

impl AuditDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_msg(msg: impl Into<String>) -> Self {
        let mut details = Self::new();
        details.put("msg", msg);
        details
    }

    /// Inserts or replaces, keeping the original position on replace
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for AuditDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Whether unchanged entries are echoed into the details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnchangedPolicy {
    #[default]
    Echo,
    Omit,
}

/// Records the change of a single field
pub fn put_delta(
    key: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    policy: UnchangedPolicy,
    details: &mut AuditDetails,
) {
    if key == AUTO_ACTIVATION_PIN_KEY {
        let transition = match (old_value, new_value) {
            (None, Some(_)) => Some("added"),
            (Some(_), None) => Some("removed"),
            (Some(old), Some(new)) if old != new => Some("pin changed"),
            _ => None,
        };
        if let Some(transition) = transition {
            details.put(AUTO_ACTIVATION_DETAIL, transition);
        }
        return;
    }

    match (old_value, new_value) {
        (None, None) => {}
        (None, Some(new)) => details.put(format!("added:{key}"), new),
        (Some(old), None) => details.put(format!("removed:{key}"), old),
        (Some(old), Some(new)) if old != new => details.put(format!("changed:{key}"), new),
        (Some(_), Some(new)) => {
            if policy == UnchangedPolicy::Echo {
                details.put(key, new);
            }
        }
    }
}

/// Records every difference between two property maps, old keys first
pub fn put_property_delta(
    old: &TokenProperties,
    new: &TokenProperties,
    policy: UnchangedPolicy,
    details: &mut AuditDetails,
) {
    for (key, old_value) in old.iter() {
        put_delta(key, Some(old_value), new.get(key), policy, details);
    }
    for (key, new_value) in new.iter() {
        if !old.contains_key(key) {
            put_delta(key, None, Some(new_value), policy, details);
        }
    }
}

/// Pure form of [`put_property_delta`]
pub fn property_delta(
    old: &TokenProperties,
    new: &TokenProperties,
    policy: UnchangedPolicy,
) -> AuditDetails {
    let mut details = AuditDetails::new();
    put_property_delta(old, new, policy, &mut details);
    details
}
