//! In-memory security module
//!
//! Behaves like a PKCS#11 slot as far as the hardware-backed crypto token can
//! tell: PIN login, on-device key generation and signing, object destruction.
//! Reachability can be switched off to exercise the unavailable-device paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{DeviceError, DeviceResult};
use crate::logic::key_material;
use crate::model::{AuthCode, KeyAlgorithm, KeySpec, PublicKey, SecretKeySpec};
use crate::ports::{SlotDevice, SlotFinder, SlotSession};

#[derive(Default)]
struct SlotEntry {
    public: Option<PublicKey>,
    private: Option<(KeyAlgorithm, Zeroizing<Vec<u8>>)>,
    secret: Option<(SecretKeySpec, Zeroizing<Vec<u8>>)>,
}

impl SlotEntry {
    fn is_empty(&self) -> bool {
        self.public.is_none() && self.private.is_none() && self.secret.is_none()
    }
}

struct SlotState {
    label: String,
    pin: Mutex<Zeroizing<String>>,
    online: AtomicBool,
    logins: AtomicUsize,
    objects: Mutex<BTreeMap<String, SlotEntry>>,
}

impl SlotState {
    fn ensure_online(&self) -> DeviceResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::Unavailable {
                reason: format!("slot {} does not respond", self.label),
            })
        }
    }
}

/// Handle on one simulated slot; clones share the same slot
#[derive(Clone)]
pub struct SimulatedSlot {
    state: Arc<SlotState>,
}

impl SimulatedSlot {
    pub fn set_online(&self, online: bool) {
        self.state.online.store(online, Ordering::SeqCst);
    }

    pub fn set_pin(&self, pin: &str) {
        *self.state.pin.lock() = Zeroizing::new(pin.to_string());
    }

    /// Successful logins so far
    pub fn login_count(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn has_object(&self, alias: &str) -> bool {
        self.state.objects.lock().contains_key(alias)
    }

    /// Stores a lone public key, as left behind by an interrupted import
    pub fn import_public_key(&self, alias: &str, public_key: PublicKey) {
        self.state
            .objects
            .lock()
            .entry(alias.to_string())
            .or_default()
            .public = Some(public_key);
    }
}

impl SlotDevice for SimulatedSlot {
    fn label(&self) -> &str {
        &self.state.label
    }

    fn login(&self, pin: &AuthCode) -> DeviceResult<Arc<dyn SlotSession>> {
        self.state.ensure_online()?;
        let expected = AuthCode::new(self.state.pin.lock().as_str()).ok();
        if !expected.is_some_and(|expected| expected.matches(pin)) {
            return Err(DeviceError::PinIncorrect);
        }
        self.state.logins.fetch_add(1, Ordering::SeqCst);
        debug!("Session opened on simulated slot {}", self.state.label);
        Ok(Arc::new(SimulatedSession {
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
        }))
    }
}

struct SimulatedSession {
    state: Arc<SlotState>,
    open: AtomicBool,
}

impl SimulatedSession {
    fn ready(&self) -> DeviceResult<()> {
        self.state.ensure_online()?;
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::Unavailable {
                reason: "session closed".to_string(),
            })
        }
    }
}

impl SlotSession for SimulatedSession {
    fn generate_key_pair(&self, alias: &str, spec: &KeySpec) -> DeviceResult<PublicKey> {
        self.ready()?;
        let pair = key_material::generate_key_pair(spec).ok_or_else(|| {
            DeviceError::UnsupportedMechanism {
                mechanism: spec.canonical(),
            }
        })?;

        let mut objects = self.state.objects.lock();
        if objects.contains_key(alias) {
            return Err(DeviceError::Failure {
                reason: format!("object {alias} already exists"),
            });
        }
        objects.insert(
            alias.to_string(),
            SlotEntry {
                public: Some(pair.public.clone()),
                private: Some((pair.public.algorithm(), pair.private)),
                secret: None,
            },
        );
        Ok(pair.public)
    }

    fn generate_secret_key(&self, alias: &str, spec: SecretKeySpec) -> DeviceResult<()> {
        self.ready()?;
        let mut objects = self.state.objects.lock();
        if objects.contains_key(alias) {
            return Err(DeviceError::Failure {
                reason: format!("object {alias} already exists"),
            });
        }
        objects.insert(
            alias.to_string(),
            SlotEntry {
                secret: Some((spec, key_material::random_secret(spec.key_len()))),
                ..SlotEntry::default()
            },
        );
        Ok(())
    }

    fn public_key(&self, alias: &str) -> DeviceResult<Option<PublicKey>> {
        self.ready()?;
        Ok(self
            .state
            .objects
            .lock()
            .get(alias)
            .and_then(|entry| entry.public.clone()))
    }

    fn has_private_key(&self, alias: &str) -> DeviceResult<bool> {
        self.ready()?;
        Ok(self
            .state
            .objects
            .lock()
            .get(alias)
            .is_some_and(|entry| entry.private.is_some()))
    }

    fn secret_key_spec(&self, alias: &str) -> DeviceResult<Option<SecretKeySpec>> {
        self.ready()?;
        Ok(self
            .state
            .objects
            .lock()
            .get(alias)
            .and_then(|entry| entry.secret.as_ref().map(|(spec, _)| *spec)))
    }

    fn sign(&self, alias: &str, data: &[u8]) -> DeviceResult<Vec<u8>> {
        self.ready()?;
        let objects = self.state.objects.lock();
        let (algorithm, private) = objects
            .get(alias)
            .and_then(|entry| entry.private.as_ref())
            .ok_or_else(|| DeviceError::Failure {
                reason: format!("no private key {alias}"),
            })?;
        key_material::sign(*algorithm, private, data).ok_or_else(|| {
            DeviceError::UnsupportedMechanism {
                mechanism: algorithm.to_string(),
            }
        })
    }

    fn destroy(&self, alias: &str) -> DeviceResult<bool> {
        self.ready()?;
        Ok(self
            .state
            .objects
            .lock()
            .remove(alias)
            .is_some_and(|entry| !entry.is_empty()))
    }

    fn aliases(&self) -> DeviceResult<Vec<String>> {
        self.ready()?;
        Ok(self.state.objects.lock().keys().cloned().collect())
    }

    fn logout(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Simulated module holding labelled slots
#[derive(Default)]
pub struct SimulatedHsm {
    slots: RwLock<BTreeMap<String, SimulatedSlot>>,
}

impl SimulatedHsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an online slot guarded by `pin`
    pub fn add_slot(&self, label: &str, pin: &str) -> SimulatedSlot {
        let slot = SimulatedSlot {
            state: Arc::new(SlotState {
                label: label.to_string(),
                pin: Mutex::new(Zeroizing::new(pin.to_string())),
                online: AtomicBool::new(true),
                logins: AtomicUsize::new(0),
                objects: Mutex::new(BTreeMap::new()),
            }),
        };
        self.slots.write().insert(label.to_string(), slot.clone());
        slot
    }

    pub fn slot(&self, label: &str) -> Option<SimulatedSlot> {
        self.slots.read().get(label).cloned()
    }
}

impl SlotFinder for SimulatedHsm {
    fn find(&self, label: &str) -> DeviceResult<Arc<dyn SlotDevice>> {
        let slot = self.slot(label).ok_or_else(|| DeviceError::Unavailable {
            reason: format!("no slot labelled {label}"),
        })?;
        Ok(Arc::new(slot))
    }
}
