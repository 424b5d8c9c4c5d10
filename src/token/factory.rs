use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use super::{CryptoToken, HardwareSlotToken, SoftwareToken, TokenHeader};
use crate::error::{TokenError, TokenResult};
use crate::model::{TokenId, TokenProperties};
use crate::ports::SlotFinder;

/// Type tag of the software keystore variant
pub const SOFTWARE_TYPE: &str = "software";

/// Type tag of the hardware slot variant
pub const HARDWARE_SLOT_TYPE: &str = "hardware-slot";

/// Tuning of software keystores built by the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareSettings {
    /// PBKDF2-HMAC-SHA256 rounds used when sealing
    pub kdf_iterations: u32,
}

impl SoftwareSettings {
    pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;
}

impl Default for SoftwareSettings {
    fn default() -> Self {
        Self {
            kdf_iterations: Self::DEFAULT_KDF_ITERATIONS,
        }
    }
}

type Constructor = Box<dyn Fn(TokenHeader, Vec<u8>) -> TokenResult<CryptoToken> + Send + Sync>;

/// Registry of crypto token constructors keyed by type tag
///
/// Filled once at startup and read-only afterwards. The hardware variant is
/// only registered when a slot finder is supplied.
pub struct CryptoTokenFactory {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl CryptoTokenFactory {
    pub fn new(software: SoftwareSettings, slot_finder: Option<Arc<dyn SlotFinder>>) -> Self {
        let mut constructors: BTreeMap<&'static str, Constructor> = BTreeMap::new();
        constructors.insert(
            SOFTWARE_TYPE,
            Box::new(move |header: TokenHeader, data: Vec<u8>| {
                Ok(CryptoToken::Software(SoftwareToken::new(
                    header,
                    data,
                    software.kdf_iterations,
                )))
            }),
        );
        if let Some(finder) = slot_finder {
            constructors.insert(
                HARDWARE_SLOT_TYPE,
                Box::new(move |header: TokenHeader, _data: Vec<u8>| {
                    HardwareSlotToken::new(header, Arc::clone(&finder)).map(CryptoToken::HardwareSlot)
                }),
            );
        }
        Self { constructors }
    }

    pub fn software_only(software: SoftwareSettings) -> Self {
        Self::new(software, None)
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    pub fn type_tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    /// Builds an offline token; never activates
    pub fn create(
        &self,
        type_tag: &str,
        id: TokenId,
        name: &str,
        properties: TokenProperties,
        data: Vec<u8>,
    ) -> TokenResult<CryptoToken> {
        let constructor =
            self.constructors
                .get(type_tag)
                .ok_or_else(|| TokenError::UnknownTokenType {
                    type_tag: type_tag.to_string(),
                })?;
        trace!("Constructing {} crypto token {}", type_tag, id);
        constructor(
            TokenHeader {
                id,
                name: name.to_string(),
                properties,
            },
            data,
        )
    }
}

impl std::fmt::Debug for CryptoTokenFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoTokenFactory")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
