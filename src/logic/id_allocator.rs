use std::collections::HashSet;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{TokenError, TokenResult};
use crate::model::TokenId;

/// Random crypto token id generator with bounded retry
///
/// The generator is seeded once from the operating system and shared by all
/// callers. The store's uniqueness check on commit stays the final authority;
/// this only avoids ids already known to be taken.
#[derive(Debug)]
pub struct IdAllocator {
    rng: Mutex<StdRng>,
    max_attempts: usize,
}

impl IdAllocator {
    pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

    pub fn new(max_attempts: usize) -> Self {
        Self::with_rng(StdRng::from_os_rng(), max_attempts)
    }

    pub(crate) fn with_rng(rng: StdRng, max_attempts: usize) -> Self {
        Self {
            rng: Mutex::new(rng),
            max_attempts,
        }
    }

    pub fn allocate(&self, in_use: &HashSet<TokenId>) -> TokenResult<TokenId> {
        let mut rng = self.rng.lock();
        for attempt in 0..self.max_attempts {
            let candidate: TokenId = rng.random();
            if !in_use.contains(&candidate) {
                return Ok(candidate);
            }
            debug!("Crypto token id {} collided on attempt {}", candidate, attempt + 1);
        }
        Err(TokenError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_skips_ids_in_use() {
        let mut replay = StdRng::seed_from_u64(7);
        let first: TokenId = replay.random();
        let second: TokenId = replay.random();

        let allocator = IdAllocator::with_rng(StdRng::seed_from_u64(7), 10);
        let in_use: HashSet<TokenId> = [first].into_iter().collect();

        assert_eq!(allocator.allocate(&in_use).unwrap(), second);
    }

    #[test]
    fn test_allocation_exhausted() {
        let mut replay = StdRng::seed_from_u64(11);
        let taken: HashSet<TokenId> = (0..3).map(|_| replay.random::<TokenId>()).collect();

        let allocator = IdAllocator::with_rng(StdRng::seed_from_u64(11), 3);

        assert!(matches!(
            allocator.allocate(&taken),
            Err(TokenError::AllocationExhausted { attempts: 3 })
        ));
    }

    #[test]
    fn test_default_allocates() {
        let allocator = IdAllocator::default();
        assert!(allocator.allocate(&HashSet::new()).is_ok());
    }
}
