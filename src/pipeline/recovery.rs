//! Extractor registry and the post-failure reinitialization loop.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, TryLockError};

use rand::Rng;
use tracing::{info, warn};

use crate::document::Fragment;
use crate::extractors::{ExtractionInput, Extractor, ExtractorError, ExtractorKind};

/// One slot per extractor kind. The per-slot mutex serializes extraction
/// against reinitialization; a slot stuck in a hung extract call simply
/// reports as busy instead of blocking recovery.
#[derive(Default)]
pub struct ExtractorPool {
    slots: BTreeMap<ExtractorKind, Mutex<Box<dyn Extractor>>>,
}

impl ExtractorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.slots.insert(extractor.kind(), Mutex::new(extractor));
        self
    }

    pub fn contains(&self, kind: ExtractorKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Runs one extraction. `None` when no extractor of that kind is
    /// registered. Blocks until the slot is free.
    pub fn extract(
        &self,
        kind: ExtractorKind,
        input: &ExtractionInput,
    ) -> Option<Result<Fragment, ExtractorError>> {
        let slot = self.slots.get(&kind)?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(guard.extract(input))
    }
}

const BASE_BACKOFF_MS: u64 = 50;

#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
}

impl RecoveryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Tries to bring a failed extractor back. Returns whether the
    /// extractor both reinitialized and passed its health check.
    pub fn recover(&self, pool: &ExtractorPool, kind: ExtractorKind) -> bool {
        let Some(slot) = pool.slots.get(&kind) else {
            warn!(kind = kind.as_str(), "no extractor registered to recover");
            return false;
        };
        let mut guard = match slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!(kind = kind.as_str(), "extractor busy, skipping recovery");
                return false;
            }
        };

        for attempt in 1..=self.max_attempts {
            match guard.reinitialize() {
                Ok(()) if guard.health_check() => {
                    info!(kind = kind.as_str(), attempt, "extractor recovered");
                    return true;
                }
                Ok(()) => {
                    warn!(
                        kind = kind.as_str(),
                        attempt, "reinitialized but still unhealthy"
                    );
                }
                Err(e) => {
                    warn!(kind = kind.as_str(), attempt, error = %e, "reinitialization failed");
                }
            }
            if attempt < self.max_attempts {
                let jitter = rand::thread_rng().gen_range(0..BASE_BACKOFF_MS);
                std::thread::sleep(std::time::Duration::from_millis(
                    BASE_BACKOFF_MS * u64::from(attempt) + jitter,
                ));
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyExtractor {
        kind: ExtractorKind,
        attempts: Arc<AtomicU32>,
        succeed_on: u32,
        healthy_after_reset: bool,
    }

    impl Extractor for FlakyExtractor {
        fn kind(&self) -> ExtractorKind {
            self.kind
        }
        fn health_check(&self) -> bool {
            self.healthy_after_reset
                && self.attempts.load(Ordering::SeqCst) >= self.succeed_on
        }
        fn extract(
            &self,
            _input: &ExtractionInput,
        ) -> Result<Fragment, ExtractorError> {
            Ok(Fragment::default())
        }
        fn reinitialize(&mut self) -> Result<(), ExtractorError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(())
            } else {
                Err(ExtractorError::Initialization(format!("attempt {n}")))
            }
        }
    }

    #[test]
    fn recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = ExtractorPool::new().register(Box::new(FlakyExtractor {
            kind: ExtractorKind::Entity,
            attempts: attempts.clone(),
            succeed_on: 2,
            healthy_after_reset: true,
        }));
        let policy = RecoveryPolicy::new(3);
        assert!(policy.recover(&pool, ExtractorKind::Entity));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = ExtractorPool::new().register(Box::new(FlakyExtractor {
            kind: ExtractorKind::Entity,
            attempts: attempts.clone(),
            succeed_on: 10,
            healthy_after_reset: true,
        }));
        let policy = RecoveryPolicy::new(3);
        assert!(!policy.recover(&pool, ExtractorKind::Entity));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn health_check_gates_recovery() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = ExtractorPool::new().register(Box::new(FlakyExtractor {
            kind: ExtractorKind::Summary,
            attempts,
            succeed_on: 1,
            healthy_after_reset: false,
        }));
        let policy = RecoveryPolicy::new(2);
        assert!(!policy.recover(&pool, ExtractorKind::Summary));
    }

    #[test]
    fn unregistered_kind_is_not_recovered() {
        let pool = ExtractorPool::new();
        let policy = RecoveryPolicy::new(1);
        assert!(!policy.recover(&pool, ExtractorKind::Vision));
    }

    #[test]
    fn busy_slot_is_reported_not_blocked() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = Arc::new(ExtractorPool::new().register(Box::new(
            FlakyExtractor {
                kind: ExtractorKind::Pattern,
                attempts,
                succeed_on: 1,
                healthy_after_reset: true,
            },
        )));
        let slot = pool.slots.get(&ExtractorKind::Pattern).unwrap();
        let _held = slot.lock().unwrap();
        let policy = RecoveryPolicy::new(3);
        assert!(!policy.recover(&pool, ExtractorKind::Pattern));
    }
}
