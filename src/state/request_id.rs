use std::sync::atomic::{AtomicU64, Ordering};

/// Per-process request ids: a random 128-bit seed xor a relaxed counter.
///
/// Unique within a process lifetime; not meant to be unguessable.
pub(crate) struct RequestIds {
    seed: u128,
    next: AtomicU64,
}

impl RequestIds {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::with_seed(fastrand::u128(..))
    }

    #[must_use]
    pub(crate) fn with_seed(seed: u128) -> Self {
        Self {
            seed,
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_uuid(&self) -> uuid::Uuid {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_counter() {
        let ids = RequestIds::with_seed(0);
        assert_eq!(ids.next_uuid(), uuid::Uuid::from_u128(1));
        assert_eq!(ids.next_uuid(), uuid::Uuid::from_u128(2));
    }

    #[test]
    fn test_seeded_ids_differ_across_calls() {
        let ids = RequestIds::new();
        assert_ne!(ids.next_uuid(), ids.next_uuid());
    }
}
