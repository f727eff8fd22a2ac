#[cfg(test)]
mod foundation_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use util::sync::Mutex as SyncMutex;

use crate::candidate::LocalCandidate;

/// The first value handed out for locally harvested candidates.
const FIRST_LOCAL_FOUNDATION: u32 = 1;
/// Remote peer-reflexive foundations come from an independent counter so
/// they can never collide with signalled ones.
const FIRST_REMOTE_PRFLX_FOUNDATION: u32 = 10000;

/// Assigns stable foundation strings: candidates that share type, base
/// address, server and transport get the same decimal string, everything
/// else gets a fresh one. Safe to call from concurrent harvests.
#[derive(Default)]
pub struct FoundationRegistry {
    assigned: SyncMutex<HashMap<String, u32>>,
    next: AtomicU32,
    next_remote_prflx: AtomicU32,
}

impl FoundationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            assigned: SyncMutex::new(HashMap::new()),
            next: AtomicU32::new(FIRST_LOCAL_FOUNDATION),
            next_remote_prflx: AtomicU32::new(FIRST_REMOTE_PRFLX_FOUNDATION),
        }
    }

    /// Sets the candidate's foundation, reusing the value given to any
    /// earlier candidate with the same grouping key.
    pub fn assign_foundation(&self, candidate: &Arc<LocalCandidate>) {
        let key = Self::key_of(candidate);

        let value = {
            let mut assigned = self.assigned.lock();
            match assigned.get(&key) {
                Some(v) => *v,
                None => {
                    let v = self.next.fetch_add(1, Ordering::SeqCst);
                    assigned.insert(key, v);
                    v
                }
            }
        };

        candidate.data.set_foundation(value.to_string());
    }

    /// Returns a foundation for a remote candidate learned from the
    /// source address of an incoming check rather than from signaling.
    pub fn obtain_peer_reflexive_foundation(&self) -> String {
        self.next_remote_prflx
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn key_of(candidate: &Arc<LocalCandidate>) -> String {
        let base = candidate.base();
        let server = candidate
            .server
            .as_ref()
            .map(|s| s.host.clone())
            .unwrap_or_default();

        format!(
            "{}|{}|{}|{}",
            candidate.data.candidate_type,
            base.addr().ip(),
            server,
            candidate.data.transport()
        )
    }
}
