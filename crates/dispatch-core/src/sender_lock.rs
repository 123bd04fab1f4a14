// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Lazily populated `sender_id -> mutex` map guarded by a meta-mutex.
///
/// Acquiring a sender's lock before the agent/action phase and releasing it
/// after the outbound send guarantees invariant I2 (two inbounds from the
/// same sender are handled strictly serially) without serializing the whole
/// dispatcher. Entries are never evicted; the working set is bounded by the
/// sender allowlist in practice (spec §4.7/§9).
#[derive(Default)]
pub struct SenderLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SenderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex for `sender_id`, creating it if absent.
    pub async fn get_or_create(&self, sender_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(sender_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
