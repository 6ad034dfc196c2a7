//! In-memory grant store
//!
//! Deadline-carrying map used by the test suite and single-node
//! development. A single mutex over the whole state makes the multi-key
//! operations trivially atomic; `fail_next_commit` lets tests interrupt a
//! grant before commit.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::store::GrantStore;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

#[derive(Default)]
struct State {
    strings: HashMap<String, Entry>,
    sets: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct MemoryGrantStore {
    state: Mutex<State>,
    fail_next_commit: AtomicBool,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit_grant` fail before applying anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Force-expire a string key, simulating TTL elapse.
    pub fn expire_now(&self, key: &str) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(entry) = state.strings.get_mut(key) {
                entry.expires_at = Some(Instant::now() - Duration::from_secs(1));
            }
        }
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn put_profile(&self, key: &str, profile: &[u8], ttl_secs: u64) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("grant store lock poisoned"))?;
        state.strings.insert(
            key.to_string(),
            Entry {
                value: profile.to_vec(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn get_profile(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("grant store lock poisoned"))?;
        Ok(state
            .strings
            .get(key)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone()))
    }

    async fn commit_grant(
        &self,
        token_key: &str,
        token: &str,
        token_ttl_secs: u64,
        set_key: &str,
        member: &str,
        _set_ttl_secs: u64,
        profile_key: &str,
    ) -> Result<Option<Vec<u8>>> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("grant transaction failed: injected failure"));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("grant store lock poisoned"))?;
        state.strings.insert(
            token_key.to_string(),
            Entry {
                value: token.as_bytes().to_vec(),
                expires_at: Some(Instant::now() + Duration::from_secs(token_ttl_secs)),
            },
        );
        state
            .sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(state
            .strings
            .get(profile_key)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone()))
    }

    async fn revoke(&self, set_key: &str, member: &str, token_key: &str) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("grant store lock poisoned"))?;
        if let Some(set) = state.sets.get_mut(set_key) {
            set.remove(member);
        }
        state.strings.remove(token_key);
        Ok(())
    }

    async fn get_token(&self, token_key: &str) -> Result<Option<String>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("grant store lock poisoned"))?;
        Ok(state
            .strings
            .get(token_key)
            .filter(|entry| entry.live())
            .map(|entry| String::from_utf8_lossy(&entry.value).to_string()))
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("grant store lock poisoned"))?;
        Ok(state
            .sets
            .get(set_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}
