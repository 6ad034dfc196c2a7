//! Cache abstraction for consent state
//!
//! The grant commit and the revoke are multi-key operations that must be
//! atomic: either every key changes or none does. Implementations realize
//! this with a pipelined cache transaction (redis) or an internal lock
//! (memory).

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Cache a serialized requester profile under `key` with a TTL.
    async fn put_profile(&self, key: &str, profile: &[u8], ttl_secs: u64) -> Result<()>;

    /// Fetch a cached profile; `None` on miss or expiry.
    async fn get_profile(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Commit a grant atomically: set the access token with its TTL, add the
    /// requester to the patient's active set, read back the cached requester
    /// profile and refresh the set TTL. Returns the profile bytes when the
    /// profile is still cached.
    #[allow(clippy::too_many_arguments)]
    async fn commit_grant(
        &self,
        token_key: &str,
        token: &str,
        token_ttl_secs: u64,
        set_key: &str,
        member: &str,
        set_ttl_secs: u64,
        profile_key: &str,
    ) -> Result<Option<Vec<u8>>>;

    /// Atomically remove the requester from the active set and delete the
    /// access token.
    async fn revoke(&self, set_key: &str, member: &str, token_key: &str) -> Result<()>;

    /// Look up an access token; `None` on miss or expiry.
    async fn get_token(&self, token_key: &str) -> Result<Option<String>>;

    /// All members of an active set; empty when the set is absent or expired.
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>>;
}
