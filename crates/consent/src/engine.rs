//! Consent state machine over a grant store
//!
//! Pure request/grant/revoke/lookup logic; the gRPC facade handles
//! authentication and the ledger audit entry.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::keys::{
    ACTIVE_SET_TTL_SECS, REQUESTER_TTL_SECS, TOKEN_TTL_SECS, active_set_key_today, requester_key,
    token_key,
};
use crate::profile::RequesterProfile;
use crate::store::GrantStore;

#[derive(Clone)]
pub struct ConsentEngine {
    store: Arc<dyn GrantStore>,
}

impl ConsentEngine {
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self { store }
    }

    /// Record a pending request by caching the requester's profile. Valid
    /// before any grant exists.
    pub async fn record_request(&self, profile: &RequesterProfile) -> Result<()> {
        let bytes = profile.to_bytes()?;
        self.store
            .put_profile(&requester_key(&profile.id), &bytes, REQUESTER_TTL_SECS)
            .await?;
        debug!("Cached requester profile for {}", profile.id);
        Ok(())
    }

    /// Commit a grant atomically and return the cached requester profile
    /// when it is still present.
    pub async fn grant(
        &self,
        patient_id: &str,
        requester_id: &str,
        access_token: &str,
    ) -> Result<Option<RequesterProfile>> {
        let member = requester_key(requester_id);
        let profile_bytes = self
            .store
            .commit_grant(
                &token_key(patient_id, requester_id),
                access_token,
                TOKEN_TTL_SECS,
                &active_set_key_today(patient_id),
                &member,
                ACTIVE_SET_TTL_SECS,
                &member,
            )
            .await?;

        Ok(profile_bytes.and_then(|bytes| match RequesterProfile::from_bytes(&bytes) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Cached profile for {} is undecodable: {}", requester_id, e);
                None
            }
        }))
    }

    /// Remove the grant; equivalent in effect to TTL expiry.
    pub async fn revoke(&self, patient_id: &str, requester_id: &str) -> Result<()> {
        self.store
            .revoke(
                &active_set_key_today(patient_id),
                &requester_key(requester_id),
                &token_key(patient_id, requester_id),
            )
            .await
    }

    /// Look up the access token for a (patient, requester) pair. A miss is
    /// a normal outcome, not an error.
    pub async fn lookup(&self, patient_id: &str, requester_id: &str) -> Result<Option<String>> {
        self.store
            .get_token(&token_key(patient_id, requester_id))
            .await
    }

    /// Profiles of all requesters currently granted access. Members whose
    /// profile has expired under its own shorter TTL, or fails to decode,
    /// are silently skipped.
    pub async fn active(&self, patient_id: &str) -> Result<Vec<RequesterProfile>> {
        let members = self
            .store
            .set_members(&active_set_key_today(patient_id))
            .await?;

        let mut profiles = Vec::with_capacity(members.len());
        for member in members {
            match self.store.get_profile(&member).await {
                Ok(Some(bytes)) => match RequesterProfile::from_bytes(&bytes) {
                    Ok(profile) => profiles.push(profile),
                    Err(e) => debug!("Skipping undecodable profile {}: {}", member, e),
                },
                Ok(None) => debug!("Skipping expired profile {}", member),
                Err(e) => warn!("Profile fetch for {} failed: {}", member, e),
            }
        }
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGrantStore;

    fn profile(id: &str) -> RequesterProfile {
        RequesterProfile {
            id: id.to_string(),
            group: "INSURANCE".to_string(),
            display_name: "Acme Insurance".to_string(),
            organization: "Acme Group".to_string(),
        }
    }

    fn engine() -> (ConsentEngine, Arc<MemoryGrantStore>) {
        let store = Arc::new(MemoryGrantStore::new());
        (ConsentEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_grant_revoke_round_trip() {
        let (engine, _) = engine();
        engine.record_request(&profile("ins-1")).await.unwrap();

        engine.grant("pat-1", "ins-1", "token-abc").await.unwrap();
        assert_eq!(
            engine.lookup("pat-1", "ins-1").await.unwrap(),
            Some("token-abc".to_string())
        );

        engine.revoke("pat-1", "ins-1").await.unwrap();
        assert_eq!(engine.lookup("pat-1", "ins-1").await.unwrap(), None);
        assert!(engine.active("pat-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grant_returns_cached_profile() {
        let (engine, _) = engine();
        engine.record_request(&profile("ins-1")).await.unwrap();

        let cached = engine.grant("pat-1", "ins-1", "tok").await.unwrap();
        assert_eq!(cached, Some(profile("ins-1")));
    }

    #[tokio::test]
    async fn test_interrupted_grant_leaves_no_partial_state() {
        let (engine, store) = engine();
        engine.record_request(&profile("ins-1")).await.unwrap();

        store.fail_next_commit();
        assert!(engine.grant("pat-1", "ins-1", "tok").await.is_err());

        // Neither the token nor the set membership may be observable.
        assert_eq!(engine.lookup("pat-1", "ins-1").await.unwrap(), None);
        assert!(engine.active("pat-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_behaves_like_revocation() {
        let (engine, store) = engine();
        engine.record_request(&profile("ins-1")).await.unwrap();
        engine.grant("pat-1", "ins-1", "tok").await.unwrap();

        store.expire_now(&crate::keys::token_key("pat-1", "ins-1"));
        assert_eq!(engine.lookup("pat-1", "ins-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_active_skips_expired_profiles() {
        let (engine, store) = engine();
        engine.record_request(&profile("ins-1")).await.unwrap();
        engine.record_request(&profile("ins-2")).await.unwrap();
        engine.grant("pat-1", "ins-1", "tok1").await.unwrap();
        engine.grant("pat-1", "ins-2", "tok2").await.unwrap();

        // ins-2's profile lapses under its own TTL while its set membership
        // survives; the listing tolerates the stale member.
        store.expire_now(&crate::keys::requester_key("ins-2"));
        let active = engine.active("pat-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "ins-1");
    }

    #[tokio::test]
    async fn test_lookup_without_grant_is_a_miss_not_an_error() {
        let (engine, _) = engine();
        assert_eq!(engine.lookup("pat-1", "nobody").await.unwrap(), None);
    }
}
