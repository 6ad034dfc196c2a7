//! Redis-backed grant store
//!
//! Multi-key operations run as MULTI/EXEC pipelines over a multiplexed
//! connection, so a grant or revoke is applied in full or not at all.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use crate::store::GrantStore;

pub struct RedisGrantStore {
    client: redis::Client,
}

impl RedisGrantStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow!("Invalid redis url: {}", e))?;
        info!("Consent cache configured at {}", redis_url);
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("redis connect failed: {}", e))
    }
}

#[async_trait]
impl GrantStore for RedisGrantStore {
    async fn put_profile(&self, key: &str, profile: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(key, profile, ttl_secs)
            .await
            .map_err(|e| anyhow!("profile cache failed: {}", e))?;
        Ok(())
    }

    async fn get_profile(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let profile: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| anyhow!("profile read failed: {}", e))?;
        Ok(profile)
    }

    async fn commit_grant(
        &self,
        token_key: &str,
        token: &str,
        token_ttl_secs: u64,
        set_key: &str,
        member: &str,
        set_ttl_secs: u64,
        profile_key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;

        debug!("Committing grant for {} under {}", member, set_key);

        // All four commands commit together or none do.
        let (_set, _added, profile, _expired): (redis::Value, i64, Option<Vec<u8>>, i64) =
            redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(token_key)
                .arg(token)
                .arg("EX")
                .arg(token_ttl_secs)
                .cmd("SADD")
                .arg(set_key)
                .arg(member)
                .cmd("GET")
                .arg(profile_key)
                .cmd("EXPIRE")
                .arg(set_key)
                .arg(set_ttl_secs)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow!("grant transaction failed: {}", e))?;

        Ok(profile)
    }

    async fn revoke(&self, set_key: &str, member: &str, token_key: &str) -> Result<()> {
        let mut conn = self.conn().await?;

        let (_removed, _deleted): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(set_key)
            .arg(member)
            .cmd("DEL")
            .arg(token_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("revoke transaction failed: {}", e))?;

        Ok(())
    }

    async fn get_token(&self, token_key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let token: Option<String> = conn
            .get(token_key)
            .await
            .map_err(|e| anyhow!("token read failed: {}", e))?;
        Ok(token)
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .smembers(set_key)
            .await
            .map_err(|e| anyhow!("set read failed: {}", e))?;
        Ok(members)
    }
}
