//! Hospital allow-map
//!
//! In-memory cache of hospitals currently permitted to author treatment
//! records, injected behind a trait so a multi-instance deployment can
//! swap in a shared cache. Inline insert/remove at mutation time is
//! authoritative; a periodic background task re-scans the ledger in bounded
//! pages and adds any registration it finds. The background task never
//! removes entries.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ledger_client::LedgerClient;
use proto::Operation;

/// Refresh interval for the background re-scan.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Page size used when re-scanning the ledger.
const REFRESH_PAGE_SIZE: i32 = 100;

#[async_trait]
pub trait OrgPermits: Send + Sync {
    async fn is_allowed(&self, org_id: &str) -> bool;
    async fn insert(&self, org_id: &str, display_name: &str);
    async fn remove(&self, org_id: &str);
    /// Add every entry in the batch; existing entries are refreshed, none
    /// are removed.
    async fn bulk_refresh(&self, entries: Vec<(String, String)>);
}

#[derive(Default)]
pub struct InMemoryOrgPermits {
    map: RwLock<HashMap<String, String>>,
}

impl InMemoryOrgPermits {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrgPermits for InMemoryOrgPermits {
    async fn is_allowed(&self, org_id: &str) -> bool {
        self.map.read().await.contains_key(org_id)
    }

    async fn insert(&self, org_id: &str, display_name: &str) {
        self.map
            .write()
            .await
            .insert(org_id.to_string(), display_name.to_string());
    }

    async fn remove(&self, org_id: &str) {
        self.map.write().await.remove(org_id);
    }

    async fn bulk_refresh(&self, entries: Vec<(String, String)>) {
        let mut map = self.map.write().await;
        for (id, name) in entries {
            map.insert(id, name);
        }
    }
}

/// A pageable source of permitted hospitals.
#[async_trait]
pub trait PermitSource: Send + Sync {
    /// Fetch one page of (org id, display name) entries; returns the
    /// entries plus the next page number, 0 when exhausted.
    async fn load_page(&self, page: i32) -> Result<(Vec<(String, String)>, i32)>;
}

/// Reads hospital registrations back out of the ledger chain.
pub struct LedgerPermitSource {
    client: LedgerClient,
}

impl LedgerPermitSource {
    pub fn new(client: LedgerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PermitSource for LedgerPermitSource {
    async fn load_page(&self, page: i32) -> Result<(Vec<(String, String)>, i32)> {
        let mut client = self.client.clone();
        let response = client.list_blocks(page, REFRESH_PAGE_SIZE).await?;

        let mut entries = Vec::new();
        for block in &response.blocks {
            let Some(transaction) = &block.transaction else {
                continue;
            };
            if transaction.operation() != Operation::AddHospital {
                continue;
            }
            if let Some(organization) = &transaction.organization {
                entries.push((organization.id.clone(), organization.display_name.clone()));
            }
        }
        Ok((entries, response.next_page))
    }
}

/// Run one full bounded-page scan of the source into the allow-map.
pub async fn refresh_once(permits: &dyn OrgPermits, source: &dyn PermitSource) -> Result<usize> {
    let mut page = 1;
    let mut loaded = 0;
    loop {
        let (entries, next_page) = source.load_page(page).await?;
        loaded += entries.len();
        permits.bulk_refresh(entries).await;
        if next_page <= 0 {
            break;
        }
        page = next_page;
    }
    Ok(loaded)
}

/// Periodic allow-map refresh. Errors are logged and the next tick retried.
pub fn spawn_refresh_task(
    permits: Arc<dyn OrgPermits>,
    source: Arc<dyn PermitSource>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match refresh_once(permits.as_ref(), source.as_ref()).await {
                Ok(loaded) => {
                    debug!("Permit refresh loaded {} hospital entries", loaded);
                    if loaded > 0 {
                        info!("Hospital allow-map refreshed ({} entries seen)", loaded);
                    }
                }
                Err(e) => warn!("Permit refresh failed, will retry next interval: {}", e),
            }
        }
    })
}
