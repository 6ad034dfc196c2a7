//! Requester display identity cached for the patient's benefit

use anyhow::{Result, anyhow};
use auth::{actor_from_str, actor_label};
use proto::Actor;
use serde::{Deserialize, Serialize};

/// Serialized under `requester:<requesterId>` so the patient can see who is
/// asking for access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub id: String,
    pub group: String,
    pub display_name: String,
    #[serde(default)]
    pub organization: String,
}

impl RequesterProfile {
    pub fn actor_group(&self) -> Actor {
        actor_from_str(&self.group)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| anyhow!("Failed to serialize profile: {}", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| anyhow!("Failed to deserialize profile: {}", e))
    }
}

impl From<proto::RequesterProfile> for RequesterProfile {
    fn from(p: proto::RequesterProfile) -> Self {
        Self {
            group: actor_label(p.group()).to_string(),
            id: p.id,
            display_name: p.display_name,
            organization: p.organization,
        }
    }
}

impl From<RequesterProfile> for proto::RequesterProfile {
    fn from(p: RequesterProfile) -> Self {
        let group = actor_from_str(&p.group);
        Self {
            id: p.id,
            group: group as i32,
            display_name: p.display_name,
            organization: p.organization,
        }
    }
}
