//! MediChain patient permission / consent engine
//!
//! Cache-backed request -> grant -> revoke lifecycle gating third-party
//! access to ledger-recorded treatment data. Grants live as cache entries
//! with independent TTLs; the ledger records only the durable audit trail
//! of each grant. The multi-key grant commit is a single atomic cache
//! transaction so a partial grant is never observable.

pub mod engine;
pub mod keys;
pub mod memory;
pub mod notify;
pub mod profile;
pub mod redis_store;
pub mod service;
pub mod store;

pub use engine::ConsentEngine;
pub use memory::MemoryGrantStore;
pub use notify::Notifier;
pub use profile::RequesterProfile;
pub use redis_store::RedisGrantStore;
pub use service::PatientPermissionServiceImpl;
pub use store::GrantStore;
