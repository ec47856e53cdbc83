//! Record store abstraction.
//!
//! The engine only requires overwrite-by-id puts that are durable before
//! returning, and gets that reflect the last successful put. Two record
//! sets are kept: requests-by-id and claims-by-id. No foreign keys beyond
//! the engine's own invariant checks.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::fmt;

use async_trait::async_trait;

use whiteflag_core::{Claim, ClaimId, EngineError, Request, RequestId};

/// Storage failure. The engine does not retry; it surfaces these as
/// `Unavailable` and leaves recovery to the backend.
#[derive(Debug, Clone)]
pub struct StoreError {
    op: String,
    detail: String,
}

impl StoreError {
    pub fn storage(op: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store operation '{}' failed: {}", self.op, self.detail)
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::unavailable(err.to_string())
    }
}

/// Durable key-value persistence for requests and claims.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError>;

    /// Upsert by id. Must be durable before returning.
    async fn put_request(&self, request: &Request) -> Result<(), StoreError>;

    async fn get_all_requests(&self) -> Result<Vec<Request>, StoreError>;

    async fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError>;

    async fn put_claim(&self, claim: &Claim) -> Result<(), StoreError>;

    async fn get_all_claims(&self) -> Result<Vec<Claim>, StoreError>;
}
