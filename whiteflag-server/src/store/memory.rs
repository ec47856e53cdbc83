//! In-memory implementation of [`RecordStore`].
//!
//! Records live in `HashMap`s behind `RwLock`s and are lost on restart.
//! Used by tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use whiteflag_core::{Claim, ClaimId, Request, RequestId};

use super::{RecordStore, StoreError};

/// In-memory record store.
#[derive(Default)]
pub struct MemoryStore {
    requests: RwLock<HashMap<RequestId, Request>>,
    claims: RwLock<HashMap<ClaimId, Claim>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.get(id).cloned())
    }

    async fn put_request(&self, request: &Request) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_all_requests(&self) -> Result<Vec<Request>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.values().cloned().collect())
    }

    async fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError> {
        let claims = self.claims.read().await;
        Ok(claims.get(id).cloned())
    }

    async fn put_claim(&self, claim: &Claim) -> Result<(), StoreError> {
        let mut claims = self.claims.write().await;
        claims.insert(claim.id, claim.clone());
        Ok(())
    }

    async fn get_all_claims(&self) -> Result<Vec<Claim>, StoreError> {
        let claims = self.claims.read().await;
        Ok(claims.values().cloned().collect())
    }
}
