//! Lifecycle state machine.
//!
//! The engine is the sole writer of request and claim fields. Every
//! operation follows the same discipline: take the per-record lock, load
//! the latest record from the store, validate the guard, mutate, write
//! back. Timer callbacks re-enter through the handlers at the bottom of
//! this file and obey the same discipline, so a record mutated between
//! arming and firing turns the callback into a no-op instead of a double
//! transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use whiteflag_core::{
    bounty_window, protection_window, warning_lead, Bounty, Claim, ClaimFields, ClaimId,
    ClaimStatus, EngineError, Request, RequestDetails, RequestId, RequestStatus, TribeKey,
};

use crate::clock::Clock;
use crate::notify::{BountyCloseReason, Notifier, WarningKind};
use crate::scheduler::{TimerKey, TimerKind, TimerScheduler};
use crate::store::RecordStore;

/// The lifecycle engine. Construct once with [`Engine::new`] and share the
/// returned `Arc`; timer callbacks hold only a weak reference, so dropping
/// the last strong handle stops everything.
pub struct Engine {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) timers: TimerScheduler,
    /// Per-record locks serializing read-validate-mutate-write sequences.
    record_locks: RwLock<HashMap<RequestId, Arc<Mutex<()>>>>,
    /// Serializes record creation, which must scan for duplicates before
    /// inserting and therefore cannot rely on a per-record lock.
    create_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            notifier,
            clock,
            timers: TimerScheduler::new(),
            record_locks: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        })
    }

    pub fn timers(&self) -> &TimerScheduler {
        &self.timers
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Get or create the lock for a record id.
    async fn record_lock(&self, id: RequestId) -> Arc<Mutex<()>> {
        {
            let locks = self.record_locks.read().await;
            if let Some(lock) = locks.get(&id) {
                return lock.clone();
            }
        }

        let mut locks = self.record_locks.write().await;
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn delay_until(&self, at: DateTime<Utc>) -> StdDuration {
        (at - self.clock.now()).to_std().unwrap_or(StdDuration::ZERO)
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Submit a protection application. Fails `Conflict` if the requester
    /// already has a pending request, if the tribe already has one pending,
    /// or if the tribe is already under live protection.
    pub async fn submit_request(
        self: &Arc<Self>,
        tribe_name: &str,
        requested_by: &str,
        details: RequestDetails,
    ) -> Result<Request, EngineError> {
        let key = TribeKey::normalize(tribe_name);
        if key.is_empty() {
            return Err(EngineError::validation("tribe name is required"));
        }
        if requested_by.trim().is_empty() {
            return Err(EngineError::validation("requester is required"));
        }

        let _create = self.create_lock.lock().await;
        let now = self.clock.now();
        let all = self.store.get_all_requests().await?;

        if all
            .iter()
            .any(|r| r.status == RequestStatus::Pending && r.requested_by == requested_by)
        {
            return Err(EngineError::conflict(format!(
                "{} already has a pending request",
                requested_by
            )));
        }
        if all
            .iter()
            .any(|r| r.status == RequestStatus::Pending && r.tribe_key == key)
        {
            return Err(EngineError::conflict(format!(
                "a pending request for '{}' already exists",
                key
            )));
        }
        if let Some(ends) = all
            .iter()
            .filter(|r| r.tribe_key == key && r.protection_live_at(now))
            .find_map(|r| r.protection_ends_at())
        {
            return Err(EngineError::conflict(format!(
                "tribe '{}' already has an active protection ending at {}",
                key, ends
            )));
        }

        let request = Request::submitted(tribe_name, requested_by, details, now);
        self.store.put_request(&request).await?;
        info!("request {} submitted for tribe '{}'", request.id, key);
        Ok(request)
    }

    /// Approve a pending request. The protection-uniqueness check is
    /// repeated here, not just at submission, to close the submit→approve
    /// race between two requests for the same tribe.
    pub async fn approve_request(
        self: &Arc<Self>,
        id: RequestId,
        actor: &str,
    ) -> Result<Request, EngineError> {
        let lock = self.record_lock(id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut request = self.load_request(id).await?;
        match request.status {
            RequestStatus::Pending => {}
            RequestStatus::Approved => {
                return Err(EngineError::already_in_state("request is already approved"));
            }
            status => {
                return Err(EngineError::conflict(format!(
                    "cannot approve a request in status {}",
                    status
                )));
            }
        }

        let all = self.store.get_all_requests().await?;
        if let Some(ends) = all
            .iter()
            .filter(|r| r.id != id && r.tribe_key == request.tribe_key && r.protection_live_at(now))
            .find_map(|r| r.protection_ends_at())
        {
            return Err(EngineError::conflict(format!(
                "tribe '{}' already has an active protection ending at {}",
                request.tribe_key, ends
            )));
        }

        request.status = RequestStatus::Approved;
        request.approved_by = Some(actor.to_string());
        request.approved_at = Some(now);
        self.store.put_request(&request).await?;

        self.arm_window_timers(id, now + protection_window(), request.warned_at.is_some());
        info!("request {} approved by {}", id, actor);
        self.notifier.request_approved(&request).await;
        Ok(request)
    }

    /// Deny a pending request. Terminal; pending requests carry no timers.
    pub async fn deny_request(
        self: &Arc<Self>,
        id: RequestId,
        actor: &str,
    ) -> Result<Request, EngineError> {
        let lock = self.record_lock(id).await;
        let _guard = lock.lock().await;

        let mut request = self.load_request(id).await?;
        match request.status {
            RequestStatus::Pending => {}
            RequestStatus::Denied => {
                return Err(EngineError::already_in_state("request is already denied"));
            }
            status => {
                return Err(EngineError::conflict(format!(
                    "cannot deny a request in status {}",
                    status
                )));
            }
        }

        request.status = RequestStatus::Denied;
        request.denied_by = Some(actor.to_string());
        request.denied_at = Some(self.clock.now());
        self.store.put_request(&request).await?;

        info!("request {} denied by {}", id, actor);
        self.notifier.request_denied(&request).await;
        Ok(request)
    }

    /// Forcibly end an approved protection. Cancels its timers and opens a
    /// bounty window in the same transition. If the tribe somehow already
    /// carries an active bounty on another record, that bounty is refreshed
    /// instead of issuing a second one, preserving bounty uniqueness.
    pub async fn end_request_early(
        self: &Arc<Self>,
        id: RequestId,
        actor: &str,
        reason: &str,
    ) -> Result<Request, EngineError> {
        // The host scan below decides whether a bounty gets created, so it
        // must be serialized with add_or_refresh_bounty. Lock order is
        // creation lock first, record locks second, everywhere.
        let _create = self.create_lock.lock().await;
        let lock = self.record_lock(id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut request = self.load_request(id).await?;
        match request.status {
            RequestStatus::Approved => {}
            RequestStatus::EndedEarly => {
                return Err(EngineError::already_in_state("request was already ended early"));
            }
            status => {
                return Err(EngineError::conflict(format!(
                    "cannot end a request in status {}",
                    status
                )));
            }
        }

        request.status = RequestStatus::EndedEarly;
        request.ended_early_by = Some(actor.to_string());
        request.ended_early_at = Some(now);

        let all = self.store.get_all_requests().await?;
        let existing_host = find_active_bounty_host(&all, &request.tribe_key)
            .map(|r| r.id)
            .filter(|host_id| *host_id != id);

        match existing_host {
            Some(host_id) => {
                // Rare: a manually-issued bounty already exists for the
                // tribe. Persist the early end, then refresh that bounty.
                self.store.put_request(&request).await?;
                // Disarm only after the write stuck; a failed put leaves
                // the still-live record with its timers intact.
                self.timers.disarm_record(id);
                info!("request {} ended early by {}", id, actor);
                self.notifier.request_ended_early(&request).await;
                self.refresh_bounty_on(host_id).await?;
            }
            None => {
                request.bounty = Some(Bounty::issued(actor, reason, now));
                self.store.put_request(&request).await?;
                // Replaces both protection timers with the bounty's.
                self.arm_window_timers(id, now + bounty_window(), false);
                info!("request {} ended early by {}; bounty opened", id, actor);
                self.notifier.request_ended_early(&request).await;
                self.notifier.bounty_issued(&request).await;
            }
        }

        self.load_request(id).await
    }

    /// Issue a bounty on a tribe, or extend the window of the one already
    /// active. `target` is either a request id or a tribe name. The refresh
    /// path is idempotent: it moves `ends_at` forward in place and never
    /// creates a duplicate record.
    pub async fn add_or_refresh_bounty(
        self: &Arc<Self>,
        target: &str,
        actor: &str,
        reason: &str,
    ) -> Result<Request, EngineError> {
        let _create = self.create_lock.lock().await;

        let (key, display_name) = self.resolve_target(target).await?;
        let now = self.clock.now();
        let all = self.store.get_all_requests().await?;

        if let Some(host) = find_active_bounty_host(&all, &key) {
            let host_id = host.id;
            self.refresh_bounty_on(host_id).await?;
            return self.load_request(host_id).await;
        }

        let request = Request::bounty_only(&display_name, Bounty::issued(actor, reason, now), now);
        self.store.put_request(&request).await?;
        self.arm_window_timers(request.id, now + bounty_window(), false);
        info!("bounty opened on tribe '{}' ({})", key, request.id);
        self.notifier.bounty_issued(&request).await;
        Ok(request)
    }

    /// Close an active bounty without a successful claim.
    pub async fn remove_bounty(
        self: &Arc<Self>,
        target: &str,
        actor: &str,
    ) -> Result<Request, EngineError> {
        let (key, _) = self.resolve_target(target).await?;
        let all = self.store.get_all_requests().await?;
        let host_id = find_active_bounty_host(&all, &key)
            .map(|r| r.id)
            .ok_or_else(|| EngineError::not_found(format!("active bounty for tribe '{}'", key)))?;

        let lock = self.record_lock(host_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut request = self.load_request(host_id).await?;
        let Some(bounty) = request.active_bounty_mut() else {
            return Err(EngineError::already_in_state("bounty is already closed"));
        };

        bounty.active = false;
        bounty.removed_by = Some(actor.to_string());
        bounty.removed_at = Some(now);
        bounty.locked = false;
        bounty.locked_by_claim_id = None;

        self.store.put_request(&request).await?;
        self.timers.disarm_record(host_id);
        info!("bounty on request {} removed by {}", host_id, actor);
        self.notifier
            .bounty_closed(&request, BountyCloseReason::Removed)
            .await;
        Ok(request)
    }

    /// Submit a fulfilment claim against an active, unlocked bounty.
    /// Locks the bounty so no second claim can enter until this one is
    /// adjudicated.
    pub async fn submit_claim(
        self: &Arc<Self>,
        bounty_id: RequestId,
        submitted_by: &str,
        fields: ClaimFields,
    ) -> Result<Claim, EngineError> {
        if fields.claimant_tag.trim().is_empty() {
            return Err(EngineError::validation("claimant tag is required"));
        }
        if fields.target_tag.trim().is_empty() {
            return Err(EngineError::validation("target tag is required"));
        }
        if fields.proof.trim().is_empty() {
            return Err(EngineError::validation("proof is required"));
        }

        let lock = self.record_lock(bounty_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut request = self.load_request(bounty_id).await?;
        let Some(bounty) = request.bounty.as_ref() else {
            return Err(EngineError::conflict("request carries no bounty"));
        };
        if !bounty.active {
            return Err(EngineError::conflict("bounty is closed"));
        }
        if bounty.ends_at <= now {
            return Err(EngineError::conflict(format!(
                "bounty ended at {}",
                bounty.ends_at
            )));
        }
        if bounty.locked {
            return Err(EngineError::conflict(
                "a claim is already pending for this bounty",
            ));
        }

        let claim = Claim::submitted(
            bounty_id,
            request.tribe_key.clone(),
            submitted_by,
            fields,
            now,
        );
        self.store.put_claim(&claim).await?;

        if let Some(bounty) = request.active_bounty_mut() {
            bounty.locked = true;
            bounty.locked_by_claim_id = Some(claim.id);
        }
        self.store.put_request(&request).await?;

        info!("claim {} submitted against request {}", claim.id, bounty_id);
        self.notifier.claim_submitted(&claim).await;
        Ok(claim)
    }

    /// Approve a pending claim: the bounty is fulfilled and closes, staying
    /// locked permanently.
    pub async fn approve_claim(
        self: &Arc<Self>,
        claim_id: ClaimId,
        actor: &str,
    ) -> Result<Claim, EngineError> {
        let probe = self.load_claim(claim_id).await?;
        let lock = self.record_lock(probe.bounty_request_id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; the claim may have been adjudicated in
        // the meantime.
        let now = self.clock.now();
        let mut claim = self.load_claim(claim_id).await?;
        match claim.status {
            ClaimStatus::Pending => {}
            ClaimStatus::Approved => {
                return Err(EngineError::already_in_state("claim is already approved"));
            }
            ClaimStatus::Denied => {
                return Err(EngineError::conflict("claim was already denied"));
            }
        }

        let mut request = self.load_request(claim.bounty_request_id).await?;
        if request.active_bounty().is_none() {
            return Err(EngineError::conflict(
                "bounty is no longer active; claim is moot",
            ));
        }

        claim.status = ClaimStatus::Approved;
        claim.approved_by = Some(actor.to_string());
        claim.approved_at = Some(now);
        self.store.put_claim(&claim).await?;

        if let Some(bounty) = request.active_bounty_mut() {
            bounty.active = false;
            bounty.claimed_at = Some(now);
            bounty.claimed_by = Some(claim.submitted_by.clone());
            // locked stays true: the bounty is closed, not re-claimable.
        }

        self.store.put_request(&request).await?;
        self.timers.disarm_record(request.id);

        info!("claim {} approved by {}", claim_id, actor);
        self.notifier.claim_adjudicated(&claim).await;
        self.notifier
            .bounty_closed(&request, BountyCloseReason::Claimed)
            .await;
        Ok(claim)
    }

    /// Deny a pending claim and release the bounty lock so another claim
    /// may be submitted, provided the window is still open.
    pub async fn deny_claim(
        self: &Arc<Self>,
        claim_id: ClaimId,
        actor: &str,
    ) -> Result<Claim, EngineError> {
        let probe = self.load_claim(claim_id).await?;
        let lock = self.record_lock(probe.bounty_request_id).await;
        let _guard = lock.lock().await;

        let mut claim = self.load_claim(claim_id).await?;
        match claim.status {
            ClaimStatus::Pending => {}
            ClaimStatus::Denied => {
                return Err(EngineError::already_in_state("claim is already denied"));
            }
            ClaimStatus::Approved => {
                return Err(EngineError::conflict("claim was already approved"));
            }
        }

        claim.status = ClaimStatus::Denied;
        claim.denied_by = Some(actor.to_string());
        claim.denied_at = Some(self.clock.now());
        self.store.put_claim(&claim).await?;

        let mut request = self.load_request(claim.bounty_request_id).await?;
        if let Some(bounty) = request.bounty.as_mut() {
            if bounty.locked_by_claim_id == Some(claim_id) {
                bounty.locked = false;
                bounty.locked_by_claim_id = None;
                self.store.put_request(&request).await?;
            }
        }

        info!("claim {} denied by {}", claim_id, actor);
        self.notifier.claim_adjudicated(&claim).await;
        Ok(claim)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_request(&self, id: RequestId) -> Result<Request, EngineError> {
        self.load_request(id).await
    }

    pub async fn get_claim(&self, id: ClaimId) -> Result<Claim, EngineError> {
        self.load_claim(id).await
    }

    /// Every stored request, unordered. For interaction layers that list
    /// state; the engine itself only scans inside its own operations.
    pub async fn list_requests(&self) -> Result<Vec<Request>, EngineError> {
        Ok(self.store.get_all_requests().await?)
    }

    // =========================================================================
    // Timer arming
    // =========================================================================

    /// Arm the expiry timer for a window ending at `ends_at`, and the
    /// warning timer unless the one-shot warning already fired. A warning
    /// time in the past arms with zero delay; it still runs asynchronously.
    pub(crate) fn arm_window_timers(
        self: &Arc<Self>,
        id: RequestId,
        ends_at: DateTime<Utc>,
        already_warned: bool,
    ) {
        let weak = Arc::downgrade(self);
        self.timers.arm(
            TimerKey::new(id, TimerKind::Expiry),
            self.delay_until(ends_at),
            async move {
                if let Some(engine) = weak.upgrade() {
                    engine.expiry_fired(id).await;
                }
            },
        );

        if !already_warned {
            let weak = Arc::downgrade(self);
            self.timers.arm(
                TimerKey::new(id, TimerKind::Warning),
                self.delay_until(ends_at - warning_lead()),
                async move {
                    if let Some(engine) = weak.upgrade() {
                        engine.warning_fired(id).await;
                    }
                },
            );
        }
    }

    // =========================================================================
    // Timer handlers
    // =========================================================================

    /// Expiry timer callback. Errors are logged and swallowed; a missed
    /// terminal transition is recovered by the next startup sweep.
    pub(crate) async fn expiry_fired(self: &Arc<Self>, id: RequestId) {
        if let Err(e) = self.handle_expiry(id).await {
            warn!("expiry timer for {} could not apply: {}", id, e);
        }
    }

    async fn handle_expiry(self: &Arc<Self>, id: RequestId) -> Result<(), EngineError> {
        let lock = self.record_lock(id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let Some(mut request) = self.store.get_request(&id).await? else {
            return Ok(());
        };

        if request.protection_overdue_at(now) {
            request.status = RequestStatus::Expired;
            request.expired_at = Some(now);
            self.store.put_request(&request).await?;
            self.timers.disarm(&TimerKey::new(id, TimerKind::Warning));
            info!("protection on request {} expired", id);
            self.notifier.request_expired(&request).await;
        } else if request.bounty.as_ref().is_some_and(|b| b.overdue_at(now)) {
            if let Some(bounty) = request.bounty.as_mut() {
                bounty.active = false;
                bounty.expired_at = Some(now);
            }
            self.store.put_request(&request).await?;
            self.timers.disarm(&TimerKey::new(id, TimerKind::Warning));
            info!("bounty on request {} expired", id);
            self.notifier
                .bounty_closed(&request, BountyCloseReason::Expired)
                .await;
        }
        // Otherwise the record was mutated between arming and firing and
        // the guard no longer holds: no-op.

        Ok(())
    }

    /// Warning timer callback. Sets the one-shot `warned_at` marker; a
    /// record that was already warned, or whose window has since closed,
    /// makes this a no-op.
    pub(crate) async fn warning_fired(self: &Arc<Self>, id: RequestId) {
        if let Err(e) = self.handle_warning(id).await {
            warn!("warning timer for {} could not apply: {}", id, e);
        }
    }

    async fn handle_warning(self: &Arc<Self>, id: RequestId) -> Result<(), EngineError> {
        let lock = self.record_lock(id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let Some(mut request) = self.store.get_request(&id).await? else {
            return Ok(());
        };

        if request.protection_live_at(now)
            && request.warned_at.is_none()
            && request
                .protection_ends_at()
                .is_some_and(|ends| ends - warning_lead() <= now)
        {
            request.warned_at = Some(now);
            self.store.put_request(&request).await?;
            self.notifier
                .warning(&request, WarningKind::ProtectionEnding)
                .await;
        } else if request
            .active_bounty()
            .is_some_and(|b| b.ends_at > now && b.warned_at.is_none() && b.ends_at - warning_lead() <= now)
        {
            if let Some(bounty) = request.active_bounty_mut() {
                bounty.warned_at = Some(now);
            }
            self.store.put_request(&request).await?;
            self.notifier
                .warning(&request, WarningKind::BountyEnding)
                .await;
        }

        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load_request(&self, id: RequestId) -> Result<Request, EngineError> {
        self.store
            .get_request(&id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("request {}", id)))
    }

    async fn load_claim(&self, id: ClaimId) -> Result<Claim, EngineError> {
        self.store
            .get_claim(&id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("claim {}", id)))
    }

    /// Resolve a `tribeKeyOrId` target into a tribe key plus a display
    /// name for any record we might create.
    async fn resolve_target(&self, target: &str) -> Result<(TribeKey, String), EngineError> {
        if let Ok(id) = target.parse::<RequestId>() {
            if let Some(request) = self.store.get_request(&id).await? {
                return Ok((request.tribe_key.clone(), request.tribe_name));
            }
            return Err(EngineError::not_found(format!("request {}", id)));
        }

        let key = TribeKey::normalize(target);
        if key.is_empty() {
            return Err(EngineError::validation("tribe name is required"));
        }
        Ok((key, target.trim().to_string()))
    }

    /// Extend the active bounty on `host_id` to a fresh full window and
    /// re-arm its timers. The warning stays one-shot: an already-warned
    /// bounty does not warn again after a refresh.
    async fn refresh_bounty_on(self: &Arc<Self>, host_id: RequestId) -> Result<(), EngineError> {
        let lock = self.record_lock(host_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut request = self.load_request(host_id).await?;
        let Some(bounty) = request.active_bounty_mut() else {
            // Raced with removal/claim between lookup and lock.
            return Err(EngineError::conflict("bounty is no longer active"));
        };

        bounty.ends_at = now + bounty_window();
        let warned = bounty.warned_at.is_some();
        let ends_at = bounty.ends_at;
        self.store.put_request(&request).await?;

        self.arm_window_timers(host_id, ends_at, warned);
        info!("bounty on request {} refreshed until {}", host_id, ends_at);
        self.notifier.bounty_issued(&request).await;
        Ok(())
    }
}

/// Pick the authoritative active-bounty host for a tribe: the record with
/// the most recent `started_at`, ties broken by larger id so the choice is
/// deterministic across scans.
pub(crate) fn find_active_bounty_host<'a>(
    requests: &'a [Request],
    key: &TribeKey,
) -> Option<&'a Request> {
    requests
        .iter()
        .filter(|r| r.tribe_key == *key && r.bounty.as_ref().is_some_and(|b| b.active))
        .max_by_key(|r| (r.bounty.as_ref().map(|b| b.started_at), r.id))
}
