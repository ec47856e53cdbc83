//! Startup reconciliation.
//!
//! Armed timers do not survive a restart, so before the process serves
//! anything it walks every stored record and repairs the timer table:
//! windows that lapsed while the process was down are fast-forwarded to
//! their terminal state, and windows still open get their timers re-armed
//! from the persisted deadlines. A warning whose due time passed during
//! the outage is armed with zero delay; the one-shot marker keeps it from
//! repeating if it already fired in a previous life.
//!
//! The sweep runs exactly once, before any command is accepted, which is
//! why it can mutate records without taking the per-record locks.

use std::sync::Arc;

use tracing::info;

use whiteflag_core::{EngineError, RequestStatus};

use crate::engine::Engine;
use crate::notify::BountyCloseReason;

/// What one sweep did, for the startup log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub protections_expired: usize,
    pub protections_rearmed: usize,
    pub bounties_expired: usize,
    pub bounties_rearmed: usize,
}

/// Walk all records, fast-forward overdue windows, re-arm live ones.
pub async fn run_startup_sweep(engine: &Arc<Engine>) -> Result<SweepSummary, EngineError> {
    let now = engine.now();
    let mut summary = SweepSummary::default();

    for mut request in engine.store.get_all_requests().await? {
        if request.protection_overdue_at(now) {
            request.status = RequestStatus::Expired;
            request.expired_at = Some(now);
            engine.store.put_request(&request).await?;
            info!(
                "sweep: protection on request {} lapsed while down, marked expired",
                request.id
            );
            engine.notifier.request_expired(&request).await;
            summary.protections_expired += 1;
        } else if request.protection_live_at(now) {
            if let Some(ends_at) = request.protection_ends_at() {
                engine.arm_window_timers(request.id, ends_at, request.warned_at.is_some());
                summary.protections_rearmed += 1;
            }
        } else if request.bounty.as_ref().is_some_and(|b| b.overdue_at(now)) {
            if let Some(bounty) = request.bounty.as_mut() {
                bounty.active = false;
                bounty.expired_at = Some(now);
            }
            engine.store.put_request(&request).await?;
            info!(
                "sweep: bounty on request {} lapsed while down, marked expired",
                request.id
            );
            engine
                .notifier
                .bounty_closed(&request, BountyCloseReason::Expired)
                .await;
            summary.bounties_expired += 1;
        } else if let Some((ends_at, warned)) = request
            .active_bounty()
            .map(|b| (b.ends_at, b.warned_at.is_some()))
        {
            engine.arm_window_timers(request.id, ends_at, warned);
            summary.bounties_rearmed += 1;
        }
    }

    info!(
        "startup sweep complete: {} protections expired, {} re-armed; {} bounties expired, {} re-armed",
        summary.protections_expired,
        summary.protections_rearmed,
        summary.bounties_expired,
        summary.bounties_rearmed
    );
    Ok(summary)
}
