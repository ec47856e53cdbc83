//! Notification dispatch seam.
//!
//! The engine announces lifecycle outcomes through this trait and moves on:
//! dispatch is fire-and-forget and implementations must not let failures
//! propagate back into engine state. The real chat-layer implementation
//! lives outside this crate; here we ship a tracing-backed logger and a
//! recording double for tests.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use whiteflag_core::{Claim, Request};

/// Which window the pre-expiry warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    ProtectionEnding,
    BountyEnding,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtectionEnding => write!(f, "protection ending"),
            Self::BountyEnding => write!(f, "bounty ending"),
        }
    }
}

/// Why a bounty stopped accepting claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BountyCloseReason {
    Claimed,
    Removed,
    Expired,
}

impl fmt::Display for BountyCloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claimed => write!(f, "claimed"),
            Self::Removed => write!(f, "removed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Outbound announcement callbacks. All fire-and-forget.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn request_approved(&self, request: &Request);
    async fn request_denied(&self, request: &Request);
    async fn request_expired(&self, request: &Request);
    async fn request_ended_early(&self, request: &Request);
    async fn warning(&self, request: &Request, kind: WarningKind);
    async fn bounty_issued(&self, request: &Request);
    async fn bounty_closed(&self, request: &Request, reason: BountyCloseReason);
    async fn claim_submitted(&self, claim: &Claim);
    async fn claim_adjudicated(&self, claim: &Claim);
}

/// Notifier that only logs. Stands in when no chat layer is wired up.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn request_approved(&self, request: &Request) {
        info!("protection approved for '{}' ({})", request.tribe_name, request.id);
    }

    async fn request_denied(&self, request: &Request) {
        info!("protection denied for '{}' ({})", request.tribe_name, request.id);
    }

    async fn request_expired(&self, request: &Request) {
        info!("protection expired for '{}' ({})", request.tribe_name, request.id);
    }

    async fn request_ended_early(&self, request: &Request) {
        info!("protection ended early for '{}' ({})", request.tribe_name, request.id);
    }

    async fn warning(&self, request: &Request, kind: WarningKind) {
        info!("{} warning for '{}' ({})", kind, request.tribe_name, request.id);
    }

    async fn bounty_issued(&self, request: &Request) {
        info!("bounty issued on '{}' ({})", request.tribe_name, request.id);
    }

    async fn bounty_closed(&self, request: &Request, reason: BountyCloseReason) {
        info!(
            "bounty on '{}' closed: {} ({})",
            request.tribe_name, reason, request.id
        );
    }

    async fn claim_submitted(&self, claim: &Claim) {
        info!("claim {} submitted against {}", claim.id, claim.bounty_request_id);
    }

    async fn claim_adjudicated(&self, claim: &Claim) {
        info!("claim {} adjudicated: {}", claim.id, claim.status);
    }
}

/// Recorded notification, for asserting dispatch counts in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Approved(String),
    Denied(String),
    Expired(String),
    EndedEarly(String),
    Warning(String, WarningKind),
    BountyIssued(String),
    BountyClosed(String, BountyCloseReason),
    ClaimSubmitted(String),
    ClaimAdjudicated(String),
}

/// Test double that records every dispatched notification.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub fn count_warnings(&self) -> usize {
        self.sent()
            .iter()
            .filter(|n| matches!(n, Notification::Warning(..)))
            .count()
    }

    fn record(&self, notification: Notification) {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn request_approved(&self, request: &Request) {
        self.record(Notification::Approved(request.id.to_string()));
    }

    async fn request_denied(&self, request: &Request) {
        self.record(Notification::Denied(request.id.to_string()));
    }

    async fn request_expired(&self, request: &Request) {
        self.record(Notification::Expired(request.id.to_string()));
    }

    async fn request_ended_early(&self, request: &Request) {
        self.record(Notification::EndedEarly(request.id.to_string()));
    }

    async fn warning(&self, request: &Request, kind: WarningKind) {
        self.record(Notification::Warning(request.id.to_string(), kind));
    }

    async fn bounty_issued(&self, request: &Request) {
        self.record(Notification::BountyIssued(request.id.to_string()));
    }

    async fn bounty_closed(&self, request: &Request, reason: BountyCloseReason) {
        self.record(Notification::BountyClosed(request.id.to_string(), reason));
    }

    async fn claim_submitted(&self, claim: &Claim) {
        self.record(Notification::ClaimSubmitted(claim.id.to_string()));
    }

    async fn claim_adjudicated(&self, claim: &Claim) {
        self.record(Notification::ClaimAdjudicated(claim.id.to_string()));
    }
}
