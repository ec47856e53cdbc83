//! Record types for the protection/bounty lifecycle.
//!
//! Following the principle of "make illegal states unrepresentable" where
//! the data allows it: statuses are closed enums with predicate methods,
//! identifiers are newtypes so a claim id cannot be passed where a request
//! id is expected, and the tribe key can only be built through
//! normalization.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{bounty_window, protection_window};

/// Newtype for a protection request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Newtype for a claim identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized tribe identity used for uniqueness checks.
///
/// The display name stays on the record (`tribe_name`); this key is the
/// trimmed, lower-cased, whitespace-collapsed form that two spellings of
/// the same tribe reduce to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TribeKey(String);

impl TribeKey {
    /// Normalize a display name into a key.
    pub fn normalize(name: &str) -> Self {
        let collapsed = name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Self(collapsed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when normalization left nothing behind (blank input).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TribeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a protection request.
///
/// `Denied` and `Expired` are terminal. `EndedEarly` and `BountyOnly` are
/// stable hosts for an embedded [`Bounty`] and take no further protection
/// transitions of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    EndedEarly,
    BountyOnly,
}

impl RequestStatus {
    /// Returns true for statuses that accept no further transitions at all.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied | Self::Expired)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::EndedEarly => "ended_early",
            Self::BountyOnly => "bounty_only",
        };
        write!(f, "{}", s)
    }
}

/// Descriptive metadata captured at submission. Not invariant-bearing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub ign: String,
    pub server_type: String,
    pub map: String,
}

/// One protection application, or a manually-issued bounty host record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub status: RequestStatus,
    pub tribe_key: TribeKey,
    pub tribe_name: String,
    #[serde(flatten)]
    pub details: RequestDetails,

    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub denied_by: Option<String>,
    pub denied_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub ended_early_by: Option<String>,
    pub ended_early_at: Option<DateTime<Utc>>,

    /// One-shot marker that the pre-expiry warning fired. Absent = not warned.
    pub warned_at: Option<DateTime<Utc>>,

    /// Present once a bounty has ever been issued on this record.
    pub bounty: Option<Bounty>,
}

impl Request {
    /// Create a freshly submitted (pending) request.
    pub fn submitted(
        tribe_name: &str,
        requested_by: impl Into<String>,
        details: RequestDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            status: RequestStatus::Pending,
            tribe_key: TribeKey::normalize(tribe_name),
            tribe_name: tribe_name.trim().to_string(),
            details,
            requested_by: requested_by.into(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            denied_by: None,
            denied_at: None,
            expired_at: None,
            ended_early_by: None,
            ended_early_at: None,
            warned_at: None,
            bounty: None,
        }
    }

    /// Create a bounty-only host record (no protection phase).
    pub fn bounty_only(tribe_name: &str, bounty: Bounty, now: DateTime<Utc>) -> Self {
        Self {
            id: RequestId::new(),
            status: RequestStatus::BountyOnly,
            tribe_key: TribeKey::normalize(tribe_name),
            tribe_name: tribe_name.trim().to_string(),
            details: RequestDetails::default(),
            requested_by: bounty.started_by.clone(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            denied_by: None,
            denied_at: None,
            expired_at: None,
            ended_early_by: None,
            ended_early_at: None,
            warned_at: None,
            bounty: Some(bounty),
        }
    }

    /// When the protection window closes, if this request was approved.
    pub fn protection_ends_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at.map(|at| at + protection_window())
    }

    /// True while the request is approved and its window has not closed.
    pub fn protection_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Approved
            && self.protection_ends_at().is_some_and(|ends| ends > now)
    }

    /// True once the request is approved and the window has closed, but the
    /// record has not yet been fast-forwarded to `Expired`.
    pub fn protection_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Approved
            && self.protection_ends_at().is_some_and(|ends| ends <= now)
    }

    /// The embedded bounty, if it is still accepting claims.
    pub fn active_bounty(&self) -> Option<&Bounty> {
        self.bounty.as_ref().filter(|b| b.active)
    }

    pub fn active_bounty_mut(&mut self) -> Option<&mut Bounty> {
        self.bounty.as_mut().filter(|b| b.active)
    }
}

/// Bounty sub-record, embedded in its host [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounty {
    /// True while eligible for claims and counting toward uniqueness.
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub started_by: String,
    pub reason: String,

    /// Claim-in-flight guard. See the engine's claim-lock protocol.
    pub locked: bool,
    pub locked_by_claim_id: Option<ClaimId>,

    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub removed_at: Option<DateTime<Utc>>,
    pub removed_by: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    pub warned_at: Option<DateTime<Utc>>,

    /// Opaque reference to the public announcement. The engine never
    /// interprets this; the notification layer uses it to edit its message.
    pub announce_ref: Option<String>,
}

impl Bounty {
    /// Open a new bounty window starting now.
    pub fn issued(started_by: impl Into<String>, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            active: true,
            started_at: now,
            ends_at: now + bounty_window(),
            started_by: started_by.into(),
            reason: reason.into(),
            locked: false,
            locked_by_claim_id: None,
            claimed_at: None,
            claimed_by: None,
            removed_at: None,
            removed_by: None,
            expired_at: None,
            warned_at: None,
            announce_ref: None,
        }
    }

    /// True while active and inside the window.
    pub fn live_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.ends_at > now
    }

    /// True when still marked active but the window has closed.
    pub fn overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.ends_at <= now
    }
}

/// Status of a submitted claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Denied,
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        };
        write!(f, "{}", s)
    }
}

/// Fields the fulfiller supplies with a claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFields {
    pub claimant_tag: String,
    pub target_tag: String,
    pub proof: String,
    pub notes: String,
}

/// One submitted fulfilment attempt against a bounty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    /// The host request carrying the bounty this claim targets.
    pub bounty_request_id: RequestId,
    /// Denormalized for display and audit.
    pub tribe_key: TribeKey,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: ClaimFields,
    pub status: ClaimStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub denied_by: Option<String>,
    pub denied_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn submitted(
        bounty_request_id: RequestId,
        tribe_key: TribeKey,
        submitted_by: impl Into<String>,
        fields: ClaimFields,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ClaimId::new(),
            bounty_request_id,
            tribe_key,
            submitted_by: submitted_by.into(),
            submitted_at: now,
            fields,
            status: ClaimStatus::Pending,
            approved_by: None,
            approved_at: None,
            denied_by: None,
            denied_at: None,
        }
    }
}
