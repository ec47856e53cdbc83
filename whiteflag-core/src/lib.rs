//! Shared domain types for the whiteflag protection/bounty engine.
//!
//! This crate holds the records the engine persists (protection requests,
//! embedded bounties, claims), their identifiers, and the error taxonomy
//! every lifecycle operation reports. It deliberately contains no I/O:
//! stores, timers, and notification live in `whiteflag-server`.

pub mod error;
pub mod record;

pub use error::*;
pub use record::*;

use chrono::Duration;

/// Days a granted protection lasts before it expires into open season.
pub const PROTECTION_DAYS: i64 = 7;

/// Days a bounty stays claimable once issued.
pub const BOUNTY_DAYS: i64 = 7;

/// Hours before expiry at which the one-shot warning fires.
pub const WARNING_LEAD_HOURS: i64 = 24;

/// The fixed protection window.
pub fn protection_window() -> Duration {
    Duration::days(PROTECTION_DAYS)
}

/// The fixed bounty window.
pub fn bounty_window() -> Duration {
    Duration::days(BOUNTY_DAYS)
}

/// Lead time between the pre-expiry warning and the expiry itself.
pub fn warning_lead() -> Duration {
    Duration::hours(WARNING_LEAD_HOURS)
}
