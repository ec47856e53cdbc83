//! Lifecycle/timer/reconciliation engine for tribe protection and bounties.
//!
//! The pieces, leaves first:
//! - [`store`]: the durable record store behind a trait, with in-memory and
//!   SQLite backends.
//! - [`clock`]: injectable time source so timer behavior is testable.
//! - [`notify`]: fire-and-forget announcement callbacks.
//! - [`scheduler`]: per-record one-shot timers (expiry, pre-expiry warning).
//! - [`engine`]: the state machine owning every record mutation.
//! - [`reconcile`]: the startup sweep that makes persisted status plus
//!   in-memory timers agree again after a restart.
//! - [`command`]: the typed operation surface for interaction layers.
//! - [`config`]: environment-driven process configuration.

pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod notify;
pub mod reconcile;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandOutcome};
pub use config::Config;
pub use engine::Engine;
pub use notify::{
    BountyCloseReason, LogNotifier, Notification, Notifier, RecordingNotifier, WarningKind,
};
pub use reconcile::{run_startup_sweep, SweepSummary};
pub use scheduler::{TimerKey, TimerKind, TimerScheduler};
pub use store::{MemoryStore, RecordStore, SqliteStore, StoreError};
