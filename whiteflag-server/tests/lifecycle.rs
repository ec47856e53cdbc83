//! End-to-end lifecycle scenarios, driven entirely through the public API.
//!
//! Time is controlled from both ends: the engine reads a `ManualClock`, and
//! tokio runs with a paused clock so armed timers fire deterministically.
//! Always advance the manual clock first, then tokio time, so a fired
//! handler observes a "now" that makes its deadline due.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use whiteflag_core::{ClaimFields, ClaimStatus, EngineError, RequestDetails, RequestStatus};
use whiteflag_server::{
    run_startup_sweep, Command, CommandOutcome, Engine, ManualClock, MemoryStore, Notification,
    RecordingNotifier, WarningKind,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

struct World {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

fn world() -> World {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::starting_at(t0()));
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = Engine::new(store.clone(), notifier.clone(), clock.clone());
    World {
        engine,
        store,
        clock,
        notifier,
    }
}

/// Move both clocks forward and let due timers run.
async fn advance(world: &World, by: Duration) {
    world.clock.advance(by);
    tokio::time::advance(by.to_std().unwrap()).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

fn details() -> RequestDetails {
    RequestDetails {
        ign: "survivor".into(),
        server_type: "pvp".into(),
        map: "island".into(),
    }
}

fn claim_fields() -> ClaimFields {
    ClaimFields {
        claimant_tag: "claimant#1".into(),
        target_tag: "target#2".into(),
        proof: "https://example.com/clip".into(),
        notes: String::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn protection_runs_its_full_course() {
    let w = world();

    let request = w.engine.submit_request("Alpha", "u1", details()).await.unwrap();
    w.engine.approve_request(request.id, "admin").await.unwrap();

    // Day 6: the 24-hour warning lands, exactly once.
    advance(&w, Duration::days(6)).await;
    let current = w.engine.get_request(request.id).await.unwrap();
    assert_eq!(current.status, RequestStatus::Approved);
    assert_eq!(current.warned_at, Some(t0() + Duration::days(6)));
    assert_eq!(w.notifier.count_warnings(), 1);

    // Day 7: the window closes.
    advance(&w, Duration::days(1)).await;
    let current = w.engine.get_request(request.id).await.unwrap();
    assert_eq!(current.status, RequestStatus::Expired);
    assert_eq!(current.expired_at, Some(t0() + Duration::days(7)));
    assert_eq!(w.engine.timers().armed_count(), 0);
    assert!(w
        .notifier
        .sent()
        .contains(&Notification::Expired(request.id.to_string())));

    // The tribe is free to apply again.
    w.engine.submit_request("alpha", "u1", details()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn one_live_protection_per_tribe() {
    let w = world();

    let first = w.engine.submit_request("Alpha", "u1", details()).await.unwrap();
    let err = w
        .engine
        .submit_request("  ALPHA ", "u2", details())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));

    w.engine.approve_request(first.id, "admin").await.unwrap();
    let err = w
        .engine
        .submit_request("alpha", "u2", details())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

#[tokio::test(start_paused = true)]
async fn early_end_swaps_protection_for_a_bounty() {
    let w = world();

    let request = w.engine.submit_request("Alpha", "u1", details()).await.unwrap();
    w.engine.approve_request(request.id, "admin").await.unwrap();

    advance(&w, Duration::days(2)).await;
    let ended = w
        .engine
        .end_request_early(request.id, "admin", "raided a protected tribe")
        .await
        .unwrap();
    assert_eq!(ended.status, RequestStatus::EndedEarly);
    let bounty = ended.active_bounty().unwrap();
    assert_eq!(bounty.ends_at, t0() + Duration::days(2) + Duration::days(7));

    // The protection timers were replaced by bounty timers: the old expiry
    // at day 7 passes without touching the record.
    advance(&w, Duration::days(6)).await;
    let current = w.engine.get_request(request.id).await.unwrap();
    assert_eq!(current.status, RequestStatus::EndedEarly);
    assert!(current.active_bounty().is_some());
    assert_eq!(
        current.active_bounty().unwrap().warned_at,
        Some(t0() + Duration::days(8)),
        "bounty warning fired at ends - 24h"
    );

    // Day 9: the bounty window closes unclaimed.
    advance(&w, Duration::days(1)).await;
    let current = w.engine.get_request(request.id).await.unwrap();
    let bounty = current.bounty.as_ref().unwrap();
    assert!(!bounty.active);
    assert_eq!(bounty.expired_at, Some(t0() + Duration::days(9)));
    assert_eq!(w.engine.timers().armed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn claim_lock_admits_one_claim_at_a_time() {
    let w = world();

    let host = w
        .engine
        .add_or_refresh_bounty("Gamma", "admin", "no protection filed")
        .await
        .unwrap();

    let first = w
        .engine
        .submit_claim(host.id, "claimant1", claim_fields())
        .await
        .unwrap();
    let err = w
        .engine
        .submit_claim(host.id, "claimant2", claim_fields())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));

    // Denial releases the lock; a fresh claim gets in and is approved.
    w.engine.deny_claim(first.id, "admin").await.unwrap();
    let second = w
        .engine
        .submit_claim(host.id, "claimant2", claim_fields())
        .await
        .unwrap();
    let approved = w.engine.approve_claim(second.id, "admin").await.unwrap();
    assert_eq!(approved.status, ClaimStatus::Approved);

    let current = w.engine.get_request(host.id).await.unwrap();
    let bounty = current.bounty.as_ref().unwrap();
    assert!(!bounty.active);
    assert!(bounty.locked);
    assert_eq!(bounty.claimed_by.as_deref(), Some("claimant2"));
    assert_eq!(w.engine.timers().armed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_fast_forwards_what_lapsed_while_down() {
    let w = world();

    let protected = w.engine.submit_request("Alpha", "u1", details()).await.unwrap();
    w.engine.approve_request(protected.id, "admin").await.unwrap();
    let bounty_host = w
        .engine
        .add_or_refresh_bounty("Gamma", "admin", "r")
        .await
        .unwrap();

    // Process dies; its timers die with it.
    let store = w.store.clone();
    let clock = w.clock.clone();
    drop(w);
    clock.advance(Duration::days(8));

    let notifier = Arc::new(RecordingNotifier::new());
    let engine = Engine::new(store, notifier.clone(), clock);
    let summary = run_startup_sweep(&engine).await.unwrap();

    assert_eq!(summary.protections_expired, 1);
    assert_eq!(summary.bounties_expired, 1);
    assert_eq!(summary.protections_rearmed, 0);
    assert_eq!(summary.bounties_rearmed, 0);
    assert_eq!(engine.timers().armed_count(), 0);

    let protected = engine.get_request(protected.id).await.unwrap();
    assert_eq!(protected.status, RequestStatus::Expired);
    let bounty_host = engine.get_request(bounty_host.id).await.unwrap();
    assert!(!bounty_host.bounty.as_ref().unwrap().active);
}

#[tokio::test(start_paused = true)]
async fn restart_rearms_what_is_still_live() {
    let w = world();

    let protected = w.engine.submit_request("Alpha", "u1", details()).await.unwrap();
    w.engine.approve_request(protected.id, "admin").await.unwrap();

    let store = w.store.clone();
    let clock = w.clock.clone();
    drop(w);
    clock.advance(Duration::days(3));

    let notifier = Arc::new(RecordingNotifier::new());
    let engine = Engine::new(store, notifier.clone(), clock.clone());
    let summary = run_startup_sweep(&engine).await.unwrap();
    assert_eq!(summary.protections_rearmed, 1);
    assert_eq!(engine.timers().armed_count(), 2);

    // The re-armed timers still fire on the original schedule.
    clock.advance(Duration::days(3));
    tokio::time::advance(std::time::Duration::from_secs(3 * 24 * 3600)).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    let current = engine.get_request(protected.id).await.unwrap();
    assert_eq!(current.warned_at, Some(t0() + Duration::days(6)));
    assert!(notifier
        .sent()
        .contains(&Notification::Warning(
            protected.id.to_string(),
            WarningKind::ProtectionEnding
        )));

    clock.advance(Duration::days(1));
    tokio::time::advance(std::time::Duration::from_secs(24 * 3600)).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    let current = engine.get_request(protected.id).await.unwrap();
    assert_eq!(current.status, RequestStatus::Expired);
}

#[tokio::test(start_paused = true)]
async fn commands_drive_the_same_lifecycle() {
    let w = world();

    let outcome = w
        .engine
        .execute(Command::SubmitRequest {
            tribe_name: "Alpha".into(),
            requested_by: "u1".into(),
            details: details(),
        })
        .await
        .unwrap();
    let CommandOutcome::Request(request) = outcome else {
        panic!("submit returned a claim");
    };

    w.engine
        .execute(Command::ApproveRequest {
            id: request.id,
            actor: "admin".into(),
        })
        .await
        .unwrap();

    let listed = w.engine.list_requests().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, RequestStatus::Approved);
}
