//! End-to-end tests through `TollroomService`.
//!
//! Wall-clock billing time comes from a `ManualClock`; the presence
//! sweeper runs on Tokio time, paused where a test needs it to fire.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tollroom::prelude::*;
use tollroom::{ServiceConfig, TollroomError};
use tollroom_billing::EntryKind;
use tollroom_room::RoomError;

// =========================================================================
// Helpers
// =========================================================================

type Service = TollroomService<MemoryWallet, MemoryLedger, BroadcastBus, ManualClock>;

struct Fixture {
    service: Arc<Service>,
    clock: ManualClock,
}

fn fixture() -> Fixture {
    fixture_with(ServiceConfig::default())
}

fn fixture_with(config: ServiceConfig) -> Fixture {
    let clock = ManualClock::new(Timestamp::from_secs(1_000));
    let service = TollroomService::builder().config(config).build(
        MemoryWallet::new(),
        MemoryLedger::new(),
        clock.clone(),
    );
    Fixture {
        service: Arc::new(service),
        clock,
    }
}

fn pid(id: u64) -> ParticipantId {
    ParticipantId(id)
}

fn key() -> IdempotencyKey {
    IdempotencyKey::generate()
}

/// $10 entry, 10 minute trial, $2 per minute.
fn paid_config() -> RoomConfig {
    RoomConfig::paid(Money::from_major(10), 600, Money::from_major(2))
}

impl Fixture {
    fn fund(&self, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            self.service.wallet().fund(pid(id), Money::from_major(100));
        }
    }

    async fn room(&self, id: u64, config: RoomConfig) {
        self.service.on_room_created(RoomId(id), config).await.unwrap();
    }

    async fn join_fan(&self, room: u64, id: u64) {
        self.service
            .join(RoomId(room), pid(id), Role::Fan, key())
            .await
            .unwrap();
    }
}

// =========================================================================
// Billing
// =========================================================================

#[tokio::test]
async fn test_join_retry_with_same_key_charges_once() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    let k = key();

    let first = f.service.join(RoomId(1), pid(1), Role::Fan, k.clone()).await.unwrap();
    let second = f.service.join(RoomId(1), pid(1), Role::Fan, k).await.unwrap();

    assert!(first.is_new());
    assert!(matches!(second, JoinOutcome::AlreadyJoined(_)));
    assert_eq!(f.service.wallet().debit_count(), 1);
    assert_eq!(f.service.wallet().balance(pid(1)), Money::from_major(90));
    assert_eq!(f.service.ledger().entries().len(), 1);
}

#[tokio::test]
async fn test_session_cost_steps_by_whole_minutes() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;

    let mut seen = Vec::new();
    for at in [599, 700, 1_260] {
        f.clock.set(Timestamp::from_secs(1_000 + at));
        let session = f.service.session(RoomId(1), pid(1)).await.unwrap().unwrap();
        seen.push((session.state(), session.accrued_cost()));
    }

    assert_eq!(
        seen,
        vec![
            (BillingState::FreeTrial, Money::from_major(10)),
            (BillingState::Metered, Money::from_major(12)),
            (BillingState::Metered, Money::from_major(32)),
        ]
    );
}

#[tokio::test]
async fn test_full_stay_settles_twenty_dollars_and_frees_seat() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();

    f.clock.advance_secs(900);
    let cost = f.service.leave(RoomId(1), pid(1)).await.unwrap();

    assert_eq!(cost.entry_fee, Money::from_major(10));
    assert_eq!(cost.metered, Money::from_major(10));
    assert_eq!(cost.total, Money::from_major(20));
    assert!(cost.settled);
    assert_eq!(f.service.wallet().balance(pid(1)), Money::from_major(80));
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Fan), 0);
    assert!(f.service.rooms_of(pid(1)).await.is_empty());
}

#[tokio::test]
async fn test_leave_twice_settles_once() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    f.clock.advance_secs(700);

    let first = f.service.leave(RoomId(1), pid(1)).await.unwrap();
    f.clock.advance_secs(600);
    let second = f.service.leave(RoomId(1), pid(1)).await.unwrap();

    assert_eq!(first, second);
    let metered = f
        .service
        .ledger()
        .entries()
        .iter()
        .filter(|e| e.kind == EntryKind::Metered)
        .count();
    assert_eq!(metered, 1);
}

#[tokio::test]
async fn test_join_without_funds_returns_billing_error() {
    let f = fixture();
    f.room(1, paid_config()).await;

    let result = f.service.join(RoomId(1), pid(1), Role::Fan, key()).await;

    assert!(matches!(
        result,
        Err(TollroomError::Billing(BillingError::InsufficientFunds { .. }))
    ));
    assert!(f.service.rooms_of(pid(1)).await.is_empty());
}

#[tokio::test]
async fn test_reconcile_after_ledger_outage_records_settlement() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    f.clock.advance_secs(900);
    f.service.ledger().set_online(false);

    let cost = f.service.leave(RoomId(1), pid(1)).await.unwrap();
    assert!(!cost.settled);

    f.service.ledger().set_online(true);
    let reports = f.service.reconcile().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.completed, 1);
    assert_eq!(reports[0].1.remaining, 0);
    assert_eq!(f.service.ledger().entries().len(), 2);
}

#[tokio::test]
async fn test_tip_to_host_credits_host() {
    let f = fixture();
    f.fund([1]);
    f.room(1, RoomConfig::default().with_host(pid(50))).await;
    f.join_fan(1, 1).await;

    f.service
        .tip(RoomId(1), pid(1), pid(50), Money(500), key())
        .await
        .unwrap();

    assert_eq!(f.service.wallet().balance(pid(50)), Money(500));
}

#[tokio::test]
async fn test_rejoin_with_spent_key_is_refused() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    let k = IdempotencyKey::new("client-join-1");
    f.service.join(RoomId(1), pid(1), Role::Fan, k.clone()).await.unwrap();
    f.service.leave(RoomId(1), pid(1)).await.unwrap();

    let result = f.service.join(RoomId(1), pid(1), Role::Fan, k).await;

    assert!(matches!(
        result,
        Err(TollroomError::Billing(BillingError::KeyReused { .. }))
    ));
    assert_eq!(f.service.wallet().debit_count(), 1);
    assert_eq!(f.service.billing_state(RoomId(1), pid(1)).await.unwrap(), BillingState::Ended);

    let fresh = f.service.join(RoomId(1), pid(1), Role::Fan, key()).await.unwrap();
    assert!(fresh.is_new());
    assert_eq!(f.service.wallet().balance(pid(1)), Money::from_major(80));
}

#[tokio::test]
async fn test_reconcile_after_wallet_outage_pays_host() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config().with_host(pid(50))).await;
    f.join_fan(1, 1).await;
    f.clock.advance_secs(900);
    f.service.wallet().set_online(false);

    let cost = f.service.leave(RoomId(1), pid(1)).await.unwrap();
    assert!(!cost.settled);
    assert_eq!(f.service.wallet().balance(pid(50)), Money::from_major(10));

    f.service.wallet().set_online(true);
    let reports = f.service.reconcile().await;

    assert_eq!(reports[0].1.remaining, 0);
    assert_eq!(f.service.wallet().balance(pid(1)), Money::from_major(80));
    assert_eq!(f.service.wallet().balance(pid(50)), Money::from_major(20));
}

// =========================================================================
// Camera seats
// =========================================================================

#[tokio::test]
async fn test_join_camera_one_seat_per_participant() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;

    let fan_seat = f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();
    let again = f.service.join_camera(RoomId(1), pid(1), Role::Creator).await.unwrap();

    assert!(matches!(again, SeatGrant::AlreadyOnCamera(_)));
    assert_eq!(again.slot(), fan_seat.slot());
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Fan), 1);
    assert_eq!(occupancy.occupied(Role::Creator), 0);
}

#[tokio::test]
async fn test_join_camera_full_pool_returns_seat_error() {
    let f = fixture();
    f.fund([1, 2]);
    f.room(1, paid_config().with_slots(1, 1)).await;
    f.join_fan(1, 1).await;
    f.join_fan(1, 2).await;
    f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();

    let result = f.service.join_camera(RoomId(1), pid(2), Role::Fan).await;

    assert!(matches!(
        result,
        Err(TollroomError::Seat(SeatError::PoolFull { role: Role::Fan }))
    ));
}

#[tokio::test]
async fn test_join_camera_fan_asking_for_creator_seat_is_not_eligible() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;

    let result = f.service.join_camera(RoomId(1), pid(1), Role::Creator).await;

    assert!(matches!(
        result,
        Err(TollroomError::Seat(SeatError::NotEligible(p))) if p == pid(1)
    ));
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Creator), 0);
}

#[tokio::test]
async fn test_leave_camera_without_seat_publishes_nothing() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    let mut events = f.service.bus().subscribe();

    let released = f.service.leave_camera(RoomId(1), pid(1)).await.unwrap();

    assert!(!released);
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));

    f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();
    assert!(f.service.leave_camera(RoomId(1), pid(1)).await.unwrap());
    let claimed = events.recv().await.unwrap();
    let freed = events.recv().await.unwrap();
    assert!(matches!(claimed.kind, RoomEventKind::OccupancyChanged(ref o) if o.occupied(Role::Fan) == 1));
    assert!(matches!(freed.kind, RoomEventKind::OccupancyChanged(ref o) if o.occupied(Role::Fan) == 0));
}

#[tokio::test]
async fn test_concurrent_claims_never_exceed_capacity() {
    let f = fixture();
    let fans: Vec<u64> = (1..=25).collect();
    f.fund(fans.iter().copied());
    f.room(1, paid_config()).await;
    for &id in &fans {
        f.join_fan(1, id).await;
    }

    let claims = fans
        .iter()
        .map(|&id| f.service.join_camera(RoomId(1), pid(id), Role::Fan));
    let results = join_all(claims).await;

    let granted = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(TollroomError::Seat(SeatError::PoolFull { .. }))))
        .count();
    assert_eq!(granted, 10);
    assert_eq!(refused, 15);
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Fan), 10);
    assert_eq!(occupancy.available(Role::Fan), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_race_for_last_seat_has_one_winner() {
    let f = fixture();
    f.fund([1, 2]);
    f.room(1, paid_config().with_slots(1, 1)).await;
    f.join_fan(1, 1).await;
    f.join_fan(1, 2).await;

    let tasks = [1, 2].map(|id| {
        let service = Arc::clone(&f.service);
        tokio::spawn(async move { service.join_camera(RoomId(1), pid(id), Role::Fan).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(TollroomError::Seat(SeatError::PoolFull { .. }))))
            .count(),
        1
    );
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Fan), 1);
}

// =========================================================================
// Room lifecycle
// =========================================================================

#[tokio::test]
async fn test_unknown_room_returns_not_found() {
    let f = fixture();

    let result = f.service.occupancy(RoomId(42)).await;

    assert!(matches!(
        result,
        Err(TollroomError::Room(RoomError::NotFound(RoomId(42))))
    ));
}

#[tokio::test]
async fn test_on_room_destroyed_settles_open_sessions() {
    let f = fixture();
    f.fund([1, 2]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    f.join_fan(1, 2).await;
    f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();
    f.clock.advance_secs(660);

    let costs = f.service.on_room_destroyed(RoomId(1)).await.unwrap();

    assert_eq!(costs.len(), 2);
    assert!(costs.iter().all(|c| c.total == Money::from_major(12) && c.settled));
    assert_eq!(f.service.room_count().await, 0);
    assert!(f.service.rooms_of(pid(1)).await.is_empty());
}

#[tokio::test]
async fn test_bus_sees_admission_and_seat_events() {
    let f = fixture();
    f.fund([1]);
    let mut events = f.service.bus().subscribe();
    f.room(1, paid_config()).await;

    f.join_fan(1, 1).await;
    f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();

    let admitted = events.recv().await.unwrap();
    assert!(matches!(
        admitted.kind,
        RoomEventKind::SessionStateChanged(ref u) if u.participant_id == pid(1)
    ));
    let seated = events.recv().await.unwrap();
    assert!(matches!(seated.kind, RoomEventKind::OccupancyChanged(_)));
}

// =========================================================================
// Presence
// =========================================================================

#[tokio::test]
async fn test_sweep_presence_waits_for_grace_period() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();
    f.service.disconnect(pid(1)).await;

    f.clock.advance_secs(29);
    assert!(f.service.sweep_presence().await.is_empty());

    f.clock.advance_secs(1);
    let swept = f.service.sweep_presence().await;

    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].0, pid(1));
    assert_eq!(swept[0].1.len(), 1);
    assert_eq!(swept[0].1[0].1.total, Money::from_major(10));
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Fan), 0);
    assert!(f.service.presence(pid(1)).await.is_none());
}

#[tokio::test]
async fn test_sweep_presence_frees_host_seat_without_session() {
    let f = fixture();
    f.room(1, paid_config().with_host(pid(50))).await;
    f.service.join_camera(RoomId(1), pid(50), Role::Creator).await.unwrap();
    assert_eq!(f.service.rooms_of(pid(50)).await, vec![RoomId(1)]);
    f.service.disconnect(pid(50)).await;

    f.clock.advance_secs(31);
    let swept = f.service.sweep_presence().await;

    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].0, pid(50));
    assert!(swept[0].1.is_empty(), "no session, nothing settled");
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Creator), 0);
    assert!(f.service.rooms_of(pid(50)).await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_within_grace_keeps_session() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    f.service.disconnect(pid(1)).await;
    f.clock.advance_secs(20);

    assert!(f.service.heartbeat(pid(1)).await);
    f.clock.advance_secs(60);

    assert!(f.service.sweep_presence().await.is_empty());
    let session = f.service.session(RoomId(1), pid(1)).await.unwrap();
    assert!(session.is_some_and(|s| s.is_active()));
}

#[tokio::test]
async fn test_on_presence_timeout_leaves_every_room() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.room(2, RoomConfig::default()).await;
    f.join_fan(1, 1).await;
    f.join_fan(2, 1).await;
    assert_eq!(f.service.rooms_of(pid(1)).await, vec![RoomId(1), RoomId(2)]);

    let settled = f.service.on_presence_timeout(pid(1)).await;

    assert_eq!(settled.len(), 2);
    assert!(f.service.rooms_of(pid(1)).await.is_empty());
}

#[tokio::test]
async fn test_leave_last_room_forgets_presence() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.room(2, RoomConfig::default()).await;
    f.join_fan(1, 1).await;
    f.join_fan(2, 1).await;

    f.service.leave(RoomId(1), pid(1)).await.unwrap();
    assert!(f.service.presence(pid(1)).await.is_some());

    f.service.leave(RoomId(2), pid(1)).await.unwrap();
    assert!(f.service.presence(pid(1)).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_presence_sweeper_times_out_disconnected_participant() {
    let f = fixture();
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    f.service.join_camera(RoomId(1), pid(1), Role::Fan).await.unwrap();
    let _sweeper = f.service.spawn_presence_sweeper();

    f.service.disconnect(pid(1)).await;
    f.clock.advance_secs(30);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(f.service.rooms_of(pid(1)).await.is_empty());
    let occupancy = f.service.occupancy(RoomId(1)).await.unwrap();
    assert_eq!(occupancy.occupied(Role::Fan), 0);
    assert!(f.service.session(RoomId(1), pid(1)).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_presence_sweeper_catches_silent_participant() {
    let config = ServiceConfig {
        heartbeat_timeout_secs: Some(60),
        ..ServiceConfig::default()
    };
    let f = fixture_with(config);
    f.fund([1]);
    f.room(1, paid_config()).await;
    f.join_fan(1, 1).await;
    let _sweeper = f.service.spawn_presence_sweeper();

    f.clock.advance_secs(90);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(f.service.rooms_of(pid(1)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_presence_sweeper_stops_when_service_dropped() {
    let f = fixture();
    let sweeper = f.service.spawn_presence_sweeper();

    drop(f);
    let stopped = tokio::time::timeout(Duration::from_secs(5), sweeper).await;

    assert!(stopped.is_ok(), "sweeper should exit after the service is gone");
}

// =========================================================================
// Configuration
// =========================================================================

#[test]
fn test_service_config_partial_json_uses_defaults() {
    let config: ServiceConfig = serde_json::from_str(r#"{ "presence_grace_secs": 45 }"#).unwrap();

    assert_eq!(config.presence_grace_secs, 45);
    assert_eq!(config.sweep_interval_ms, 1000);
    assert_eq!(config.heartbeat_timeout_secs, None);
}
