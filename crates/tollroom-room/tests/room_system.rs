//! Integration tests for room actors and the room registry.
//!
//! Money goes through the in-memory wallet and ledger, wall-clock time
//! through a `ManualClock` the test moves by hand.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tollroom_billing::{
    BillingError, EntryKind, IdempotencyKey, MemoryLedger, MemoryWallet,
};
use tollroom_protocol::{
    BillingState, ManualClock, Money, ParticipantId, Role, RoomEventKind, RoomId, Timestamp,
};
use tollroom_room::{
    BroadcastBus, RoomConfig, RoomDeps, RoomError, RoomHandle, RoomManager, leave_all,
};
use tollroom_seats::{SeatError, SeatGrant};

// =========================================================================
// Helpers
// =========================================================================

type Manager = RoomManager<MemoryWallet, MemoryLedger, BroadcastBus, ManualClock>;

struct Fixture {
    manager: Manager,
    wallet: Arc<MemoryWallet>,
    ledger: Arc<MemoryLedger>,
    bus: Arc<BroadcastBus>,
    clock: ManualClock,
}

fn fixture() -> Fixture {
    let wallet = Arc::new(MemoryWallet::new());
    let ledger = Arc::new(MemoryLedger::new());
    let bus = Arc::new(BroadcastBus::new(256));
    let clock = ManualClock::new(Timestamp::from_secs(1_000));
    let deps = RoomDeps::new(
        Arc::clone(&wallet),
        Arc::clone(&ledger),
        Arc::clone(&bus),
        Arc::new(clock.clone()),
    );
    Fixture {
        manager: RoomManager::new(deps),
        wallet,
        ledger,
        bus,
        clock,
    }
}

fn pid(id: u64) -> ParticipantId {
    ParticipantId(id)
}

/// $10 entry, 10 minute trial, $2 per minute.
fn paid_config() -> RoomConfig {
    RoomConfig::paid(Money::from_major(10), 600, Money::from_major(2))
}

fn key() -> IdempotencyKey {
    IdempotencyKey::generate()
}

impl Fixture {
    fn fund(&self, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            self.wallet.fund(pid(id), Money::from_major(100));
        }
    }

    fn room(&mut self, id: u64, config: RoomConfig) -> RoomHandle {
        self.manager.on_room_created(RoomId(id), config).unwrap()
    }

    /// Joins through the room's handle and records the membership.
    async fn join(&mut self, room: u64, id: u64) {
        let handle = self.manager.handle(RoomId(room)).unwrap();
        handle.join(pid(id), Role::Fan, key()).await.unwrap();
        self.manager.track(pid(id), RoomId(room));
    }

    /// Unregisters the room and waits for its actor to settle everyone.
    async fn destroy(&mut self, room: u64) -> Vec<tollroom_billing::FinalCost> {
        let handle = self.manager.remove_room(RoomId(room)).unwrap();
        handle.shutdown().await.unwrap()
    }
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_on_room_created_twice_returns_already_exists() {
    let mut f = fixture();
    f.room(1, RoomConfig::default());

    let result = f.manager.on_room_created(RoomId(1), RoomConfig::default());

    assert!(matches!(result, Err(RoomError::AlreadyExists(RoomId(1)))));
    assert_eq!(f.manager.room_count(), 1);
}

#[tokio::test]
async fn test_remove_room_drops_it_from_participant_index() {
    let mut f = fixture();
    f.fund([1]);
    f.room(1, paid_config());
    f.room(2, RoomConfig::default());
    f.join(1, 1).await;
    f.join(2, 1).await;

    let handle = f.manager.remove_room(RoomId(1)).unwrap();

    assert_eq!(handle.room_id(), RoomId(1));
    assert_eq!(f.manager.rooms_of(pid(1)), vec![RoomId(2)]);
    assert_eq!(f.manager.room_ids(), vec![RoomId(2)]);
    assert!(matches!(
        f.manager.remove_room(RoomId(1)),
        Err(RoomError::NotFound(RoomId(1)))
    ));
}

#[tokio::test]
async fn test_shutdown_settles_everyone_and_clears_seats() {
    let mut f = fixture();
    f.fund([1, 2]);
    let room = f.room(1, paid_config().with_host(pid(50)));
    for id in [1, 2] {
        f.join(1, id).await;
        room.join_camera(pid(id), Role::Fan).await.unwrap();
    }
    room.join_camera(pid(50), Role::Creator).await.unwrap();
    f.clock.advance_secs(660);

    let costs = f.destroy(1).await;

    assert_eq!(costs.len(), 2);
    assert!(costs.iter().all(|c| c.total == Money::from_major(12)));
    let occupancy = room.occupancy();
    assert_eq!(occupancy.occupied(Role::Fan), 0);
    assert_eq!(occupancy.occupied(Role::Creator), 0);
    assert!(f.manager.rooms_of(pid(1)).is_empty());
    assert!(matches!(
        f.manager.handle(RoomId(1)),
        Err(RoomError::NotFound(RoomId(1)))
    ));
}

#[tokio::test]
async fn test_destroyed_room_handle_is_unavailable() {
    let mut f = fixture();
    let room = f.room(1, RoomConfig::default());

    f.destroy(1).await;

    let result = room.join(pid(1), Role::Fan, key()).await;
    assert!(matches!(result, Err(RoomError::Unavailable(RoomId(1)))));
    assert!(room.is_closed());
}

#[tokio::test]
async fn test_handle_unknown_room_returns_not_found() {
    let f = fixture();
    let result = f.manager.handle(RoomId(99));
    assert!(matches!(result, Err(RoomError::NotFound(RoomId(99)))));
}

// =========================================================================
// Join / leave
// =========================================================================

#[tokio::test]
async fn test_join_same_key_twice_charges_once() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    let k = key();

    let first = room.join(pid(1), Role::Fan, k.clone()).await.unwrap();
    let second = room.join(pid(1), Role::Fan, k).await.unwrap();

    assert!(first.is_new());
    assert!(!second.is_new());
    assert_eq!(first.session().id(), second.session().id());
    assert_eq!(f.wallet.debit_count(), 1);
    assert_eq!(f.wallet.balance(pid(1)), Money::from_major(90));
}

#[tokio::test]
async fn test_join_without_funds_is_refused() {
    let mut f = fixture();
    let room = f.room(1, paid_config());

    let result = room.join(pid(1), Role::Fan, key()).await;

    assert!(matches!(
        result,
        Err(RoomError::Billing(BillingError::InsufficientFunds { .. }))
    ));
    assert!(room.session(pid(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_full_stay_scenario_bills_twenty_dollars() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();
    room.join_camera(pid(1), Role::Fan).await.unwrap();

    f.clock.advance_secs(900);
    let cost = room.leave(pid(1)).await.unwrap();

    assert_eq!(cost.elapsed_secs, 900);
    assert_eq!(cost.entry_fee, Money::from_major(10));
    assert_eq!(cost.metered, Money::from_major(10));
    assert_eq!(cost.total, Money::from_major(20));
    assert!(cost.settled);

    let amounts: Vec<(EntryKind, Money)> =
        f.ledger.entries().iter().map(|e| (e.kind, e.amount)).collect();
    assert_eq!(
        amounts,
        vec![
            (EntryKind::EntryFee, Money::from_major(10)),
            (EntryKind::Metered, Money::from_major(10)),
        ]
    );
    assert_eq!(room.billing_state(pid(1)).await.unwrap(), BillingState::Ended);
    assert_eq!(room.occupancy().occupied(Role::Fan), 0);
}

#[tokio::test]
async fn test_leave_twice_returns_same_cost() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();
    f.clock.advance_secs(700);

    let first = room.leave(pid(1)).await.unwrap();
    f.clock.advance_secs(300);
    let second = room.leave(pid(1)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(f.ledger.entries().len(), 2);
}

#[tokio::test]
async fn test_session_read_reflects_elapsed_time() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();

    f.clock.advance_secs(1_260);
    let session = room.session(pid(1)).await.unwrap().unwrap();

    assert_eq!(session.state(), BillingState::Metered);
    assert_eq!(session.accrued_cost(), Money::from_major(32));
    assert_eq!(f.ledger.entries().len(), 1, "reads never charge");
}

#[tokio::test]
async fn test_leave_with_ledger_down_still_leaves() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();
    f.clock.advance_secs(900);
    f.ledger.set_online(false);

    let cost = room.leave(pid(1)).await.unwrap();

    assert!(!cost.settled);
    assert_eq!(room.billing_state(pid(1)).await.unwrap(), BillingState::Ended);
    assert_eq!(room.unsettled().await.unwrap().len(), 1);

    f.ledger.set_online(true);
    let report = room.reconcile().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.remaining, 0);
    assert!(room.unsettled().await.unwrap().is_empty());
    assert_eq!(f.ledger.entries().len(), 2);
}

// =========================================================================
// Camera seats
// =========================================================================

#[tokio::test]
async fn test_join_camera_fan_without_session_is_not_eligible() {
    let mut f = fixture();
    let room = f.room(1, paid_config());

    let result = room.join_camera(pid(1), Role::Fan).await;

    assert_eq!(
        result,
        Err(RoomError::Seat(SeatError::NotEligible(pid(1))))
    );
}

#[tokio::test]
async fn test_join_camera_host_needs_no_session() {
    let mut f = fixture();
    let room = f.room(1, paid_config().with_host(pid(50)));

    let grant = room.join_camera(pid(50), Role::Creator).await.unwrap();

    assert!(grant.is_new());
    assert_eq!(room.occupancy().occupied(Role::Creator), 1);
}

#[tokio::test]
async fn test_join_camera_creator_seat_refused_to_fan() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();

    let result = room.join_camera(pid(1), Role::Creator).await;

    assert_eq!(
        result,
        Err(RoomError::Seat(SeatError::NotEligible(pid(1))))
    );
}

#[tokio::test]
async fn test_join_camera_twice_returns_already_on_camera() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();

    let first = room.join_camera(pid(1), Role::Fan).await.unwrap();
    let second = room.join_camera(pid(1), Role::Fan).await.unwrap();

    assert!(matches!(second, SeatGrant::AlreadyOnCamera(_)));
    assert_eq!(first.slot().index, second.slot().index);
    assert_eq!(room.occupancy().occupied(Role::Fan), 1);
}

#[tokio::test]
async fn test_leave_camera_is_idempotent() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();
    room.join_camera(pid(1), Role::Fan).await.unwrap();

    assert!(room.leave_camera(pid(1)).await.unwrap());
    assert!(!room.leave_camera(pid(1)).await.unwrap());
    assert_eq!(room.occupancy().occupied(Role::Fan), 0);
    assert!(room.session(pid(1)).await.unwrap().is_some(), "still billed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_race_for_last_seat_has_one_winner() {
    let mut f = fixture();
    f.fund([1, 2, 3]);
    let room = f.room(1, paid_config().with_slots(4, 2));
    for id in 1..=3 {
        room.join(pid(id), Role::Fan, key()).await.unwrap();
    }
    room.join_camera(pid(1), Role::Fan).await.unwrap();

    let contenders = [2, 3].map(|id| {
        let room = room.clone();
        tokio::spawn(async move { room.join_camera(pid(id), Role::Fan).await })
    });
    let results: Vec<_> = join_all(contenders)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let granted = results.iter().filter(|r| r.is_ok()).count();
    let full = results
        .iter()
        .filter(|r| matches!(r, Err(RoomError::Seat(SeatError::PoolFull { role: Role::Fan }))))
        .count();
    assert_eq!(granted, 1);
    assert_eq!(full, 1);
    assert_eq!(room.occupancy().occupied(Role::Fan), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_exceed_capacity() {
    let mut f = fixture();
    let ids: Vec<u64> = (1..=25).collect();
    f.fund(ids.clone());
    let room = f.room(1, paid_config().with_slots(4, 10));
    for id in &ids {
        room.join(pid(*id), Role::Fan, key()).await.unwrap();
    }

    let claims = ids.iter().map(|id| {
        let room = room.clone();
        let id = *id;
        async move { room.join_camera(pid(id), Role::Fan).await }
    });
    let results = join_all(claims).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
    let occupancy = room.occupancy();
    assert_eq!(occupancy.occupied(Role::Fan), 10);
    let mut seated: Vec<_> = occupancy
        .fan_slots
        .iter()
        .filter_map(|s| s.occupant)
        .collect();
    seated.sort();
    seated.dedup();
    assert_eq!(seated.len(), 10, "no participant holds two seats");
}

// =========================================================================
// Presence timeout
// =========================================================================

#[tokio::test]
async fn test_leave_all_settles_every_room() {
    let mut f = fixture();
    f.fund([1]);
    let a = f.room(1, paid_config());
    f.room(2, RoomConfig::default());
    f.join(1, 1).await;
    f.join(2, 1).await;
    a.join_camera(pid(1), Role::Fan).await.unwrap();
    assert_eq!(f.manager.rooms_of(pid(1)), vec![RoomId(1), RoomId(2)]);

    f.clock.advance_secs(120);
    let handles = f.manager.take_participant(pid(1));
    let settled = leave_all(pid(1), handles).await;

    assert_eq!(settled.len(), 2);
    assert!(f.manager.rooms_of(pid(1)).is_empty());
    assert_eq!(a.occupancy().occupied(Role::Fan), 0);
    assert_eq!(a.billing_state(pid(1)).await.unwrap(), BillingState::Ended);
}

#[tokio::test]
async fn test_leave_all_frees_seat_of_host_without_session() {
    let mut f = fixture();
    let room = f.room(1, paid_config().with_host(pid(50)));
    room.join_camera(pid(50), Role::Creator).await.unwrap();
    f.manager.track(pid(50), RoomId(1));

    let handles = f.manager.take_participant(pid(50));
    let settled = leave_all(pid(50), handles).await;

    assert!(settled.is_empty());
    assert_eq!(room.occupancy().occupied(Role::Creator), 0);
}

#[tokio::test]
async fn test_take_participant_unknown_participant_is_empty() {
    let mut f = fixture();
    f.room(1, paid_config());

    let handles = f.manager.take_participant(pid(9));

    assert!(handles.is_empty());
    assert!(leave_all(pid(9), handles).await.is_empty());
}

// =========================================================================
// Events
// =========================================================================

#[tokio::test]
async fn test_join_camera_publishes_occupancy() {
    let mut f = fixture();
    f.fund([1]);
    let mut events = f.bus.subscribe();
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();

    room.join_camera(pid(1), Role::Fan).await.unwrap();

    let joined = events.recv().await.unwrap();
    assert!(matches!(
        joined.kind,
        RoomEventKind::SessionStateChanged(ref u) if u.state == BillingState::FreeTrial
    ));
    let seated = events.recv().await.unwrap();
    assert_eq!(seated.room_id, RoomId(1));
    match seated.kind {
        RoomEventKind::OccupancyChanged(occupancy) => {
            assert_eq!(occupancy.seat_of(pid(1)).map(|(r, _)| r), Some(Role::Fan));
        }
        other => panic!("expected OccupancyChanged, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_meter_publishes_trial_expiry() {
    let mut f = fixture();
    f.fund([1]);
    let mut events = f.bus.subscribe();
    let room = f.room(1, paid_config());
    room.join(pid(1), Role::Fan, key()).await.unwrap();
    let _admitted = events.recv().await.unwrap();

    f.clock.advance_secs(600);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let event = events.recv().await.unwrap();
    match event.kind {
        RoomEventKind::SessionStateChanged(update) => {
            assert_eq!(update.participant_id, pid(1));
            assert_eq!(update.state, BillingState::Metered);
        }
        other => panic!("expected SessionStateChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn test_watch_occupancy_sees_changes() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, paid_config());
    let mut watch = room.watch_occupancy();
    room.join(pid(1), Role::Fan, key()).await.unwrap();

    room.join_camera(pid(1), Role::Fan).await.unwrap();

    assert!(watch.has_changed().unwrap());
    assert_eq!(watch.borrow_and_update().occupied(Role::Fan), 1);
}

// =========================================================================
// Tips
// =========================================================================

#[tokio::test]
async fn test_tip_to_host_moves_money() {
    let mut f = fixture();
    f.fund([1]);
    let room = f.room(1, RoomConfig::default().with_host(pid(50)));
    room.join(pid(1), Role::Fan, key()).await.unwrap();

    room.tip(pid(1), pid(50), Money(250), key()).await.unwrap();

    assert_eq!(f.wallet.balance(pid(50)), Money(250));
    assert_eq!(f.ledger.entries().last().map(|e| e.kind), Some(EntryKind::Tip));
}

#[tokio::test]
async fn test_info_counts_sessions_and_seats() {
    let mut f = fixture();
    f.fund([1, 2]);
    let room = f.room(1, paid_config().with_host(pid(50)));
    room.join(pid(1), Role::Fan, key()).await.unwrap();
    room.join(pid(2), Role::Fan, key()).await.unwrap();
    room.join_camera(pid(2), Role::Fan).await.unwrap();
    room.join_camera(pid(50), Role::Creator).await.unwrap();

    let info = room.info().await.unwrap();

    assert_eq!(info.room_id, RoomId(1));
    assert_eq!(info.active_sessions, 2);
    assert_eq!(info.fans_on_camera, 1);
    assert_eq!(info.creators_on_camera, 1);
    assert_eq!(info.pending_writes, 0);
}
