//! `TollroomService`: the entry point the platform talks to.
//!
//! Ties the layers together: room lifecycle hooks and participant calls
//! go to the room actors, presence is tracked here, and a background
//! sweeper settles participants whose grace period ran out.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tollroom_billing::{
    BillingSession, BillingState, FinalCost, IdempotencyKey, JoinOutcome, Ledger, ReconcileReport,
    Wallet,
};
use tollroom_protocol::{Clock, Money, Occupancy, ParticipantId, Role, RoomId};
use tollroom_room::{
    BroadcastBus, EventBus, RoomConfig, RoomDeps, RoomHandle, RoomInfo, RoomManager, leave_all,
};
use tollroom_seats::SeatGrant;
use tollroom_tick::{MeterConfig, MeterScheduler};

use crate::TollroomError;
use crate::presence::{Presence, PresenceTracker};

/// Service-wide settings. Per-room pricing lives in [`RoomConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How long a disconnected participant keeps their seat and session.
    pub presence_grace_secs: u64,
    /// Silence after which a participant counts as disconnected. `None`
    /// waits for an explicit disconnect.
    pub heartbeat_timeout_secs: Option<u64>,
    /// How often the presence sweeper runs.
    pub sweep_interval_ms: u64,
    /// Command queue size for each room actor.
    pub room_channel_size: usize,
    /// Event buffer for the default broadcast bus.
    pub bus_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            presence_grace_secs: 30,
            heartbeat_timeout_secs: None,
            sweep_interval_ms: 1000,
            room_channel_size: tollroom_room::DEFAULT_CHANNEL_SIZE,
            bus_capacity: 256,
        }
    }
}

/// Builder for a [`TollroomService`].
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tollroom::prelude::*;
///
/// let service = Arc::new(
///     TollroomService::builder()
///         .presence_grace_secs(45)
///         .build(wallet, ledger, SystemClock),
/// );
/// let _sweeper = service.spawn_presence_sweeper();
/// ```
#[derive(Debug, Clone, Default)]
pub struct TollroomServiceBuilder {
    config: ServiceConfig,
}

impl TollroomServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn presence_grace_secs(mut self, secs: u64) -> Self {
        self.config.presence_grace_secs = secs;
        self
    }

    pub fn heartbeat_timeout_secs(mut self, secs: u64) -> Self {
        self.config.heartbeat_timeout_secs = Some(secs);
        self
    }

    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.config.sweep_interval_ms = ms;
        self
    }

    /// Builds a service that publishes to an in-process [`BroadcastBus`].
    pub fn build<W, L, K>(
        self,
        wallet: W,
        ledger: L,
        clock: K,
    ) -> TollroomService<W, L, BroadcastBus, K>
    where
        W: Wallet,
        L: Ledger,
        K: Clock,
    {
        let bus = BroadcastBus::new(self.config.bus_capacity);
        self.build_with(RoomDeps::new(
            Arc::new(wallet),
            Arc::new(ledger),
            Arc::new(bus),
            Arc::new(clock),
        ))
    }

    /// Builds a service over caller-supplied dependencies.
    pub fn build_with<W, L, B, K>(self, deps: RoomDeps<W, L, B, K>) -> TollroomService<W, L, B, K>
    where
        W: Wallet,
        L: Ledger,
        B: EventBus,
        K: Clock,
    {
        let presence = PresenceTracker::new(
            self.config.presence_grace_secs,
            self.config.heartbeat_timeout_secs,
        );
        TollroomService {
            wallet: Arc::clone(&deps.wallet),
            ledger: Arc::clone(&deps.ledger),
            bus: Arc::clone(&deps.bus),
            clock: Arc::clone(&deps.clock),
            rooms: Mutex::new(RoomManager::with_channel_size(
                deps,
                self.config.room_channel_size,
            )),
            presence: Mutex::new(presence),
            config: self.config,
        }
    }
}

/// Room billing and camera seats for every room on the platform.
///
/// Share it as `Arc<TollroomService<..>>`. Locks are held only long
/// enough to look up a room handle; the room call itself runs outside
/// the lock, so a slow wallet in one room never stalls another.
pub struct TollroomService<W, L, B, K> {
    rooms: Mutex<RoomManager<W, L, B, K>>,
    presence: Mutex<PresenceTracker>,
    wallet: Arc<W>,
    ledger: Arc<L>,
    bus: Arc<B>,
    clock: Arc<K>,
    config: ServiceConfig,
}

impl TollroomService<(), (), (), ()> {
    pub fn builder() -> TollroomServiceBuilder {
        TollroomServiceBuilder::new()
    }
}

impl<W, L, B, K> TollroomService<W, L, B, K>
where
    W: Wallet,
    L: Ledger,
    B: EventBus,
    K: Clock,
{
    // =====================================================================
    // Room lifecycle
    // =====================================================================

    /// The platform created a room.
    pub async fn on_room_created(
        &self,
        room_id: RoomId,
        config: RoomConfig,
    ) -> Result<RoomHandle, TollroomError> {
        Ok(self.rooms.lock().await.on_room_created(room_id, config)?)
    }

    /// The platform destroyed a room. Every open session is settled and
    /// every seat cleared before this returns.
    pub async fn on_room_destroyed(&self, room_id: RoomId) -> Result<Vec<FinalCost>, TollroomError> {
        let handle = self.rooms.lock().await.remove_room(room_id)?;
        let costs = handle.shutdown().await?;
        tracing::info!(%room_id, settled = costs.len(), "room destroyed");
        Ok(costs)
    }

    // =====================================================================
    // Participants
    // =====================================================================

    /// Admits a participant, charging the room's entry fee at most once
    /// per `key`. Counts as a heartbeat.
    pub async fn join(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
        role: Role,
        key: IdempotencyKey,
    ) -> Result<JoinOutcome, TollroomError> {
        let handle = self.room(room_id).await?;
        let outcome = handle.join(participant, role, key).await?;
        self.rooms.lock().await.track(participant, room_id);
        self.presence
            .lock()
            .await
            .heartbeat(participant, self.clock.now());
        Ok(outcome)
    }

    /// Settles a participant out of a room and releases their seat.
    pub async fn leave(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
    ) -> Result<FinalCost, TollroomError> {
        let (handle, still_inside) = {
            let mut rooms = self.rooms.lock().await;
            let handle = rooms.handle(room_id)?;
            rooms.untrack(participant, room_id);
            (handle, !rooms.rooms_of(participant).is_empty())
        };
        if !still_inside {
            self.presence.lock().await.forget(participant);
        }
        Ok(handle.leave(participant).await?)
    }

    /// Claims a camera seat. A seat holder is tracked like a joined
    /// participant, so a presence timeout frees the seat even when the
    /// holder never opened a billing session (a room's host).
    pub async fn join_camera(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
        role: Role,
    ) -> Result<SeatGrant, TollroomError> {
        let handle = self.room(room_id).await?;
        let grant = handle.join_camera(participant, role).await?;
        self.rooms.lock().await.track(participant, room_id);
        self.presence
            .lock()
            .await
            .heartbeat(participant, self.clock.now());
        Ok(grant)
    }

    /// Returns `false` if the participant held no seat.
    pub async fn leave_camera(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
    ) -> Result<bool, TollroomError> {
        let handle = self.room(room_id).await?;
        Ok(handle.leave_camera(participant).await?)
    }

    pub async fn occupancy(&self, room_id: RoomId) -> Result<Occupancy, TollroomError> {
        Ok(self.room(room_id).await?.occupancy())
    }

    /// The participant's live session in the room, if any.
    pub async fn session(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
    ) -> Result<Option<BillingSession>, TollroomError> {
        let handle = self.room(room_id).await?;
        Ok(handle.session(participant).await?)
    }

    pub async fn billing_state(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
    ) -> Result<BillingState, TollroomError> {
        let handle = self.room(room_id).await?;
        Ok(handle.billing_state(participant).await?)
    }

    pub async fn tip(
        &self,
        room_id: RoomId,
        from: ParticipantId,
        to: ParticipantId,
        amount: Money,
        key: IdempotencyKey,
    ) -> Result<(), TollroomError> {
        let handle = self.room(room_id).await?;
        Ok(handle.tip(from, to, amount, key).await?)
    }

    pub async fn room_info(&self, room_id: RoomId) -> Result<RoomInfo, TollroomError> {
        let handle = self.room(room_id).await?;
        Ok(handle.info().await?)
    }

    /// Rooms the participant is in, in ID order.
    pub async fn rooms_of(&self, participant: ParticipantId) -> Vec<RoomId> {
        self.rooms.lock().await.rooms_of(participant)
    }

    // =====================================================================
    // Presence
    // =====================================================================

    /// The participant is still here. Returns `true` if this ended a
    /// disconnect grace period.
    pub async fn heartbeat(&self, participant: ParticipantId) -> bool {
        self.presence
            .lock()
            .await
            .heartbeat(participant, self.clock.now())
    }

    /// The platform lost the participant's connection. Their seats and
    /// sessions survive until the grace period runs out.
    pub async fn disconnect(&self, participant: ParticipantId) {
        self.presence
            .lock()
            .await
            .disconnect(participant, self.clock.now());
    }

    pub async fn presence(&self, participant: ParticipantId) -> Option<Presence> {
        self.presence.lock().await.get(participant)
    }

    /// Settles the participant out of every room they are in, right now.
    pub async fn on_presence_timeout(&self, participant: ParticipantId) -> Vec<(RoomId, FinalCost)> {
        let handles = self.rooms.lock().await.take_participant(participant);
        self.presence.lock().await.forget(participant);
        leave_all(participant, handles).await
    }

    /// One sweep: every participant whose grace period has elapsed is
    /// timed out. Returns what each of them was charged.
    pub async fn sweep_presence(&self) -> Vec<(ParticipantId, Vec<(RoomId, FinalCost)>)> {
        let expired = {
            let mut presence = self.presence.lock().await;
            let expired = presence.expire_stale(self.clock.now());
            presence.cleanup_expired();
            expired
        };

        let mut settled = Vec::with_capacity(expired.len());
        for participant in expired {
            let handles = self.rooms.lock().await.take_participant(participant);
            settled.push((participant, leave_all(participant, handles).await));
        }
        settled
    }

    /// Runs [`sweep_presence`](Self::sweep_presence) every
    /// `sweep_interval_ms` until the service is dropped.
    pub fn spawn_presence_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        let mut scheduler =
            MeterScheduler::new(MeterConfig::every_millis(self.config.sweep_interval_ms));

        tokio::spawn(async move {
            loop {
                scheduler.wait_for_tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                let settled = service.sweep_presence().await;
                if !settled.is_empty() {
                    tracing::debug!(participants = settled.len(), "presence sweep settled");
                }
                scheduler.record_work_done();
            }
            tracing::debug!("presence sweeper stopped");
        })
    }

    // =====================================================================
    // Reconciliation and accessors
    // =====================================================================

    /// Retries queued wallet and ledger writes in every room.
    pub async fn reconcile(&self) -> Vec<(RoomId, ReconcileReport)> {
        let handles = self.rooms.lock().await.room_handles();
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.reconcile().await {
                Ok(report) => reports.push((handle.room_id(), report)),
                Err(e) => {
                    tracing::debug!(room_id = %handle.room_id(), error = %e, "reconcile skipped");
                }
            }
        }
        reports
    }

    async fn room(&self, room_id: RoomId) -> Result<RoomHandle, TollroomError> {
        Ok(self.rooms.lock().await.handle(room_id)?)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.room_count()
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    pub fn wallet(&self) -> &Arc<W> {
        &self.wallet
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn clock(&self) -> &Arc<K> {
        &self.clock
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
