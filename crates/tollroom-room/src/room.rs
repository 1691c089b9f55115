//! Room actor: an isolated Tokio task that owns a room's money and seats.
//!
//! Each room runs in its own task, communicating with the outside world
//! through an mpsc channel. The actor is the only code that touches the
//! room's [`BillingBook`] and [`CameraSlots`], and it handles one command
//! at a time, so "is there a free seat? take it" and "is there a session?
//! charge the entry fee" can never interleave with another request for
//! the same room. Rooms never share state, so different rooms never wait
//! on each other.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tollroom_billing::{
    BillingBook, BillingSession, FinalCost, IdempotencyKey, JoinOutcome, Ledger, PendingWrite,
    ReconcileReport, Wallet,
};
use tollroom_protocol::{
    BillingState, Clock, Money, Occupancy, ParticipantId, Role, RoomEvent, RoomEventKind, RoomId,
};
use tollroom_seats::{CameraSlots, SeatError, SeatGrant};
use tollroom_tick::{MeterConfig, MeterScheduler};

use crate::{BusError, EventBus, RoomConfig, RoomError};

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// The external collaborators every room actor talks to.
///
/// Shared by all rooms; cloning only bumps reference counts.
pub struct RoomDeps<W, L, B, K> {
    pub wallet: Arc<W>,
    pub ledger: Arc<L>,
    pub bus: Arc<B>,
    pub clock: Arc<K>,
}

impl<W, L, B, K> RoomDeps<W, L, B, K> {
    pub fn new(wallet: Arc<W>, ledger: Arc<L>, bus: Arc<B>, clock: Arc<K>) -> Self {
        Self {
            wallet,
            ledger,
            bus,
            clock,
        }
    }
}

impl<W, L, B, K> Clone for RoomDeps<W, L, B, K> {
    fn clone(&self) -> Self {
        Self {
            wallet: Arc::clone(&self.wallet),
            ledger: Arc::clone(&self.ledger),
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent to a room actor through its channel.
///
/// Every variant carries a `oneshot::Sender` reply channel: the caller
/// sends a command and waits for the answer, so no operation here is
/// fire-and-forget.
pub(crate) enum RoomCommand {
    Join {
        participant: ParticipantId,
        role: Role,
        key: IdempotencyKey,
        reply: oneshot::Sender<Result<JoinOutcome, RoomError>>,
    },
    Leave {
        participant: ParticipantId,
        reply: oneshot::Sender<Result<FinalCost, RoomError>>,
    },
    JoinCamera {
        participant: ParticipantId,
        role: Role,
        reply: oneshot::Sender<Result<SeatGrant, RoomError>>,
    },
    LeaveCamera {
        participant: ParticipantId,
        reply: oneshot::Sender<bool>,
    },
    Session {
        participant: ParticipantId,
        reply: oneshot::Sender<Option<BillingSession>>,
    },
    BillingState {
        participant: ParticipantId,
        reply: oneshot::Sender<BillingState>,
    },
    Tip {
        from: ParticipantId,
        to: ParticipantId,
        amount: Money,
        key: IdempotencyKey,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Reconcile {
        reply: oneshot::Sender<ReconcileReport>,
    },
    Unsettled {
        reply: oneshot::Sender<Vec<PendingWrite>>,
    },
    Info {
        reply: oneshot::Sender<RoomInfo>,
    },
    /// Settle everyone, clear every seat, stop.
    Shutdown {
        reply: oneshot::Sender<Vec<FinalCost>>,
    },
}

/// A summary of a room's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub config: RoomConfig,
    /// Participants with an open billing session.
    pub active_sessions: usize,
    pub creators_on_camera: usize,
    pub fans_on_camera: usize,
    /// Writes waiting in the reconciliation queue.
    pub pending_writes: usize,
}

// ---------------------------------------------------------------------------
// RoomHandle
// ---------------------------------------------------------------------------

/// Handle to a running room actor.
///
/// Cheap to clone: an `mpsc::Sender` plus a `watch::Receiver`. Callers on
/// different tasks can hold their own clone and talk to the room
/// concurrently; the actor serializes them.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
    occupancy: watch::Receiver<Occupancy>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Sends a command and waits for the actor's reply.
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Admits a participant, charging the entry fee once.
    ///
    /// A participant who is already inside gets
    /// [`JoinOutcome::AlreadyJoined`] and is not charged again.
    pub async fn join(
        &self,
        participant: ParticipantId,
        role: Role,
        key: IdempotencyKey,
    ) -> Result<JoinOutcome, RoomError> {
        self.request(|reply| RoomCommand::Join {
            participant,
            role,
            key,
            reply,
        })
        .await?
    }

    /// Takes the participant off camera and settles their session.
    pub async fn leave(&self, participant: ParticipantId) -> Result<FinalCost, RoomError> {
        self.request(|reply| RoomCommand::Leave { participant, reply })
            .await?
    }

    /// Requests a camera seat in the pool for `role`.
    pub async fn join_camera(
        &self,
        participant: ParticipantId,
        role: Role,
    ) -> Result<SeatGrant, RoomError> {
        self.request(|reply| RoomCommand::JoinCamera {
            participant,
            role,
            reply,
        })
        .await?
    }

    /// Releases the participant's seat. Returns `false` if they held none.
    pub async fn leave_camera(&self, participant: ParticipantId) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::LeaveCamera { participant, reply })
            .await
    }

    /// The participant's active session, ticked to now.
    pub async fn session(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<BillingSession>, RoomError> {
        self.request(|reply| RoomCommand::Session { participant, reply })
            .await
    }

    pub async fn billing_state(&self, participant: ParticipantId) -> Result<BillingState, RoomError> {
        self.request(|reply| RoomCommand::BillingState { participant, reply })
            .await
    }

    /// Sends a tip from one participant to a creator in the room.
    pub async fn tip(
        &self,
        from: ParticipantId,
        to: ParticipantId,
        amount: Money,
        key: IdempotencyKey,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Tip {
            from,
            to,
            amount,
            key,
            reply,
        })
        .await?
    }

    /// Retries the room's queued wallet and ledger writes.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RoomError> {
        self.request(|reply| RoomCommand::Reconcile { reply }).await
    }

    /// The room's reconciliation queue.
    pub async fn unsettled(&self) -> Result<Vec<PendingWrite>, RoomError> {
        self.request(|reply| RoomCommand::Unsettled { reply }).await
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Settles every session, clears every seat and stops the actor.
    ///
    /// Returns the final costs of the sessions it closed.
    pub async fn shutdown(&self) -> Result<Vec<FinalCost>, RoomError> {
        self.request(|reply| RoomCommand::Shutdown { reply }).await
    }

    /// Current seat occupancy.
    ///
    /// Read from a watch channel, so it never waits behind commands
    /// queued for the actor. Still answers after the room has stopped
    /// (with the final, empty occupancy).
    pub fn occupancy(&self) -> Occupancy {
        self.occupancy.borrow().clone()
    }

    /// A receiver that is notified whenever occupancy changes.
    pub fn watch_occupancy(&self) -> watch::Receiver<Occupancy> {
        self.occupancy.clone()
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

// ---------------------------------------------------------------------------
// RoomActor
// ---------------------------------------------------------------------------

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor<W, L, B, K> {
    room_id: RoomId,
    config: RoomConfig,
    deps: RoomDeps<W, L, B, K>,
    book: BillingBook,
    seats: CameraSlots,
    occupancy: watch::Sender<Occupancy>,
    /// Paused while nobody has an open session.
    meter: MeterScheduler,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl<W, L, B, K> RoomActor<W, L, B, K>
where
    W: Wallet,
    L: Ledger,
    B: EventBus,
    K: Clock,
{
    /// Runs the actor loop until shutdown or until every handle is gone.
    async fn run(mut self) {
        tracing::info!(room_id = %self.room_id, "room actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        // Every handle dropped without a shutdown.
                        self.teardown().await;
                        break;
                    };
                    if let RoomCommand::Shutdown { reply } = cmd {
                        let costs = self.teardown().await;
                        let _ = reply.send(costs);
                        break;
                    }
                    self.handle(cmd).await;
                }
                _ = self.meter.wait_for_tick() => {
                    self.handle_tick();
                    self.meter.record_work_done();
                }
            }
        }

        tracing::info!(room_id = %self.room_id, "room actor stopped");
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                participant,
                role,
                key,
                reply,
            } => {
                let result = self.handle_join(participant, role, key).await;
                let _ = reply.send(result);
            }
            RoomCommand::Leave { participant, reply } => {
                let result = self.handle_leave(participant).await;
                let _ = reply.send(result);
            }
            RoomCommand::JoinCamera {
                participant,
                role,
                reply,
            } => {
                let _ = reply.send(self.handle_join_camera(participant, role));
            }
            RoomCommand::LeaveCamera { participant, reply } => {
                let _ = reply.send(self.release_seat(participant));
            }
            RoomCommand::Session { participant, reply } => {
                let _ = reply.send(self.book.session(participant, self.deps.clock.now()));
            }
            RoomCommand::BillingState { participant, reply } => {
                let _ = reply.send(self.book.state_of(participant));
            }
            RoomCommand::Tip {
                from,
                to,
                amount,
                key,
                reply,
            } => {
                let now = self.deps.clock.now();
                let result = self
                    .book
                    .tip(from, to, amount, key, now, &*self.deps.wallet, &*self.deps.ledger)
                    .await
                    .map_err(RoomError::from);
                let _ = reply.send(result);
            }
            RoomCommand::Reconcile { reply } => {
                let report = self
                    .book
                    .reconcile(&*self.deps.wallet, &*self.deps.ledger)
                    .await;
                if report.completed > 0 || report.remaining > 0 {
                    tracing::info!(
                        room_id = %self.room_id,
                        completed = report.completed,
                        remaining = report.remaining,
                        "reconciliation pass"
                    );
                }
                let _ = reply.send(report);
            }
            RoomCommand::Unsettled { reply } => {
                let _ = reply.send(self.book.unsettled().to_vec());
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Shutdown { .. } => {
                // Intercepted by `run`.
            }
        }
    }

    async fn handle_join(
        &mut self,
        participant: ParticipantId,
        role: Role,
        key: IdempotencyKey,
    ) -> Result<JoinOutcome, RoomError> {
        let now = self.deps.clock.now();
        let outcome = self
            .book
            .join(participant, role, key, now, &*self.deps.wallet, &*self.deps.ledger)
            .await?;

        if outcome.is_new() {
            self.publish(RoomEventKind::SessionStateChanged(outcome.session().update()));
            self.meter.resume();
        }
        Ok(outcome)
    }

    /// Seat first, then money: the seat is gone even if settling fails.
    async fn handle_leave(&mut self, participant: ParticipantId) -> Result<FinalCost, RoomError> {
        self.release_seat(participant);

        let was_active = self.book.is_active(participant);
        let now = self.deps.clock.now();
        let cost = self
            .book
            .settle(participant, now, &*self.deps.wallet, &*self.deps.ledger)
            .await?;

        if was_active {
            self.publish_ended(&cost);
            tracing::info!(
                room_id = %self.room_id,
                %participant,
                total = %cost.total,
                "participant left"
            );
        }
        if self.book.active_count() == 0 {
            self.meter.pause();
        }
        Ok(cost)
    }

    fn handle_join_camera(
        &mut self,
        participant: ParticipantId,
        role: Role,
    ) -> Result<SeatGrant, RoomError> {
        let eligible = match role {
            Role::Fan => self.book.is_active(participant),
            // The creator pool is for the host and creators who joined.
            Role::Creator => {
                self.book.host() == Some(participant)
                    || self.book.role_of(participant) == Some(Role::Creator)
            }
        };
        if role == Role::Creator && !eligible && self.seats.seat_of(participant).is_none() {
            return Err(SeatError::NotEligible(participant).into());
        }

        let grant = self
            .seats
            .join(participant, role, eligible, self.deps.clock.now())?;
        if grant.is_new() {
            tracing::info!(
                room_id = %self.room_id,
                %participant,
                %role,
                slot = grant.slot().index,
                "seat granted"
            );
            self.occupancy_changed();
        }
        Ok(grant)
    }

    /// Frees the participant's seat, if any. Returns whether one was freed.
    fn release_seat(&mut self, participant: ParticipantId) -> bool {
        let Some(role) = self.seats.leave(participant) else {
            return false;
        };
        tracing::info!(room_id = %self.room_id, %participant, %role, "seat released");
        self.occupancy_changed();
        true
    }

    fn handle_tick(&mut self) {
        let now = self.deps.clock.now();
        for update in self.book.tick_all(now) {
            self.publish(RoomEventKind::SessionStateChanged(update));
        }
        if self.book.active_count() == 0 {
            self.meter.pause();
        }
    }

    /// Clears every seat and settles every session.
    async fn teardown(&mut self) -> Vec<FinalCost> {
        tracing::info!(room_id = %self.room_id, "room shutting down");

        if !self.seats.clear().is_empty() {
            self.occupancy_changed();
        }

        let now = self.deps.clock.now();
        let costs = self
            .book
            .settle_all(now, &*self.deps.wallet, &*self.deps.ledger)
            .await;
        for cost in &costs {
            self.publish_ended(cost);
        }
        self.meter.pause();

        let unsettled = self.book.unsettled().len();
        if unsettled > 0 {
            tracing::warn!(
                room_id = %self.room_id,
                unsettled,
                "room closed with writes still queued"
            );
        }
        costs
    }

    // -- Events -----------------------------------------------------------

    fn occupancy_changed(&mut self) {
        let snapshot = self.seats.occupancy();
        self.occupancy.send_replace(snapshot.clone());
        self.publish(RoomEventKind::OccupancyChanged(snapshot));
    }

    fn publish_ended(&self, cost: &FinalCost) {
        if let Some(session) = self.book.archived(cost.session_id) {
            self.publish(RoomEventKind::SessionStateChanged(session.update()));
        }
    }

    /// Best effort: a failed publish is logged, never undone.
    fn publish(&self, kind: RoomEventKind) {
        let event = RoomEvent {
            room_id: self.room_id,
            at: self.deps.clock.now(),
            kind,
        };
        match self.deps.bus.publish(event) {
            Ok(()) => {}
            Err(BusError::NoSubscribers) => {
                tracing::trace!(room_id = %self.room_id, "event dropped, no subscribers");
            }
            Err(e) => {
                tracing::warn!(room_id = %self.room_id, error = %e, "event publish failed");
            }
        }
    }

    fn info(&self) -> RoomInfo {
        let occupancy = self.seats.occupancy();
        RoomInfo {
            room_id: self.room_id,
            config: self.config.clone(),
            active_sessions: self.book.active_count(),
            creators_on_camera: occupancy.occupied(Role::Creator),
            fans_on_camera: occupancy.occupied(Role::Fan),
            pending_writes: self.book.unsettled().len(),
        }
    }
}

/// Spawns a room actor and returns a handle to it.
///
/// `channel_size` bounds the command queue; when it fills up, callers
/// wait.
pub(crate) fn spawn_room<W, L, B, K>(
    room_id: RoomId,
    config: RoomConfig,
    deps: RoomDeps<W, L, B, K>,
    channel_size: usize,
) -> RoomHandle
where
    W: Wallet,
    L: Ledger,
    B: EventBus,
    K: Clock,
{
    let config = config.validated();
    let (tx, rx) = mpsc::channel(channel_size.max(1));

    let seats = CameraSlots::new(config.creator_slots, config.fan_slots);
    let (occupancy_tx, occupancy_rx) = watch::channel(seats.occupancy());

    let mut meter = MeterScheduler::new(MeterConfig::every(config.meter_interval()));
    meter.pause();

    let actor = RoomActor {
        room_id,
        book: BillingBook::new(room_id, config.rates(), config.host),
        config,
        deps,
        seats,
        occupancy: occupancy_tx,
        meter,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
        occupancy: occupancy_rx,
    }
}
