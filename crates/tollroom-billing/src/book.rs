//! The billing book: every billing session for one room.
//!
//! This is the central piece of the billing layer. It's responsible for:
//! - Admitting participants (charging the entry fee exactly once)
//! - Ticking sessions through the free trial into metering
//! - Settling sessions when participants leave (charging the metered part
//!   exactly once)
//! - Queueing charges that failed so a reconciliation pass can retry them
//! - Tips between participants in the room
//!
//! # Concurrency note
//!
//! `BillingBook` is NOT thread-safe by itself and its async methods take
//! `&mut self`. It is owned by a single room actor, which processes one
//! command at a time; that ownership is what makes "check for an active
//! session, then charge" atomic per room.

use std::collections::HashMap;

use tollroom_protocol::{
    BillingState, Money, ParticipantId, Role, RoomId, SessionId, SessionUpdate, Timestamp,
};

use crate::{
    BillingError, BillingSession, EntryKind, FinalCost, IdempotencyKey, Ledger, LedgerEntry,
    Rates, Settlement, Wallet,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a successful join.
///
/// Joining twice is not an error: a duplicate click or a reconnect race
/// gets the session that already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new session was created and the entry fee charged.
    Joined(BillingSession),
    /// The participant already had an active session; nothing charged.
    AlreadyJoined(BillingSession),
}

impl JoinOutcome {
    pub fn session(&self) -> &BillingSession {
        match self {
            Self::Joined(s) | Self::AlreadyJoined(s) => s,
        }
    }

    pub fn into_session(self) -> BillingSession {
        match self {
            Self::Joined(s) | Self::AlreadyJoined(s) => s,
        }
    }

    /// Returns `true` if this call created the session.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Joined(_))
    }
}

/// The host's share of a charge: same amount, credited once the payer's
/// debit has gone through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub recipient: ParticipantId,
    pub key: IdempotencyKey,
}

/// A money movement that failed and is waiting to be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingStep {
    /// Debit the payer, pay the host, then record the entry.
    Charge {
        payer: ParticipantId,
        amount: Money,
        entry: LedgerEntry,
        payout: Option<Payout>,
    },
    /// The debit went through; only the ledger line is missing.
    Record(LedgerEntry),
    /// Credit a recipient (creator payout or tip).
    Credit {
        recipient: ParticipantId,
        amount: Money,
        key: IdempotencyKey,
    },
}

/// An entry in the reconciliation queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// The session the movement belongs to, if any (tips have none).
    pub session_id: Option<SessionId>,
    pub step: PendingStep,
    /// Why the last attempt failed.
    pub reason: String,
}

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Writes that went through on this pass.
    pub completed: usize,
    /// Writes still queued.
    pub remaining: usize,
    /// One `SettlementFailed` per session still missing a charge.
    pub failures: Vec<BillingError>,
}

// ---------------------------------------------------------------------------
// BillingBook
// ---------------------------------------------------------------------------

/// All billing sessions for one room.
///
/// ## Lifecycle
///
/// ```text
/// join() ──→ [FreeTrial] ──tick_all()──→ [Metered] ──settle()──→ [Ended]
///                │                                                  │
///                └──────────────────settle()────────────────────────┤
///                                                                   ▼
///                                            archived (+ queued if unsettled)
/// ```
pub struct BillingBook {
    room_id: RoomId,
    rates: Rates,
    /// Creator who receives entry and metered payouts.
    host: Option<ParticipantId>,

    /// Sessions that haven't ended, keyed by participant. At most one per
    /// participant (key invariant).
    active: HashMap<ParticipantId, BillingSession>,

    /// Ended sessions that are either unsettled or some participant's
    /// latest. Immutable except for their settlement flag.
    archive: HashMap<SessionId, BillingSession>,

    /// Each participant's most recent session, so a repeated settle can
    /// find what it already computed.
    latest: HashMap<ParticipantId, SessionId>,

    /// Join keys that already admitted a session. A reused key would be
    /// deduplicated by the wallet and admit for free.
    admitted_keys: HashMap<IdempotencyKey, SessionId>,

    /// The reconciliation queue.
    pending: Vec<PendingWrite>,
}

impl BillingBook {
    /// Creates an empty book for a room.
    pub fn new(room_id: RoomId, rates: Rates, host: Option<ParticipantId>) -> Self {
        Self {
            room_id,
            rates,
            host,
            active: HashMap::new(),
            archive: HashMap::new(),
            latest: HashMap::new(),
            admitted_keys: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn rates(&self) -> Rates {
        self.rates
    }

    pub fn host(&self) -> Option<ParticipantId> {
        self.host
    }

    // =====================================================================
    // join
    // =====================================================================

    /// Admits a participant to the room.
    ///
    /// Fans are charged the entry fee through `wallet` under `key`;
    /// creators are admitted free. If the participant already has an
    /// active session it is returned as [`JoinOutcome::AlreadyJoined`] and
    /// nothing is charged.
    ///
    /// A ledger or payout write that fails after the debit succeeded does
    /// not undo the admission. It goes to the reconciliation queue.
    ///
    /// # Errors
    /// - [`BillingError::InsufficientFunds`] — balance too low, no session
    /// - [`BillingError::WalletUnavailable`] — wallet down, no session
    /// - [`BillingError::KeyReused`] — `key` already admitted an earlier
    ///   session; the caller must send a fresh key to join again
    pub async fn join<W: Wallet, L: Ledger>(
        &mut self,
        participant: ParticipantId,
        role: Role,
        key: IdempotencyKey,
        now: Timestamp,
        wallet: &W,
        ledger: &L,
    ) -> Result<JoinOutcome, BillingError> {
        if let Some(existing) = self.active.get(&participant) {
            tracing::debug!(
                room_id = %self.room_id,
                %participant,
                session_id = %existing.id(),
                "join repeated, returning existing session"
            );
            return Ok(JoinOutcome::AlreadyJoined(existing.tick(now)));
        }

        if let Some(&session_id) = self.admitted_keys.get(&key) {
            tracing::warn!(
                room_id = %self.room_id,
                %participant,
                %session_id,
                "join key already used, refusing"
            );
            return Err(BillingError::KeyReused {
                key: key.to_string(),
                session_id,
            });
        }

        let rates = if role.is_billing_exempt() {
            Rates::free()
        } else {
            self.rates
        };

        if !rates.entry_fee.is_zero() {
            wallet
                .debit(participant, rates.entry_fee, &key)
                .await
                .map_err(|e| BillingError::from_wallet(participant, e))?;
        }

        let session =
            BillingSession::admitted(self.room_id, participant, role, rates, now, key.clone());
        let session_id = session.id();

        if !rates.entry_fee.is_zero() {
            let entry = LedgerEntry {
                room_id: self.room_id,
                participant_id: participant,
                kind: EntryKind::EntryFee,
                amount: rates.entry_fee,
                timestamp: now,
                session_id: Some(session_id),
                key: key.clone(),
            };
            if let Err(e) = ledger.record(entry.clone()).await {
                tracing::warn!(
                    room_id = %self.room_id,
                    %participant,
                    %session_id,
                    error = %e,
                    "entry fee charged but ledger write failed, queued"
                );
                self.pending.push(PendingWrite {
                    session_id: Some(session_id),
                    step: PendingStep::Record(entry),
                    reason: e.to_string(),
                });
            }
            if let Some(payout) = self.payout_for(participant, key.derive("payout")) {
                self.pay_out(payout, rates.entry_fee, wallet).await;
            }
        }

        tracing::info!(
            room_id = %self.room_id,
            %participant,
            %role,
            %session_id,
            entry_fee = %rates.entry_fee,
            "participant admitted"
        );

        self.admitted_keys.insert(key, session_id);
        self.latest.insert(participant, session_id);
        self.active.insert(participant, session.clone());
        self.prune_archive();
        Ok(JoinOutcome::Joined(session))
    }

    // =====================================================================
    // tick
    // =====================================================================

    /// Recomputes every active session as of `now`.
    ///
    /// Returns an update for each session whose state changed (free trial
    /// ran out). Nothing is charged.
    pub fn tick_all(&mut self, now: Timestamp) -> Vec<SessionUpdate> {
        let mut changed = Vec::new();
        for session in self.active.values_mut() {
            if session.advance(now) {
                tracing::info!(
                    room_id = %self.room_id,
                    participant = %session.participant_id(),
                    session_id = %session.id(),
                    "free trial over, metering started"
                );
                changed.push(session.update());
            }
        }
        if !self.active.is_empty() {
            tracing::trace!(room_id = %self.room_id, sessions = self.active.len(), "billing tick");
        }
        changed
    }

    /// The participant's active session as of `now`, without mutating it.
    pub fn session(&self, participant: ParticipantId, now: Timestamp) -> Option<BillingSession> {
        self.active.get(&participant).map(|s| s.tick(now))
    }

    /// Where the participant stands in this room.
    ///
    /// `Ended` if their latest session is over, `NotJoined` if they never
    /// joined.
    pub fn state_of(&self, participant: ParticipantId) -> BillingState {
        if let Some(session) = self.active.get(&participant) {
            return session.state();
        }
        if self.latest.contains_key(&participant) {
            BillingState::Ended
        } else {
            BillingState::NotJoined
        }
    }

    /// Returns `true` if the participant is currently admitted.
    pub fn is_active(&self, participant: ParticipantId) -> bool {
        self.active.contains_key(&participant)
    }

    /// The role the participant joined with, while active.
    pub fn role_of(&self, participant: ParticipantId) -> Option<Role> {
        self.active.get(&participant).map(|s| s.role())
    }

    /// Participants with an active session.
    pub fn active_participants(&self) -> Vec<ParticipantId> {
        self.active.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Looks up an ended session. Only the participant's latest session
    /// and sessions still waiting on reconciliation are kept.
    pub fn archived(&self, session_id: SessionId) -> Option<&BillingSession> {
        self.archive.get(&session_id)
    }

    // =====================================================================
    // settle
    // =====================================================================

    /// Ends the participant's session and charges the metered portion.
    ///
    /// Safe to call repeatedly: once the session is archived, further
    /// calls return the same [`FinalCost`] without charging.
    ///
    /// If the metered charge fails the session is still ended, flagged
    /// [`Settlement::Unsettled`], and queued; the returned cost has
    /// `settled == false`. Leaving a room never fails because billing did.
    ///
    /// # Errors
    /// [`BillingError::NotJoined`] if the participant never joined.
    pub async fn settle<W: Wallet, L: Ledger>(
        &mut self,
        participant: ParticipantId,
        now: Timestamp,
        wallet: &W,
        ledger: &L,
    ) -> Result<FinalCost, BillingError> {
        let Some(mut session) = self.active.remove(&participant) else {
            return self
                .latest
                .get(&participant)
                .and_then(|id| self.archive.get(id))
                .map(BillingSession::final_cost)
                .ok_or(BillingError::NotJoined(participant, self.room_id));
        };

        session.end(now);
        let session_id = session.id();
        let metered = session.metered_cost();

        session.settlement = if metered.is_zero() {
            Settlement::Settled
        } else {
            let key = IdempotencyKey::for_session(self.room_id, session_id, "settle");
            let entry = LedgerEntry {
                room_id: self.room_id,
                participant_id: participant,
                kind: EntryKind::Metered,
                amount: metered,
                timestamp: now,
                session_id: Some(session_id),
                key: key.clone(),
            };
            let payout = self.payout_for(participant, key.derive("payout"));
            let outcome = self
                .charge(participant, metered, entry, payout, Some(session_id), wallet, ledger)
                .await;
            match outcome {
                Ok(()) => Settlement::Settled,
                Err(reason) => {
                    let err = BillingError::SettlementFailed {
                        session_id,
                        reason: reason.clone(),
                    };
                    tracing::warn!(
                        room_id = %self.room_id,
                        %participant,
                        error = %err,
                        "session ended unsettled, queued for reconciliation"
                    );
                    Settlement::Unsettled { reason }
                }
            }
        };

        // An entry-fee line still queued from join keeps the session open.
        if session.settlement == Settlement::Settled {
            if let Some(w) = self.pending.iter().find(|w| w.session_id == Some(session_id)) {
                session.settlement = Settlement::Unsettled {
                    reason: w.reason.clone(),
                };
            }
        }

        let cost = session.final_cost();
        tracing::info!(
            room_id = %self.room_id,
            %participant,
            %session_id,
            elapsed_secs = cost.elapsed_secs,
            total = %cost.total,
            settled = cost.settled,
            "session settled"
        );

        self.archive.insert(session_id, session);
        Ok(cost)
    }

    /// Settles every active session (room teardown).
    pub async fn settle_all<W: Wallet, L: Ledger>(
        &mut self,
        now: Timestamp,
        wallet: &W,
        ledger: &L,
    ) -> Vec<FinalCost> {
        let participants = self.active_participants();
        let mut costs = Vec::with_capacity(participants.len());
        for participant in participants {
            if let Ok(cost) = self.settle(participant, now, wallet, ledger).await {
                costs.push(cost);
            }
        }
        costs
    }

    // =====================================================================
    // tip
    // =====================================================================

    /// Moves `amount` from one participant to a creator in the room.
    ///
    /// The tipper must be in the room; the recipient must be the host or a
    /// creator who is present. The debit is synchronous (a failed debit
    /// means no tip); the credit and ledger line are queued on failure.
    ///
    /// # Errors
    /// - [`BillingError::InvalidTip`] — zero amount or wrong parties
    /// - [`BillingError::InsufficientFunds`] / [`BillingError::WalletUnavailable`]
    #[allow(clippy::too_many_arguments)]
    pub async fn tip<W: Wallet, L: Ledger>(
        &mut self,
        from: ParticipantId,
        to: ParticipantId,
        amount: Money,
        key: IdempotencyKey,
        now: Timestamp,
        wallet: &W,
        ledger: &L,
    ) -> Result<(), BillingError> {
        if amount.is_zero() {
            return Err(BillingError::InvalidTip("amount must be positive".into()));
        }
        if from == to {
            return Err(BillingError::InvalidTip("cannot tip yourself".into()));
        }
        if !self.is_active(from) {
            return Err(BillingError::NotJoined(from, self.room_id));
        }
        let recipient_is_creator =
            self.host == Some(to) || self.role_of(to) == Some(Role::Creator);
        if !recipient_is_creator {
            return Err(BillingError::InvalidTip(format!(
                "{to} is not a creator in room {}",
                self.room_id
            )));
        }

        wallet
            .debit(from, amount, &key)
            .await
            .map_err(|e| BillingError::from_wallet(from, e))?;

        let credit_key = key.derive("credit");
        if let Err(e) = wallet.credit(to, amount, &credit_key).await {
            tracing::warn!(room_id = %self.room_id, %from, %to, error = %e, "tip credit failed, queued");
            self.pending.push(PendingWrite {
                session_id: None,
                step: PendingStep::Credit {
                    recipient: to,
                    amount,
                    key: credit_key,
                },
                reason: e.to_string(),
            });
        }

        let entry = LedgerEntry {
            room_id: self.room_id,
            participant_id: from,
            kind: EntryKind::Tip,
            amount,
            timestamp: now,
            session_id: None,
            key,
        };
        if let Err(e) = ledger.record(entry.clone()).await {
            tracing::warn!(room_id = %self.room_id, %from, error = %e, "tip ledger write failed, queued");
            self.pending.push(PendingWrite {
                session_id: None,
                step: PendingStep::Record(entry),
                reason: e.to_string(),
            });
        }

        tracing::info!(room_id = %self.room_id, %from, %to, %amount, "tip sent");
        Ok(())
    }

    // =====================================================================
    // reconciliation
    // =====================================================================

    /// The reconciliation queue.
    pub fn unsettled(&self) -> &[PendingWrite] {
        &self.pending
    }

    /// Retries every queued write with its original idempotency key.
    ///
    /// Sessions whose last missing charge goes through are flagged
    /// [`Settlement::Settled`].
    pub async fn reconcile<W: Wallet, L: Ledger>(
        &mut self,
        wallet: &W,
        ledger: &L,
    ) -> ReconcileReport {
        let queued = std::mem::take(&mut self.pending);
        let mut report = ReconcileReport::default();

        for write in queued {
            let result = match &write.step {
                PendingStep::Charge {
                    payer,
                    amount,
                    entry,
                    payout,
                } => {
                    self.charge(
                        *payer,
                        *amount,
                        entry.clone(),
                        payout.clone(),
                        write.session_id,
                        wallet,
                        ledger,
                    )
                    .await
                }
                PendingStep::Record(entry) => ledger
                    .record(entry.clone())
                    .await
                    .map_err(|e| {
                        self.pending.push(PendingWrite {
                            reason: e.to_string(),
                            ..write.clone()
                        });
                        e.to_string()
                    }),
                PendingStep::Credit {
                    recipient,
                    amount,
                    key,
                } => wallet.credit(*recipient, *amount, key).await.map_err(|e| {
                    self.pending.push(PendingWrite {
                        reason: e.to_string(),
                        ..write.clone()
                    });
                    e.to_string()
                }),
            };
            if result.is_ok() {
                report.completed += 1;
            }
        }

        // Flag sessions with nothing left in the queue as settled.
        for session in self.archive.values_mut() {
            if !matches!(session.settlement, Settlement::Unsettled { .. }) {
                continue;
            }
            let still_pending = self
                .pending
                .iter()
                .find(|w| w.session_id == Some(session.id()));
            match still_pending {
                None => {
                    tracing::info!(
                        room_id = %self.room_id,
                        session_id = %session.id(),
                        "session reconciled"
                    );
                    session.settlement = Settlement::Settled;
                }
                Some(w) => {
                    session.settlement = Settlement::Unsettled {
                        reason: w.reason.clone(),
                    };
                    report.failures.push(BillingError::SettlementFailed {
                        session_id: session.id(),
                        reason: w.reason.clone(),
                    });
                }
            }
        }

        self.prune_archive();
        report.remaining = self.pending.len();
        report
    }

    // =====================================================================
    // helpers
    // =====================================================================

    /// Debits `payer`, pays the host their share, and records `entry`. On
    /// failure the remaining steps are queued and the reason returned; a
    /// payout rides along with a queued debit until the debit goes through.
    #[allow(clippy::too_many_arguments)]
    async fn charge<W: Wallet, L: Ledger>(
        &mut self,
        payer: ParticipantId,
        amount: Money,
        entry: LedgerEntry,
        payout: Option<Payout>,
        session_id: Option<SessionId>,
        wallet: &W,
        ledger: &L,
    ) -> Result<(), String> {
        if let Err(e) = wallet.debit(payer, amount, &entry.key).await {
            let reason = e.to_string();
            self.pending.push(PendingWrite {
                session_id,
                step: PendingStep::Charge {
                    payer,
                    amount,
                    entry,
                    payout,
                },
                reason: reason.clone(),
            });
            return Err(reason);
        }
        if let Some(payout) = payout {
            self.pay_out(payout, amount, wallet).await;
        }
        if let Err(e) = ledger.record(entry.clone()).await {
            let reason = e.to_string();
            self.pending.push(PendingWrite {
                session_id,
                step: PendingStep::Record(entry),
                reason: reason.clone(),
            });
            return Err(reason);
        }
        Ok(())
    }

    /// The host's payout for a charge to `payer`, if the room has a host
    /// other than the payer.
    fn payout_for(&self, payer: ParticipantId, key: IdempotencyKey) -> Option<Payout> {
        self.host
            .filter(|&host| host != payer)
            .map(|recipient| Payout { recipient, key })
    }

    /// Credits a payout. Failures are queued.
    async fn pay_out<W: Wallet>(&mut self, payout: Payout, amount: Money, wallet: &W) {
        if amount.is_zero() {
            return;
        }
        let Payout { recipient, key } = payout;
        if let Err(e) = wallet.credit(recipient, amount, &key).await {
            tracing::warn!(
                room_id = %self.room_id,
                host = %recipient,
                %amount,
                error = %e,
                "host payout failed, queued"
            );
            self.pending.push(PendingWrite {
                session_id: None,
                step: PendingStep::Credit {
                    recipient,
                    amount,
                    key,
                },
                reason: e.to_string(),
            });
        }
    }

    /// Drops settled sessions that are no longer anyone's latest.
    fn prune_archive(&mut self) {
        let latest = &self.latest;
        self.archive.retain(|id, session| {
            session.settlement != Settlement::Settled
                || latest.get(&session.participant_id()) == Some(id)
        });
    }
}

// =========================================================================
// Tests
// =========================================================================
