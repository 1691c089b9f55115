//! Billing session types: one participant's paid presence in one room.
//!
//! A session tracks:
//! - WHO is paying (`participant_id`, `role`)
//! - WHAT they agreed to pay (`rates`, captured at join)
//! - HOW LONG they've been present (`elapsed_secs`)
//! - HOW MUCH they owe so far (`accrued_cost`)
//!
//! Cost is always derived fresh from elapsed time, never accumulated tick
//! by tick, so a skipped or repeated tick can't make the bill drift.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tollroom_protocol::{
    BillingState, Money, ParticipantId, Role, RoomId, SessionId, SessionUpdate, Timestamp,
};

use crate::IdempotencyKey;

/// Counter for minting session ids. Ids only need to be unique within a
/// process; the ledger keys them together with the room id.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_session_id() -> SessionId {
    SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

/// The price list a session is billed against.
///
/// Rates are copied into the session at join time, so a room
/// reconfiguration never reprices someone who is already inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rates {
    /// Charged once, up front, on join.
    pub entry_fee: Money,
    /// Presence covered by the entry fee before metering starts.
    pub free_trial_secs: u64,
    /// Charged for each whole minute past the free trial.
    pub per_minute_rate: Money,
}

impl Rates {
    /// Rates for participants who never pay (creators).
    pub const fn free() -> Self {
        Self {
            entry_fee: Money::ZERO,
            free_trial_secs: 0,
            per_minute_rate: Money::ZERO,
        }
    }

    /// Whole minutes billed after `elapsed_secs` of presence.
    ///
    /// Partial minutes round down: the price only steps up once a full
    /// minute past the trial has been crossed.
    pub fn billable_minutes(&self, elapsed_secs: u64) -> u64 {
        elapsed_secs.saturating_sub(self.free_trial_secs) / 60
    }

    /// Total cost (entry fee included) after `elapsed_secs` of presence.
    pub fn cost_for(&self, elapsed_secs: u64) -> Money {
        let metered = self
            .per_minute_rate
            .saturating_mul(self.billable_minutes(elapsed_secs));
        self.entry_fee.saturating_add(metered)
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Whether a session's money has reached the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    /// Session is still running; nothing to settle yet.
    Pending,
    /// Every charge for the session has been written.
    Settled,
    /// The session ended but a charge failed. It sits in the
    /// reconciliation queue until a retry succeeds.
    Unsettled { reason: String },
}

/// The final bill for a session, returned by settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalCost {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    /// Presence time, frozen at settlement.
    pub elapsed_secs: u64,
    /// Charged at join.
    pub entry_fee: Money,
    /// Charged at settlement.
    pub metered: Money,
    /// `entry_fee + metered`.
    pub total: Money,
    /// `false` when the metered charge failed and was queued.
    pub settled: bool,
}

// ---------------------------------------------------------------------------
// BillingSession
// ---------------------------------------------------------------------------

/// One participant's billing record for one room.
///
/// Fields are read-only from outside the crate; the only way to move a
/// session forward is [`tick`](Self::tick) (pure) or the
/// [`BillingBook`](crate::BillingBook) operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSession {
    pub(crate) id: SessionId,
    pub(crate) room_id: RoomId,
    pub(crate) participant_id: ParticipantId,
    pub(crate) role: Role,
    pub(crate) state: BillingState,
    pub(crate) rates: Rates,
    pub(crate) joined_at: Timestamp,
    pub(crate) elapsed_secs: u64,
    pub(crate) accrued_cost: Money,
    pub(crate) ended_at: Option<Timestamp>,
    pub(crate) settlement: Settlement,
    pub(crate) entry_key: IdempotencyKey,
}

impl BillingSession {
    /// A freshly admitted session: `FreeTrial`, nothing elapsed, entry fee
    /// already owed.
    pub(crate) fn admitted(
        room_id: RoomId,
        participant_id: ParticipantId,
        role: Role,
        rates: Rates,
        joined_at: Timestamp,
        entry_key: IdempotencyKey,
    ) -> Self {
        let mut session = Self {
            id: next_session_id(),
            room_id,
            participant_id,
            role,
            state: BillingState::FreeTrial,
            rates,
            joined_at,
            elapsed_secs: 0,
            accrued_cost: rates.entry_fee,
            ended_at: None,
            settlement: Settlement::Pending,
            entry_key,
        };
        // A zero-length trial is metered from the first second.
        session.advance(joined_at);
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> BillingState {
        self.state
    }

    pub fn rates(&self) -> Rates {
        self.rates
    }

    pub fn joined_at(&self) -> Timestamp {
        self.joined_at
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn accrued_cost(&self) -> Money {
        self.accrued_cost
    }

    pub fn ended_at(&self) -> Option<Timestamp> {
        self.ended_at
    }

    pub fn settlement(&self) -> &Settlement {
        &self.settlement
    }

    /// The key the entry fee was debited under.
    pub fn entry_key(&self) -> &IdempotencyKey {
        &self.entry_key
    }

    /// The portion of the bill charged at settlement.
    pub fn metered_cost(&self) -> Money {
        self.accrued_cost.saturating_sub(self.rates.entry_fee)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Recomputes the session as of `now` and returns the result.
    ///
    /// Pure: `self` is untouched and nothing is charged. Calling this
    /// twice with the same `now` gives the same answer, and calling it
    /// with an earlier `now` never rolls elapsed time or cost back.
    pub fn tick(&self, now: Timestamp) -> BillingSession {
        let mut next = self.clone();
        next.advance(now);
        next
    }

    /// In-place form of [`tick`](Self::tick). Returns `true` if the state
    /// changed (the free trial ran out).
    pub(crate) fn advance(&mut self, now: Timestamp) -> bool {
        if !self.state.is_active() {
            return false;
        }

        self.elapsed_secs = self.elapsed_secs.max(now.seconds_since(self.joined_at));
        self.accrued_cost = self.rates.cost_for(self.elapsed_secs);

        if self.state == BillingState::FreeTrial
            && self.elapsed_secs >= self.rates.free_trial_secs
        {
            self.state = BillingState::Metered;
            return true;
        }
        false
    }

    /// Freezes the session at `now` and moves it to `Ended`.
    pub(crate) fn end(&mut self, now: Timestamp) {
        self.advance(now);
        self.state = BillingState::Ended;
        self.ended_at = Some(now);
    }

    /// The bill as it stands. Only final once the session is `Ended`.
    pub fn final_cost(&self) -> FinalCost {
        FinalCost {
            session_id: self.id,
            participant_id: self.participant_id,
            elapsed_secs: self.elapsed_secs,
            entry_fee: self.rates.entry_fee,
            metered: self.metered_cost(),
            total: self.accrued_cost,
            settled: matches!(self.settlement, Settlement::Settled),
        }
    }

    /// Snapshot for the realtime bus.
    pub fn update(&self) -> SessionUpdate {
        SessionUpdate {
            session_id: self.id,
            participant_id: self.participant_id,
            state: self.state,
            elapsed_secs: self.elapsed_secs,
            accrued_cost: self.accrued_cost,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
