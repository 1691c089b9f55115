//! Boundaries to the external money systems: wallet and ledger.
//!
//! Tollroom never holds balances. The platform's backend owns the wallet
//! (per-user balances) and the transactions ledger (append-only history);
//! this crate only asks them to move money and record that it moved.
//!
//! Both are traits with a single async method each, implemented by
//! whatever talks to the real backend in production and by
//! [`MemoryWallet`](crate::MemoryWallet) / [`MemoryLedger`](crate::MemoryLedger)
//! in tests.
//!
//! Every call carries an [`IdempotencyKey`]. A retried debit with the same
//! key must not charge twice; that is what lets the reconciliation queue
//! retry failed writes blindly.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tollroom_protocol::{Money, ParticipantId, RoomId, SessionId, Timestamp};

use crate::{LedgerError, WalletError};

// ---------------------------------------------------------------------------
// IdempotencyKey
// ---------------------------------------------------------------------------

/// A token that makes a money movement happen at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wraps a caller-supplied key (e.g. one generated by the client for a
    /// join button press).
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a random 32-character hex key (128 bits of entropy).
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// A deterministic key for a step of a session's billing
    /// (`"R-1/S-7/settle"`). Retrying the step reuses the key.
    pub fn for_session(room_id: RoomId, session_id: SessionId, step: &str) -> Self {
        Self(format!("{room_id}/{session_id}/{step}"))
    }

    /// A key derived from this one for a follow-up movement (the creator
    /// payout that goes with a fan's charge).
    pub fn derive(&self, suffix: &str) -> Self {
        Self(format!("{}:{suffix}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// The external per-user balance store.
///
/// # Example
///
/// ```rust
/// use tollroom_billing::{IdempotencyKey, Wallet, WalletError};
/// use tollroom_protocol::{Money, ParticipantId};
///
/// /// Everyone is rich. Handy for demos, useless in production.
/// struct BottomlessWallet;
///
/// impl Wallet for BottomlessWallet {
///     async fn debit(
///         &self,
///         _participant: ParticipantId,
///         _amount: Money,
///         _key: &IdempotencyKey,
///     ) -> Result<(), WalletError> {
///         Ok(())
///     }
///
///     async fn credit(
///         &self,
///         _participant: ParticipantId,
///         _amount: Money,
///         _key: &IdempotencyKey,
///     ) -> Result<(), WalletError> {
///         Ok(())
///     }
/// }
/// ```
pub trait Wallet: Send + Sync + 'static {
    /// Takes `amount` from the participant's balance.
    ///
    /// A second call with the same `key` must succeed without charging
    /// again.
    ///
    /// # Errors
    /// - `WalletError::InsufficientFunds` — balance too low, nothing taken
    /// - `WalletError::Unavailable` — backend unreachable, outcome unknown
    fn debit(
        &self,
        participant: ParticipantId,
        amount: Money,
        key: &IdempotencyKey,
    ) -> impl std::future::Future<Output = Result<(), WalletError>> + Send;

    /// Adds `amount` to the participant's balance (creator payouts, tips).
    fn credit(
        &self,
        participant: ParticipantId,
        amount: Money,
        key: &IdempotencyKey,
    ) -> impl std::future::Future<Output = Result<(), WalletError>> + Send;
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// What a ledger entry is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// The one-time charge taken at join.
    EntryFee,
    /// Per-minute charges past the free trial, written at settlement.
    Metered,
    /// A fan-to-creator tip.
    Tip,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryFee => write!(f, "EntryFee"),
            Self::Metered => write!(f, "Metered"),
            Self::Tip => write!(f, "Tip"),
        }
    }
}

/// One line in the transactions ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub room_id: RoomId,
    /// Who paid.
    pub participant_id: ParticipantId,
    pub kind: EntryKind,
    pub amount: Money,
    pub timestamp: Timestamp,
    /// The billing session this entry belongs to (none for tips).
    pub session_id: Option<SessionId>,
    /// Same key as the wallet movement it records.
    pub key: IdempotencyKey,
}

/// The external append-only transactions ledger.
pub trait Ledger: Send + Sync + 'static {
    /// Appends an entry. Recording the same `entry.key` twice must not
    /// produce two lines.
    ///
    /// # Errors
    /// `LedgerError::Unavailable` when the write didn't go through.
    fn record(
        &self,
        entry: LedgerEntry,
    ) -> impl std::future::Future<Output = Result<(), LedgerError>> + Send;
}
