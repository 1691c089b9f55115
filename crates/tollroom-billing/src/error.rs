//! Error types for the billing layer.

use tollroom_protocol::{Money, ParticipantId, RoomId, SessionId};

/// Errors returned by a [`Wallet`](crate::Wallet).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// The balance doesn't cover the debit. Nothing was taken.
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Money, available: Money },

    /// The wallet backend couldn't be reached or refused the call.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by a [`Ledger`](crate::Ledger).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The write didn't go through.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during billing operations.
///
/// Admission errors (`InsufficientFunds`) go straight back to the
/// participant. Settlement problems never block leaving a room; they show
/// up as `SettlementFailed` from the reconciliation queue instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    /// The participant can't afford the entry fee. No session was created.
    #[error("participant {participant} cannot cover {needed} (has {available})")]
    InsufficientFunds {
        participant: ParticipantId,
        needed: Money,
        available: Money,
    },

    /// The wallet didn't answer. The debit is not retried automatically,
    /// so the participant is not admitted.
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),

    /// The participant has never joined this room.
    #[error("participant {0} has no session in room {1}")]
    NotJoined(ParticipantId, RoomId),

    /// The join key already admitted an earlier session. Joining again
    /// needs a fresh key.
    #[error("idempotency key {key} already admitted session {session_id}")]
    KeyReused { key: String, session_id: SessionId },

    /// A tip was refused (zero amount, absent tipper, recipient not a
    /// creator in the room).
    #[error("invalid tip: {0}")]
    InvalidTip(String),

    /// A charge for an ended session couldn't be written. The session is
    /// still `Ended`; the charge waits in the reconciliation queue.
    #[error("settlement of session {session_id} failed: {reason}")]
    SettlementFailed { session_id: SessionId, reason: String },
}

impl BillingError {
    /// Maps a wallet refusal on an admission path.
    pub(crate) fn from_wallet(participant: ParticipantId, err: WalletError) -> Self {
        match err {
            WalletError::InsufficientFunds { needed, available } => Self::InsufficientFunds {
                participant,
                needed,
                available,
            },
            WalletError::Unavailable(reason) => Self::WalletUnavailable(reason),
        }
    }
}
