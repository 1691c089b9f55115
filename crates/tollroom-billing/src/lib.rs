//! Room billing for Tollroom.
//!
//! This crate answers two questions for every participant in a room: "are
//! they allowed to be here?" and "how much do they owe?"
//!
//! 1. **Admission** — a one-time entry fee, charged through the external
//!    [`Wallet`] under an [`IdempotencyKey`] ([`BillingBook::join`])
//! 2. **Metering** — a free trial, then a per-minute rate for every whole
//!    minute past it ([`BillingSession::tick`], [`Rates`])
//! 3. **Settlement** — one charge for the metered portion when the
//!    participant leaves, recorded in the external [`Ledger`]
//!    ([`BillingBook::settle`]), with failed writes queued for
//!    [`BillingBook::reconcile`]
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← owns one BillingBook per room, serializes access
//!     ↕
//! Billing Layer (this crate)  ← sessions, rates, wallet/ledger calls
//!     ↕
//! Protocol Layer (below)  ← ids, Money, Timestamp, SessionUpdate
//! ```

#![allow(async_fn_in_trait)]

mod backend;
mod book;
mod error;
mod memory;
mod session;

pub use backend::{EntryKind, IdempotencyKey, Ledger, LedgerEntry, Wallet};
pub use book::{BillingBook, JoinOutcome, Payout, PendingStep, PendingWrite, ReconcileReport};
pub use error::{BillingError, LedgerError, WalletError};
pub use memory::{MemoryLedger, MemoryWallet};
pub use session::{BillingSession, FinalCost, Rates, Settlement};
pub use tollroom_protocol::BillingState;
