//! In-memory wallet and ledger.
//!
//! Used by tests and local development. Both honour idempotency keys the
//! way the real backend must, and both can be switched "offline" to
//! exercise the failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tollroom_protocol::{Money, ParticipantId};

use crate::{IdempotencyKey, Ledger, LedgerEntry, LedgerError, Wallet, WalletError};

/// Locks a mutex, recovering the data if a previous holder panicked.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryWallet
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct WalletInner {
    balances: HashMap<ParticipantId, Money>,
    /// Keys of movements already applied.
    applied: HashSet<IdempotencyKey>,
    debit_count: usize,
}

/// A wallet backed by a `HashMap`.
#[derive(Debug)]
pub struct MemoryWallet {
    inner: Mutex<WalletInner>,
    online: AtomicBool,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(WalletInner::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Sets a participant's balance.
    pub fn fund(&self, participant: ParticipantId, amount: Money) {
        lock(&self.inner).balances.insert(participant, amount);
    }

    /// Current balance (zero for unknown participants).
    pub fn balance(&self, participant: ParticipantId) -> Money {
        lock(&self.inner)
            .balances
            .get(&participant)
            .copied()
            .unwrap_or(Money::ZERO)
    }

    /// Number of debits that actually moved money.
    pub fn debit_count(&self) -> usize {
        lock(&self.inner).debit_count
    }

    /// While offline every call fails with `WalletError::Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), WalletError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WalletError::Unavailable("wallet offline".into()))
        }
    }
}

impl Default for MemoryWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet for MemoryWallet {
    async fn debit(
        &self,
        participant: ParticipantId,
        amount: Money,
        key: &IdempotencyKey,
    ) -> Result<(), WalletError> {
        self.check_online()?;
        let mut inner = lock(&self.inner);
        if inner.applied.contains(key) {
            return Ok(());
        }

        let available = inner
            .balances
            .get(&participant)
            .copied()
            .unwrap_or(Money::ZERO);
        if available < amount {
            return Err(WalletError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        inner
            .balances
            .insert(participant, available.saturating_sub(amount));
        inner.applied.insert(key.clone());
        inner.debit_count += 1;
        Ok(())
    }

    async fn credit(
        &self,
        participant: ParticipantId,
        amount: Money,
        key: &IdempotencyKey,
    ) -> Result<(), WalletError> {
        self.check_online()?;
        let mut inner = lock(&self.inner);
        if !inner.applied.insert(key.clone()) {
            return Ok(());
        }
        let balance = inner.balances.entry(participant).or_insert(Money::ZERO);
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// An append-only ledger backed by a `Vec`.
#[derive(Debug)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
    online: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Every entry recorded so far, in order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        lock(&self.entries).clone()
    }

    /// While offline every write fails with `LedgerError::Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for MemoryLedger {
    async fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".into()));
        }
        let mut entries = lock(&self.entries);
        if entries.iter().any(|e| e.key == entry.key) {
            return Ok(());
        }
        entries.push(entry);
        Ok(())
    }
}
