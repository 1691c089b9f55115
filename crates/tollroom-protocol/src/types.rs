//! Core value types shared by every Tollroom crate.
//!
//! Identifiers, roles, money, and timestamps. These are the nouns the
//! billing book, the seat pools, and the room actors all speak, so they
//! live at the bottom of the stack with no dependencies beyond serde.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a participant (a creator or a fan).
///
/// Newtype wrapper around `u64` so a `ParticipantId` can never be passed
/// where a `RoomId` is expected. `#[serde(transparent)]` keeps the JSON
/// form a plain number: `ParticipantId(42)` becomes `42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a room ("Truth or Dare", "Suga4U", ...).
///
/// Room ids are assigned by whoever owns room lifecycle, not by Tollroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// A unique identifier for one billing session.
///
/// Every successful join mints a fresh id. A participant who leaves and
/// joins again gets a different `SessionId`, which is what keeps archived
/// sessions and their settlement keys distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// What a participant is in a given room.
///
/// Creators host the room and never pay to be in it; fans pay the entry
/// fee and, after the free trial, the per-minute rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Creator,
    Fan,
}

impl Role {
    /// Returns `true` if this role is exempt from room billing.
    pub fn is_billing_exempt(&self) -> bool {
        matches!(self, Self::Creator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creator => write!(f, "creator"),
            Self::Fan => write!(f, "fan"),
        }
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// An amount of money in integer minor units (cents).
///
/// Billing never touches floating point: every price, fee, and total is a
/// whole number of cents, so repeated recomputation can't drift.
/// Arithmetic is saturating; an overflowing bill is clamped rather than
/// wrapped around to a tiny number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub u64);

impl Money {
    /// Zero cents.
    pub const ZERO: Money = Money(0);

    /// Builds an amount from whole currency units (dollars).
    pub const fn from_major(units: u64) -> Self {
        Self(units.saturating_mul(100))
    }

    /// Returns the raw number of cents.
    pub const fn cents(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    /// Subtraction that bottoms out at zero.
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    /// Multiplies by a whole count (e.g. elapsed billable minutes).
    pub fn saturating_mul(self, count: u64) -> Money {
        Money(self.0.saturating_mul(count))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Wall-clock time as milliseconds since the unix epoch.
///
/// Billing math works on whole seconds derived from two timestamps; the
/// ledger stores timestamps verbatim.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Whole seconds elapsed since `earlier`.
    ///
    /// Saturates at zero if the clock went backwards.
    pub fn seconds_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0) / 1000
    }

    /// This timestamp shifted forward by `secs` seconds.
    pub fn plus_secs(&self, secs: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(secs.saturating_mul(1000)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// =========================================================================
// Tests
// =========================================================================
