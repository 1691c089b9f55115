//! Event contracts published on the realtime bus.
//!
//! UI layers subscribe to these to render live room state. Delivery is
//! best effort, so every event carries a full snapshot of what changed
//! rather than a delta: a subscriber that missed three events is caught up
//! by the fourth.

use serde::{Deserialize, Serialize};

use crate::{Money, ParticipantId, Role, RoomId, SessionId, Timestamp};

// ---------------------------------------------------------------------------
// Billing state
// ---------------------------------------------------------------------------

/// Where a billing session is in its lifecycle.
///
/// ```text
/// NotJoined ──(entry charged)──→ FreeTrial ──(trial used up)──→ Metered
///                                    │                             │
///                                    └──────(leave / timeout)──────┴──→ Ended
/// ```
///
/// `Ended` is terminal. A participant who joins again gets a new session
/// that starts over in `FreeTrial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingState {
    NotJoined,
    FreeTrial,
    Metered,
    Ended,
}

impl BillingState {
    /// Returns `true` while the participant is admitted to the room.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::FreeTrial | Self::Metered)
    }
}

impl std::fmt::Display for BillingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotJoined => write!(f, "NotJoined"),
            Self::FreeTrial => write!(f, "FreeTrial"),
            Self::Metered => write!(f, "Metered"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

// ---------------------------------------------------------------------------
// Occupancy
// ---------------------------------------------------------------------------

/// One camera seat as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    /// Position in its pool, starting at 0.
    pub index: usize,
    /// Who is on camera in this seat, if anyone.
    pub occupant: Option<ParticipantId>,
    /// When the current occupant took the seat.
    pub occupied_since: Option<Timestamp>,
}

impl SlotView {
    pub fn is_empty(&self) -> bool {
        self.occupant.is_none()
    }
}

/// A snapshot of both camera pools in a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub creator_slots: Vec<SlotView>,
    pub fan_slots: Vec<SlotView>,
}

impl Occupancy {
    /// The pool a role draws its seats from.
    pub fn pool(&self, role: Role) -> &[SlotView] {
        match role {
            Role::Creator => &self.creator_slots,
            Role::Fan => &self.fan_slots,
        }
    }

    /// Number of occupied seats in the given role's pool.
    pub fn occupied(&self, role: Role) -> usize {
        self.pool(role).iter().filter(|s| !s.is_empty()).count()
    }

    /// Number of free seats in the given role's pool.
    pub fn available(&self, role: Role) -> usize {
        self.pool(role).iter().filter(|s| s.is_empty()).count()
    }

    /// Finds the seat a participant holds, searching both pools.
    pub fn seat_of(&self, participant: ParticipantId) -> Option<(Role, &SlotView)> {
        self.creator_slots
            .iter()
            .find(|s| s.occupant == Some(participant))
            .map(|s| (Role::Creator, s))
            .or_else(|| {
                self.fan_slots
                    .iter()
                    .find(|s| s.occupant == Some(participant))
                    .map(|s| (Role::Fan, s))
            })
    }
}

// ---------------------------------------------------------------------------
// Session updates
// ---------------------------------------------------------------------------

/// Snapshot of one participant's billing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub state: BillingState,
    pub elapsed_secs: u64,
    pub accrued_cost: Money,
}

// ---------------------------------------------------------------------------
// RoomEvent
// ---------------------------------------------------------------------------

/// What changed in a room.
///
/// Internally tagged, so the JSON reads
/// `{ "event": "OccupancyChanged", "creator_slots": [...], ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RoomEventKind {
    /// A camera seat was claimed or released.
    OccupancyChanged(Occupancy),
    /// A participant's billing session changed state.
    SessionStateChanged(SessionUpdate),
}

/// A message on the realtime bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room_id: RoomId,
    /// When the change happened.
    pub at: Timestamp,
    #[serde(flatten)]
    pub kind: RoomEventKind,
}
