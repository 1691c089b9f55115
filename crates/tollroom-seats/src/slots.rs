//! The two camera pools of a room.

use tollroom_protocol::{Occupancy, ParticipantId, Role, SlotView, Timestamp};

use crate::{SeatError, SlotPool};

/// Result of a successful seat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatGrant {
    /// A seat was claimed for this request.
    Granted(SlotView),
    /// The participant already had a seat; nothing changed.
    AlreadyOnCamera(SlotView),
}

impl SeatGrant {
    pub fn slot(&self) -> &SlotView {
        match self {
            Self::Granted(s) | Self::AlreadyOnCamera(s) => s,
        }
    }

    /// Returns `true` if occupancy changed.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Creator and fan seats for one room.
///
/// A participant holds at most one seat across both pools. Asking again
/// for a seat you already hold, in either pool, returns that seat.
#[derive(Debug, Clone)]
pub struct CameraSlots {
    creators: SlotPool,
    fans: SlotPool,
}

impl CameraSlots {
    pub fn new(creator_capacity: usize, fan_capacity: usize) -> Self {
        Self {
            creators: SlotPool::new(creator_capacity),
            fans: SlotPool::new(fan_capacity),
        }
    }

    pub fn pool(&self, role: Role) -> &SlotPool {
        match role {
            Role::Creator => &self.creators,
            Role::Fan => &self.fans,
        }
    }

    fn pool_mut(&mut self, role: Role) -> &mut SlotPool {
        match role {
            Role::Creator => &mut self.creators,
            Role::Fan => &mut self.fans,
        }
    }

    /// The pool and view of the seat `participant` holds, if any.
    pub fn seat_of(&self, participant: ParticipantId) -> Option<(Role, SlotView)> {
        [Role::Creator, Role::Fan].into_iter().find_map(|role| {
            let pool = self.pool(role);
            pool.position_of(participant)
                .and_then(|i| pool.view(i))
                .map(|view| (role, view))
        })
    }

    /// Puts `participant` on camera in their role's pool.
    ///
    /// `eligible` is the billing gate: the caller passes whether the
    /// participant may take a seat right now. Creators skip it.
    ///
    /// # Errors
    /// - [`SeatError::NotEligible`] — a fan without an active session
    /// - [`SeatError::PoolFull`] — no empty seat in the role's pool
    pub fn join(
        &mut self,
        participant: ParticipantId,
        role: Role,
        eligible: bool,
        now: Timestamp,
    ) -> Result<SeatGrant, SeatError> {
        if let Some((_, view)) = self.seat_of(participant) {
            return Ok(SeatGrant::AlreadyOnCamera(view));
        }
        if !role.is_billing_exempt() && !eligible {
            return Err(SeatError::NotEligible(participant));
        }

        let pool = self.pool_mut(role);
        let view = pool
            .claim(participant, now)
            .and_then(|index| pool.view(index))
            .ok_or(SeatError::PoolFull { role })?;

        tracing::debug!(%participant, %role, index = view.index, "seat claimed");
        Ok(SeatGrant::Granted(view))
    }

    /// Takes `participant` off camera. Returns the pool they left, or
    /// `None` if they held no seat.
    pub fn leave(&mut self, participant: ParticipantId) -> Option<Role> {
        [Role::Creator, Role::Fan]
            .into_iter()
            .find(|role| self.pool_mut(*role).release(participant).is_some())
    }

    /// Empties both pools (room teardown). Returns who was removed.
    pub fn clear(&mut self) -> Vec<ParticipantId> {
        let mut removed = self.creators.clear();
        removed.extend(self.fans.clear());
        removed
    }

    /// Snapshot of both pools for observers.
    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            creator_slots: self.creators.views(),
            fan_slots: self.fans.views(),
        }
    }
}
