use tollroom_protocol::{ParticipantId, Role};

/// Why a camera seat was refused.
///
/// Both are admission errors: the participant can retry later (a seat
/// frees up, or they join the room first).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    /// Every seat in the pool is taken. Losing a race for the last seat
    /// ends up here too.
    #[error("all {role} seats are taken")]
    PoolFull { role: Role },

    /// Fans need an active billing session before going on camera.
    #[error("participant {0} is not eligible for a camera seat")]
    NotEligible(ParticipantId),
}
