//! Unified error type for the Tollroom service.

use tollroom_billing::BillingError;
use tollroom_protocol::ProtocolError;
use tollroom_room::{BusError, RoomError};
use tollroom_seats::SeatError;

/// Top-level error that wraps all crate-specific errors.
///
/// Billing and seat failures are lifted out of [`RoomError`] on
/// conversion, so callers match `TollroomError::Seat(SeatError::PoolFull
/// { .. })` directly instead of digging through the room layer.
#[derive(Debug, thiserror::Error)]
pub enum TollroomError {
    /// Encoding or decoding an event failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Admission, metering or settlement was refused.
    #[error(transparent)]
    Billing(#[from] BillingError),

    /// A camera seat could not be granted.
    #[error(transparent)]
    Seat(#[from] SeatError),

    /// The room is unknown, duplicated, or has stopped.
    #[error(transparent)]
    Room(RoomError),

    /// Publishing to the event bus failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<RoomError> for TollroomError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::Billing(e) => Self::Billing(e),
            RoomError::Seat(e) => Self::Seat(e),
            other => Self::Room(other),
        }
    }
}
