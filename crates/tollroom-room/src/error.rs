//! Error types for the room layer.

use tollroom_billing::BillingError;
use tollroom_protocol::RoomId;
use tollroom_seats::SeatError;

/// Errors that can occur during room operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist (never created, or already destroyed).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// A room with this ID is already running.
    #[error("room {0} already exists")]
    AlreadyExists(RoomId),

    /// The room's command channel is full or closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Seat(#[from] SeatError),
}
