//! Camera seats for Tollroom rooms.
//!
//! Every room has two fixed-size pools of on-camera seats: one for
//! creators and one for fans. [`CameraSlots`] owns both and enforces that
//! a participant sits in at most one seat across them.
//!
//! Nothing here is async or locked. A room's seats are owned by that
//! room's actor, which applies one command at a time, so "find an empty
//! seat and take it" is a single uninterrupted step.

mod error;
mod pool;
mod slots;

pub use error::SeatError;
pub use pool::SlotPool;
pub use slots::{CameraSlots, SeatGrant};
