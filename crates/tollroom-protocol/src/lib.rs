//! Shared vocabulary for Tollroom.
//!
//! This crate defines the types every other layer speaks:
//!
//! - **Values** ([`RoomId`], [`ParticipantId`], [`SessionId`], [`Role`],
//!   [`Money`], [`Timestamp`]) — identifiers and fixed-point amounts.
//! - **Time** ([`Clock`], [`SystemClock`], [`ManualClock`]) — where
//!   billing reads "now" from.
//! - **Events** ([`RoomEvent`], [`Occupancy`], [`SessionUpdate`]) — what
//!   gets published to realtime subscribers.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how events become bytes
//!   for wire subscribers.
//!
//! ```text
//! Room actors (above) → Billing + Seats → Protocol (this crate)
//! ```

mod clock;
mod codec;
mod error;
mod events;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use events::{
    BillingState, Occupancy, RoomEvent, RoomEventKind, SessionUpdate, SlotView,
};
pub use types::{Money, ParticipantId, Role, RoomId, SessionId, Timestamp};
