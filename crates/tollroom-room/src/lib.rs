//! Room actors for Tollroom.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns the
//! room's billing sessions and camera seats. Every mutation for a room
//! passes through its actor, one command at a time.
//!
//! # Key types
//!
//! - [`RoomManager`] — room lifecycle hooks, routing, participant index
//! - [`RoomHandle`] — send commands to a running room actor
//! - [`RoomConfig`] — pricing and seat capacities
//! - [`EventBus`] — where occupancy and billing changes are published

mod bus;
mod config;
mod error;
mod manager;
mod room;

pub use bus::{BroadcastBus, BusError, EncodedBus, EventBus};
pub use config::RoomConfig;
pub use error::RoomError;
pub use manager::{DEFAULT_CHANNEL_SIZE, RoomManager, leave_all};
pub use room::{RoomDeps, RoomHandle, RoomInfo};
