//! # Tollroom
//!
//! Paid-room billing and camera seats for live "Truth or Dare" style
//! rooms.
//!
//! Each room charges fans a one-time entry fee, gives them a free trial,
//! then meters every whole minute past it at a per-minute rate. Creators
//! and fans compete for a fixed number of on-camera seats. Everything
//! about a room runs in its own actor; [`TollroomService`] routes platform
//! calls to the right one and times out participants who vanish.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollroom::prelude::*;
//!
//! # async fn run() -> Result<(), TollroomError> {
//! tollroom::init_tracing();
//!
//! let service = Arc::new(
//!     TollroomService::builder().build(MemoryWallet::new(), MemoryLedger::new(), SystemClock),
//! );
//! let _sweeper = service.spawn_presence_sweeper();
//!
//! let room = RoomId(1);
//! let fan = ParticipantId(7);
//! service
//!     .on_room_created(room, RoomConfig::paid(Money::from_major(10), 600, Money::from_major(2)))
//!     .await?;
//! service.join(room, fan, Role::Fan, IdempotencyKey::generate()).await?;
//! service.join_camera(room, fan, Role::Fan).await?;
//! let cost = service.leave(room, fan).await?;
//! println!("charged {}", cost.total);
//! # Ok(())
//! # }
//! ```

mod error;
mod presence;
mod service;

pub use error::TollroomError;
pub use presence::{Presence, PresenceTracker};
pub use service::{ServiceConfig, TollroomService, TollroomServiceBuilder};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if the host application already installed one.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Common imports for embedding Tollroom.
pub mod prelude {
    pub use crate::{
        Presence, ServiceConfig, TollroomError, TollroomService, TollroomServiceBuilder,
    };
    pub use tollroom_billing::{
        BillingError, BillingSession, BillingState, FinalCost, IdempotencyKey, JoinOutcome, Ledger,
        MemoryLedger, MemoryWallet, Wallet,
    };
    pub use tollroom_protocol::{
        Clock, ManualClock, Money, Occupancy, ParticipantId, Role, RoomEvent, RoomEventKind,
        RoomId, SystemClock, Timestamp,
    };
    pub use tollroom_room::{BroadcastBus, EventBus, RoomConfig, RoomHandle};
    pub use tollroom_seats::{SeatError, SeatGrant};
}
