//! Realtime change notifications.
//!
//! Every occupancy or billing-state change in a room is published as a
//! [`RoomEvent`]. Publishing is best effort: the room's own state is the
//! source of truth, and an observer that missed events re-reads
//! occupancy instead of replaying them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tollroom_protocol::{Codec, ProtocolError, RoomEvent};

/// Why a publish didn't reach anyone.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Nobody is listening right now.
    #[error("no subscribers")]
    NoSubscribers,

    #[error("event encoding failed: {0}")]
    Encode(#[from] ProtocolError),
}

/// Where room actors send their events.
///
/// `publish` is synchronous and must not block: it runs inside a room
/// actor between commands.
pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: RoomEvent) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// BroadcastBus
// ---------------------------------------------------------------------------

/// Fans events out to in-process subscribers.
///
/// Backed by `tokio::sync::broadcast`; a subscriber that falls more than
/// `capacity` events behind sees `RecvError::Lagged` and should re-read
/// occupancy.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<RoomEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: RoomEvent) -> Result<(), BusError> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| BusError::NoSubscribers)
    }
}

// ---------------------------------------------------------------------------
// EncodedBus
// ---------------------------------------------------------------------------

/// Fans events out as encoded frames, for subscribers on the far side of
/// a socket. The frame is encoded once and shared by every subscriber.
pub struct EncodedBus<C: Codec> {
    codec: C,
    tx: broadcast::Sender<Arc<[u8]>>,
}

impl<C: Codec> EncodedBus<C> {
    pub fn new(codec: C, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { codec, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[u8]>> {
        self.tx.subscribe()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl<C: Codec> EventBus for EncodedBus<C> {
    fn publish(&self, event: RoomEvent) -> Result<(), BusError> {
        let frame: Arc<[u8]> = self.codec.encode(&event)?.into();
        self.tx
            .send(frame)
            .map(|_| ())
            .map_err(|_| BusError::NoSubscribers)
    }
}
