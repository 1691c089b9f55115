//! Room manager: the room registry and the participant index.

use std::collections::{HashMap, HashSet};

use tollroom_billing::{BillingError, FinalCost, Ledger, Wallet};
use tollroom_protocol::{Clock, ParticipantId, RoomId};

use crate::room::spawn_room;
use crate::{EventBus, RoomConfig, RoomDeps, RoomError, RoomHandle};

/// Default command channel size for room actors.
pub const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Tracks every live room and which rooms each participant is in.
///
/// Rooms are created and destroyed by the platform. The manager spawns
/// the actor in [`on_room_created`](Self::on_room_created) and hands the
/// handle back out of [`remove_room`](Self::remove_room) for the caller to
/// shut down. Unlike a game lobby, a participant may sit in several rooms
/// at once, each with its own billing session.
///
/// The manager never awaits a room. Callers sharing it behind a lock
/// clone a handle with [`handle`](Self::handle), release the lock, and
/// call the room directly.
pub struct RoomManager<W, L, B, K> {
    deps: RoomDeps<W, L, B, K>,
    channel_size: usize,

    rooms: HashMap<RoomId, RoomHandle>,

    /// Rooms each participant has joined or holds a seat in.
    participant_rooms: HashMap<ParticipantId, HashSet<RoomId>>,
}

impl<W, L, B, K> RoomManager<W, L, B, K>
where
    W: Wallet,
    L: Ledger,
    B: EventBus,
    K: Clock,
{
    pub fn new(deps: RoomDeps<W, L, B, K>) -> Self {
        Self::with_channel_size(deps, DEFAULT_CHANNEL_SIZE)
    }

    pub fn with_channel_size(deps: RoomDeps<W, L, B, K>, channel_size: usize) -> Self {
        Self {
            deps,
            channel_size,
            rooms: HashMap::new(),
            participant_rooms: HashMap::new(),
        }
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    /// Starts the actor for a room the platform just created.
    ///
    /// # Errors
    /// [`RoomError::AlreadyExists`] if a room with this ID is running.
    pub fn on_room_created(
        &mut self,
        room_id: RoomId,
        config: RoomConfig,
    ) -> Result<RoomHandle, RoomError> {
        if self.rooms.contains_key(&room_id) {
            return Err(RoomError::AlreadyExists(room_id));
        }
        let handle = spawn_room(room_id, config, self.deps.clone(), self.channel_size);
        self.rooms.insert(room_id, handle.clone());
        tracing::info!(%room_id, "room created");
        Ok(handle)
    }

    /// Forgets a room without waiting for it: drops it from the room
    /// table and the participant index and returns its handle, so the
    /// caller can shut it down outside any lock.
    pub fn remove_room(&mut self, room_id: RoomId) -> Result<RoomHandle, RoomError> {
        let handle = self
            .rooms
            .remove(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;
        self.participant_rooms.retain(|_, rooms| {
            rooms.remove(&room_id);
            !rooms.is_empty()
        });
        Ok(handle)
    }

    /// Removes the participant from the index and returns handles to the
    /// rooms they were in.
    pub fn take_participant(&mut self, participant: ParticipantId) -> Vec<RoomHandle> {
        self.participant_rooms
            .remove(&participant)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|room_id| self.rooms.get(&room_id).cloned())
            .collect()
    }

    // =====================================================================
    // Lookups and index
    // =====================================================================

    /// A clone of the room's handle.
    pub fn handle(&self, room_id: RoomId) -> Result<RoomHandle, RoomError> {
        self.rooms
            .get(&room_id)
            .cloned()
            .ok_or(RoomError::NotFound(room_id))
    }

    /// Records that the participant is in the room.
    pub fn track(&mut self, participant: ParticipantId, room_id: RoomId) {
        if self.rooms.contains_key(&room_id) {
            self.participant_rooms
                .entry(participant)
                .or_default()
                .insert(room_id);
        }
    }

    /// Records that the participant left the room.
    pub fn untrack(&mut self, participant: ParticipantId, room_id: RoomId) {
        if let Some(rooms) = self.participant_rooms.get_mut(&participant) {
            rooms.remove(&room_id);
            if rooms.is_empty() {
                self.participant_rooms.remove(&participant);
            }
        }
    }

    /// Rooms the participant is currently in, in ID order.
    pub fn rooms_of(&self, participant: ParticipantId) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .participant_rooms
            .get(&participant)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn room_handles(&self) -> Vec<RoomHandle> {
        self.rooms.values().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().copied().collect()
    }
}

/// Leaves every room in `handles`, collecting what was settled. Each
/// room releases the participant's seat before settling.
///
/// A room the participant has no session in is skipped.
pub async fn leave_all(
    participant: ParticipantId,
    handles: Vec<RoomHandle>,
) -> Vec<(RoomId, FinalCost)> {
    let mut settled = Vec::with_capacity(handles.len());
    for handle in handles {
        let room_id = handle.room_id();
        match handle.leave(participant).await {
            Ok(cost) => settled.push((room_id, cost)),
            Err(RoomError::Billing(BillingError::NotJoined(..))) => {}
            Err(e) => {
                tracing::warn!(%room_id, %participant, error = %e, "timeout leave failed");
            }
        }
    }
    if !settled.is_empty() {
        tracing::info!(%participant, rooms = settled.len(), "presence timeout settled");
    }
    settled
}
