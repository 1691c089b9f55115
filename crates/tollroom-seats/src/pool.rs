//! A single fixed-capacity pool of seats.

use tollroom_protocol::{ParticipantId, SlotView, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Seat {
    occupant: ParticipantId,
    since: Timestamp,
}

/// A fixed number of seats, each empty or held by one participant.
///
/// Seats are handed out lowest index first, so the layout observers see
/// stays stable as people come and go.
#[derive(Debug, Clone)]
pub struct SlotPool {
    seats: Vec<Option<Seat>>,
}

impl SlotPool {
    /// Creates a pool of `capacity` empty seats.
    pub fn new(capacity: usize) -> Self {
        Self {
            seats: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.seats.len()
    }

    pub fn occupied(&self) -> usize {
        self.seats.iter().filter(|s| s.is_some()).count()
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.occupied()
    }

    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    /// Index of the seat held by `participant`, if any.
    pub fn position_of(&self, participant: ParticipantId) -> Option<usize> {
        self.seats
            .iter()
            .position(|s| s.is_some_and(|seat| seat.occupant == participant))
    }

    /// Seats `participant` in the lowest empty seat.
    ///
    /// Returns the seat index, or `None` if the pool is full. Does not
    /// check whether the participant already holds a seat; the caller
    /// does that across both pools.
    pub fn claim(&mut self, participant: ParticipantId, now: Timestamp) -> Option<usize> {
        let index = self.seats.iter().position(Option::is_none)?;
        self.seats[index] = Some(Seat {
            occupant: participant,
            since: now,
        });
        Some(index)
    }

    /// Empties the seat held by `participant`. Returns its index, or
    /// `None` if they held nothing.
    pub fn release(&mut self, participant: ParticipantId) -> Option<usize> {
        let index = self.position_of(participant)?;
        self.seats[index] = None;
        Some(index)
    }

    /// Empties every seat. Returns who was removed.
    pub fn clear(&mut self) -> Vec<ParticipantId> {
        self.seats
            .iter_mut()
            .filter_map(|s| s.take().map(|seat| seat.occupant))
            .collect()
    }

    /// Observer view of one seat.
    pub fn view(&self, index: usize) -> Option<SlotView> {
        let seat = self.seats.get(index)?;
        Some(SlotView {
            index,
            occupant: seat.map(|s| s.occupant),
            occupied_since: seat.map(|s| s.since),
        })
    }

    /// Observer view of every seat, in index order.
    pub fn views(&self) -> Vec<SlotView> {
        (0..self.seats.len()).filter_map(|i| self.view(i)).collect()
    }
}
