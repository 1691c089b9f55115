//! Presence tracking: who is still connected, and who has been gone too
//! long.
//!
//! A participant who closes the tab without leaving would otherwise keep
//! a camera seat and an open billing session forever. The tracker gives
//! each disconnected participant a grace period to come back; once it
//! runs out, the service settles them out of every room.
//!
//! # Concurrency note
//!
//! `PresenceTracker` is a plain `HashMap` and is NOT thread-safe by
//! itself. The service owns one behind a mutex.

use std::collections::HashMap;

use tollroom_protocol::{ParticipantId, Timestamp};

/// Where a participant stands.
///
/// ```text
///   Connected ──(disconnect)──→ Disconnected ──(grace elapsed)──→ Expired
///       ↑                            │
///       └────────(heartbeat)─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Heard from recently.
    Connected { last_seen: Timestamp },
    /// Gone since `since`; may still come back.
    Disconnected { since: Timestamp },
    /// Grace period over. Waiting to be forgotten.
    Expired,
}

/// Tracks connection state for every participant the service has seen.
#[derive(Debug)]
pub struct PresenceTracker {
    entries: HashMap<ParticipantId, Presence>,
    grace_secs: u64,
    /// Silence longer than this counts as a disconnect. `None` relies
    /// on explicit disconnects only.
    heartbeat_timeout_secs: Option<u64>,
}

impl PresenceTracker {
    pub fn new(grace_secs: u64, heartbeat_timeout_secs: Option<u64>) -> Self {
        Self {
            entries: HashMap::new(),
            grace_secs,
            heartbeat_timeout_secs,
        }
    }

    /// Records that the participant is alive.
    ///
    /// Returns `true` if this brought them back from a disconnect.
    pub fn heartbeat(&mut self, participant: ParticipantId, now: Timestamp) -> bool {
        let previous = self
            .entries
            .insert(participant, Presence::Connected { last_seen: now });
        let reconnected = matches!(previous, Some(Presence::Disconnected { .. }));
        if reconnected {
            tracing::info!(%participant, "participant reconnected within grace period");
        }
        reconnected
    }

    /// Starts the grace period.
    ///
    /// Also works for participants the tracker hasn't heard from yet
    /// (a backend disconnect hook can arrive first). Disconnecting twice
    /// keeps the original start.
    pub fn disconnect(&mut self, participant: ParticipantId, now: Timestamp) {
        let entry = self
            .entries
            .entry(participant)
            .or_insert(Presence::Connected { last_seen: now });
        if let Presence::Connected { .. } = entry {
            *entry = Presence::Disconnected { since: now };
            tracing::info!(%participant, "participant disconnected, grace period started");
        }
    }

    /// Marks everyone whose grace period is over as expired and returns
    /// them. Each participant is returned once.
    pub fn expire_stale(&mut self, now: Timestamp) -> Vec<ParticipantId> {
        let mut expired = Vec::new();
        for (participant, presence) in &mut self.entries {
            let stale = match *presence {
                Presence::Disconnected { since } => now.seconds_since(since) >= self.grace_secs,
                Presence::Connected { last_seen } => self
                    .heartbeat_timeout_secs
                    .is_some_and(|t| now.seconds_since(last_seen) >= t.saturating_add(self.grace_secs)),
                Presence::Expired => false,
            };
            if stale {
                *presence = Presence::Expired;
                expired.push(*participant);
                tracing::info!(%participant, "presence expired");
            }
        }
        expired.sort();
        expired
    }

    /// Drops every expired entry.
    pub fn cleanup_expired(&mut self) {
        self.entries
            .retain(|_, presence| !matches!(presence, Presence::Expired));
    }

    /// Stops tracking a participant (they left everything on purpose).
    pub fn forget(&mut self, participant: ParticipantId) -> bool {
        self.entries.remove(&participant).is_some()
    }

    pub fn get(&self, participant: ParticipantId) -> Option<Presence> {
        self.entries.get(&participant).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
