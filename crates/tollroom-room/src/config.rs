//! Room configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tollroom_billing::Rates;
use tollroom_protocol::{Money, ParticipantId};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Pricing and capacity for one room, supplied when the room is created.
///
/// Prices are fixed for the life of the room; a session is billed at the
/// rates that were in force when it joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// One-time charge to enter. Zero for free rooms.
    pub entry_fee: Money,

    /// Presence covered by the entry fee before metering starts.
    pub free_trial_secs: u64,

    /// Charged per whole minute past the free trial.
    pub per_minute_rate: Money,

    /// Creator camera seats.
    pub creator_slots: usize,

    /// Fan camera seats.
    pub fan_slots: usize,

    /// How often the room re-evaluates its billing sessions.
    pub meter_interval_ms: u64,

    /// The creator who owns the room and receives its revenue.
    pub host: Option<ParticipantId>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            entry_fee: Money::ZERO,
            free_trial_secs: 600,
            per_minute_rate: Money::ZERO,
            creator_slots: 4,
            fan_slots: 10,
            meter_interval_ms: 1_000,
            host: None,
        }
    }
}

impl RoomConfig {
    /// A paid room with default capacities.
    pub fn paid(entry_fee: Money, free_trial_secs: u64, per_minute_rate: Money) -> Self {
        Self {
            entry_fee,
            free_trial_secs,
            per_minute_rate,
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: ParticipantId) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_slots(mut self, creator_slots: usize, fan_slots: usize) -> Self {
        self.creator_slots = creator_slots;
        self.fan_slots = fan_slots;
        self
    }

    /// Fixes values a room can't run with.
    ///
    /// - A room with no creator seat at all gets one.
    /// - A zero meter interval falls back to the default.
    ///
    /// Zero fan seats is allowed (creator-only rooms).
    pub fn validated(mut self) -> Self {
        if self.creator_slots == 0 {
            tracing::warn!("room configured without creator seats, using 1");
            self.creator_slots = 1;
        }
        if self.meter_interval_ms == 0 {
            tracing::warn!("meter_interval_ms is 0, using default");
            self.meter_interval_ms = Self::default().meter_interval_ms;
        }
        self
    }

    /// The price list fans are billed against.
    pub fn rates(&self) -> Rates {
        Rates {
            entry_fee: self.entry_fee,
            free_trial_secs: self.free_trial_secs,
            per_minute_rate: self.per_minute_rate,
        }
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms)
    }
}
