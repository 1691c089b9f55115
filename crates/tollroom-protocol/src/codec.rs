//! Codec trait and implementations for turning events into bytes.
//!
//! In-process subscribers receive [`RoomEvent`](crate::RoomEvent) values
//! directly. Subscribers on the other side of a socket need bytes, and the
//! bus doesn't care how those bytes are produced: anything implementing
//! [`Codec`] will do.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// `Send + Sync + 'static` because a codec is owned by a bus that is
/// shared across every room actor task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// describe a different type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// Readable in browser devtools, which is what the UI subscribers use.
///
/// ```rust
/// use tollroom_protocol::{Codec, JsonCodec, Money};
///
/// let bytes = JsonCodec.encode(&Money(1250)).unwrap();
/// assert_eq!(bytes, b"1250");
/// let back: Money = JsonCodec.decode(&bytes).unwrap();
/// assert_eq!(back, Money(1250));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Occupancy, RoomEvent, RoomEventKind, RoomId, SlotView, Timestamp};

    #[test]
    fn test_json_codec_decodes_occupancy_event() {
        let event = RoomEvent {
            room_id: RoomId(1),
            at: Timestamp::from_secs(2),
            kind: RoomEventKind::OccupancyChanged(Occupancy {
                creator_slots: vec![SlotView {
                    index: 0,
                    occupant: None,
                    occupied_since: None,
                }],
                fan_slots: vec![],
            }),
        };

        let bytes = JsonCodec.encode(&event).unwrap();
        let decoded: RoomEvent = JsonCodec.decode(&bytes).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn test_json_codec_decode_garbage_returns_error() {
        let result: Result<RoomEvent, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
