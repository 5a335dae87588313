use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io;

/// Hostname of a participating node. Opaque to the protocol.
pub type Host = String;

/// Unique identifier tied to a single broadcast conversation.
pub type BroadcastId = String;

/// Generates a fresh broadcast id.
pub fn random_id() -> BroadcastId {
    rand::random::<u64>().to_string()
}

/// Represents one tagged message carried over a bus channel.
///
/// Every frame is stamped with the `host` of its sender. The `body` payload
/// is opaque: the codec transports it without inspection, so requesters and
/// listeners are free to agree on any serializable type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame<T> {
    /// Broadcast request, published by a requester to every listener of a
    /// channel name.
    Request {
        host: Host,
        #[serde(rename = "broadcastId")]
        broadcast_id: BroadcastId,
        body: T,
    },

    /// Receipt acknowledgement, published by a listener on the reply channel
    /// before its handler runs.
    Ack { host: Host },

    /// One reply body streamed by a listener.
    Data { host: Host, body: T },

    /// Completion signal; the sending host will produce no further frames
    /// for this conversation.
    End { host: Host },
}

impl<T> Frame<T> {
    /// Host that stamped this frame.
    pub fn host(&self) -> &Host {
        match self {
            Self::Request { host, .. }
            | Self::Ack { host }
            | Self::Data { host, .. }
            | Self::End { host } => host,
        }
    }

    /// Wire tag of this frame, matching the `type` field of the encoding.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Ack { .. } => "ack",
            Self::Data { .. } => "data",
            Self::End { .. } => "end",
        }
    }
}

impl<T> Frame<T>
where
    T: Serialize,
{
    /// Serializes the frame into bytes suitable for publishing on a bus
    /// channel. Field names are preserved on the wire so independent
    /// implementations rendezvous on the same encoding.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        rmp_serde::encode::to_vec_named(self)
            .map_err(|x| io::Error::new(io::ErrorKind::InvalidData, format!("Encode failed: {x}")))
    }
}

impl<T> Frame<T>
where
    T: DeserializeOwned,
{
    /// Deserializes a frame from bytes received off a bus channel. Frames
    /// with an unknown `type` tag fail to parse and are dropped by callers.
    pub fn from_slice(slice: &[u8]) -> io::Result<Self> {
        rmp_serde::decode::from_slice(slice)
            .map_err(|x| io::Error::new(io::ErrorKind::InvalidData, format!("Decode failed: {x}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn roundtrip(frame: Frame<String>) {
        let bytes = frame.to_vec().unwrap();
        assert_eq!(Frame::<String>::from_slice(&bytes).unwrap(), frame);
    }

    #[test]
    fn should_roundtrip_every_variant() {
        roundtrip(Frame::Request {
            host: "alpha".to_string(),
            broadcast_id: "12345".to_string(),
            body: "payload".to_string(),
        });
        roundtrip(Frame::Ack {
            host: "alpha".to_string(),
        });
        roundtrip(Frame::Data {
            host: "alpha".to_string(),
            body: "payload".to_string(),
        });
        roundtrip(Frame::End {
            host: "alpha".to_string(),
        });
    }

    #[test]
    fn should_encode_fixed_field_names_on_the_wire() {
        let bytes = Frame::Request {
            host: "alpha".to_string(),
            broadcast_id: "12345".to_string(),
            body: "payload".to_string(),
        }
        .to_vec()
        .unwrap();

        let value: serde_json::Value = rmp_serde::decode::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "request");
        assert_eq!(value["host"], "alpha");
        assert_eq!(value["broadcastId"], "12345");
        assert_eq!(value["body"], "payload");
    }

    #[test]
    fn should_fail_to_parse_an_unknown_frame_type() {
        #[derive(serde::Serialize)]
        struct Bogus {
            r#type: &'static str,
            host: &'static str,
        }

        let bytes = rmp_serde::encode::to_vec_named(&Bogus {
            r#type: "bogus",
            host: "alpha",
        })
        .unwrap();

        assert!(Frame::<String>::from_slice(&bytes).is_err());
    }

    #[test]
    fn should_fail_to_parse_garbage() {
        assert!(Frame::<String>::from_slice(&[0xc1, 0xff, 0x00]).is_err());
        assert!(Frame::<String>::from_slice(&[]).is_err());
    }
}
