//! Gossip message envelope and the state transfer message bodies.

use serde::{Deserialize, Serialize};

/// Channel (ledger instance) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Vec<u8>);

impl ChannelId {
    /// Create from raw bytes or a string name.
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self(id.into())
    }

    /// Raw channel bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A block payload in flight between peers.
///
/// `data` carries the encoded [`Block`](crate::Block); `private_data` carries
/// one marshalled blob per transaction with private write sets (see
/// [`PvtDataCollections::marshal`](crate::PvtDataCollections::marshal)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Block sequence number.
    pub seq_num: u64,
    /// Encoded block bytes.
    pub data: Vec<u8>,
    /// Marshalled private-data blobs, possibly empty.
    pub private_data: Vec<Vec<u8>>,
}

impl Payload {
    /// Create a payload without private data.
    pub fn new(seq_num: u64, data: Vec<u8>) -> Self {
        Self {
            seq_num,
            data,
            private_data: Vec::new(),
        }
    }
}

/// Gossiped block broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// The carried payload.
    pub payload: Payload,
}

/// Directed request for a range of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStateRequest {
    /// First requested sequence, inclusive.
    pub start_seq_num: u64,
    /// Last requested sequence, inclusive.
    pub end_seq_num: u64,
}

/// Directed response carrying the served payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStateResponse {
    /// Served payloads, best-effort subset of the requested range.
    pub payloads: Vec<Payload>,
}

/// Message body variants understood by the state replication core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipContent {
    /// Block broadcast over the overlay.
    DataMsg(DataMessage),
    /// Anti-entropy pull request.
    StateRequest(RemoteStateRequest),
    /// Anti-entropy pull response.
    StateResponse(RemoteStateResponse),
}

/// Envelope around a message body: correlation nonce plus channel scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMessage {
    /// Correlates a state response to its request; zero for broadcasts.
    pub nonce: u64,
    /// Channel the message is scoped to.
    pub channel: ChannelId,
    /// Message body.
    pub content: GossipContent,
}

impl GossipMessage {
    /// Build a block broadcast message.
    pub fn data_msg(channel: ChannelId, payload: Payload) -> Self {
        Self {
            nonce: 0,
            channel,
            content: GossipContent::DataMsg(DataMessage { payload }),
        }
    }

    /// Build a state request with the given correlation nonce.
    pub fn state_request(channel: ChannelId, nonce: u64, start: u64, end: u64) -> Self {
        Self {
            nonce,
            channel,
            content: GossipContent::StateRequest(RemoteStateRequest {
                start_seq_num: start,
                end_seq_num: end,
            }),
        }
    }

    /// Build a state response echoing the request nonce.
    pub fn state_response(channel: ChannelId, nonce: u64, payloads: Vec<Payload>) -> Self {
        Self {
            nonce,
            channel,
            content: GossipContent::StateResponse(RemoteStateResponse { payloads }),
        }
    }

    /// The payload of a block broadcast, if this is one.
    pub fn data_payload(&self) -> Option<&Payload> {
        match &self.content {
            GossipContent::DataMsg(data) => Some(&data.payload),
            _ => None,
        }
    }

    /// The request body, if this is a state request.
    pub fn state_request_body(&self) -> Option<&RemoteStateRequest> {
        match &self.content {
            GossipContent::StateRequest(req) => Some(req),
            _ => None,
        }
    }

    /// The response body, if this is a state response.
    pub fn state_response_body(&self) -> Option<&RemoteStateResponse> {
        match &self.content {
            GossipContent::StateResponse(resp) => Some(resp),
            _ => None,
        }
    }

    /// True for directed state transfer messages (request or response).
    pub fn is_remote_state_message(&self) -> bool {
        matches!(
            self.content,
            GossipContent::StateRequest(_) | GossipContent::StateResponse(_)
        )
    }
}
