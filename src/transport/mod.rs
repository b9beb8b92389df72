//! Frame delivery to the analysis service.
//!
//! Two variants share one contract: `PollingTransport` issues one HTTP request
//! per frame, `StreamingTransport` keeps a WebSocket open and correlates
//! results by `frame_id`. Both report back through the same
//! [`TransportEvent`] channel so the session loop never cares which one it
//! is driving.

pub mod polling;
pub mod streaming;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::protocol::{AnalysisResponse, BodyPart, MovementType};

pub use polling::PollingTransport;
pub use streaming::StreamingTransport;

/// Correlation id, unique per outbound frame within a session.
///
/// The epoch is bumped every time continuous analysis starts, so results that
/// belong to an earlier run can be recognised after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId {
    pub epoch: u32,
    pub seq: u64,
}

impl FrameId {
    pub fn new(epoch: u32, seq: u64) -> Self {
        Self { epoch, seq }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.epoch, self.seq)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not a client frame id: {0}")]
pub struct InvalidFrameId(String);

impl FromStr for FrameId {
    type Err = InvalidFrameId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidFrameId(s.to_string());
        let (epoch, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            epoch: epoch.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// One outbound unit: encoded image plus correlation id and analysis options.
#[derive(Debug, Clone)]
pub struct FrameEnvelope {
    pub frame_id: FrameId,
    pub payload: Vec<u8>,
    pub body_part: BodyPart,
    pub movement_type: MovementType,
    pub requested_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Polling,
    Streaming,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Polling => "polling",
            Self::Streaming => "streaming",
        })
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" | "http" => Ok(Self::Polling),
            "streaming" | "ws" | "websocket" => Ok(Self::Streaming),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// What happened to a frame handed to [`Transport::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the network; a result or failure event will follow.
    Dispatched,
    /// Previous request still outstanding; nothing was sent.
    Busy,
    /// Channel not connected or full; the frame was discarded.
    Dropped,
}

#[derive(Debug)]
pub enum TransportEvent {
    /// A parsed result document. `frame_id` is `None` when the streaming
    /// service echoed an id this client did not generate.
    Result {
        frame_id: Option<FrameId>,
        response: Box<AnalysisResponse>,
        raw: serde_json::Value,
    },
    Failed {
        frame_id: Option<FrameId>,
        error: TransportError,
    },
    Malformed {
        frame_id: Option<FrameId>,
        detail: String,
    },
    Connected,
    Closed {
        reason: Option<String>,
    },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// `None` for transports without a connection (polling).
    fn connection_state(&self) -> Option<ConnectionState>;

    fn connect(&mut self) {}

    fn disconnect(&mut self) {}

    /// Whether a new frame would be accepted right now.
    fn is_ready(&self) -> bool;

    /// Never blocks; results arrive later on the event channel.
    fn send(&mut self, envelope: FrameEnvelope) -> SendOutcome;
}

/// Build the transport selected in the configuration.
pub fn build(
    kind: TransportKind,
    server: &crate::config::ServerConfig,
    session_id: &str,
    events: EventSender,
) -> Result<Box<dyn Transport>, TransportError> {
    Ok(match kind {
        TransportKind::Polling => Box::new(PollingTransport::new(
            &server.http_url,
            session_id,
            server.request_timeout(),
            events,
        )?),
        TransportKind::Streaming => Box::new(StreamingTransport::new(&server.ws_url, session_id, events)),
    })
}

/// Turn an inbound text message into an event.
pub(crate) fn classify(text: &str, fallback_id: Option<FrameId>) -> TransportEvent {
    match crate::protocol::parse_response(text) {
        Ok((response, raw)) => {
            let frame_id = response
                .frame_id
                .as_deref()
                .and_then(|id| id.parse().ok())
                .or(fallback_id);
            TransportEvent::Result {
                frame_id,
                response: Box::new(response),
                raw,
            }
        }
        Err(e) => TransportEvent::Malformed {
            frame_id: fallback_id,
            detail: e.to_string(),
        },
    }
}
