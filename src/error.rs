//! Error taxonomy for the capture → transport → overlay pipeline.
//!
//! Only device acquisition halts a session. Everything else is absorbed at the
//! frame boundary: the scheduler keeps ticking and the last error is kept for
//! display until a good frame (or a newer error) replaces it.

use std::time::Duration;

use thiserror::Error;

/// カメラ取得の失敗（セッション致命的、リトライしない）
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

/// JPEG化の失敗。呼び出し側はそのフレームの送信をスキップする
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("frame has no content")]
    EmptyFrame,

    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    Dimensions {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("jpeg encode failed: {0}")]
    Jpeg(String),
}

/// Per-attempt transport failure. Never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("channel closed")]
    Closed,
}

/// The most recent per-frame error, as surfaced to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Analysis failed: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    ServiceReported(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    DeviceUnavailable(#[from] DeviceError),

    #[error("body part and movement type cannot change while analyzing")]
    SettingsLocked,

    #[error("capture is not ready")]
    NotReady,

    #[error("streaming channel is not connected")]
    NotConnected,

    #[error("session has been terminated")]
    Terminated,
}
