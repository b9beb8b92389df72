//! Persistent WebSocket channel. Frames and results are decoupled messages
//! correlated by `frame_id`.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{classify, ConnectionState, EventSender, FrameEnvelope, SendOutcome, Transport, TransportEvent, TransportKind};
use crate::error::TransportError;
use crate::protocol::StreamFrame;

/// Outbound messages buffered between the session loop and the socket writer.
const OUTBOUND_CAPACITY: usize = 4;

type SharedState = Arc<watch::Sender<ConnectionState>>;

pub struct StreamingTransport {
    url: String,
    events: EventSender,
    state: SharedState,
    outbound: Option<mpsc::Sender<String>>,
    task: Option<JoinHandle<()>>,
}

impl StreamingTransport {
    pub fn new(ws_base: &str, session_id: &str, events: EventSender) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: format!("{}/ws/{}", ws_base.trim_end_matches('/'), session_id),
            events,
            state: Arc::new(state),
            outbound: None,
            task: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

async fn run_channel(url: String, state: SharedState, mut outbound: mpsc::Receiver<String>, events: EventSender) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::warn!(%url, "websocket connect failed: {e}");
            state.send_replace(ConnectionState::Disconnected);
            let _ = events.send(TransportEvent::Failed {
                frame_id: None,
                error: TransportError::Connect(e.to_string()),
            });
            let _ = events.send(TransportEvent::Closed {
                reason: Some(e.to_string()),
            });
            return;
        }
    };

    state.send_replace(ConnectionState::Connected);
    tracing::info!(%url, "websocket connected");
    let _ = events.send(TransportEvent::Connected);

    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break Some(e.to_string());
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(classify(&text, None));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = events.send(TransportEvent::Malformed {
                        frame_id: None,
                        detail: format!("unexpected binary message ({} bytes)", bytes.len()),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            },
        }
    };

    state.send_replace(ConnectionState::Disconnected);
    tracing::info!(%url, reason = reason.as_deref().unwrap_or(""), "websocket closed");
    let _ = events.send(TransportEvent::Closed { reason });
}

impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(self.state())
    }

    fn connect(&mut self) {
        // 既存のチャネルは必ず先に解放する
        self.disconnect();

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.state.send_replace(ConnectionState::Connecting);
        self.outbound = Some(tx);
        self.task = Some(tokio::spawn(run_channel(
            self.url.clone(),
            Arc::clone(&self.state),
            rx,
            self.events.clone(),
        )));
    }

    fn disconnect(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(url = %self.url, "websocket channel released");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn send(&mut self, envelope: FrameEnvelope) -> SendOutcome {
        let frame_id = envelope.frame_id;
        let outbound = match (&self.outbound, self.state()) {
            (Some(outbound), ConnectionState::Connected) => outbound,
            (_, state) => {
                tracing::debug!(%frame_id, %state, "dropping frame, channel not connected");
                return SendOutcome::Dropped;
            }
        };

        let message = StreamFrame {
            frame_base64: BASE64.encode(&envelope.payload),
            body_part: envelope.body_part,
            movement_type: envelope.movement_type,
            include_keypoints: true,
            frame_id: frame_id.to_string(),
        };
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(%frame_id, "failed to serialize frame: {e}");
                return SendOutcome::Dropped;
            }
        };

        match outbound.try_send(text) {
            Ok(()) => SendOutcome::Dispatched,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(%frame_id, "dropping frame, socket writer is behind");
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(%frame_id, "dropping frame, socket writer has exited");
                SendOutcome::Dropped
            }
        }
    }
}

impl Drop for StreamingTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BodyPart, MovementType};
    use crate::transport::{event_channel, FrameId};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::error::TryRecvError;

    fn envelope(seq: u64) -> FrameEnvelope {
        FrameEnvelope {
            frame_id: FrameId::new(2, seq),
            payload: vec![0xFF, 0xD8, 0xFF, 0xD9],
            body_part: BodyPart::LowerBack,
            movement_type: MovementType::Flexion,
            requested_at: tokio::time::Instant::now(),
        }
    }

    async fn next_event(rx: &mut crate::transport::EventReceiver) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_noop() {
        let (tx, mut rx) = event_channel();
        let mut transport = StreamingTransport::new("ws://127.0.0.1:9", "demo_1", tx);

        assert_eq!(transport.connection_state(), Some(ConnectionState::Disconnected));
        assert_eq!(transport.send(envelope(1)), SendOutcome::Dropped);
        assert!(!transport.is_ready());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_round_trip_with_echoed_frame_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let request = loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(text) => break text,
                    _ => continue,
                }
            };
            let request: serde_json::Value = serde_json::from_str(&request).unwrap();
            let reply = serde_json::json!({
                "frame_id": request["frame_id"],
                "pose_detected": true,
                "pose_confidence": 0.8,
                "angles": {"trunk": 12.5},
                "rom": {"current": 12.5, "min": 0.0, "max": 12.5, "range": 12.5},
                "keypoints": {"Neck": {"x": 100.0, "y": 50.0}, "Hip": {"x": 100.0, "y": 200.0}},
                "guidance": {"instruction": "Keep going"}
            });
            ws.send(Message::Text(reply.to_string())).await.unwrap();
            ws.close(None).await.ok();
            request
        });

        let (tx, mut rx) = event_channel();
        let mut transport = StreamingTransport::new(&base, "demo_42", tx);
        assert!(transport.url().ends_with("/ws/demo_42"));
        transport.connect();
        assert_eq!(transport.state(), ConnectionState::Connecting);

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Connected));
        assert!(transport.is_ready());
        assert_eq!(transport.send(envelope(5)), SendOutcome::Dispatched);

        match next_event(&mut rx).await {
            TransportEvent::Result { frame_id, response, .. } => {
                assert_eq!(frame_id, Some(FrameId::new(2, 5)));
                assert!(response.pose_detected);
                assert_eq!(response.guidance.unwrap().instruction, "Keep going");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Closed { .. }));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.send(envelope(6)), SendOutcome::Dropped);

        let request = server.await.unwrap();
        assert_eq!(request["frame_id"], "2-5");
        assert_eq!(request["body_part"], "lower_back");
        assert_eq!(request["include_keypoints"], true);
        assert_eq!(request["frame_base64"], BASE64.encode([0xFF, 0xD8, 0xFF, 0xD9]));
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        // バインドして即解放したポートには誰もいない
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (tx, mut rx) = event_channel();
        let mut transport = StreamingTransport::new(&base, "demo_1", tx);
        transport.connect();

        match next_event(&mut rx).await {
            TransportEvent::Failed { error, .. } => assert!(matches!(error, TransportError::Connect(_))),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Closed { .. }));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_safe_before_connect_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}", listener.local_addr().unwrap());

        let (tx, _rx) = event_channel();
        let mut transport = StreamingTransport::new(&base, "demo_1", tx);
        transport.disconnect();
        transport.connect();
        transport.disconnect();
        transport.disconnect();

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.send(envelope(1)), SendOutcome::Dropped);
        drop(listener);
    }

    #[tokio::test]
    async fn test_inbound_error_is_a_result_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"error": "frame_base64 is required"}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text("{not json".to_string())).await.unwrap();
            // 接続を保持したまま待つ
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = event_channel();
        let mut transport = StreamingTransport::new(&base, "demo_1", tx);
        transport.connect();

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Connected));
        match next_event(&mut rx).await {
            TransportEvent::Result { response, frame_id, .. } => {
                assert!(frame_id.is_none());
                assert_eq!(response.error.as_deref(), Some("frame_base64 is required"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Malformed { .. }));
        transport.disconnect();
    }
}
