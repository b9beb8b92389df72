//! One HTTP multipart request per frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tokio::task::JoinHandle;

use super::{classify, ConnectionState, EventSender, FrameEnvelope, SendOutcome, Transport, TransportEvent, TransportKind};
use crate::error::TransportError;

pub const ANALYZE_PATH: &str = "/api/v1/analyze/frame";

pub struct PollingTransport {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
    timeout: Duration,
    events: EventSender,
    busy: Arc<AtomicBool>,
    in_flight: Option<JoinHandle<()>>,
}

impl PollingTransport {
    pub fn new(base_url: &str, session_id: &str, timeout: Duration, events: EventSender) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), ANALYZE_PATH),
            session_id: session_id.to_string(),
            timeout,
            events,
            busy: Arc::new(AtomicBool::new(false)),
            in_flight: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form(&self, envelope: FrameEnvelope) -> Result<Form, TransportError> {
        let file = Part::bytes(envelope.payload)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Form::new()
            .part("file", file)
            .text("session_id", self.session_id.clone())
            .text("body_part", envelope.body_part.as_str())
            .text("movement_type", envelope.movement_type.as_str())
            .text("include_keypoints", "true"))
    }
}

async fn post_frame(client: reqwest::Client, endpoint: String, form: Form) -> Result<String, TransportError> {
    let response = client
        .post(&endpoint)
        .multipart(form)
        .send()
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        None
    }

    fn is_ready(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }

    fn send(&mut self, envelope: FrameEnvelope) -> SendOutcome {
        if !self.is_ready() {
            return SendOutcome::Busy;
        }

        let frame_id = envelope.frame_id;
        let form = match self.form(envelope) {
            Ok(form) => form,
            Err(error) => {
                let _ = self.events.send(TransportEvent::Failed {
                    frame_id: Some(frame_id),
                    error,
                });
                return SendOutcome::Dropped;
            }
        };

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        let events = self.events.clone();
        let busy = Arc::clone(&self.busy);
        busy.store(true, Ordering::Release);

        self.in_flight = Some(tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, post_frame(client, endpoint, form)).await;
            let event = match result {
                Err(_) => TransportEvent::Failed {
                    frame_id: Some(frame_id),
                    error: TransportError::Timeout(timeout),
                },
                Ok(Err(error)) => TransportEvent::Failed {
                    frame_id: Some(frame_id),
                    error,
                },
                Ok(Ok(body)) => classify(&body, Some(frame_id)),
            };
            // 次のtickが送れるよう、イベント通知より先に解放する
            busy.store(false, Ordering::Release);
            let _ = events.send(event);
        }));

        SendOutcome::Dispatched
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BodyPart, MovementType};
    use crate::transport::{event_channel, FrameId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request (headers + content-length body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    });
                let complete = match content_length {
                    Some(len) => buf.len() >= header_end + 4 + len,
                    None => text.ends_with("0\r\n\r\n"),
                };
                if complete {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Answer `responses.len()` requests in order, returning what was received.
    fn spawn_server(listener: TcpListener, responses: Vec<(u16, &'static str)>) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut stream).await);
                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
            requests
        })
    }

    fn envelope(seq: u64) -> FrameEnvelope {
        FrameEnvelope {
            frame_id: FrameId::new(1, seq),
            payload: vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9],
            body_part: BodyPart::Elbow,
            movement_type: MovementType::Flexion,
            requested_at: tokio::time::Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_http_500_surfaces_body_and_next_send_proceeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = spawn_server(
            listener,
            vec![
                (500, "model crashed"),
                (200, r#"{"pose_detected": false, "pose_confidence": 0.0}"#),
            ],
        );

        let (tx, mut rx) = event_channel();
        let mut transport = PollingTransport::new(&base, "http_demo_1", Duration::from_secs(5), tx).unwrap();

        assert_eq!(transport.send(envelope(1)), SendOutcome::Dispatched);
        match rx.recv().await.unwrap() {
            TransportEvent::Failed { frame_id, error } => {
                assert_eq!(frame_id, Some(FrameId::new(1, 1)));
                assert!(error.to_string().contains("model crashed"));
                assert!(matches!(error, TransportError::Status { status: 500, .. }));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // 失敗後も次のtickは新しいリクエストを送る
        assert!(transport.is_ready());
        assert_eq!(transport.send(envelope(2)), SendOutcome::Dispatched);
        match rx.recv().await.unwrap() {
            TransportEvent::Result { frame_id, response, .. } => {
                assert_eq!(frame_id, Some(FrameId::new(1, 2)));
                assert!(!response.pose_detected);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("POST /api/v1/analyze/frame"));
        for field in ["file", "session_id", "body_part", "movement_type", "include_keypoints"] {
            assert!(requests[0].contains(&format!("name=\"{field}\"")), "missing {field}");
        }
        assert!(requests[0].contains("http_demo_1"));
        assert!(requests[0].contains("elbow"));
    }

    #[tokio::test]
    async fn test_second_send_while_in_flight_is_busy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = spawn_server(listener, vec![(200, r#"{"pose_detected": false}"#)]);

        let (tx, mut rx) = event_channel();
        let mut transport = PollingTransport::new(&base, "s", Duration::from_secs(5), tx).unwrap();

        assert_eq!(transport.send(envelope(1)), SendOutcome::Dispatched);
        assert_eq!(transport.send(envelope(2)), SendOutcome::Busy);

        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Result { .. }));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        // 受け付けるが何も返さないサーバ
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let (tx, mut rx) = event_channel();
        let mut transport = PollingTransport::new(&base, "s", Duration::from_millis(100), tx).unwrap();
        transport.send(envelope(1));

        match rx.recv().await.unwrap() {
            TransportEvent::Failed { error, .. } => {
                assert_eq!(error, TransportError::Timeout(Duration::from_millis(100)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(transport.is_ready());
    }

    #[tokio::test]
    async fn test_malformed_body_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        let _server = spawn_server(listener, vec![(200, "<html>oops</html>")]);

        let (tx, mut rx) = event_channel();
        let mut transport = PollingTransport::new(&base, "s", Duration::from_secs(5), tx).unwrap();
        assert!(transport.endpoint().ends_with("/api/v1/analyze/frame"));
        assert!(!transport.endpoint().contains("//api"));
        transport.send(envelope(7));

        match rx.recv().await.unwrap() {
            TransportEvent::Malformed { frame_id, .. } => assert_eq!(frame_id, Some(FrameId::new(1, 7))),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
