//! Session state machine and the single-task event loop.
//!
//! One `Session` owns the capture device, the transport and every timer.
//! All work is interleaved on one task (`Session::run`), so none of the
//! in-process state needs locking. Per-frame failures are absorbed here and
//! kept as `last_error`; only losing the capture device ends a session.

use std::fmt;
use std::path::PathBuf;

use image::RgbaImage;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::camera::{FrameEncoder, FrameSource};
use crate::config::Config;
use crate::error::{FrameError, SessionError, TransportError};
use crate::latency::{FpsCounter, LatencyTracker};
use crate::pose::KeypointMap;
use crate::protocol::{AnalysisResponse, AngleSet, BodyPart, Guidance, MovementType, Validation};
use crate::render::raster::rasterize_into;
use crate::render::{Display, DrawList, OverlayInput, OverlayRenderer, OverlayStats, UserAction};
use crate::rom::RomTracker;
use crate::scheduler::Scheduler;
use crate::transport::{
    self, ConnectionState, EventReceiver, FrameEnvelope, FrameId, SendOutcome, Transport, TransportEvent,
    TransportKind,
};

/// Display refresh period for the live preview.
const REFRESH_PERIOD: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Capturing { ready: bool },
    /// `continuous == false` is a one-shot request waiting for its result.
    Analyzing { continuous: bool },
    Terminated,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Capturing { ready: false } => f.write_str("starting camera"),
            Self::Capturing { ready: true } => f.write_str("ready"),
            Self::Analyzing { continuous: true } => f.write_str("analyzing"),
            Self::Analyzing { continuous: false } => f.write_str("analyzing once"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub body_part: BodyPart,
    pub movement_type: MovementType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sent: u64,
    pub received: u64,
    /// Ticks skipped because the previous request was still in flight.
    pub skipped: u64,
    /// Frames discarded by the transport (channel not connected or full).
    pub dropped: u64,
    pub failed: u64,
    pub malformed: u64,
    /// Results discarded because they belong to an earlier run.
    pub stale: u64,
}

/// Everything about the last good result that is not drawn on the overlay.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseSummary {
    pub detected: bool,
    pub confidence: f64,
    pub angles: AngleSet,
    pub validation: Option<Validation>,
    pub guidance: Option<Guidance>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub frame_interval: Duration,
    pub start_delay: Duration,
    pub jpeg_quality: u8,
    /// One-shot frames are also written here.
    pub snapshot_path: Option<PathBuf>,
    /// How long a one-shot frame may wait for its result.
    pub one_shot_timeout: Duration,
    /// Connect (streaming) and start continuous analysis as soon as capture is ready.
    pub auto_start: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            frame_interval: crate::scheduler::DEFAULT_PERIOD,
            start_delay: crate::scheduler::DEFAULT_START_DELAY,
            jpeg_quality: crate::camera::encode::DEFAULT_QUALITY,
            snapshot_path: None,
            one_shot_timeout: Duration::from_secs(5),
            auto_start: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    AnalyzeOnce,
    Connect,
    Disconnect,
    SetBodyPart(BodyPart),
    SetMovementType(MovementType),
    Shutdown,
}

pub struct Session {
    id: String,
    phase: SessionPhase,
    settings: SessionSettings,
    options: SessionOptions,
    source: Option<Box<dyn FrameSource>>,
    canvas: Option<(u32, u32)>,
    encoder: FrameEncoder,
    transport: Box<dyn Transport>,
    events: EventReceiver,
    scheduler: Scheduler,
    latency: LatencyTracker,
    fps: FpsCounter,
    rom: RomTracker,
    renderer: Option<OverlayRenderer>,
    overlay: Option<DrawList>,
    layer: RgbaImage,
    last_error: Option<FrameError>,
    last_pose: Option<PoseSummary>,
    last_response: Option<serde_json::Value>,
    last_latency: Option<Duration>,
    stats: SessionStats,
    epoch: u32,
    seq: u64,
    pending_one_shot: Option<(FrameId, Instant)>,
    auto_started: bool,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        settings: SessionSettings,
        transport: Box<dyn Transport>,
        events: EventReceiver,
        options: SessionOptions,
    ) -> Self {
        let id = id.into();
        tracing::info!(session = %id, transport = %transport.kind(), "session created");
        Self {
            id,
            phase: SessionPhase::Idle,
            settings,
            encoder: FrameEncoder::new(options.jpeg_quality),
            scheduler: Scheduler::new(options.frame_interval, options.start_delay),
            options,
            source: None,
            canvas: None,
            transport,
            events,
            latency: LatencyTracker::default(),
            fps: FpsCounter::new(Instant::now()),
            rom: RomTracker::new(),
            renderer: None,
            overlay: None,
            layer: RgbaImage::new(0, 0),
            last_error: None,
            last_pose: None,
            last_response: None,
            last_latency: None,
            stats: SessionStats::default(),
            epoch: 0,
            seq: 0,
            pending_one_shot: None,
            auto_started: false,
        }
    }

    /// Build the transport named in the configuration and wire it to a new session.
    pub fn from_config(config: &Config, id: &str, auto_start: bool) -> Result<Self, TransportError> {
        let (tx, rx) = transport::event_channel();
        let transport = transport::build(config.analysis.transport, &config.server, id, tx)?;
        let settings = SessionSettings {
            body_part: config.analysis.body_part,
            movement_type: config.analysis.movement_type,
        };
        let options = SessionOptions {
            frame_interval: config.analysis.frame_interval(),
            start_delay: config.analysis.start_delay(),
            jpeg_quality: config.capture.jpeg_quality,
            snapshot_path: config.capture.snapshot_path(),
            one_shot_timeout: config.server.request_timeout(),
            auto_start,
        };
        Ok(Self::new(id, settings, transport, rx, options))
    }

    // --- accessors ---

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn last_error(&self) -> Option<&FrameError> {
        self.last_error.as_ref()
    }

    pub fn last_pose(&self) -> Option<&PoseSummary> {
        self.last_pose.as_ref()
    }

    /// Last inbound result document, verbatim.
    pub fn last_response(&self) -> Option<&serde_json::Value> {
        self.last_response.as_ref()
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    pub fn overlay(&self) -> Option<&DrawList> {
        self.overlay.as_ref()
    }

    pub fn overlay_layer(&self) -> &RgbaImage {
        &self.layer
    }

    pub fn rom(&self) -> &RomTracker {
        &self.rom
    }

    pub fn pending_frames(&self) -> usize {
        self.latency.len()
    }

    pub fn is_analyzing(&self) -> bool {
        matches!(self.phase, SessionPhase::Analyzing { continuous: true })
    }

    pub fn is_ready(&self) -> bool {
        self.canvas.is_some()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.transport.connection_state()
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }

    // --- capture device ---

    /// Take ownership of a capture device, releasing any previous one first.
    pub fn attach_source(&mut self, source: Box<dyn FrameSource>) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Terminated {
            return Err(SessionError::Terminated);
        }
        if let Some(mut old) = self.source.take() {
            tracing::info!(source = %old.describe(), "releasing previous capture device");
            old.release();
        }
        self.scheduler.stop();
        tracing::info!(source = %source.describe(), "capture device attached");
        self.source = Some(source);
        self.canvas = None;
        self.renderer = None;
        self.phase = SessionPhase::Capturing { ready: false };
        self.refresh_readiness();
        Ok(())
    }

    /// Fix the canvas size once the device reports its native resolution.
    pub fn refresh_readiness(&mut self) -> bool {
        if self.phase != (SessionPhase::Capturing { ready: false }) {
            return self.is_ready();
        }
        let Some(source) = self.source.as_ref() else {
            return false;
        };
        if !source.is_ready() {
            return false;
        }
        let (width, height) = source.resolution();
        self.canvas = Some((width, height));
        self.renderer = Some(OverlayRenderer::new(width, height));
        self.layer = RgbaImage::new(width, height);
        self.phase = SessionPhase::Capturing { ready: true };
        tracing::info!(width, height, "capture ready");
        true
    }

    // --- settings ---

    pub fn set_body_part(&mut self, body_part: BodyPart) -> Result<(), SessionError> {
        self.ensure_unlocked()?;
        self.settings.body_part = body_part;
        tracing::info!(%body_part, "body part selected");
        Ok(())
    }

    pub fn set_movement_type(&mut self, movement_type: MovementType) -> Result<(), SessionError> {
        self.ensure_unlocked()?;
        self.settings.movement_type = movement_type;
        tracing::info!(%movement_type, "movement type selected");
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Terminated => Err(SessionError::Terminated),
            SessionPhase::Analyzing { .. } => Err(SessionError::SettingsLocked),
            _ => Ok(()),
        }
    }

    fn ensure_can_analyze(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Terminated => return Err(SessionError::Terminated),
            SessionPhase::Idle | SessionPhase::Capturing { ready: false } => return Err(SessionError::NotReady),
            _ => {}
        }
        if self.transport.kind() == TransportKind::Streaming
            && self.transport.connection_state() != Some(ConnectionState::Connected)
        {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    // --- connection ---

    pub fn connect(&mut self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Terminated {
            return Err(SessionError::Terminated);
        }
        self.transport.connect();
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        if self.transport.kind() == TransportKind::Streaming {
            self.stop();
        }
    }

    // --- analysis ---

    /// Begin continuous analysis. Starts a new run: ROM and correlation state
    /// are reset and results from earlier runs are ignored from now on.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.is_analyzing() {
            return Ok(());
        }
        self.ensure_can_analyze()?;

        let now = Instant::now();
        self.epoch += 1;
        self.seq = 0;
        self.rom.reset();
        self.latency.clear();
        self.fps.reset(now);
        self.pending_one_shot = None;
        self.scheduler.start();
        self.phase = SessionPhase::Analyzing { continuous: true };
        tracing::info!(
            epoch = self.epoch,
            body_part = %self.settings.body_part,
            movement_type = %self.settings.movement_type,
            "analysis started"
        );
        Ok(())
    }

    /// Stop continuous analysis. No tick fires after this returns; results
    /// still in flight are rendered when they arrive.
    pub fn stop(&mut self) {
        let was_running = self.scheduler.is_running();
        self.scheduler.stop();
        if matches!(self.phase, SessionPhase::Analyzing { .. }) {
            self.phase = SessionPhase::Capturing { ready: true };
        }
        self.pending_one_shot = None;
        if was_running {
            tracing::info!(epoch = self.epoch, in_flight = self.latency.len(), "analysis stopped");
        }
    }

    /// Capture, encode and send a single frame.
    pub async fn analyze_once(&mut self) -> Result<Option<FrameId>, SessionError> {
        if self.is_analyzing() {
            tracing::debug!("one-shot ignored while continuous analysis is running");
            return Ok(None);
        }
        self.ensure_can_analyze()?;

        self.phase = SessionPhase::Analyzing { continuous: false };
        let sent = self.capture_and_send(true).await;
        match sent {
            Some(frame_id) => self.pending_one_shot = Some((frame_id, Instant::now())),
            None => self.phase = SessionPhase::Capturing { ready: true },
        }
        Ok(sent)
    }

    /// One scheduler tick.
    pub async fn on_tick(&mut self) {
        if !self.is_analyzing() {
            return;
        }
        // ポーリングは前のリクエストが終わるまで次を出さない
        if self.transport.kind() == TransportKind::Polling && !self.transport.is_ready() {
            self.stats.skipped += 1;
            tracing::debug!("previous request still in flight, skipping tick");
            return;
        }
        self.capture_and_send(false).await;
    }

    async fn capture_and_send(&mut self, snapshot: bool) -> Option<FrameId> {
        let frame = match self.source.as_mut().and_then(|s| s.current_frame()) {
            Some(frame) => frame,
            None => {
                tracing::debug!("no frame available yet");
                return None;
            }
        };

        let payload = match self.encoder.encode(frame).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!("skipping frame: {e}");
                return None;
            }
        };

        if snapshot {
            if let Some(path) = self.options.snapshot_path.clone() {
                match tokio::fs::write(&path, &payload).await {
                    Ok(()) => tracing::info!(path = %path.display(), bytes = payload.len(), "saved test frame"),
                    Err(e) => tracing::warn!(path = %path.display(), "failed to save test frame: {e}"),
                }
            }
        }

        // 往復時間はエンコード後、送信直前から測る
        let sent_at = Instant::now();
        self.seq += 1;
        let frame_id = FrameId::new(self.epoch, self.seq);
        let envelope = FrameEnvelope {
            frame_id,
            payload,
            body_part: self.settings.body_part,
            movement_type: self.settings.movement_type,
            requested_at: sent_at,
        };

        match self.transport.send(envelope) {
            SendOutcome::Dispatched => {
                self.latency.register(frame_id, sent_at);
                self.stats.sent += 1;
                Some(frame_id)
            }
            SendOutcome::Busy => {
                self.stats.skipped += 1;
                None
            }
            SendOutcome::Dropped => {
                self.stats.dropped += 1;
                None
            }
        }
    }

    // --- results ---

    pub fn handle_event(&mut self, event: TransportEvent) {
        let now = Instant::now();
        match event {
            TransportEvent::Result { frame_id, response, raw } => {
                self.stats.received += 1;
                self.last_response = Some(raw);
                self.settle(frame_id, now);

                if let Some(id) = frame_id.filter(|id| id.epoch < self.epoch) {
                    self.stats.stale += 1;
                    tracing::debug!(frame_id = %id, current_epoch = self.epoch, "discarding result from an earlier run");
                    return;
                }
                self.apply_result(*response);
            }
            TransportEvent::Failed { frame_id, error } => {
                self.stats.failed += 1;
                self.settle(frame_id, now);
                if let Some(id) = frame_id.filter(|id| id.epoch < self.epoch) {
                    self.stats.stale += 1;
                    tracing::debug!(frame_id = %id, "ignoring failure from an earlier run: {error}");
                    return;
                }
                tracing::warn!(frame_id = ?frame_id.map(|id| id.to_string()), "analysis request failed: {error}");
                self.last_error = Some(FrameError::Transport(error));
            }
            TransportEvent::Malformed { frame_id, detail } => {
                self.stats.malformed += 1;
                self.settle(frame_id, now);
                tracing::debug!("dropping malformed result: {detail}");
            }
            TransportEvent::Connected => {
                tracing::info!(session = %self.id, "streaming channel connected");
            }
            TransportEvent::Closed { reason } => {
                tracing::info!(reason = reason.as_deref().unwrap_or("-"), "streaming channel closed");
                if self.transport.connection_state() != Some(ConnectionState::Connected) {
                    self.stop();
                }
            }
        }
    }

    /// Resolve latency and finish a pending one-shot for an answered frame.
    fn settle(&mut self, frame_id: Option<FrameId>, now: Instant) {
        if let Some(id) = frame_id {
            match self.latency.resolve(id, now) {
                Ok(elapsed) => {
                    self.last_latency = Some(elapsed);
                    self.fps.record(now);
                }
                Err(e) => tracing::debug!("{e}"),
            }
        }
        let finishes_one_shot = match self.pending_one_shot {
            Some((pending, _)) => frame_id.map_or(true, |id| id == pending),
            None => false,
        };
        if finishes_one_shot {
            self.pending_one_shot = None;
            if self.phase == (SessionPhase::Analyzing { continuous: false }) {
                self.phase = SessionPhase::Capturing { ready: true };
            }
        }
    }

    /// 単発解析の結果が来ないまま時間切れになったら設定のロックを解く
    pub fn expire_one_shot(&mut self, now: Instant) -> bool {
        let Some((frame_id, sent_at)) = self.pending_one_shot else {
            return false;
        };
        let timeout = self.options.one_shot_timeout;
        if now.saturating_duration_since(sent_at) < timeout {
            return false;
        }
        tracing::warn!(frame_id = %frame_id, "no result for one-shot frame");
        let _ = self.latency.resolve(frame_id, now);
        self.pending_one_shot = None;
        self.stats.failed += 1;
        self.last_error = Some(FrameError::Transport(TransportError::Timeout(timeout)));
        if self.phase == (SessionPhase::Analyzing { continuous: false }) {
            self.phase = SessionPhase::Capturing { ready: true };
        }
        true
    }

    fn apply_result(&mut self, response: AnalysisResponse) {
        if let Some(message) = response.error {
            tracing::warn!("service reported: {message}");
            self.last_error = Some(FrameError::ServiceReported(message));
            return;
        }
        self.last_error = None;

        if response.pose_detected {
            if let Some(rom) = response.rom {
                self.rom.observe(rom.current);
            }
        }

        let keypoints = if response.pose_detected {
            let keypoints = response.keypoints.unwrap_or_default();
            match self.canvas {
                Some((width, height)) => keypoints
                    .iter()
                    .filter(|(_, point)| point.is_near_frame(width, height))
                    .map(|(landmark, point)| (landmark, *point))
                    .collect(),
                None => keypoints,
            }
        } else {
            KeypointMap::new()
        };
        let angles = response.angles.unwrap_or_default();
        self.redraw(&keypoints, &angles);

        self.last_pose = Some(PoseSummary {
            detected: response.pose_detected,
            confidence: response.pose_confidence,
            angles,
            validation: response.validation,
            guidance: response.guidance,
        });
    }

    /// Full redraw of the overlay layer.
    fn redraw(&mut self, keypoints: &KeypointMap, angles: &AngleSet) {
        let Some(renderer) = self.renderer else {
            return;
        };
        let rom = self.rom.sample();
        let input = OverlayInput {
            keypoints,
            angles: (!angles.is_empty()).then_some(angles),
            rom: rom.as_ref(),
            body_part: self.settings.body_part,
            movement_type: self.settings.movement_type,
            stats: self.last_latency.map(|latency| OverlayStats {
                processing_ms: latency.as_millis() as u64,
                fps: self.fps.rate(),
            }),
        };
        let list = renderer.render(&input);
        rasterize_into(&list, &mut self.layer);
        self.overlay = Some(list);
    }

    pub fn status_line(&self) -> String {
        let mut parts = vec![format!("{} [{}]", self.id, self.transport.kind())];
        if let Some(state) = self.transport.connection_state() {
            parts.push(state.to_string());
        }
        parts.push(self.phase.to_string());
        parts.push(format!("{}/{}", self.settings.body_part, self.settings.movement_type));
        parts.push(format!("sent {} recv {}", self.stats.sent, self.stats.received));
        if let Some(pose) = &self.last_pose {
            parts.push(format!("conf {:.0}%", pose.confidence * 100.0));
            if let Some(validation) = pose.validation.as_ref().filter(|v| !v.message.is_empty()) {
                parts.push(validation.message.clone());
            }
            if let Some(guidance) = pose.guidance.as_ref().filter(|g| !g.instruction.is_empty()) {
                parts.push(guidance.instruction.clone());
            }
        }
        if let Some(error) = &self.last_error {
            parts.push(format!("error: {error}"));
        }
        parts.join(" | ")
    }

    // --- event loop ---

    async fn apply_command(&mut self, command: SessionCommand) {
        let result = match command {
            SessionCommand::Start => self.start(),
            SessionCommand::Stop => {
                self.stop();
                Ok(())
            }
            SessionCommand::AnalyzeOnce => self.analyze_once().await.map(|_| ()),
            SessionCommand::Connect => self.connect(),
            SessionCommand::Disconnect => {
                self.disconnect();
                Ok(())
            }
            SessionCommand::SetBodyPart(part) => self.set_body_part(part),
            SessionCommand::SetMovementType(movement) => self.set_movement_type(movement),
            SessionCommand::Shutdown => {
                self.shutdown();
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(?command, "{e}");
        }
    }

    async fn apply_action(&mut self, action: UserAction) {
        let command = match action {
            UserAction::ToggleAnalysis if self.is_analyzing() => SessionCommand::Stop,
            UserAction::ToggleAnalysis => SessionCommand::Start,
            UserAction::AnalyzeOnce => SessionCommand::AnalyzeOnce,
            UserAction::ToggleConnection => match self.transport.connection_state() {
                Some(ConnectionState::Disconnected) => SessionCommand::Connect,
                Some(_) => SessionCommand::Disconnect,
                None => return,
            },
            UserAction::SelectBodyPart(part) => SessionCommand::SetBodyPart(part),
            UserAction::CycleMovement => SessionCommand::SetMovementType(self.settings.movement_type.next()),
            UserAction::Quit => SessionCommand::Shutdown,
        };
        self.apply_command(command).await;
    }

    fn auto_start(&mut self) {
        if !self.options.auto_start || self.auto_started || !self.is_ready() {
            return;
        }
        if self.transport.connection_state() == Some(ConnectionState::Disconnected) {
            self.transport.connect();
            return;
        }
        if self.start().is_ok() {
            self.auto_started = true;
        }
    }

    async fn refresh(&mut self, display: &mut dyn Display) -> anyhow::Result<()> {
        self.refresh_readiness();
        self.expire_one_shot(Instant::now());
        for action in display.poll_actions() {
            self.apply_action(action).await;
        }
        if !display.is_open() {
            self.shutdown();
            return Ok(());
        }
        self.auto_start();

        let frame = self.source.as_mut().and_then(|s| s.current_frame());
        let status = self.status_line();
        display.present(frame.as_ref(), &self.layer, &status)
    }

    /// Drive the session until shutdown, the display closes, or `deadline` passes.
    pub async fn run(
        &mut self,
        display: &mut dyn Display,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        deadline: Option<Instant>,
    ) -> anyhow::Result<SessionStats> {
        let mut refresh = time::interval(REFRESH_PERIOD);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline_reached = async {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline_reached);

        while self.phase != SessionPhase::Terminated {
            tokio::select! {
                _ = self.scheduler.tick() => self.on_tick().await,
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(command) = commands.recv() => self.apply_command(command).await,
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh(display).await {
                        self.shutdown();
                        return Err(e);
                    }
                }
                _ = &mut deadline_reached => {
                    tracing::info!("session deadline reached");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(self.stats)
    }

    /// Release the device, close the channel and cancel timers. Safe to call
    /// from any state, any number of times.
    pub fn shutdown(&mut self) {
        if self.phase == SessionPhase::Terminated {
            return;
        }
        self.scheduler.stop();
        self.transport.disconnect();
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        self.pending_one_shot = None;
        self.phase = SessionPhase::Terminated;
        tracing::info!(
            session = %self.id,
            sent = self.stats.sent,
            received = self.stats.received,
            skipped = self.stats.skipped,
            dropped = self.stats.dropped,
            "session terminated"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
