use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{BodyPart, MovementType};
use crate::transport::TransportKind;

pub const DEFAULT_CONFIG_PATH: &str = "physio_overlay.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// ポーリング用のベースURL
    #[serde(default = "default_http_url")]
    pub http_url: String,
    /// ストリーミング用のベースURL（エンドポイントは /ws/<session_id>）
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// ポーリング1回あたりのタイムアウト
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default)]
    pub camera_index: i32,
    /// 要求解像度（実際の値はデバイス次第）
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// 単発解析のJPEGを保存するパス（空なら保存しない）
    #[serde(default)]
    pub snapshot_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default = "default_body_part")]
    pub body_part: BodyPart,
    #[serde(default = "default_movement_type")]
    pub movement_type: MovementType,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// 開始から最初のフレーム送信までの待ち
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// EnvFilter 構文。RUST_LOG があればそちらが優先
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// 空ならファイルには書かない
    #[serde(default)]
    pub log_dir: String,
}

fn default_http_url() -> String { "http://localhost:8000".to_string() }
fn default_ws_url() -> String { "ws://localhost:8000".to_string() }
fn default_request_timeout_ms() -> u64 { 5000 }
fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_jpeg_quality() -> u8 { 90 }
fn default_transport() -> TransportKind { TransportKind::Polling }
fn default_body_part() -> BodyPart { BodyPart::LowerBack }
fn default_movement_type() -> MovementType { MovementType::Flexion }
fn default_frame_interval_ms() -> u64 { 100 }
fn default_start_delay_ms() -> u64 { 500 }
fn default_log_filter() -> String { "info".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_url: default_http_url(),
            ws_url: default_ws_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            width: default_width(),
            height: default_height(),
            jpeg_quality: default_jpeg_quality(),
            snapshot_path: String::new(),
        }
    }
}

impl CaptureConfig {
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.snapshot_path.is_empty()).then(|| PathBuf::from(&self.snapshot_path))
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            body_part: default_body_part(),
            movement_type: default_movement_type(),
            frame_interval_ms: default_frame_interval_ms(),
            start_delay_ms: default_start_delay_ms(),
        }
    }
}

impl AnalysisConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            log_dir: String::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// ファイルがなければ既定値。壊れていればエラー
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.http_url, "http://localhost:8000");
        assert_eq!(config.server.request_timeout(), Duration::from_secs(5));
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!(config.capture.jpeg_quality, 90);
        assert_eq!(config.analysis.transport, TransportKind::Polling);
        assert_eq!(config.analysis.frame_interval(), Duration::from_millis(100));
        assert_eq!(config.analysis.start_delay(), Duration::from_millis(500));
        assert!(config.capture.snapshot_path().is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [server]
            ws_url = "ws://10.0.0.5:8000"

            [analysis]
            transport = "streaming"
            body_part = "elbow"
            movement_type = "lateral_flexion"

            [capture]
            snapshot_path = "test_frame.jpg"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.ws_url, "ws://10.0.0.5:8000");
        assert_eq!(config.server.http_url, "http://localhost:8000");
        assert_eq!(config.analysis.transport, TransportKind::Streaming);
        assert_eq!(config.analysis.body_part, BodyPart::Elbow);
        assert_eq!(config.analysis.movement_type, MovementType::LateralFlexion);
        assert_eq!(config.capture.snapshot_path(), Some(PathBuf::from("test_frame.jpg")));
        assert_eq!(config.telemetry.log_filter, "info");
    }

    #[test]
    fn test_unknown_enum_value_is_an_error() {
        let result: Result<Config, _> = toml::from_str("[analysis]\nbody_part = \"neck\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default("/nonexistent/physio_overlay.toml").unwrap();
        assert_eq!(config.analysis.body_part, BodyPart::LowerBack);
    }
}
