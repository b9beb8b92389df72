//! Wire schema shared by the polling (HTTP multipart) and streaming
//! (WebSocket JSON) transports.
//!
//! Self-contained apart from the keypoint vocabulary.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pose::KeypointMap;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseOptionError {
    kind: &'static str,
    value: String,
}

// --- Analysis options ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPart {
    LowerBack,
    Shoulder,
    Elbow,
    Hip,
    Knee,
    Ankle,
}

impl BodyPart {
    pub const ALL: [BodyPart; 6] = [
        Self::LowerBack,
        Self::Shoulder,
        Self::Elbow,
        Self::Hip,
        Self::Knee,
        Self::Ankle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowerBack => "lower_back",
            Self::Shoulder => "shoulder",
            Self::Elbow => "elbow",
            Self::Hip => "hip",
            Self::Knee => "knee",
            Self::Ankle => "ankle",
        }
    }
}

impl fmt::Display for BodyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyPart {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|part| part.as_str() == s)
            .ok_or_else(|| ParseOptionError {
                kind: "body part",
                value: s.to_string(),
            })
    }
}

/// Selectable movement types. The normal-range table knows more names
/// (abduction, dorsiflexion, ...) than the client offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Flexion,
    Extension,
    LateralFlexion,
    Rotation,
}

impl MovementType {
    pub const ALL: [MovementType; 4] = [
        Self::Flexion,
        Self::Extension,
        Self::LateralFlexion,
        Self::Rotation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flexion => "flexion",
            Self::Extension => "extension",
            Self::LateralFlexion => "lateral_flexion",
            Self::Rotation => "rotation",
        }
    }

    /// 次の選択肢（末尾なら先頭に戻る）
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|movement| movement.as_str() == s)
            .ok_or_else(|| ParseOptionError {
                kind: "movement type",
                value: s.to_string(),
            })
    }
}

// --- Result schema ---

/// Semantic joint/segment name → signed angle in degrees.
pub type AngleSet = BTreeMap<String, f64>;

/// Range-of-motion statistics as shown on the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RomSample {
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

/// ROM block of a result document. The service's own bounds start out as
/// `null`; only `current` is used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RomReading {
    pub current: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub range: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Validation {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub in_normal_range: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Guidance {
    #[serde(default)]
    pub instruction: String,
}

/// Result document returned by both transports. The streaming channel adds
/// `frame_id`, `guidance` and `error`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub pose_detected: bool,
    #[serde(default)]
    pub pose_confidence: f64,
    #[serde(default)]
    pub rom: Option<RomReading>,
    #[serde(default)]
    pub angles: Option<AngleSet>,
    #[serde(default)]
    pub keypoints: Option<KeypointMap>,
    #[serde(default)]
    pub validation: Option<Validation>,
    #[serde(default)]
    pub guidance: Option<Guidance>,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse an inbound result, keeping the raw document for inspection.
pub fn parse_response(text: &str) -> Result<(AnalysisResponse, serde_json::Value), serde_json::Error> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let response = AnalysisResponse::deserialize(&raw)?;
    Ok((response, raw))
}

/// Outbound message on the streaming channel.
#[derive(Debug, Clone, Serialize)]
pub struct StreamFrame {
    pub frame_base64: String,
    pub body_part: BodyPart,
    pub movement_type: MovementType,
    pub include_keypoints: bool,
    pub frame_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Landmark;

    #[test]
    fn test_body_part_round_trip_names() {
        for part in BodyPart::ALL {
            assert_eq!(part.as_str().parse::<BodyPart>().unwrap(), part);
        }
        assert!("neck".parse::<BodyPart>().is_err());
    }

    #[test]
    fn test_movement_cycle_wraps() {
        assert_eq!(MovementType::Flexion.next(), MovementType::Extension);
        assert_eq!(MovementType::Rotation.next(), MovementType::Flexion);
    }

    #[test]
    fn test_parse_error_names_the_option() {
        let err = "abduction".parse::<MovementType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown movement type: abduction");
    }

    #[test]
    fn test_parse_full_response() {
        let text = r#"{
            "timestamp": "2024-01-01T00:00:00",
            "frame_id": "3-17",
            "pose_detected": true,
            "pose_confidence": 0.912,
            "angles": {"trunk": 23.4, "pelvis": 4.1},
            "rom": {"current": 23.4, "min": 0.0, "max": 41.2, "range": 41.2},
            "keypoints": {"Neck": {"x": 320, "y": 110}, "Hip": {"x": 322, "y": 300}},
            "validation": {"in_normal_range": true, "message": "Within normal range"},
            "guidance": {"instruction": "Bend forward slowly from your hips", "feedback": ""}
        }"#;
        let (response, raw) = parse_response(text).unwrap();
        assert!(response.pose_detected);
        assert_eq!(response.frame_id.as_deref(), Some("3-17"));
        assert_eq!(response.angles.as_ref().unwrap()["trunk"], 23.4);
        assert_eq!(response.rom.unwrap().max, Some(41.2));
        assert!(response.keypoints.as_ref().unwrap().contains(Landmark::Hip));
        assert_eq!(response.validation.unwrap().in_normal_range, Some(true));
        assert_eq!(
            response.guidance.unwrap().instruction,
            "Bend forward slowly from your hips"
        );
        assert_eq!(raw["timestamp"], "2024-01-01T00:00:00");
    }

    #[test]
    fn test_parse_rom_with_null_bounds() {
        let text = r#"{
            "pose_detected": true,
            "rom": {"current": 12.5, "min": null, "max": null},
            "keypoints": {"Neck": {"x": 320, "y": 110}}
        }"#;
        let (response, _) = parse_response(text).unwrap();
        let rom = response.rom.unwrap();
        assert_eq!(rom.current, 12.5);
        assert_eq!((rom.min, rom.max, rom.range), (None, None, None));
        assert!(response.keypoints.unwrap().contains(Landmark::Neck));
    }

    #[test]
    fn test_parse_error_only_message() {
        let (response, _) = parse_response(r#"{"error": "frame_base64 is required"}"#).unwrap();
        assert_eq!(response.error.as_deref(), Some("frame_base64 is required"));
        assert!(!response.pose_detected);
        assert!(response.keypoints.is_none());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_response("<html>bad gateway</html>").is_err());
    }

    #[test]
    fn test_stream_frame_wire_names() {
        let frame = StreamFrame {
            frame_base64: "AAAA".to_string(),
            body_part: BodyPart::LowerBack,
            movement_type: MovementType::LateralFlexion,
            include_keypoints: true,
            frame_id: "1-1".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["body_part"], "lower_back");
        assert_eq!(json["movement_type"], "lateral_flexion");
        assert_eq!(json["include_keypoints"], true);
        assert_eq!(json["frame_id"], "1-1");
    }
}
