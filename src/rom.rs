//! Range-of-motion bookkeeping and the normal-range table.

use crate::protocol::{BodyPart, MovementType, RomSample};

/// 表にない組み合わせの既定値
pub const DEFAULT_NORMAL_RANGE: (f64, f64) = (0.0, 90.0);

/// (部位, 動作名) → 正常可動域 [min, max] 度
///
/// 動作名は文字列で持つ。abduction 等はクライアントの選択肢にはないが表には載せる。
const NORMAL_RANGES: &[(BodyPart, &str, f64, f64)] = &[
    (BodyPart::LowerBack, "flexion", 0.0, 60.0),
    (BodyPart::LowerBack, "extension", -30.0, 0.0),
    (BodyPart::LowerBack, "lateral_flexion", -30.0, 30.0),
    (BodyPart::LowerBack, "rotation", -45.0, 45.0),
    (BodyPart::Shoulder, "flexion", 0.0, 180.0),
    (BodyPart::Shoulder, "extension", 0.0, 60.0),
    (BodyPart::Shoulder, "abduction", 0.0, 180.0),
    (BodyPart::Shoulder, "adduction", 0.0, 45.0),
    (BodyPart::Elbow, "flexion", 0.0, 145.0),
    (BodyPart::Elbow, "extension", 0.0, 10.0),
    (BodyPart::Hip, "flexion", 0.0, 120.0),
    (BodyPart::Hip, "extension", 0.0, 30.0),
    (BodyPart::Hip, "abduction", 0.0, 45.0),
    (BodyPart::Knee, "flexion", 0.0, 135.0),
    (BodyPart::Knee, "extension", 0.0, 10.0),
    (BodyPart::Ankle, "dorsiflexion", 0.0, 20.0),
    (BodyPart::Ankle, "plantarflexion", 0.0, 50.0),
];

pub fn normal_range_for(body_part: BodyPart, movement: &str) -> (f64, f64) {
    NORMAL_RANGES
        .iter()
        .find(|(part, name, _, _)| *part == body_part && *name == movement)
        .map(|&(_, _, min, max)| (min, max))
        .unwrap_or(DEFAULT_NORMAL_RANGE)
}

pub fn normal_range(body_part: BodyPart, movement: MovementType) -> (f64, f64) {
    normal_range_for(body_part, movement.as_str())
}

/// 正常範囲に対する現在角度の位置 (0.0..=1.0 にクランプ)
pub fn gauge_fraction(current: f64, (min, max): (f64, f64)) -> f64 {
    let span = max - min;
    if !current.is_finite() || !span.is_finite() || span <= 0.0 {
        return 0.0;
    }
    ((current - min) / span).clamp(0.0, 1.0)
}

pub fn in_normal_range(current: f64, (min, max): (f64, f64)) -> bool {
    current >= min && current <= max
}

/// セッション中の current の最小/最大を保持する
///
/// サービスが返す min/max は参照しない。開始時に reset されるまで範囲は広がる一方。
#[derive(Debug, Clone, Default)]
pub struct RomTracker {
    extrema: Option<(f64, f64)>,
    current: Option<f64>,
    samples: u64,
}

impl RomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 非有限値は無視する。更新後のサンプルを返す
    pub fn observe(&mut self, current: f64) -> Option<RomSample> {
        if !current.is_finite() {
            tracing::debug!(current, "ignoring non-finite ROM sample");
            return self.sample();
        }
        let (min, max) = match self.extrema {
            Some((min, max)) => (min.min(current), max.max(current)),
            None => (current, current),
        };
        self.extrema = Some((min, max));
        self.current = Some(current);
        self.samples += 1;
        self.sample()
    }

    pub fn sample(&self) -> Option<RomSample> {
        let (min, max) = self.extrema?;
        let current = self.current?;
        Some(RomSample {
            current,
            min,
            max,
            range: max - min,
        })
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
