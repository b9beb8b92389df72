use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// 解析サービスが返すランドマーク名の語彙 (Halpe26 / SpinePose 系)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum Landmark {
    Nose = 0,
    LEye = 1,
    REye = 2,
    LEar = 3,
    REar = 4,
    LShoulder = 5,
    RShoulder = 6,
    LElbow = 7,
    RElbow = 8,
    LWrist = 9,
    RWrist = 10,
    LHip = 11,
    RHip = 12,
    LKnee = 13,
    RKnee = 14,
    LAnkle = 15,
    RAnkle = 16,
    Head = 17,
    Neck = 18,
    Hip = 19,
    LBigToe = 20,
    RBigToe = 21,
    LSmallToe = 22,
    RSmallToe = 23,
    LHeel = 24,
    RHeel = 25,
}

const NAMES: [&str; Landmark::COUNT] = [
    "Nose", "LEye", "REye", "LEar", "REar", "LShoulder", "RShoulder", "LElbow", "RElbow",
    "LWrist", "RWrist", "LHip", "RHip", "LKnee", "RKnee", "LAnkle", "RAnkle", "Head", "Neck",
    "Hip", "LBigToe", "RBigToe", "LSmallToe", "RSmallToe", "LHeel", "RHeel",
];

impl Landmark {
    pub const COUNT: usize = 26;

    pub const ALL: [Landmark; Landmark::COUNT] = [
        Self::Nose,
        Self::LEye,
        Self::REye,
        Self::LEar,
        Self::REar,
        Self::LShoulder,
        Self::RShoulder,
        Self::LElbow,
        Self::RElbow,
        Self::LWrist,
        Self::RWrist,
        Self::LHip,
        Self::RHip,
        Self::LKnee,
        Self::RKnee,
        Self::LAnkle,
        Self::RAnkle,
        Self::Head,
        Self::Neck,
        Self::Hip,
        Self::LBigToe,
        Self::RBigToe,
        Self::LSmallToe,
        Self::RSmallToe,
        Self::LHeel,
        Self::RHeel,
    ];

    /// ワイヤ上の名前
    pub fn name(self) -> &'static str {
        NAMES[self as usize]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .position(|n| *n == name)
            .map(|index| Self::ALL[index])
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 単一キーポイント（キャプチャフレームのピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// 有限値で、フレームから1画面分以内に収まっているか
    pub fn is_near_frame(&self, width: u32, height: u32) -> bool {
        let (w, h) = (width as f32, height as f32);
        self.x.is_finite() && self.y.is_finite() && (-w..=2.0 * w).contains(&self.x) && (-h..=2.0 * h).contains(&self.y)
    }
}

/// 検出されたランドマークの集合。空 = 姿勢未検出、部分集合 = 遮蔽
///
/// 語彙外の名前はデシリアライズ時に捨てるので、マップが語彙外のキーを持つことはない。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeypointMap {
    points: BTreeMap<Landmark, Keypoint>,
}

impl KeypointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, landmark: Landmark, point: Keypoint) {
        self.points.insert(landmark, point);
    }

    pub fn get(&self, landmark: Landmark) -> Option<&Keypoint> {
        self.points.get(&landmark)
    }

    pub fn contains(&self, landmark: Landmark) -> bool {
        self.points.contains_key(&landmark)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Landmark, &Keypoint)> {
        self.points.iter().map(|(landmark, point)| (*landmark, point))
    }
}

impl FromIterator<(Landmark, Keypoint)> for KeypointMap {
    fn from_iter<I: IntoIterator<Item = (Landmark, Keypoint)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl Serialize for KeypointMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.points.len()))?;
        for (landmark, point) in &self.points {
            map.serialize_entry(landmark.name(), point)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for KeypointMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Keypoint>::deserialize(deserializer)?;
        let mut points = BTreeMap::new();
        for (name, point) in raw {
            match Landmark::from_name(&name) {
                Some(landmark) => {
                    points.insert(landmark, point);
                }
                None => tracing::debug!(landmark = %name, "dropping keypoint outside vocabulary"),
            }
        }
        Ok(Self { points })
    }
}
