use crate::pose::Landmark;
use crate::protocol::BodyPart;

/// RGBA 8bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    pub const fn from_hex(hex: u32) -> Self {
        Self::rgb((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
    }

    pub fn alpha(&self) -> u8 {
        self.0[3]
    }
}

/// 骨格の接続定義 (開始キーポイント, 終了キーポイント)
pub const SKELETON_EDGES: [(Landmark, Landmark); 16] = [
    // 上半身
    (Landmark::LShoulder, Landmark::RShoulder),
    (Landmark::LShoulder, Landmark::LElbow),
    (Landmark::LElbow, Landmark::LWrist),
    (Landmark::RShoulder, Landmark::RElbow),
    (Landmark::RElbow, Landmark::RWrist),
    // 胴体
    (Landmark::LShoulder, Landmark::LHip),
    (Landmark::RShoulder, Landmark::RHip),
    (Landmark::LHip, Landmark::RHip),
    // 下半身
    (Landmark::LHip, Landmark::LKnee),
    (Landmark::LKnee, Landmark::LAnkle),
    (Landmark::RHip, Landmark::RKnee),
    (Landmark::RKnee, Landmark::RAnkle),
    // 体幹
    (Landmark::Neck, Landmark::Hip),
    (Landmark::Neck, Landmark::Head),
    // 足
    (Landmark::LAnkle, Landmark::LBigToe),
    (Landmark::RAnkle, Landmark::RBigToe),
];

/// 骨格線の色 (半透明の緑)
pub const EDGE_COLOR: Color = Color::rgba(0, 255, 0, 153);
pub const EDGE_WIDTH: u32 = 2;

/// キーポイントの色
pub const KEYPOINT_COLOR: Color = Color::rgb(255, 0, 0);
pub const KEYPOINT_RADIUS: u32 = 4;

/// 部位ごとの (強調色, 補助色)
pub fn body_part_colors(body_part: BodyPart) -> (Color, Color) {
    match body_part {
        BodyPart::LowerBack => (Color::from_hex(0x00FFFF), Color::from_hex(0x0088FF)),
        BodyPart::Shoulder => (Color::from_hex(0xFF00FF), Color::from_hex(0xFF0088)),
        BodyPart::Elbow => (Color::from_hex(0xFFFF00), Color::from_hex(0xFF8800)),
        BodyPart::Hip => (Color::from_hex(0x00FF00), Color::from_hex(0x00FF88)),
        BodyPart::Knee => (Color::from_hex(0xFF8888), Color::from_hex(0xFF4444)),
        BodyPart::Ankle => (Color::from_hex(0x88FF88), Color::from_hex(0x44FF44)),
    }
}

/// 強調表示する主セグメントの形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentShape {
    /// 2点の線分。角度は鉛直からの傾き、ラベルは中点の横
    Line(Landmark, Landmark),
    /// 3点の関節。角度は頂点(中央)、ラベルは頂点の右上
    Joint(Landmark, Landmark, Landmark),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentRule {
    pub shape: SegmentShape,
    /// AngleSet から探すキー（先に見つかったものを使う）
    pub angle_keys: &'static [&'static str],
    pub width: u32,
    /// ラベルのアンカーからのオフセット
    pub label_offset: (f32, f32),
    pub arc_radius: f32,
}

impl SegmentRule {
    pub fn landmarks(&self) -> Vec<Landmark> {
        match self.shape {
            SegmentShape::Line(a, b) => vec![a, b],
            SegmentShape::Joint(a, b, c) => vec![a, b, c],
        }
    }
}

const fn joint(a: Landmark, vertex: Landmark, c: Landmark, keys: &'static [&'static str]) -> SegmentRule {
    SegmentRule {
        shape: SegmentShape::Joint(a, vertex, c),
        angle_keys: keys,
        width: 3,
        label_offset: (20.0, -20.0),
        arc_radius: 30.0,
    }
}

const LOWER_BACK: SegmentRule = SegmentRule {
    shape: SegmentShape::Line(Landmark::Neck, Landmark::Hip),
    angle_keys: &["trunk", "lower_back"],
    width: 4,
    label_offset: (70.0, 0.0),
    arc_radius: 60.0,
};

const SHOULDER: SegmentRule = joint(
    Landmark::RHip,
    Landmark::RShoulder,
    Landmark::RElbow,
    &["shoulder", "right shoulder"],
);
const ELBOW: SegmentRule = joint(
    Landmark::RShoulder,
    Landmark::RElbow,
    Landmark::RWrist,
    &["elbow", "right elbow"],
);
const HIP: SegmentRule = joint(Landmark::RShoulder, Landmark::RHip, Landmark::RKnee, &["hip", "right hip"]);
const KNEE: SegmentRule = joint(Landmark::RHip, Landmark::RKnee, Landmark::RAnkle, &["knee", "right knee"]);
const ANKLE: SegmentRule = joint(
    Landmark::RKnee,
    Landmark::RAnkle,
    Landmark::RBigToe,
    &["ankle", "right ankle"],
);

pub fn primary_segment(body_part: BodyPart) -> Option<&'static SegmentRule> {
    Some(match body_part {
        BodyPart::LowerBack => &LOWER_BACK,
        BodyPart::Shoulder => &SHOULDER,
        BodyPart::Elbow => &ELBOW,
        BodyPart::Hip => &HIP,
        BodyPart::Knee => &KNEE,
        BodyPart::Ankle => &ANKLE,
    })
}
