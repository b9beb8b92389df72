//! Overlay layer described as a display list.
//!
//! `OverlayRenderer::render` is a pure function of its input: the same
//! keypoints, angles, ROM sample and options always produce the same
//! `DrawList`. Rasterising is a separate step (see `raster`), which keeps the
//! drawing rules testable without pixels.

use crate::pose::{Keypoint, KeypointMap, Landmark};
use crate::protocol::{AngleSet, BodyPart, MovementType, RomSample};
use crate::rom::{gauge_fraction, in_normal_range, normal_range};

use super::skeleton::{
    body_part_colors, primary_segment, Color, SegmentRule, SegmentShape, EDGE_COLOR, EDGE_WIDTH,
    KEYPOINT_COLOR, KEYPOINT_RADIUS, SKELETON_EDGES,
};

pub type Point = (f32, f32);

pub const PLACEHOLDER_TEXT: &str = "No pose detected";

// ROMパネルとゲージの固定レイアウト
pub const PANEL_ORIGIN: Point = (10.0, 10.0);
pub const PANEL_SIZE: (f32, f32) = (280.0, 140.0);
pub const GAUGE_X: f32 = 20.0;
pub const GAUGE_Y: f32 = 110.0;
pub const GAUGE_WIDTH: f32 = 250.0;
pub const GAUGE_HEIGHT: f32 = 20.0;
const MARKER_HALF_WIDTH: f32 = 5.0;
const MARKER_HEIGHT: f32 = 5.0;

const PANEL_COLOR: Color = Color::rgba(0, 0, 0, 204);
const TEXT_COLOR: Color = Color::rgb(255, 255, 255);
const GAUGE_NORMAL_COLOR: Color = Color::from_hex(0x00FF00);
const GAUGE_OUT_OF_RANGE_COLOR: Color = Color::from_hex(0xFF9900);
const PLACEHOLDER_COLOR: Color = Color::rgba(255, 0, 0, 204);
const SLOW_COLOR: Color = Color::from_hex(0xFF0000);
const FAST_COLOR: Color = Color::from_hex(0x00FF00);

/// これを超える処理時間は赤で表示
pub const SLOW_PROCESSING_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    Edge(Landmark, Landmark),
    Segment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear,
    Line {
        from: Point,
        to: Point,
        color: Color,
        width: u32,
        role: LineRole,
    },
    /// 塗りつぶし円
    Circle {
        center: Point,
        radius: u32,
        color: Color,
        landmark: Option<Landmark>,
    },
    /// 角度は画面座標系（y下向き、時計回りが正）
    Arc {
        center: Point,
        radius: f32,
        start_deg: f32,
        sweep_deg: f32,
        color: Color,
        width: u32,
    },
    Rect {
        origin: Point,
        size: (f32, f32),
        color: Color,
    },
    Triangle {
        points: [Point; 3],
        color: Color,
    },
    /// origin はベースライン
    Text {
        origin: Point,
        text: String,
        scale: u32,
        color: Color,
        align: TextAlign,
    },
}

/// 1回分の描画命令列。先頭は必ず Clear
#[derive(Debug, Clone, PartialEq)]
pub struct DrawList {
    pub width: u32,
    pub height: u32,
    ops: Vec<DrawOp>,
}

impl DrawList {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: vec![DrawOp::Clear],
        }
    }

    pub fn push(&mut self, op: DrawOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn edges(&self) -> Vec<(Landmark, Landmark)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Line {
                    role: LineRole::Edge(a, b),
                    ..
                } => Some((*a, *b)),
                _ => None,
            })
            .collect()
    }

    pub fn markers(&self) -> Vec<Landmark> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Circle { landmark, .. } => *landmark,
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// ゲージマーカー（三角形）の頂点x
    pub fn gauge_marker_x(&self) -> Option<f32> {
        self.ops.iter().find_map(|op| match op {
            DrawOp::Triangle { points, .. } => Some(points[0].0),
            _ => None,
        })
    }
}

/// 情報表示用（描画結果はこれ以外の時間依存状態を持たない）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStats {
    pub processing_ms: u64,
    pub fps: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayInput<'a> {
    pub keypoints: &'a KeypointMap,
    pub angles: Option<&'a AngleSet>,
    pub rom: Option<&'a RomSample>,
    pub body_part: BodyPart,
    pub movement_type: MovementType,
    pub stats: Option<OverlayStats>,
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayRenderer {
    width: u32,
    height: u32,
}

impl OverlayRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn render(&self, input: &OverlayInput<'_>) -> DrawList {
        let mut list = DrawList::new(self.width, self.height);

        if input.keypoints.is_empty() {
            list.push(DrawOp::Text {
                origin: (self.width as f32 / 2.0, self.height as f32 / 2.0),
                text: PLACEHOLDER_TEXT.to_string(),
                scale: 3,
                color: PLACEHOLDER_COLOR,
                align: TextAlign::Center,
            });
            return list;
        }

        self.draw_skeleton(&mut list, input.keypoints);
        if let Some(rule) = primary_segment(input.body_part) {
            self.draw_primary_segment(&mut list, rule, input);
        }
        if let Some(rom) = input.rom {
            self.draw_rom_panel(&mut list, rom, input.body_part, input.movement_type);
        }
        if let Some(stats) = input.stats {
            self.draw_stats(&mut list, stats);
        }
        list
    }

    fn draw_skeleton(&self, list: &mut DrawList, keypoints: &KeypointMap) {
        for &(a, b) in SKELETON_EDGES.iter() {
            if let (Some(pa), Some(pb)) = (keypoints.get(a), keypoints.get(b)) {
                list.push(DrawOp::Line {
                    from: point(pa),
                    to: point(pb),
                    color: EDGE_COLOR,
                    width: EDGE_WIDTH,
                    role: LineRole::Edge(a, b),
                });
            }
        }
        for (landmark, kp) in keypoints.iter() {
            list.push(DrawOp::Circle {
                center: point(kp),
                radius: KEYPOINT_RADIUS,
                color: KEYPOINT_COLOR,
                landmark: Some(landmark),
            });
        }
    }

    fn draw_primary_segment(&self, list: &mut DrawList, rule: &SegmentRule, input: &OverlayInput<'_>) {
        let Some(points) = rule
            .landmarks()
            .into_iter()
            .map(|l| input.keypoints.get(l).map(point))
            .collect::<Option<Vec<Point>>>()
        else {
            return;
        };
        let (primary, _) = body_part_colors(input.body_part);

        for pair in points.windows(2) {
            list.push(DrawOp::Line {
                from: pair[0],
                to: pair[1],
                color: primary,
                width: rule.width,
                role: LineRole::Segment,
            });
        }

        let angle = input
            .angles
            .and_then(|angles| rule.angle_keys.iter().find_map(|key| angles.get(*key)))
            .copied()
            .filter(|a| a.is_finite());
        let Some(angle) = angle else {
            return;
        };

        let (anchor, start_deg, sweep_deg) = match rule.shape {
            SegmentShape::Line(..) => {
                let mid = midpoint(points[0], points[1]);
                // 鉛直上向きから体幹角だけ回す
                (mid, -90.0, angle as f32)
            }
            SegmentShape::Joint(..) => {
                let vertex = points[1];
                let start = direction_deg(vertex, points[0]);
                let end = direction_deg(vertex, points[2]);
                (vertex, start, shortest_sweep(start, end))
            }
        };

        list.push(DrawOp::Arc {
            center: anchor,
            radius: rule.arc_radius,
            start_deg,
            sweep_deg,
            color: primary,
            width: 3,
        });
        list.push(DrawOp::Text {
            origin: (anchor.0 + rule.label_offset.0, anchor.1 + rule.label_offset.1),
            text: format!("{angle:.1}°"),
            scale: 3,
            color: primary,
            align: TextAlign::Left,
        });
    }

    fn draw_rom_panel(&self, list: &mut DrawList, rom: &RomSample, body_part: BodyPart, movement: MovementType) {
        list.push(DrawOp::Rect {
            origin: PANEL_ORIGIN,
            size: PANEL_SIZE,
            color: PANEL_COLOR,
        });
        let lines = [
            ((20.0, 40.0), format!("ROM: {:.1}°", rom.current), 3),
            ((20.0, 70.0), format!("Range: {:.1}° - {:.1}°", rom.min, rom.max), 2),
            ((20.0, 95.0), format!("Total: {:.1}°", rom.range), 2),
        ];
        for (origin, text, scale) in lines {
            list.push(DrawOp::Text {
                origin,
                text,
                scale,
                color: TEXT_COLOR,
                align: TextAlign::Left,
            });
        }

        let range = normal_range(body_part, movement);
        let bar_color = if in_normal_range(rom.current, range) {
            GAUGE_NORMAL_COLOR
        } else {
            GAUGE_OUT_OF_RANGE_COLOR
        };
        list.push(DrawOp::Rect {
            origin: (GAUGE_X, GAUGE_Y),
            size: (GAUGE_WIDTH, GAUGE_HEIGHT),
            color: bar_color,
        });

        let marker_x = gauge_marker_x(rom.current, range);
        list.push(DrawOp::Triangle {
            points: [
                (marker_x, GAUGE_Y - MARKER_HEIGHT),
                (marker_x - MARKER_HALF_WIDTH, GAUGE_Y),
                (marker_x + MARKER_HALF_WIDTH, GAUGE_Y),
            ],
            color: TEXT_COLOR,
        });
    }

    fn draw_stats(&self, list: &mut DrawList, stats: OverlayStats) {
        let color = if stats.processing_ms > SLOW_PROCESSING_MS {
            SLOW_COLOR
        } else {
            FAST_COLOR
        };
        let x = self.width as f32 - 120.0;
        list.push(DrawOp::Text {
            origin: (x, 20.0),
            text: format!("Processing: {}ms", stats.processing_ms),
            scale: 1,
            color,
            align: TextAlign::Left,
        });
        list.push(DrawOp::Text {
            origin: (x, 34.0),
            text: format!("FPS: {:.1}", stats.fps),
            scale: 1,
            color: TEXT_COLOR,
            align: TextAlign::Left,
        });
    }
}

/// ゲージ上のマーカー位置。バーの両端でクランプする
pub fn gauge_marker_x(current: f64, range: (f64, f64)) -> f32 {
    GAUGE_X + (gauge_fraction(current, range) as f32) * GAUGE_WIDTH
}

fn point(kp: &Keypoint) -> Point {
    (kp.x, kp.y)
}

fn midpoint(a: Point, b: Point) -> Point {
    ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
}

fn direction_deg(from: Point, to: Point) -> f32 {
    (to.1 - from.1).atan2(to.0 - from.0).to_degrees()
}

/// (-180, 180] に正規化した差
fn shortest_sweep(start: f32, end: f32) -> f32 {
    let mut sweep = (end - start) % 360.0;
    if sweep > 180.0 {
        sweep -= 360.0;
    } else if sweep <= -180.0 {
        sweep += 360.0;
    }
    sweep
}
