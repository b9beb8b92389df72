use image::{Rgba, RgbaImage};

use super::overlay::{DrawList, DrawOp, Point, TextAlign};
use super::skeleton::Color;
use crate::camera::Frame;

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;
/// 座標はこの範囲に丸める（整数演算が溢れないように）
const COORD_LIMIT: f32 = 1_048_576.0;

/// 描画命令列を透明レイヤーに焼き込む
pub fn rasterize(list: &DrawList) -> RgbaImage {
    let mut layer = RgbaImage::new(list.width, list.height);
    rasterize_into(list, &mut layer);
    layer
}

/// 既存レイヤーに焼き込む（先頭の Clear で全消去される）
pub fn rasterize_into(list: &DrawList, layer: &mut RgbaImage) {
    for op in list.ops() {
        match op {
            DrawOp::Clear => clear(layer),
            DrawOp::Line { from, to, color, width, .. } => draw_line(layer, *from, *to, *width, *color),
            DrawOp::Circle { center, radius, color, .. } => {
                fill_circle(layer, round(center.0), round(center.1), *radius as i32, *color)
            }
            DrawOp::Arc {
                center,
                radius,
                start_deg,
                sweep_deg,
                color,
                width,
            } => draw_arc(layer, *center, *radius, *start_deg, *sweep_deg, *width, *color),
            DrawOp::Rect { origin, size, color } => fill_rect(
                layer,
                round(origin.0),
                round(origin.1),
                round(origin.0 + size.0) - 1,
                round(origin.1 + size.1) - 1,
                *color,
            ),
            DrawOp::Triangle { points, color } => fill_triangle(layer, points, *color),
            DrawOp::Text {
                origin,
                text,
                scale,
                color,
                align,
            } => draw_text(layer, *origin, text, *scale, *align, *color),
        }
    }
}

/// 映像フレームの上にレイヤーを重ね、minifb用の 0RGB バッファを作る
///
/// サイズが異なる場合はクロップ/パディング（黒）。
pub fn composite(frame: &Frame, layer: &RgbaImage, width: usize, height: usize) -> Vec<u32> {
    let mut buffer = vec![0u32; width * height];
    for y in 0..height {
        for x in 0..width {
            let base = frame.pixel(x as u32, y as u32).unwrap_or([0, 0, 0]);
            let [r, g, b] = match layer.get_pixel_checked(x as u32, y as u32) {
                Some(px) if px[3] > 0 => {
                    let a = px[3] as f32 / 255.0;
                    let mix = |s: u8, d: u8| (s as f32 * a + d as f32 * (1.0 - a)).round() as u32;
                    [mix(px[0], base[0]), mix(px[1], base[1]), mix(px[2], base[2])]
                }
                _ => [base[0] as u32, base[1] as u32, base[2] as u32],
            };
            buffer[y * width + x] = (r << 16) | (g << 8) | b;
        }
    }
    buffer
}

fn round(v: f32) -> i32 {
    to_coord(v.round())
}

/// NaN は 0
fn to_coord(v: f32) -> i32 {
    v.clamp(-COORD_LIMIT, COORD_LIMIT) as i32
}

fn clear(layer: &mut RgbaImage) {
    for px in layer.pixels_mut() {
        *px = Rgba([0, 0, 0, 0]);
    }
}

/// source-over 合成（境界チェック付き）
fn blend_pixel(layer: &mut RgbaImage, x: i32, y: i32, color: Color) {
    if x < 0 || y < 0 || x >= layer.width() as i32 || y >= layer.height() as i32 {
        return;
    }
    let dst = layer.get_pixel_mut(x as u32, y as u32);
    let [sr, sg, sb, sa] = color.0;
    if sa == 255 || dst[3] == 0 {
        *dst = Rgba(color.0);
        return;
    }
    let sa = sa as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return;
    }
    let mix = |s: u8, d: u8| ((s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a).round() as u8;
    *dst = Rgba([
        mix(sr, dst[0]),
        mix(sg, dst[1]),
        mix(sb, dst[2]),
        (out_a * 255.0).round() as u8,
    ]);
}

fn fill_rect(layer: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32, color: Color) {
    let w = layer.width() as i32;
    let h = layer.height() as i32;
    for y in top.max(0)..=bottom.min(h - 1) {
        for x in left.max(0)..=right.min(w - 1) {
            blend_pixel(layer, x, y, color);
        }
    }
}

/// 円を描画（塗りつぶし）
fn fill_circle(layer: &mut RgbaImage, cx: i32, cy: i32, radius: i32, color: Color) {
    let w = layer.width() as i32;
    let h = layer.height() as i32;
    let radius = radius.clamp(0, w.max(h));
    for y in cy.saturating_sub(radius).max(0)..=cy.saturating_add(radius).min(h - 1) {
        for x in cx.saturating_sub(radius).max(0)..=cx.saturating_add(radius).min(w - 1) {
            let (dx, dy) = ((x - cx) as i64, (y - cy) as i64);
            if dx * dx + dy * dy <= (radius as i64) * (radius as i64) {
                blend_pixel(layer, x, y, color);
            }
        }
    }
}

fn draw_line(layer: &mut RgbaImage, from: Point, to: Point, width: u32, color: Color) {
    let (w, h) = (layer.width() as f32, layer.height() as f32);
    let margin = width as f32;
    // 両端が同じ側に画面外なら何も描かない
    if (from.0 < -margin && to.0 < -margin)
        || (from.1 < -margin && to.1 < -margin)
        || (from.0 > w + margin && to.0 > w + margin)
        || (from.1 > h + margin && to.1 > h + margin)
    {
        return;
    }
    if width <= 1 {
        bresenham(layer, round(from.0), round(from.1), round(to.0), round(to.1), color);
    } else {
        thick_line(layer, from, to, width as f32 / 2.0, color);
    }
}

/// Bresenhamのアルゴリズムで1px線を描画
fn bresenham(layer: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Color) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut x = x0;
    let mut y = y0;

    loop {
        blend_pixel(layer, x, y, color);

        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// 太線。各画素を1回だけ塗るので半透明でも濃淡が出ない
fn thick_line(layer: &mut RgbaImage, from: Point, to: Point, half_width: f32, color: Color) {
    let min_x = to_coord((from.0.min(to.0) - half_width).floor());
    let max_x = to_coord((from.0.max(to.0) + half_width).ceil());
    let min_y = to_coord((from.1.min(to.1) - half_width).floor());
    let max_y = to_coord((from.1.max(to.1) + half_width).ceil());
    let w = layer.width() as i32;
    let h = layer.height() as i32;

    for y in min_y.max(0)..=max_y.min(h - 1) {
        for x in min_x.max(0)..=max_x.min(w - 1) {
            if distance_to_segment((x as f32, y as f32), from, to) <= half_width {
                blend_pixel(layer, x, y, color);
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (abx, aby) = (b.0 - a.0, b.1 - a.1);
    let len_sq = abx * abx + aby * aby;
    let t = if len_sq > 0.0 {
        (((p.0 - a.0) * abx + (p.1 - a.1) * aby) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * abx, a.1 + t * aby);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

fn draw_arc(layer: &mut RgbaImage, center: Point, radius: f32, start_deg: f32, sweep_deg: f32, width: u32, color: Color) {
    if radius <= 0.0 || !radius.is_finite() || !start_deg.is_finite() || !sweep_deg.is_finite() || sweep_deg == 0.0 {
        return;
    }
    // 一周を超える分は描いても同じ
    let sweep_deg = sweep_deg.clamp(-360.0, 360.0);
    // 弧長 4px ごとに折れ線で近似
    let arc_len = radius.min(COORD_LIMIT) * sweep_deg.abs().to_radians();
    let steps = ((arc_len / 4.0).ceil() as usize).max(1);
    let at = |deg: f32| {
        let rad = deg.to_radians();
        (center.0 + radius * rad.cos(), center.1 + radius * rad.sin())
    };
    let mut prev = at(start_deg);
    for i in 1..=steps {
        let next = at(start_deg + sweep_deg * i as f32 / steps as f32);
        draw_line(layer, prev, next, width, color);
        prev = next;
    }
}

fn fill_triangle(layer: &mut RgbaImage, points: &[Point; 3], color: Color) {
    let edge = |a: Point, b: Point, p: Point| (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let [a, b, c] = *points;
    let area = edge(a, b, c);
    if area == 0.0 {
        return;
    }
    let min_x = to_coord(a.0.min(b.0).min(c.0).floor()).max(0);
    let max_x = to_coord(a.0.max(b.0).max(c.0).ceil()).min(layer.width() as i32 - 1);
    let min_y = to_coord(a.1.min(b.1).min(c.1).floor()).max(0);
    let max_y = to_coord(a.1.max(b.1).max(c.1).ceil()).min(layer.height() as i32 - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = (x as f32, y as f32);
            let (w0, w1, w2) = (edge(b, c, p), edge(c, a, p), edge(a, b, p));
            let inside = if area > 0.0 {
                w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0
            } else {
                w0 <= 0.0 && w1 <= 0.0 && w2 <= 0.0
            };
            if inside {
                blend_pixel(layer, x, y, color);
            }
        }
    }
}

pub fn text_width(text: &str, scale: u32) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * scale.max(1) as i32
}

fn draw_text(layer: &mut RgbaImage, origin: Point, text: &str, scale: u32, align: TextAlign, color: Color) {
    let scale = scale.max(1) as i32;
    let (mut x, top) = match align {
        TextAlign::Left => (round(origin.0), round(origin.1) - GLYPH_HEIGHT * scale),
        TextAlign::Center => (
            round(origin.0) - text_width(text, scale as u32) / 2,
            round(origin.1) - GLYPH_HEIGHT * scale / 2,
        ),
    };

    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = x.saturating_add(col * scale);
                        let py = top.saturating_add(row as i32 * scale);
                        fill_rect(layer, px, py, px.saturating_add(scale - 1), py.saturating_add(scale - 1), color);
                    }
                }
            }
        }
        x = x.saturating_add(GLYPH_ADVANCE * scale);
    }
}

/// 5x7 ビットマップフォント（大文字・数字・記号の一部）
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    Some(match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '°' => [0b01100, 0b10010, 0b10010, 0b01100, 0, 0, 0],
        ' ' => [0; 7],
        _ => return None,
    })
}
