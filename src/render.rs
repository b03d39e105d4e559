use crate::skidsteer::{SkidSteer, State};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const BORDER: Rgb<u8> = Rgb([160, 160, 160]);
const TRAIL: Rgb<u8> = Rgb([150, 150, 150]);
const BODY: Rgb<u8> = Rgb([31, 119, 180]);
const HEADING: Rgb<u8> = Rgb([214, 39, 40]);
const GOAL: Rgb<u8> = Rgb([44, 160, 44]);

// バッチの車両をタイル状に並べて1枚の画像に描く
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    /// タイル一辺のピクセル数
    pub tile: u32,
    pub n_row: u32,
    pub n_col: u32,
    /// 描画範囲 (x_min, x_max, y_min, y_max) [m]
    pub extent: (f64, f64, f64, f64),
    pub goal: Option<State>,
    /// 車体の (長さ, 幅) [m]
    pub body: (f64, f64),
}

// n 個を並べる (行, 列). 16 なら 4x4
pub fn tile_grid(n: usize) -> (u32, u32) {
    let n_col = (n as f64).sqrt().ceil().max(1.0) as u32;
    let n_row = (n as u32).div_ceil(n_col).max(1);
    (n_row, n_col)
}

impl FrameRenderer {
    const TILE: u32 = 300;
    const EXTENT: (f64, f64, f64, f64) = (-0.5, 2.5, -1.0, 2.0);

    pub fn new(n_batch: usize, dx: &SkidSteer) -> Self {
        let (n_row, n_col) = tile_grid(n_batch);
        Self {
            tile: Self::TILE,
            n_row,
            n_col,
            extent: Self::EXTENT,
            goal: None,
            body: (dx.length, dx.track_width),
        }
    }

    pub fn with_goal(mut self, goal: State) -> Self {
        self.goal = Some(goal);
        self
    }

    pub fn with_tile(mut self, tile: u32) -> Self {
        self.tile = tile;
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.n_col * self.tile, self.n_row * self.tile)
    }

    // ワールド座標 [m] からタイル内のピクセル座標へ (y は上向き)
    fn to_pixel(&self, origin: (f32, f32), x: f64, y: f64) -> (f32, f32) {
        let (x_min, x_max, y_min, y_max) = self.extent;
        let s = self.tile as f64;
        let px = (x - x_min) / (x_max - x_min) * s;
        let py = s - (y - y_min) / (y_max - y_min) * s;
        (origin.0 + px as f32, origin.1 + py as f32)
    }

    // history の最後が現在の状態
    pub fn render(&self, history: &[Vec<State>]) -> RgbImage {
        let (w, h) = self.size();
        let mut img = RgbImage::from_pixel(w, h, BACKGROUND);
        let Some(current) = history.last() else {
            return img;
        };

        for (i, x) in current.iter().enumerate() {
            let i = i as u32;
            if i >= self.n_row * self.n_col {
                break;
            }
            let origin = ((i % self.n_col * self.tile) as f32, (i / self.n_col * self.tile) as f32);
            draw_hollow_rect_mut(
                &mut img,
                Rect::at(origin.0 as i32, origin.1 as i32).of_size(self.tile, self.tile),
                BORDER,
            );

            if let Some(goal) = self.goal {
                let g = self.to_pixel(origin, goal[0], goal[1]);
                draw_filled_circle_mut(&mut img, (g.0 as i32, g.1 as i32), 5, GOAL);
            }

            // 軌跡
            let trail: Vec<(f32, f32)> = history
                .iter()
                .filter_map(|b| b.get(i as usize))
                .map(|s| self.to_pixel(origin, s[0], s[1]))
                .collect();
            for seg in trail.windows(2) {
                draw_line_segment_mut(&mut img, seg[0], seg[1], TRAIL);
            }

            self.draw_vehicle(&mut img, origin, x);
        }
        img
    }

    fn draw_vehicle(&self, img: &mut RgbImage, origin: (f32, f32), x: &State) {
        let (hl, hw) = (self.body.0 / 2.0, self.body.1 / 2.0);
        let (s, c) = x[2].sin_cos();
        let corners = [(hl, hw), (-hl, hw), (-hl, -hw), (hl, -hw)];
        let poly: Vec<Point<i32>> = corners
            .iter()
            .map(|(lx, ly)| {
                let p = self.to_pixel(origin, x[0] + c * lx - s * ly, x[1] + s * lx + c * ly);
                Point::new(p.0.round() as i32, p.1.round() as i32)
            })
            .collect();
        // 始点と終点が同じだと描けない
        if poly.first() != poly.last() {
            draw_polygon_mut(img, &poly, BODY);
        }
        let center = self.to_pixel(origin, x[0], x[1]);
        let front = self.to_pixel(origin, x[0] + c * hl, x[1] + s * hl);
        draw_line_segment_mut(img, center, front, HEADING);
    }

    // {t:03}.png として保存する
    pub fn save_frame(&self, dir: &Path, t: usize, history: &[Vec<State>]) -> Result<PathBuf> {
        let path = dir.join(format!("{t:03}.png"));
        self.render(history)
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        Ok(path)
    }
}
