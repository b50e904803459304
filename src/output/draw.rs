// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/output/draw.rs - 检测结果绘制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{ensemble::EnsembleEntry, geometry::BBox, pipeline::FishReport, query_value};

pub const BOX_COLOR: [u8; 3] = [255, 0, 0];
pub const BOX_STROKE_WIDTH: u32 = 4;
pub const LABEL_FONT_SIZE: f32 = 40.0;
/// 标签基线位于框顶上方的距离
pub const LABEL_OFFSET_Y: f32 = 10.0;

const LUMA_SAMPLE_WIDTH: u32 = 32;
const LUMA_SAMPLE_HEIGHT: u32 = 16;
const LUMA_THRESHOLD: f32 = 128.0;
const TEXT_WHITE: [u8; 3] = [255, 255, 255];
const TEXT_BLACK: [u8; 3] = [0, 0, 0];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(String),
}

/// 标签文字颜色：取标签位置起 32×16 区域（裁剪到图像内）的平均亮度，
/// 暗背景用白字，亮背景用黑字
pub fn label_text_color(image: &RgbImage, bbox: &BBox) -> [u8; 3] {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return TEXT_BLACK;
  }

  let start_x = (bbox.left as i64).clamp(0, width as i64 - 1) as u32;
  let start_y = ((bbox.top - LABEL_OFFSET_Y) as i64).clamp(0, height as i64 - 1) as u32;
  let end_x = (start_x + LUMA_SAMPLE_WIDTH).min(width);
  let end_y = (start_y + LUMA_SAMPLE_HEIGHT).min(height);

  let mut sum = 0.0f32;
  let mut count = 0u32;
  for y in start_y..end_y {
    for x in start_x..end_x {
      let Rgb([r, g, b]) = *image.get_pixel(x, y);
      sum += 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
      count += 1;
    }
  }

  let luma = if count == 0 { 255.0 } else { sum / count as f32 };
  if luma < LUMA_THRESHOLD { TEXT_WHITE } else { TEXT_BLACK }
}

/// 红色描边框加自适应颜色的标签。未提供字体时只画框。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  box_color: [u8; 3],
  stroke_width: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
      stroke_width: BOX_STROKE_WIDTH,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    debug!("加载字体: {}", path.as_ref().display());
    Ok(self.with_font(font))
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  /// 读取 URL 中的 `font=<路径>` 与 `font_size=<像素>`
  pub fn from_url_query(url: &Url) -> Result<Self, DrawError> {
    let mut draw = Draw::default();
    if let Some(size) = query_value(url, "font_size").and_then(|s| s.parse().ok()) {
      draw = draw.with_font_size(size);
    }
    match query_value(url, "font") {
      Some(path) => draw.with_font_file(path),
      None => Ok(draw),
    }
  }

  pub fn draw_report(&self, image: &mut RgbImage, report: &FishReport) {
    self.draw_entries(image, &report.entries);
  }

  /// 标签颜色在绘制前按原图计算
  pub fn draw_entries(&self, image: &mut RgbImage, entries: &[EnsembleEntry]) {
    let colors: Vec<_> = entries
      .iter()
      .map(|entry| label_text_color(image, &entry.bbox))
      .collect();
    for (entry, color) in entries.iter().zip(colors) {
      self.draw_bbox(image, &entry.bbox);
      self.draw_label(image, entry, color);
    }
  }

  fn draw_bbox(&self, image: &mut RgbImage, bbox: &BBox) {
    let left = bbox.left.floor() as i32;
    let top = bbox.top.floor() as i32;
    let right = bbox.right.ceil() as i32;
    let bottom = bbox.bottom.ceil() as i32;

    // 由外向内逐像素加粗
    for t in 0..self.stroke_width as i32 {
      let (l, tp, r, b) = (left + t, top + t, right - t, bottom - t);
      if r <= l || b <= tp {
        break;
      }
      let rect = Rect::at(l, tp).of_size((r - l) as u32, (b - tp) as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.box_color));
    }
  }

  fn draw_label(&self, image: &mut RgbImage, entry: &EnsembleEntry, color: [u8; 3]) {
    let Some(font) = &self.font else {
      return;
    };
    let x = entry.bbox.left.max(0.0) as i32;
    let y = (entry.bbox.top - LABEL_OFFSET_Y - self.font_size).max(0.0) as i32;
    draw_text_mut(
      image,
      Rgb(color),
      x,
      y,
      PxScale::from(self.font_size),
      font,
      &entry.label,
    );
  }
}
