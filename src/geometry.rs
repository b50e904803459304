// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/geometry.rs - 检测框、信箱缩放与显示映射
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
  #[error("源图像尺寸无效: {width}x{height}")]
  EmptySource { width: u32, height: u32 },
  #[error("目标画布尺寸无效: {0}")]
  EmptyTarget(u32),
}

/// 源图像像素坐标系中的轴对齐矩形
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self::new(
      cx - width / 2.0,
      cy - height / 2.0,
      cx + width / 2.0,
      cy + height / 2.0,
    )
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 将四个边裁剪到 `[0, width] × [0, height]`
  pub fn clamp_to(&self, width: f32, height: f32) -> Self {
    Self::new(
      self.left.clamp(0.0, width),
      self.top.clamp(0.0, height),
      self.right.clamp(0.0, width),
      self.bottom.clamp(0.0, height),
    )
  }

  pub fn intersection_area(&self, other: &BBox) -> f32 {
    let w = self.right.min(other.right) - self.left.max(other.left);
    let h = self.bottom.min(other.bottom) - self.top.max(other.top);
    if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
  }

  /// 交并比。两框无重叠，或任一面积非正时为 0。
  pub fn iou(&self, other: &BBox) -> f32 {
    let area_a = self.area();
    let area_b = other.area();
    if area_a <= 0.0 || area_b <= 0.0 {
      return 0.0;
    }
    let inter = self.intersection_area(other);
    if inter <= 0.0 {
      return 0.0;
    }
    let union = area_a + area_b - inter;
    if union <= 0.0 {
      return 0.0;
    }
    inter / union
  }
}

/// 信箱缩放参数：把任意尺寸的图像等比缩放后居中放入 `target × target` 的黑色画布
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  src_width: u32,
  src_height: u32,
  target: u32,
  scale: f32,
  resized_width: u32,
  resized_height: u32,
  offset_x: u32,
  offset_y: u32,
}

impl Letterbox {
  pub fn new(src_width: u32, src_height: u32, target: u32) -> Result<Self, GeometryError> {
    if src_width == 0 || src_height == 0 {
      return Err(GeometryError::EmptySource {
        width: src_width,
        height: src_height,
      });
    }
    if target == 0 {
      return Err(GeometryError::EmptyTarget(target));
    }

    let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
    let resized_width = ((src_width as f32 * scale).round() as u32).clamp(1, target);
    let resized_height = ((src_height as f32 * scale).round() as u32).clamp(1, target);

    Ok(Self {
      src_width,
      src_height,
      target,
      scale,
      resized_width,
      resized_height,
      offset_x: (target - resized_width) / 2,
      offset_y: (target - resized_height) / 2,
    })
  }

  pub fn src_width(&self) -> u32 {
    self.src_width
  }

  pub fn src_height(&self) -> u32 {
    self.src_height
  }

  pub fn target(&self) -> u32 {
    self.target
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  pub fn resized(&self) -> (u32, u32) {
    (self.resized_width, self.resized_height)
  }

  pub fn offset(&self) -> (u32, u32) {
    (self.offset_x, self.offset_y)
  }

  /// 源图像坐标 → 画布坐标
  pub fn to_canvas(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale + self.offset_x as f32,
      y * self.scale + self.offset_y as f32,
    )
  }

  /// 画布坐标 → 源图像坐标，结果裁剪到源图像范围内
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      ((x - self.offset_x as f32) / self.scale).clamp(0.0, self.src_width as f32),
      ((y - self.offset_y as f32) / self.scale).clamp(0.0, self.src_height as f32),
    )
  }

  pub fn box_to_source(&self, bbox: &BBox) -> BBox {
    let (left, top) = self.to_source(bbox.left, bbox.top);
    let (right, bottom) = self.to_source(bbox.right, bbox.bottom);
    BBox::new(left, top, right, bottom)
  }
}

/// 生成信箱画布。缩放使用双线性插值，空白区域填充黑色。
pub fn letterbox_image(image: &RgbImage, target: u32) -> Result<(RgbImage, Letterbox), GeometryError> {
  let letterbox = Letterbox::new(image.width(), image.height(), target)?;
  let (width, height) = letterbox.resized();
  let resized = imageops::resize(image, width, height, FilterType::Triangle);

  let mut canvas = RgbImage::from_pixel(target, target, Rgb([0, 0, 0]));
  let (offset_x, offset_y) = letterbox.offset();
  imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);
  Ok((canvas, letterbox))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_iou_properties() {
    let a = BBox::new(10.0, 10.0, 50.0, 60.0);
    let b = BBox::new(30.0, 20.0, 90.0, 70.0);
    assert_eq!(a.iou(&a), 1.0);
    assert_eq!(a.iou(&b), b.iou(&a));
    assert!(a.iou(&b) > 0.0 && a.iou(&b) < 1.0);
  }

  #[test]
  fn test_iou_disjoint_and_degenerate() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let far = BBox::new(20.0, 20.0, 30.0, 30.0);
    let touching = BBox::new(10.0, 0.0, 20.0, 10.0);
    let flat = BBox::new(0.0, 5.0, 10.0, 5.0);
    assert_eq!(a.iou(&far), 0.0);
    assert_eq!(a.iou(&touching), 0.0);
    assert_eq!(a.iou(&flat), 0.0);
    assert_eq!(flat.iou(&flat), 0.0);
  }

  #[test]
  fn test_iou_known_value() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(5.0, 0.0, 15.0, 10.0);
    // 50 / (100 + 100 - 50)
    assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn test_letterbox_landscape() {
    let lb = Letterbox::new(1280, 720, 640).unwrap();
    assert_eq!(lb.scale(), 0.5);
    assert_eq!(lb.resized(), (640, 360));
    assert_eq!(lb.offset(), (0, 140));
  }

  #[test]
  fn test_letterbox_portrait() {
    let lb = Letterbox::new(300, 600, 640).unwrap();
    assert_eq!(lb.resized(), (320, 640));
    assert_eq!(lb.offset(), (160, 0));
  }

  #[test]
  fn test_letterbox_rejects_empty() {
    assert_eq!(
      Letterbox::new(0, 10, 640),
      Err(GeometryError::EmptySource { width: 0, height: 10 })
    );
    assert_eq!(Letterbox::new(10, 10, 0), Err(GeometryError::EmptyTarget(0)));
  }

  #[test]
  fn test_letterbox_inverse_within_one_pixel() {
    let shapes = [(1, 1), (1, 1000), (1000, 1), (640, 480), (333, 777), (1920, 1080)];
    for &(w, h) in &shapes {
      for &target in &[1u32, 7, 320, 640] {
        let lb = Letterbox::new(w, h, target).unwrap();
        let (ox, oy) = lb.offset();
        let (rw, rh) = lb.resized();
        for i in 0..=4 {
          let x = ox as f32 + rw as f32 * i as f32 / 4.0;
          let y = oy as f32 + rh as f32 * i as f32 / 4.0;
          let (sx, sy) = lb.to_source(x, y);
          assert!(sx >= 0.0 && sx <= w as f32);
          assert!(sy >= 0.0 && sy <= h as f32);
          let (cx, cy) = lb.to_canvas(sx, sy);
          assert!((cx - x).abs() <= 1.0, "{w}x{h}@{target}: {cx} vs {x}");
          assert!((cy - y).abs() <= 1.0, "{w}x{h}@{target}: {cy} vs {y}");
        }
      }
    }
  }

  #[test]
  fn test_letterbox_inverse_clamps_padding() {
    let lb = Letterbox::new(1280, 720, 640).unwrap();
    assert_eq!(lb.to_source(-20.0, 10.0), (0.0, 0.0));
    assert_eq!(lb.to_source(700.0, 639.0), (1280.0, 720.0));
  }

  #[test]
  fn test_letterbox_image_pads_black() {
    let image = RgbImage::from_pixel(200, 100, Rgb([200, 120, 40]));
    let (canvas, lb) = letterbox_image(&image, 64).unwrap();
    assert_eq!(canvas.dimensions(), (64, 64));
    assert_eq!(lb.offset(), (0, 16));
    assert_eq!(canvas.get_pixel(32, 2), &Rgb([0, 0, 0]));
    assert_eq!(canvas.get_pixel(32, 60), &Rgb([0, 0, 0]));
    let inner = canvas.get_pixel(32, 32);
    assert!(inner[0] > 150 && inner[1] > 80 && inner[2] > 20);
  }
}
