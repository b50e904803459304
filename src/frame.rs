// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/frame.rs - NHWC 帧与信箱帧定义
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

use image::RgbImage;

use crate::geometry::{GeometryError, Letterbox, letterbox_image};

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

#[cfg(feature = "rknn")]
pub trait FrameFormat {
  fn tensor_format(&self) -> rknpu::TensorFormat;
  fn tensor_type(&self) -> rknpu::TensorType;
}

/// 连续存储的 RGB NHWC 帧（batch 为 1）
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn height(&self) -> usize {
    self.height as usize
  }

  pub fn width(&self) -> usize {
    self.width as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

#[cfg(feature = "rknn")]
impl FrameFormat for RgbNhwcFrame {
  fn tensor_format(&self) -> rknpu::TensorFormat {
    rknpu::TensorFormat::NHWC
  }

  fn tensor_type(&self) -> rknpu::TensorType {
    rknpu::TensorType::UInt8
  }
}

/// 模型输入：信箱画布连同把检测结果映射回原图所需的几何参数
#[derive(Debug, Clone)]
pub struct LetterboxedFrame {
  frame: RgbNhwcFrame,
  letterbox: Letterbox,
}

impl LetterboxedFrame {
  pub fn from_image(image: &RgbImage, target: u32) -> Result<Self, GeometryError> {
    let (canvas, letterbox) = letterbox_image(image, target)?;
    Ok(Self {
      frame: canvas.into(),
      letterbox,
    })
  }

  pub fn frame(&self) -> &RgbNhwcFrame {
    &self.frame
  }

  pub fn letterbox(&self) -> &Letterbox {
    &self.letterbox
  }
}

impl AsNhwcFrame for LetterboxedFrame {
  fn as_nhwc(&self) -> &[u8] {
    self.frame.as_nhwc()
  }
}

#[cfg(feature = "rknn")]
impl FrameFormat for LetterboxedFrame {
  fn tensor_format(&self) -> rknpu::TensorFormat {
    self.frame.tensor_format()
  }

  fn tensor_type(&self) -> rknpu::TensorType {
    self.frame.tensor_type()
  }
}
