// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/model/decode.rs - 检测张量解码
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

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::{DEFAULT_MIN_BOX_SIZE, DEFAULT_SCORE_FLOOR},
  geometry::{BBox, Letterbox},
};

/// 每个锚点前 4 个属性为 cx, cy, w, h
pub const BOX_ATTRIBUTES: usize = 4;

const DETECTION_STRIDES: [u32; 3] = [8, 16, 32];

/// 三个检测头（步长 8/16/32）在给定输入边长下的锚点总数
pub fn expected_anchor_count(input_size: u32) -> usize {
  DETECTION_STRIDES
    .iter()
    .map(|&stride| {
      let cells = (input_size / stride) as usize;
      cells * cells
    })
    .sum()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("张量维度数不支持: {0}，期望 2 或 3")]
  UnsupportedRank(usize),
  #[error("批大小必须为 1，实际为 {0}")]
  BatchSize(usize),
  #[error("属性数量过少: {0}，至少需要 {min}", min = BOX_ATTRIBUTES + 1)]
  TooFewAttributes(usize),
  #[error("张量数据长度不匹配: 期望 {expected}，实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("类别数量不匹配: 标签表有 {expected} 类，张量有 {actual} 类")]
  ClassCountMismatch { expected: usize, actual: usize },
  #[error("锚点数量不匹配: 期望 {expected}，实际 {actual}")]
  AnchorCountMismatch { expected: usize, actual: usize },
}

/// 单个模型输出的候选检测
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
  pub bbox: BBox,
  pub class_id: usize,
  pub score: f32,
}

/// `[num_attributes][num_anchors]` 布局的原始检测张量
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetectionTensor {
  num_attributes: usize,
  num_anchors: usize,
  data: Box<[f32]>,
}

impl RawDetectionTensor {
  pub fn new(num_attributes: usize, num_anchors: usize, data: Vec<f32>) -> Result<Self, DecodeError> {
    if num_attributes <= BOX_ATTRIBUTES {
      return Err(DecodeError::TooFewAttributes(num_attributes));
    }
    let expected = num_attributes * num_anchors;
    if data.len() != expected {
      return Err(DecodeError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      num_attributes,
      num_anchors,
      data: data.into_boxed_slice(),
    })
  }

  /// 接受 `[1, attrs, anchors]` 或 `[attrs, anchors]`
  pub fn from_shape(shape: &[usize], data: Vec<f32>) -> Result<Self, DecodeError> {
    match *shape {
      [1, attributes, anchors] | [attributes, anchors] => Self::new(attributes, anchors, data),
      [batch, _, _] => Err(DecodeError::BatchSize(batch)),
      _ => Err(DecodeError::UnsupportedRank(shape.len())),
    }
  }

  pub fn num_attributes(&self) -> usize {
    self.num_attributes
  }

  pub fn num_anchors(&self) -> usize {
    self.num_anchors
  }

  pub fn num_classes(&self) -> usize {
    self.num_attributes - BOX_ATTRIBUTES
  }

  pub fn shape(&self) -> [usize; 3] {
    [1, self.num_attributes, self.num_anchors]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  #[inline]
  fn value(&self, attribute: usize, anchor: usize) -> f32 {
    self.data[attribute * self.num_anchors + anchor]
  }
}

#[derive(Debug, Clone)]
pub struct Decoder {
  num_classes: usize,
  score_floor: f32,
  min_box_size: f32,
  expected_anchors: Option<usize>,
}

impl Decoder {
  pub fn new(num_classes: usize) -> Self {
    Self {
      num_classes,
      score_floor: DEFAULT_SCORE_FLOOR,
      min_box_size: DEFAULT_MIN_BOX_SIZE,
      expected_anchors: None,
    }
  }

  pub fn with_score_floor(mut self, score_floor: f32) -> Self {
    self.score_floor = score_floor;
    self
  }

  pub fn with_min_box_size(mut self, min_box_size: f32) -> Self {
    self.min_box_size = min_box_size;
    self
  }

  pub fn with_expected_anchors(mut self, anchors: usize) -> Self {
    self.expected_anchors = Some(anchors);
    self
  }

  /// 按锚点顺序输出候选框，坐标已映射回原图
  pub fn decode(&self, raw: &RawDetectionTensor, letterbox: &Letterbox) -> Result<Vec<Candidate>, DecodeError> {
    if raw.num_classes() != self.num_classes {
      return Err(DecodeError::ClassCountMismatch {
        expected: self.num_classes,
        actual: raw.num_classes(),
      });
    }
    if let Some(expected) = self.expected_anchors
      && expected != raw.num_anchors()
    {
      return Err(DecodeError::AnchorCountMismatch {
        expected,
        actual: raw.num_anchors(),
      });
    }

    let size = letterbox.target() as f32;
    let mut items = Vec::new();

    for anchor in 0..raw.num_anchors() {
      let mut class_id = 0usize;
      let mut score = f32::NEG_INFINITY;
      for c in 0..self.num_classes {
        let s = raw.value(BOX_ATTRIBUTES + c, anchor);
        if s > score {
          score = s;
          class_id = c;
        }
      }

      if score <= self.score_floor {
        continue;
      }

      let canvas_box = BBox::from_center(
        raw.value(0, anchor) * size,
        raw.value(1, anchor) * size,
        raw.value(2, anchor) * size,
        raw.value(3, anchor) * size,
      );
      let bbox = letterbox.box_to_source(&canvas_box);
      // NaN 坐标同样被拒绝
      if !(bbox.width() > self.min_box_size && bbox.height() > self.min_box_size) {
        continue;
      }

      items.push(Candidate {
        bbox,
        class_id,
        score,
      });
    }

    debug!("解码得到 {} 个候选框", items.len());
    Ok(items)
  }
}
