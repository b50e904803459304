// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/pipeline.rs - 双模型检测流水线
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
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  context::InferenceContext,
  ensemble::EnsembleEntry,
  frame::LetterboxedFrame,
  geometry::GeometryError,
  model::{DecodeError, Model, RawDetectionTensor},
  shelf_life::ShelfLifeReport,
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("预处理错误: {0}")]
  Geometry(#[from] GeometryError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型 {stage} 推理失败: {source}")]
  Model {
    stage: &'static str,
    source: BoxedError,
  },
}

/// 单张图像的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FishReport {
  pub source_width: u32,
  pub source_height: u32,
  pub entries: Vec<EnsembleEntry>,
  pub shelf_life: ShelfLifeReport,
}

impl FishReport {
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn labels(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|e| e.label.as_str())
  }
}

/// 信箱缩放 → 模型 A、模型 B（顺序执行）→ 解码 → 融合 → 货架期
pub struct FishPipeline<A, B> {
  context: InferenceContext,
  model_a: A,
  model_b: B,
}

impl<A, B> FishPipeline<A, B> {
  pub fn new(context: InferenceContext, model_a: A, model_b: B) -> Self {
    Self {
      context,
      model_a,
      model_b,
    }
  }

  pub fn context(&self) -> &InferenceContext {
    &self.context
  }

  /// 拆出上下文以便显式关闭
  pub fn into_parts(self) -> (InferenceContext, A, B) {
    (self.context, self.model_a, self.model_b)
  }
}

impl<A, B> Model for FishPipeline<A, B>
where
  A: Model<Input = LetterboxedFrame, Output = RawDetectionTensor>,
  A::Error: std::error::Error + Send + Sync + 'static,
  B: Model<Input = LetterboxedFrame, Output = RawDetectionTensor>,
  B::Error: std::error::Error + Send + Sync + 'static,
{
  type Input = RgbImage;
  type Output = FishReport;
  type Error = PipelineError;

  fn infer(&self, image: &Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = self.context.letterbox(image)?;
    debug!(
      "信箱缩放: {}x{} → {}",
      image.width(),
      image.height(),
      frame.letterbox().target()
    );

    let raw_a = self.model_a.infer(&frame).map_err(|e| PipelineError::Model {
      stage: "A",
      source: Box::new(e),
    })?;
    let raw_b = self.model_b.infer(&frame).map_err(|e| PipelineError::Model {
      stage: "B",
      source: Box::new(e),
    })?;

    Ok(self.context.process(frame.letterbox(), &raw_a, &raw_b)?)
  }
}
