// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/config.rs - 流水线配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  ensemble::{DEFAULT_ENSEMBLE_IOU_THRESHOLD, PartSpec, default_parts},
  shelf_life::FallbackDurations,
};

/// 模型输入画布边长
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// 解码阶段的最低置信度（严格大于）
pub const DEFAULT_SCORE_FLOOR: f32 = 0.2;
/// 映射回原图后宽或高不超过该值的框被丢弃
pub const DEFAULT_MIN_BOX_SIZE: f32 = 5.0;
pub const DEFAULT_MAX_PER_PART: usize = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub input_size: u32,
  pub score_floor: f32,
  pub min_box_size: f32,
  pub iou_threshold: f32,
  pub max_per_part: usize,
  pub parts: Vec<PartSpec>,
  pub fallback: FallbackDurations,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      input_size: DEFAULT_INPUT_SIZE,
      score_floor: DEFAULT_SCORE_FLOOR,
      min_box_size: DEFAULT_MIN_BOX_SIZE,
      iou_threshold: DEFAULT_ENSEMBLE_IOU_THRESHOLD,
      max_per_part: DEFAULT_MAX_PER_PART,
      parts: default_parts(),
      fallback: FallbackDurations::default(),
    }
  }
}

impl PipelineConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载流水线配置: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(text)?;
    config.validate()?;
    debug!("流水线配置: {:?}", config);
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_size == 0 {
      return Err(ConfigError::Invalid("input_size 必须大于 0".to_string()));
    }
    if !(0.0..=1.0).contains(&self.score_floor) {
      return Err(ConfigError::Invalid(format!(
        "score_floor 超出 [0, 1]: {}",
        self.score_floor
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(ConfigError::Invalid(format!(
        "iou_threshold 超出 [0, 1]: {}",
        self.iou_threshold
      )));
    }
    if !(self.min_box_size >= 0.0) {
      return Err(ConfigError::Invalid(format!(
        "min_box_size 不能为负: {}",
        self.min_box_size
      )));
    }
    if self.max_per_part == 0 {
      return Err(ConfigError::Invalid("max_per_part 必须至少为 1".to_string()));
    }
    if let Some(part) = self.parts.iter().find(|p| !(0.0..=1.0).contains(&p.threshold)) {
      return Err(ConfigError::Invalid(format!(
        "部位 {} 的阈值超出 [0, 1]: {}",
        part.name, part.threshold
      )));
    }
    Ok(())
  }
}
