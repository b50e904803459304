// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/model/replay.rs - 张量回放模型
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
use url::Url;

use super::{DecodeError, Model, RawDetectionTensor};
use crate::{FromUrl, FromUrlWithScheme, frame::LetterboxedFrame, query_value};

#[derive(Error, Debug)]
pub enum TensorReplayError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("张量文件解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("张量布局错误: {0}")]
  Layout(#[from] DecodeError),
  #[error("URL 方案错误: {0}")]
  SchemeMismatch(String),
  #[error("input_size 无效: {0}")]
  InvalidInputSize(String),
}

/// 张量转储文件格式: `{"shape": [1, 20, 8400], "data": [...]}`
#[derive(Debug, Serialize, Deserialize)]
struct TensorDump {
  shape: Vec<usize>,
  data: Vec<f32>,
}

/// 对任何输入都返回同一份预先记录的原始输出，用于离线复现与测试
#[derive(Debug, Clone)]
pub struct TensorReplayModel {
  tensor: RawDetectionTensor,
  input_size: Option<u32>,
}

impl TensorReplayModel {
  pub fn new(tensor: RawDetectionTensor) -> Self {
    Self {
      tensor,
      input_size: None,
    }
  }

  /// 记录张量时模型的输入边长
  pub fn with_input_size(mut self, input_size: u32) -> Self {
    self.input_size = Some(input_size);
    self
  }

  pub fn input_size(&self) -> Option<u32> {
    self.input_size
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, TensorReplayError> {
    let path = path.as_ref();
    info!("加载张量转储: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let dump: TensorDump = serde_json::from_str(&text)?;
    let tensor = RawDetectionTensor::from_shape(&dump.shape, dump.data)?;
    debug!("张量形状: {:?}", tensor.shape());
    Ok(Self::new(tensor))
  }

  /// 以转储格式写出张量
  pub fn save(tensor: &RawDetectionTensor, path: impl AsRef<Path>) -> Result<(), TensorReplayError> {
    let dump = TensorDump {
      shape: tensor.shape().to_vec(),
      data: tensor.as_slice().to_vec(),
    };
    std::fs::write(path, serde_json::to_string(&dump)?)?;
    Ok(())
  }
}

impl FromUrl for TensorReplayModel {
  type Error = TensorReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TensorReplayError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    let model = Self::load(url.path())?;
    match query_value(url, "input_size") {
      Some(value) => {
        let input_size = value
          .parse()
          .map_err(|_| TensorReplayError::InvalidInputSize(value))?;
        Ok(model.with_input_size(input_size))
      }
      None => Ok(model),
    }
  }
}

impl FromUrlWithScheme for TensorReplayModel {
  const SCHEME: &'static str = "tensor";
}

impl Model for TensorReplayModel {
  type Input = LetterboxedFrame;
  type Output = RawDetectionTensor;
  type Error = TensorReplayError;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(self.tensor.clone())
  }
}
