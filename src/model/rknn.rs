// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/model/rknn.rs - RKNN NPU 检测引擎
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

use rknpu::{Context, InitFlags};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use super::{DecodeError, Model, RawDetectionTensor, expected_anchor_count};
use crate::{
  FromUrl, FromUrlWithScheme,
  config::DEFAULT_INPUT_SIZE,
  frame::{AsNhwcFrame, FrameFormat, LetterboxedFrame},
  query_value,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknnModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输出张量布局错误: {0}")]
  Layout(DecodeError),
  #[error("输入边长不匹配: 模型 {expected}, 画布 {actual}")]
  InputSizeMismatch { expected: u32, actual: u32 },
}

impl From<std::io::Error> for RknnModelError {
  fn from(err: std::io::Error) -> Self {
    RknnModelError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnModelError {
  fn from(err: rknpu::Error) -> Self {
    RknnModelError::RknnError(err)
  }
}

impl From<DecodeError> for RknnModelError {
  fn from(err: DecodeError) -> Self {
    RknnModelError::Layout(err)
  }
}

impl RknnModelError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnModelError::ModelInvalid(msg.to_string(), e)
  }
}

/// 单输入单输出、输出为 `[1][4 + 类别数][锚点数]` 的检测模型
pub struct RknnModel {
  context: Context,
  input_size: u32,
}

pub struct RknnModelBuilder {
  model_path: String,
  input_size: u32,
  flags: InitFlags,
}

impl FromUrl for RknnModelBuilder {
  type Error = RknnModelError;

  /// `rknn:///path/to/best.rknn?input_size=640`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let input_size = match query_value(url, "input_size") {
      Some(value) => value
        .parse()
        .map_err(|_| RknnModelError::ModelPathError(format!("input_size 无效: {}", value)))?,
      None => DEFAULT_INPUT_SIZE,
    };

    Ok(RknnModelBuilder {
      model_path: url.path().to_string(),
      input_size,
      flags: InitFlags::default(),
    })
  }
}

impl FromUrlWithScheme for RknnModelBuilder {
  const SCHEME: &'static str = "rknn";
}

impl RknnModelBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn build(self) -> Result<RknnModel, RknnModelError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnModelError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnModelError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnModelError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(RknnModelError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成, 输入边长 {}", self.input_size);
    Ok(RknnModel {
      context,
      input_size: self.input_size,
    })
  }
}

impl RknnModel {
  pub fn input_size(&self) -> u32 {
    self.input_size
  }

  /// 输出只有扁平数据，属性数由锚点总数反推
  fn to_tensor(&self, data: Vec<f32>) -> Result<RawDetectionTensor, DecodeError> {
    let anchors = expected_anchor_count(self.input_size);
    if anchors == 0 || data.len() % anchors != 0 {
      return Err(DecodeError::LengthMismatch {
        expected: anchors,
        actual: data.len(),
      });
    }
    RawDetectionTensor::new(data.len() / anchors, anchors, data)
  }
}

impl Model for RknnModel {
  type Input = LetterboxedFrame;
  type Output = RawDetectionTensor;
  type Error = RknnModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let target = input.letterbox().target();
    if target != self.input_size {
      return Err(RknnModelError::InputSizeMismatch {
        expected: self.input_size,
        actual: target,
      });
    }

    debug!("设置模型输入");
    self.context.set_input(
      0,
      input.as_nhwc(),
      input.tensor_format(),
      input.tensor_type(),
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?.to_vec();
    debug!("模型输出长度: {}", data.len());

    Ok(self.to_tensor(data)?)
  }
}
