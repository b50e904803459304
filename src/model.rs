// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::LetterboxedFrame};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

mod decode;
mod nms;
mod replay;
#[cfg(feature = "rknn")]
mod rknn;

pub use self::decode::{
  BOX_ATTRIBUTES, Candidate, DecodeError, Decoder, RawDetectionTensor, expected_anchor_count,
};
pub use self::nms::non_max_suppression;
pub use self::replay::{TensorReplayError, TensorReplayModel};
#[cfg(feature = "rknn")]
pub use self::rknn::{RknnModel, RknnModelBuilder, RknnModelError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("张量回放模型错误: {0}")]
  TensorReplay(#[from] TensorReplayError),
  #[cfg(feature = "rknn")]
  #[error("RKNN 模型错误: {0}")]
  Rknn(#[from] RknnModelError),
  #[error("不支持的模型 URL 方案: {0}")]
  UnsupportedScheme(String),
}

/// 按 URL 方案选择的检测引擎
pub enum ModelWrapper {
  TensorReplay(TensorReplayModel),
  #[cfg(feature = "rknn")]
  Rknn(RknnModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      TensorReplayModel::SCHEME => Ok(ModelWrapper::TensorReplay(TensorReplayModel::from_url(url)?)),
      #[cfg(feature = "rknn")]
      RknnModelBuilder::SCHEME => Ok(ModelWrapper::Rknn(RknnModelBuilder::from_url(url)?.build()?)),
      scheme => Err(ModelError::UnsupportedScheme(scheme.to_string())),
    }
  }
}

impl ModelWrapper {
  /// 引擎声明的输入边长，未知时为 `None`
  pub fn input_size(&self) -> Option<u32> {
    match self {
      ModelWrapper::TensorReplay(model) => model.input_size(),
      #[cfg(feature = "rknn")]
      ModelWrapper::Rknn(model) => Some(model.input_size()),
    }
  }
}

impl Model for ModelWrapper {
  type Input = LetterboxedFrame;
  type Output = RawDetectionTensor;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ModelWrapper::TensorReplay(model) => Ok(model.infer(input)?),
      #[cfg(feature = "rknn")]
      ModelWrapper::Rknn(model) => Ok(model.infer(input)?),
    }
  }
}
