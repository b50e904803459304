// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Args;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  config::PipelineConfig,
  context::InferenceContext,
  model::ModelWrapper,
  pipeline::FishPipeline,
};

/// 两个可执行文件共用的流水线参数
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
  /// 模型 A，例如 `rknn:///path/a.rknn` 或 `tensor:///path/a.json`
  #[arg(long, value_name = "MODEL")]
  pub model_a: Url,
  /// 模型 B
  #[arg(long, value_name = "MODEL")]
  pub model_b: Url,
  /// 标签表，每行一个类别名
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,
  /// XGBoost JSON 树模型，缺省时使用回退估计
  #[arg(long, value_name = "FILE")]
  pub tree_model: Option<PathBuf>,
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 输入来源，`image:///path/a.jpg` 或 `folder:///path/dir`
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，`log://`、`image:///path/out.png` 或 `folder:///path/records`
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

impl PipelineArgs {
  pub fn log(&self) {
    info!("模型 A: {}", self.model_a);
    info!("模型 B: {}", self.model_b);
    info!("标签表: {}", self.labels.display());
    if let Some(path) = &self.tree_model {
      info!("树模型: {}", path.display());
    }
    info!("输入来源: {}", self.input);
    info!("输出路径: {}", self.output);
  }

  pub fn load_config(&self) -> anyhow::Result<PipelineConfig> {
    match &self.config {
      Some(path) => Ok(PipelineConfig::load(path)?),
      None => Ok(PipelineConfig::default()),
    }
  }

  pub fn build_context(&self) -> anyhow::Result<InferenceContext> {
    let mut builder = InferenceContext::builder()
      .labels_path(&self.labels)
      .config(self.load_config()?);
    if let Some(path) = &self.tree_model {
      builder = builder.tree_model_path(path);
    }
    Ok(builder.build()?)
  }

  pub fn build_pipeline(&self) -> anyhow::Result<FishPipeline<ModelWrapper, ModelWrapper>> {
    let context = self.build_context()?;
    let model_a = ModelWrapper::from_url(&self.model_a)?;
    let model_b = ModelWrapper::from_url(&self.model_b)?;
    context.check_input_size("A", model_a.input_size())?;
    context.check_input_size("B", model_b.input_size())?;
    Ok(FishPipeline::new(context, model_a, model_b))
  }
}
