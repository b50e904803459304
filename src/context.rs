// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/context.rs - 推理上下文
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::{ConfigError, PipelineConfig},
  ensemble::{EnsembleEntry, Ensembler},
  frame::LetterboxedFrame,
  geometry::{GeometryError, Letterbox},
  labels::{LabelError, LabelVocabulary},
  model::{Candidate, DecodeError, Decoder, RawDetectionTensor},
  pipeline::FishReport,
  shelf_life::{ShelfLifeEstimator, ShelfLifeReport},
  tree::TreeEnsemble,
};

#[derive(Error, Debug)]
pub enum ContextError {
  #[error("未提供标签表")]
  MissingLabels,
  #[error("标签错误: {0}")]
  Label(#[from] LabelError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型 {stage} 的输入边长为 {actual}, 配置为 {expected}")]
  InputSizeMismatch {
    stage: &'static str,
    expected: u32,
    actual: u32,
  },
}

enum Source<T> {
  Path(PathBuf),
  Value(T),
}

/// 加载完毕后只读的推理资源：标签表、树模型与配置
#[derive(Debug)]
pub struct InferenceContext {
  config: PipelineConfig,
  vocabulary: LabelVocabulary,
  decoder: Decoder,
  ensembler: Ensembler,
  estimator: ShelfLifeEstimator,
}

#[derive(Default)]
pub struct InferenceContextBuilder {
  labels: Option<Source<LabelVocabulary>>,
  trees: Option<Source<TreeEnsemble>>,
  config: PipelineConfig,
}

impl InferenceContextBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn labels_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels = Some(Source::Path(path.into()));
    self
  }

  pub fn labels(mut self, vocabulary: LabelVocabulary) -> Self {
    self.labels = Some(Source::Value(vocabulary));
    self
  }

  /// 树模型缺失或无效时退化为回退估计，不会使构建失败
  pub fn tree_model_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.trees = Some(Source::Path(path.into()));
    self
  }

  pub fn trees(mut self, trees: TreeEnsemble) -> Self {
    self.trees = Some(Source::Value(trees));
    self
  }

  pub fn config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Result<InferenceContext, ContextError> {
    self.config.validate()?;

    let vocabulary = match self.labels.ok_or(ContextError::MissingLabels)? {
      Source::Path(path) => LabelVocabulary::load(path)?,
      Source::Value(vocabulary) => vocabulary,
    };
    let trees = match self.trees {
      Some(Source::Path(path)) => TreeEnsemble::load_or_empty(path),
      Some(Source::Value(trees)) => trees,
      None => {
        info!("未提供树模型, 使用回退估计");
        TreeEnsemble::empty()
      }
    };

    let config = self.config;
    let decoder = Decoder::new(vocabulary.len())
      .with_score_floor(config.score_floor)
      .with_min_box_size(config.min_box_size);
    let ensembler = Ensembler::new(config.parts.clone())
      .with_iou_threshold(config.iou_threshold)
      .with_max_per_part(config.max_per_part);
    let estimator = ShelfLifeEstimator::new(trees, config.fallback.clone());

    info!(
      "推理上下文就绪: {} 个类别, {} 个部位, 树模型{}",
      vocabulary.len(),
      config.parts.len(),
      if estimator.trees().has_trees() { "可用" } else { "不可用" }
    );

    Ok(InferenceContext {
      config,
      vocabulary,
      decoder,
      ensembler,
      estimator,
    })
  }
}

impl InferenceContext {
  pub fn builder() -> InferenceContextBuilder {
    InferenceContextBuilder::new()
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn vocabulary(&self) -> &LabelVocabulary {
    &self.vocabulary
  }

  pub fn trees(&self) -> &TreeEnsemble {
    self.estimator.trees()
  }

  /// 引擎声明了输入边长时，必须与信箱画布一致
  pub fn check_input_size(&self, stage: &'static str, input_size: Option<u32>) -> Result<(), ContextError> {
    match input_size {
      Some(actual) if actual != self.config.input_size => Err(ContextError::InputSizeMismatch {
        stage,
        expected: self.config.input_size,
        actual,
      }),
      _ => Ok(()),
    }
  }

  pub fn letterbox(&self, image: &RgbImage) -> Result<LetterboxedFrame, GeometryError> {
    LetterboxedFrame::from_image(image, self.config.input_size)
  }

  /// 两个模型的原始输出 → 融合结果与货架期
  pub fn process(
    &self,
    letterbox: &Letterbox,
    raw_a: &RawDetectionTensor,
    raw_b: &RawDetectionTensor,
  ) -> Result<FishReport, DecodeError> {
    let candidates_a = self.decoder.decode(raw_a, letterbox)?;
    let candidates_b = self.decoder.decode(raw_b, letterbox)?;
    let entries = self.ensemble(&candidates_a, &candidates_b);
    let shelf_life = self.estimate(&entries);

    Ok(FishReport {
      source_width: letterbox.src_width(),
      source_height: letterbox.src_height(),
      entries,
      shelf_life,
    })
  }

  pub fn ensemble(
    &self,
    candidates_a: &[Candidate],
    candidates_b: &[Candidate],
  ) -> Vec<EnsembleEntry> {
    let entries = self
      .ensembler
      .ensemble(candidates_a, candidates_b, &self.vocabulary);
    debug!("融合得到 {} 个部位", entries.len());
    entries
  }

  pub fn estimate(&self, entries: &[EnsembleEntry]) -> ShelfLifeReport {
    let report = self
      .estimator
      .estimate(entries, &self.vocabulary, self.config.parts.len());
    info!("货架期估计: {} ({:?})", report.summary(), report.source);
    report
  }

  /// 显式释放上下文
  pub fn close(self) {
    info!("关闭推理上下文");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{model::BOX_ATTRIBUTES, shelf_life::EstimateSource};

  fn context() -> InferenceContext {
    InferenceContext::builder()
      .labels(LabelVocabulary::from_names(["eye_fresh", "skin_texture_spoiled"]))
      .build()
      .unwrap()
  }

  #[test]
  fn test_missing_labels() {
    assert!(matches!(
      InferenceContext::builder().build(),
      Err(ContextError::MissingLabels)
    ));
    assert!(matches!(
      InferenceContext::builder().labels_path("/nonexistent/labels.txt").build(),
      Err(ContextError::Label(_))
    ));
  }

  #[test]
  fn test_invalid_config_rejected() {
    let config = PipelineConfig {
      max_per_part: 0,
      ..PipelineConfig::default()
    };
    assert!(matches!(
      InferenceContext::builder()
        .labels(LabelVocabulary::from_names(["eye_fresh"]))
        .config(config)
        .build(),
      Err(ContextError::Config(_))
    ));
  }

  #[test]
  fn test_bad_tree_model_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, "{ not json").unwrap();
    let context = InferenceContext::builder()
      .labels(LabelVocabulary::from_names(["eye_fresh"]))
      .tree_model_path(&path)
      .build()
      .unwrap();
    assert!(!context.trees().has_trees());
    context.close();
  }

  #[test]
  fn test_engine_input_size_must_match_canvas() {
    let context = context();
    assert!(context.check_input_size("A", None).is_ok());
    assert!(context.check_input_size("A", Some(640)).is_ok());
    assert!(matches!(
      context.check_input_size("B", Some(320)),
      Err(ContextError::InputSizeMismatch {
        stage: "B",
        expected: 640,
        actual: 320
      })
    ));
  }

  #[test]
  fn test_process_empty_outputs() {
    let context = context();
    let letterbox = Letterbox::new(640, 480, 640).unwrap();
    let raw = RawDetectionTensor::new(BOX_ATTRIBUTES + 2, 3, vec![0.0; 18]).unwrap();
    let report = context.process(&letterbox, &raw, &raw).unwrap();
    assert!(report.entries.is_empty());
    assert_eq!(report.shelf_life.source, EstimateSource::Fallback);
    assert_eq!(report.shelf_life.hours(), 8);
    assert_eq!((report.source_width, report.source_height), (640, 480));
  }

  #[test]
  fn test_process_rejects_wrong_class_count() {
    let context = context();
    let letterbox = Letterbox::new(640, 480, 640).unwrap();
    let good = RawDetectionTensor::new(BOX_ATTRIBUTES + 2, 1, vec![0.0; 6]).unwrap();
    let bad = RawDetectionTensor::new(BOX_ATTRIBUTES + 3, 1, vec![0.0; 7]).unwrap();
    assert!(matches!(
      context.process(&letterbox, &good, &bad),
      Err(DecodeError::ClassCountMismatch { .. })
    ));
  }
}
