// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/ensemble.rs - 双模型检测结果融合
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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  config::DEFAULT_MAX_PER_PART,
  geometry::BBox,
  labels::LabelVocabulary,
  model::{Candidate, non_max_suppression},
};

pub const DEFAULT_ENSEMBLE_IOU_THRESHOLD: f32 = 0.4;
/// 未显式给出阈值的其他部位
pub const DEFAULT_PART_THRESHOLD: f32 = 0.6;
/// 部位及其置信度阈值，顺序即输出顺序
pub const DEFAULT_PARTS: [(&str, f32); 4] = [
  ("eye", 0.3),
  ("caudal_fin", 0.3),
  ("pectoral_fin", 0.3),
  ("skin_texture", 0.7),
];

/// 鱼体部位及其置信度阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPartSpec")]
pub struct PartSpec {
  pub name: String,
  pub threshold: f32,
}

#[derive(Deserialize)]
struct RawPartSpec {
  name: String,
  threshold: Option<f32>,
}

impl From<RawPartSpec> for PartSpec {
  fn from(raw: RawPartSpec) -> Self {
    match raw.threshold {
      Some(threshold) => PartSpec::new(raw.name, threshold),
      None => PartSpec::named(raw.name),
    }
  }
}

impl PartSpec {
  pub fn new(name: impl Into<String>, threshold: f32) -> Self {
    Self {
      name: name.into(),
      threshold,
    }
  }

  /// 使用该部位的默认阈值
  pub fn named(name: impl Into<String>) -> Self {
    let name = name.into();
    let threshold = DEFAULT_PARTS
      .iter()
      .find(|(part, _)| *part == name)
      .map(|&(_, threshold)| threshold)
      .unwrap_or(DEFAULT_PART_THRESHOLD);
    Self { name, threshold }
  }
}

pub fn default_parts() -> Vec<PartSpec> {
  DEFAULT_PARTS
    .iter()
    .map(|&(name, threshold)| PartSpec::new(name, threshold))
    .collect()
}

/// 融合结果中的一项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleEntry {
  pub part: String,
  pub class_id: usize,
  pub score: f32,
  pub bbox: BBox,
  pub label: String,
}

/// `"<标签名> <置信度百分比取整>%"`
pub fn display_label(name: &str, score: f32) -> String {
  format!("{} {}%", name, (score * 100.0) as i32)
}

#[derive(Debug, Clone)]
pub struct Ensembler {
  parts: Vec<PartSpec>,
  iou_threshold: f32,
  max_per_part: usize,
}

impl Default for Ensembler {
  fn default() -> Self {
    Self::new(default_parts())
  }
}

impl Ensembler {
  pub fn new(parts: Vec<PartSpec>) -> Self {
    Self {
      parts,
      iou_threshold: DEFAULT_ENSEMBLE_IOU_THRESHOLD,
      max_per_part: DEFAULT_MAX_PER_PART,
    }
  }

  pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn with_max_per_part(mut self, max_per_part: usize) -> Self {
    self.max_per_part = max_per_part;
    self
  }

  pub fn parts(&self) -> &[PartSpec] {
    &self.parts
  }

  /// 按部位顺序输出，每个部位最多 `max_per_part` 项；没有合格候选的部位不输出
  pub fn ensemble(
    &self,
    candidates_a: &[Candidate],
    candidates_b: &[Candidate],
    vocabulary: &LabelVocabulary,
  ) -> Vec<EnsembleEntry> {
    let mut entries = Vec::new();

    for part in &self.parts {
      let class_ids = vocabulary.class_ids_for_part(&part.name);
      let pooled: Vec<Candidate> = candidates_a
        .iter()
        .chain(candidates_b)
        .filter(|c| class_ids.contains(&c.class_id) && c.score >= part.threshold)
        .cloned()
        .collect();

      if pooled.is_empty() {
        debug!("部位 {} 没有合格的候选框", part.name);
        continue;
      }

      let pooled_len = pooled.len();
      let survivors = non_max_suppression(pooled, self.iou_threshold);
      debug!(
        "部位 {}: {} 个候选框, NMS 后剩余 {}",
        part.name,
        pooled_len,
        survivors.len()
      );

      for candidate in survivors.into_iter().take(self.max_per_part) {
        let label = display_label(&vocabulary.display_name(candidate.class_id), candidate.score);
        entries.push(EnsembleEntry {
          part: part.name.clone(),
          class_id: candidate.class_id,
          score: candidate.score,
          bbox: candidate.bbox,
          label,
        });
      }
    }

    entries
  }
}

/// 使用默认部位上限（每个部位 1 项）的融合
pub fn ensemble(
  candidates_a: &[Candidate],
  candidates_b: &[Candidate],
  vocabulary: &LabelVocabulary,
  parts: &[PartSpec],
  iou_threshold: f32,
) -> Vec<EnsembleEntry> {
  Ensembler::new(parts.to_vec())
    .with_iou_threshold(iou_threshold)
    .ensemble(candidates_a, candidates_b, vocabulary)
}
