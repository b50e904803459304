// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/shelf_life.rs - 货架期估计
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

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ensemble::EnsembleEntry, labels::LabelVocabulary, tree::TreeEnsemble};

pub const DEFAULT_VERY_FRESH_HOURS: u32 = 24;
pub const DEFAULT_FRESH_HOURS: u32 = 18;
pub const DEFAULT_LESS_FRESH_HOURS: u32 = 8;
pub const DEFAULT_SPOILED_HOURS: u32 = 0;
/// 没有检测到任何部位时的保守估计
pub const DEFAULT_UNDETECTED_HOURS: u32 = 8;

pub const PARTIAL_DETECTION_NOTE: &str =
  "Note: Some fish parts were not detected, so this prediction may be less accurate.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessCategory {
  VeryFresh,
  Fresh,
  LessFresh,
  Spoiled,
}

impl FreshnessCategory {
  /// 大小写不敏感的子串匹配，`-` 视作 `_`；
  /// 先查 very_fresh 与 less_fresh，避免被 fresh 截获
  pub fn from_label(label: &str) -> Self {
    let label = label.to_lowercase().replace('-', "_");
    if label.contains("very_fresh") {
      FreshnessCategory::VeryFresh
    } else if label.contains("less_fresh") {
      FreshnessCategory::LessFresh
    } else if label.contains("fresh") {
      FreshnessCategory::Fresh
    } else {
      FreshnessCategory::Spoiled
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      FreshnessCategory::VeryFresh => "very_fresh",
      FreshnessCategory::Fresh => "fresh",
      FreshnessCategory::LessFresh => "less_fresh",
      FreshnessCategory::Spoiled => "spoiled",
    }
  }

  /// 树模型特征取值
  pub fn ordinal(&self) -> f32 {
    match self {
      FreshnessCategory::Spoiled => 0.0,
      FreshnessCategory::LessFresh => 1.0,
      FreshnessCategory::Fresh => 2.0,
      FreshnessCategory::VeryFresh => 3.0,
    }
  }
}

impl fmt::Display for FreshnessCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 显示标签 `"eye_fresh 60%"` 只保留首个词
pub fn clean_label(label: &str) -> &str {
  label.split_whitespace().next().unwrap_or("")
}

/// 回退估计使用的类别 → 小时表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackDurations {
  pub very_fresh_hours: u32,
  pub fresh_hours: u32,
  pub less_fresh_hours: u32,
  pub spoiled_hours: u32,
  pub default_hours: u32,
}

impl Default for FallbackDurations {
  fn default() -> Self {
    Self {
      very_fresh_hours: DEFAULT_VERY_FRESH_HOURS,
      fresh_hours: DEFAULT_FRESH_HOURS,
      less_fresh_hours: DEFAULT_LESS_FRESH_HOURS,
      spoiled_hours: DEFAULT_SPOILED_HOURS,
      default_hours: DEFAULT_UNDETECTED_HOURS,
    }
  }
}

impl FallbackDurations {
  pub fn hours(&self, category: FreshnessCategory) -> u32 {
    match category {
      FreshnessCategory::VeryFresh => self.very_fresh_hours,
      FreshnessCategory::Fresh => self.fresh_hours,
      FreshnessCategory::LessFresh => self.less_fresh_hours,
      FreshnessCategory::Spoiled => self.spoiled_hours,
    }
  }

  /// 取各部位中最短的时长（分钟）；没有标签时使用默认时长
  pub fn estimate_minutes<S: AsRef<str>>(&self, labels: &[S]) -> u32 {
    let hours = labels
      .iter()
      .map(|label| self.hours(FreshnessCategory::from_label(clean_label(label.as_ref()))))
      .min()
      .unwrap_or(self.default_hours);
    hours.saturating_mul(60)
  }
}

/// `"<h> hour(s) remaining"`，h 为整小时数
pub fn format_shelf_life(minutes: u32) -> String {
  let hours = minutes / 60;
  let unit = if hours == 1 { "hour" } else { "hours" };
  format!("{} {} remaining", hours, unit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
  Trees,
  Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShelfLifeReport {
  pub minutes: u32,
  pub source: EstimateSource,
  pub detected_parts: usize,
  pub requested_parts: usize,
}

impl ShelfLifeReport {
  pub fn hours(&self) -> u32 {
    self.minutes / 60
  }

  /// 有部位未被检测到
  pub fn is_partial(&self) -> bool {
    self.detected_parts < self.requested_parts
  }

  pub fn summary(&self) -> String {
    format_shelf_life(self.minutes)
  }

  pub fn note(&self) -> Option<&'static str> {
    self.is_partial().then_some(PARTIAL_DETECTION_NOTE)
  }
}

impl fmt::Display for ShelfLifeReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.summary())?;
    if let Some(note) = self.note() {
      write!(f, "\n{}", note)?;
    }
    Ok(())
  }
}

/// 有树模型时用树预测，否则按类别查表
#[derive(Debug, Clone, Default)]
pub struct ShelfLifeEstimator {
  trees: TreeEnsemble,
  durations: FallbackDurations,
}

impl ShelfLifeEstimator {
  pub fn new(trees: TreeEnsemble, durations: FallbackDurations) -> Self {
    Self { trees, durations }
  }

  pub fn trees(&self) -> &TreeEnsemble {
    &self.trees
  }

  /// 特征向量：部位名特征取该部位的类别序数（未检测到为 NaN），
  /// 标签名特征取 1/0，超出命名范围的位置取对应类别下标的 1/0
  pub fn feature_vector(&self, entries: &[EnsembleEntry], vocabulary: &LabelVocabulary) -> Vec<f32> {
    let names = self.trees.feature_names();
    let len = names.len().max(vocabulary.len());
    let detected_class = |class_id: usize| {
      if entries.iter().any(|e| e.class_id == class_id) { 1.0 } else { 0.0 }
    };

    (0..len)
      .map(|idx| match names.get(idx) {
        Some(name) => {
          if let Some(entry) = entries.iter().find(|e| e.part == *name) {
            FreshnessCategory::from_label(clean_label(&entry.label)).ordinal()
          } else if let Some(class_id) = vocabulary.position(name) {
            detected_class(class_id)
          } else {
            f32::NAN
          }
        }
        None => detected_class(idx),
      })
      .collect()
  }

  pub fn estimate(
    &self,
    entries: &[EnsembleEntry],
    vocabulary: &LabelVocabulary,
    requested_parts: usize,
  ) -> ShelfLifeReport {
    let (minutes, source) = if self.trees.has_trees() {
      let features = self.feature_vector(entries, vocabulary);
      let hours = self.trees.predict(&features).max(0.0);
      debug!("树模型预测 {:.2} 小时", hours);
      ((hours * 60.0).round() as u32, EstimateSource::Trees)
    } else {
      let labels: Vec<&str> = entries.iter().map(|e| e.label.as_str()).collect();
      (self.durations.estimate_minutes(&labels), EstimateSource::Fallback)
    };

    ShelfLifeReport {
      minutes,
      source,
      detected_parts: entries.len(),
      requested_parts,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    geometry::BBox,
    tree::{ArrayTree, ArrayTreeFields, DecisionTree},
  };

  fn entry(part: &str, class_id: usize, label: &str) -> EnsembleEntry {
    EnsembleEntry {
      part: part.to_string(),
      class_id,
      score: 0.9,
      bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
      label: label.to_string(),
    }
  }

  #[test]
  fn test_category_from_label() {
    assert_eq!(FreshnessCategory::from_label("eye_Very-Fresh"), FreshnessCategory::VeryFresh);
    assert_eq!(FreshnessCategory::from_label("skin_less_fresh"), FreshnessCategory::LessFresh);
    assert_eq!(FreshnessCategory::from_label("gill_fresh"), FreshnessCategory::Fresh);
    assert_eq!(FreshnessCategory::from_label("eye_spoiled"), FreshnessCategory::Spoiled);
    assert_eq!(FreshnessCategory::from_label("mystery"), FreshnessCategory::Spoiled);
  }

  #[test]
  fn test_fallback_takes_minimum() {
    let durations = FallbackDurations::default();
    assert_eq!(
      durations.estimate_minutes(&["eye_fresh 80%", "skin_texture_spoiled 75%"]),
      0
    );
    assert_eq!(durations.estimate_minutes::<&str>(&[]), 8 * 60);
    assert_eq!(
      durations.estimate_minutes(&["eye_very_fresh 90%", "caudal_fin_very_fresh 50%"]),
      24 * 60
    );
    assert_eq!(
      durations.estimate_minutes(&["eye_fresh 90%", "caudal_fin_less_fresh 50%"]),
      8 * 60
    );
  }

  #[test]
  fn test_fallback_minutes_saturate() {
    let durations = FallbackDurations {
      very_fresh_hours: u32::MAX,
      default_hours: u32::MAX,
      ..FallbackDurations::default()
    };
    assert_eq!(durations.estimate_minutes(&["eye_very_fresh 90%"]), u32::MAX);
    assert_eq!(durations.estimate_minutes::<&str>(&[]), u32::MAX);
  }

  #[test]
  fn test_format_shelf_life() {
    assert_eq!(format_shelf_life(0), "0 hours remaining");
    assert_eq!(format_shelf_life(60), "1 hour remaining");
    assert_eq!(format_shelf_life(18 * 60 + 59), "18 hours remaining");
  }

  #[test]
  fn test_fallback_report() {
    let vocabulary = LabelVocabulary::from_names(["eye_fresh"]);
    let report = ShelfLifeEstimator::default().estimate(&[entry("eye", 0, "eye_fresh 60%")], &vocabulary, 4);
    assert_eq!(report.source, EstimateSource::Fallback);
    assert_eq!(report.hours(), 18);
    assert!(report.is_partial());
    assert_eq!(
      report.to_string(),
      format!("18 hours remaining\n{}", PARTIAL_DETECTION_NOTE)
    );
  }

  #[test]
  fn test_feature_vector() {
    let vocabulary =
      LabelVocabulary::from_names(["eye_fresh", "eye_spoiled", "skin_texture_fresh", "gill_fresh"]);
    let trees = TreeEnsemble::new(
      0.0,
      Vec::new(),
      vec!["eye".into(), "skin_texture".into(), "eye_spoiled".into()],
    );
    let estimator = ShelfLifeEstimator::new(trees, FallbackDurations::default());
    let features = estimator.feature_vector(&[entry("eye", 1, "eye_spoiled 55%")], &vocabulary);
    assert_eq!(features.len(), 4);
    assert_eq!(features[0], 0.0);
    assert!(features[1].is_nan());
    assert_eq!(features[2], 1.0);
    assert_eq!(features[3], 0.0);
  }

  #[test]
  fn test_tree_estimate_clamps_negative() {
    // f0 < 2.5 → 12 小时, 否则 -3 小时
    let tree = ArrayTree::new(ArrayTreeFields {
      left_children: vec![1, -1, -1],
      right_children: vec![2, -1, -1],
      split_indices: vec![0, 0, 0],
      split_conditions: vec![2.5, 0.0, 0.0],
      default_left: vec![true, false, false],
      is_leaf: vec![false, true, true],
      leaf_values: vec![12.0, -3.0],
    })
    .unwrap();
    let trees = TreeEnsemble::new(0.5, vec![DecisionTree::Array(tree)], vec!["eye".into()]);
    let estimator = ShelfLifeEstimator::new(trees, FallbackDurations::default());
    let vocabulary = LabelVocabulary::from_names(["eye_fresh", "eye_very_fresh"]);

    let report = estimator.estimate(&[entry("eye", 0, "eye_fresh 70%")], &vocabulary, 1);
    assert_eq!(report.source, EstimateSource::Trees);
    assert_eq!(report.minutes, 750);
    assert!(!report.is_partial());

    let report = estimator.estimate(&[entry("eye", 1, "eye_very_fresh 70%")], &vocabulary, 1);
    assert_eq!(report.minutes, 0);
    assert_eq!(report.summary(), "0 hours remaining");
  }
}
