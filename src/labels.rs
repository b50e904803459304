// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/labels.rs - 类别标签表
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

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("标签文件为空: {0}")]
  Empty(String),
}

/// 按类别索引排列的标签名，构造后不可变
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelVocabulary {
  names: Box<[String]>,
}

impl LabelVocabulary {
  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 每行一个标签，行号即类别索引。去除首尾空白；
  /// 中间的空行保留为空名以维持索引，只丢弃文件末尾的空行
  pub fn parse(text: &str) -> Self {
    let mut names: Vec<&str> = text.lines().map(str::trim).collect();
    while names.last().is_some_and(|name| name.is_empty()) {
      names.pop();
    }
    Self::from_names(names)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
      path: path.display().to_string(),
      source,
    })?;
    let vocabulary = Self::parse(&text);
    if vocabulary.is_empty() {
      return Err(LabelError::Empty(path.display().to_string()));
    }
    info!("加载了 {} 个类别标签: {}", vocabulary.len(), path.display());
    Ok(vocabulary)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  /// 越界或空名的类别显示为 `Class <id>`
  pub fn display_name(&self, class_id: usize) -> String {
    match self.get(class_id) {
      Some(name) if !name.is_empty() => name.to_string(),
      _ => format!("Class {}", class_id),
    }
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.names.iter().position(|n| n == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }

  /// 属于某个部位的类别：小写标签以 `_<part>` 结尾或包含 `<part>`
  pub fn class_ids_for_part(&self, part: &str) -> Vec<usize> {
    let part = part.to_lowercase();
    let suffix = format!("_{}", part);
    self
      .names
      .iter()
      .enumerate()
      .filter(|(_, name)| !name.is_empty())
      .filter(|(_, name)| {
        let name = name.to_lowercase();
        name.ends_with(&suffix) || name.contains(&part)
      })
      .map(|(idx, _)| idx)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fish_labels() -> LabelVocabulary {
    LabelVocabulary::parse(
      "eye_fresh\n Eye_Spoiled \n\ncaudal_fin_fresh\npectoral_fin_less_fresh\nskin_texture_very_fresh\nfresh_Gill\n",
    )
  }

  #[test]
  fn test_parse_keeps_blank_line_positions() {
    let labels = fish_labels();
    assert_eq!(labels.len(), 7);
    assert_eq!(labels.get(1), Some("Eye_Spoiled"));
    assert_eq!(labels.get(2), Some(""));
    assert_eq!(labels.get(3), Some("caudal_fin_fresh"));
    assert_eq!(labels.display_name(2), "Class 2");
  }

  #[test]
  fn test_parse_drops_only_trailing_blank_lines() {
    let labels = LabelVocabulary::parse("eye_fresh\n\nskin_texture_spoiled\n\n  \n");
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.get(2), Some("skin_texture_spoiled"));
    assert_eq!(labels.position("skin_texture_spoiled"), Some(2));
  }

  #[test]
  fn test_display_name_out_of_range() {
    let labels = fish_labels();
    assert_eq!(labels.display_name(0), "eye_fresh");
    assert_eq!(labels.display_name(42), "Class 42");
  }

  #[test]
  fn test_part_matching_case_insensitive() {
    let labels = fish_labels();
    assert_eq!(labels.class_ids_for_part("eye"), vec![0, 1]);
    assert_eq!(labels.class_ids_for_part("CAUDAL_FIN"), vec![3]);
    assert_eq!(labels.class_ids_for_part("gill"), vec![6]);
    assert!(labels.class_ids_for_part("tail").is_empty());
  }

  #[test]
  fn test_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      LabelVocabulary::load(dir.path().join("missing.txt")),
      Err(LabelError::Io { .. })
    ));

    let empty = dir.path().join("empty.txt");
    std::fs::write(&empty, "\n  \n").unwrap();
    assert!(matches!(LabelVocabulary::load(&empty), Err(LabelError::Empty(_))));

    let ok = dir.path().join("labels.txt");
    std::fs::write(&ok, "eye_fresh\nskin_texture_spoiled\n").unwrap();
    assert_eq!(LabelVocabulary::load(&ok).unwrap().position("skin_texture_spoiled"), Some(1));
  }
}
