// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录标注图像与结果
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  pipeline::FishReport,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制配置错误: {0}")]
  DrawError(#[from] DrawError),
}

/// 与图像同名的 JSON 记录
#[derive(Serialize)]
struct Record<'a> {
  timestamp: String,
  summary: String,
  note: Option<&'static str>,
  #[serde(flatten)]
  report: &'a FishReport,
}

/// `folder:///path/to/records[?always][&font=...]`，
/// 写出 `YYYY/MM/DD/HH-MM-SS-NNNN.png` 与同名 `.json`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::from_url_query(uri)?,
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: Draw, always: bool) -> Self {
    Self {
      directory: directory.into(),
      draw,
      frame_counter: AtomicU16::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save_record(&self, path: &Path, report: &FishReport) -> Result<(), DirectoryRecordOutputError> {
    let record = Record {
      timestamp: Utc::now().to_rfc3339(),
      summary: report.shelf_life.summary(),
      note: report.shelf_life.note(),
      report,
    };
    std::fs::write(path.with_extension("json"), serde_json::to_string_pretty(&record)?)?;
    Ok(())
  }
}

impl Render<RgbImage, FishReport> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &FishReport) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    let mut image = frame.clone();
    self.draw.draw_report(&mut image, result);
    image.save(&path)?;
    self.save_record(&path, result)?;
    info!("记录结果到: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    ensemble::EnsembleEntry,
    geometry::BBox,
    shelf_life::{EstimateSource, ShelfLifeReport},
  };

  fn report(entries: Vec<EnsembleEntry>) -> FishReport {
    FishReport {
      source_width: 32,
      source_height: 32,
      shelf_life: ShelfLifeReport {
        minutes: 18 * 60,
        source: EstimateSource::Fallback,
        detected_parts: entries.len(),
        requested_parts: 4,
      },
      entries,
    }
  }

  fn find_files(dir: &Path, ext: &str, out: &mut Vec<PathBuf>) {
    for entry in std::fs::read_dir(dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        find_files(&path, ext, out);
      } else if path.extension().is_some_and(|e| e == ext) {
        out.push(path);
      }
    }
  }

  #[test]
  fn test_writes_image_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), Draw::default(), false);
    let image = RgbImage::new(32, 32);

    output.render_result(&image, &report(Vec::new())).unwrap();
    let mut files = Vec::new();
    find_files(dir.path(), "json", &mut files);
    assert!(files.is_empty());

    let entry = EnsembleEntry {
      part: "eye".to_string(),
      class_id: 0,
      score: 0.6,
      bbox: BBox::new(4.0, 4.0, 20.0, 20.0),
      label: "eye_fresh 60%".to_string(),
    };
    output.render_result(&image, &report(vec![entry])).unwrap();
    find_files(dir.path(), "json", &mut files);
    assert_eq!(files.len(), 1);
    assert!(files[0].with_extension("png").exists());

    let record: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(record["summary"], "18 hours remaining");
    assert_eq!(record["entries"][0]["label"], "eye_fresh 60%");
    assert_eq!(record["shelf_life"]["source"], "fallback");
    assert!(record["note"].is_string());
  }
}
