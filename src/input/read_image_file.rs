// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/input/read_image_file.rs - 图像文件与图像目录输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: 期望 {expected}, 实际 {actual}")]
  SchemaMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(image::ImageError),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

fn check_scheme(url: &Url, expected: &'static str) -> Result<(), ImageFileInputError> {
  if url.scheme() != expected {
    error!("URI 方案不匹配: 期望 '{}', 实际 '{}'", expected, url.scheme());
    return Err(ImageFileInputError::SchemaMismatch {
      expected,
      actual: url.scheme().to_string(),
    });
  }
  Ok(())
}

fn read_rgb(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  Ok(ImageReader::open(path)?.decode()?.into_rgb8())
}

/// 单张图像：`image:///path/to/fish.jpg`
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let image = read_rgb(Path::new(url.path()))?;
    debug!("读取图像 {}: {}x{}", url.path(), image.width(), image.height());
    Ok(ImageFileInput { image: Some(image) })
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 目录中的全部图像，按文件名排序：`folder:///path/to/dir`
pub struct ImageFolderInput {
  paths: std::vec::IntoIter<PathBuf>,
}

impl ImageFolderInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let directory = directory.as_ref();
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
      if path.is_file() && is_image {
        paths.push(path);
      }
    }
    paths.sort();
    info!("目录 {} 中有 {} 张图像", directory.display(), paths.len());
    Ok(Self {
      paths: paths.into_iter(),
    })
  }
}

impl FromUrl for ImageFolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    Self::open(url.path())
  }
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl Iterator for ImageFolderInput {
  type Item = RgbImage;

  /// 无法解码的文件记录错误后跳过
  fn next(&mut self) -> Option<Self::Item> {
    for path in self.paths.by_ref() {
      match read_rgb(&path) {
        Ok(image) => return Some(image),
        Err(e) => error!("跳过图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn test_folder_sorted_and_skips_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(4, 2, Rgb([1, 2, 3]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbImage::from_pixel(3, 3, Rgb([9, 9, 9]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("c.jpg"), b"not an image").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let sizes: Vec<_> = ImageFolderInput::from_url(&url)
      .unwrap()
      .map(|image| image.dimensions())
      .collect();
    assert_eq!(sizes, vec![(3, 3), (4, 2)]);
  }

  #[test]
  fn test_single_image_yields_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fish.png");
    RgbImage::from_pixel(5, 5, Rgb([7, 7, 7])).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.next().map(|i| i.dimensions()), Some((5, 5)));
    assert!(input.next().is_none());
  }

  #[test]
  fn test_scheme_mismatch() {
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch { .. })
    ));
  }
}
