// 该文件是 Yolonet 项目的一部分。
// src/input/read_image_file.rs - 读取图像文件
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
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

fn check_scheme(url: &Url, expected: &str) -> Result<(), ImageFileInputError> {
  if url.scheme() != expected {
    error!(
      "URI 方案不匹配: 期望 '{}', 实际 '{}'",
      expected,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
  }
  Ok(())
}

fn load_rgb(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  Ok(image.into_rgb8())
}

/// 单张图像，产出一帧
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let image = load_rgb(Path::new(url.path()))?;
    info!(
      "读取图像 {}: {}x{}",
      url.path(),
      image.width(),
      image.height()
    );
    Ok(ImageFileInput { image: Some(image) })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 目录下的全部图像，按文件名顺序产出；无法解码的文件跳过
pub struct FolderInput {
  paths: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let mut paths = std::fs::read_dir(url.path())?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file())
      .collect::<Vec<_>>();
    paths.sort();
    info!("目录 {} 中共有 {} 个文件", url.path(), paths.len());
    Ok(FolderInput {
      paths: paths.into_iter(),
    })
  }
}

impl Iterator for FolderInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.paths.by_ref() {
      match load_rgb(&path) {
        Ok(image) => return Some(image),
        Err(e) => warn!("跳过 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  fn url(scheme: &str, path: &Path) -> Url {
    Url::parse(&format!("{}://{}", scheme, path.display())).unwrap()
  }

  #[test]
  fn reads_single_image_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.png");
    RgbImage::from_pixel(3, 2, Rgb([1, 2, 3])).save(&path).unwrap();

    let mut input = ImageFileInput::from_url(&url("image", &path)).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.dimensions(), (3, 2));
    assert_eq!(frame.get_pixel(0, 0).0, [1, 2, 3]);
    assert!(input.next().is_none());
  }

  #[test]
  fn folder_in_name_order_skipping_garbage() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(2, 2).save(dir.path().join("b.png")).unwrap();
    RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("c.txt"), "not an image").unwrap();

    let input = FolderInput::from_url(&url("folder", dir.path())).unwrap();
    let sizes: Vec<_> = input.map(|f| f.dimensions()).collect();
    assert_eq!(sizes, vec![(4, 4), (2, 2)]);
  }

  #[test]
  fn scheme_is_checked() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      FolderInput::from_url(&url("image", dir.path())),
      Err(ImageFileInputError::SchemeMismatch(_))
    ));
  }
}
