// 该文件是 Yolonet 项目的一部分。
// src/letterbox.rs - Letterbox 缩放填充与坐标还原
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

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;

use crate::{
  detection::{Candidate, ImageSpace, NetworkSpace},
  geometry::BBox,
};

/// 填充颜色（中灰）
pub const LETTERBOX_COLOR: [u8; 3] = [114, 114, 114];
const PAD_BIAS: f32 = 0.1;

#[derive(Error, Debug, PartialEq)]
pub enum LetterboxError {
  #[error("无效的原始尺寸: {0}x{1}")]
  InvalidSource(u32, u32),
  #[error("无效的网络输入尺寸: {0}x{1}")]
  InvalidTarget(u32, u32),
}

/// 原始图像到网络输入的映射，每帧重新计算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
  /// 网络空间到原始空间的缩放（1 / ratio）
  pub scale: f32,
  /// 左侧填充像素
  pub pad_x: f32,
  /// 上方填充像素
  pub pad_y: f32,
  /// 原始宽度
  pub width: u32,
  /// 原始高度
  pub height: u32,
}

/// 一次 letterbox 的完整几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxPlan {
  pub scaled_width: u32,
  pub scaled_height: u32,
  pub left: u32,
  pub right: u32,
  pub top: u32,
  pub bottom: u32,
  pub info: LetterboxInfo,
}

fn split_padding(total: u32) -> (u32, u32) {
  let half = total as f32 / 2.0;
  let before = ((half - PAD_BIAS).round().max(0.0) as u32).min(total);
  (before, total - before)
}

impl LetterboxPlan {
  pub fn new(
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, LetterboxError> {
    if width == 0 || height == 0 {
      return Err(LetterboxError::InvalidSource(width, height));
    }
    if target_width == 0 || target_height == 0 {
      return Err(LetterboxError::InvalidTarget(target_width, target_height));
    }

    let ratio =
      (target_height as f32 / height as f32).min(target_width as f32 / width as f32);
    let scaled_width = ((width as f32 * ratio).round() as u32).clamp(1, target_width);
    let scaled_height = ((height as f32 * ratio).round() as u32).clamp(1, target_height);

    let (left, right) = split_padding(target_width - scaled_width);
    let (top, bottom) = split_padding(target_height - scaled_height);

    Ok(Self {
      scaled_width,
      scaled_height,
      left,
      right,
      top,
      bottom,
      info: LetterboxInfo {
        scale: 1.0 / ratio,
        pad_x: left as f32,
        pad_y: top as f32,
        width,
        height,
      },
    })
  }
}

/// 缩放并填充到网络输入尺寸
pub fn letterbox(
  image: &RgbImage,
  target_width: u32,
  target_height: u32,
) -> Result<(RgbImage, LetterboxInfo), LetterboxError> {
  let plan = LetterboxPlan::new(image.width(), image.height(), target_width, target_height)?;

  let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb(LETTERBOX_COLOR));
  if plan.scaled_width == image.width() && plan.scaled_height == image.height() {
    imageops::replace(&mut canvas, image, plan.left as i64, plan.top as i64);
  } else {
    let resized = imageops::resize(
      image,
      plan.scaled_width,
      plan.scaled_height,
      imageops::FilterType::Triangle,
    );
    imageops::replace(&mut canvas, &resized, plan.left as i64, plan.top as i64);
  }

  Ok((canvas, plan.info))
}

/// RGB 交错图像转为 NCHW 浮点张量，像素值归一化到 [0, 1]
pub fn to_nchw(image: &RgbImage) -> Vec<f32> {
  let (width, height) = image.dimensions();
  let plane = width as usize * height as usize;
  let mut data = vec![0f32; plane * 3];
  for (x, y, pixel) in image.enumerate_pixels() {
    let idx = y as usize * width as usize + x as usize;
    for c in 0..3 {
      data[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }
  data
}

impl LetterboxInfo {
  /// 网络空间坐标还原到原始图像并截断到图像范围
  pub fn restore_bbox(&self, bbox: BBox) -> BBox {
    BBox::new(
      (bbox.left - self.pad_x) * self.scale,
      (bbox.top - self.pad_y) * self.scale,
      (bbox.right - self.pad_x) * self.scale,
      (bbox.bottom - self.pad_y) * self.scale,
    )
    .normalized()
    .clamp_to(self.width as f32, self.height as f32)
  }

  /// 原始图像坐标映射到网络空间
  pub fn project_bbox(&self, bbox: BBox) -> BBox {
    BBox::new(
      bbox.left / self.scale + self.pad_x,
      bbox.top / self.scale + self.pad_y,
      bbox.right / self.scale + self.pad_x,
      bbox.bottom / self.scale + self.pad_y,
    )
  }

  /// 候选框只能从网络空间还原一次
  pub fn restore(&self, candidate: Candidate<NetworkSpace>) -> Candidate<ImageSpace> {
    let bbox = self.restore_bbox(candidate.bbox);
    candidate.with_bbox(bbox)
  }

  pub fn restore_all(&self, candidates: Vec<Candidate<NetworkSpace>>) -> Vec<Candidate<ImageSpace>> {
    candidates.into_iter().map(|c| self.restore(c)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn square_input_needs_no_padding() {
    let plan = LetterboxPlan::new(640, 640, 640, 640).unwrap();
    assert_eq!((plan.left, plan.right, plan.top, plan.bottom), (0, 0, 0, 0));
    assert_eq!(plan.info.scale, 1.0);
  }

  #[test]
  fn wide_input_pads_vertically() {
    let plan = LetterboxPlan::new(1280, 720, 640, 640).unwrap();
    assert_eq!((plan.scaled_width, plan.scaled_height), (640, 360));
    assert_eq!((plan.top, plan.bottom), (140, 140));
    assert_eq!((plan.left, plan.right), (0, 0));
    assert!((plan.info.scale - 2.0).abs() < 1e-6);
    assert_eq!(plan.info.pad_y, 140.0);
  }

  #[test]
  fn odd_padding_differs_by_one() {
    let plan = LetterboxPlan::new(640, 641, 640, 640).unwrap();
    assert_eq!(plan.scaled_height, 640);
    assert_eq!(plan.scaled_width, 639);
    assert_eq!((plan.left, plan.right), (0, 1));

    let plan = LetterboxPlan::new(100, 97, 100, 100).unwrap();
    assert_eq!(plan.top + plan.bottom + plan.scaled_height, 100);
    assert!(plan.bottom - plan.top <= 1);
  }

  #[test]
  fn plan_is_deterministic() {
    let a = LetterboxPlan::new(1920, 1080, 640, 640).unwrap();
    let b = LetterboxPlan::new(1920, 1080, 640, 640).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn rejects_zero_sizes() {
    assert_eq!(
      LetterboxPlan::new(0, 10, 640, 640),
      Err(LetterboxError::InvalidSource(0, 10))
    );
    assert_eq!(
      LetterboxPlan::new(10, 10, 640, 0),
      Err(LetterboxError::InvalidTarget(640, 0))
    );
  }

  #[test]
  fn round_trip_within_one_pixel() {
    let sizes = [(1280, 720), (720, 1280), (641, 640), (333, 517), (1920, 1080)];
    for (w, h) in sizes {
      let info = LetterboxPlan::new(w, h, 640, 640).unwrap().info;
      let original = BBox::new(
        w as f32 * 0.13,
        h as f32 * 0.27,
        w as f32 * 0.71,
        h as f32 * 0.9,
      );
      let back = info.restore_bbox(info.project_bbox(original));
      for (a, b) in original.to_array().iter().zip(back.to_array()) {
        assert!((a - b).abs() <= 1.0, "{w}x{h}: {a} vs {b}");
      }
    }
  }

  #[test]
  fn restore_clamps_to_image() {
    let info = LetterboxPlan::new(1280, 720, 640, 640).unwrap().info;
    let b = info.restore_bbox(BBox::new(-10.0, 100.0, 700.0, 560.0));
    assert_eq!(b, BBox::new(0.0, 0.0, 1280.0, 720.0));
  }

  #[test]
  fn restore_orders_corners() {
    let info = LetterboxPlan::new(1280, 720, 640, 640).unwrap().info;
    let b = info.restore_bbox(BBox::new(110.0, 250.0, 90.0, 230.0));
    assert_eq!(b, BBox::new(180.0, 180.0, 220.0, 220.0));
  }

  #[test]
  fn letterbox_fills_border_with_gray() {
    let image = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
    let (out, info) = letterbox(&image, 64, 64).unwrap();
    assert_eq!(out.dimensions(), (64, 64));
    assert_eq!(info.pad_y, 16.0);
    assert_eq!(out.get_pixel(32, 0).0, LETTERBOX_COLOR);
    assert_eq!(out.get_pixel(32, 63).0, LETTERBOX_COLOR);
    let center = out.get_pixel(32, 32).0;
    assert!(center[0] > 250 && center[1] < 5 && center[2] < 5);
  }

  #[test]
  fn nchw_layout_is_planar() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([255, 0, 51]));
    image.put_pixel(1, 0, Rgb([0, 255, 0]));
    let data = to_nchw(&image);
    assert_eq!(data.len(), 6);
    assert_eq!(data[0], 1.0);
    assert_eq!(data[1], 0.0);
    assert_eq!(data[3], 1.0);
    assert!((data[4] - 0.2).abs() < 1e-6);
  }
}
