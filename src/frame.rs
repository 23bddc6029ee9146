// 该文件是 Yolonet 项目的一部分。
// src/frame.rs - 图像帧定义
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

use std::{fmt, str::FromStr};

use image::{ImageBuffer, Rgb, Rgb32FImage, RgbImage, Rgba32FImage, RgbaImage};
use thiserror::Error;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
  Rgb8,
  Rgba8,
  Rgb32F,
  Rgba32F,
  Bgr8,
  Bgra8,
  Bgr32F,
  Bgra32F,
  Gray8,
  Gray32F,
  Yuyv,
  Nv12,
  I420,
}

/// 检测流程接受的像素格式
pub const SUPPORTED_FORMATS: [PixelFormat; 4] = [
  PixelFormat::Rgb8,
  PixelFormat::Rgba8,
  PixelFormat::Rgb32F,
  PixelFormat::Rgba32F,
];

impl PixelFormat {
  pub fn is_rgb(&self) -> bool {
    SUPPORTED_FORMATS.contains(self)
  }

  pub fn is_float(&self) -> bool {
    matches!(
      self,
      PixelFormat::Rgb32F
        | PixelFormat::Rgba32F
        | PixelFormat::Bgr32F
        | PixelFormat::Bgra32F
        | PixelFormat::Gray32F
    )
  }

  /// 交错格式每像素的通道数，平面 YUV 格式返回 None
  pub fn channels(&self) -> Option<usize> {
    match self {
      PixelFormat::Rgb8 | PixelFormat::Rgb32F | PixelFormat::Bgr8 | PixelFormat::Bgr32F => Some(3),
      PixelFormat::Rgba8
      | PixelFormat::Rgba32F
      | PixelFormat::Bgra8
      | PixelFormat::Bgra32F => Some(4),
      PixelFormat::Gray8 | PixelFormat::Gray32F => Some(1),
      PixelFormat::Yuyv => Some(2),
      PixelFormat::Nv12 | PixelFormat::I420 => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      PixelFormat::Rgb8 => "rgb8",
      PixelFormat::Rgba8 => "rgba8",
      PixelFormat::Rgb32F => "rgb32f",
      PixelFormat::Rgba32F => "rgba32f",
      PixelFormat::Bgr8 => "bgr8",
      PixelFormat::Bgra8 => "bgra8",
      PixelFormat::Bgr32F => "bgr32f",
      PixelFormat::Bgra32F => "bgra32f",
      PixelFormat::Gray8 => "gray8",
      PixelFormat::Gray32F => "gray32f",
      PixelFormat::Yuyv => "yuyv",
      PixelFormat::Nv12 => "nv12",
      PixelFormat::I420 => "i420",
    }
  }
}

impl fmt::Display for PixelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PixelFormat {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let all = [
      PixelFormat::Rgb8,
      PixelFormat::Rgba8,
      PixelFormat::Rgb32F,
      PixelFormat::Rgba32F,
      PixelFormat::Bgr8,
      PixelFormat::Bgra8,
      PixelFormat::Bgr32F,
      PixelFormat::Bgra32F,
      PixelFormat::Gray8,
      PixelFormat::Gray32F,
      PixelFormat::Yuyv,
      PixelFormat::Nv12,
      PixelFormat::I420,
    ];
    let lower = s.trim().to_ascii_lowercase();
    all
      .into_iter()
      .find(|f| f.as_str() == lower)
      .ok_or_else(|| FrameError::UnknownFormat(s.to_string()))
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
  #[error("图像缓冲区为空")]
  Empty,
  #[error("图像尺寸无效: {0}x{1}")]
  ZeroDimension(u32, u32),
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(PixelFormat),
  #[error("未知的像素格式: {0}")]
  UnknownFormat(String),
  #[error("像素格式 {0} 与缓冲区元素类型不匹配")]
  ElementTypeMismatch(PixelFormat),
  #[error("缓冲区长度不足: 期望 {expected}, 实际 {actual}")]
  BufferTooSmall { expected: usize, actual: usize },
  #[error("帧尺寸或格式不一致: {0}")]
  Mismatch(String),
}

#[derive(Debug, Clone, Copy)]
pub enum PixelData<'a> {
  U8(&'a [u8]),
  F32(&'a [f32]),
}

#[derive(Debug)]
pub enum PixelDataMut<'a> {
  U8(&'a mut [u8]),
  F32(&'a mut [f32]),
}

impl PixelData<'_> {
  pub fn len(&self) -> usize {
    match self {
      PixelData::U8(d) => d.len(),
      PixelData::F32(d) => d.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn is_float(&self) -> bool {
    matches!(self, PixelData::F32(_))
  }
}

/// 只读图像帧（交错存储）
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
  pub data: PixelData<'a>,
  pub width: u32,
  pub height: u32,
  pub format: PixelFormat,
}

/// 可写图像帧，叠加绘制直接在其上进行
#[derive(Debug)]
pub struct FrameMut<'a> {
  pub data: PixelDataMut<'a>,
  pub width: u32,
  pub height: u32,
  pub format: PixelFormat,
}

fn check_frame(
  data: PixelData<'_>,
  width: u32,
  height: u32,
  format: PixelFormat,
) -> Result<usize, FrameError> {
  if data.is_empty() {
    return Err(FrameError::Empty);
  }
  if width == 0 || height == 0 {
    return Err(FrameError::ZeroDimension(width, height));
  }
  if !format.is_rgb() {
    return Err(FrameError::UnsupportedFormat(format));
  }
  if data.is_float() != format.is_float() {
    return Err(FrameError::ElementTypeMismatch(format));
  }

  // RGB 系列格式总有通道数
  let channels = format.channels().unwrap_or(3);
  let expected = width as usize * height as usize * channels;
  if data.len() < expected {
    return Err(FrameError::BufferTooSmall {
      expected,
      actual: data.len(),
    });
  }
  Ok(channels)
}

impl<'a> Frame<'a> {
  pub fn new(data: PixelData<'a>, width: u32, height: u32, format: PixelFormat) -> Self {
    Self {
      data,
      width,
      height,
      format,
    }
  }

  /// 校验缓冲区、尺寸与格式，返回每像素通道数
  pub fn validate(&self) -> Result<usize, FrameError> {
    check_frame(self.data, self.width, self.height, self.format)
  }

  /// 读取 (x, y) 处的 RGB 值，浮点格式按 0-255 取值范围截断
  pub fn rgb_at(&self, x: u32, y: u32, channels: usize) -> [u8; 3] {
    let idx = (y as usize * self.width as usize + x as usize) * channels;
    match self.data {
      PixelData::U8(d) => [d[idx], d[idx + 1], d[idx + 2]],
      PixelData::F32(d) => [
        float_to_u8(d[idx]),
        float_to_u8(d[idx + 1]),
        float_to_u8(d[idx + 2]),
      ],
    }
  }

  /// 转换为 RGB8 图像，供预处理使用
  pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
    let channels = self.validate()?;
    Ok(ImageBuffer::from_fn(self.width, self.height, |x, y| {
      Rgb(self.rgb_at(x, y, channels))
    }))
  }
}

impl<'a> FrameMut<'a> {
  pub fn new(data: PixelDataMut<'a>, width: u32, height: u32, format: PixelFormat) -> Self {
    Self {
      data,
      width,
      height,
      format,
    }
  }

  pub fn as_frame(&self) -> Frame<'_> {
    let data = match &self.data {
      PixelDataMut::U8(d) => PixelData::U8(d),
      PixelDataMut::F32(d) => PixelData::F32(d),
    };
    Frame::new(data, self.width, self.height, self.format)
  }

  pub fn validate(&self) -> Result<usize, FrameError> {
    self.as_frame().validate()
  }

  /// 从另一帧复制像素，两帧尺寸与格式必须一致
  pub fn copy_from(&mut self, src: &Frame<'_>) -> Result<(), FrameError> {
    let channels = src.validate()?;
    self.validate()?;
    if src.width != self.width || src.height != self.height || src.format != self.format {
      return Err(FrameError::Mismatch(format!(
        "{}x{} {} -> {}x{} {}",
        src.width, src.height, src.format, self.width, self.height, self.format
      )));
    }

    let len = self.width as usize * self.height as usize * channels;
    match (&mut self.data, src.data) {
      (PixelDataMut::U8(dst), PixelData::U8(s)) => dst[..len].copy_from_slice(&s[..len]),
      (PixelDataMut::F32(dst), PixelData::F32(s)) => dst[..len].copy_from_slice(&s[..len]),
      _ => return Err(FrameError::ElementTypeMismatch(self.format)),
    }
    Ok(())
  }

  /// 以 `alpha`（0-1）将颜色混合到 (x, y) 像素上，仅修改 RGB 通道
  pub(crate) fn blend(&mut self, x: u32, y: u32, channels: usize, color: [u8; 3], alpha: f32) {
    if x >= self.width || y >= self.height || alpha <= 0.0 {
      return;
    }
    let alpha = alpha.min(1.0);
    let idx = (y as usize * self.width as usize + x as usize) * channels;
    match &mut self.data {
      PixelDataMut::U8(d) => {
        for c in 0..3 {
          let bg = d[idx + c] as f32;
          d[idx + c] = (bg + (color[c] as f32 - bg) * alpha).round().clamp(0.0, 255.0) as u8;
        }
      }
      PixelDataMut::F32(d) => {
        for c in 0..3 {
          let bg = d[idx + c];
          d[idx + c] = bg + (color[c] as f32 - bg) * alpha;
        }
      }
    }
  }
}

fn float_to_u8(v: f32) -> u8 {
  v.round().clamp(0.0, 255.0) as u8
}

impl<'a> From<&'a RgbImage> for Frame<'a> {
  fn from(image: &'a RgbImage) -> Self {
    Frame::new(
      PixelData::U8(image.as_raw()),
      image.width(),
      image.height(),
      PixelFormat::Rgb8,
    )
  }
}

impl<'a> From<&'a mut RgbImage> for FrameMut<'a> {
  fn from(image: &'a mut RgbImage) -> Self {
    let (width, height) = image.dimensions();
    FrameMut::new(PixelDataMut::U8(image), width, height, PixelFormat::Rgb8)
  }
}

impl<'a> From<&'a mut RgbaImage> for FrameMut<'a> {
  fn from(image: &'a mut RgbaImage) -> Self {
    let (width, height) = image.dimensions();
    FrameMut::new(PixelDataMut::U8(image), width, height, PixelFormat::Rgba8)
  }
}

impl<'a> From<&'a mut Rgb32FImage> for FrameMut<'a> {
  fn from(image: &'a mut Rgb32FImage) -> Self {
    let (width, height) = image.dimensions();
    FrameMut::new(PixelDataMut::F32(image), width, height, PixelFormat::Rgb32F)
  }
}

impl<'a> From<&'a mut Rgba32FImage> for FrameMut<'a> {
  fn from(image: &'a mut Rgba32FImage) -> Self {
    let (width, height) = image.dimensions();
    FrameMut::new(PixelDataMut::F32(image), width, height, PixelFormat::Rgba32F)
  }
}
