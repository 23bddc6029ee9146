// 该文件是 Yolonet 项目的一部分。
// src/overlay.rs - 检测结果叠加绘制
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

use ab_glyph::{FontArc, PxScale};
use image::Rgb;
use imageproc::{
  drawing::{Canvas, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  classes::{ClassRegistry, DEFAULT_CLASS_ALPHA},
  detection::Detection,
  frame::{Frame, FrameError, FrameMut},
};

mod flags;
pub use self::flags::OverlayFlags;

const LINE_WIDTH: i32 = 2;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const TEXT_OFFSET: (f32, f32) = (5.0, 3.0);
/// 跟踪目标丢失超过该帧数后文字完全透明
const FADE_FRAMES: f32 = 15.0;
const FALLBACK_COLOR: [u8; 4] = [255, 255, 255, DEFAULT_CLASS_ALPHA];

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("叠加选项为空")]
  InvalidFlags,
  #[error("图像帧错误: {0}")]
  Frame(#[from] FrameError),
  #[error("无法读取字体 {path}: {source}")]
  FontIo {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 字号随图像宽度变化
pub fn adapt_font_size(width: u32) -> f32 {
  (width as f32 * 0.02).clamp(10.0, 32.0)
}

/// 文字内容：`<类别名> [跟踪 ID] [置信度%]`
pub fn label_text(detection: &Detection, classes: &ClassRegistry, flags: OverlayFlags) -> String {
  let mut parts = Vec::with_capacity(3);
  if flags.contains(OverlayFlags::LABEL) {
    parts.push(
      classes
        .description(detection.class_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("class #{}", detection.class_id)),
    );
  }
  if flags.contains(OverlayFlags::TRACKING) && detection.is_tracked() {
    parts.push(detection.track_id.to_string());
  }
  if flags.contains(OverlayFlags::CONFIDENCE) {
    parts.push(format!("{:.1}%", detection.confidence * 100.0));
  }
  parts.join(" ")
}

/// 跟踪目标丢失后文字逐渐淡出
pub fn text_alpha(detection: &Detection) -> f32 {
  if !detection.is_tracked() {
    return 1.0;
  }
  1.0 - (detection.track_lost.max(0) as f32).min(FADE_FRAMES) / FADE_FRAMES
}

/// 以固定透明度混合写入帧的画布
struct BlendCanvas<'f, 'a> {
  frame: &'f mut FrameMut<'a>,
  channels: usize,
  alpha: f32,
}

impl Canvas for BlendCanvas<'_, '_> {
  type Pixel = Rgb<u8>;

  fn dimensions(&self) -> (u32, u32) {
    (self.frame.width, self.frame.height)
  }

  fn get_pixel(&self, x: u32, y: u32) -> Self::Pixel {
    Rgb(self.frame.as_frame().rgb_at(x, y, self.channels))
  }

  fn draw_pixel(&mut self, x: u32, y: u32, color: Self::Pixel) {
    self.frame.blend(x, y, self.channels, color.0, self.alpha);
  }
}

/// 取整并截断到图像内，空框返回 None
fn pixel_box(detection: &Detection, width: u32, height: u32) -> Option<(i32, i32, i32, i32)> {
  let max_x = width as f32 - 1.0;
  let max_y = height as f32 - 1.0;
  let x0 = detection.left.round().clamp(0.0, max_x) as i32;
  let y0 = detection.top.round().clamp(0.0, max_y) as i32;
  let x1 = detection.right.round().clamp(0.0, max_x) as i32;
  let y1 = detection.bottom.round().clamp(0.0, max_y) as i32;
  (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
}

/// 持有字体资源的叠加绘制器
pub struct OverlayRenderer {
  font: FontArc,
}

impl OverlayRenderer {
  /// 使用内置 DejaVu Sans 字体
  pub fn embedded() -> Result<Self, OverlayError> {
    let font_data: &'static [u8] = include_bytes!("../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data)?;
    Ok(Self { font })
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
    let path = path.as_ref();
    info!("加载字体: {}", path.display());
    let data = std::fs::read(path).map_err(|source| OverlayError::FontIo {
      path: path.to_path_buf(),
      source,
    })?;
    let font = FontArc::try_from_vec(data)?;
    Ok(Self { font })
  }

  /// 在帧上原地绘制
  pub fn render(
    &self,
    frame: &mut FrameMut<'_>,
    detections: &[Detection],
    classes: &ClassRegistry,
    flags: OverlayFlags,
  ) -> Result<(), OverlayError> {
    if flags.is_empty() {
      return Err(OverlayError::InvalidFlags);
    }
    let channels = frame.validate()?;
    if detections.is_empty() {
      return Ok(());
    }

    let (width, height) = (frame.width, frame.height);
    for detection in detections {
      let [r, g, b, a] = classes.color(detection.class_id).unwrap_or(FALLBACK_COLOR);
      let Some((x0, y0, x1, y1)) = pixel_box(detection, width, height) else {
        continue;
      };

      if flags.contains(OverlayFlags::BOX) {
        let mut canvas = BlendCanvas {
          frame: &mut *frame,
          channels,
          alpha: a as f32 / 255.0,
        };
        let rect = Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32);
        draw_filled_rect_mut(&mut canvas, rect, Rgb([r, g, b]));
      }

      if flags.contains(OverlayFlags::LINES) {
        let mut canvas = BlendCanvas {
          frame: &mut *frame,
          channels,
          alpha: 1.0,
        };
        draw_outline(&mut canvas, (x0, y0, x1, y1), Rgb([r, g, b]));
      }
    }

    if flags.has_text() {
      let scale = PxScale::from(adapt_font_size(width));
      for detection in detections {
        let text = label_text(detection, classes, flags);
        if text.is_empty() {
          continue;
        }
        let alpha = text_alpha(detection);
        if alpha <= 0.0 {
          continue;
        }
        let mut canvas = BlendCanvas {
          frame: &mut *frame,
          channels,
          alpha,
        };
        draw_text_mut(
          &mut canvas,
          Rgb(TEXT_COLOR),
          (detection.left + TEXT_OFFSET.0).round() as i32,
          (detection.top + TEXT_OFFSET.1).round() as i32,
          scale,
          &self.font,
          &text,
        );
      }
    }

    debug!("绘制 {} 个目标, 选项: {}", detections.len(), flags);
    Ok(())
  }

  /// 先复制输入帧再绘制到输出帧
  pub fn render_into(
    &self,
    input: &Frame<'_>,
    output: &mut FrameMut<'_>,
    detections: &[Detection],
    classes: &ClassRegistry,
    flags: OverlayFlags,
  ) -> Result<(), OverlayError> {
    if flags.is_empty() {
      return Err(OverlayError::InvalidFlags);
    }
    output.copy_from(input)?;
    self.render(output, detections, classes, flags)
  }
}

/// 四条边，每条线宽 `LINE_WIDTH`，向框内加粗
fn draw_outline<C: Canvas>(canvas: &mut C, (x0, y0, x1, y1): (i32, i32, i32, i32), color: C::Pixel) {
  for t in 0..LINE_WIDTH {
    let (l, r) = ((x0 + t) as f32, (x1 - t) as f32);
    let (top, bottom) = ((y0 + t) as f32, (y1 - t) as f32);
    draw_line_segment_mut(canvas, (x0 as f32, top), (x1 as f32, top), color);
    draw_line_segment_mut(canvas, (x1 as f32, bottom), (x0 as f32, bottom), color);
    draw_line_segment_mut(canvas, (l, y0 as f32), (l, y1 as f32), color);
    draw_line_segment_mut(canvas, (r, y1 as f32), (r, y0 as f32), color);
  }
}
