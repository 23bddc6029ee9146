// 该文件是 Yolonet 项目的一部分。
// src/detector.rs - 目标检测流水线
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

use std::{collections::BTreeSet, time::Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  classes::{ClassRegistry, ClassRegistryError},
  config::{ConfigError, DetectorConfig, OverlayPolicy},
  decoder::{DecodeError, Decoded, TensorDecoder},
  detection::{Candidate, Detection, sort_by_area},
  frame::{Frame, FrameError, FrameMut, PixelFormat, SUPPORTED_FORMATS},
  letterbox::{LetterboxError, letterbox, to_nchw},
  model::{InferenceEngine, InputTensor, TensorShape},
  nms::Nms,
  overlay::{OverlayError, OverlayFlags, OverlayRenderer},
  ring::{DetectionRing, RingError, SlotHandle},
};

/// 跟踪器协作者：可填写跟踪字段，也可补充或删除目标
pub trait Tracker {
  fn update(&mut self, detections: &mut Vec<Detection>);
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("输入无效: {0}")]
  InvalidInput(FrameError),
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(PixelFormat),
  #[error("预处理错误: {0}")]
  Letterbox(#[from] LetterboxError),
  #[error("推理失败: {0}")]
  Inference(Box<dyn std::error::Error + Send + Sync>),
  #[error("输出形状 {actual:?} 与模型不符, 期望 {expected:?}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("结果缓冲区错误: {0}")]
  Ring(#[from] RingError),
}

impl From<FrameError> for DetectError {
  fn from(err: FrameError) -> Self {
    match err {
      FrameError::UnsupportedFormat(format) => DetectError::UnsupportedFormat(format),
      other => DetectError::InvalidInput(other),
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorBuildError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型输出与解码方式不符: {0}")]
  Shape(#[from] DecodeError),
  #[error("模型输入尺寸无效: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("模型输出没有锚点")]
  NoAnchors,
  #[error("类别加载错误: {0}")]
  Classes(#[from] ClassRegistryError),
  #[error("字体加载错误: {0}")]
  Font(#[from] OverlayError),
  #[error("结果缓冲区错误: {0}")]
  Ring(#[from] RingError),
}

/// 一帧的检测结果摘要，目标本身存放在环形缓冲区中
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDetections {
  pub handle: SlotHandle,
  pub count: usize,
  /// 属于报警类别的目标数量
  pub alerts: usize,
}

pub struct DetectorBuilder {
  config: DetectorConfig,
  tracker: Option<Box<dyn Tracker>>,
}

impl FromUrlWithScheme for DetectorBuilder {
  const SCHEME: &'static str = DetectorConfig::SCHEME;
}

impl FromUrl for DetectorBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self::new(DetectorConfig::from_url(url)?))
  }
}

impl DetectorBuilder {
  pub fn new(config: DetectorConfig) -> Self {
    Self {
      config,
      tracker: None,
    }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn tracker(mut self, tracker: impl Tracker + 'static) -> Self {
    self.tracker = Some(Box::new(tracker));
    self
  }

  /// 任一资源加载失败即返回错误
  pub fn build<E: InferenceEngine>(self, engine: E) -> Result<Detector<E>, DetectorBuildError> {
    let config = self.config;
    let variant = config.validate()?;

    let (width, height) = engine.input_size();
    if width == 0 || height == 0 {
      return Err(DetectorBuildError::InvalidInputSize(width, height));
    }
    let shape = engine.output_shape();
    let num_classes = variant.num_classes(shape.channels)?;
    if shape.anchors == 0 {
      return Err(DetectorBuildError::NoAnchors);
    }
    info!(
      "模型输入 {}x{}, 输出 {} 通道 x {} 锚点, {} 个类别",
      width, height, shape.channels, shape.anchors, num_classes
    );

    let classes = ClassRegistry::load(
      num_classes,
      config.labels.as_deref(),
      config.colors.as_deref(),
      config.alpha,
    )?;
    let renderer = match &config.font {
      Some(path) => OverlayRenderer::from_file(path)?,
      None => OverlayRenderer::embedded()?,
    };
    let ring = DetectionRing::new(config.sets, shape.anchors)?;
    let max_candidates = config
      .max_candidates
      .map_or(shape.anchors, |limit| limit.min(shape.anchors));
    let decoder = TensorDecoder::new(
      variant,
      config.confidence_threshold,
      max_candidates,
      (width, height),
    );

    info!("检测器创建完成");
    Ok(Detector {
      engine,
      decoder,
      nms: config.nms,
      ring,
      classes,
      renderer,
      tracker: self.tracker,
      sort_by_area: config.sort_by_area,
      alert_classes: config.alert_classes,
      overlay_policy: config.overlay_policy,
      shape,
    })
  }
}

/// 单路视频流的检测器；`detect` 需要独占引用
pub struct Detector<E> {
  engine: E,
  decoder: TensorDecoder,
  nms: Nms,
  ring: DetectionRing,
  classes: ClassRegistry,
  renderer: OverlayRenderer,
  tracker: Option<Box<dyn Tracker>>,
  sort_by_area: bool,
  alert_classes: BTreeSet<u32>,
  overlay_policy: OverlayPolicy,
  shape: TensorShape,
}

impl<E: InferenceEngine> Detector<E> {
  pub fn engine(&self) -> &E {
    &self.engine
  }

  pub fn classes(&self) -> &ClassRegistry {
    &self.classes
  }

  /// 每帧最多保存的目标数
  pub fn max_detections(&self) -> usize {
    self.ring.capacity()
  }

  pub fn is_alert(&self, detection: &Detection) -> bool {
    self.alert_classes.contains(&detection.class_id)
  }

  fn check_frame(frame: &Frame<'_>) -> Result<(), DetectError> {
    match frame.validate() {
      Ok(_) => Ok(()),
      Err(FrameError::UnsupportedFormat(format)) => {
        let accepted: Vec<&str> = SUPPORTED_FORMATS.iter().map(PixelFormat::as_str).collect();
        error!(
          "不支持的像素格式 {}, 支持的格式: {}",
          format,
          accepted.join(", ")
        );
        Err(DetectError::UnsupportedFormat(format))
      }
      Err(e) => {
        error!("输入帧无效: {}", e);
        Err(DetectError::InvalidInput(e))
      }
    }
  }

  /// 处理一帧：预处理、推理、解码、NMS、还原坐标，结果写入下一个结果组。
  /// `flags` 为空时不绘制。
  pub fn detect(
    &mut self,
    frame: &mut FrameMut<'_>,
    flags: OverlayFlags,
  ) -> Result<FrameDetections, DetectError> {
    let start = Instant::now();
    Self::check_frame(&frame.as_frame())?;

    let rgb = frame.as_frame().to_rgb_image()?;
    let (width, height) = self.engine.input_size();
    let (letterboxed, info) = letterbox(&rgb, width, height)?;
    let input = InputTensor {
      width,
      height,
      data: to_nchw(&letterboxed),
    };
    let preprocessed = start.elapsed();

    let output = self.engine.infer(&input).map_err(|e| {
      error!("推理失败: {}", e);
      DetectError::Inference(Box::new(e))
    })?;
    if output.shape.channels != self.shape.channels {
      return Err(DetectError::ShapeMismatch {
        expected: self.shape,
        actual: output.shape,
      });
    }
    let inferred = start.elapsed();

    let candidates = match self.decoder.decode(&output, &info)? {
      Decoded::Image(candidates) => self.nms.apply(candidates),
      Decoded::Network(candidates) => info.restore_all(self.nms.apply(candidates)),
    };
    let mut detections: Vec<Detection> = candidates
      .into_iter()
      .map(Candidate::into_detection)
      .collect();

    if self.sort_by_area {
      sort_by_area(&mut detections);
    }
    if let Some(tracker) = self.tracker.as_mut() {
      tracker.update(&mut detections);
    }

    let capacity = self.ring.capacity();
    if detections.len() > capacity {
      warn!(
        "目标数量 {} 超过容量 {}, 截断",
        detections.len(),
        capacity
      );
      detections.truncate(capacity);
    }

    let alerts = detections.iter().filter(|d| self.is_alert(d)).count();
    let handle = self.ring.next_slot();
    self.ring.write_slot(handle, &detections)?;

    let wants_overlay = match self.overlay_policy {
      OverlayPolicy::Always => true,
      OverlayPolicy::OnAlert => alerts > 0,
    };
    if !flags.is_empty() && wants_overlay && !detections.is_empty() {
      if let Err(e) = self
        .renderer
        .render(frame, &detections, &self.classes, flags)
      {
        warn!("叠加绘制失败, 仍返回检测结果: {}", e);
      }
    }

    debug!(
      "检测到 {} 个目标 ({} 个报警), 预处理 {:.2?}, 推理 {:.2?}, 总计 {:.2?}",
      detections.len(),
      alerts,
      preprocessed,
      inferred - preprocessed,
      start.elapsed()
    );

    Ok(FrameDetections {
      handle,
      count: detections.len(),
      alerts,
    })
  }

  pub fn detections(&self, handle: SlotHandle) -> Result<&[Detection], RingError> {
    self.ring.get(handle)
  }

  pub fn detections_mut(&mut self, handle: SlotHandle) -> Result<&mut [Detection], RingError> {
    self.ring.get_mut(handle)
  }

  pub fn overlay(
    &self,
    frame: &mut FrameMut<'_>,
    detections: &[Detection],
    flags: OverlayFlags,
  ) -> Result<(), OverlayError> {
    self.renderer.render(frame, detections, &self.classes, flags)
  }

  pub fn overlay_into(
    &self,
    input: &Frame<'_>,
    output: &mut FrameMut<'_>,
    detections: &[Detection],
    flags: OverlayFlags,
  ) -> Result<(), OverlayError> {
    self
      .renderer
      .render_into(input, output, detections, &self.classes, flags)
  }
}

#[cfg(test)]
mod tests {
  use image::{GrayImage, RgbImage};

  use super::*;
  use crate::{
    decoder::ObjectnessTransform,
    frame::{PixelData, PixelDataMut},
    model::{OutputTensor, TensorReplayEngine},
  };

  fn engine(columns: &[[f32; 6]], anchors: usize) -> TensorReplayEngine {
    let shape = TensorShape {
      channels: 6,
      anchors,
    };
    let mut data = vec![0.0; shape.len()];
    for (a, col) in columns.iter().enumerate() {
      for (c, v) in col.iter().enumerate() {
        data[c * anchors + a] = *v;
      }
    }
    TensorReplayEngine::from_tensor((64, 64), OutputTensor::new(shape, data))
  }

  #[test]
  fn detects_and_stores() {
    let mut detector = DetectorBuilder::new(DetectorConfig::default())
      .build(engine(&[[32.0, 32.0, 10.0, 10.0, 0.1, 0.9]], 4))
      .unwrap();
    let mut image = RgbImage::new(64, 64);
    let result = detector
      .detect(&mut FrameMut::from(&mut image), OverlayFlags::NONE)
      .unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(result.alerts, 0);
    let d = detector.detections(result.handle).unwrap()[0];
    assert_eq!(d.class_id, 1);
    assert_eq!(d.bbox().to_array(), [27.0, 27.0, 37.0, 37.0]);
    assert_eq!(image, RgbImage::new(64, 64));
  }

  #[test]
  fn rejects_bad_frames() {
    let mut detector = DetectorBuilder::new(DetectorConfig::default())
      .build(engine(&[], 4))
      .unwrap();

    let mut empty: Vec<u8> = Vec::new();
    let mut frame = FrameMut::new(PixelDataMut::U8(&mut empty), 4, 4, PixelFormat::Rgb8);
    assert!(matches!(
      detector.detect(&mut frame, OverlayFlags::NONE),
      Err(DetectError::InvalidInput(FrameError::Empty))
    ));

    let mut gray = GrayImage::new(4, 4);
    let mut frame = FrameMut::new(PixelDataMut::U8(&mut gray), 4, 4, PixelFormat::Gray8);
    assert!(matches!(
      detector.detect(&mut frame, OverlayFlags::NONE),
      Err(DetectError::UnsupportedFormat(PixelFormat::Gray8))
    ));

    let mut short = vec![0u8; 10];
    let mut frame = FrameMut::new(PixelDataMut::U8(&mut short), 4, 4, PixelFormat::Rgb8);
    assert!(matches!(
      detector.detect(&mut frame, OverlayFlags::NONE),
      Err(DetectError::InvalidInput(FrameError::BufferTooSmall { .. }))
    ));

    let source = RgbImage::new(4, 4);
    let frame = Frame::new(PixelData::U8(&source), 4, 4, PixelFormat::Rgb32F);
    assert!(matches!(
      Detector::<TensorReplayEngine>::check_frame(&frame),
      Err(DetectError::InvalidInput(FrameError::ElementTypeMismatch(_)))
    ));
  }

  #[test]
  fn counts_alerts_and_sorts() {
    let config = DetectorConfig::default()
      .with_alert_classes([0])
      .with_sort_by_area(true);
    let mut detector = DetectorBuilder::new(config)
      .build(engine(
        &[
          [10.0, 10.0, 4.0, 4.0, 0.9, 0.1],
          [40.0, 40.0, 20.0, 20.0, 0.1, 0.8],
          [10.0, 50.0, 6.0, 6.0, 0.7, 0.1],
        ],
        3,
      ))
      .unwrap();
    let mut image = RgbImage::new(64, 64);
    let result = detector
      .detect(&mut FrameMut::from(&mut image), OverlayFlags::NONE)
      .unwrap();
    assert_eq!(result.count, 3);
    assert_eq!(result.alerts, 2);
    let areas: Vec<f32> = detector
      .detections(result.handle)
      .unwrap()
      .iter()
      .map(Detection::area)
      .collect();
    assert_eq!(areas, vec![400.0, 36.0, 16.0]);
  }

  struct NumberingTracker(i32);

  impl Tracker for NumberingTracker {
    fn update(&mut self, detections: &mut Vec<Detection>) {
      for d in detections.iter_mut() {
        self.0 += 1;
        d.track_id = self.0;
      }
    }
  }

  #[test]
  fn tracker_fills_ids() {
    let mut detector = DetectorBuilder::new(DetectorConfig::default())
      .tracker(NumberingTracker(0))
      .build(engine(&[[10.0, 10.0, 4.0, 4.0, 0.9, 0.1]], 2))
      .unwrap();
    let mut image = RgbImage::new(64, 64);
    let mut frame = FrameMut::from(&mut image);
    let first = detector.detect(&mut frame, OverlayFlags::NONE).unwrap();
    let second = detector.detect(&mut frame, OverlayFlags::NONE).unwrap();
    assert_eq!(detector.detections(first.handle).unwrap()[0].track_id, 1);
    assert_eq!(detector.detections(second.handle).unwrap()[0].track_id, 2);
  }

  #[test]
  fn build_rejects_mismatched_engine() {
    let config = DetectorConfig::default().with_objectness(ObjectnessTransform::Product);
    let tiny = TensorReplayEngine::from_tensor(
      (64, 64),
      OutputTensor::new(
        TensorShape {
          channels: 5,
          anchors: 2,
        },
        vec![0.0; 10],
      ),
    );
    assert!(matches!(
      DetectorBuilder::new(config).build(tiny),
      Err(DetectorBuildError::Shape(_))
    ));

    let missing = DetectorConfig::default().with_labels("/nonexistent/labels.txt");
    assert!(matches!(
      DetectorBuilder::new(missing).build(engine(&[], 2)),
      Err(DetectorBuildError::Classes(_))
    ));
  }

  #[test]
  fn builder_from_url() {
    let url = Url::parse("yolonet:///?conf=0.25&sets=2").unwrap();
    let builder = DetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.config().sets, 2);
    assert_eq!(builder.config().confidence_threshold, 0.25);
  }
}
