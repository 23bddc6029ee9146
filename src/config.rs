// 该文件是 Yolonet 项目的一部分。
// src/config.rs - 检测器配置
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

use std::{collections::BTreeSet, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{error, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  classes::DEFAULT_CLASS_ALPHA,
  decoder::{DecoderVariant, ObjectnessTransform},
  nms::Nms,
  ring::DEFAULT_RING_SETS,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidParam { key: String, value: String },
  #[error("使用 objectness 解码时必须指定 objectness 变换")]
  MissingObjectnessTransform,
  #[error("{0} 超出范围 [0, 1]")]
  OutOfRange(&'static str),
  #[error("结果组数量必须大于 0")]
  NoSets,
}

/// 输出张量的编码类型，objectness 的变换另行配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantKind {
  #[default]
  ObjectnessFree,
  Objectness,
}

impl FromStr for VariantKind {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "objectness-free" | "free" | "v8" => Ok(VariantKind::ObjectnessFree),
      "objectness" | "v5" => Ok(VariantKind::Objectness),
      _ => Err(ConfigError::InvalidParam {
        key: "variant".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

/// 在 `detect` 中何时叠加绘制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayPolicy {
  #[default]
  Always,
  /// 仅当存在报警类别的目标时
  OnAlert,
}

impl FromStr for OverlayPolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "always" => Ok(OverlayPolicy::Always),
      "alert" | "on-alert" => Ok(OverlayPolicy::OnAlert),
      _ => Err(ConfigError::InvalidParam {
        key: "overlay".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub variant: VariantKind,
  pub objectness: Option<ObjectnessTransform>,
  pub confidence_threshold: f32,
  pub nms: Nms,
  /// 每帧解码的候选框上限，未设置时等于结果容量
  pub max_candidates: Option<usize>,
  pub labels: Option<PathBuf>,
  pub colors: Option<PathBuf>,
  pub alpha: u8,
  pub sets: usize,
  pub sort_by_area: bool,
  pub alert_classes: BTreeSet<u32>,
  pub overlay_policy: OverlayPolicy,
  pub font: Option<PathBuf>,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      variant: VariantKind::default(),
      objectness: None,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms: Nms::default(),
      max_candidates: None,
      labels: None,
      colors: None,
      alpha: DEFAULT_CLASS_ALPHA,
      sets: DEFAULT_RING_SETS,
      sort_by_area: false,
      alert_classes: BTreeSet::new(),
      overlay_policy: OverlayPolicy::default(),
      font: None,
    }
  }
}

impl DetectorConfig {
  pub fn with_objectness_free(mut self) -> Self {
    self.variant = VariantKind::ObjectnessFree;
    self
  }

  pub fn with_objectness(mut self, transform: ObjectnessTransform) -> Self {
    self.variant = VariantKind::Objectness;
    self.objectness = Some(transform);
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.nms.iou_threshold = threshold;
    self
  }

  pub fn with_top_k(mut self, top_k: usize) -> Self {
    self.nms.top_k = top_k;
    self
  }

  pub fn with_class_agnostic(mut self, agnostic: bool) -> Self {
    self.nms.class_aware = !agnostic;
    self
  }

  pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
    self.max_candidates = Some(max_candidates);
    self
  }

  pub fn with_labels(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels = Some(path.into());
    self
  }

  pub fn with_colors(mut self, path: impl Into<PathBuf>) -> Self {
    self.colors = Some(path.into());
    self
  }

  pub fn with_alpha(mut self, alpha: u8) -> Self {
    self.alpha = alpha;
    self
  }

  pub fn with_sets(mut self, sets: usize) -> Self {
    self.sets = sets;
    self
  }

  pub fn with_sort_by_area(mut self, sort: bool) -> Self {
    self.sort_by_area = sort;
    self
  }

  pub fn with_alert_classes(mut self, classes: impl IntoIterator<Item = u32>) -> Self {
    self.alert_classes = classes.into_iter().collect();
    self
  }

  pub fn with_overlay_policy(mut self, policy: OverlayPolicy) -> Self {
    self.overlay_policy = policy;
    self
  }

  pub fn with_font(mut self, path: impl Into<PathBuf>) -> Self {
    self.font = Some(path.into());
    self
  }

  /// 解码方式；objectness 编码缺少变换时报错
  pub fn decoder_variant(&self) -> Result<DecoderVariant, ConfigError> {
    match (self.variant, self.objectness) {
      (VariantKind::ObjectnessFree, _) => Ok(DecoderVariant::ObjectnessFree),
      (VariantKind::Objectness, Some(t)) => Ok(DecoderVariant::Objectness(t)),
      (VariantKind::Objectness, None) => Err(ConfigError::MissingObjectnessTransform),
    }
  }

  pub fn validate(&self) -> Result<DecoderVariant, ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::OutOfRange("置信度阈值"));
    }
    if !(0.0..=1.0).contains(&self.nms.iou_threshold) {
      return Err(ConfigError::OutOfRange("IoU 阈值"));
    }
    if self.sets == 0 {
      return Err(ConfigError::NoSets);
    }
    if self.max_candidates == Some(0) {
      return Err(ConfigError::OutOfRange("候选框上限"));
    }
    self.decoder_variant()
  }
}

impl FromUrlWithScheme for DetectorConfig {
  const SCHEME: &'static str = "yolonet";
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.trim().parse::<T>().map_err(|_| ConfigError::InvalidParam {
    key: key.to_string(),
    value: value.to_string(),
  })
}

/// 空值视为开启，便于写 `?agnostic`
fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value.trim().to_ascii_lowercase().as_str() {
    "" | "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(ConfigError::InvalidParam {
      key: key.to_string(),
      value: value.to_string(),
    }),
  }
}

impl FromUrl for DetectorConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ConfigError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut config = DetectorConfig::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "variant" => config.variant = value.parse()?,
        "objectness" => {
          config.objectness = Some(value.parse().map_err(|_| ConfigError::InvalidParam {
            key: key.to_string(),
            value: value.to_string(),
          })?)
        }
        "conf" | "confidence" => config.confidence_threshold = parse_value(&key, &value)?,
        "iou" => config.nms.iou_threshold = parse_value(&key, &value)?,
        "topk" => config.nms.top_k = parse_value(&key, &value)?,
        "maxdet" => config.max_candidates = Some(parse_value(&key, &value)?),
        "agnostic" => config.nms.class_aware = !parse_bool(&key, &value)?,
        "labels" => config.labels = Some(PathBuf::from(value.as_ref())),
        "colors" => config.colors = Some(PathBuf::from(value.as_ref())),
        "alpha" => config.alpha = parse_value(&key, &value)?,
        "sets" => config.sets = parse_value(&key, &value)?,
        "sort" => {
          config.sort_by_area = match value.to_ascii_lowercase().as_str() {
            "area" => true,
            "none" => false,
            _ => {
              return Err(ConfigError::InvalidParam {
                key: key.to_string(),
                value: value.to_string(),
              });
            }
          }
        }
        "alert" => {
          config.alert_classes = value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| parse_value::<u32>(&key, v))
            .collect::<Result<_, _>>()?
        }
        "overlay" => config.overlay_policy = value.parse()?,
        "font" => config.font = Some(PathBuf::from(value.as_ref())),
        other => warn!("忽略未知的配置项: {}", other),
      }
    }

    config.validate()?;
    Ok(config)
  }
}
