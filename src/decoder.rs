// 该文件是 Yolonet 项目的一部分。
// src/decoder.rs - 输出张量解码
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

use thiserror::Error;
use tracing::debug;

use crate::{
  detection::{Candidate, ImageSpace, NetworkSpace},
  geometry::BBox,
  letterbox::LetterboxInfo,
  model::OutputTensor,
};

/// 带 objectness 通道时置信度的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectnessTransform {
  /// `objectness * max_class`，通道已经是概率
  Product,
  /// `sigmoid(objectness) * sigmoid(max_class)`
  Logits,
  /// `sigmoid(max_class)`，忽略 objectness
  MaxClassLogit,
}

impl ObjectnessTransform {
  fn confidence(&self, objectness: f32, max_class: f32) -> f32 {
    match self {
      ObjectnessTransform::Product => objectness * max_class,
      ObjectnessTransform::Logits => sigmoid(objectness) * sigmoid(max_class),
      ObjectnessTransform::MaxClassLogit => sigmoid(max_class),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ObjectnessTransform::Product => "product",
      ObjectnessTransform::Logits => "logits",
      ObjectnessTransform::MaxClassLogit => "max-class-logit",
    }
  }
}

impl fmt::Display for ObjectnessTransform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ObjectnessTransform {
  type Err = DecodeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "product" => Ok(ObjectnessTransform::Product),
      "logits" => Ok(ObjectnessTransform::Logits),
      "max-class-logit" | "max_class_logit" => Ok(ObjectnessTransform::MaxClassLogit),
      other => Err(DecodeError::UnknownTransform(other.to_string())),
    }
  }
}

/// 输出张量的网格编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderVariant {
  /// `4 + nc` 通道，像素坐标，置信度为最大类别分数
  ObjectnessFree,
  /// `5 + nc` 通道，归一化坐标，带 objectness
  Objectness(ObjectnessTransform),
}

impl DecoderVariant {
  /// 类别分数之前的通道数
  pub fn box_channels(&self) -> usize {
    match self {
      DecoderVariant::ObjectnessFree => 4,
      DecoderVariant::Objectness(_) => 5,
    }
  }

  /// 由通道数推出类别数
  pub fn num_classes(&self, channels: usize) -> Result<usize, DecodeError> {
    let box_channels = self.box_channels();
    if channels <= box_channels {
      return Err(DecodeError::ChannelMismatch {
        channels,
        minimum: box_channels + 1,
      });
    }
    Ok(channels - box_channels)
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("通道数 {channels} 与解码方式不符, 至少需要 {minimum}")]
  ChannelMismatch { channels: usize, minimum: usize },
  #[error("未知的 objectness 变换: {0}")]
  UnknownTransform(String),
}

/// 解码结果，坐标空间取决于编码方式
#[derive(Debug, Clone)]
pub enum Decoded {
  /// 已还原到原始图像
  Image(Vec<Candidate<ImageSpace>>),
  /// 仍在网络输入空间，需要再做一次还原
  Network(Vec<Candidate<NetworkSpace>>),
}

impl Decoded {
  pub fn len(&self) -> usize {
    match self {
      Decoded::Image(c) => c.len(),
      Decoded::Network(c) => c.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

pub struct TensorDecoder {
  variant: DecoderVariant,
  threshold: f32,
  max_candidates: usize,
  input_size: (u32, u32),
}

impl TensorDecoder {
  pub fn new(
    variant: DecoderVariant,
    threshold: f32,
    max_candidates: usize,
    input_size: (u32, u32),
  ) -> Self {
    Self {
      variant,
      threshold,
      max_candidates,
      input_size,
    }
  }

  pub fn variant(&self) -> DecoderVariant {
    self.variant
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn decode(&self, tensor: &OutputTensor, info: &LetterboxInfo) -> Result<Decoded, DecodeError> {
    let expected = tensor.shape.len();
    if tensor.data.len() != expected {
      return Err(DecodeError::LengthMismatch {
        expected,
        actual: tensor.data.len(),
      });
    }
    let num_classes = self.variant.num_classes(tensor.shape.channels)?;

    let decoded = match self.variant {
      DecoderVariant::ObjectnessFree => {
        let mut out = Vec::new();
        self.scan(tensor, num_classes, |anchor, max_class, class_id| {
          if !(max_class > self.threshold) {
            return None;
          }
          let bbox = center_box(tensor, anchor, 1.0, 1.0);
          let candidate: Candidate<ImageSpace> =
            Candidate::new(info.restore_bbox(bbox), max_class, class_id);
          out.push(candidate);
          Some(out.len())
        });
        Decoded::Image(out)
      }
      DecoderVariant::Objectness(transform) => {
        let (input_w, input_h) = (self.input_size.0 as f32, self.input_size.1 as f32);
        let mut out = Vec::new();
        self.scan(tensor, num_classes, |anchor, max_class, class_id| {
          let objectness = tensor.value(4, anchor);
          let confidence = transform.confidence(objectness, max_class);
          if !(confidence > self.threshold) {
            return None;
          }
          let bbox = center_box(tensor, anchor, input_w, input_h);
          let candidate: Candidate<NetworkSpace> = Candidate::new(bbox, confidence, class_id);
          out.push(candidate);
          Some(out.len())
        });
        Decoded::Network(out)
      }
    };

    debug!(
      "解码 {} 个锚点, 得到 {} 个候选框",
      tensor.shape.anchors,
      decoded.len()
    );
    Ok(decoded)
  }

  /// 逐锚点求最大类别分数，`accept` 返回已接受数量，达到上限时提前结束
  fn scan<F>(&self, tensor: &OutputTensor, num_classes: usize, mut accept: F)
  where
    F: FnMut(usize, f32, u32) -> Option<usize>,
  {
    if self.max_candidates == 0 {
      return;
    }
    let first_class = self.variant.box_channels();
    for anchor in 0..tensor.shape.anchors {
      let mut max_class = f32::NEG_INFINITY;
      let mut class_id = 0u32;
      for c in 0..num_classes {
        let v = tensor.value(first_class + c, anchor);
        if v > max_class {
          max_class = v;
          class_id = c as u32;
        }
      }
      match accept(anchor, max_class, class_id) {
        Some(accepted) if accepted >= self.max_candidates => {
          debug!("候选框达到上限 {}, 提前结束解码", self.max_candidates);
          break;
        }
        _ => {}
      }
    }
  }
}

fn center_box(tensor: &OutputTensor, anchor: usize, sx: f32, sy: f32) -> BBox {
  BBox::from_center(
    tensor.value(0, anchor) * sx,
    tensor.value(1, anchor) * sy,
    tensor.value(2, anchor) * sx,
    tensor.value(3, anchor) * sy,
  )
}

pub(crate) fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::TensorShape;

  fn identity_info(width: u32, height: u32) -> LetterboxInfo {
    LetterboxInfo {
      scale: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
      width,
      height,
    }
  }

  /// 按锚点给出每一列的值，组装成通道优先的张量
  fn tensor(columns: &[Vec<f32>]) -> OutputTensor {
    let channels = columns[0].len();
    let anchors = columns.len();
    let mut data = vec![0.0; channels * anchors];
    for (a, col) in columns.iter().enumerate() {
      for (c, v) in col.iter().enumerate() {
        data[c * anchors + a] = *v;
      }
    }
    OutputTensor::new(TensorShape { channels, anchors }, data)
  }

  #[test]
  fn objectness_free_emits_image_space() {
    let t = tensor(&[
      vec![100.0, 100.0, 20.0, 20.0, 0.9, 0.1],
      vec![10.0, 10.0, 4.0, 4.0, 0.2, 0.3],
    ]);
    let decoder = TensorDecoder::new(DecoderVariant::ObjectnessFree, 0.5, 10, (640, 640));
    let Decoded::Image(c) = decoder.decode(&t, &identity_info(640, 640)).unwrap() else {
      panic!("期望图像空间结果");
    };
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].class_id, 0);
    assert!((c[0].score - 0.9).abs() < 1e-6);
    assert_eq!(c[0].bbox, BBox::new(90.0, 90.0, 110.0, 110.0));
  }

  #[test]
  fn objectness_free_applies_letterbox() {
    let t = tensor(&[vec![320.0, 320.0, 64.0, 64.0, 0.0, 0.8]]);
    let info = LetterboxInfo {
      scale: 2.0,
      pad_x: 0.0,
      pad_y: 140.0,
      width: 1280,
      height: 720,
    };
    let decoder = TensorDecoder::new(DecoderVariant::ObjectnessFree, 0.5, 10, (640, 640));
    let Decoded::Image(c) = decoder.decode(&t, &info).unwrap() else {
      panic!("期望图像空间结果");
    };
    assert_eq!(c[0].class_id, 1);
    assert_eq!(c[0].bbox, BBox::new(576.0, 296.0, 704.0, 424.0));
  }

  #[test]
  fn argmax_keeps_first_maximum() {
    let t = tensor(&[vec![5.0, 5.0, 2.0, 2.0, 0.7, 0.7, 0.7]]);
    let decoder = TensorDecoder::new(DecoderVariant::ObjectnessFree, 0.5, 10, (640, 640));
    let Decoded::Image(c) = decoder.decode(&t, &identity_info(640, 640)).unwrap() else {
      panic!("期望图像空间结果");
    };
    assert_eq!(c[0].class_id, 0);
  }

  #[test]
  fn threshold_is_strict() {
    let t = tensor(&[vec![5.0, 5.0, 2.0, 2.0, 0.5]]);
    let decoder = TensorDecoder::new(DecoderVariant::ObjectnessFree, 0.5, 10, (640, 640));
    assert!(decoder.decode(&t, &identity_info(640, 640)).unwrap().is_empty());
  }

  #[test]
  fn objectness_transforms() {
    let t = tensor(&[vec![0.5, 0.5, 0.25, 0.25, 0.8, 0.9, 0.1]]);
    let info = identity_info(640, 640);

    let product = TensorDecoder::new(
      DecoderVariant::Objectness(ObjectnessTransform::Product),
      0.5,
      10,
      (640, 640),
    );
    let Decoded::Network(c) = product.decode(&t, &info).unwrap() else {
      panic!("期望网络空间结果");
    };
    assert!((c[0].score - 0.72).abs() < 1e-6);
    assert_eq!(c[0].bbox, BBox::new(240.0, 240.0, 400.0, 400.0));

    let logits = TensorDecoder::new(
      DecoderVariant::Objectness(ObjectnessTransform::Logits),
      0.3,
      10,
      (640, 640),
    );
    let Decoded::Network(c) = logits.decode(&t, &info).unwrap() else {
      panic!("期望网络空间结果");
    };
    assert!((c[0].score - sigmoid(0.8) * sigmoid(0.9)).abs() < 1e-6);

    let max_logit = TensorDecoder::new(
      DecoderVariant::Objectness(ObjectnessTransform::MaxClassLogit),
      0.3,
      10,
      (640, 640),
    );
    let Decoded::Network(c) = max_logit.decode(&t, &info).unwrap() else {
      panic!("期望网络空间结果");
    };
    assert!((c[0].score - sigmoid(0.9)).abs() < 1e-6);
  }

  #[test]
  fn higher_threshold_never_yields_more() {
    let columns: Vec<Vec<f32>> = (0..50)
      .map(|i| {
        let s = (i as f32 * 0.37).fract();
        vec![i as f32 * 10.0, 50.0, 8.0, 8.0, s, 1.0 - s]
      })
      .collect();
    let t = tensor(&columns);
    let info = identity_info(640, 640);
    let mut last = usize::MAX;
    for step in 0..=10 {
      let threshold = step as f32 / 10.0;
      let decoder = TensorDecoder::new(DecoderVariant::ObjectnessFree, threshold, 100, (640, 640));
      let n = decoder.decode(&t, &info).unwrap().len();
      assert!(n <= last);
      last = n;
    }
  }

  #[test]
  fn stops_at_max_candidates() {
    let columns: Vec<Vec<f32>> = (0..10).map(|_| vec![5.0, 5.0, 2.0, 2.0, 0.9]).collect();
    let decoder = TensorDecoder::new(DecoderVariant::ObjectnessFree, 0.5, 3, (640, 640));
    let n = decoder
      .decode(&tensor(&columns), &identity_info(640, 640))
      .unwrap()
      .len();
    assert_eq!(n, 3);
  }

  #[test]
  fn rejects_malformed_tensor() {
    let bad = OutputTensor::new(
      TensorShape {
        channels: 6,
        anchors: 4,
      },
      vec![0.0; 10],
    );
    let decoder = TensorDecoder::new(DecoderVariant::ObjectnessFree, 0.5, 10, (640, 640));
    assert_eq!(
      decoder.decode(&bad, &identity_info(640, 640)).unwrap_err(),
      DecodeError::LengthMismatch {
        expected: 24,
        actual: 10
      }
    );

    let no_classes = tensor(&[vec![0.0; 5]]);
    let decoder = TensorDecoder::new(
      DecoderVariant::Objectness(ObjectnessTransform::Product),
      0.5,
      10,
      (640, 640),
    );
    assert_eq!(
      decoder
        .decode(&no_classes, &identity_info(640, 640))
        .unwrap_err(),
      DecodeError::ChannelMismatch {
        channels: 5,
        minimum: 6
      }
    );
  }

  #[test]
  fn parses_transform_names() {
    assert_eq!(
      "Max-Class-Logit".parse::<ObjectnessTransform>().unwrap(),
      ObjectnessTransform::MaxClassLogit
    );
    assert!("sum".parse::<ObjectnessTransform>().is_err());
  }
}
