// 该文件是 Yolonet 项目的一部分。
// src/model.rs - 推理引擎接口
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

use thiserror::Error;

/// 网络输入张量，布局为 NCHW（N = 1），RGB，取值 [0, 1]
#[derive(Debug, Clone)]
pub struct InputTensor {
  pub width: u32,
  pub height: u32,
  pub data: Vec<f32>,
}

/// 输出张量形状 `[channels, anchors]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub channels: usize,
  pub anchors: usize,
}

impl TensorShape {
  pub fn len(&self) -> usize {
    self.channels * self.anchors
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("不支持的输出维度: {0:?}")]
  UnsupportedDims(Vec<usize>),
}

/// 网络输出张量，按通道优先存储：`data[c * anchors + a]`
#[derive(Debug, Clone)]
pub struct OutputTensor {
  pub shape: TensorShape,
  pub data: Vec<f32>,
}

impl OutputTensor {
  pub fn new(shape: TensorShape, data: Vec<f32>) -> Self {
    Self { shape, data }
  }

  /// 接受 `[C, A]` 或 `[1, C, A]`
  pub fn from_dims(dims: &[usize], data: Vec<f32>) -> Result<Self, TensorError> {
    let shape = match dims {
      [channels, anchors] | [1, channels, anchors] => TensorShape {
        channels: *channels,
        anchors: *anchors,
      },
      _ => return Err(TensorError::UnsupportedDims(dims.to_vec())),
    };
    Ok(Self { shape, data })
  }

  pub fn value(&self, channel: usize, anchor: usize) -> f32 {
    self.data[channel * self.shape.anchors + anchor]
  }
}

/// 推理引擎协作者：同步执行一次前向推理
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 网络输入尺寸 (width, height)
  fn input_size(&self) -> (u32, u32);
  fn output_shape(&self) -> TensorShape;
  fn infer(&self, input: &InputTensor) -> Result<OutputTensor, Self::Error>;
}

mod replay;
pub use self::replay::{TensorReplayEngine, TensorReplayEngineBuilder, TensorReplayError};
