// 该文件是 Yolonet 项目的一部分。
// src/model/replay.rs - 张量回放推理引擎
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
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceEngine, InputTensor, OutputTensor, TensorShape},
};

const DEFAULT_INPUT_SIZE: u32 = 640;

/// 从磁盘读取预先导出的原始输出张量（小端 f32），每帧原样返回。
/// 用于在没有推理硬件时驱动完整的后处理流程。
pub struct TensorReplayEngine {
  input_size: (u32, u32),
  output: OutputTensor,
}

#[derive(Error, Debug)]
pub enum TensorReplayError {
  #[error("张量文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("张量文件大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数无效: {0}")]
  InvalidParam(String),
  #[error("输入尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

pub struct TensorReplayEngineBuilder {
  path: String,
  shape: TensorShape,
  input_size: (u32, u32),
}

impl FromUrlWithScheme for TensorReplayEngineBuilder {
  const SCHEME: &'static str = "tensor";
}

fn query_usize(url: &Url, key: &str) -> Result<Option<usize>, TensorReplayError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v
      .parse::<usize>()
      .map(Some)
      .map_err(|_| TensorReplayError::InvalidParam(format!("{}={}", key, v))),
    None => Ok(None),
  }
}

impl FromUrl for TensorReplayEngineBuilder {
  type Error = TensorReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TensorReplayError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let channels = query_usize(url, "channels")?
      .ok_or_else(|| TensorReplayError::InvalidParam("缺少 channels".to_string()))?;
    let anchors = query_usize(url, "anchors")?
      .ok_or_else(|| TensorReplayError::InvalidParam("缺少 anchors".to_string()))?;
    let width = query_usize(url, "width")?.unwrap_or(DEFAULT_INPUT_SIZE as usize) as u32;
    let height = query_usize(url, "height")?.unwrap_or(DEFAULT_INPUT_SIZE as usize) as u32;

    Ok(TensorReplayEngineBuilder {
      path: url.path().to_string(),
      shape: TensorShape { channels, anchors },
      input_size: (width, height),
    })
  }
}

impl TensorReplayEngineBuilder {
  pub fn new(path: impl Into<String>, shape: TensorShape) -> Self {
    Self {
      path: path.into(),
      shape,
      input_size: (DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE),
    }
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = (width, height);
    self
  }

  pub fn build(self) -> Result<TensorReplayEngine, TensorReplayError> {
    info!("加载张量文件: {}", self.path);
    let bytes = std::fs::read(&self.path)?;
    let expected = self.shape.len() * std::mem::size_of::<f32>();
    if bytes.len() != expected {
      return Err(TensorReplayError::SizeMismatch {
        expected,
        actual: bytes.len(),
      });
    }

    let data: Vec<f32> = bytes
      .chunks_exact(4)
      .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
      .collect();
    debug!(
      "张量形状: {} x {}, 网络输入: {:?}",
      self.shape.channels, self.shape.anchors, self.input_size
    );

    Ok(TensorReplayEngine {
      input_size: self.input_size,
      output: OutputTensor::new(self.shape, data),
    })
  }
}

impl TensorReplayEngine {
  pub fn from_tensor(input_size: (u32, u32), output: OutputTensor) -> Self {
    Self { input_size, output }
  }
}

impl InferenceEngine for TensorReplayEngine {
  type Error = TensorReplayError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> TensorShape {
    self.output.shape
  }

  fn infer(&self, input: &InputTensor) -> Result<OutputTensor, Self::Error> {
    if (input.width, input.height) != self.input_size {
      return Err(TensorReplayError::InputMismatch {
        expected: self.input_size,
        actual: (input.width, input.height),
      });
    }
    Ok(self.output.clone())
  }
}
