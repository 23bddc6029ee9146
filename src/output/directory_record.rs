// 该文件是 Yolonet 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录检测结果
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

use std::{
  fs::OpenOptions,
  io::Write,
  path::PathBuf,
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, classes::ClassRegistry, detection::Detection, output::Render,
};

const RECORD_FILE: &str = "detections.jsonl";

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 帧保存到 `目录/YYYY/MM/DD/HH-MM-SS-XXXX.png`，同目录的 jsonl 文件每帧追加一行
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch(
        uri.scheme().to_string(),
      ));
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

/// 单帧检测结果的 JSON 描述
pub fn detections_json(detections: &[Detection], classes: &ClassRegistry) -> Value {
  Value::Array(
    detections
      .iter()
      .map(|d| {
        json!({
          "class_id": d.class_id,
          "class": classes.description(d.class_id),
          "confidence": d.confidence,
          "bbox": [d.left, d.top, d.right, d.bottom],
          "track_id": d.track_id,
        })
      })
      .collect(),
  )
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn day_directory(&self, now: &DateTime<Utc>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;
    Ok(directory)
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &RgbImage,
    detections: &[Detection],
    classes: &ClassRegistry,
  ) -> Result<(), Self::Error> {
    if !self.always && detections.is_empty() {
      return Ok(());
    }

    let now = Utc::now();
    let directory = self.day_directory(&now)?;
    let filename = format!("{}-{:04X}.png", now.format("%H-%M-%S"), self.frame_id());
    frame.save(directory.join(&filename))?;

    let record = json!({
      "time": now.to_rfc3339(),
      "image": filename,
      "detections": detections_json(detections, classes),
    });
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(directory.join(RECORD_FILE))?;
    writeln!(file, "{}", record)?;

    debug!("记录帧 {} ({} 个目标)", filename, detections.len());
    Ok(())
  }
}
