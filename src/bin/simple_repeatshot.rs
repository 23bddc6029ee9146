// 该文件是 Yolonet 项目的一部分。
// src/bin/simple_repeatshot.rs - 单帧重复检测，统计耗时
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use yolonet::{
  DetectorBuilder, FromUrl, OverlayFlags,
  input::InputWrapper,
  model::TensorReplayEngineBuilder,
  output::OutputWrapper,
  task::{RepeatShotTask, Task},
};

/// Yolonet 重复检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理引擎，例如 tensor:///out.bin?channels=84&anchors=8400
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 检测器配置
  #[arg(long, value_name = "CONFIG", default_value = "yolonet:///")]
  pub config: Url,
  /// 叠加选项，例如 box,label,conf
  #[arg(long, value_name = "FLAGS")]
  pub overlay: Option<String>,
  /// 重复次数
  #[arg(long, value_name = "TIMES", default_value_t = 1000)]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let engine = TensorReplayEngineBuilder::from_url(&args.model)?.build()?;
  let detector = DetectorBuilder::from_url(&args.config)?.build(engine)?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .with_flags(OverlayFlags::parse(args.overlay.as_deref()))
    .run_task(input, detector, output)?;

  Ok(())
}
