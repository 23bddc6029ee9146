// 该文件是 Yolonet 项目的一部分。
// src/task.rs - 推理任务
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
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use image::RgbImage;
use tracing::{error, info, warn};

use crate::{
  detector::{Detector, FrameDetections},
  frame::FrameMut,
  model::InferenceEngine,
  output::Render,
  overlay::OverlayFlags,
};

pub trait Task<I, E, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: Detector<E>, output: O) -> Result<(), Self::Error>;
}

/// 检测一帧并交给输出，帧上的叠加在输出前完成
fn process_frame<E, O>(
  detector: &mut Detector<E>,
  output: &O,
  image: &mut RgbImage,
  flags: OverlayFlags,
) -> anyhow::Result<FrameDetections>
where
  E: InferenceEngine,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let result = detector.detect(&mut FrameMut::from(&mut *image), flags)?;
  let detections = detector.detections(result.handle)?;
  output.render_result(image, detections, detector.classes())?;
  Ok(result)
}

#[derive(Default, Debug)]
pub struct OneShotTask {
  flags: OverlayFlags,
}

impl OneShotTask {
  pub fn with_flags(mut self, flags: OverlayFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl<I, E, O> Task<I, E, O> for OneShotTask
where
  I: Iterator<Item = RgbImage>,
  E: InferenceEngine,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut detector: Detector<E>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut frame = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始检测...");
    let now = Instant::now();
    let result = process_frame(&mut detector, &output, &mut frame, self.flags)?;
    info!(
      "检测完成: {} 个目标 ({} 个报警)，耗时: {:.2?}",
      result.count,
      result.alerts,
      now.elapsed()
    );

    Ok(())
  }
}

#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
  flags: OverlayFlags,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    RepeatShotTask {
      repeat: 1000,
      flags: OverlayFlags::DEFAULT,
    }
  }
}

impl RepeatShotTask {
  /// 前两次作为预热，不计入平均耗时
  const WARMUP: usize = 2;

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn with_flags(mut self, flags: OverlayFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl<I, E, O> Task<I, E, O> for RepeatShotTask
where
  I: Iterator<Item = RgbImage>,
  E: InferenceEngine,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut detector: Detector<E>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，重复检测 {} 次...", self.repeat);
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let mut image = frame.clone();
      let now = Instant::now();
      let result = process_frame(&mut detector, &output, &mut image, self.flags)?;
      let elapsed = now.elapsed();
      info!("({})检测到 {} 个目标，耗时: {:.2?}", i, result.count, elapsed);
      times.push(elapsed);
    }

    if times.len() > Self::WARMUP {
      warn!(
        "平均检测时间: {:.2?}",
        times.iter().skip(Self::WARMUP).sum::<Duration>() / (times.len() - Self::WARMUP) as u32
      );
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  flags: OverlayFlags,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_flags(mut self, flags: OverlayFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl<I, E, O> Task<I, E, O> for ContinuousTask
where
  I: Iterator<Item = RgbImage>,
  E: InferenceEngine,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut detector: Detector<E>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("设置 Ctrl-C 处理函数失败")?;

    let mut frame_index = 0usize;
    for mut frame in input {
      frame_index = frame_index.wrapping_add(1);
      let now = Instant::now();
      match process_frame(&mut detector, &output, &mut frame, self.flags) {
        Ok(result) => info!(
          "第 {} 帧: {} 个目标 ({} 个报警)，耗时: {:.2?}",
          frame_index,
          result.count,
          result.alerts,
          now.elapsed()
        ),
        Err(e) => error!("第 {} 帧处理失败，跳过: {:#}", frame_index, e),
      }
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}
