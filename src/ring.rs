// 该文件是 Yolonet 项目的一部分。
// src/ring.rs - 检测结果环形缓冲区
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
use tracing::{info, warn};

use crate::detection::Detection;

pub const DEFAULT_RING_SETS: usize = 16;

/// 指向环形缓冲区中某一组结果的句柄；槽位被重新占用后失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
  slot: usize,
  generation: u64,
}

impl SlotHandle {
  pub fn slot(&self) -> usize {
    self.slot
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum RingError {
  #[error("结果数量 {requested} 超过容量 {capacity}")]
  CapacityExceeded { requested: usize, capacity: usize },
  #[error("槽位 {0} 已被新的帧占用")]
  StaleHandle(usize),
  #[error("结果组数量必须大于 0")]
  NoSets,
}

/// `sets * capacity` 条记录的连续存储，单生产者单消费者
pub struct DetectionRing {
  capacity: usize,
  records: Vec<Detection>,
  lengths: Vec<usize>,
  generations: Vec<u64>,
  cursor: u64,
}

impl DetectionRing {
  pub fn new(sets: usize, capacity: usize) -> Result<Self, RingError> {
    if sets == 0 {
      return Err(RingError::NoSets);
    }
    info!("分配检测结果缓冲区: {} 组 x {} 条", sets, capacity);
    Ok(Self {
      capacity,
      records: vec![Detection::default(); sets * capacity],
      lengths: vec![0; sets],
      generations: vec![u64::MAX; sets],
      cursor: 0,
    })
  }

  pub fn sets(&self) -> usize {
    self.lengths.len()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// 占用下一组并清空，游标按组数取模前进
  pub fn next_slot(&mut self) -> SlotHandle {
    let slot = (self.cursor % self.sets() as u64) as usize;
    let generation = self.cursor;
    self.cursor += 1;
    self.generations[slot] = generation;
    self.lengths[slot] = 0;
    SlotHandle { slot, generation }
  }

  fn check(&self, handle: SlotHandle) -> Result<(), RingError> {
    match self.generations.get(handle.slot) {
      Some(&g) if g == handle.generation => Ok(()),
      _ => {
        warn!("槽位 {} 的句柄已过期", handle.slot);
        Err(RingError::StaleHandle(handle.slot))
      }
    }
  }

  fn range(&self, slot: usize) -> std::ops::Range<usize> {
    let start = slot * self.capacity;
    start..start + self.lengths[slot]
  }

  /// 覆盖写入一组结果，超出容量时不写入任何内容
  pub fn write_slot(&mut self, handle: SlotHandle, detections: &[Detection]) -> Result<(), RingError> {
    self.check(handle)?;
    if detections.len() > self.capacity {
      return Err(RingError::CapacityExceeded {
        requested: detections.len(),
        capacity: self.capacity,
      });
    }
    let start = handle.slot * self.capacity;
    self.records[start..start + detections.len()].copy_from_slice(detections);
    self.lengths[handle.slot] = detections.len();
    Ok(())
  }

  pub fn get(&self, handle: SlotHandle) -> Result<&[Detection], RingError> {
    self.check(handle)?;
    Ok(&self.records[self.range(handle.slot)])
  }

  pub fn get_mut(&mut self, handle: SlotHandle) -> Result<&mut [Detection], RingError> {
    self.check(handle)?;
    let range = self.range(handle.slot);
    Ok(&mut self.records[range])
  }
}
