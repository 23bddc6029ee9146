// 该文件是 Yolonet 项目的一部分。
// src/detection.rs - 检测结果定义
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

use std::marker::PhantomData;

use crate::geometry::BBox;

/// 未被跟踪的目标
pub const UNTRACKED: i32 = -1;

/// 单个检测目标，坐标位于原始图像空间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  /// 类别索引
  pub class_id: u32,
  /// 置信度
  pub confidence: f32,
  /// 跟踪 ID，`-1` 表示未跟踪
  pub track_id: i32,
  /// -1 丢弃，0 初始化中，1 有效
  pub track_status: i32,
  /// 连续被识别的帧数
  pub track_frames: i32,
  /// 连续丢失的帧数
  pub track_lost: i32,
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl Default for Detection {
  fn default() -> Self {
    Self {
      class_id: 0,
      confidence: 0.0,
      track_id: UNTRACKED,
      track_status: -1,
      track_frames: 0,
      track_lost: 0,
      left: 0.0,
      top: 0.0,
      right: 0.0,
      bottom: 0.0,
    }
  }
}

impl Detection {
  pub fn new(class_id: u32, confidence: f32, bbox: BBox) -> Self {
    Self {
      class_id,
      confidence,
      left: bbox.left,
      top: bbox.top,
      right: bbox.right,
      bottom: bbox.bottom,
      ..Default::default()
    }
  }

  pub fn bbox(&self) -> BBox {
    BBox::new(self.left, self.top, self.right, self.bottom)
  }

  pub fn width(&self) -> f32 {
    self.bbox().width()
  }

  pub fn height(&self) -> f32 {
    self.bbox().height()
  }

  pub fn area(&self) -> f32 {
    self.bbox().area()
  }

  pub fn center(&self) -> (f32, f32) {
    self.bbox().center()
  }

  pub fn contains(&self, x: f32, y: f32) -> bool {
    self.bbox().contains(x, y)
  }

  pub fn overlaps(&self, other: &Detection) -> bool {
    self.bbox().overlaps(&other.bbox())
  }

  pub fn intersection_area(&self, other: &Detection) -> f32 {
    self.bbox().intersection_area(&other.bbox())
  }

  pub fn iou(&self, other: &Detection) -> f32 {
    self.bbox().iou(&other.bbox())
  }

  pub fn intersects(&self, other: &Detection, area_threshold: f32) -> bool {
    self.bbox().intersects(&other.bbox(), area_threshold)
  }

  /// 相交时扩展为外接框
  pub fn expand(&mut self, other: &Detection) -> bool {
    let mut bbox = self.bbox();
    if !bbox.expand(&other.bbox()) {
      return false;
    }
    self.left = bbox.left;
    self.top = bbox.top;
    self.right = bbox.right;
    self.bottom = bbox.bottom;
    true
  }

  pub fn is_tracked(&self) -> bool {
    self.track_id >= 0
  }

  pub fn reset(&mut self) {
    *self = Detection::default();
  }
}

/// 按面积降序排列（稳定排序，面积相同的保持原顺序）
pub fn sort_by_area(detections: &mut [Detection]) {
  detections.sort_by(|a, b| b.area().total_cmp(&a.area()));
}

/// 网络输入空间（含 letterbox 填充）
#[derive(Debug, Clone, Copy)]
pub struct NetworkSpace;

/// 原始图像空间
#[derive(Debug, Clone, Copy)]
pub struct ImageSpace;

/// 解码得到的候选框，坐标空间由类型参数标记
#[derive(Debug, Clone, Copy)]
pub struct Candidate<S> {
  pub bbox: BBox,
  pub score: f32,
  pub class_id: u32,
  _space: PhantomData<S>,
}

impl<S> Candidate<S> {
  pub fn new(bbox: BBox, score: f32, class_id: u32) -> Self {
    Self {
      bbox,
      score,
      class_id,
      _space: PhantomData,
    }
  }

  pub(crate) fn with_bbox<T>(self, bbox: BBox) -> Candidate<T> {
    Candidate::new(bbox, self.score, self.class_id)
  }
}

impl Candidate<ImageSpace> {
  pub fn into_detection(self) -> Detection {
    Detection::new(self.class_id, self.score, self.bbox)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(l: f32, t: f32, r: f32, b: f32) -> Detection {
    Detection::new(0, 0.5, BBox::new(l, t, r, b))
  }

  #[test]
  fn default_is_untracked() {
    let d = Detection::default();
    assert_eq!(d.track_id, UNTRACKED);
    assert!(!d.is_tracked());
    assert_eq!(d.area(), 0.0);
  }

  #[test]
  fn sort_by_area_is_descending_and_stable() {
    let mut dets = vec![
      det(0.0, 0.0, 2.0, 2.0),
      Detection {
        class_id: 1,
        ..det(0.0, 0.0, 10.0, 10.0)
      },
      Detection {
        class_id: 2,
        ..det(5.0, 5.0, 7.0, 7.0)
      },
      Detection {
        class_id: 3,
        ..det(0.0, 0.0, 10.0, 10.0)
      },
    ];
    sort_by_area(&mut dets);
    let ids: Vec<u32> = dets.iter().map(|d| d.class_id).collect();
    assert_eq!(ids, vec![1, 3, 0, 2]);
  }

  #[test]
  fn expand_updates_coordinates() {
    let mut a = det(0.0, 0.0, 10.0, 10.0);
    assert!(a.expand(&det(5.0, 5.0, 20.0, 12.0)));
    assert_eq!(a.bbox(), BBox::new(0.0, 0.0, 20.0, 12.0));
  }

  #[test]
  fn reset_clears_tracking() {
    let mut a = det(1.0, 2.0, 3.0, 4.0);
    a.track_id = 7;
    a.track_lost = 3;
    a.reset();
    assert_eq!(a, Detection::default());
  }

  #[test]
  fn candidate_into_detection() {
    let c = Candidate::<ImageSpace>::new(BBox::new(1.0, 2.0, 3.0, 4.0), 0.7, 5);
    let d = c.into_detection();
    assert_eq!(d.class_id, 5);
    assert_eq!(d.confidence, 0.7);
    assert_eq!(d.bbox(), BBox::new(1.0, 2.0, 3.0, 4.0));
    assert_eq!(d.track_id, UNTRACKED);
  }
}
