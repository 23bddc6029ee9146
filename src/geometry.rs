// 该文件是 Yolonet 项目的一部分。
// src/geometry.rs - 边界框几何运算
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

/// 轴对齐边界框，坐标为像素 `[left, top, right, bottom]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BBox {
  pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由中心点与宽高构造，负宽高按绝对值处理
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self {
      left: cx - 0.5 * w,
      top: cy - 0.5 * h,
      right: cx + 0.5 * w,
      bottom: cy + 0.5 * h,
    }
    .normalized()
  }

  /// 保证 `left <= right` 且 `top <= bottom`
  pub fn normalized(&self) -> Self {
    Self {
      left: self.left.min(self.right),
      top: self.top.min(self.bottom),
      right: self.left.max(self.right),
      bottom: self.top.max(self.bottom),
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn center(&self) -> (f32, f32) {
    (
      self.left + self.width() * 0.5,
      self.top + self.height() * 0.5,
    )
  }

  /// 点是否位于框内（含边界）
  pub fn contains(&self, x: f32, y: f32) -> bool {
    x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
  }

  /// 两个框是否相交，边界相接也视为相交
  pub fn overlaps(&self, other: &BBox) -> bool {
    !(other.left > self.right
      || other.right < self.left
      || other.top > self.bottom
      || other.bottom < self.top)
  }

  pub fn intersection_area(&self, other: &BBox) -> f32 {
    if !self.overlaps(other) {
      return 0.0;
    }
    (self.right.min(other.right) - self.left.max(other.left))
      * (self.bottom.min(other.bottom) - self.top.max(other.top))
  }

  /// 交并比，无重叠或并集为零时返回 0
  pub fn iou(&self, other: &BBox) -> f32 {
    let overlap_w = self.right.min(other.right) - self.left.max(other.left);
    let overlap_h = self.bottom.min(other.bottom) - self.top.max(other.top);

    if overlap_w <= 0.0 || overlap_h <= 0.0 {
      return 0.0;
    }

    let intersection = overlap_w * overlap_h;
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      (intersection / union).clamp(0.0, 1.0)
    } else {
      0.0
    }
  }

  /// 交集面积占两者中较大面积的比例是否超过 `area_threshold`
  pub fn intersects(&self, other: &BBox, area_threshold: f32) -> bool {
    let larger = self.area().max(other.area());
    if larger <= 0.0 {
      return false;
    }
    self.intersection_area(other) / larger > area_threshold
  }

  /// 若两框相交则扩展为二者的外接框，返回是否发生扩展
  pub fn expand(&mut self, other: &BBox) -> bool {
    if !self.overlaps(other) {
      return false;
    }
    self.left = self.left.min(other.left);
    self.top = self.top.min(other.top);
    self.right = self.right.max(other.right);
    self.bottom = self.bottom.max(other.bottom);
    true
  }

  /// 将四个坐标限制在 `[0, width] x [0, height]` 内
  pub fn clamp_to(&self, width: f32, height: f32) -> Self {
    Self {
      left: self.left.clamp(0.0, width),
      top: self.top.clamp(0.0, height),
      right: self.right.clamp(0.0, width),
      bottom: self.bottom.clamp(0.0, height),
    }
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }
}

impl From<[f32; 4]> for BBox {
  fn from(v: [f32; 4]) -> Self {
    BBox::new(v[0], v[1], v[2], v[3])
  }
}
