// 该文件是 Yolonet 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::detection::Candidate;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_TOP_K: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nms {
  pub iou_threshold: f32,
  /// 只在同类之间抑制
  pub class_aware: bool,
  pub top_k: usize,
}

impl Default for Nms {
  fn default() -> Self {
    Self {
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      class_aware: true,
      top_k: DEFAULT_TOP_K,
    }
  }
}

impl Nms {
  pub fn new(iou_threshold: f32, class_aware: bool, top_k: usize) -> Self {
    Self {
      iou_threshold,
      class_aware,
      top_k,
    }
  }

  /// 按置信度降序保留，IoU 超过阈值的被抑制；同分保持输入顺序
  pub fn apply<S>(&self, mut candidates: Vec<Candidate<S>>) -> Vec<Candidate<S>> {
    let total = candidates.len();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = vec![false; total];
    let mut suppressed = vec![false; total];
    let mut kept = 0usize;
    for i in 0..total {
      if kept >= self.top_k {
        break;
      }
      if suppressed[i] {
        continue;
      }
      keep[i] = true;
      kept += 1;

      let current = &candidates[i];
      for j in (i + 1)..total {
        if suppressed[j] {
          continue;
        }
        let other = &candidates[j];
        if self.class_aware && other.class_id != current.class_id {
          continue;
        }
        if current.bbox.iou(&other.bbox) > self.iou_threshold {
          suppressed[j] = true;
        }
      }
    }

    debug!("NMS: {} 个候选框保留 {} 个", total, kept);
    candidates
      .into_iter()
      .zip(keep)
      .filter_map(|(c, k)| k.then_some(c))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{detection::ImageSpace, geometry::BBox};

  fn cand(l: f32, t: f32, r: f32, b: f32, score: f32, class_id: u32) -> Candidate<ImageSpace> {
    Candidate::new(BBox::new(l, t, r, b), score, class_id)
  }

  fn summary(c: &[Candidate<ImageSpace>]) -> Vec<(u32, f32, [f32; 4])> {
    c.iter()
      .map(|c| (c.class_id, c.score, c.bbox.to_array()))
      .collect()
  }

  #[test]
  fn suppresses_lower_overlapping_box() {
    // 10x10 与 10x10 平移 2.5，IoU = 75 / 125 = 0.6
    let a = cand(0.0, 0.0, 10.0, 10.0, 0.6, 0);
    let b = cand(0.0, 2.5, 10.0, 12.5, 0.8, 0);
    assert!((a.bbox.iou(&b.bbox) - 0.6).abs() < 1e-6);

    let out = Nms::default().apply(vec![a, b]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].score, 0.8);
  }

  #[test]
  fn class_aware_keeps_other_classes() {
    let a = cand(0.0, 0.0, 10.0, 10.0, 0.9, 0);
    let b = cand(0.0, 0.0, 10.0, 10.0, 0.8, 1);
    assert_eq!(Nms::default().apply(vec![a, b]).len(), 2);

    let agnostic = Nms {
      class_aware: false,
      ..Nms::default()
    };
    assert_eq!(agnostic.apply(vec![a, b]).len(), 1);
  }

  #[test]
  fn equal_iou_is_not_suppressed() {
    let nms = Nms::new(0.6, true, 10);
    let a = cand(0.0, 0.0, 10.0, 10.0, 0.9, 0);
    let b = cand(0.0, 2.5, 10.0, 12.5, 0.8, 0);
    let iou = a.bbox.iou(&b.bbox);
    let nms = Nms {
      iou_threshold: iou,
      ..nms
    };
    assert_eq!(nms.apply(vec![a, b]).len(), 2);
  }

  #[test]
  fn ties_keep_input_order() {
    let a = cand(0.0, 0.0, 10.0, 10.0, 0.7, 3);
    let b = cand(100.0, 0.0, 110.0, 10.0, 0.7, 4);
    let out = Nms::default().apply(vec![a, b]);
    assert_eq!(out[0].class_id, 3);
    assert_eq!(out[1].class_id, 4);
  }

  #[test]
  fn truncates_to_top_k() {
    let input: Vec<_> = (0..20)
      .map(|i| {
        let x = i as f32 * 20.0;
        cand(x, 0.0, x + 10.0, 10.0, 0.5 + i as f32 * 0.01, 0)
      })
      .collect();
    let out = Nms::new(0.45, true, 5).apply(input);
    assert_eq!(out.len(), 5);
    assert!((out[0].score - 0.69).abs() < 1e-6);
  }

  #[test]
  fn applying_twice_changes_nothing() {
    let input = vec![
      cand(0.0, 0.0, 10.0, 10.0, 0.9, 0),
      cand(1.0, 1.0, 11.0, 11.0, 0.85, 0),
      cand(5.0, 5.0, 15.0, 15.0, 0.7, 0),
      cand(0.0, 0.0, 10.0, 10.0, 0.6, 1),
      cand(50.0, 50.0, 60.0, 60.0, 0.3, 2),
      cand(52.0, 50.0, 62.0, 60.0, 0.95, 2),
    ];
    let nms = Nms::default();
    let once = nms.apply(input);
    let twice = nms.apply(once.clone());
    assert_eq!(summary(&once), summary(&twice));
  }

  #[test]
  fn empty_input() {
    let out: Vec<Candidate<ImageSpace>> = Nms::default().apply(Vec::new());
    assert!(out.is_empty());
  }
}
