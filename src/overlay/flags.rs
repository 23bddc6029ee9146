// 该文件是 Yolonet 项目的一部分。
// src/overlay/flags.rs - 叠加绘制选项
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
  fmt,
  ops::{BitAnd, BitOr, BitOrAssign},
};

use tracing::error;

const MAX_FLAGS_LEN: usize = 256;

/// 需要绘制的元素位掩码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayFlags(u32);

impl OverlayFlags {
  pub const NONE: Self = Self(0);
  /// 半透明填充框
  pub const BOX: Self = Self(1 << 0);
  pub const LABEL: Self = Self(1 << 1);
  pub const CONFIDENCE: Self = Self(1 << 2);
  pub const TRACKING: Self = Self(1 << 3);
  /// 边框线
  pub const LINES: Self = Self(1 << 4);
  pub const DEFAULT: Self = Self(Self::BOX.0 | Self::LABEL.0 | Self::CONFIDENCE.0);
  pub const ALL: Self = Self(0x1f);

  pub const fn bits(&self) -> u32 {
    self.0
  }

  /// 未定义的位被丢弃
  pub const fn from_bits(bits: u32) -> Self {
    Self(bits & Self::ALL.0)
  }

  pub const fn contains(&self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }

  pub const fn is_empty(&self) -> bool {
    self.0 == 0
  }

  /// 是否需要绘制文字
  pub const fn has_text(&self) -> bool {
    self.0 & (Self::LABEL.0 | Self::CONFIDENCE.0 | Self::TRACKING.0) != 0
  }

  /// 解析 `box,label|conf` 形式的字符串，大小写与空白不敏感。
  /// 空输入返回默认值，未知项忽略。
  pub fn parse(s: Option<&str>) -> Self {
    let Some(s) = s else {
      return Self::DEFAULT;
    };
    if s.len() >= MAX_FLAGS_LEN {
      error!("叠加选项过长 ({} 字符), 使用默认值", s.len());
      return Self::DEFAULT;
    }

    let mut flags = Self::NONE;
    let mut tokens = 0usize;
    for token in s.split([',', '|']).map(str::trim).filter(|t| !t.is_empty()) {
      tokens += 1;
      match token.to_ascii_lowercase().as_str() {
        "box" => flags |= Self::BOX,
        "label" | "labels" => flags |= Self::LABEL,
        "conf" | "confidence" => flags |= Self::CONFIDENCE,
        "track" | "tracking" => flags |= Self::TRACKING,
        "line" | "lines" => flags |= Self::LINES,
        "default" => flags |= Self::DEFAULT,
        "none" => {}
        _ => {}
      }
    }

    if tokens == 0 { Self::DEFAULT } else { flags }
  }
}

impl Default for OverlayFlags {
  fn default() -> Self {
    Self::DEFAULT
  }
}

impl BitOr for OverlayFlags {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

impl BitOrAssign for OverlayFlags {
  fn bitor_assign(&mut self, rhs: Self) {
    self.0 |= rhs.0;
  }
}

impl BitAnd for OverlayFlags {
  type Output = Self;

  fn bitand(self, rhs: Self) -> Self {
    Self(self.0 & rhs.0)
  }
}

impl fmt::Display for OverlayFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_empty() {
      return f.write_str("none");
    }
    let names = [
      (Self::BOX, "box"),
      (Self::LABEL, "label"),
      (Self::CONFIDENCE, "conf"),
      (Self::TRACKING, "track"),
      (Self::LINES, "lines"),
    ];
    let parts: Vec<&str> = names
      .iter()
      .filter(|(flag, _)| self.contains(*flag))
      .map(|(_, name)| *name)
      .collect();
    f.write_str(&parts.join("|"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_box_conf() {
    let expected = OverlayFlags::BOX | OverlayFlags::CONFIDENCE;
    assert_eq!(OverlayFlags::parse(Some("box,conf")), expected);
    assert_eq!(OverlayFlags::parse(Some(" BOX | Conf ")), expected);
    assert_eq!(OverlayFlags::parse(Some("Box,CONFIDENCE")), expected);
  }

  #[test]
  fn empty_input_is_default() {
    assert_eq!(OverlayFlags::parse(None), OverlayFlags::DEFAULT);
    assert_eq!(OverlayFlags::parse(Some("")), OverlayFlags::DEFAULT);
    assert_eq!(OverlayFlags::parse(Some(" , | ")), OverlayFlags::DEFAULT);
  }

  #[test]
  fn unknown_tokens_are_ignored() {
    assert_eq!(
      OverlayFlags::parse(Some("lines,sparkles")),
      OverlayFlags::LINES
    );
    assert_eq!(OverlayFlags::parse(Some("none")), OverlayFlags::NONE);
    assert_eq!(
      OverlayFlags::parse(Some("default,track")),
      OverlayFlags::DEFAULT | OverlayFlags::TRACKING
    );
  }

  #[test]
  fn overlong_input_is_default() {
    let long = "box,".repeat(64);
    assert_eq!(long.len(), 256);
    assert_eq!(OverlayFlags::parse(Some(&long)), OverlayFlags::DEFAULT);
  }

  #[test]
  fn display_lists_flags() {
    assert_eq!(OverlayFlags::DEFAULT.to_string(), "box|label|conf");
    assert_eq!(OverlayFlags::NONE.to_string(), "none");
    assert_eq!(OverlayFlags::from_bits(0xff), OverlayFlags::ALL);
  }

  #[test]
  fn masks_combine() {
    let flags = OverlayFlags::DEFAULT | OverlayFlags::LINES;
    assert_eq!(flags & OverlayFlags::BOX, OverlayFlags::BOX);
    assert!((flags & OverlayFlags::TRACKING).is_empty());
    assert!(!(OverlayFlags::BOX & OverlayFlags::LINES).has_text());
  }
}
