// 该文件是 Yolonet 项目的一部分。
// src/classes.rs - 类别名称与颜色
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

/// 类别颜色的默认透明度
pub const DEFAULT_CLASS_ALPHA: u8 = 120;

#[derive(Error, Debug)]
pub enum ClassRegistryError {
  #[error("无法读取文件 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("颜色文件第 {line} 行格式错误: {content}")]
  InvalidColor { line: usize, content: String },
  #[error("类别数量必须大于 0")]
  NoClasses,
}

/// 类别索引到显示名称、synset 与 RGBA 颜色的映射，初始化后不可变
#[derive(Debug, Clone)]
pub struct ClassRegistry {
  descriptions: Vec<String>,
  synsets: Vec<String>,
  colors: Vec<[u8; 4]>,
}

fn read_file(path: &Path) -> Result<String, ClassRegistryError> {
  std::fs::read_to_string(path).map_err(|source| ClassRegistryError::IoError {
    path: path.to_path_buf(),
    source,
  })
}

fn placeholder(index: usize) -> String {
  format!("class #{}", index)
}

/// `n01440764` 形式的 synset
fn is_synset(token: &str) -> bool {
  token.len() == 9 && token.starts_with('n') && token[1..].bytes().all(|b| b.is_ascii_digit())
}

/// HSV 转 RGB，色相取 [0, 360)
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  [
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ]
}

/// 按色相均匀分布生成颜色
pub fn generate_color(index: usize, num_classes: usize, alpha: u8) -> [u8; 4] {
  let hue = (index as f32 / num_classes.max(1) as f32) * 360.0;
  let [r, g, b] = hsv_to_rgb(hue, 0.8, 0.9);
  [r, g, b, alpha]
}

/// 解析标签文本：每行 `<synset> <描述>` 或仅 `<描述>`，空行忽略
pub fn parse_labels(text: &str) -> Vec<(String, String)> {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(|line| match line.split_once(char::is_whitespace) {
      Some((first, rest)) if is_synset(first) => (first.to_string(), rest.trim().to_string()),
      _ => (line.to_string(), line.to_string()),
    })
    .collect()
}

/// 解析颜色文本：每行 `r g b [a]`，缺省 alpha 使用 `default_alpha`
pub fn parse_colors(text: &str, default_alpha: u8) -> Result<Vec<[u8; 4]>, ClassRegistryError> {
  let mut colors = Vec::new();
  for (idx, line) in text.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let invalid = || ClassRegistryError::InvalidColor {
      line: idx + 1,
      content: line.to_string(),
    };
    let values = line
      .split_whitespace()
      .map(|v| v.parse::<u8>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| invalid())?;
    let color = match values.as_slice() {
      [r, g, b] => [*r, *g, *b, default_alpha],
      [r, g, b, a] => [*r, *g, *b, *a],
      _ => return Err(invalid()),
    };
    colors.push(color);
  }
  Ok(colors)
}

impl ClassRegistry {
  /// 仅生成占位名称与颜色
  pub fn generated(num_classes: usize, alpha: u8) -> Result<Self, ClassRegistryError> {
    Self::from_parts(num_classes, Vec::new(), Vec::new(), alpha)
  }

  /// 类别数量由网络输出决定；标签不足补占位名，多余的忽略
  pub fn from_parts(
    num_classes: usize,
    labels: Vec<(String, String)>,
    colors: Vec<[u8; 4]>,
    alpha: u8,
  ) -> Result<Self, ClassRegistryError> {
    if num_classes == 0 {
      return Err(ClassRegistryError::NoClasses);
    }
    if labels.len() > num_classes {
      warn!(
        "标签数量 {} 多于类别数量 {}, 多余的将被忽略",
        labels.len(),
        num_classes
      );
    }

    let mut descriptions = Vec::with_capacity(num_classes);
    let mut synsets = Vec::with_capacity(num_classes);
    let mut labels = labels.into_iter();
    for index in 0..num_classes {
      let (synset, description) = labels
        .next()
        .unwrap_or_else(|| (placeholder(index), placeholder(index)));
      synsets.push(synset);
      descriptions.push(description);
    }

    let colors = (0..num_classes)
      .map(|index| {
        colors
          .get(index)
          .copied()
          .unwrap_or_else(|| generate_color(index, num_classes, alpha))
      })
      .collect();

    Ok(Self {
      descriptions,
      synsets,
      colors,
    })
  }

  pub fn load(
    num_classes: usize,
    labels: Option<&Path>,
    colors: Option<&Path>,
    alpha: u8,
  ) -> Result<Self, ClassRegistryError> {
    let labels = match labels {
      Some(path) => {
        info!("加载类别标签: {}", path.display());
        parse_labels(&read_file(path)?)
      }
      None => Vec::new(),
    };
    let colors = match colors {
      Some(path) => {
        info!("加载类别颜色: {}", path.display());
        parse_colors(&read_file(path)?, alpha)?
      }
      None => Vec::new(),
    };

    let registry = Self::from_parts(num_classes, labels, colors, alpha)?;
    info!("类别数量: {}", registry.len());
    Ok(registry)
  }

  pub fn len(&self) -> usize {
    self.descriptions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.descriptions.is_empty()
  }

  pub fn description(&self, class_id: u32) -> Option<&str> {
    self.descriptions.get(class_id as usize).map(String::as_str)
  }

  pub fn synset(&self, class_id: u32) -> Option<&str> {
    self.synsets.get(class_id as usize).map(String::as_str)
  }

  pub fn color(&self, class_id: u32) -> Option<[u8; 4]> {
    self.colors.get(class_id as usize).copied()
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn labels_with_and_without_synset() {
    let labels = parse_labels("n01440764 tench, Tinca tinca\n\nperson\n  bicycle  \n");
    assert_eq!(labels.len(), 3);
    assert_eq!(labels[0].0, "n01440764");
    assert_eq!(labels[0].1, "tench, Tinca tinca");
    assert_eq!(labels[1], ("person".to_string(), "person".to_string()));
    assert_eq!(labels[2].1, "bicycle");
  }

  #[test]
  fn colors_with_optional_alpha() {
    let colors = parse_colors("255 0 0\n0 255 0 200\n", 120).unwrap();
    assert_eq!(colors, vec![[255, 0, 0, 120], [0, 255, 0, 200]]);
    assert!(matches!(
      parse_colors("1 2\n", 120),
      Err(ClassRegistryError::InvalidColor { line: 1, .. })
    ));
    assert!(parse_colors("1 2 300\n", 120).is_err());
  }

  #[test]
  fn missing_labels_get_placeholders() {
    let registry = ClassRegistry::from_parts(
      3,
      vec![("person".into(), "person".into())],
      Vec::new(),
      DEFAULT_CLASS_ALPHA,
    )
    .unwrap();
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.description(0), Some("person"));
    assert_eq!(registry.description(2), Some("class #2"));
    assert_eq!(registry.description(3), None);
    assert_eq!(registry.color(1).unwrap()[3], DEFAULT_CLASS_ALPHA);
  }

  #[test]
  fn extra_labels_are_ignored() {
    let labels = parse_labels("a\nb\nc\n");
    let registry = ClassRegistry::from_parts(2, labels, Vec::new(), 100).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.description(1), Some("b"));
  }

  #[test]
  fn generated_colors_differ() {
    let registry = ClassRegistry::generated(4, 90).unwrap();
    let a = registry.color(0).unwrap();
    let b = registry.color(2).unwrap();
    assert_ne!(a, b);
    assert_eq!(a[3], 90);
  }

  #[test]
  fn load_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("labels.txt");
    let colors = dir.path().join("colors.txt");
    std::fs::File::create(&labels)
      .unwrap()
      .write_all(b"person\ncar\n")
      .unwrap();
    std::fs::write(&colors, "10 20 30\n").unwrap();

    let registry =
      ClassRegistry::load(2, Some(&labels), Some(&colors), DEFAULT_CLASS_ALPHA).unwrap();
    assert_eq!(registry.description(1), Some("car"));
    assert_eq!(registry.color(0), Some([10, 20, 30, DEFAULT_CLASS_ALPHA]));
    assert_ne!(registry.color(1), Some([10, 20, 30, DEFAULT_CLASS_ALPHA]));
  }

  #[test]
  fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.txt");
    assert!(matches!(
      ClassRegistry::load(2, Some(&missing), None, DEFAULT_CLASS_ALPHA),
      Err(ClassRegistryError::IoError { .. })
    ));
  }

  #[test]
  fn zero_classes_rejected() {
    assert!(matches!(
      ClassRegistry::generated(0, DEFAULT_CLASS_ALPHA),
      Err(ClassRegistryError::NoClasses)
    ));
  }
}
