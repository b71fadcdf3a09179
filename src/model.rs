// 该文件是 Shiliang （食量） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use thiserror::Error;
use tracing::info;

/// 推理输入边长
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// 置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.3;
/// NMS IOU 阈值
pub const DEFAULT_IOU: f32 = 0.7;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  pub input_size: u32,
  pub confidence: f32,
  pub iou: f32,
}

impl Default for DetectParams {
  fn default() -> Self {
    Self {
      input_size: DEFAULT_INPUT_SIZE,
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，按原图归一化
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("标签文件为空")]
  Empty,
  #[error("模型元数据中的类别名称格式错误: {0}")]
  MetadataFormat(String),
}

/// 类别名称表，下标即类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  /// 从 JSON 字符串数组加载，例如 `["apple", "banana"]`
  pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self, LabelsError> {
    let path = path.as_ref();
    info!("加载类别标签: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_json_str(&content)
  }

  pub fn from_json_str(content: &str) -> Result<Self, LabelsError> {
    let names: Vec<String> = serde_json::from_str(content)?;
    if names.is_empty() {
      return Err(LabelsError::Empty);
    }
    Ok(Labels { names })
  }

  /// 从模型元数据 `names` 字段加载，例如 `{0: 'apple', 1: 'banana'}`。
  ///
  /// 编号必须从 0 开始连续。
  pub fn from_names_metadata(content: &str) -> Result<Self, LabelsError> {
    let bad = |msg: &str| LabelsError::MetadataFormat(format!("{}: {}", msg, content));

    let body = content
      .trim()
      .strip_prefix('{')
      .and_then(|s| s.strip_suffix('}'))
      .ok_or_else(|| bad("缺少花括号"))?;

    let mut entries: Vec<(usize, String)> = Vec::new();
    let mut chars = body.chars().peekable();
    loop {
      while chars.next_if(|c| c.is_whitespace()).is_some() {}
      if chars.peek().is_none() {
        break;
      }

      let mut index = String::new();
      while let Some(c) = chars.next_if(char::is_ascii_digit) {
        index.push(c);
      }
      let index: usize = index.parse().map_err(|_| bad("类别编号无效"))?;

      while chars.next_if(|c| c.is_whitespace()).is_some() {}
      if chars.next() != Some(':') {
        return Err(bad("缺少冒号"));
      }
      while chars.next_if(|c| c.is_whitespace()).is_some() {}

      let quote = chars
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| bad("类别名称缺少引号"))?;
      let mut name = String::new();
      loop {
        match chars.next() {
          Some('\\') => name.extend(chars.next()),
          Some(c) if c == quote => break,
          Some(c) => name.push(c),
          None => return Err(bad("类别名称未结束")),
        }
      }
      entries.push((index, name));

      while chars.next_if(|c| c.is_whitespace()).is_some() {}
      match chars.next() {
        Some(',') | None => {}
        Some(_) => return Err(bad("缺少逗号")),
      }
    }

    if entries.is_empty() {
      return Err(LabelsError::Empty);
    }
    entries.sort_by_key(|(index, _)| *index);
    if entries.iter().enumerate().any(|(i, (index, _))| i != *index) {
      return Err(bad("类别编号不连续"));
    }
    Ok(Labels {
      names: entries.into_iter().map(|(_, name)| name).collect(),
    })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn to_label_str(&self, class_id: usize) -> String {
    self
      .names
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }
}

impl From<Vec<String>> for Labels {
  fn from(names: Vec<String>) -> Self {
    Labels { names }
  }
}

#[cfg(feature = "model_yolo_onnx")]
mod yolo_onnx;
#[cfg(feature = "model_yolo_onnx")]
pub use self::yolo_onnx::{YoloOnnx, YoloOnnxBuilder, YoloOnnxError};
