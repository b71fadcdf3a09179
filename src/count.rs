// 该文件是 Shiliang （食量） 项目的一部分。
// src/count.rs - 检测结果计数聚合
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

use indexmap::IndexMap;
use tracing::debug;

use crate::model::DetectItem;

/// 名称归一化：去掉首尾空白并转为小写。
///
/// 检测类别名与营养表的 `Food Item` 列都只经过这一个函数，
/// 之后两边只做精确的字符串相等比较。对已归一化的名称再次调用结果不变。
pub fn normalize_name(name: &str) -> String {
  name.trim().to_lowercase()
}

/// 展示用名称：首字母大写，其余小写
pub fn display_name(name: &str) -> String {
  let mut chars = name.chars();
  match chars.next() {
    Some(first) => first
      .to_uppercase()
      .chain(chars.flat_map(char::to_lowercase))
      .collect(),
    None => String::new(),
  }
}

/// 每种食物的数量表，键为归一化名称。
///
/// 遍历顺序为该名称第一次被检测到的顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemCount {
  entries: IndexMap<String, u32>,
}

impl ItemCount {
  pub fn new() -> Self {
    Self::default()
  }

  /// 为 `label` 计数加一，名称先做归一化
  pub fn tally(&mut self, label: &str) {
    *self.entries.entry(normalize_name(label)).or_insert(0) += 1;
  }

  /// 替换已有键的数量；键不存在时返回 `false` 且不做任何修改
  pub fn replace(&mut self, key: &str, count: u32) -> bool {
    match self.entries.get_mut(key) {
      Some(value) => {
        *value = count;
        true
      }
      None => false,
    }
  }

  pub fn get(&self, key: &str) -> Option<u32> {
    self.entries.get(key).copied()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
    self.entries.iter().map(|(name, count)| (name.as_str(), *count))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 所有数量之和
  pub fn total(&self) -> u64 {
    self.entries.values().map(|count| u64::from(*count)).sum()
  }
}

impl<S: AsRef<str>> FromIterator<S> for ItemCount {
  fn from_iter<T: IntoIterator<Item = S>>(labels: T) -> Self {
    let mut counts = ItemCount::new();
    for label in labels {
      counts.tally(label.as_ref());
    }
    counts
  }
}

/// 将一次推理的全部检测项聚合为数量表，置信度在此之后不再保留
pub fn aggregate(items: &[DetectItem]) -> ItemCount {
  let counts: ItemCount = items.iter().map(|item| item.label.as_str()).collect();
  debug!("聚合 {} 个检测项，得到 {} 种食物", items.len(), counts.len());
  counts
}
