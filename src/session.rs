// 该文件是 Shiliang （食量） 项目的一部分。
// src/session.rs - 单张图像的识别会话
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

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  count::{ItemCount, aggregate, normalize_name},
  model::DetectItem,
  nutrition::{ItemResolution, NutritionTable},
};

/// 会话所处阶段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
  /// 尚未提交图像，或上一次会话已清空
  #[default]
  Idle,
  /// 图像已交给检测器，等待结果
  Detecting,
  /// 已由检测结果得到数量表
  Aggregated,
  /// 正在接收用户修改的数量
  Reconciling,
  /// 所有营养结果都已交给展示端
  Resolved,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
  #[error("当前没有进行中的识别")]
  NoActiveScan,
  #[error("识别结果中没有 '{0}'")]
  UnknownItem(String),
  #[error("阶段 {from:?} 不能执行 {action}")]
  InvalidTransition {
    from: ScanPhase,
    action: &'static str,
  },
}

/// 一张图像对应的会话状态。
///
/// 会话由调用方独占持有并以 `&mut` 在流水线中传递；
/// 每提交一张新图像，之前的数量表和修改都会被整体丢弃。
#[derive(Debug, Default)]
pub struct ScanSession {
  phase: ScanPhase,
  scan_id: u64,
  detected: ItemCount,
  counts: ItemCount,
}

impl ScanSession {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn phase(&self) -> ScanPhase {
    self.phase
  }

  /// 已提交的图像序号，从 1 开始；尚未提交时为 0
  pub fn scan_id(&self) -> u64 {
    self.scan_id
  }

  /// 当前数量（包含用户修改）
  pub fn counts(&self) -> &ItemCount {
    &self.counts
  }

  /// 检测器给出的原始数量
  pub fn detected(&self) -> &ItemCount {
    &self.detected
  }

  /// 清空会话，回到 `Idle`
  pub fn reset(&mut self) {
    self.detected = ItemCount::new();
    self.counts = ItemCount::new();
    self.phase = ScanPhase::Idle;
  }

  /// 提交新图像：先清空（`Idle`）再进入 `Detecting`
  pub fn begin_image(&mut self) {
    if !self.counts.is_empty() {
      debug!("丢弃上一张图像的 {} 种食物计数", self.counts.len());
    }
    self.reset();
    self.scan_id += 1;
    self.phase = ScanPhase::Detecting;
    info!("开始第 {} 次识别", self.scan_id);
  }

  /// 用检测结果建立数量表
  pub fn aggregate(&mut self, items: &[DetectItem]) -> Result<&ItemCount, SessionError> {
    if self.phase != ScanPhase::Detecting {
      return Err(SessionError::InvalidTransition {
        from: self.phase,
        action: "aggregate",
      });
    }

    self.counts = aggregate(items);
    self.detected = self.counts.clone();
    self.phase = ScanPhase::Aggregated;
    if self.counts.is_empty() {
      info!("第 {} 次识别没有检测到食物", self.scan_id);
    } else {
      info!(
        "第 {} 次识别检测到 {} 种食物，共 {} 个",
        self.scan_id,
        self.counts.len(),
        self.counts.total()
      );
    }
    Ok(&self.counts)
  }

  /// 用户修改某种食物的数量，只能修改已检测到的食物
  pub fn apply_override(&mut self, key: &str, count: u32) -> Result<(), SessionError> {
    match self.phase {
      ScanPhase::Aggregated | ScanPhase::Reconciling | ScanPhase::Resolved => {}
      ScanPhase::Idle | ScanPhase::Detecting => return Err(SessionError::NoActiveScan),
    }

    let key = normalize_name(key);
    if !self.counts.replace(&key, count) {
      warn!("忽略未检测到的食物数量修改: {}", key);
      return Err(SessionError::UnknownItem(key));
    }

    debug!("食物 {} 的数量修改为 {}", key, count);
    self.phase = ScanPhase::Reconciling;
    Ok(())
  }

  /// 检测器给出的原始数量
  pub fn detected_count(&self, key: &str) -> Option<u32> {
    self.detected.get(key)
  }

  fn ensure_aggregated(&self) -> Result<(), SessionError> {
    match self.phase {
      ScanPhase::Aggregated | ScanPhase::Reconciling | ScanPhase::Resolved => Ok(()),
      ScanPhase::Idle | ScanPhase::Detecting => Err(SessionError::NoActiveScan),
    }
  }

  /// 解析单个食物，不改变阶段
  pub fn resolve_item(
    &self,
    table: &NutritionTable,
    key: &str,
  ) -> Result<ItemResolution, SessionError> {
    self.ensure_aggregated()?;
    let count = self
      .counts
      .get(key)
      .ok_or_else(|| SessionError::UnknownItem(key.to_string()))?;
    Ok(ItemResolution {
      name: key.to_string(),
      count,
      breakdown: table.resolve(key, count),
    })
  }

  /// 所有结果都已展示，进入 `Resolved`
  pub fn finish(&mut self) -> Result<(), SessionError> {
    self.ensure_aggregated()?;
    self.phase = ScanPhase::Resolved;
    Ok(())
  }

  /// 解析全部食物并进入 `Resolved`
  pub fn resolve(&mut self, table: &NutritionTable) -> Result<Vec<ItemResolution>, SessionError> {
    self.ensure_aggregated()?;
    let resolved = table.resolve_all(&self.counts);
    self.phase = ScanPhase::Resolved;
    Ok(resolved)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::nutrition::{LookupMiss, NutritionRecord, Nutrients};

  fn item(label: &str) -> DetectItem {
    DetectItem {
      label: label.to_string(),
      score: 0.8,
      bbox: [0.1, 0.1, 0.2, 0.2],
    }
  }

  fn table() -> NutritionTable {
    NutritionTable::from_records([
      NutritionRecord {
        name: "Banana".to_string(),
        per_unit: Nutrients {
          calories: 90.0,
          protein_g: 1.1,
          carbohydrates_g: 23.0,
          fat_g: 0.3,
          fiber_g: 2.6,
        },
      },
      NutritionRecord {
        name: "apple".to_string(),
        per_unit: Nutrients {
          calories: 95.0,
          protein_g: 0.5,
          carbohydrates_g: 25.0,
          fat_g: 0.3,
          fiber_g: 4.4,
        },
      },
    ])
    .unwrap()
  }

  fn scanned(labels: &[&str]) -> ScanSession {
    let mut session = ScanSession::new();
    session.begin_image();
    let items: Vec<_> = labels.iter().map(|l| item(l)).collect();
    session.aggregate(&items).unwrap();
    session
  }

  #[test]
  fn walks_through_phases() {
    let mut session = ScanSession::new();
    assert_eq!(session.phase(), ScanPhase::Idle);

    session.begin_image();
    assert_eq!(session.phase(), ScanPhase::Detecting);

    session.aggregate(&[item("Banana")]).unwrap();
    assert_eq!(session.phase(), ScanPhase::Aggregated);

    session.apply_override("banana", 2).unwrap();
    assert_eq!(session.phase(), ScanPhase::Reconciling);
    session.apply_override("banana", 4).unwrap();
    assert_eq!(session.phase(), ScanPhase::Reconciling);

    session.resolve(&table()).unwrap();
    assert_eq!(session.phase(), ScanPhase::Resolved);

    session.apply_override("banana", 1).unwrap();
    assert_eq!(session.phase(), ScanPhase::Reconciling);
  }

  #[test]
  fn override_then_resolve_scales_by_override() {
    let mut session = scanned(&["Banana"]);
    session.apply_override("banana", 3).unwrap();

    let resolved = session.resolve(&table()).unwrap();
    let breakdown = resolved[0].breakdown.as_ref().unwrap();
    assert_eq!(breakdown.count, 3);
    assert_eq!(breakdown.totals.calories, 270.0);
    assert_eq!(breakdown.totals, table().get("banana").unwrap().per_unit.scale(3));
    assert_eq!(session.detected_count("banana"), Some(1));
  }

  #[test]
  fn overrides_are_idempotent() {
    let mut once = scanned(&["apple", "banana"]);
    once.apply_override("apple", 7).unwrap();

    let mut twice = scanned(&["apple", "banana"]);
    twice.apply_override("apple", 7).unwrap();
    twice.apply_override("apple", 7).unwrap();

    assert_eq!(once.counts(), twice.counts());
    assert_eq!(twice.counts().get("banana"), Some(1));
  }

  #[test]
  fn override_key_is_normalized() {
    let mut session = scanned(&["apple"]);
    session.apply_override("  Apple ", 0).unwrap();
    assert_eq!(session.counts().get("apple"), Some(0));
  }

  #[test]
  fn override_of_undetected_item_is_rejected() {
    let mut session = scanned(&["apple"]);
    assert_eq!(
      session.apply_override("kiwi", 2),
      Err(SessionError::UnknownItem("kiwi".to_string()))
    );
    assert!(!session.counts().contains("kiwi"));
    assert_eq!(session.phase(), ScanPhase::Aggregated);
  }

  #[test]
  fn override_without_scan_is_rejected() {
    let mut session = ScanSession::new();
    assert_eq!(
      session.apply_override("apple", 2),
      Err(SessionError::NoActiveScan)
    );
    session.begin_image();
    assert_eq!(
      session.apply_override("apple", 2),
      Err(SessionError::NoActiveScan)
    );
  }

  #[test]
  fn new_image_clears_previous_counts() {
    let mut session = scanned(&["apple", "apple", "banana"]);
    session.apply_override("banana", 9).unwrap();

    session.begin_image();
    assert!(session.counts().is_empty());
    assert!(session.detected().is_empty());
    session.aggregate(&[item("apple")]).unwrap();

    assert_eq!(session.counts().get("apple"), Some(1));
    assert_eq!(session.counts().get("banana"), None);
    assert_eq!(session.scan_id(), 2);
  }

  #[test]
  fn aggregate_outside_detecting_is_rejected() {
    let mut session = scanned(&["apple"]);
    assert!(matches!(
      session.aggregate(&[item("banana")]),
      Err(SessionError::InvalidTransition { .. })
    ));
    assert_eq!(session.counts().get("apple"), Some(1));
  }

  #[test]
  fn missing_item_resolves_to_lookup_miss() {
    let mut session = scanned(&["kiwi"]);
    let resolved = session.resolve(&table()).unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].breakdown, Err(LookupMiss("kiwi".to_string())));
  }

  #[test]
  fn empty_scan_resolves_to_nothing() {
    let mut session = scanned(&[]);
    assert!(session.resolve(&table()).unwrap().is_empty());
    assert_eq!(session.phase(), ScanPhase::Resolved);
  }
}

#[cfg(test)]
mod property_tests {
  use super::*;
  use crate::nutrition::{NutritionRecord, Nutrients};
  use proptest::prelude::*;

  fn nutrients() -> impl Strategy<Value = Nutrients> {
    (
      0.0f64..1000.0,
      0.0f64..100.0,
      0.0f64..200.0,
      0.0f64..100.0,
      0.0f64..50.0,
    )
      .prop_map(|(calories, protein_g, carbohydrates_g, fat_g, fiber_g)| Nutrients {
        calories,
        protein_g,
        carbohydrates_g,
        fat_g,
        fiber_g,
      })
  }

  fn detection(label: &str) -> DetectItem {
    DetectItem {
      label: label.to_string(),
      score: 0.5,
      bbox: [0.0, 0.0, 1.0, 1.0],
    }
  }

  proptest! {
    #[test]
    fn override_then_resolve_scales_every_field(
      per_unit in nutrients(),
      detected in 1usize..8,
      count in 0u32..500,
    ) {
      let table = NutritionTable::from_records([NutritionRecord {
        name: "Mango".to_string(),
        per_unit,
      }])
      .unwrap();

      let mut session = ScanSession::new();
      session.begin_image();
      let items: Vec<_> = (0..detected).map(|_| detection(" mango")).collect();
      session.aggregate(&items).unwrap();
      session.apply_override("MANGO", count).unwrap();

      let resolved = session.resolve(&table).unwrap();
      prop_assert_eq!(resolved.len(), 1);
      let breakdown = resolved[0].breakdown.as_ref().unwrap();
      let factor = f64::from(count);
      prop_assert_eq!(breakdown.count, count);
      prop_assert_eq!(breakdown.totals.calories, per_unit.calories * factor);
      prop_assert_eq!(breakdown.totals.protein_g, per_unit.protein_g * factor);
      prop_assert_eq!(breakdown.totals.carbohydrates_g, per_unit.carbohydrates_g * factor);
      prop_assert_eq!(breakdown.totals.fat_g, per_unit.fat_g * factor);
      prop_assert_eq!(breakdown.totals.fiber_g, per_unit.fiber_g * factor);
      prop_assert_eq!(session.detected_count("mango"), Some(detected as u32));
    }

    #[test]
    fn new_image_forgets_every_override(count in 0u32..100, detected in 1usize..8) {
      let mut session = ScanSession::new();
      session.begin_image();
      let items: Vec<_> = (0..detected).map(|_| detection("egg")).collect();
      session.aggregate(&items).unwrap();
      session.apply_override("egg", count).unwrap();

      session.begin_image();
      prop_assert!(session.counts().is_empty());
      session.aggregate(&[detection("egg")]).unwrap();
      prop_assert_eq!(session.counts().get("egg"), Some(1));
    }
  }
}
