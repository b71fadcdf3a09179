// 该文件是 Shiliang （食量） 项目的一部分。
// src/nutrition.rs - 营养参考表与营养值解析
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

use std::{collections::HashMap, io::Read, ops::Add, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::count::{ItemCount, normalize_name};

/// 营养表必须具有的列，顺序也必须一致
pub const NUTRITION_COLUMNS: [&str; 6] = [
  "Food Item",
  "Calories",
  "Protein (g)",
  "Carbohydrates (g)",
  "Fat (g)",
  "Fiber (g)",
];

#[derive(Error, Debug)]
pub enum NutritionTableError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("CSV 解析错误: {0}")]
  CsvError(#[from] csv::Error),
  #[error("表头不匹配: 期望 {expected:?}, 实际 {found:?}")]
  HeaderMismatch {
    expected: Vec<String>,
    found: Vec<String>,
  },
  #[error("第 {row} 行 '{item}' 的 {column} 无效: {value}")]
  InvalidValue {
    row: usize,
    item: String,
    column: &'static str,
    value: f64,
  },
  #[error("第 {row} 行食物名称为空")]
  EmptyName { row: usize },
  #[error("第 {row} 行食物 '{item}' 重复")]
  DuplicateItem { row: usize, item: String },
}

/// 某种食物没有营养数据
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("没有 '{0}' 的营养数据")]
pub struct LookupMiss(pub String);

/// 五项营养数值
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Nutrients {
  pub calories: f64,
  pub protein_g: f64,
  pub carbohydrates_g: f64,
  pub fat_g: f64,
  pub fiber_g: f64,
}

impl Nutrients {
  /// 每一项都乘以数量，不做舍入
  pub fn scale(&self, count: u32) -> Nutrients {
    let factor = f64::from(count);
    Nutrients {
      calories: self.calories * factor,
      protein_g: self.protein_g * factor,
      carbohydrates_g: self.carbohydrates_g * factor,
      fat_g: self.fat_g * factor,
      fiber_g: self.fiber_g * factor,
    }
  }

  fn fields(&self) -> [(&'static str, f64); 5] {
    [
      (NUTRITION_COLUMNS[1], self.calories),
      (NUTRITION_COLUMNS[2], self.protein_g),
      (NUTRITION_COLUMNS[3], self.carbohydrates_g),
      (NUTRITION_COLUMNS[4], self.fat_g),
      (NUTRITION_COLUMNS[5], self.fiber_g),
    ]
  }
}

impl Add for Nutrients {
  type Output = Nutrients;

  fn add(self, rhs: Nutrients) -> Nutrients {
    Nutrients {
      calories: self.calories + rhs.calories,
      protein_g: self.protein_g + rhs.protein_g,
      carbohydrates_g: self.carbohydrates_g + rhs.carbohydrates_g,
      fat_g: self.fat_g + rhs.fat_g,
      fiber_g: self.fiber_g + rhs.fiber_g,
    }
  }
}

/// 营养表中的一行，数值为单份食物的含量
#[derive(Debug, Clone, PartialEq)]
pub struct NutritionRecord {
  pub name: String,
  pub per_unit: Nutrients,
}

/// 单份营养值乘以数量后的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NutritionBreakdown {
  pub name: String,
  pub count: u32,
  pub totals: Nutrients,
}

impl NutritionBreakdown {
  /// 多个食物营养值的合计
  pub fn sum<'a>(breakdowns: impl IntoIterator<Item = &'a NutritionBreakdown>) -> Nutrients {
    breakdowns
      .into_iter()
      .fold(Nutrients::default(), |acc, b| acc + b.totals)
  }
}

/// 单个食物的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResolution {
  pub name: String,
  pub count: u32,
  pub breakdown: Result<NutritionBreakdown, LookupMiss>,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
  #[serde(rename = "Food Item")]
  food_item: String,
  #[serde(rename = "Calories")]
  calories: f64,
  #[serde(rename = "Protein (g)")]
  protein: f64,
  #[serde(rename = "Carbohydrates (g)")]
  carbohydrates: f64,
  #[serde(rename = "Fat (g)")]
  fat: f64,
  #[serde(rename = "Fiber (g)")]
  fiber: f64,
}

/// 启动时加载一次的营养参考表，按归一化名称索引
#[derive(Debug, Clone, Default)]
pub struct NutritionTable {
  records: HashMap<String, NutritionRecord>,
}

impl NutritionTable {
  pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, NutritionTableError> {
    let path = path.as_ref();
    info!("加载营养表: {}", path.display());
    let file = std::fs::File::open(path)?;
    let table = Self::from_reader(file)?;
    info!("营养表加载完成，共 {} 种食物", table.len());
    Ok(table)
  }

  pub fn from_reader<R: Read>(reader: R) -> Result<Self, NutritionTableError> {
    let mut reader = csv::ReaderBuilder::new()
      .trim(csv::Trim::All)
      .from_reader(reader);

    let found: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if found != NUTRITION_COLUMNS {
      return Err(NutritionTableError::HeaderMismatch {
        expected: NUTRITION_COLUMNS.iter().map(|c| c.to_string()).collect(),
        found,
      });
    }

    let mut table = NutritionTable::default();
    for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
      // 表头占第 1 行
      let row_number = index + 2;
      let row = row?;
      let record = NutritionRecord {
        name: row.food_item,
        per_unit: Nutrients {
          calories: row.calories,
          protein_g: row.protein,
          carbohydrates_g: row.carbohydrates,
          fat_g: row.fat,
          fiber_g: row.fiber,
        },
      };
      table.insert(row_number, record)?;
    }
    Ok(table)
  }

  pub fn from_records(
    records: impl IntoIterator<Item = NutritionRecord>,
  ) -> Result<Self, NutritionTableError> {
    let mut table = NutritionTable::default();
    for (index, record) in records.into_iter().enumerate() {
      table.insert(index + 1, record)?;
    }
    Ok(table)
  }

  fn insert(&mut self, row: usize, record: NutritionRecord) -> Result<(), NutritionTableError> {
    let name = normalize_name(&record.name);
    if name.is_empty() {
      return Err(NutritionTableError::EmptyName { row });
    }

    for (column, value) in record.per_unit.fields() {
      if !value.is_finite() || value < 0.0 {
        return Err(NutritionTableError::InvalidValue {
          row,
          item: name,
          column,
          value,
        });
      }
    }

    if self.records.contains_key(&name) {
      return Err(NutritionTableError::DuplicateItem { row, item: name });
    }

    debug!("营养表第 {} 行: {}", row, name);
    self.records.insert(
      name.clone(),
      NutritionRecord {
        name,
        per_unit: record.per_unit,
      },
    );
    Ok(())
  }

  pub fn get(&self, key: &str) -> Option<&NutritionRecord> {
    self.records.get(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.records.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// 查找 `key` 并按数量放大营养值；`key` 必须已经归一化
  pub fn resolve(&self, key: &str, count: u32) -> Result<NutritionBreakdown, LookupMiss> {
    let record = self
      .records
      .get(key)
      .ok_or_else(|| LookupMiss(key.to_string()))?;

    Ok(NutritionBreakdown {
      name: record.name.clone(),
      count,
      totals: record.per_unit.scale(count),
    })
  }

  /// 按数量表顺序逐个解析，缺失的食物不影响其它食物
  pub fn resolve_all(&self, counts: &ItemCount) -> Vec<ItemResolution> {
    counts
      .iter()
      .map(|(name, count)| ItemResolution {
        name: name.to_string(),
        count,
        breakdown: self.resolve(name, count),
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TABLE: &str = "\
Food Item,Calories,Protein (g),Carbohydrates (g),Fat (g),Fiber (g)
Apple ,95,0.5,25,0.3,4.4
  BANANA,90,1.1,23,0.3,2.6
Boiled Egg,78,6.3,0.6,5.3,0
";

  fn table() -> NutritionTable {
    NutritionTable::from_reader(TABLE.as_bytes()).unwrap()
  }

  #[test]
  fn loads_and_normalizes_item_names() {
    let table = table();
    assert_eq!(table.len(), 3);
    assert!(table.contains("apple"));
    assert!(table.contains("banana"));
    assert!(table.contains("boiled egg"));
    assert_eq!(table.get("apple").unwrap().per_unit.fiber_g, 4.4);
  }

  #[test]
  fn scales_every_field_by_count() {
    let breakdown = table().resolve("banana", 3).unwrap();
    assert_eq!(breakdown.count, 3);
    assert_eq!(breakdown.totals.calories, 270.0);
    assert_eq!(breakdown.totals.protein_g, 1.1 * 3.0);
    assert_eq!(breakdown.totals.carbohydrates_g, 69.0);
    assert_eq!(breakdown.totals.fat_g, 0.3 * 3.0);
    assert_eq!(breakdown.totals.fiber_g, 2.6 * 3.0);
  }

  #[test]
  fn zero_count_is_an_all_zero_breakdown() {
    let breakdown = table().resolve("apple", 0).unwrap();
    assert_eq!(breakdown.totals, Nutrients::default());
  }

  #[test]
  fn missing_item_is_a_lookup_miss() {
    assert_eq!(
      table().resolve("kiwi", 1),
      Err(LookupMiss("kiwi".to_string()))
    );
  }

  #[test]
  fn lookup_miss_does_not_stop_other_items() {
    let counts: ItemCount = ["kiwi", "apple", "apple", "banana"].into_iter().collect();
    let resolved = table().resolve_all(&counts);

    assert_eq!(resolved.len(), 3);
    assert_eq!(resolved[0].name, "kiwi");
    assert!(resolved[0].breakdown.is_err());
    assert_eq!(resolved[1].breakdown.as_ref().unwrap().totals.calories, 190.0);
    assert_eq!(resolved[2].breakdown.as_ref().unwrap().totals.calories, 90.0);

    let total = NutritionBreakdown::sum(resolved.iter().filter_map(|r| r.breakdown.as_ref().ok()));
    assert_eq!(total.calories, 280.0);
  }

  #[test]
  fn rejects_wrong_header() {
    let csv = "Name,Calories,Protein (g),Carbohydrates (g),Fat (g),Fiber (g)\napple,1,1,1,1,1\n";
    assert!(matches!(
      NutritionTable::from_reader(csv.as_bytes()),
      Err(NutritionTableError::HeaderMismatch { .. })
    ));
  }

  #[test]
  fn rejects_negative_values() {
    let csv = "Food Item,Calories,Protein (g),Carbohydrates (g),Fat (g),Fiber (g)\napple,95,-1,25,0.3,4.4\n";
    match NutritionTable::from_reader(csv.as_bytes()) {
      Err(NutritionTableError::InvalidValue { row, column, .. }) => {
        assert_eq!(row, 2);
        assert_eq!(column, "Protein (g)");
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn rejects_duplicate_names_after_normalization() {
    let csv = "Food Item,Calories,Protein (g),Carbohydrates (g),Fat (g),Fiber (g)\napple,95,0.5,25,0.3,4.4\n APPLE ,1,1,1,1,1\n";
    assert!(matches!(
      NutritionTable::from_reader(csv.as_bytes()),
      Err(NutritionTableError::DuplicateItem { row: 3, .. })
    ));
  }

  #[test]
  fn rejects_non_numeric_cells() {
    let csv = "Food Item,Calories,Protein (g),Carbohydrates (g),Fat (g),Fiber (g)\napple,lots,0.5,25,0.3,4.4\n";
    assert!(matches!(
      NutritionTable::from_reader(csv.as_bytes()),
      Err(NutritionTableError::CsvError(_))
    ));
  }
}
