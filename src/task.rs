// 该文件是 Shiliang （食量） 项目的一部分。
// src/task.rs - 识别任务流水线
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

use std::time::Instant;

use image::RgbImage;
use tracing::{error, info, warn};

use crate::{
  count::{display_name, normalize_name},
  model::{DetectResult, Model},
  nutrition::{ItemResolution, NutritionBreakdown, NutritionTable, Nutrients},
  output::Present,
  session::{ScanSession, SessionError},
};

pub const ORIGINAL_IMAGE_CAPTION: &str = "Uploaded/Captured Image";
pub const ANNOTATED_IMAGE_CAPTION: &str = "Detected Food Items";
pub const DETECTING_TEXT: &str = "Detecting food items...";
pub const DETECTED_HEADER_TEXT: &str = "Detected Items and Nutritional Breakdown:";
pub const NO_ITEMS_TEXT: &str = "No food items detected in the image.";

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 一张图像及其检测结果
#[derive(Debug, Clone)]
pub struct Scan {
  pub image: RgbImage,
  pub result: DetectResult,
}

/// 一次完整识别的结果
#[derive(Debug, Clone)]
pub struct ScanReport {
  pub scan: Scan,
  pub resolutions: Vec<ItemResolution>,
}

impl ScanReport {
  pub fn total(&self) -> Nutrients {
    NutritionBreakdown::sum(
      self
        .resolutions
        .iter()
        .filter_map(|r| r.breakdown.as_ref().ok()),
    )
  }
}

/// 对图像执行一次推理
pub fn detect<M>(model: &M, image: RgbImage) -> anyhow::Result<Scan>
where
  M: Model<Input = RgbImage, Output = DetectResult> + ?Sized,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  info!("输入图像获取成功，开始推理...");
  let now = Instant::now();
  let result = model.infer(&image)?;
  info!(
    "推理完成，耗时: {:.2?}，检测到 {} 个物体",
    now.elapsed(),
    result.len()
  );
  Ok(Scan { image, result })
}

fn plural(count: u32) -> &'static str {
  if count > 1 { "s" } else { "" }
}

/// 数量修改被拒绝时给用户的提示
pub fn override_warning(key: &str, e: &SessionError) -> String {
  match e {
    SessionError::NoActiveScan => "Upload an image before adjusting counts.".to_string(),
    SessionError::UnknownItem(_) => format!(
      "{} was not detected in the current image.",
      display_name(&normalize_name(key))
    ),
    SessionError::InvalidTransition { .. } => e.to_string(),
  }
}

fn show_nutrients<P>(presenter: &mut P, totals: &Nutrients) -> Result<(), P::Error>
where
  P: Present + ?Sized,
{
  // `{:?}` 保留浮点数的小数部分，例如 `1.0`
  presenter.show_text(&format!("Calories: {:?}", totals.calories))?;
  presenter.show_text(&format!("Protein: {:?}g", totals.protein_g))?;
  presenter.show_text(&format!("Carbohydrates: {:?}g", totals.carbohydrates_g))?;
  presenter.show_text(&format!("Fat: {:?}g", totals.fat_g))?;
  presenter.show_text(&format!("Fiber: {:?}g", totals.fiber_g))
}

/// 逐个食物索取数量、解析并展示营养值，最后展示合计。
///
/// 会话必须已经聚合；结束后进入 `Resolved`。
pub fn present_breakdown<P>(
  session: &mut ScanSession,
  table: &NutritionTable,
  presenter: &mut P,
) -> anyhow::Result<Vec<ItemResolution>>
where
  P: Present + ?Sized,
  P::Error: std::error::Error + Send + Sync + 'static,
{
  let keys: Vec<String> = session.counts().keys().map(str::to_string).collect();
  if keys.is_empty() {
    presenter.show_text(NO_ITEMS_TEXT)?;
    session.finish()?;
    return Ok(Vec::new());
  }

  presenter.show_text(DETECTED_HEADER_TEXT)?;
  let mut resolutions = Vec::with_capacity(keys.len());
  for key in keys {
    let name = display_name(&key);

    if table.contains(&key) {
      let current = session.counts().get(&key).unwrap_or_default();
      let detected = session.detected_count(&key).unwrap_or(current);
      let label = format!("{} (Detected {} times)", name, detected);
      let count = presenter.number_input(&key, &label, current)?;
      if count != current {
        session.apply_override(&key, count)?;
      }
    }

    let resolution = session.resolve_item(table, &key)?;
    match &resolution.breakdown {
      Ok(breakdown) => {
        presenter.show_heading(&name)?;
        presenter.show_text(&format!(
          "Nutritional Breakdown (for {} item{}):",
          breakdown.count,
          plural(breakdown.count)
        ))?;
        show_nutrients(presenter, &breakdown.totals)?;
      }
      Err(_) => {
        presenter.show_warning(&format!(
          "Nutritional information for {} is not available.",
          name
        ))?;
      }
    }
    resolutions.push(resolution);
  }

  let found: Vec<&NutritionBreakdown> = resolutions
    .iter()
    .filter_map(|r| r.breakdown.as_ref().ok())
    .collect();
  if !found.is_empty() {
    let items: u32 = found.iter().map(|b| b.count).sum();
    presenter.show_heading("Total")?;
    presenter.show_text(&format!(
      "Nutritional Breakdown (for {} item{}):",
      items,
      plural(items)
    ))?;
    show_nutrients(presenter, &NutritionBreakdown::sum(found))?;
  }

  session.finish()?;
  Ok(resolutions)
}

/// 展示营养结果与标注图像
pub fn present_results<P>(
  session: &mut ScanSession,
  table: &NutritionTable,
  scan: &Scan,
  presenter: &mut P,
) -> anyhow::Result<Vec<ItemResolution>>
where
  P: Present + ?Sized,
  P::Error: std::error::Error + Send + Sync + 'static,
{
  let resolutions = present_breakdown(session, table, presenter)?;
  presenter.show_annotated(&scan.image, &scan.result, ANNOTATED_IMAGE_CAPTION)?;
  Ok(resolutions)
}

/// 按顺序展示原图、检测提示、营养结果与标注图像
pub fn present_scan<P>(
  session: &mut ScanSession,
  table: &NutritionTable,
  scan: &Scan,
  presenter: &mut P,
) -> anyhow::Result<Vec<ItemResolution>>
where
  P: Present + ?Sized,
  P::Error: std::error::Error + Send + Sync + 'static,
{
  presenter.show_image(&scan.image, ORIGINAL_IMAGE_CAPTION)?;
  presenter.show_text(DETECTING_TEXT)?;
  present_results(session, table, scan, presenter)
}

/// 取一张图像，完整执行检测、聚合、数量修改与营养解析
pub struct OneShotTask<'a> {
  session: &'a mut ScanSession,
  table: &'a NutritionTable,
  overrides: Vec<(String, u32)>,
}

impl<'a> OneShotTask<'a> {
  pub fn new(session: &'a mut ScanSession, table: &'a NutritionTable) -> Self {
    Self {
      session,
      table,
      overrides: Vec::new(),
    }
  }

  /// 聚合之后、展示之前应用的数量修改
  pub fn with_overrides<I, S>(mut self, overrides: I) -> Self
  where
    I: IntoIterator<Item = (S, u32)>,
    S: Into<String>,
  {
    self.overrides = overrides.into_iter().map(|(k, v)| (k.into(), v)).collect();
    self
  }
}

impl<'m, 'o, I, M, O> Task<I, &'m M, &'o mut O> for OneShotTask<'_>
where
  I: Iterator<Item = RgbImage>,
  M: Model<Input = RgbImage, Output = DetectResult> + ?Sized,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Present + ?Sized,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = ScanReport;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &'m M, output: &'o mut O) -> Result<ScanReport, Self::Error> {
    info!("开始任务...");
    let OneShotTask {
      session,
      table,
      overrides,
    } = self;
    let image = input
      .next()
      .ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;

    session.begin_image();
    output.show_image(&image, ORIGINAL_IMAGE_CAPTION)?;
    output.show_text(DETECTING_TEXT)?;
    let scan = match detect(model, image) {
      Ok(scan) => scan,
      Err(e) => {
        error!("推理失败: {}", e);
        session.reset();
        return Err(e);
      }
    };

    session.aggregate(&scan.result.items)?;
    for (key, count) in &overrides {
      if let Err(e) = session.apply_override(key, *count) {
        warn!("忽略数量修改 {}={}: {}", key, count, e);
        output.show_warning(&override_warning(key, &e))?;
      }
    }

    let resolutions = present_results(session, table, &scan, output)?;
    info!("任务完成");

    Ok(ScanReport { scan, resolutions })
  }
}
