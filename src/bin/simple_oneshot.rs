// 该文件是 Shiliang （食量） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像识别与营养分析
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use shiliang::{
  FromUrl,
  input::ImageFileInput,
  model::{DEFAULT_CONFIDENCE, DEFAULT_IOU, DetectParams, Labels, YoloOnnxBuilder},
  nutrition::NutritionTable,
  output::{SaveImageFileOutput, TerminalReport, draw::Draw},
  session::ScanSession,
  task::{OneShotTask, Task},
};
use tracing::info;

/// 解析 `名称=数量`
fn parse_count(s: &str) -> Result<(String, u32), String> {
  let (name, count) = s
    .rsplit_once('=')
    .ok_or_else(|| format!("格式应为 名称=数量: {}", s))?;
  if name.trim().is_empty() {
    return Err(format!("食物名称为空: {}", s));
  }
  let count = count
    .trim()
    .parse()
    .map_err(|_| format!("数量必须是非负整数: {}", s))?;
  Ok((name.to_string(), count))
}

/// Shiliang 单张图像识别
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 类别名称文件（JSON 字符串数组），不指定时读取模型元数据中的 names
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 营养表 CSV 文件
  #[arg(long, value_name = "FILE")]
  pub nutrition: PathBuf,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 标注图像输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 修改某种食物的数量，可重复，例如 --count apple=3
  #[arg(long = "count", value_name = "NAME=N", value_parser = parse_count)]
  pub counts: Vec<(String, u32)>,
  /// 标签字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
  pub confidence: f32,
  /// NMS 的 IoU 阈值
  #[arg(long, default_value_t = DEFAULT_IOU)]
  pub iou: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let table = NutritionTable::from_csv_path(&args.nutrition)?;
  let params = DetectParams {
    confidence: args.confidence,
    iou: args.iou,
    ..DetectParams::default()
  };
  let mut builder = YoloOnnxBuilder::from_url(&args.model)?.params(params);
  if let Some(path) = &args.labels {
    builder = builder.labels(Labels::from_json_path(path)?);
  }
  let model = builder.build()?;
  let input = ImageFileInput::from_url(&args.input)?;

  let output = match &args.output {
    Some(url) => {
      let draw = match &args.font {
        Some(path) => Draw::with_font_file(path)?,
        None => Draw::default(),
      };
      Some(SaveImageFileOutput::from_url(url)?.with_draw(draw))
    }
    None => None,
  };

  let stdout = std::io::stdout();
  let mut report = TerminalReport::new(stdout.lock());
  if let Some(output) = &output {
    report = report.with_annotated_output(output);
  }

  let mut session = ScanSession::new();
  let result = OneShotTask::new(&mut session, &table)
    .with_overrides(args.counts.clone())
    .run_task(input, &model, &mut report)?;

  info!(
    "识别完成: {} 个检测框，{} 种食物，合计 {} 千卡",
    result.scan.result.len(),
    result.resolutions.len(),
    result.total().calories
  );

  Ok(())
}
