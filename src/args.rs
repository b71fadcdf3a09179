// 该文件是 Shiliang （食量） 项目的一部分。
// src/args.rs - 服务参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use url::Url;

use shiliang::model::{DEFAULT_CONFIDENCE, DEFAULT_INPUT_SIZE, DEFAULT_IOU, DetectParams};

/// Shiliang 食物识别与营养分析服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 onnx:///models/food.onnx?threads=4
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 类别名称文件（JSON 字符串数组），不指定时读取模型元数据中的 names
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 营养表 CSV 文件
  #[arg(long, value_name = "FILE")]
  pub nutrition: PathBuf,

  /// 监听地址
  #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8501")]
  pub bind: SocketAddr,

  /// 标签字体（TTF/OTF），不指定时只画检测框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 模型输入边长
  #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
  pub input_size: u32,

  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
  pub confidence: f32,

  /// NMS 的 IoU 阈值
  #[arg(long, default_value_t = DEFAULT_IOU)]
  pub iou: f32,
}

impl Args {
  pub fn detect_params(&self) -> DetectParams {
    DetectParams {
      input_size: self.input_size,
      confidence: self.confidence,
      iou: self.iou,
    }
  }
}
