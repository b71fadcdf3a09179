// 该文件是 Shiliang （食量） 项目的一部分。
// src/main.rs - 网页服务主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use shiliang::{
  FromUrl,
  model::{Labels, YoloOnnxBuilder},
  nutrition::NutritionTable,
  output::draw::Draw,
  web::{AppState, create_router},
};

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!("无法监听退出信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到退出信号，停止服务...");
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  match &args.labels {
    Some(path) => info!("类别标签: {}", path.display()),
    None => info!("未指定类别标签文件，使用模型元数据"),
  }
  info!("营养表: {}", args.nutrition.display());

  let table = NutritionTable::from_csv_path(&args.nutrition)?;
  let mut builder = YoloOnnxBuilder::from_url(&args.model)?.params(args.detect_params());
  if let Some(path) = &args.labels {
    builder = builder.labels(Labels::from_json_path(path)?);
  }
  let model = builder.build()?;
  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => {
      info!("未指定标签字体，标注图像只绘制检测框");
      Draw::default()
    }
  };

  let state = Arc::new(AppState::new(model, table, draw));
  let app = create_router(state);

  let listener = tokio::net::TcpListener::bind(args.bind).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("服务已停止");
  Ok(())
}
