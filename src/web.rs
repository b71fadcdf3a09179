// 该文件是 Shiliang （食量） 项目的一部分。
// src/web.rs - 网页界面与 HTTP 接口
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

use std::sync::Arc;

use axum::{
  Form, Json, Router,
  extract::{DefaultBodyLimit, Multipart, Path, State, multipart::MultipartError},
  http::StatusCode,
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
  count::display_name,
  input::{UploadError, decode_upload},
  model::{DetectResult, Model},
  nutrition::{NutritionTable, Nutrients},
  output::{Present, draw::Draw},
  session::{ScanPhase, ScanSession},
  task::{self, Scan},
};

mod page;
pub use self::page::HtmlPage;

/// 上传请求体上限
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
/// 上传表单中图像字段的名称
pub const UPLOAD_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum ScanRequestError {
  #[error("表单解析错误: {0}")]
  Multipart(#[from] MultipartError),
  #[error("表单中没有图像字段")]
  MissingImage,
  #[error("{0}")]
  Upload(#[from] UploadError),
}

impl ScanRequestError {
  fn user_message(&self) -> String {
    match self {
      ScanRequestError::Multipart(_) => "The upload could not be read.".to_string(),
      ScanRequestError::MissingImage | ScanRequestError::Upload(UploadError::Empty) => {
        "Please upload an image of a food item.".to_string()
      }
      ScanRequestError::Upload(UploadError::UnsupportedFormat(_)) => {
        "Only JPG and PNG images are supported.".to_string()
      }
      ScanRequestError::Upload(UploadError::DecodeError(_)) => {
        "The uploaded file is not a readable image.".to_string()
      }
    }
  }
}

/// 当前会话与最近一次识别的图像
#[derive(Default)]
struct ScanState {
  session: ScanSession,
  last: Option<Scan>,
}

/// 服务共享状态。会话只有一份，每个请求在整个处理过程中独占它。
pub struct AppState<M> {
  model: Arc<M>,
  table: NutritionTable,
  draw: Draw,
  scan: Mutex<ScanState>,
}

impl<M> AppState<M> {
  pub fn new(model: M, table: NutritionTable, draw: Draw) -> Self {
    Self {
      model: Arc::new(model),
      table,
      draw,
      scan: Mutex::new(ScanState::default()),
    }
  }

  fn render(&self, scan: &mut ScanState, warnings: &[String]) -> anyhow::Result<String> {
    let mut page = HtmlPage::new(&self.draw);
    for warning in warnings {
      page.show_warning(warning)?;
    }
    if let Some(last) = &scan.last {
      task::present_scan(&mut scan.session, &self.table, last, &mut page)?;
    }
    Ok(page.into_document())
  }

  fn snapshot(&self, scan: &ScanState) -> SessionSnapshot {
    let session = &scan.session;
    let items: Vec<ItemSnapshot> = self
      .table
      .resolve_all(session.counts())
      .into_iter()
      .map(|r| ItemSnapshot {
        detected: session.detected_count(&r.name).unwrap_or(r.count),
        breakdown: r.breakdown.ok().map(|b| b.totals),
        name: r.name,
        count: r.count,
      })
      .collect();
    let total = items
      .iter()
      .filter_map(|i| i.breakdown)
      .fold(Nutrients::default(), |acc, n| acc + n);

    SessionSnapshot {
      scan_id: session.scan_id(),
      phase: session.phase(),
      detections: scan.last.as_ref().map(|s| s.result.len()).unwrap_or(0),
      items,
      total,
    }
  }
}

/// `GET /api/session` 的返回内容
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
  pub scan_id: u64,
  pub phase: ScanPhase,
  pub detections: usize,
  pub items: Vec<ItemSnapshot>,
  pub total: Nutrients,
}

#[derive(Debug, Serialize)]
pub struct ItemSnapshot {
  pub name: String,
  pub detected: u32,
  pub count: u32,
  pub breakdown: Option<Nutrients>,
}

#[derive(Debug, Deserialize)]
pub struct CountForm {
  pub count: String,
}

pub fn create_router<M>(state: Arc<AppState<M>>) -> Router
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  Router::new()
    .route("/", get(index_handler::<M>))
    .route("/scan", post(scan_handler::<M>))
    .route("/items/:key/count", post(override_handler::<M>))
    .route("/api/session", get(session_handler::<M>))
    .route("/health", get(health_handler))
    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
    .with_state(state)
}

fn page_response(status: StatusCode, page: anyhow::Result<String>) -> Response {
  match page {
    Ok(html) => (status, Html(html)).into_response(),
    Err(e) => {
      error!("页面渲染失败: {}", e);
      (StatusCode::INTERNAL_SERVER_ERROR, "failed to render page").into_response()
    }
  }
}

async fn index_handler<M>(State(state): State<Arc<AppState<M>>>) -> Response
where
  M: Send + Sync + 'static,
{
  let mut scan = state.scan.lock().await;
  page_response(StatusCode::OK, state.render(&mut scan, &[]))
}

async fn read_upload(multipart: &mut Multipart) -> Result<RgbImage, ScanRequestError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(UPLOAD_FIELD) {
      continue;
    }
    let file_name = field.file_name().map(str::to_string);
    let bytes = field.bytes().await?;
    info!(
      "收到上传图像 {:?}，大小 {} 字节",
      file_name.as_deref().unwrap_or(""),
      bytes.len()
    );
    return Ok(decode_upload(file_name.as_deref(), &bytes)?);
  }
  Err(ScanRequestError::MissingImage)
}

async fn scan_handler<M>(State(state): State<Arc<AppState<M>>>, mut multipart: Multipart) -> Response
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let image = match read_upload(&mut multipart).await {
    Ok(image) => image,
    Err(e) => {
      warn!("上传无效: {}", e);
      let mut scan = state.scan.lock().await;
      let page = state.render(&mut scan, &[e.user_message()]);
      return page_response(StatusCode::BAD_REQUEST, page);
    }
  };

  let mut scan = state.scan.lock().await;
  scan.session.begin_image();
  scan.last = None;

  let model = Arc::clone(&state.model);
  let detected = tokio::task::spawn_blocking(move || task::detect(model.as_ref(), image))
    .await
    .map_err(anyhow::Error::from)
    .and_then(|r| r);

  let scanned = match detected {
    Ok(scanned) => scanned,
    Err(e) => {
      error!("识别失败: {}", e);
      scan.session.reset();
      let page = state.render(
        &mut scan,
        &["Food detection failed. Please try another image.".to_string()],
      );
      return page_response(StatusCode::INTERNAL_SERVER_ERROR, page);
    }
  };

  if let Err(e) = scan.session.aggregate(&scanned.result.items) {
    error!("聚合失败: {}", e);
    scan.session.reset();
    return page_response(StatusCode::INTERNAL_SERVER_ERROR, Err(e.into()));
  }
  scan.last = Some(scanned);

  page_response(StatusCode::OK, state.render(&mut scan, &[]))
}

async fn override_handler<M>(
  State(state): State<Arc<AppState<M>>>,
  Path(key): Path<String>,
  Form(form): Form<CountForm>,
) -> Response
where
  M: Send + Sync + 'static,
{
  let mut scan = state.scan.lock().await;

  let warning = match form.count.trim().parse::<u32>() {
    Ok(count) => scan
      .session
      .apply_override(&key, count)
      .err()
      .map(|e| task::override_warning(&key, &e)),
    Err(_) => {
      warn!("无效的数量 '{}': {}", key, form.count);
      Some(format!(
        "Count for {} must be a whole number of zero or more.",
        display_name(&key)
      ))
    }
  };

  match warning {
    None => page_response(StatusCode::OK, state.render(&mut scan, &[])),
    Some(message) => page_response(
      StatusCode::UNPROCESSABLE_ENTITY,
      state.render(&mut scan, &[message]),
    ),
  }
}

async fn session_handler<M>(State(state): State<Arc<AppState<M>>>) -> Json<SessionSnapshot>
where
  M: Send + Sync + 'static,
{
  let scan = state.scan.lock().await;
  Json(state.snapshot(&scan))
}

async fn health_handler() -> &'static str {
  "ok"
}
