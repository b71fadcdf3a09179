// 该文件是 Shiliang （食量） 项目的一部分。
// tests/web.rs - HTTP 接口测试
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

#![cfg(feature = "web_ui")]

use std::{io::Cursor, sync::Arc};

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use shiliang::{
  model::{DetectItem, DetectResult, Model},
  nutrition::NutritionTable,
  output::draw::Draw,
  web::{AppState, create_router},
};

const TABLE: &str = "\
Food Item,Calories,Protein (g),Carbohydrates (g),Fat (g),Fiber (g)
Apple,95,0.5,25,0.25,4.5
Banana,105,1.25,27,0.5,3
";

const BOUNDARY: &str = "shiliang-test-boundary";

struct FixedModel(Vec<DetectItem>);

impl Model for FixedModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = std::io::Error;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, Self::Error> {
    Ok(DetectResult::from(self.0.clone()))
  }
}

struct FailingModel;

impl Model for FailingModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = std::io::Error;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, Self::Error> {
    Err(std::io::Error::other("inference backend unavailable"))
  }
}

fn item(label: &str) -> DetectItem {
  DetectItem {
    label: label.to_string(),
    score: 0.8,
    bbox: [0.1, 0.1, 0.6, 0.6],
  }
}

fn app<M>(model: M) -> Router
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let table = NutritionTable::from_reader(TABLE.as_bytes()).unwrap();
  create_router(Arc::new(AppState::new(model, table, Draw::default())))
}

fn fruit_app() -> Router {
  app(FixedModel(vec![
    item("Apple"),
    item("apple"),
    item("Banana"),
    item("Kiwi"),
  ]))
}

fn png_bytes() -> Vec<u8> {
  let mut bytes = Vec::new();
  RgbImage::from_pixel(16, 16, Rgb([90, 160, 60]))
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

fn upload_request(file_name: &str, content: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(
    format!(
      "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\n\
       Content-Type: application/octet-stream\r\n\r\n"
    )
    .as_bytes(),
  );
  body.extend_from_slice(content);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

  Request::builder()
    .method("POST")
    .uri("/scan")
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap()
}

fn count_request(key: &str, count: &str) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri(format!("/items/{key}/count"))
    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
    .body(Body::from(format!("count={count}")))
    .unwrap()
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn session_json(app: &Router) -> Value {
  let (status, body) = send(app, get("/api/session")).await;
  assert_eq!(status, StatusCode::OK);
  serde_json::from_str(&body).unwrap()
}

#[tokio::test]
async fn health_check() {
  let (status, body) = send(&fruit_app(), get("/health")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, "ok");
}

#[tokio::test]
async fn index_shows_upload_form_before_any_scan() {
  let app = fruit_app();
  let (status, body) = send(&app, get("/")).await;
  assert_eq!(status, StatusCode::OK);
  assert!(body.contains("Food Item Detection and Nutritional Breakdown App"));
  assert!(body.contains("action=\"/scan\""));
  assert!(!body.contains("Detected Items"));

  let json = session_json(&app).await;
  assert_eq!(json["phase"], "idle");
  assert_eq!(json["scan_id"], 0);
}

#[tokio::test]
async fn scan_renders_breakdown() {
  let app = fruit_app();
  let (status, body) = send(&app, upload_request("lunch.png", &png_bytes())).await;
  assert_eq!(status, StatusCode::OK);
  assert!(body.contains("Uploaded/Captured Image"));
  let image_at = body.find("<figcaption>Uploaded/Captured Image</figcaption>").unwrap();
  let detecting_at = body.find("<p>Detecting food items...</p>").unwrap();
  let header_at = body.find("Detected Items and Nutritional Breakdown:").unwrap();
  assert!(image_at < detecting_at && detecting_at < header_at);
  assert!(body.contains("Apple (Detected 2 times)"));
  assert!(body.contains("Calories: 190.0"));
  assert!(body.contains("Nutritional Breakdown (for 2 items):"));
  assert!(body.contains("Nutritional information for Kiwi is not available."));
  assert!(body.contains("Detected Food Items"));
  assert!(body.contains("action=\"/items/banana/count\""));
  assert!(!body.contains("action=\"/items/kiwi/count\""));

  let json = session_json(&app).await;
  assert_eq!(json["phase"], "resolved");
  assert_eq!(json["scan_id"], 1);
  assert_eq!(json["detections"], 4);
  assert_eq!(json["items"][0]["name"], "apple");
  assert_eq!(json["items"][0]["count"], 2);
  assert_eq!(json["items"][1]["name"], "banana");
  assert_eq!(json["items"][2]["name"], "kiwi");
  assert!(json["items"][2]["breakdown"].is_null());
  assert_eq!(json["total"]["calories"], 295.0);
}

#[tokio::test]
async fn override_updates_counts() {
  let app = fruit_app();
  send(&app, upload_request("lunch.jpg", &png_bytes())).await;

  let (status, body) = send(&app, count_request("banana", "3")).await;
  assert_eq!(status, StatusCode::OK);
  assert!(body.contains("Banana (Detected 1 times)"));
  assert!(body.contains("Nutritional Breakdown (for 3 items):"));

  let json = session_json(&app).await;
  assert_eq!(json["items"][1]["count"], 3);
  assert_eq!(json["items"][1]["detected"], 1);
  assert_eq!(json["items"][1]["breakdown"]["calories"], 315.0);
  assert_eq!(json["total"]["calories"], 505.0);
}

#[tokio::test]
async fn invalid_overrides_are_rejected() {
  let app = fruit_app();

  let (status, body) = send(&app, count_request("apple", "2")).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert!(body.contains("Upload an image before adjusting counts."));

  send(&app, upload_request("lunch.png", &png_bytes())).await;

  let (status, body) = send(&app, count_request("mango", "2")).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert!(body.contains("Mango was not detected in the current image."));

  let (status, _) = send(&app, count_request("apple", "-1")).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

  let json = session_json(&app).await;
  assert_eq!(json["items"][0]["count"], 2);
}

#[tokio::test]
async fn unsupported_upload_is_a_bad_request() {
  let app = fruit_app();

  let (status, body) = send(&app, upload_request("lunch.gif", &png_bytes())).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body.contains("Only JPG and PNG images are supported."));

  let (status, body) = send(&app, upload_request("", b"")).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body.contains("Please upload an image of a food item."));

  let json = session_json(&app).await;
  assert_eq!(json["scan_id"], 0);
}

#[tokio::test]
async fn new_scan_replaces_previous_state() {
  let app = fruit_app();
  send(&app, upload_request("first.png", &png_bytes())).await;
  send(&app, count_request("banana", "5")).await;
  send(&app, upload_request("second.png", &png_bytes())).await;

  let json = session_json(&app).await;
  assert_eq!(json["scan_id"], 2);
  assert_eq!(json["items"][1]["count"], 1);
}

#[tokio::test]
async fn detector_failure_is_a_server_error() {
  let app = app(FailingModel);
  let (status, body) = send(&app, upload_request("lunch.png", &png_bytes())).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert!(body.contains("Food detection failed."));

  let json = session_json(&app).await;
  assert_eq!(json["phase"], "idle");
  assert_eq!(json["items"].as_array().unwrap().len(), 0);
}
