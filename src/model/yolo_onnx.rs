// 该文件是 Shiliang （食量） 项目的一部分。
// src/model/yolo_onnx.rs - ONNX Runtime 上的 YOLO 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::Path, sync::Mutex};

use image::{Rgb, RgbImage, imageops::FilterType};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectParams, DetectResult, Labels, LabelsError, Model},
};

const YOLO_INPUT_NAME: &str = "images";
const YOLO_BOX_DIMS: usize = 4;
const YOLO_PAD_VALUE: u8 = 114;
const YOLO_MAX_DETECTIONS: usize = 300;
const YOLO_DEFAULT_THREADS: usize = 4;
const YOLO_NAMES_METADATA_KEY: &str = "names";

#[derive(Error, Debug)]
pub enum YoloOnnxError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型输出形状无效: {0:?}")]
  OutputShape(Vec<i64>),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("缺少类别标签：未指定标签文件，模型元数据中也没有 names")]
  MissingLabels,
  #[error("标签错误: {0}")]
  LabelsError(#[from] LabelsError),
  #[error("推理会话锁已损坏")]
  Poisoned,
}

fn ort_error<E: std::fmt::Display>(err: E) -> YoloOnnxError {
  YoloOnnxError::OrtError(err.to_string())
}

pub struct YoloOnnx {
  session: Mutex<Session>,
  labels: Labels,
  params: DetectParams,
}

pub struct YoloOnnxBuilder {
  model_path: String,
  labels: Option<Labels>,
  params: DetectParams,
  intra_threads: usize,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloOnnxBuilder {
  type Error = YoloOnnxError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloOnnxError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let intra_threads = url
      .query_pairs()
      .find(|(k, _)| k == "threads")
      .and_then(|(_, v)| v.parse().ok())
      .unwrap_or(YOLO_DEFAULT_THREADS);

    Ok(YoloOnnxBuilder {
      model_path: url.path().to_string(),
      labels: None,
      params: DetectParams::default(),
      intra_threads,
    })
  }
}

impl YoloOnnxBuilder {
  pub fn labels(mut self, labels: Labels) -> Self {
    self.labels = Some(labels);
    self
  }

  pub fn params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads;
    self
  }

  pub fn build(self) -> Result<YoloOnnx, YoloOnnxError> {
    info!("加载模型文件: {}", self.model_path);
    if !Path::new(&self.model_path).is_file() {
      return Err(YoloOnnxError::ModelLoadError(format!(
        "模型文件不存在: {}",
        self.model_path
      )));
    }

    let session = Session::builder()
      .map_err(ort_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort_error)?
      .with_intra_threads(self.intra_threads)
      .map_err(ort_error)?
      .commit_from_file(&self.model_path)
      .map_err(|e| YoloOnnxError::ModelLoadError(e.to_string()))?;
    info!("模型加载完成");

    let labels = match self.labels {
      Some(labels) => labels,
      None => labels_from_metadata(&session)?,
    };
    debug!(
      "类别数量: {}, 输入尺寸: {}, 置信度阈值: {}, IOU 阈值: {}",
      labels.len(),
      self.params.input_size,
      self.params.confidence,
      self.params.iou
    );

    Ok(YoloOnnx {
      session: Mutex::new(session),
      labels,
      params: self.params,
    })
  }
}

/// 导出的 YOLO 模型在元数据 `names` 中记录类别名称
fn labels_from_metadata(session: &Session) -> Result<Labels, YoloOnnxError> {
  let names = session
    .metadata()
    .map_err(ort_error)?
    .custom(YOLO_NAMES_METADATA_KEY)
    .map_err(ort_error)?
    .ok_or(YoloOnnxError::MissingLabels)?;
  let labels = Labels::from_names_metadata(&names)?;
  info!("从模型元数据读取到 {} 个类别", labels.len());
  Ok(labels)
}

/// 等比缩放并居中填充到正方形输入时的几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: u32,
  pad_y: u32,
  resized_w: u32,
  resized_h: u32,
  width: u32,
  height: u32,
}

impl Letterbox {
  fn new(width: u32, height: u32, size: u32) -> Self {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let resized_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let resized_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    Self {
      scale,
      pad_x: (size - resized_w) / 2,
      pad_y: (size - resized_h) / 2,
      resized_w,
      resized_h,
      width,
      height,
    }
  }

  /// 输入坐标映射回原图，并按原图尺寸归一化到 [0, 1]
  fn normalize(&self, x: f32, y: f32) -> (f32, f32) {
    let w = self.width as f32;
    let h = self.height as f32;
    let ox = ((x - self.pad_x as f32) / self.scale).clamp(0.0, w);
    let oy = ((y - self.pad_y as f32) / self.scale).clamp(0.0, h);
    (ox / w, oy / h)
  }
}

/// 缩放、填充并转为 NCHW 浮点张量，像素值归一化到 [0, 1]
fn preprocess(image: &RgbImage, size: u32) -> (Vec<f32>, Letterbox) {
  let letterbox = Letterbox::new(image.width(), image.height(), size);
  let resized = image::imageops::resize(
    image,
    letterbox.resized_w,
    letterbox.resized_h,
    FilterType::Triangle,
  );

  let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLO_PAD_VALUE; 3]));
  image::imageops::replace(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  let plane = (size * size) as usize;
  let raw = canvas.as_raw();
  let mut tensor_data = vec![0f32; 3 * plane];
  for idx in 0..plane {
    tensor_data[idx] = raw[idx * 3] as f32 / 255.0;
    tensor_data[plane + idx] = raw[idx * 3 + 1] as f32 / 255.0;
    tensor_data[2 * plane + idx] = raw[idx * 3 + 2] as f32 / 255.0;
  }

  (tensor_data, letterbox)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
  class_id: usize,
  score: f32,
  bbox: [f32; 4], // 输入坐标 [x_min, y_min, x_max, y_max]
}

impl Candidate {
  fn iou(&self, other: &Candidate) -> f32 {
    let ix1 = self.bbox[0].max(other.bbox[0]);
    let iy1 = self.bbox[1].max(other.bbox[1]);
    let ix2 = self.bbox[2].min(other.bbox[2]);
    let iy2 = self.bbox[3].min(other.bbox[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    if inter <= 0.0 {
      return 0.0;
    }
    let area = |b: &[f32; 4]| (b[2] - b[0]) * (b[3] - b[1]);
    let union = area(&self.bbox) + area(&other.bbox) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
  }
}

/// 按类别做贪心 NMS，结果按分数降序
fn nms(mut candidates: Vec<Candidate>, iou_thresh: f32) -> Vec<Candidate> {
  candidates.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    let overlapped = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_thresh);
    if !overlapped {
      kept.push(candidate);
      if kept.len() >= YOLO_MAX_DETECTIONS {
        break;
      }
    }
  }
  kept
}

/// 解码 `[1, 4 + 类别数, 锚点数]` 输出，也接受转置后的 `[1, 锚点数, 4 + 类别数]`
fn decode(
  data: &[f32],
  shape: &[i64],
  labels: &Labels,
  letterbox: &Letterbox,
  params: &DetectParams,
) -> Result<Vec<DetectItem>, YoloOnnxError> {
  if shape.len() != 3 || shape[0] != 1 || shape[1] <= 0 || shape[2] <= 0 {
    return Err(YoloOnnxError::OutputShape(shape.to_vec()));
  }
  let (dim1, dim2) = (shape[1] as usize, shape[2] as usize);
  let expected = labels.len() + YOLO_BOX_DIMS;
  let transposed = if dim1 == expected {
    false
  } else if dim2 == expected {
    true
  } else {
    dim1 > dim2
  };
  let (channels, anchors) = if transposed { (dim2, dim1) } else { (dim1, dim2) };
  if channels <= YOLO_BOX_DIMS || data.len() != channels * anchors {
    return Err(YoloOnnxError::OutputShape(shape.to_vec()));
  }

  let num_classes = channels - YOLO_BOX_DIMS;
  if num_classes != labels.len() {
    warn!(
      "模型类别数 {} 与标签数 {} 不一致",
      num_classes,
      labels.len()
    );
  }

  let at = |c: usize, i: usize| {
    if transposed {
      data[i * channels + c]
    } else {
      data[c * anchors + i]
    }
  };

  let mut candidates = Vec::new();
  for i in 0..anchors {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(YOLO_BOX_DIMS + c, i)))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if score.is_nan() || score <= params.confidence {
      continue;
    }

    let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
    candidates.push(Candidate {
      class_id,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  debug!("置信度过滤后候选框数量: {}", candidates.len());

  let items = nms(candidates, params.iou)
    .into_iter()
    .map(|c| {
      let (x_min, y_min) = letterbox.normalize(c.bbox[0], c.bbox[1]);
      let (x_max, y_max) = letterbox.normalize(c.bbox[2], c.bbox[3]);
      DetectItem {
        label: labels.to_label_str(c.class_id),
        score: c.score,
        bbox: [x_min, y_min, x_max, y_max],
      }
    })
    .collect();
  Ok(items)
}

impl YoloOnnx {
  pub fn params(&self) -> &DetectParams {
    &self.params
  }
}

impl Model for YoloOnnx {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = YoloOnnxError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let size = self.params.input_size;
    debug!("预处理图像 {}x{}", input.width(), input.height());
    let (tensor_data, letterbox) = preprocess(input, size);
    let shape = [1usize, 3, size as usize, size as usize];
    let tensor = Tensor::from_array((shape, tensor_data.into_boxed_slice()))
      .map_err(ort_error)?
      .into_dyn();

    let mut session = self.session.lock().map_err(|_| YoloOnnxError::Poisoned)?;
    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![YOLO_INPUT_NAME => tensor])
      .map_err(ort_error)?;

    let output = outputs
      .iter()
      .next()
      .ok_or_else(|| YoloOnnxError::OutputShape(Vec::new()))?
      .1;
    let (shape, data) = output.try_extract_tensor::<f32>().map_err(ort_error)?;
    let dims: Vec<i64> = shape.iter().copied().collect();
    debug!("模型输出形状: {:?}", dims);

    let items = decode(data, &dims, &self.labels, &letterbox, &self.params)?;
    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}
