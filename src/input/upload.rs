// 该文件是 Shiliang （食量） 项目的一部分。
// src/input/upload.rs - 解码浏览器上传的图像
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

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;

/// 允许上传的文件扩展名
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "png", "jpeg"];

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("上传内容为空")]
  Empty,
  #[error("不支持的文件类型: {0}")]
  UnsupportedFormat(String),
  #[error("图像解码错误: {0}")]
  DecodeError(#[from] image::ImageError),
}

/// 解码一张上传的图像，只接受 JPEG 与 PNG。
///
/// 有文件名时先检查扩展名，再根据文件内容判断实际格式。
pub fn decode_upload(file_name: Option<&str>, bytes: &[u8]) -> Result<RgbImage, UploadError> {
  if bytes.is_empty() {
    return Err(UploadError::Empty);
  }

  if let Some(name) = file_name.filter(|n| !n.is_empty()) {
    let extension = name
      .rsplit_once('.')
      .map(|(_, ext)| ext.to_ascii_lowercase())
      .unwrap_or_default();
    if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
      return Err(UploadError::UnsupportedFormat(name.to_string()));
    }
  }

  let format = image::guess_format(bytes)?;
  if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
    return Err(UploadError::UnsupportedFormat(format!("{:?}", format)));
  }

  let image = image::load_from_memory_with_format(bytes, format)?.into_rgb8();
  debug!(
    "上传图像 {:?}: {}x{}",
    format,
    image.width(),
    image.height()
  );
  Ok(image)
}
