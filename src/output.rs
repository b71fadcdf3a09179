// 该文件是 Shiliang （食量） 项目的一部分。
// src/output.rs - 结果输出与展示
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

use image::RgbImage;

use crate::model::DetectResult;

/// 把检测结果渲染到某个目标（文件、图像等）
pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

/// 展示端：显示图像与文字、向用户索取数量、给出警告。
///
/// `number_input` 返回用户当前给出的数量；无法即时交互的展示端返回默认值，
/// 修改会通过其它途径（例如网页表单）送回会话。
pub trait Present {
  type Error;

  fn show_image(&mut self, image: &RgbImage, caption: &str) -> Result<(), Self::Error>;

  fn show_text(&mut self, text: &str) -> Result<(), Self::Error>;

  fn show_heading(&mut self, text: &str) -> Result<(), Self::Error> {
    self.show_text(text)
  }

  fn number_input(&mut self, key: &str, label: &str, default: u32) -> Result<u32, Self::Error>;

  fn show_warning(&mut self, text: &str) -> Result<(), Self::Error>;

  fn show_annotated(
    &mut self,
    image: &RgbImage,
    result: &DetectResult,
    caption: &str,
  ) -> Result<(), Self::Error>;
}

pub mod draw;

mod report;
pub use self::report::{ReportError, TerminalReport};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};
