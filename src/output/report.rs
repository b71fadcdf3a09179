// 该文件是 Shiliang （食量） 项目的一部分。
// src/output/report.rs - 终端文字报告
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

use std::io::Write;

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::{
  model::DetectResult,
  output::{Present, Render},
};

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标注图像输出错误: {0}")]
  AnnotatedOutput(String),
}

type AnnotatedSink<'a> =
  Box<dyn Fn(&RgbImage, &DetectResult) -> Result<(), ReportError> + 'a>;

/// 把结果写成纯文本的展示端。
///
/// 不做交互，`number_input` 只打印当前数量并原样返回。
pub struct TerminalReport<'a, W: Write> {
  writer: W,
  annotated: Option<AnnotatedSink<'a>>,
}

impl<'a, W: Write> TerminalReport<'a, W> {
  pub fn new(writer: W) -> Self {
    Self {
      writer,
      annotated: None,
    }
  }

  /// 标注图像交给 `output` 渲染
  pub fn with_annotated_output<R>(mut self, output: &'a R) -> Self
  where
    R: Render<RgbImage, DetectResult>,
    R::Error: std::fmt::Display,
  {
    self.annotated = Some(Box::new(move |image, result| {
      output
        .render_result(image, result)
        .map_err(|e| ReportError::AnnotatedOutput(e.to_string()))
    }));
    self
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}

impl<W: Write> Present for TerminalReport<'_, W> {
  type Error = ReportError;

  fn show_image(&mut self, image: &RgbImage, caption: &str) -> Result<(), Self::Error> {
    writeln!(
      self.writer,
      "[{}: {}x{}]",
      caption,
      image.width(),
      image.height()
    )?;
    Ok(())
  }

  fn show_text(&mut self, text: &str) -> Result<(), Self::Error> {
    writeln!(self.writer, "{}", text)?;
    Ok(())
  }

  fn show_heading(&mut self, text: &str) -> Result<(), Self::Error> {
    writeln!(self.writer)?;
    writeln!(self.writer, "== {} ==", text)?;
    Ok(())
  }

  fn number_input(&mut self, _key: &str, label: &str, default: u32) -> Result<u32, Self::Error> {
    writeln!(self.writer, "{}: {}", label, default)?;
    Ok(default)
  }

  fn show_warning(&mut self, text: &str) -> Result<(), Self::Error> {
    writeln!(self.writer, "! {}", text)?;
    Ok(())
  }

  fn show_annotated(
    &mut self,
    image: &RgbImage,
    result: &DetectResult,
    caption: &str,
  ) -> Result<(), Self::Error> {
    match &self.annotated {
      Some(sink) => {
        sink(image, result)?;
        info!("{}: 已输出 {} 个检测框", caption, result.len());
      }
      None => {
        writeln!(
          self.writer,
          "[{}: {} 个检测框]",
          caption,
          result.len()
        )?;
      }
    }
    Ok(())
  }
}
