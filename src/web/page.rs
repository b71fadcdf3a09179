// 该文件是 Shiliang （食量） 项目的一部分。
// src/web/page.rs - 网页展示端
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

use std::{fmt::Write as _, io::Cursor};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ImageFormat, RgbImage};

use crate::{
  input::ACCEPTED_EXTENSIONS,
  model::DetectResult,
  output::{Present, draw::Draw},
  web::UPLOAD_FIELD,
};

const PAGE_TITLE: &str = "Food Item Detection and Nutritional Breakdown App";
const PAGE_INTRO: &str = "You can either upload an image or scan using your camera.";

const STYLE: &str = "body{font-family:sans-serif;max-width:860px;margin:2em auto;padding:0 1em}\
img{max-width:100%}figure{margin:1em 0}figcaption{color:#555}\
.warning{background:#fff3cd;border:1px solid #e0c36b;padding:.5em 1em}\
form.count{margin:.5em 0}form.count input[type=number]{width:6em}";

enum Block {
  Image { src: String, caption: String },
  Heading(String),
  Text(String),
  NumberInput { key: String, label: String, value: u32 },
  Warning(String),
}

/// 把展示内容收集成一个 HTML 页面。
///
/// 数量输入框渲染为提交到 `/items/{key}/count` 的表单，`number_input` 总是返回默认值。
pub struct HtmlPage<'a> {
  draw: &'a Draw,
  blocks: Vec<Block>,
}

impl<'a> HtmlPage<'a> {
  pub fn new(draw: &'a Draw) -> Self {
    Self {
      draw,
      blocks: Vec::new(),
    }
  }

  pub fn into_document(self) -> String {
    let accept = ACCEPTED_EXTENSIONS
      .iter()
      .map(|ext| format!(".{}", ext))
      .collect::<Vec<_>>()
      .join(",");

    let mut html = String::new();
    let _ = write!(
      html,
      "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
       <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
       <title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n\
       <h1>{title}</h1>\n<p>{intro}</p>\n\
       <form method=\"post\" action=\"/scan\" enctype=\"multipart/form-data\">\n\
       <label>Choose an image... <input type=\"file\" name=\"{field}\" accept=\"{accept}\"></label>\n\
       <button type=\"submit\">Scan</button>\n</form>\n\
       <form method=\"post\" action=\"/scan\" enctype=\"multipart/form-data\">\n\
       <label>Or, take a photo using your camera <input type=\"file\" name=\"{field}\" accept=\"image/jpeg,image/png\" capture=\"environment\"></label>\n\
       <button type=\"submit\">Scan</button>\n</form>\n",
      title = PAGE_TITLE,
      style = STYLE,
      intro = PAGE_INTRO,
      field = UPLOAD_FIELD,
      accept = accept,
    );

    for block in &self.blocks {
      let _ = match block {
        Block::Image { src, caption } => writeln!(
          html,
          "<figure><img src=\"{}\" alt=\"{}\"><figcaption>{}</figcaption></figure>",
          src,
          escape_html(caption),
          escape_html(caption)
        ),
        Block::Heading(text) => writeln!(html, "<h3>{}</h3>", escape_html(text)),
        Block::Text(text) => writeln!(html, "<p>{}</p>", escape_html(text)),
        Block::NumberInput { key, label, value } => writeln!(
          html,
          "<form class=\"count\" method=\"post\" action=\"/items/{}/count\">\
           <label>{} <input type=\"number\" name=\"count\" min=\"0\" step=\"1\" value=\"{}\"></label> \
           <button type=\"submit\">Update</button></form>",
          urlencoding::encode(key),
          escape_html(label),
          value
        ),
        Block::Warning(text) => writeln!(html, "<p class=\"warning\">{}</p>", escape_html(text)),
      };
    }

    html.push_str("</body>\n</html>\n");
    html
  }
}

fn escape_html(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      _ => escaped.push(c),
    }
  }
  escaped
}

/// 编码为 JPEG 的 data URI
fn data_uri(image: &RgbImage) -> Result<String, image::ImageError> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
  Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&bytes)))
}

impl Present for HtmlPage<'_> {
  type Error = image::ImageError;

  fn show_image(&mut self, image: &RgbImage, caption: &str) -> Result<(), Self::Error> {
    self.blocks.push(Block::Image {
      src: data_uri(image)?,
      caption: caption.to_string(),
    });
    Ok(())
  }

  fn show_text(&mut self, text: &str) -> Result<(), Self::Error> {
    self.blocks.push(Block::Text(text.to_string()));
    Ok(())
  }

  fn show_heading(&mut self, text: &str) -> Result<(), Self::Error> {
    self.blocks.push(Block::Heading(text.to_string()));
    Ok(())
  }

  fn number_input(&mut self, key: &str, label: &str, default: u32) -> Result<u32, Self::Error> {
    self.blocks.push(Block::NumberInput {
      key: key.to_string(),
      label: label.to_string(),
      value: default,
    });
    Ok(default)
  }

  fn show_warning(&mut self, text: &str) -> Result<(), Self::Error> {
    self.blocks.push(Block::Warning(text.to_string()));
    Ok(())
  }

  fn show_annotated(
    &mut self,
    image: &RgbImage,
    result: &DetectResult,
    caption: &str,
  ) -> Result<(), Self::Error> {
    let annotated = self.draw.draw_detection(image, result);
    self.show_image(&annotated, caption)
  }
}
