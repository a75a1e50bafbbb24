use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tokio::fs;

use crate::commands::AppContext;
use crate::provider::{ImageRequest, InputImage};

#[allow(clippy::too_many_arguments)]
pub async fn handle_generate(
    ctx: &AppContext,
    prompt: String,
    config: Option<String>,
    count: Option<u32>,
    inputs: Vec<String>,
    params: Vec<String>,
    out: Option<String>,
) -> Result<()> {
    let config_id = match config.or_else(|| ctx.app_config.default_config.clone()) {
        Some(id) => id,
        None => bail!("未指定配置 id，且 config.toml 中没有 default_config。"),
    };

    let input_images =
        futures::future::try_join_all(inputs.iter().map(|path| read_input_image(path))).await?;

    let request = ImageRequest {
        prompt,
        input_images,
        count,
        param_overrides: parse_params(&params)?,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("正在通过配置 {} 生成图像...", config_id));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = ctx.service.generate(&config_id, &request).await;
    spinner.finish_and_clear();

    let result = result.with_context(|| format!("图像生成失败（配置 {config_id}）。"))?;

    let out_dir = PathBuf::from(out.unwrap_or_else(|| ".".to_string()));
    fs::create_dir_all(&out_dir)
        .await
        .context("无法创建输出目录。")?;

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let mut written = 0usize;
    for (i, image) in result.images.iter().enumerate() {
        if let Some(b64) = &image.b64 {
            let bytes = BASE64
                .decode(b64)
                .context("服务商返回的图像数据不是合法的 base64。")?;
            let path = out_dir.join(format!(
                "imagemate-{stamp}-{i}.{}",
                extension_for(&image.mime_type)
            ));
            fs::write(&path, bytes)
                .await
                .with_context(|| format!("无法写入图像文件 {path:?}。"))?;
            println!("🖼 已保存 {}", path.display().to_string().cyan());
            written += 1;
        } else if let Some(url) = &image.url {
            println!("🔗 图像地址: {}", url.cyan());
        }
    }

    if let Some(text) = &result.text {
        if !text.trim().is_empty() {
            println!("\n💬 模型附言: {}", text.dimmed());
        }
    }

    println!(
        "🚀 生成完成：{} 张图像（{} 张已落盘），模型 {}/{}。",
        result.images.len(),
        written,
        result.metadata.provider_id,
        result.metadata.model_id
    );
    Ok(())
}

async fn read_input_image(path: &str) -> Result<InputImage> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("无法读取输入图片 {path}。"))?;
    Ok(InputImage {
        b64: BASE64.encode(bytes),
        mime_type: mime_for(Path::new(path)),
    })
}

fn mime_for(path: &Path) -> String {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("webp") => "image/webp".to_string(),
        Some("gif") => "image/gif".to_string(),
        _ => "image/png".to_string(),
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// `k=v` 参数解析：v 先按 JSON 解析（数字/布尔），失败则按字符串处理。
fn parse_params(params: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for raw in params {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("参数 `{raw}` 不是 k=v 形式。");
        };
        let parsed = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        map.insert(key.to_string(), parsed);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_json_scalars_and_fall_back_to_strings() {
        let map = parse_params(&[
            "size=1024x1024".to_string(),
            "steps=20".to_string(),
            "watermark=false".to_string(),
        ])
        .unwrap();
        assert_eq!(map["size"], "1024x1024");
        assert_eq!(map["steps"], 20);
        assert_eq!(map["watermark"], false);

        assert!(parse_params(&["no-equals".to_string()]).is_err());
    }
}
