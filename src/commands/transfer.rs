use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde_json::Value;
use tokio::fs;

use crate::commands::AppContext;

pub async fn handle_export(ctx: &AppContext, file: Option<String>) -> Result<()> {
    let configs = ctx.manager.export_data().await?;
    let payload = serde_json::to_string_pretty(&configs).context("无法序列化模型配置。")?;

    match file {
        Some(path) => {
            fs::write(&path, payload)
                .await
                .with_context(|| format!("无法写入导出文件 {path}。"))?;
            println!("📦 已导出 {} 个配置到 {}。", configs.len(), path.cyan());
        }
        None => println!("{payload}"),
    }
    Ok(())
}

pub async fn handle_import(ctx: &AppContext, file: &str) -> Result<()> {
    let raw = fs::read_to_string(file)
        .await
        .with_context(|| format!("无法读取导入文件 {file}。"))?;
    let value: Value = serde_json::from_str(&raw).context("导入文件不是合法的 JSON。")?;
    if !ctx.manager.validate_data(&value) {
        bail!("导入文件格式不对：应为包含 providerId / modelId 字段的配置数组。");
    }
    let records = value.as_array().cloned().unwrap_or_default();
    let total = records.len();

    let report = ctx.manager.import_data(records).await?;
    println!("📥 导入完成：{} / {} 个配置成功。", report.imported, total);
    for failure in &report.failures {
        let id = failure.config_id.as_deref().unwrap_or("<无 id>");
        println!(
            "  {} 第 {} 条（{}）: {}",
            "✗".red(),
            failure.index + 1,
            id.cyan(),
            failure.message
        );
    }
    Ok(())
}
