use anyhow::{Context, Result};
use colored::Colorize;

use crate::commands::AppContext;

pub async fn handle_models(ctx: &AppContext, provider: &str, config: Option<&str>) -> Result<()> {
    let models = ctx
        .service
        .list_models(provider, config)
        .await
        .with_context(|| format!("无法获取服务商 {provider} 的模型列表。"))?;

    if models.is_empty() {
        println!(
            "{}",
            format!("服务商 {provider} 当前没有可列出的模型（Ollama 等本地服务商需要指定配置以动态发现）。")
                .yellow()
        );
        return Ok(());
    }

    println!("{}", format!("{provider} 共 {} 个模型:", models.len()).bold());
    for model in models {
        let mut caps = Vec::new();
        if model.capabilities.text2image {
            caps.push("文生图");
        }
        if model.capabilities.image2image {
            caps.push("图生图");
        }
        if model.capabilities.multi_image {
            caps.push("多图");
        }
        println!(
            "  {} {} [{}]",
            model.id.cyan().bold(),
            model.name,
            caps.join("/")
        );
    }
    Ok(())
}
