use anyhow::Result;
use colored::Colorize;

use crate::commands::AppContext;

pub async fn handle_providers(ctx: &AppContext) -> Result<()> {
    let providers = ctx.registry.all_providers();

    println!("{}", format!("共支持 {} 个图像服务商:", providers.len()).bold());
    for provider in providers {
        let key_hint = if provider.requires_api_key {
            "需要 API 密钥".yellow()
        } else {
            "无需密钥".green()
        };
        let dynamic_hint = if provider.supports_dynamic_models {
            " · 支持动态模型发现"
        } else {
            ""
        };
        println!(
            "  {} {} ({}{})",
            provider.id.cyan().bold(),
            provider.name,
            key_hint,
            dynamic_hint
        );
        if !provider.description.is_empty() {
            println!("      {}", provider.description.dimmed());
        }
    }
    Ok(())
}
