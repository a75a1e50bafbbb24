use anyhow::{Context, Result};
use colored::Colorize;

use crate::commands::AppContext;
use crate::manager::ModelConfig;
use crate::provider::ConnectionConfig;

pub async fn handle_list(ctx: &AppContext) -> Result<()> {
    let configs = ctx.manager.get_all_configs().await?;
    if configs.is_empty() {
        println!("{}", "还没有任何模型配置，先用 `imagemate add` 创建一个吧。".yellow());
        return Ok(());
    }

    println!("{}", format!("共 {} 个模型配置:", configs.len()).bold());
    for config in configs {
        let status = if config.enabled {
            "✅ 已启用".green()
        } else {
            "⏸ 已禁用".yellow()
        };
        println!(
            "  {} {} — {}/{} {}",
            config.id.cyan().bold(),
            config.name,
            config.provider_id,
            config.model_id,
            status
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_add(
    ctx: &AppContext,
    id: String,
    provider: String,
    model: String,
    name: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    disabled: bool,
) -> Result<()> {
    let mut config = ModelConfig::bare(&id, &provider, &model);
    if let Some(name) = name {
        config.name = name;
    }
    config.enabled = !disabled;
    config.connection_config = ConnectionConfig {
        api_key,
        base_url,
        ..Default::default()
    };

    let saved = ctx
        .manager
        .add_config(config)
        .await
        .with_context(|| format!("无法添加配置 {id}。"))?;

    println!("✨ 已添加配置 {}（{}/{}）。", saved.id.cyan(), saved.provider_id, saved.model_id);
    if saved.connection_config.api_key().is_none()
        && saved.provider.as_ref().is_some_and(|p| p.requires_api_key)
    {
        println!(
            "{}",
            "提示: 该服务商需要 API 密钥，当前未配置，生成时会回退到环境变量。".yellow()
        );
    }
    Ok(())
}

pub async fn handle_set_enabled(ctx: &AppContext, id: &str, enabled: bool) -> Result<()> {
    let mut config = ctx
        .manager
        .get_config(id)
        .await
        .with_context(|| format!("找不到配置 {id}。"))?;
    config.enabled = enabled;
    ctx.manager.update_config(id, config).await?;

    if enabled {
        println!("✅ 配置 {} 已启用。", id.cyan());
    } else {
        println!("⏸ 配置 {} 已禁用。", id.cyan());
    }
    Ok(())
}

pub async fn handle_delete(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.manager
        .delete_config(id)
        .await
        .with_context(|| format!("无法删除配置 {id}。"))?;
    println!("🗑 配置 {} 已删除（如果它存在的话）。", id.cyan());
    Ok(())
}

pub async fn handle_test(ctx: &AppContext, id: &str) -> Result<()> {
    println!("🔌 正在测试配置 {} 的连通性...", id.cyan());
    let report = ctx
        .service
        .test_connection(id)
        .await
        .with_context(|| format!("配置 {id} 连通性测试失败。"))?;

    if report.dynamic {
        println!(
            "✅ 连接成功：{} 实时返回了 {} 个模型。",
            report.provider_id.cyan(),
            report.model_count
        );
    } else {
        println!(
            "✅ 配置可用：{} 不支持动态发现，静态目录共 {} 个模型。",
            report.provider_id.cyan(),
            report.model_count
        );
    }
    Ok(())
}
