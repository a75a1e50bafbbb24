//! src/main.rs

use anyhow::Result;
use clap::Parser;

use imagemate::cli::{Cli, Commands};
use imagemate::commands;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();

    let cli = Cli::parse();

    // init 不依赖已有配置，单独处理。
    if let Commands::Init = cli.command {
        return commands::init::handle_init().await;
    }

    let ctx = commands::build_context().await?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Providers => commands::providers::handle_providers(&ctx).await,
        Commands::Models { provider, config } => {
            commands::models::handle_models(&ctx, &provider, config.as_deref()).await
        }
        Commands::List => commands::configs::handle_list(&ctx).await,
        Commands::Add {
            id,
            provider,
            model,
            name,
            api_key,
            base_url,
            disabled,
        } => {
            commands::configs::handle_add(
                &ctx, id, provider, model, name, api_key, base_url, disabled,
            )
            .await
        }
        Commands::Enable { id } => commands::configs::handle_set_enabled(&ctx, &id, true).await,
        Commands::Disable { id } => commands::configs::handle_set_enabled(&ctx, &id, false).await,
        Commands::Delete { id } => commands::configs::handle_delete(&ctx, &id).await,
        Commands::Test { id } => commands::configs::handle_test(&ctx, &id).await,
        Commands::Generate {
            prompt,
            config,
            count,
            input,
            param,
            out,
        } => {
            commands::generate::handle_generate(&ctx, prompt, config, count, input, param, out)
                .await
        }
        Commands::Export { file } => commands::transfer::handle_export(&ctx, file).await,
        Commands::Import { file } => commands::transfer::handle_import(&ctx, &file).await,
        Commands::Cache { action } => commands::cache::handle_cache(&ctx, action).await,
    }
}
