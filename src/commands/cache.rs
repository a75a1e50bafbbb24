use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::CacheAction;
use crate::commands::AppContext;

pub async fn handle_cache(ctx: &AppContext, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Stats => {
            let stats = ctx.storage.get_storage_stats().context("无法读取缓存统计。")?;
            let quota = ctx.storage.quota_config();
            println!("{}", "图像缓存统计:".bold());
            println!("  记录数: {} / {}", stats.count, quota.max_count);
            println!(
                "  占用: {} / {}",
                human_bytes(stats.total_bytes).cyan(),
                human_bytes(quota.max_cache_bytes)
            );
            println!("  最长保留: {} 天", quota.max_age_secs / 86_400);
        }
        CacheAction::Cleanup => {
            ctx.storage.enforce_quota().context("缓存清理失败。")?;
            let stats = ctx.storage.get_storage_stats()?;
            println!(
                "🧹 清理完成，剩余 {} 条记录，共 {}。",
                stats.count,
                human_bytes(stats.total_bytes).cyan()
            );
        }
        CacheAction::Clear => {
            ctx.storage.clear().context("清空缓存失败。")?;
            println!("🗑 缓存已全部清空。");
        }
    }
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::human_bytes;

    #[test]
    fn bytes_render_with_binary_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(104_857_600), "100.0 MiB");
    }
}
