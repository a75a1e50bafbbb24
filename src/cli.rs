//! src/cli.rs
use clap::{Parser, Subcommand};

/// 多平台 AI 图像生成的命令行工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 初始化 imagemate 配置文件
    #[command(alias = "i")]
    Init,

    /// 列出所有支持的图像服务商
    #[command(alias = "p")]
    Providers,

    /// 列出某个服务商的可用模型（支持动态发现的服务商会实时拉取）
    #[command(alias = "m")]
    Models {
        /// 服务商 id，如 openai / dashscope / ollama
        provider: String,

        /// 用指定配置的凭据去拉取动态模型列表
        #[arg(short, long)]
        config: Option<String>,
    },

    /// 列出所有已保存的模型配置
    #[command(alias = "ls")]
    List,

    /// 新增一个模型配置
    #[command(alias = "a")]
    Add {
        /// 配置 id（唯一，创建后不可修改）
        id: String,

        /// 服务商 id
        #[arg(short, long)]
        provider: String,

        /// 模型 id
        #[arg(short, long)]
        model: String,

        /// 显示名称，默认与 id 相同
        #[arg(short, long)]
        name: Option<String>,

        /// API 密钥，缺省时回退到对应环境变量
        #[arg(long)]
        api_key: Option<String>,

        /// 自定义 API 地址
        #[arg(long)]
        base_url: Option<String>,

        /// 创建后保持禁用
        #[arg(long)]
        disabled: bool,
    },

    /// 启用一个模型配置
    Enable { id: String },

    /// 禁用一个模型配置
    Disable { id: String },

    /// 删除一个模型配置（不存在时静默成功）
    #[command(alias = "rm")]
    Delete { id: String },

    /// 测试某个配置的连通性
    #[command(alias = "t")]
    Test { id: String },

    /// 生成图像
    #[command(alias = "g")]
    Generate {
        /// 提示词
        prompt: String,

        /// 使用的配置 id，缺省时取 config.toml 的 default_config
        #[arg(short, long)]
        config: Option<String>,

        /// 生成张数（需要模型支持多图能力）
        #[arg(long)]
        count: Option<u32>,

        /// 输入图片路径，可重复（图生图，需要模型支持）
        #[arg(short, long)]
        input: Vec<String>,

        /// 额外参数覆盖，形如 k=v，可重复
        #[arg(long, value_name = "K=V")]
        param: Vec<String>,

        /// 图片输出目录，默认当前目录
        #[arg(short, long)]
        out: Option<String>,
    },

    /// 导出所有模型配置为 JSON
    Export {
        /// 输出文件路径，缺省时打印到标准输出
        #[arg(short, long)]
        file: Option<String>,
    },

    /// 从 JSON 文件导入模型配置（部分失败不影响其余记录）
    Import {
        /// 输入文件路径
        #[arg(short, long)]
        file: String,
    },

    /// 图像缓存管理
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// 显示缓存占用统计
    Stats,
    /// 立即按配额清理缓存
    Cleanup,
    /// 清空全部缓存
    Clear,
}
