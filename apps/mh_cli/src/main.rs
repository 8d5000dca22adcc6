// apps/mh_cli/src/main.rs

//! MariHydro 命令行界面
//!
//! 分布式结果输出的命令行驱动：
//!
//! - `run`: 以线程 rank 运行生成网格 + 解析流场，周期性写出结果与收敛历史
//! - `inspect`: 显示重启文件摘要
//! - `validate`: 校验输出配置文件

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// MariHydro 结果输出命令行工具
#[derive(Parser)]
#[command(name = "mh_cli")]
#[command(author = "MariHydro Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MariHydro distributed result output driver", long_about = None)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行输出演示
    Run(commands::run::RunArgs),
    /// 显示重启文件摘要
    Inspect(commands::inspect::InspectArgs),
    /// 验证配置
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Inspect(args) => commands::inspect::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
    }
}
