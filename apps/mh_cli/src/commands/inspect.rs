// apps/mh_cli/src/commands/inspect.rs

//! 重启文件摘要

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mh_io::read_restart;
use tracing::info;

/// 摘要参数
#[derive(Args)]
pub struct InspectArgs {
    /// 重启文件路径
    pub path: PathBuf,

    /// 同时显示各变量的取值范围
    #[arg(long)]
    pub ranges: bool,
}

/// 执行摘要命令
pub fn execute(args: InspectArgs) -> Result<()> {
    info!("读取重启文件: {}", args.path.display());
    let data = read_restart(&args.path).with_context(|| format!("无法读取重启文件: {}", args.path.display()))?;
    let field = &data.field;

    println!("=== 重启文件 ===");
    println!("路径: {}", args.path.display());
    println!("编码: {:?}", data.encoding);
    println!("迭代: {}", data.iteration);
    println!("节点数: {}", field.n_nodes());
    println!("变量数: {} (守恒 {})", field.n_vars(), field.n_conserved);

    println!("\n变量:");
    for (i, (name, values)) in field.names.iter().zip(&field.data).enumerate() {
        let tag = if i < field.n_conserved { "守恒" } else { "派生" };
        if args.ranges {
            let (lo, hi) = values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            println!("  {:<32} [{}] {:>14.6e} .. {:<14.6e}", name, tag, lo, hi);
        } else {
            println!("  {:<32} [{}]", name, tag);
        }
    }
    Ok(())
}
