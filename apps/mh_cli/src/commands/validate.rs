// apps/mh_cli/src/commands/validate.rs

//! 配置验证命令
//!
//! 解析并校验输出配置文件，另外检查启用的格式在当前构建中是否可用。

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;
use mh_config::{OutputConfig, SurfaceMode};
use mh_io::Capabilities;
use tracing::{error, info, warn};

/// 验证参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 配置文件路径
    pub config: PathBuf,

    /// 严格模式（警告也视为错误）
    #[arg(long)]
    pub strict: bool,
}

/// 验证结果
#[derive(Default)]
struct ValidationResult {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationResult {
    fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn is_ok_strict(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// 执行验证命令
pub fn execute(args: ValidateArgs) -> Result<()> {
    info!("=== MariHydro 配置验证 ===");

    let mut result = ValidationResult::default();
    validate_config(&args.config, &mut result)?;
    print_validation_result(&result, args.strict)
}

fn validate_config(path: &Path, result: &mut ValidationResult) -> Result<()> {
    println!("\n检查配置文件: {}", path.display());

    if !path.exists() {
        result.add_error(format!("配置文件不存在: {}", path.display()));
        return Ok(());
    }

    // 解析与取值校验由配置层完成
    let config = match OutputConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            result.add_error(e.to_string());
            return Ok(());
        }
    };
    println!("  ✓ 配置文件格式有效");

    check_formats(&config, result);
    check_surface(&config, result);

    if config.directory.exists() && !config.directory.is_dir() {
        result.add_error(format!("输出路径不是目录: {}", config.directory.display()));
    }
    let dir = config.directory.canonicalize().unwrap_or_else(|_| config.directory.clone());
    println!("  输出目录: {}", dir.display());
    Ok(())
}

fn check_formats(config: &OutputConfig, result: &mut ValidationResult) {
    let enabled = config.enabled_formats();
    if enabled.is_empty() {
        result.add_warning("没有启用任何体输出格式");
    }

    let caps = Capabilities::detect().with_disabled(&config.disabled_formats);
    for format in enabled {
        if caps.is_available(format) {
            println!("  ✓ {} -> {}", format, config.stem(format));
        } else {
            result.add_warning(format!("格式 {} 已启用但不可用，写出时将被跳过", format));
        }
    }
}

fn check_surface(config: &OutputConfig, result: &mut ValidationResult) {
    let surface = &config.surface;
    if !surface.enabled {
        return;
    }
    let mut seen = Vec::new();
    for name in &surface.markers {
        if seen.contains(&name) {
            result.add_warning(format!("表面标记重复: {}", name));
        }
        seen.push(name);
    }
    if surface.mode == SurfaceMode::PerProcess && surface.full_format {
        result.add_warning("逐进程表面导出的 ASCII 文件每个 rank 各一份");
    }
    println!("  ✓ 表面导出: {:?} {:?}", surface.mode, surface.markers);
}

fn print_validation_result(result: &ValidationResult, strict: bool) -> Result<()> {
    println!("\n=== 验证结果 ===");

    for e in &result.errors {
        error!("{}", e);
        println!("  ✗ 错误: {}", e);
    }
    for w in &result.warnings {
        warn!("{}", w);
        println!("  ⚠ 警告: {}", w);
    }

    let passed = if strict { result.is_ok_strict() } else { result.is_ok() };
    if passed {
        println!("\n✓ 验证通过");
        Ok(())
    } else {
        bail!(
            "验证失败: {} 个错误, {} 个警告{}",
            result.errors.len(),
            result.warnings.len(),
            if strict { "（严格模式）" } else { "" }
        )
    }
}
