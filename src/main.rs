//! flowbee 命令行：离线工具
//!
//! - `flowbee order-states <file>`：按迁移对状态机 JSON 中的 states 排序并输出
//! - `flowbee build-config <name>`：按 [dispatcher] config_root 构建处理器配置并输出

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use flowbee::cli::{Cli, Command};
use flowbee::config::load_config;
use flowbee::dispatcher::{ConfigBuilder, DirConfigSource};
use flowbee::fsm::order_states_json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    flowbee::observability::init();

    match cli.command {
        Command::OrderStates { file } => order_states(file).await,
        Command::BuildConfig { name } => build_config(cli.config, &name).await,
    }
}

async fn order_states(file: PathBuf) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let fsm: serde_json::Value =
        serde_json::from_str(&text).context("Workflow file is not valid JSON")?;
    let ordered = order_states_json(&fsm)?;
    println!("{}", serde_json::to_string_pretty(&ordered)?);
    Ok(())
}

async fn build_config(config_path: Option<PathBuf>, name: &str) -> anyhow::Result<()> {
    let config = load_config(config_path).context("Failed to load configuration")?;
    let source = DirConfigSource::new(&config.dispatcher.config_root);
    let builder = ConfigBuilder::new(Arc::new(source));
    let processor = builder
        .build(name)
        .await
        .with_context(|| format!("Failed to build config for {}", name))?;
    println!("{}", serde_json::to_string_pretty(&processor)?);
    Ok(())
}
