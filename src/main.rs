//! Weaver - 无头执行器
//!
//! 用法：`weaver [--config <path>] <goal...>`，运行结束后把 RunReport 以 JSON 打印到 stdout。
//! Ctrl-C 会取消运行（回滚已做的改动）。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use weaver::config::load_config;
use weaver::core::{build_from_config, RunRequest};
use weaver::observability;

#[derive(Parser)]
#[command(name = "weaver", version, about = "Plan and execute a design goal headless")]
struct Cli {
    /// 额外配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 目标描述，多个词以空格拼接
    #[arg(required = true)]
    goal: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = Cli::parse();
    let goal = cli.goal.join(" ");
    let cfg = load_config(cli.config).context("Failed to load config")?;
    let orchestrator = build_from_config(&cfg)
        .await
        .context("Failed to build orchestrator")?;

    let (run_id, handle) = orchestrator
        .spawn(RunRequest::new(goal))
        .await
        .context("Run rejected")?;

    tokio::pin!(handle);
    let report = tokio::select! {
        joined = &mut handle => joined.context("Run task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(run_id = %run_id, "interrupted, cancelling run");
            orchestrator.shutdown();
            handle.await.context("Run task panicked")?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
