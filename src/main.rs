//! bee-research：命令行入口
//!
//! 加载 .env 与配置，初始化日志，对一个问题跑完整研究循环，把会话记录（JSON）写到 stdout 或 --output。

use std::path::PathBuf;

use anyhow::Context;
use bee_research::agent::AgentComponents;
use bee_research::config::load_config;
use bee_research::observability;
use bee_research::react::{ReactEvent, SessionRecord};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Deep-research agent: searches and reads the web until it can answer a question.
#[derive(Parser, Debug)]
#[command(name = "bee-research", version, about)]
struct Cli {
    /// The research question.
    question: String,

    /// Extra config file layered over config/default.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the session record (JSON) to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override [agent].max_turns.
    #[arg(long)]
    max_turns: Option<usize>,

    /// Reference answer stored alongside the prediction.
    #[arg(long)]
    ground_truth: Option<String>,

    /// Print progress events to stderr and raise the log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    observability::init(cli.verbose);

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let agent = AgentComponents::from_config(&cfg).context("Failed to create agent")?;

    let mut task = agent.task(cli.question.as_str());
    if let Some(turns) = cli.max_turns {
        task = task.with_turn_limit(turns);
    }
    if let Some(answer) = cli.ground_truth.as_deref() {
        task = task.with_ground_truth(answer);
    }

    // Ctrl-C 取消会话，已写入的对话仍会输出
    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ReactEvent>();
    let printer = cli.verbose.then(|| {
        tokio::spawn(async move {
            while let Some(ev) = event_rx.recv().await {
                if let Ok(line) = serde_json::to_string(&ev) {
                    eprintln!("{line}");
                }
            }
        })
    });

    let result = agent
        .run_task(&task, cancel, cli.verbose.then_some(&event_tx))
        .await;
    drop(event_tx);
    if let Some(handle) = printer {
        let _ = handle.await;
    }

    let (prompt_tokens, completion_tokens, total_tokens) = agent.llm.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, turns = result.turns, "session finished");

    let status = result.status;
    if let Some(reason) = result.reason.as_deref() {
        tracing::warn!(status = %status, reason, "session ended without an answer");
    }
    let record = SessionRecord::new(&task, result);
    let json = serde_json::to_string_pretty(&record).context("Failed to serialize session record")?;
    match cli.output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
