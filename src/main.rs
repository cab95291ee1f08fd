// VocalCut - 命令行入口

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vocalcut::config::{load_config, read_log_level, AppConfig};
use vocalcut::pipeline::Toolchain;
use vocalcut::sweeper::Sweeper;
use vocalcut::utils::{get_app_data_dir, short_id};
use vocalcut::{logging, AppError, AppResult, Orchestrator};

/// 状态轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "vocalcut")]
#[command(about = "从在线媒体中提取人声")]
#[command(version)]
struct Cli {
    /// 数据目录（配置、日志、成品、临时文件）
    #[arg(long, global = true, env = "VOCALCUT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 处理一个地址，等待完成后输出成品
    Run {
        url: String,

        /// 任务 ID，默认随机生成
        #[arg(long)]
        job_id: Option<String>,

        /// 成品复制到该路径；省略时只打印成品路径
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 执行一次成品清理
    Sweep,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(get_app_data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("创建数据目录失败 {:?}: {}", data_dir, e);
        return ExitCode::FAILURE;
    }

    let config_path = data_dir.join("config.json");

    // guard 必须保持存活，否则异步日志线程会退出
    let _log_guard = logging::init_logging(&data_dir, &read_log_level(&config_path));
    info!("VocalCut 启动, 数据目录: {:?}", data_dir);

    match run(cli.command, &data_dir, &config_path).await {
        Ok(code) => code,
        Err(e) => {
            error!("执行失败: {}", e);
            eprintln!("错误: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, data_dir: &Path, config_path: &Path) -> AppResult<ExitCode> {
    let config = load_config(config_path)?.resolve_paths(data_dir);
    config.validate()?;
    std::fs::create_dir_all(&config.storage.artifact_dir)?;

    match command {
        Command::Sweep => {
            let report = Sweeper::from_config(&config.storage.artifact_dir, &config.retention)
                .tick()
                .await;
            println!("{}", serde_json::to_string(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { url, job_id, output } => {
            let job_id = job_id.unwrap_or_else(short_id);
            process(&config, &job_id, &url, output.as_deref()).await
        }
    }
}

async fn process(config: &AppConfig, job_id: &str, url: &str, output: Option<&Path>) -> AppResult<ExitCode> {
    let shutdown = CancellationToken::new();
    let orchestrator = Orchestrator::new(config, Toolchain::from_config(config));

    // 成品过期后，对应的任务条目随清理一并移除
    let reaper = orchestrator.clone();
    let max_age = config.retention.max_age();
    let sweeper = Sweeper::from_config(&config.storage.artifact_dir, &config.retention)
        .spawn(shutdown.clone(), move |_| {
            reaper.evict_expired(max_age);
        });

    let result = wait_for_artifact(&orchestrator, job_id, url, output).await;

    orchestrator.shutdown().await;
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("清理任务异常退出: {}", e);
    }

    result
}

async fn wait_for_artifact(
    orchestrator: &Orchestrator,
    job_id: &str,
    url: &str,
    output: Option<&Path>,
) -> AppResult<ExitCode> {
    let kind = orchestrator.submit(job_id, url).await?;
    println!("任务 {} 已提交，成品类型: {}", job_id, kind.as_str());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("收到中断信号，取消任务 {}", job_id);
                return Err(AppError::Cancelled);
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let status = orchestrator.poll_status(job_id)?;
        if status.ready {
            break;
        }
        if status.failed {
            let reason = status.error.unwrap_or_else(|| format!("{:?}", status.state));
            eprintln!("任务失败: {}", reason);
            return Ok(ExitCode::FAILURE);
        }
    }

    let artifact = orchestrator.collect(job_id)?;
    match output {
        Some(dest) => {
            std::fs::copy(&artifact, dest)?;
            println!("{}", dest.display());
        }
        None => println!("{}", artifact.display()),
    }
    Ok(ExitCode::SUCCESS)
}
