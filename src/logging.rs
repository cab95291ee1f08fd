// 日志管理模块
// 提供异步非阻塞的日志持久化功能

use crate::config::LogLevel;
use crate::sweeper::sweep_matching;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 日志保留天数
const LOG_RETENTION_DAYS: u64 = 7;

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "vocalcut.log";

/// 初始化日志系统
///
/// 返回 WorkerGuard，必须在 main 函数中保持存活，否则异步日志线程会提前退出
pub fn init_logging(data_dir: &Path, log_level: &LogLevel) -> WorkerGuard {
    let log_dir = data_dir.join("logs");

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("创建日志目录失败: {}", e);
    }

    cleanup_old_logs(&log_dir);

    // 按天轮转日志文件
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG 优先于配置文件
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));

    let file_layer = fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true);

    // 控制台日志层 - 仅在 debug 模式下启用
    #[cfg(debug_assertions)]
    {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .init();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }

    guard
}

/// 清理超过保留期限的旧日志文件
fn cleanup_old_logs(log_dir: &Path) {
    let retention = Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    let report = sweep_matching(log_dir, retention, is_log_file);
    if report.failed > 0 {
        eprintln!("删除旧日志文件失败 {} 个", report.failed);
    }
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.starts_with(LOG_FILE_PREFIX))
        .unwrap_or(false)
}
