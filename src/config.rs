// 配置管理模块

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use crate::error::{AppError, AppResult};
use crate::utils::resolve_tool_path;
use tracing::{info, warn};

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 分离模型运行设备
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
}

impl Default for ComputeDevice {
    fn default() -> Self {
        Self::Cpu
    }
}

/// 存储目录配置（相对路径基于数据目录解析）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 成品文件目录，按 {job_id}.{ext} 平铺存放
    pub artifact_dir: PathBuf,
    /// 临时工作区根目录，不参与定时清理
    pub scratch_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("download_pool"),
            scratch_dir: PathBuf::from("scratch"),
        }
    }
}

/// 外部工具路径
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub yt_dlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Open-Unmix 命令行
    pub separator: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: resolve_tool_path("yt-dlp"),
            ffmpeg: resolve_tool_path("ffmpeg"),
            ffprobe: resolve_tool_path("ffprobe"),
            separator: resolve_tool_path("umx"),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// 传给 yt-dlp 的内部重试次数
    pub retries: u32,
    /// yt-dlp 因瞬时网络错误退出后重新启动下载的次数
    #[serde(default = "default_process_retries")]
    pub process_retries: u32,
    /// 套接字超时 (秒)
    pub socket_timeout_secs: u64,
    /// 首次重试前的等待时间 (毫秒)，之后指数递增
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    pub user_agent: String,
    pub geo_bypass: bool,
}

fn default_process_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            process_retries: default_process_retries(),
            socket_timeout_secs: 30,
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3".to_string(),
            geo_bypass: true,
        }
    }
}

/// 人声分离配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationConfig {
    /// Open-Unmix 模型名
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default)]
    pub device: ComputeDevice,
}

fn default_model_name() -> String {
    "umxl".to_string()
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            model: default_model_name(),
            device: ComputeDevice::default(),
        }
    }
}

/// 并发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 同时执行的任务数上限
    pub max_concurrent_jobs: usize,
    /// 等待执行的任务数上限，超出后拒绝提交
    pub max_queued_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: (num_cpus::get() / 2).max(1),
            max_queued_jobs: 8,
        }
    }
}

/// 成品文件保留策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// 成品最长保留时间 (秒)
    pub max_age_secs: u64,
    /// 清理扫描间隔 (秒)
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 60 * 60,
            sweep_interval_secs: 15 * 60,
        }
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub separation: SeparationConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,
}

impl AppConfig {
    /// 将存储目录中的相对路径解析到数据目录下
    pub fn resolve_paths(mut self, data_dir: &Path) -> Self {
        if self.storage.artifact_dir.is_relative() {
            self.storage.artifact_dir = data_dir.join(&self.storage.artifact_dir);
        }
        if self.storage.scratch_dir.is_relative() {
            self.storage.scratch_dir = data_dir.join(&self.storage.scratch_dir);
        }
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.workers.max_concurrent_jobs == 0 {
            return Err(AppError::Config("max_concurrent_jobs 必须大于 0".to_string()));
        }
        if self.storage.artifact_dir == self.storage.scratch_dir {
            return Err(AppError::Config("成品目录与临时目录不能相同".to_string()));
        }
        Ok(())
    }
}

/// 加载配置，文件不存在时写入默认配置
pub fn load_config(config_path: &Path) -> AppResult<AppConfig> {
    let config = if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("配置文件 JSON 解析失败: {}，使用默认配置", e);
            AppConfig::default()
        })
    } else {
        let config = AppConfig::default();
        save_config(config_path, &config)?;
        config
    };

    config.validate()?;
    info!("[CONFIG] 配置已加载: {:?}", config_path);
    Ok(config)
}

/// 保存配置
pub fn save_config(config_path: &Path, config: &AppConfig) -> AppResult<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content)?;
    Ok(())
}

/// 仅读取日志级别（日志系统初始化早于配置加载）
pub fn read_log_level(config_path: &Path) -> LogLevel {
    fs::read_to_string(config_path)
        .ok()
        .and_then(|content| serde_json::from_str::<AppConfig>(&content).ok())
        .map(|config| config.log_level)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.fetch.retries, 10);
        assert_eq!(config.retention.max_age_secs, 3600);
        assert_eq!(config.retention.sweep_interval_secs, 900);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"log_level":"debug","separation":{"device":"cuda"}}"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.separation.device, ComputeDevice::Cuda);
        assert_eq!(config.separation.model, "umxl");
        assert_eq!(read_log_level(&path), LogLevel::Debug);
    }

    #[test]
    fn test_resolve_relative_storage() {
        let config = AppConfig::default().resolve_paths(Path::new("/srv/data"));
        assert_eq!(config.storage.artifact_dir, PathBuf::from("/srv/data/download_pool"));
        assert_eq!(config.storage.scratch_dir, PathBuf::from("/srv/data/scratch"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.workers.max_concurrent_jobs = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
