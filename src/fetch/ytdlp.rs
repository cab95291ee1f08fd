// yt-dlp 封装
//
// 解析: yt-dlp -J 输出单个 JSON，formats 数组按质量从低到高排列
// 下载: yt-dlp -f <format_id> -o <dest>，输出路径为字面量（不含模板占位符）

use super::{FetchError, FetchService, MediaDescriptor, StreamInfo};
use crate::config::FetchConfig;
use crate::error::{truncate_message, AppError, AppResult};
use crate::utils::hidden_command;
use regex::Regex;
use std::path::Path;
use tracing::{debug, error, info};

lazy_static::lazy_static! {
    // 可重试的网络错误特征
    static ref TRANSIENT_REGEX: Regex = Regex::new(
        r"(?i)(timed out|connection (reset|aborted|refused)|temporary failure|http error 5\d\d|incompleteread|remote end closed|network is unreachable)"
    ).unwrap();
}

/// 错误信息最大长度
const MAX_ERROR_CHARS: usize = 500;

/// yt-dlp 未给出编码字段时使用的占位值
const UNKNOWN_CODEC: &str = "unknown";

/// 基于 yt-dlp 的获取服务
pub struct YtDlpFetcher {
    program: String,
    config: FetchConfig,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>, config: FetchConfig) -> Self {
        Self {
            program: program.into(),
            config,
        }
    }

    /// 解析与下载共用的网络参数
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--user-agent".to_string(),
            self.config.user_agent.clone(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_secs.to_string(),
        ];
        if self.config.geo_bypass {
            args.push("--geo-bypass".to_string());
        }
        args
    }
}

impl FetchService for YtDlpFetcher {
    fn probe(&self, url: &str) -> AppResult<MediaDescriptor> {
        info!("[FETCH] 解析地址: {}", url);

        let mut args = vec!["-J".to_string(), "--skip-download".to_string()];
        args.extend(self.common_args());
        args.push(url.to_string());

        let output = hidden_command(&self.program)
            .args(&args)
            .output()
            .map_err(|e| AppError::UnresolvableSource(format!("yt-dlp 执行失败: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("[FETCH] yt-dlp 解析失败: {}", stderr.trim());
            return Err(AppError::UnresolvableSource(error_summary(&stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_descriptor(url, &stdout)
    }

    fn fetch(&self, url: &str, format_id: &str, dest: &Path) -> Result<(), FetchError> {
        debug!("[FETCH] 下载 format={} -> {:?}", format_id, dest);

        let mut args = vec![
            "-f".to_string(),
            format_id.to_string(),
            "-o".to_string(),
            dest.to_string_lossy().to_string(),
            "--no-part".to_string(),
            "--quiet".to_string(),
            "--retries".to_string(),
            self.config.retries.to_string(),
        ];
        args.extend(self.common_args());
        args.push(url.to_string());

        let output = hidden_command(&self.program)
            .args(&args)
            .output()
            .map_err(|e| FetchError::Fatal(format!("yt-dlp 执行失败: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        if !dest.exists() {
            return Err(FetchError::Fatal(format!("yt-dlp 未生成输出文件: {}", dest.display())));
        }

        Ok(())
    }
}

/// 根据 stderr 判断是否可重试
fn classify_failure(stderr: &str) -> FetchError {
    let summary = error_summary(stderr);
    if TRANSIENT_REGEX.is_match(stderr) {
        FetchError::Transient(summary)
    } else {
        FetchError::Fatal(summary)
    }
}

/// 提取 yt-dlp 的 ERROR 行作为用户可读的错误信息
fn error_summary(stderr: &str) -> String {
    let message = stderr
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ERROR:"))
        .last()
        .map(|line| line.trim().to_string())
        .or_else(|| {
            stderr
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .last()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "yt-dlp 未返回错误信息".to_string());
    truncate_message(&message, MAX_ERROR_CHARS)
}

/// 只有显式的 "none" 表示没有该类型的轨道；字段缺失时视为编码未知但存在
fn codec_field(format: &serde_json::Value, key: &str) -> Option<String> {
    match format[key].as_str() {
        Some("none") => None,
        Some(codec) => Some(codec.to_string()),
        None => Some(UNKNOWN_CODEC.to_string()),
    }
}

/// 解析 yt-dlp -J 的输出
fn parse_descriptor(url: &str, json_text: &str) -> AppResult<MediaDescriptor> {
    let json: serde_json::Value = serde_json::from_str(json_text)
        .map_err(|e| AppError::UnresolvableSource(format!("解析 yt-dlp 输出失败: {}", e)))?;

    let streams = json["formats"]
        .as_array()
        .map(|formats| {
            formats
                .iter()
                .filter_map(|format| {
                    let format_id = format["format_id"].as_str()?.to_string();
                    Some(StreamInfo {
                        format_id,
                        ext: format["ext"].as_str().unwrap_or("bin").to_string(),
                        video_codec: codec_field(format, "vcodec"),
                        audio_codec: codec_field(format, "acodec"),
                        height: format["height"].as_u64().map(|h| h as u32),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let source_url = json["webpage_url"]
        .as_str()
        .filter(|u| !u.is_empty())
        .unwrap_or(url)
        .to_string();

    Ok(MediaDescriptor {
        source_url,
        title: json["title"].as_str().map(str::to_string),
        streams,
    })
}
