// 错误处理模块

use thiserror::Error;
use serde::{Deserialize, Serialize};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("无法解析媒体地址: {0}")]
    UnresolvableSource(String),

    #[error("未检测到可用的音频或视频流")]
    NoMedia,

    #[error("下载失败: {0}")]
    FetchFailed(String),

    #[error("音频转码失败: {0}")]
    TranscodeFailed(String),

    #[error("人声分离错误: {0}")]
    SeparationFailed(String),

    #[error("音视频合并失败: {0}")]
    MuxFailed(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("任务冲突: {0}")]
    Conflict(String),

    #[error("任务队列已满，请稍后再试")]
    Busy,

    #[error("任务已取消")]
    Cancelled,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("后台任务异常: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Task(e.to_string())
    }
}

/// 可序列化的错误类别，记录在任务的 Failed 状态中
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnresolvableSource,
    NoMedia,
    FetchFailed,
    TranscodeFailed,
    SeparationFailed,
    MuxFailed,
    NotFound,
    Conflict,
    Busy,
    Cancelled,
    InvalidArgument,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UnresolvableSource(_) => ErrorKind::UnresolvableSource,
            AppError::NoMedia => ErrorKind::NoMedia,
            AppError::FetchFailed(_) => ErrorKind::FetchFailed,
            AppError::TranscodeFailed(_) => ErrorKind::TranscodeFailed,
            AppError::SeparationFailed(_) => ErrorKind::SeparationFailed,
            AppError::MuxFailed(_) => ErrorKind::MuxFailed,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Busy => ErrorKind::Busy,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppError::Io(_) | AppError::Json(_) | AppError::Config(_) | AppError::Task(_) => {
                ErrorKind::Internal
            }
        }
    }
}

// 实现 Serialize 以便直接返回给调用方
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// 截断外部工具的错误输出，避免把整段日志暴露给用户
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}
