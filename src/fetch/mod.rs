// 媒体获取模块
//
// 子模块：
// - ytdlp: 调用 yt-dlp 解析地址、下载指定格式
//
// 本模块定义外部获取服务的接口、流选择策略以及带重试的下载。

pub mod ytdlp;

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// 视频流可接受的高度范围 (像素，含边界)
pub const MIN_VIDEO_HEIGHT: u32 = 480;
pub const MAX_VIDEO_HEIGHT: u32 = 720;

/// 单个可下载的流
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamInfo {
    /// 请求该流所用的格式标识
    pub format_id: String,
    /// 容器扩展名
    pub ext: String,
    /// 视频编码，None 表示无视频
    pub video_codec: Option<String>,
    /// 音频编码，None 表示无音频
    pub audio_codec: Option<String>,
    /// 垂直分辨率
    pub height: Option<u32>,
}

/// 流的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    VideoOnly,
    AudioOnly,
    Muxed,
    Empty,
}

impl StreamInfo {
    pub fn kind(&self) -> StreamKind {
        match (self.video_codec.is_some(), self.audio_codec.is_some()) {
            (true, false) => StreamKind::VideoOnly,
            (false, true) => StreamKind::AudioOnly,
            (true, true) => StreamKind::Muxed,
            (false, false) => StreamKind::Empty,
        }
    }

    fn height_in_range(&self) -> bool {
        let height = self.height.unwrap_or(0);
        (MIN_VIDEO_HEIGHT..=MAX_VIDEO_HEIGHT).contains(&height)
    }
}

/// 地址解析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// 规范化后的源地址
    pub source_url: String,
    pub title: Option<String>,
    /// 按获取服务返回的顺序排列
    pub streams: Vec<StreamInfo>,
}

impl MediaDescriptor {
    pub fn has_usable_media(&self) -> bool {
        self.streams.iter().any(|s| s.kind() != StreamKind::Empty)
    }
}

/// 任务产物类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Audio,
    Video,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Audio => "audio",
            JobKind::Video => "video",
        }
    }

    /// 最终成品扩展名
    pub fn output_extension(&self) -> &'static str {
        match self {
            JobKind::Audio => "wav",
            JobKind::Video => "mp4",
        }
    }
}

/// 选中的下载目标
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSelection {
    pub video: Option<StreamInfo>,
    pub audio: StreamInfo,
}

impl StreamSelection {
    pub fn kind(&self) -> JobKind {
        if self.video.is_some() {
            JobKind::Video
        } else {
            JobKind::Audio
        }
    }
}

/// 选择下载目标
///
/// 同时存在纯视频流和纯音频流时，取第一个高度在 [480, 720] 的纯视频流；
/// 没有符合的视频流则按纯音频处理。纯音频流总是取第一个。
/// 没有纯音频流时无法提取人声，返回 NoMedia。
pub fn select_streams(descriptor: &MediaDescriptor) -> AppResult<StreamSelection> {
    let audio = descriptor
        .streams
        .iter()
        .find(|s| s.kind() == StreamKind::AudioOnly)
        .cloned()
        .ok_or(AppError::NoMedia)?;

    let video = descriptor
        .streams
        .iter()
        .find(|s| s.kind() == StreamKind::VideoOnly && s.height_in_range())
        .cloned();

    if video.is_none() && descriptor.streams.iter().any(|s| s.kind() == StreamKind::VideoOnly) {
        info!("[FETCH] 没有 {}-{}p 的视频流，按纯音频处理", MIN_VIDEO_HEIGHT, MAX_VIDEO_HEIGHT);
    }

    Ok(StreamSelection { video, audio })
}

/// 下载失败的类型
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// 网络抖动等可重试的错误
    Transient(String),
    /// 不可重试的错误
    Fatal(String),
}

/// 外部获取服务
pub trait FetchService: Send + Sync {
    /// 解析地址，列出可用的流
    fn probe(&self, url: &str) -> AppResult<MediaDescriptor>;

    /// 下载指定格式到目标路径
    fn fetch(&self, url: &str, format_id: &str, dest: &Path) -> Result<(), FetchError>;
}

/// 下载重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// 解析地址并校验至少存在可用的流
pub fn probe(service: &dyn FetchService, url: &str) -> AppResult<MediaDescriptor> {
    let descriptor = service.probe(url)?;
    if !descriptor.has_usable_media() {
        return Err(AppError::NoMedia);
    }
    info!("[FETCH] 解析完成: {} 个流, title={:?}", descriptor.streams.len(), descriptor.title);
    Ok(descriptor)
}

/// 下载选中的流，瞬时错误按指数退避重试
pub fn download(
    service: &dyn FetchService,
    descriptor: &MediaDescriptor,
    stream: &StreamInfo,
    dest: &Path,
    policy: &RetryPolicy,
) -> AppResult<()> {
    let mut attempt = 0u32;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;
        match service.fetch(&descriptor.source_url, &stream.format_id, dest) {
            Ok(()) => {
                info!("[FETCH] 下载完成: format={}, 尝试次数={}, 目标={:?}", stream.format_id, attempt, dest);
                return Ok(());
            }
            Err(FetchError::Transient(message)) if attempt <= policy.max_retries => {
                warn!(
                    "[FETCH] 下载出现瞬时错误 (第 {}/{} 次重试): {}",
                    attempt, policy.max_retries, message
                );
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(FetchError::Transient(message)) | Err(FetchError::Fatal(message)) => {
                return Err(AppError::FetchFailed(message));
            }
        }
    }
}
