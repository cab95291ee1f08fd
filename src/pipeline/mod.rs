// 任务处理流水线
//
// 子模块：
// - normalize: 音频规范化
// - separate: 人声分离 + 高通滤波
// - remux: 人声与原视频合并
//
// 各阶段在同一个阻塞线程中顺序执行，阶段之间是唯一的取消点。

pub mod normalize;
pub mod remux;
pub mod separate;

use crate::audio::separator::{SeparationModel, SeparationRequest, UmxSeparator};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::fetch::ytdlp::YtDlpFetcher;
use crate::fetch::{self, FetchService, MediaDescriptor, RetryPolicy, StreamSelection};
use crate::jobs::JobState;
use crate::utils::move_file;
use crate::video::ffmpeg::FfmpegTranscoder;
use crate::video::Transcoder;
use crate::workspace::WorkspaceManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 外部协作组件
#[derive(Clone)]
pub struct Toolchain {
    pub fetcher: Arc<dyn FetchService>,
    pub transcoder: Arc<dyn Transcoder>,
    pub separator: Arc<dyn SeparationModel>,
}

impl Toolchain {
    /// 基于命令行工具的默认实现
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fetcher: Arc::new(YtDlpFetcher::new(&config.tools.yt_dlp, config.fetch.clone())),
            transcoder: Arc::new(FfmpegTranscoder::new(&config.tools.ffmpeg, &config.tools.ffprobe)),
            separator: Arc::new(UmxSeparator::new(&config.tools.separator, &config.separation.model)),
        }
    }
}

/// 流水线运行参数
#[derive(Clone)]
pub struct PipelineContext {
    pub tools: Toolchain,
    pub workspaces: WorkspaceManager,
    pub artifact_dir: PathBuf,
    pub retry: RetryPolicy,
    pub separation: SeparationRequest,
}

impl PipelineContext {
    pub fn new(config: &AppConfig, tools: Toolchain) -> Self {
        Self {
            tools,
            workspaces: WorkspaceManager::new(&config.storage.scratch_dir),
            artifact_dir: config.storage.artifact_dir.clone(),
            retry: RetryPolicy::new(
                config.fetch.process_retries,
                Duration::from_millis(config.fetch.retry_backoff_ms),
            ),
            separation: SeparationRequest::vocals(config.separation.device),
        }
    }

    /// 任务成品的最终位置
    pub fn artifact_path(&self, job_id: &str, selection: &StreamSelection) -> PathBuf {
        self.artifact_dir
            .join(format!("{}.{}", job_id, selection.kind().output_extension()))
    }
}

/// 流水线向调度方汇报进度，同时作为取消检查点
pub trait StageTracker {
    /// 进入新阶段；执行已被取消或取代时返回 Cancelled
    fn enter(&self, state: JobState) -> AppResult<()>;

    /// 仅检查取消
    fn checkpoint(&self) -> AppResult<()>;

    fn workspace_allocated(&self, path: Option<&Path>);
}

/// 执行下载之后的全部阶段，返回成品路径
///
/// 中间文件都在任务工作区内，函数返回时工作区被销毁。
pub fn run_job(
    ctx: &PipelineContext,
    job_id: &str,
    descriptor: &MediaDescriptor,
    selection: &StreamSelection,
    tracker: &dyn StageTracker,
) -> AppResult<PathBuf> {
    let mut workspace = ctx.workspaces.create()?;
    tracker.workspace_allocated(Some(workspace.path()));

    tracker.enter(JobState::Downloading)?;
    let video_path = match &selection.video {
        Some(video) => {
            let path = workspace.file(&format!("video.{}", video.ext));
            fetch::download(ctx.tools.fetcher.as_ref(), descriptor, video, &path, &ctx.retry)?;
            Some(path)
        }
        None => None,
    };
    let audio_path = workspace.file(&format!("audio.{}", selection.audio.ext));
    fetch::download(ctx.tools.fetcher.as_ref(), descriptor, &selection.audio, &audio_path, &ctx.retry)?;

    tracker.enter(JobState::Normalizing)?;
    let canonical = normalize::ensure_canonical_audio(ctx.tools.transcoder.as_ref(), &audio_path)?;

    tracker.enter(JobState::Separating)?;
    let vocals = separate::isolate_vocals(
        ctx.tools.separator.as_ref(),
        &ctx.separation,
        &canonical,
        &workspace,
        &workspace.file("vocals.wav"),
    )?;

    let result = match video_path {
        Some(video) => {
            tracker.enter(JobState::Muxing)?;
            remux::merge_vocals_with_video(
                ctx.tools.transcoder.as_ref(),
                &video,
                &vocals,
                &workspace,
                &workspace.file("final.mp4"),
            )?
        }
        None => vocals,
    };

    tracker.checkpoint()?;
    let destination = ctx.artifact_path(job_id, selection);
    move_file(&result, &destination)?;

    workspace.destroy();
    tracker.workspace_allocated(None);

    info!("[JOB] {} 成品已生成: {:?}", job_id, destination);
    Ok(destination)
}
