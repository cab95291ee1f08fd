// FFmpeg 封装模块

use super::{AudioFormat, MuxAudio, Transcoder};
use crate::error::{truncate_message, AppError, AppResult};
use crate::utils::hidden_command;
use regex::Regex;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, error, info};

// 静态正则表达式，避免重复编译
lazy_static::lazy_static! {
    static ref TIME_REGEX: Regex = Regex::new(r"out_time_ms=(\d+)").unwrap();
}

/// 错误信息最大长度
const MAX_ERROR_CHARS: usize = 500;

/// 基于 ffmpeg 命令行的转码器
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// 获取媒体时长，用于计算进度；失败时返回 None
    pub fn probe_duration(&self, path: &Path) -> Option<f64> {
        let output = hidden_command(&self.ffprobe)
            .args([
                "-v", "quiet",
                "-show_entries", "format=duration",
                "-of", "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| *d > 0.0)
    }

    /// 运行 FFmpeg 并记录进度，失败时返回 stderr 摘要
    fn run_ffmpeg(&self, args: &[String], total_duration: Option<f64>) -> Result<(), String> {
        let mut cmd_args = vec![
            "-v".to_string(), "error".to_string(),
            "-progress".to_string(), "pipe:1".to_string(),
            "-nostdin".to_string(),
        ];
        cmd_args.extend(args.iter().cloned());

        debug!("[FFMPEG] 命令: {} {}", self.ffmpeg, cmd_args.join(" "));

        let mut child = hidden_command(&self.ffmpeg)
            .args(&cmd_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("ffmpeg 启动失败: {}", e))?;

        let stdout = child.stdout.take()
            .ok_or_else(|| "无法获取 FFmpeg 输出流".to_string())?;
        let mut stderr = child.stderr.take()
            .ok_or_else(|| "无法获取 FFmpeg 错误输出流".to_string())?;

        // stderr 单独线程读取，避免管道写满阻塞进程
        let stderr_reader = std::thread::spawn(move || {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer);
            buffer
        });

        let mut last_reported = -1i64;
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            let Some(total) = total_duration else { continue };
            if let Some(ms) = TIME_REGEX
                .captures(&line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
            {
                let progress = ((ms / 1_000_000.0) / total).min(1.0);
                let bucket = (progress * 10.0) as i64;
                if bucket > last_reported {
                    last_reported = bucket;
                    debug!("[FFMPEG] 进度: {:.0}%", progress * 100.0);
                }
            }
        }

        let status = child.wait().map_err(|e| format!("等待 ffmpeg 结束失败: {}", e))?;
        let stderr_text = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            error!("[FFMPEG] 处理失败，退出码: {:?}, 输出: {}", status.code(), stderr_text.trim());
            let message = if stderr_text.trim().is_empty() {
                format!("ffmpeg 退出码 {:?}", status.code())
            } else {
                truncate_message(&stderr_text, MAX_ERROR_CHARS)
            };
            return Err(message);
        }

        Ok(())
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, src: &Path, dest: &Path, format: &AudioFormat) -> AppResult<()> {
        info!("[FFMPEG] 转码音频: {:?} -> {:?} ({:?})", src, dest, format);

        let args = vec![
            "-i".to_string(), src.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-acodec".to_string(), format.codec.ffmpeg_name().to_string(),
            "-ar".to_string(), format.sample_rate.to_string(),
            "-ac".to_string(), format.channels.to_string(),
            "-y".to_string(),
            dest.to_string_lossy().to_string(),
        ];

        self.run_ffmpeg(&args, self.probe_duration(src))
            .map_err(AppError::TranscodeFailed)
    }

    fn mux(&self, video: &Path, audio: &Path, dest: &Path, audio_mode: MuxAudio) -> AppResult<()> {
        info!("[FFMPEG] 合并音视频: video={:?}, audio={:?} -> {:?}", video, audio, dest);

        let audio_codec = match audio_mode {
            MuxAudio::Copy => "copy",
            MuxAudio::Aac => "aac",
        };

        let mut args = vec![
            "-i".to_string(), video.to_string_lossy().to_string(),
            "-i".to_string(), audio.to_string_lossy().to_string(),
            "-map".to_string(), "0:v:0".to_string(),
            "-map".to_string(), "1:a:0".to_string(),
            "-c:v".to_string(), "copy".to_string(),
            "-c:a".to_string(), audio_codec.to_string(),
        ];

        // MP4 格式添加 faststart，确保 moov atom 在文件开头
        let is_mp4 = dest
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("mp4"))
            .unwrap_or(false);
        if is_mp4 {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push("-y".to_string());
        args.push(dest.to_string_lossy().to_string());

        self.run_ffmpeg(&args, self.probe_duration(video))
            .map_err(AppError::MuxFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::CANONICAL_AUDIO;

    #[test]
    fn test_missing_binary_reports_transcode_failure() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let result = transcoder.transcode(Path::new("a.webm"), Path::new("a.wav"), &CANONICAL_AUDIO);
        assert!(matches!(result, Err(AppError::TranscodeFailed(m)) if m.contains("ffmpeg 启动失败")));
    }

    #[test]
    fn test_missing_binary_reports_mux_failure() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let result = transcoder.mux(Path::new("v.mp4"), Path::new("a.aac"), Path::new("o.mp4"), MuxAudio::Copy);
        assert!(matches!(result, Err(AppError::MuxFailed(_))));
    }

    #[test]
    fn test_probe_duration_without_ffprobe() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", "/nonexistent/ffprobe");
        assert_eq!(transcoder.probe_duration(Path::new("a.wav")), None);
    }
}
