// 音视频转码模块
//
// 子模块：
// - ffmpeg: 基于 ffmpeg/ffprobe 的转码与封装实现

pub mod ffmpeg;

use crate::error::AppResult;
use std::path::Path;

/// 音频编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// 16 位 PCM（wav 容器）
    Pcm16,
    Aac,
}

impl AudioCodec {
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            AudioCodec::Pcm16 => "pcm_s16le",
            AudioCodec::Aac => "aac",
        }
    }
}

/// 目标音频格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 规范化后的音频格式：wav, 44.1kHz, 双声道
pub const CANONICAL_AUDIO: AudioFormat = AudioFormat {
    codec: AudioCodec::Pcm16,
    sample_rate: 44_100,
    channels: 2,
};

/// 合并进视频的人声音轨格式
pub const COMPRESSED_VOCALS: AudioFormat = AudioFormat {
    codec: AudioCodec::Aac,
    sample_rate: 44_100,
    channels: 2,
};

/// 封装时音轨的处理方式（视频轨总是直接复制）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxAudio {
    Copy,
    Aac,
}

impl MuxAudio {
    /// 已是 AAC 的音轨直接复制，其余编码为 AAC
    pub fn for_audio(path: &Path) -> Self {
        let is_aac = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("aac") || ext.eq_ignore_ascii_case("m4a"))
            .unwrap_or(false);
        if is_aac {
            MuxAudio::Copy
        } else {
            MuxAudio::Aac
        }
    }
}

/// 外部转码器
pub trait Transcoder: Send + Sync {
    /// 转码音频，失败返回 TranscodeFailed
    fn transcode(&self, src: &Path, dest: &Path, format: &AudioFormat) -> AppResult<()>;

    /// 视频轨直接复制，与音轨封装到同一容器，失败返回 MuxFailed
    fn mux(&self, video: &Path, audio: &Path, dest: &Path, audio_mode: MuxAudio) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_audio_mode_follows_container() {
        assert_eq!(MuxAudio::for_audio(Path::new("/w/vocals.aac")), MuxAudio::Copy);
        assert_eq!(MuxAudio::for_audio(Path::new("/w/vocals.M4A")), MuxAudio::Copy);
        assert_eq!(MuxAudio::for_audio(Path::new("/w/vocals.wav")), MuxAudio::Aac);
        assert_eq!(MuxAudio::for_audio(Path::new("/w/vocals")), MuxAudio::Aac);
    }
}
