// 测试用的外部组件替身
//
// 替身写出的音频都是真实的 wav 文件，流水线的读写路径与生产一致。

use crate::audio::separator::{SeparationModel, SeparationRequest};
use crate::audio::Waveform;
use crate::error::{AppError, AppResult};
use crate::fetch::{FetchError, FetchService, MediaDescriptor, StreamInfo, StreamKind};
use crate::video::{AudioFormat, MuxAudio, Transcoder};
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 假视频轨内容，用于校验封装时视频轨未被改动
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42fake-video-track";

/// 写一个 44.1kHz 16 位的正弦波 wav
pub fn write_test_wav(path: &Path, channels: u16, frames: usize) {
    let spec = WavSpec {
        channels,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let sample = (2.0 * PI * 440.0 * i as f32 / 44_100.0).sin() * 0.5;
        for _ in 0..channels {
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

pub fn audio_stream(format_id: &str, ext: &str) -> StreamInfo {
    StreamInfo {
        format_id: format_id.to_string(),
        ext: ext.to_string(),
        video_codec: None,
        audio_codec: Some("opus".to_string()),
        height: None,
    }
}

pub fn video_stream(format_id: &str, height: u32) -> StreamInfo {
    StreamInfo {
        format_id: format_id.to_string(),
        ext: "mp4".to_string(),
        video_codec: Some("avc1".to_string()),
        audio_codec: None,
        height: Some(height),
    }
}

pub fn descriptor(url: &str, streams: Vec<StreamInfo>) -> MediaDescriptor {
    MediaDescriptor {
        source_url: url.to_string(),
        title: Some("fake".to_string()),
        streams,
    }
}

/// 按地址返回预设的解析结果；下载时视频写 VIDEO_BYTES，音频写 wav
#[derive(Default)]
pub struct FakeFetcher {
    sources: HashMap<String, MediaDescriptor>,
    probe_delay: Duration,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with_source(mut self, url: &str, streams: Vec<StreamInfo>) -> Self {
        self.sources.insert(url.to_string(), descriptor(url, streams));
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

impl FetchService for FakeFetcher {
    fn probe(&self, url: &str) -> AppResult<MediaDescriptor> {
        std::thread::sleep(self.probe_delay);
        self.sources
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::UnresolvableSource(format!("Unsupported URL: {}", url)))
    }

    fn fetch(&self, url: &str, format_id: &str, dest: &Path) -> Result<(), FetchError> {
        self.fetched.lock().push(format_id.to_string());
        let stream = self
            .sources
            .get(url)
            .and_then(|d| d.streams.iter().find(|s| s.format_id == format_id))
            .ok_or_else(|| FetchError::Fatal(format!("requested format not available: {}", format_id)))?;

        match stream.kind() {
            StreamKind::VideoOnly => fs::write(dest, VIDEO_BYTES).map_err(|e| FetchError::Fatal(e.to_string())),
            _ => {
                write_test_wav(dest, 2, 4_410);
                Ok(())
            }
        }
    }
}

/// 转码直接复制文件；封装输出 = 视频字节 + 分隔符 + 音频字节
#[derive(Default)]
pub struct FakeTranscoder {
    fail_transcode: bool,
    fail_mux: bool,
    transcode_calls: AtomicUsize,
    mux_calls: AtomicUsize,
    mux_modes: Mutex<Vec<MuxAudio>>,
}

impl FakeTranscoder {
    pub fn failing_transcode() -> Self {
        Self {
            fail_transcode: true,
            ..Self::default()
        }
    }

    pub fn failing_mux() -> Self {
        Self {
            fail_mux: true,
            ..Self::default()
        }
    }

    pub fn transcode_calls(&self) -> usize {
        self.transcode_calls.load(Ordering::SeqCst)
    }

    pub fn mux_calls(&self) -> usize {
        self.mux_calls.load(Ordering::SeqCst)
    }

    pub fn mux_modes(&self) -> Vec<MuxAudio> {
        self.mux_modes.lock().clone()
    }
}

impl Transcoder for FakeTranscoder {
    fn transcode(&self, src: &Path, dest: &Path, _format: &AudioFormat) -> AppResult<()> {
        self.transcode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transcode {
            return Err(AppError::TranscodeFailed("fake encoder error".to_string()));
        }
        fs::copy(src, dest)?;
        Ok(())
    }

    fn mux(&self, video: &Path, audio: &Path, dest: &Path, audio_mode: MuxAudio) -> AppResult<()> {
        self.mux_calls.fetch_add(1, Ordering::SeqCst);
        self.mux_modes.lock().push(audio_mode);
        if self.fail_mux {
            return Err(AppError::MuxFailed("fake muxer error".to_string()));
        }
        let mut container = fs::read(video)?;
        container.extend_from_slice(b"|AUDIO|");
        container.extend(fs::read(audio)?);
        fs::write(dest, container)?;
        Ok(())
    }
}

/// 返回输入波形减半作为“人声”
#[derive(Default)]
pub struct FakeSeparator {
    fail: bool,
    delay: Duration,
    requests: Mutex<Vec<SeparationRequest>>,
}

impl FakeSeparator {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<SeparationRequest> {
        self.requests.lock().clone()
    }
}

impl SeparationModel for FakeSeparator {
    fn separate(&self, waveform: &Waveform, request: &SeparationRequest, _scratch: &Path) -> AppResult<Waveform> {
        self.requests.lock().push(request.clone());
        std::thread::sleep(self.delay);
        if self.fail {
            return Err(AppError::SeparationFailed("fake model error".to_string()));
        }
        let channels = waveform
            .channels()
            .iter()
            .map(|c| c.iter().map(|s| s * 0.5).collect())
            .collect();
        Waveform::new(channels, waveform.sample_rate())
    }
}
