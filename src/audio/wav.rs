// 波形读写
//
// 内部统一使用平面布局 (每个声道一个 Vec<f32>)，样本范围 [-1.0, 1.0]。

use crate::error::{AppError, AppResult};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use tracing::debug;

/// 解码后的音频波形
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl Waveform {
    /// 构造并校验：声道数只能是 1 或 2，长度非零且各声道等长
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> AppResult<Self> {
        if channels.is_empty() || channels.len() > 2 {
            return Err(AppError::SeparationFailed(format!(
                "不支持的声道数: {}",
                channels.len()
            )));
        }
        if sample_rate == 0 {
            return Err(AppError::SeparationFailed("采样率为 0".to_string()));
        }

        let frames = channels[0].len();
        if frames == 0 {
            return Err(AppError::SeparationFailed("音频长度为 0".to_string()));
        }
        if channels.iter().any(|c| c.len() != frames) {
            return Err(AppError::SeparationFailed("各声道长度不一致".to_string()));
        }

        Ok(Self { channels, sample_rate })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// 每声道样本数
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.channels
    }

    /// 读取 wav 文件，整数样本按位深归一化
    pub fn load(path: &Path) -> AppResult<Self> {
        let mut reader = WavReader::open(path)
            .map_err(|e| AppError::SeparationFailed(format!("读取音频失败 {:?}: {}", path, e)))?;
        let spec = reader.spec();
        let channel_count = spec.channels as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| AppError::SeparationFailed(format!("解码音频失败: {}", e)))?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AppError::SeparationFailed(format!("解码音频失败: {}", e)))?
            }
        };

        if channel_count == 0 || channel_count > 2 {
            return Err(AppError::SeparationFailed(format!(
                "不支持的声道数: {}",
                channel_count
            )));
        }

        let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
        for frame in interleaved.chunks(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        debug!(
            "[WAV] 已读取 {:?}: {} 声道, {} Hz, {} 帧",
            path, channel_count, spec.sample_rate, channels[0].len()
        );
        Self::new(channels, spec.sample_rate)
    }

    /// 写入 32 位浮点 wav
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let spec = WavSpec {
            channels: self.channels.len() as u16,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let write_err = |e: hound::Error| AppError::SeparationFailed(format!("写入音频失败 {:?}: {}", path, e));
        let mut writer = WavWriter::create(path, spec).map_err(write_err)?;
        for i in 0..self.frames() {
            for channel in &self.channels {
                writer.write_sample(channel[i]).map_err(write_err)?;
            }
        }
        writer.finalize().map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(Waveform::new(vec![], 44100), Err(AppError::SeparationFailed(_))));
        assert!(matches!(Waveform::new(vec![vec![0.0]; 3], 44100), Err(AppError::SeparationFailed(_))));
        assert!(matches!(Waveform::new(vec![vec![]], 44100), Err(AppError::SeparationFailed(_))));
        assert!(matches!(
            Waveform::new(vec![vec![0.0; 4], vec![0.0; 3]], 44100),
            Err(AppError::SeparationFailed(_))
        ));
    }

    #[test]
    fn test_save_and_load_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.wav");
        let left: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let wave = Waveform::new(vec![left, right], 22050).unwrap();
        wave.save(&path).unwrap();

        let loaded = Waveform::load(&path).unwrap();
        assert_eq!(loaded, wave);
    }

    #[test]
    fn test_load_int16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcm.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [0i16, 16384, -32768] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let loaded = Waveform::load(&path).unwrap();
        assert_eq!(loaded.num_channels(), 1);
        assert_eq!(loaded.channels()[0], vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Waveform::load(Path::new("/nonexistent/x.wav"));
        assert!(matches!(result, Err(AppError::SeparationFailed(_))));
    }
}
