// 人声高通滤波
//
// 4 阶 Butterworth 高通 = 两个二阶节级联，Q 取 Butterworth 极点对应的值。
// 单向因果滤波，逐声道处理。

use super::Waveform;
use crate::error::{AppError, AppResult};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, Type};

/// 截止频率 (Hz)
pub const HIGHPASS_CUTOFF_HZ: f64 = 90.0;

/// 4 阶 Butterworth 两个二阶节的 Q：1 / (2 cos(π/8)), 1 / (2 cos(3π/8))
const BUTTERWORTH_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// 对波形就地应用 90 Hz 高通
pub fn highpass_vocals(waveform: &mut Waveform) -> AppResult<()> {
    highpass(waveform, HIGHPASS_CUTOFF_HZ)
}

/// 对波形就地应用 4 阶 Butterworth 高通
pub fn highpass(waveform: &mut Waveform, cutoff_hz: f64) -> AppResult<()> {
    let fs = waveform.sample_rate() as f64;
    // 归一化到奈奎斯特频率，>= 1 时构造失败
    let normalized = cutoff_hz / (fs / 2.0);
    let sections = BUTTERWORTH_Q
        .iter()
        .map(|q| {
            Coefficients::<f64>::from_normalized_params(Type::HighPass, normalized, *q).map_err(|e| {
                AppError::SeparationFailed(format!(
                    "无法构造高通滤波器 (fc={} Hz, fs={} Hz): {:?}",
                    cutoff_hz, fs, e
                ))
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    for channel in waveform.channels_mut() {
        let mut stages: Vec<DirectForm2Transposed<f64>> = sections
            .iter()
            .map(|coeffs| DirectForm2Transposed::<f64>::new(*coeffs))
            .collect();

        for sample in channel.iter_mut() {
            let mut y = *sample as f64;
            for stage in stages.iter_mut() {
                y = stage.run(y);
            }
            *sample = y as f32;
        }
    }

    Ok(())
}
