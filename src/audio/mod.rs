// 音频处理模块
//
// 子模块：
// - wav: 波形读写（hound）
// - filter: 人声高通滤波（4 阶 Butterworth，两级 biquad 级联）
// - separator: 人声分离（调用 Open-Unmix umx）

pub mod filter;
pub mod separator;
pub mod wav;

pub use wav::Waveform;
