// 人声分离模块 - 使用 Open-Unmix (umx)

use super::Waveform;
use crate::config::ComputeDevice;
use crate::error::{truncate_message, AppError, AppResult};
use crate::utils::hidden_command;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, error, info};

/// 错误信息最大长度
const MAX_ERROR_CHARS: usize = 500;

/// 分离请求参数
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationRequest {
    pub targets: Vec<String>,
    /// 额外输出残差分量（其余声源之和）
    pub residual: bool,
    /// Wiener 滤波迭代次数
    pub iterations: u32,
    pub device: ComputeDevice,
}

impl SeparationRequest {
    /// 提取人声：targets=["vocals"], residual, 4 次迭代
    pub fn vocals(device: ComputeDevice) -> Self {
        Self {
            targets: vec!["vocals".to_string()],
            residual: true,
            iterations: 4,
            device,
        }
    }
}

/// 声源分离模型
pub trait SeparationModel: Send + Sync {
    /// 返回人声波形；scratch 为本次调用可自由使用的临时目录
    fn separate(&self, waveform: &Waveform, request: &SeparationRequest, scratch: &Path) -> AppResult<Waveform>;
}

/// 调用 umx 命令行的分离实现
pub struct UmxSeparator {
    program: String,
    model: String,
}

impl UmxSeparator {
    pub fn new(program: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
        }
    }

    fn build_args(&self, input: &Path, outdir: &Path, request: &SeparationRequest) -> Vec<String> {
        let mut args = vec![
            input.to_string_lossy().to_string(),
            "--outdir".to_string(),
            outdir.to_string_lossy().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--targets".to_string(),
        ];
        args.extend(request.targets.iter().cloned());
        args.push("--niter".to_string());
        args.push(request.iterations.to_string());
        if request.residual {
            args.push("--residual".to_string());
        }
        if request.device == ComputeDevice::Cpu {
            args.push("--no-cuda".to_string());
        }
        args
    }

    /// umx 输出路径: {outdir}/{输入文件名}/{target}.wav
    fn stem_path(input: &Path, outdir: &Path, target: &str) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default();
        outdir.join(stem).join(format!("{}.wav", target))
    }
}

impl SeparationModel for UmxSeparator {
    fn separate(&self, waveform: &Waveform, request: &SeparationRequest, scratch: &Path) -> AppResult<Waveform> {
        info!("=== 开始人声分离 (umx) ===");
        info!("[SEPARATOR] 模型: {}, 设备: {:?}, 迭代: {}", self.model, request.device, request.iterations);

        let input = scratch.join("mixture.wav");
        let outdir = scratch.join("estimates");
        waveform.save(&input)?;
        std::fs::create_dir_all(&outdir)?;

        let args = self.build_args(&input, &outdir, request);
        debug!("[SEPARATOR] 命令: {} {}", self.program, args.join(" "));

        let mut cmd = hidden_command(&self.program);
        cmd.args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // CUDA_VISIBLE_DEVICES="-1" 才能真正禁用 GPU
        if request.device == ComputeDevice::Cpu {
            cmd.env("CUDA_VISIBLE_DEVICES", "-1");
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!("[SEPARATOR] 启动 umx 失败: {}", e);
            AppError::SeparationFailed(format!("启动 umx 失败: {}", e))
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::SeparationFailed("无法获取 umx 错误输出流".into()))?;

        let mut error_output = String::new();
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(progress) = parse_progress(line) {
                debug!("[SEPARATOR] 分离进度: {:.1}%", progress * 100.0);
            } else {
                debug!("umx stderr: {}", line);
            }
            if !error_output.is_empty() {
                error_output.push('\n');
            }
            error_output.push_str(line);
        }

        let status = child.wait()?;
        info!("[SEPARATOR] umx 进程退出码: {:?}", status.code());

        if !status.success() {
            error!("[SEPARATOR] umx 错误输出: {}", error_output);
            let error_msg = if error_output.is_empty() {
                "umx 处理失败（无详细错误信息）".to_string()
            } else {
                format!("umx 处理失败: {}", truncate_message(&error_output, MAX_ERROR_CHARS))
            };
            return Err(AppError::SeparationFailed(error_msg));
        }

        let target = request
            .targets
            .first()
            .map(String::as_str)
            .unwrap_or("vocals");
        let vocals_path = Self::stem_path(&input, &outdir, target);
        if !vocals_path.exists() {
            return Err(AppError::SeparationFailed(format!(
                "人声文件不存在: {}",
                vocals_path.display()
            )));
        }
        info!("[SEPARATOR] 人声文件已生成: {}", vocals_path.display());

        Waveform::load(&vocals_path)
    }
}

/// 解析进度输出
fn parse_progress(line: &str) -> Option<f32> {
    // 进度输出格式类似: " 45%|████▌     | 9/20 [00:10<00:12,  1.10s/it]"
    let pos = line.find('%')?;
    let start = line[..pos]
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    line[start..pos].parse::<f32>().ok().map(|p| p / 100.0)
}
