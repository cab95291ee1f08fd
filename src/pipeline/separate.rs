// 人声分离阶段
//
// 读取规范化音频 -> 模型提取人声 -> 90 Hz 高通 -> 在子工作区写出 -> 移动到输出位置。
// 输入文件无论成功与否都会被删除。

use crate::audio::filter::highpass_vocals;
use crate::audio::separator::{SeparationModel, SeparationRequest};
use crate::audio::Waveform;
use crate::error::{AppError, AppResult};
use crate::utils::{move_file, remove_file_if_exists};
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn isolate_vocals(
    model: &dyn SeparationModel,
    request: &SeparationRequest,
    input: &Path,
    workspace: &Workspace,
    output: &Path,
) -> AppResult<PathBuf> {
    let result = run(model, request, input, workspace, output);

    if let Err(e) = remove_file_if_exists(input) {
        warn!("[SEPARATOR] 删除输入音频失败 {:?}: {}", input, e);
    }

    result
}

fn run(
    model: &dyn SeparationModel,
    request: &SeparationRequest,
    input: &Path,
    workspace: &Workspace,
    output: &Path,
) -> AppResult<PathBuf> {
    let mixture = Waveform::load(input)?;
    info!(
        "[SEPARATOR] 输入: {} 声道, {} Hz, {} 帧",
        mixture.num_channels(),
        mixture.sample_rate(),
        mixture.frames()
    );

    let mut sub = workspace.create_child()?;

    let mut vocals = model.separate(&mixture, request, sub.path())?;
    if vocals.sample_rate() != mixture.sample_rate() {
        return Err(AppError::SeparationFailed(format!(
            "人声采样率 {} 与输入 {} 不一致",
            vocals.sample_rate(),
            mixture.sample_rate()
        )));
    }

    highpass_vocals(&mut vocals)?;

    let filtered = sub.file("vocals.wav");
    vocals.save(&filtered)?;
    move_file(&filtered, output)?;
    sub.destroy();

    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComputeDevice;
    use crate::testing::{write_test_wav, FakeSeparator};
    use crate::workspace::WorkspaceManager;

    fn request() -> SeparationRequest {
        SeparationRequest::vocals(ComputeDevice::Cpu)
    }

    #[test]
    fn test_isolates_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).create().unwrap();
        let input = ws.file("audio.wav");
        write_test_wav(&input, 2, 4410);
        let output = ws.file("vocals.wav");

        let separator = FakeSeparator::default();
        let path = isolate_vocals(&separator, &request(), &input, &ws, &output).unwrap();

        assert_eq!(path, output);
        assert!(!input.exists());
        let vocals = Waveform::load(&path).unwrap();
        assert_eq!(vocals.num_channels(), 2);
        assert_eq!(vocals.frames(), 4410);

        // 只剩输出文件，子工作区已销毁
        let entries: Vec<_> = std::fs::read_dir(ws.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(separator.requests(), vec![request()]);
    }

    #[test]
    fn test_model_failure_deletes_input() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).create().unwrap();
        let input = ws.file("audio.wav");
        write_test_wav(&input, 1, 100);

        let separator = FakeSeparator::failing();
        let result = isolate_vocals(&separator, &request(), &input, &ws, &ws.file("vocals.wav"));
        assert!(matches!(result, Err(AppError::SeparationFailed(_))));
        assert!(!input.exists());
        assert_eq!(std::fs::read_dir(ws.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_malformed_input() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).create().unwrap();
        let input = ws.file("audio.wav");
        write_test_wav(&input, 1, 0);

        let separator = FakeSeparator::default();
        let result = isolate_vocals(&separator, &request(), &input, &ws, &ws.file("vocals.wav"));
        assert!(matches!(result, Err(AppError::SeparationFailed(_))));
        assert!(separator.requests().is_empty());
    }
}
