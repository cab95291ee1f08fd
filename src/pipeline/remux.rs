// 音视频合并阶段
//
// 人声编码为 AAC 后与原视频轨（直接复制，不重新编码）封装为 mp4。

use crate::error::{AppError, AppResult};
use crate::utils::{move_file, remove_file_if_exists};
use crate::video::{MuxAudio, Transcoder, COMPRESSED_VOCALS};
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn merge_vocals_with_video(
    transcoder: &dyn Transcoder,
    video: &Path,
    vocals: &Path,
    workspace: &Workspace,
    output: &Path,
) -> AppResult<PathBuf> {
    let mut sub = workspace.create_child()?;

    let encoded = sub.file("vocals.aac");
    transcoder
        .transcode(vocals, &encoded, &COMPRESSED_VOCALS)
        .map_err(|e| match e {
            AppError::TranscodeFailed(message) => AppError::MuxFailed(message),
            other => other,
        })?;

    let merged = sub.file("merged.mp4");
    transcoder.mux(video, &encoded, &merged, MuxAudio::for_audio(&encoded))?;

    for input in [video, vocals] {
        if let Err(e) = remove_file_if_exists(input) {
            warn!("[REMUX] 删除输入文件失败 {:?}: {}", input, e);
        }
    }

    move_file(&merged, output)?;
    sub.destroy();

    info!("[REMUX] 合并完成: {:?}", output);
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_test_wav, FakeTranscoder};
    use crate::workspace::WorkspaceManager;

    #[test]
    fn test_merge_consumes_inputs() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).create().unwrap();
        let video = ws.file("video.mp4");
        std::fs::write(&video, b"VIDEO-TRACK").unwrap();
        let vocals = ws.file("vocals.wav");
        write_test_wav(&vocals, 2, 100);
        let output = ws.file("final.mp4");

        let transcoder = FakeTranscoder::default();
        merge_vocals_with_video(&transcoder, &video, &vocals, &ws, &output).unwrap();

        assert!(output.exists());
        assert!(!video.exists());
        assert!(!vocals.exists());
        assert!(std::fs::read(&output).unwrap().starts_with(b"VIDEO-TRACK"));
        // 人声已编码为 AAC，封装时直接复制
        assert_eq!(transcoder.mux_modes(), vec![MuxAudio::Copy]);
        assert_eq!(std::fs::read_dir(ws.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_encode_failure_is_mux_failure() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).create().unwrap();
        let video = ws.file("video.mp4");
        std::fs::write(&video, b"V").unwrap();
        let vocals = ws.file("vocals.wav");
        write_test_wav(&vocals, 2, 100);

        let transcoder = FakeTranscoder::failing_transcode();
        let result = merge_vocals_with_video(&transcoder, &video, &vocals, &ws, &ws.file("final.mp4"));
        assert!(matches!(result, Err(AppError::MuxFailed(_))));
    }

    #[test]
    fn test_mux_failure() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).create().unwrap();
        let video = ws.file("video.mp4");
        std::fs::write(&video, b"V").unwrap();
        let vocals = ws.file("vocals.wav");
        write_test_wav(&vocals, 2, 100);

        let transcoder = FakeTranscoder::failing_mux();
        let result = merge_vocals_with_video(&transcoder, &video, &vocals, &ws, &ws.file("final.mp4"));
        assert!(matches!(result, Err(AppError::MuxFailed(_))));
        assert!(!ws.file("final.mp4").exists());
    }
}
