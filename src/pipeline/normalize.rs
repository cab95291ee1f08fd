// 音频规范化：统一转为 wav, 44.1kHz, 双声道

use crate::error::AppResult;
use crate::utils::{extension_lowercase, remove_file_if_exists};
use crate::video::{Transcoder, CANONICAL_AUDIO};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 已是 wav 时原样返回；否则转码并删除原文件
pub fn ensure_canonical_audio(transcoder: &dyn Transcoder, path: &Path) -> AppResult<PathBuf> {
    if extension_lowercase(path).as_deref() == Some("wav") {
        return Ok(path.to_path_buf());
    }

    let wav_path = path.with_extension("wav");
    info!("[NORMALIZE] 转码为 wav: {:?} -> {:?}", path, wav_path);

    if let Err(e) = transcoder.transcode(path, &wav_path, &CANONICAL_AUDIO) {
        // 半成品不保留
        if let Err(cleanup) = remove_file_if_exists(&wav_path) {
            warn!("[NORMALIZE] 删除未完成的转码文件失败 {:?}: {}", wav_path, cleanup);
        }
        return Err(e);
    }

    remove_file_if_exists(path)?;
    Ok(wav_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::testing::{write_test_wav, FakeTranscoder};

    #[test]
    fn test_wav_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.WAV");
        write_test_wav(&path, 2, 100);
        let transcoder = FakeTranscoder::default();

        assert_eq!(ensure_canonical_audio(&transcoder, &path).unwrap(), path);
        assert_eq!(transcoder.transcode_calls(), 0);
    }

    #[test]
    fn test_transcodes_and_deletes_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.webm");
        write_test_wav(&path, 2, 100);
        let transcoder = FakeTranscoder::default();

        let wav = ensure_canonical_audio(&transcoder, &path).unwrap();
        assert_eq!(wav, dir.path().join("audio.wav"));
        assert!(wav.exists());
        assert!(!path.exists());
        assert_eq!(transcoder.transcode_calls(), 1);
    }

    #[test]
    fn test_transcode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.m4a");
        write_test_wav(&path, 2, 100);
        let transcoder = FakeTranscoder::failing_transcode();

        let result = ensure_canonical_audio(&transcoder, &path);
        assert!(matches!(result, Err(AppError::TranscodeFailed(_))));
        assert!(!dir.path().join("audio.wav").exists());
    }
}
