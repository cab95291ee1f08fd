// 成品清理模块
//
// 定时扫描成品目录，删除修改时间超过保留期限的文件。
// 只处理目录下第一层的普通文件，不进入子目录。

use crate::config::RetentionConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 单次扫描结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// 扫描一次，删除超过保留期限的文件
pub fn sweep_once(dir: &Path, max_age: Duration) -> SweepReport {
    sweep_matching(dir, max_age, |_| true)
}

/// 扫描一次，只考虑满足过滤条件的文件
pub fn sweep_matching<F>(dir: &Path, max_age: Duration, accept: F) -> SweepReport
where
    F: Fn(&Path) -> bool,
{
    let mut report = SweepReport::default();
    if !dir.is_dir() {
        return report;
    }

    let now = SystemTime::now();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[SWEEPER] 读取目录项失败: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !accept(entry.path()) {
            continue;
        }
        report.scanned += 1;

        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(t) => t,
            None => continue,
        };

        // 修改时间在未来时视为刚创建
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.deleted += 1;
                debug!("[SWEEPER] 已删除过期文件: {:?}", entry.path());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                report.failed += 1;
                warn!("[SWEEPER] 删除文件失败 {:?}: {}", entry.path(), e);
            }
        }
    }

    report
}

/// 后台定时清理任务
#[derive(Debug, Clone)]
pub struct Sweeper {
    dir: PathBuf,
    max_age: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
            interval,
        }
    }

    pub fn from_config(artifact_dir: &Path, retention: &RetentionConfig) -> Self {
        Self::new(artifact_dir, retention.max_age(), retention.sweep_interval())
    }

    /// 在阻塞线程池上执行一次扫描
    pub async fn tick(&self) -> SweepReport {
        let dir = self.dir.clone();
        let max_age = self.max_age;
        let report = tokio::task::spawn_blocking(move || sweep_once(&dir, max_age))
            .await
            .unwrap_or_else(|e| {
                warn!("[SWEEPER] 清理任务异常退出: {}", e);
                SweepReport::default()
            });

        if report.deleted > 0 || report.failed > 0 {
            info!(
                "[SWEEPER] 扫描 {} 个文件，删除 {} 个，失败 {} 个",
                report.scanned, report.deleted, report.failed
            );
        } else {
            debug!("[SWEEPER] 扫描 {} 个文件，无过期文件", report.scanned);
        }
        report
    }

    /// 启动定时任务，每次扫描后调用 after_tick，取消令牌触发后退出
    pub fn spawn<F>(self, cancel: CancellationToken, after_tick: F) -> JoinHandle<()>
    where
        F: Fn(&SweepReport) + Send + 'static,
    {
        tokio::spawn(async move {
            info!(
                "[SWEEPER] 已启动: dir={:?}, 保留 {} 秒, 间隔 {} 秒",
                self.dir,
                self.max_age.as_secs(),
                self.interval.as_secs()
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.tick().await;
                        after_tick(&report);
                    }
                }
            }

            info!("[SWEEPER] 已停止");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn age_file(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_old_file_deleted_young_file_kept() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp4");
        let young = dir.path().join("young.wav");
        fs::write(&old, b"old").unwrap();
        fs::write(&young, b"young").unwrap();
        age_file(&old, Duration::from_secs(2 * 3600));
        age_file(&young, Duration::from_secs(10 * 60));

        let report = sweep_once(dir.path(), Duration::from_secs(3600));
        assert_eq!(report, SweepReport { scanned: 2, deleted: 1, failed: 0 });
        assert!(!old.exists());
        assert!(young.exists());
    }

    #[test]
    fn test_directories_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ws-abc");
        fs::create_dir(&nested).unwrap();
        let inner = nested.join("audio.wav");
        fs::write(&inner, b"x").unwrap();
        age_file(&inner, Duration::from_secs(2 * 3600));

        let report = sweep_once(dir.path(), Duration::from_secs(3600));
        assert_eq!(report.scanned, 0);
        assert!(inner.exists());
    }

    #[test]
    fn test_missing_dir() {
        let report = sweep_once(Path::new("/nonexistent/pool"), Duration::from_secs(1));
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn test_filter_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("vocalcut.log.2024-01-01");
        let other = dir.path().join("notes.txt");
        fs::write(&log, b"l").unwrap();
        fs::write(&other, b"o").unwrap();
        age_file(&log, Duration::from_secs(3600));
        age_file(&other, Duration::from_secs(3600));

        let report = sweep_matching(dir.path(), Duration::from_secs(60), |p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("vocalcut.log"))
                .unwrap_or(false)
        });
        assert_eq!(report.deleted, 1);
        assert!(!log.exists());
        assert!(other.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_periodic_task_sweeps_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("job.wav");
        fs::write(&old, b"x").unwrap();
        age_file(&old, Duration::from_secs(2 * 3600));

        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let sweeper = Sweeper::new(dir.path(), Duration::from_secs(3600), Duration::from_millis(20));
        let handle = sweeper.spawn(cancel.clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..100 {
            if !old.exists() && ticks.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!old.exists());
        assert!(ticks.load(Ordering::SeqCst) > 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
