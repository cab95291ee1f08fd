// 任务调度
//
// submit 在解析和分类完成后返回，其余阶段在后台执行。
// 受理过程也在独立任务中运行，调用方放弃等待不会让条目停在中间状态。
// 每个任务一个 tokio 任务，先获取并发许可，再把整条流水线放到阻塞线程池中运行。
// 同一 jobId 的提交由按键的异步锁串行化；新提交会取消并等待旧执行退出，再清理旧成品。

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::fetch::{self, JobKind, MediaDescriptor, StreamSelection};
use crate::jobs::registry::{JobRegistry, JobState, JobStatus};
use crate::pipeline::{self, PipelineContext, StageTracker, Toolchain};
use crate::utils::{normalize_source_url, remove_file_if_exists};
use crate::workspace::WORKSPACE_PREFIX;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// jobId 最大长度
const MAX_JOB_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: PipelineContext,
    registry: JobRegistry,
    permits: Arc<Semaphore>,
    /// 已提交且尚未结束的执行数（含排队）
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
    executions: Mutex<HashMap<String, Execution>>,
    key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    shutdown: CancellationToken,
}

struct Execution {
    execution_id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 占用一个执行名额，Drop 时归还
struct SlotGuard {
    counter: Arc<AtomicUsize>,
}

impl SlotGuard {
    fn try_acquire(counter: &Arc<AtomicUsize>, capacity: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < capacity).then_some(n + 1))
            .ok()
            .map(|_| Self {
                counter: counter.clone(),
            })
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(config: &AppConfig, tools: Toolchain) -> Self {
        let ctx = PipelineContext::new(config, tools);
        cleanup_stale_workspaces(ctx.workspaces.root());

        let workers = config.workers.max_concurrent_jobs.max(1);
        info!(
            "[JOB] 调度器已创建: 并发 {}, 排队 {}",
            workers, config.workers.max_queued_jobs
        );

        Self {
            inner: Arc::new(Inner {
                ctx,
                registry: JobRegistry::new(),
                permits: Arc::new(Semaphore::new(workers)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                capacity: workers + config.workers.max_queued_jobs,
                executions: Mutex::new(HashMap::new()),
                key_locks: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// 提交（或替换）任务，解析分类完成后返回产物类型
    pub async fn submit(&self, job_id: &str, url: &str) -> AppResult<JobKind> {
        validate_job_id(job_id)?;
        let url = normalize_source_url(url)
            .ok_or_else(|| AppError::InvalidArgument("地址不能为空".to_string()))?;
        if self.inner.shutdown.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        // 受理放在独立任务中，调用方中途放弃等待时条目仍会进入终态或交给执行
        tokio::spawn(self.inner.clone().admit(job_id.to_string(), url)).await?
    }

    pub fn poll_status(&self, job_id: &str) -> AppResult<JobStatus> {
        let registry = &self.inner.registry;
        let status = registry
            .status(job_id)
            .ok_or_else(|| AppError::NotFound(format!("任务不存在: {}", job_id)))?;

        if status.ready && registry.expire_missing_result(job_id) {
            warn!("[JOB] 任务 {} 的成品已被清理", job_id);
            return registry
                .status(job_id)
                .ok_or_else(|| AppError::NotFound(format!("任务不存在: {}", job_id)));
        }
        Ok(status)
    }

    /// 领取成品路径；成功后任务条目被清除，再次领取返回 NotFound
    pub fn collect(&self, job_id: &str) -> AppResult<PathBuf> {
        let path = self.inner.registry.take_result(job_id)?;

        {
            let mut executions = self.inner.executions.lock();
            if executions.get(job_id).map(|e| e.handle.is_finished()).unwrap_or(false) {
                executions.remove(job_id);
            }
        }
        self.inner.prune_key_lock(job_id);

        if !path.is_file() {
            warn!("[JOB] 任务 {} 的成品已不存在: {:?}", job_id, path);
            return Err(AppError::NotFound(format!("成品文件已不存在: {}", path.display())));
        }

        info!("[JOB] 任务 {} 成品已领取: {:?}", job_id, path);
        Ok(path)
    }

    /// 清除超过保留期限的终态条目，以及已结束的执行记录和空闲的按键锁
    pub fn evict_expired(&self, max_age: Duration) -> usize {
        let registry = &self.inner.registry;
        let evicted = registry.evict_terminal(max_age);

        self.inner
            .executions
            .lock()
            .retain(|job_id, execution| !execution.handle.is_finished() || registry.contains(job_id));
        self.inner
            .key_locks
            .lock()
            .retain(|job_id, lock| Arc::strong_count(lock) > 1 || registry.contains(job_id));

        if !evicted.is_empty() {
            info!(
                "[JOB] 已清除 {} 个过期任务条目，剩余 {} 个",
                evicted.len(),
                registry.len()
            );
        }
        evicted.len()
    }

    /// 取消所有执行并等待退出
    pub async fn shutdown(&self) {
        info!("[JOB] 正在关闭调度器");
        self.inner.shutdown.cancel();
        self.inner.permits.close();

        let executions: Vec<(String, Execution)> = self.inner.executions.lock().drain().collect();
        for (job_id, execution) in executions {
            if let Err(e) = execution.handle.await {
                warn!("[JOB] 任务 {} 执行异常退出: {}", job_id, e);
            }
        }
        info!("[JOB] 调度器已关闭");
    }
}

impl Inner {
    /// 串行化同一 jobId 的提交：取代旧执行、解析分类、移交后台执行
    async fn admit(self: Arc<Self>, job_id: String, url: String) -> AppResult<JobKind> {
        let key_lock = self.key_lock(&job_id);
        let _guard = key_lock.lock().await;

        self.supersede(&job_id).await;

        let artifact_dir = self.ctx.artifact_dir.clone();
        let purge_id = job_id.clone();
        let purged = tokio::task::spawn_blocking(move || purge_artifacts(&artifact_dir, &purge_id)).await??;
        if purged > 0 {
            info!("[JOB] 已清理任务 {} 的旧成品 {} 个", job_id, purged);
        }

        let slot = SlotGuard::try_acquire(&self.in_flight, self.capacity).ok_or_else(|| {
            warn!("[JOB] 任务队列已满，拒绝提交 {}", job_id);
            AppError::Busy
        })?;

        let registry = &self.registry;
        let execution_id = registry.insert(&job_id, &url);
        info!("[JOB] 提交任务 {} (执行 #{}): {}", job_id, execution_id, url);
        registry.set_state(&job_id, execution_id, JobState::Probing);

        let fetcher = self.ctx.tools.fetcher.clone();
        let probe_url = url.clone();
        let probed = tokio::task::spawn_blocking(move || -> AppResult<(MediaDescriptor, StreamSelection)> {
            let descriptor = fetch::probe(fetcher.as_ref(), &probe_url)?;
            let selection = fetch::select_streams(&descriptor)?;
            Ok((descriptor, selection))
        })
        .await
        .map_err(AppError::from)
        .and_then(|result| result)
        .and_then(|probed| {
            if self.shutdown.is_cancelled() {
                Err(AppError::Cancelled)
            } else {
                Ok(probed)
            }
        });

        let (descriptor, selection) = match probed {
            Ok(probed) => probed,
            Err(e) => {
                warn!("[JOB] 任务 {} 解析失败: {}", job_id, e);
                registry.mark_failed(&job_id, execution_id, &e);
                return Err(e);
            }
        };

        let kind = selection.kind();
        registry.set_kind(&job_id, execution_id, kind);
        info!(
            "[JOB] 任务 {} 分类为 {}: video={:?}, audio={}",
            job_id,
            kind.as_str(),
            selection.video.as_ref().map(|v| &v.format_id),
            selection.audio.format_id
        );

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(self.clone().execute(
            job_id.clone(),
            execution_id,
            descriptor,
            selection,
            cancel.clone(),
            slot,
        ));
        self.executions.lock().insert(
            job_id,
            Execution {
                execution_id,
                cancel,
                handle,
            },
        );

        Ok(kind)
    }

    fn key_lock(&self, job_id: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .lock()
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn prune_key_lock(&self, job_id: &str) {
        let mut locks = self.key_locks.lock();
        if locks.get(job_id).map(|l| Arc::strong_count(l) == 1).unwrap_or(false) {
            locks.remove(job_id);
        }
    }

    /// 取消同一 jobId 的旧执行，等待其退出后清除条目
    async fn supersede(&self, job_id: &str) {
        let previous = self.executions.lock().remove(job_id);
        if let Some(execution) = previous {
            if !execution.handle.is_finished() {
                info!("[JOB] 取消任务 {} 进行中的执行 #{}", job_id, execution.execution_id);
            }
            execution.cancel.cancel();
            if let Err(e) = execution.handle.await {
                warn!("[JOB] 任务 {} 旧执行异常退出: {}", job_id, e);
            }
        }
        self.registry.remove(job_id);
    }

    async fn execute(
        self: Arc<Self>,
        job_id: String,
        execution_id: u64,
        descriptor: MediaDescriptor,
        selection: StreamSelection,
        cancel: CancellationToken,
        slot: SlotGuard,
    ) {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            info!("[JOB] 任务 {} 在排队时被取消", job_id);
            drop(slot);
            self.registry.mark_failed(&job_id, execution_id, &AppError::Cancelled);
            return;
        };

        let inner = self.clone();
        let id = job_id.clone();
        let token = cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            let tracker = ExecutionTracker {
                registry: &inner.registry,
                job_id: &id,
                execution_id,
                cancel: &token,
            };
            pipeline::run_job(&inner.ctx, &id, &descriptor, &selection, &tracker)
        })
        .await
        .map_err(AppError::from)
        .and_then(|result| result);

        // 名额先于终态释放，调用方看到终态后即可再次提交
        drop(permit);
        drop(slot);

        match result {
            Ok(path) => {
                if !self.registry.mark_ready(&job_id, execution_id, path.clone()) {
                    // 条目已被替换，成品不再属于任何任务
                    warn!("[JOB] 任务 {} 执行 #{} 已失效，删除成品", job_id, execution_id);
                    if let Err(e) = remove_file_if_exists(&path) {
                        warn!("[JOB] 删除失效成品失败 {:?}: {}", path, e);
                    }
                } else {
                    info!("[JOB] 任务 {} 完成", job_id);
                }
            }
            Err(AppError::Cancelled) => {
                info!("[JOB] 任务 {} 执行 #{} 已取消", job_id, execution_id);
                self.registry.mark_failed(&job_id, execution_id, &AppError::Cancelled);
            }
            Err(e) => {
                error!("[JOB] 任务 {} 失败: {}", job_id, e);
                self.registry.mark_failed(&job_id, execution_id, &e);
            }
        }
    }
}

/// 阻塞线程中的进度汇报与取消检查
struct ExecutionTracker<'a> {
    registry: &'a JobRegistry,
    job_id: &'a str,
    execution_id: u64,
    cancel: &'a CancellationToken,
}

impl StageTracker for ExecutionTracker<'_> {
    fn enter(&self, state: JobState) -> AppResult<()> {
        self.checkpoint()?;
        if !self.registry.set_state(self.job_id, self.execution_id, state) {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    fn checkpoint(&self) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    fn workspace_allocated(&self, path: Option<&Path>) {
        self.registry.set_work_dir(self.job_id, self.execution_id, path);
    }
}

/// jobId 会出现在文件名中，只允许字母、数字、'-' 和 '_'
fn validate_job_id(job_id: &str) -> AppResult<()> {
    let valid = !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!("无效的任务 ID: {:?}", job_id)))
    }
}

/// 删除成品目录中属于该 jobId 的文件 ({jobId}.*)
fn purge_artifacts(artifact_dir: &Path, job_id: &str) -> AppResult<usize> {
    let entries = match fs::read_dir(artifact_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{}.", job_id);
    let mut removed = 0;
    for entry in entries.flatten() {
        let owned = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(&prefix))
            .unwrap_or(false);
        if owned && entry.path().is_file() {
            remove_file_if_exists(&entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// 清理上次运行残留的工作区
fn cleanup_stale_workspaces(scratch_root: &Path) {
    let Ok(entries) = fs::read_dir(scratch_root) else {
        return;
    };
    for entry in entries.flatten() {
        let stale = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(WORKSPACE_PREFIX))
            .unwrap_or(false);
        if stale && entry.path().is_dir() {
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => debug!("[JOB] 已清理残留工作区: {:?}", entry.path()),
                Err(e) => warn!("[JOB] 清理残留工作区失败 {:?}: {}", entry.path(), e),
            }
        }
    }
}
