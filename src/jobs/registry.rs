// 任务状态表
//
// jobId -> Job 的并发安全映射。状态轮询只读；写入只来自该任务当前的执行，
// 每次写入都带上执行编号，被新提交取代的旧执行无法修改新条目。

use crate::error::{AppError, AppResult, ErrorKind};
use crate::fetch::JobKind;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Probing,
    Downloading,
    Normalizing,
    Separating,
    Muxing,
    Ready,
    Failed(ErrorKind),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Ready | JobState::Failed(_))
    }
}

/// 任务记录
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    /// 当前执行编号，每次提交递增
    pub execution_id: u64,
    pub state: JobState,
    pub source_url: String,
    pub kind: Option<JobKind>,
    pub work_dir: Option<PathBuf>,
    pub result_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 对外的状态快照
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub kind: Option<JobKind>,
    pub ready: bool,
    pub failed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            state: job.state,
            kind: job.kind,
            ready: job.state == JobState::Ready && job.result_path.is_some(),
            failed: matches!(job.state, JobState::Failed(_)),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
    next_execution: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建（或替换）任务条目，返回本次执行编号
    pub fn insert(&self, job_id: &str, source_url: &str) -> u64 {
        let execution_id = self.next_execution.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let job = Job {
            id: job_id.to_string(),
            execution_id,
            state: JobState::Submitted,
            source_url: source_url.to_string(),
            kind: None,
            work_dir: None,
            result_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().insert(job_id.to_string(), job);
        execution_id
    }

    /// 仅当执行编号匹配且未处于终态时修改条目；返回是否已修改
    fn update<F>(&self, job_id: &str, execution_id: u64, apply: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(job_id) {
            Some(job) if job.execution_id == execution_id && !job.state.is_terminal() => {
                apply(job);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn set_state(&self, job_id: &str, execution_id: u64, state: JobState) -> bool {
        let updated = self.update(job_id, execution_id, |job| job.state = state);
        if updated {
            debug!("[JOB] {} -> {:?}", job_id, state);
        }
        updated
    }

    pub fn set_kind(&self, job_id: &str, execution_id: u64, kind: JobKind) -> bool {
        self.update(job_id, execution_id, |job| job.kind = Some(kind))
    }

    pub fn set_work_dir(&self, job_id: &str, execution_id: u64, work_dir: Option<&Path>) -> bool {
        self.update(job_id, execution_id, |job| {
            job.work_dir = work_dir.map(Path::to_path_buf)
        })
    }

    pub fn mark_ready(&self, job_id: &str, execution_id: u64, result_path: PathBuf) -> bool {
        self.update(job_id, execution_id, |job| {
            job.state = JobState::Ready;
            job.result_path = Some(result_path);
            job.work_dir = None;
        })
    }

    pub fn mark_failed(&self, job_id: &str, execution_id: u64, error: &AppError) -> bool {
        self.update(job_id, execution_id, |job| {
            job.state = JobState::Failed(error.kind());
            job.error = Some(error.to_string());
            job.work_dir = None;
        })
    }

    /// 就绪任务的成品已不存在时（被定时清理回收）转为 Failed(NotFound)；返回是否发生转换
    pub fn expire_missing_result(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        if job.state != JobState::Ready {
            return false;
        }
        let path = match &job.result_path {
            Some(path) if path.is_file() => return false,
            Some(path) => path.display().to_string(),
            None => String::new(),
        };

        let error = AppError::NotFound(format!("成品文件已不存在: {}", path));
        job.state = JobState::Failed(error.kind());
        job.error = Some(error.to_string());
        job.result_path = None;
        job.updated_at = Utc::now();
        true
    }

    /// 清除最后更新早于 max_age 的终态条目，返回被清除的 jobId
    pub fn evict_terminal(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut evicted = Vec::new();
        self.jobs.write().retain(|job_id, job| {
            let age = (now - job.updated_at).to_std().unwrap_or(Duration::ZERO);
            let expired = job.state.is_terminal() && age > max_age;
            if expired {
                evicted.push(job_id.clone());
            }
            !expired
        });
        evicted
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.read().contains_key(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.read().get(job_id).map(JobStatus::from)
    }

    /// 取走就绪任务的成品路径并清除条目；只能成功一次
    pub fn take_result(&self, job_id: &str) -> AppResult<PathBuf> {
        let mut jobs = self.jobs.write();
        let path = match jobs.get(job_id) {
            Some(job) if job.state == JobState::Ready => job.result_path.clone(),
            _ => None,
        }
        .ok_or_else(|| AppError::NotFound(format!("任务 {} 没有可领取的成品", job_id)))?;

        jobs.remove(job_id);
        Ok(path)
    }

    pub fn remove(&self, job_id: &str) -> Option<Job> {
        self.jobs.write().remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}
