// 任务管理模块
//
// 子模块：
// - registry: 任务状态表
// - orchestrator: 提交、执行、轮询与领取

pub mod orchestrator;
pub mod registry;

pub use orchestrator::Orchestrator;
pub use registry::{Job, JobRegistry, JobState, JobStatus};
