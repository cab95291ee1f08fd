// VocalCut - 在线媒体人声提取
//
// 流水线：解析/下载 -> 规范化 -> 人声分离 -> （视频）重新封装
// 成品按 {jobId}.{wav|mp4} 平铺在成品目录，过期文件由后台清理任务删除。

pub mod audio;
pub mod config;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod sweeper;
pub mod utils;
pub mod video;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, AppResult};
pub use jobs::{JobStatus, Orchestrator};
