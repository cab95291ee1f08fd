// 临时工作区管理
//
// 每次任务执行拥有一个唯一命名的临时目录，任务内各阶段的中间文件都放在其中。
// 最终成品在销毁前移出；Drop 时自动销毁，保证任何退出路径都不留残余。

use crate::error::AppResult;
use crate::utils::short_id;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 工作区目录名前缀
pub const WORKSPACE_PREFIX: &str = "ws-";

/// 工作区管理器：在配置的根目录下分配工作区
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 分配一个新的工作区，根目录不存在时自动创建
    pub fn create(&self) -> AppResult<Workspace> {
        Workspace::create_in(&self.root)
    }
}

/// 单次任务执行的临时目录
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    destroyed: bool,
}

impl Workspace {
    fn create_in(parent: &Path) -> AppResult<Self> {
        fs::create_dir_all(parent)?;
        // 名称冲突的概率可以忽略，但仍用 create_dir 保证不会复用已有目录
        loop {
            let path = parent.join(format!("{}{}", WORKSPACE_PREFIX, short_id()));
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("[WORKSPACE] 创建工作区: {:?}", path);
                    return Ok(Self { path, destroyed: false });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 工作区内的文件路径
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// 在当前工作区内分配子工作区
    pub fn create_child(&self) -> AppResult<Workspace> {
        Workspace::create_in(&self.path)
    }

    /// 递归删除工作区；目录缺失或部分缺失时不报错，可重复调用
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("[WORKSPACE] 已销毁工作区: {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("[WORKSPACE] 销毁工作区失败 {:?}: {}", self.path, e),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.destroy();
    }
}
