// 工具模块

use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Windows 下隐藏控制台窗口的标志
#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 创建一个隐藏控制台窗口的 Command（Windows 专用）
/// 在非 Windows 平台上等同于 Command::new
#[cfg(target_os = "windows")]
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(target_os = "windows"))]
pub fn hidden_command(program: &str) -> Command {
    Command::new(program)
}

/// 生成短 ID（用于目录名）
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// 获取可执行文件所在目录
pub fn get_exe_dir() -> Option<PathBuf> {
    std::env::current_exe().ok()?.parent().map(|p| p.to_path_buf())
}

/// 解析程序路径，优先使用可执行文件旁打包的 tools 目录
pub fn resolve_tool_path(tool_name: &str) -> String {
    let file_name = format!("{}{}", tool_name, std::env::consts::EXE_SUFFIX);
    if let Some(exe_dir) = get_exe_dir() {
        // 检查 tools 子目录
        let tool_path = exe_dir.join("tools").join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
        // 检查可执行文件同级目录
        let tool_path = exe_dir.join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
    }
    // 回退到系统 PATH
    tool_name.to_string()
}

/// 获取应用数据目录（开发模式下为项目根目录下的 data 文件夹）
pub fn get_app_data_dir() -> PathBuf {
    if let Some(exe_dir) = get_exe_dir() {
        // 开发模式下，exe 在 target/debug 目录，需要回到项目根目录
        let in_target = exe_dir.ends_with("target/debug")
            || exe_dir.ends_with("target/release")
            || exe_dir.ends_with("target\\debug")
            || exe_dir.ends_with("target\\release");
        if in_target {
            if let Some(root) = exe_dir.parent().and_then(|p| p.parent()) {
                return root.join("data");
            }
        }
        return exe_dir.join("data");
    }

    // 回退到当前工作目录
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("data")
}

/// 规范化用户提交的地址：缺少协议时补全 https://
pub fn normalize_source_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url.to_string())
    } else {
        Some(format!("https://{}", url))
    }
}

/// 文件扩展名（小写）
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().to_lowercase())
}

/// 移动文件；跨文件系统时回退为复制后删除
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// 删除文件，文件不存在时视为成功
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
