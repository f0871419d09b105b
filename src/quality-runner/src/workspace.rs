//! 工作区管理
//! 每次作业尝试独占一个工作区目录，尝试结束即清理

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;

/// 工作区管理器
pub struct WorkspaceManager {
    base_dir: PathBuf,
    retain_count: usize,
}

impl WorkspaceManager {
    /// 创建新的工作区管理器
    pub fn new(base_dir: impl Into<PathBuf>, retain_count: usize) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).context("Failed to create workspace base directory")?;

        Ok(Self {
            base_dir,
            retain_count,
        })
    }

    /// 从配置创建
    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        Self::new(
            &config.execution.workspace_base_dir,
            config.execution.workspace_retain_count,
        )
    }

    /// 为一次尝试创建工作区
    pub fn create_workspace(&self, analysis_id: Uuid, attempt: u32) -> Result<PathBuf> {
        let workspace_name = format!("{}_{}", analysis_id, attempt);
        let workspace_path = self.base_dir.join(&workspace_name);

        fs::create_dir_all(&workspace_path).context("Failed to create workspace directory")?;

        info!("Created workspace: {:?}", workspace_path);
        Ok(workspace_path)
    }

    /// 清理指定工作区
    ///
    /// 多次重试以应对文件占用。
    pub fn cleanup_workspace(&self, workspace: &Path) -> Result<()> {
        if !workspace.exists() {
            return Ok(());
        }

        for attempt in 1..=3 {
            match fs::remove_dir_all(workspace) {
                Ok(_) => {
                    info!("Cleaned up workspace: {:?}", workspace);
                    return Ok(());
                }
                Err(e) if attempt < 3 => {
                    warn!(
                        "Cleanup attempt {} failed for {:?}: {}, retrying...",
                        attempt, workspace, e
                    );
                    std::thread::sleep(Duration::from_millis(500));
                }
                Err(e) => {
                    warn!("Failed to cleanup workspace {:?}: {}", workspace, e);
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// 清理旧工作区，保留最近的 N 个
    pub fn cleanup_old_workspaces(&self) -> Result<()> {
        let entries: Vec<_> = fs::read_dir(&self.base_dir)
            .context("Failed to read workspace directory")?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path().is_dir()
                    && e.path()
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.contains('_'))
                        .unwrap_or(false)
            })
            .collect();

        if entries.len() <= self.retain_count {
            return Ok(());
        }

        // 按修改时间排序，新的在前
        let mut entries_with_time: Vec<_> = entries
            .iter()
            .filter_map(|e| {
                e.metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(|t| (e, t))
            })
            .collect();

        entries_with_time.sort_by(|a, b| b.1.cmp(&a.1));

        let mut cleaned = 0;
        for (entry, _) in entries_with_time.iter().skip(self.retain_count) {
            let path = entry.path();
            if let Err(e) = self.cleanup_workspace(&path) {
                warn!("Failed to cleanup old workspace {:?}: {}", path, e);
            } else {
                cleaned += 1;
            }
        }

        info!("Cleaned {} old workspaces, retained {} most recent", cleaned, self.retain_count);
        Ok(())
    }
}

/// 把源码归档（zip 字节）解压到工作区
pub fn extract_archive(workspace: &Path, archive_bytes: &[u8]) -> Result<()> {
    let cursor = Cursor::new(archive_bytes);
    let mut archive = zip::ZipArchive::new(cursor).context("Failed to open source archive")?;

    archive
        .extract(workspace)
        .context("Failed to extract source archive")?;

    info!(
        entries = archive.len(),
        workspace = %workspace.display(),
        "Source archive extracted",
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_workspace_create_and_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path(), 3).unwrap();

        let id = Uuid::new_v4();
        let workspace = manager.create_workspace(id, 1).unwrap();
        assert!(workspace.exists());
        assert!(workspace.to_string_lossy().contains(&id.to_string()));

        manager.cleanup_workspace(&workspace).unwrap();
        assert!(!workspace.exists());

        // 清理不存在的目录是幂等的
        manager.cleanup_workspace(&workspace).unwrap();
    }

    #[test]
    fn test_workspaces_per_attempt_are_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path(), 3).unwrap();

        let id = Uuid::new_v4();
        let first = manager.create_workspace(id, 1).unwrap();
        let second = manager.create_workspace(id, 2).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_cleanup_old_workspaces_retains_recent() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path(), 2).unwrap();

        for i in 0..5 {
            let ws = manager.create_workspace(Uuid::new_v4(), i).unwrap();
            // 保证修改时间可区分
            std::thread::sleep(Duration::from_millis(10));
            fs::write(ws.join("marker"), b"x").unwrap();
        }

        manager.cleanup_old_workspaces().unwrap();

        let remaining = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(remaining, 2);
    }

    #[test]
    fn test_extract_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = make_zip(&[("src/main.rs", "fn main() {}"), ("README.md", "# hi")]);

        extract_archive(tmp.path(), &archive).unwrap();

        assert!(tmp.path().join("src/main.rs").exists());
        assert_eq!(
            fs::read_to_string(tmp.path().join("README.md")).unwrap(),
            "# hi"
        );
    }

    #[test]
    fn test_extract_bad_archive_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(extract_archive(tmp.path(), b"not a zip").is_err());
    }
}
