//! 归档存储服务
//! 源码归档的本地落盘、读取与清理
//!
//! 每个分析作业独占一个目录；作业进入终态后归档可被清理。

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// 归档文件名
const ARCHIVE_FILE_NAME: &str = "source.zip";

/// 归档存储服务
#[derive(Debug, Clone)]
pub struct StorageService {
    base_dir: PathBuf,
}

impl StorageService {
    /// 创建存储服务并确保根目录存在
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| AppError::Storage(format!("create base dir: {}", e)))?;
        Ok(Self { base_dir })
    }

    /// 归档在磁盘上的路径
    pub fn archive_path(&self, analysis_id: Uuid) -> PathBuf {
        self.base_dir.join(analysis_id.to_string()).join(ARCHIVE_FILE_NAME)
    }

    /// 落盘源码归档，返回 SHA-256 摘要
    pub async fn store_archive(&self, analysis_id: Uuid, bytes: &[u8]) -> Result<String> {
        let dir = self.base_dir.join(analysis_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Storage(format!("create archive dir: {}", e)))?;

        let path = dir.join(ARCHIVE_FILE_NAME);
        fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("write archive: {}", e)))?;

        let digest = hex::encode(Sha256::digest(bytes));

        tracing::info!(
            analysis_id = %analysis_id,
            size = bytes.len(),
            sha256 = %digest,
            "Source archive stored",
        );

        metrics::counter!("storage.archives.stored").increment(1);

        Ok(digest)
    }

    /// 读取源码归档
    pub async fn read_archive(&self, analysis_id: Uuid) -> Result<Vec<u8>> {
        let path = self.archive_path(analysis_id);
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("archive for analysis {}", analysis_id))
            } else {
                AppError::Storage(format!("read archive: {}", e))
            }
        })
    }

    /// 删除某个分析的归档目录
    pub async fn remove_archive(&self, analysis_id: Uuid) -> Result<()> {
        let dir = self.base_dir.join(analysis_id.to_string());
        if !dir_exists(&dir).await {
            return Ok(());
        }
        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| AppError::Storage(format!("remove archive dir: {}", e)))?;
        tracing::debug!(analysis_id = %analysis_id, "Archive removed");
        Ok(())
    }
}

async fn dir_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_read_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = StorageService::new(tmp.path()).unwrap();
        let id = Uuid::new_v4();

        let digest = storage.store_archive(id, b"zip-bytes").await.unwrap();
        assert_eq!(digest.len(), 64);

        let read_back = storage.read_archive(id).await.unwrap();
        assert_eq!(read_back, b"zip-bytes");
    }

    #[tokio::test]
    async fn test_read_missing_archive_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = StorageService::new(tmp.path()).unwrap();

        let err = storage.read_archive(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = StorageService::new(tmp.path()).unwrap();
        let id = Uuid::new_v4();

        storage.store_archive(id, b"data").await.unwrap();
        storage.remove_archive(id).await.unwrap();

        assert!(storage.read_archive(id).await.is_err());
        // 再次删除是幂等的
        storage.remove_archive(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_digest_matches_content() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = StorageService::new(tmp.path()).unwrap();

        let a = storage.store_archive(Uuid::new_v4(), b"same").await.unwrap();
        let b = storage.store_archive(Uuid::new_v4(), b"same").await.unwrap();
        let c = storage.store_archive(Uuid::new_v4(), b"different").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
