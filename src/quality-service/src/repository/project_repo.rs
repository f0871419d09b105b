//! 项目仓库

use sqlx::PgPool;

use crate::models::project::Project;

/// 项目表的列清单
const COLUMNS: &str = "id, key, name, created_at, updated_at";

/// 项目数据访问
pub struct ProjectRepo;

impl ProjectRepo {
    /// 按 key 查找项目
    pub async fn find_by_key(pool: &PgPool, key: &str) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE key = $1");
        sqlx::query_as::<_, Project>(&query)
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// 创建项目
    ///
    /// key 冲突时（并发创建者）不报错，返回已存在的行。
    pub async fn create(pool: &PgPool, key: &str, name: &str) -> Result<Project, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (key, name) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(key)
            .bind(name)
            .fetch_one(pool)
            .await
    }

    /// 项目是否存在
    pub async fn exists(pool: &PgPool, key: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE key = $1")
            .bind(key)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }
}
