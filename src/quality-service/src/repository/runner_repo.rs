//! Runner 仓库
//! 注册与心跳的持久化

use sqlx::PgPool;
use uuid::Uuid;

use common::messages::{RunnerHeartbeatMessage, RunnerRegistrationMessage};

/// Runner 数据访问
pub struct RunnerRepo;

impl RunnerRepo {
    /// 注册 Runner（重复注册按名称覆盖）
    pub async fn upsert_registration(
        pool: &PgPool,
        msg: &RunnerRegistrationMessage,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO runners \
                 (name, capabilities, docker_supported, max_concurrent_jobs, \
                  os, arch, version, hostname, status, last_heartbeat_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'online', NOW()) \
             ON CONFLICT (name) DO UPDATE SET \
                 capabilities = EXCLUDED.capabilities, \
                 docker_supported = EXCLUDED.docker_supported, \
                 max_concurrent_jobs = EXCLUDED.max_concurrent_jobs, \
                 os = EXCLUDED.os, arch = EXCLUDED.arch, \
                 version = EXCLUDED.version, hostname = EXCLUDED.hostname, \
                 status = 'online', last_heartbeat_at = NOW() \
             RETURNING id",
        )
        .bind(&msg.name)
        .bind(sqlx::types::Json(&msg.capabilities))
        .bind(msg.docker_supported)
        .bind(msg.max_concurrent_jobs as i32)
        .bind(&msg.os)
        .bind(&msg.arch)
        .bind(&msg.version)
        .bind(&msg.hostname)
        .fetch_one(pool)
        .await
    }

    /// 记录心跳
    ///
    /// 返回 `false` 表示该 Runner 从未注册。
    pub async fn record_heartbeat(
        pool: &PgPool,
        msg: &RunnerHeartbeatMessage,
    ) -> Result<bool, sqlx::Error> {
        let status = match msg.status {
            common::messages::RunnerStatus::Online => "online",
            common::messages::RunnerStatus::Active => "active",
            common::messages::RunnerStatus::Maintenance => "maintenance",
            common::messages::RunnerStatus::Offline => "offline",
        };

        let result = sqlx::query(
            "UPDATE runners \
             SET status = $2, current_jobs = $3, last_heartbeat_at = NOW() \
             WHERE name = $1",
        )
        .bind(&msg.name)
        .bind(status)
        .bind(msg.current_jobs as i32)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
