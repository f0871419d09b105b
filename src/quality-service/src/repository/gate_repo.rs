//! 质量门仓库

use sqlx::PgPool;
use uuid::Uuid;

use common::gate::GateCondition;

use crate::models::gate::{Gate, GateConditionRow};

/// 质量门表的列清单
const GATE_COLUMNS: &str = "id, project_key, name, created_at";

/// 质量门数据访问
pub struct GateRepo;

impl GateRepo {
    /// 按项目查找质量门
    pub async fn find_by_project(
        pool: &PgPool,
        project_key: &str,
    ) -> Result<Option<Gate>, sqlx::Error> {
        let query = format!("SELECT {GATE_COLUMNS} FROM gates WHERE project_key = $1");
        sqlx::query_as::<_, Gate>(&query)
            .bind(project_key)
            .fetch_optional(pool)
            .await
    }

    /// 创建质量门并播种条件集合
    ///
    /// project_key 冲突时（并发创建者）返回已存在的门，不重复播种。
    pub async fn create_with_conditions(
        pool: &PgPool,
        project_key: &str,
        name: &str,
        conditions: &[GateCondition],
    ) -> Result<Gate, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO gates (project_key, name) VALUES ($1, $2) \
             ON CONFLICT (project_key) DO NOTHING \
             RETURNING {GATE_COLUMNS}"
        );
        let inserted: Option<Gate> = sqlx::query_as(&query)
            .bind(project_key)
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;

        let gate = match inserted {
            Some(gate) => {
                for (position, condition) in conditions.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO gate_conditions \
                             (gate_id, metric_key, operator, threshold, position) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(gate.id)
                    .bind(&condition.metric_key)
                    .bind(condition.operator.as_str())
                    .bind(condition.threshold)
                    .bind(position as i32)
                    .execute(&mut *tx)
                    .await?;
                }
                gate
            }
            None => {
                // 并发创建者赢了，读取既有行
                let query = format!("SELECT {GATE_COLUMNS} FROM gates WHERE project_key = $1");
                sqlx::query_as(&query)
                    .bind(project_key)
                    .fetch_one(&mut *tx)
                    .await?
            }
        };

        tx.commit().await?;
        Ok(gate)
    }

    /// 读取质量门的条件集合（按位置排序）
    pub async fn conditions_for(
        pool: &PgPool,
        gate_id: Uuid,
    ) -> Result<Vec<GateConditionRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, gate_id, metric_key, operator, threshold, position \
             FROM gate_conditions WHERE gate_id = $1 ORDER BY position",
        )
        .bind(gate_id)
        .fetch_all(pool)
        .await
    }
}
