//! 质量门模型
//! 质量门与条件的数据库表示、默认条件集合

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::gate::{GateCondition, GateOperator};

/// 质量门记录（每个项目一个）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Gate {
    pub id: Uuid,
    pub project_key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 质量门条件行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GateConditionRow {
    pub id: Uuid,
    pub gate_id: Uuid,
    pub metric_key: String,
    /// LT / LTE / GT / GTE / EQ
    pub operator: String,
    pub threshold: f64,
    pub position: i32,
}

impl GateConditionRow {
    /// 还原为评估器输入；操作符非法时返回 None
    pub fn to_condition(&self) -> Option<GateCondition> {
        Some(GateCondition {
            metric_key: self.metric_key.clone(),
            operator: self.operator.parse().ok()?,
            threshold: self.threshold,
        })
    }
}

/// 创建质量门请求
#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateGateRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
}

/// 质量门详情响应
#[derive(Debug, Serialize)]
pub struct GateResponse {
    pub name: String,
    pub conditions: Vec<GateCondition>,
}

/// 新建质量门时播种的默认条件
pub fn default_conditions() -> Vec<GateCondition> {
    vec![
        GateCondition {
            metric_key: "coverage".to_string(),
            operator: GateOperator::Gte,
            threshold: 80.0,
        },
        GateCondition {
            metric_key: "blocker_issues".to_string(),
            operator: GateOperator::Eq,
            threshold: 0.0,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_conditions() {
        let conditions = default_conditions();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].metric_key, "coverage");
        assert_eq!(conditions[0].operator, GateOperator::Gte);
        assert_eq!(conditions[1].metric_key, "blocker_issues");
        assert_eq!(conditions[1].threshold, 0.0);
    }

    #[test]
    fn test_condition_row_conversion() {
        let row = GateConditionRow {
            id: Uuid::new_v4(),
            gate_id: Uuid::new_v4(),
            metric_key: "coverage".to_string(),
            operator: "GTE".to_string(),
            threshold: 75.0,
            position: 0,
        };

        let condition = row.to_condition().unwrap();
        assert_eq!(condition.operator, GateOperator::Gte);
        assert_eq!(condition.threshold, 75.0);
    }

    #[test]
    fn test_condition_row_bad_operator() {
        let row = GateConditionRow {
            id: Uuid::new_v4(),
            gate_id: Uuid::new_v4(),
            metric_key: "coverage".to_string(),
            operator: "BETWEEN".to_string(),
            threshold: 75.0,
            position: 0,
        };

        assert!(row.to_condition().is_none());
    }
}
