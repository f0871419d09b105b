//! 质量门评估
//! 对聚合指标应用阈值条件集合，得出 PASS/FAIL 裁决
//!
//! `evaluate` 是输入的纯函数：无副作用、完全确定，可安全重复执行。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 条件比较操作符
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateOperator {
    /// 实际值 < 阈值 时通过
    Lt,
    /// 实际值 <= 阈值 时通过
    Lte,
    /// 实际值 > 阈值 时通过
    Gt,
    /// 实际值 >= 阈值 时通过
    Gte,
    /// 实际值 == 阈值 时通过
    Eq,
}

impl GateOperator {
    /// 返回协议中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOperator::Lt => "LT",
            GateOperator::Lte => "LTE",
            GateOperator::Gt => "GT",
            GateOperator::Gte => "GTE",
            GateOperator::Eq => "EQ",
        }
    }

    /// 对实际值与阈值应用比较
    pub fn compare(&self, actual: f64, threshold: f64) -> bool {
        match self {
            GateOperator::Lt => actual < threshold,
            GateOperator::Lte => actual <= threshold,
            GateOperator::Gt => actual > threshold,
            GateOperator::Gte => actual >= threshold,
            GateOperator::Eq => (actual - threshold).abs() < f64::EPSILON,
        }
    }
}

impl std::str::FromStr for GateOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LT" => Ok(GateOperator::Lt),
            "LTE" => Ok(GateOperator::Lte),
            "GT" => Ok(GateOperator::Gt),
            "GTE" => Ok(GateOperator::Gte),
            "EQ" => Ok(GateOperator::Eq),
            other => Err(format!("Unknown gate operator: {}", other)),
        }
    }
}

/// 质量门条件：指标 key + 操作符 + 阈值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateCondition {
    /// 指标 key（如 "coverage"、"blocker_issues"）
    pub metric_key: String,

    /// 比较操作符
    pub operator: GateOperator,

    /// 阈值
    pub threshold: f64,
}

/// 整体裁决
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    Fail,
}

impl GateStatus {
    /// 返回协议中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pass => "PASS",
            GateStatus::Fail => "FAIL",
        }
    }
}

/// 单条条件的评估结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionResult {
    /// 被评估的条件
    #[serde(flatten)]
    pub condition: GateCondition,

    /// 指标的实际值；指标缺失时为 None
    pub actual: Option<f64>,

    /// 该条件是否通过
    pub passed: bool,
}

/// 质量门整体评估结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityGateResult {
    /// 整体裁决：任一条件失败即 FAIL
    pub overall: GateStatus,

    /// 逐条件明细
    pub conditions: Vec<ConditionResult>,
}

/// 评估质量门
///
/// 指标缺失的条件按失败处理（fail-safe 默认）。
pub fn evaluate(conditions: &[GateCondition], metrics: &HashMap<String, f64>) -> QualityGateResult {
    let condition_results: Vec<ConditionResult> = conditions
        .iter()
        .map(|condition| {
            let actual = metrics.get(&condition.metric_key).copied();
            let passed = actual
                .map(|value| condition.operator.compare(value, condition.threshold))
                .unwrap_or(false);

            ConditionResult {
                condition: condition.clone(),
                actual,
                passed,
            }
        })
        .collect();

    let overall = if condition_results.iter().all(|r| r.passed) {
        GateStatus::Pass
    } else {
        GateStatus::Fail
    };

    QualityGateResult {
        overall,
        conditions: condition_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn condition(metric: &str, operator: GateOperator, threshold: f64) -> GateCondition {
        GateCondition {
            metric_key: metric.to_string(),
            operator,
            threshold,
        }
    }

    fn metrics(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    // -- 操作符 ----------------------------------------------------------------

    #[test]
    fn test_operator_compare() {
        assert!(GateOperator::Lt.compare(1.0, 2.0));
        assert!(!GateOperator::Lt.compare(2.0, 2.0));

        assert!(GateOperator::Lte.compare(2.0, 2.0));
        assert!(!GateOperator::Lte.compare(3.0, 2.0));

        assert!(GateOperator::Gt.compare(3.0, 2.0));
        assert!(!GateOperator::Gt.compare(2.0, 2.0));

        assert!(GateOperator::Gte.compare(2.0, 2.0));
        assert!(!GateOperator::Gte.compare(1.0, 2.0));

        assert!(GateOperator::Eq.compare(2.0, 2.0));
        assert!(!GateOperator::Eq.compare(2.1, 2.0));
    }

    #[test]
    fn test_operator_serialization() {
        let operators = vec![
            (GateOperator::Lt, "LT"),
            (GateOperator::Lte, "LTE"),
            (GateOperator::Gt, "GT"),
            (GateOperator::Gte, "GTE"),
            (GateOperator::Eq, "EQ"),
        ];

        for (op, expected) in operators {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
            assert_eq!(op.as_str(), expected);
            assert_eq!(GateOperator::from_str(expected).unwrap(), op);
        }
    }

    // -- evaluate --------------------------------------------------------------

    #[test]
    fn test_evaluate_all_pass() {
        let conditions = vec![
            condition("coverage", GateOperator::Gte, 80.0),
            condition("blocker_issues", GateOperator::Eq, 0.0),
        ];
        let m = metrics(&[("coverage", 92.5), ("blocker_issues", 0.0)]);

        let result = evaluate(&conditions, &m);
        assert_eq!(result.overall, GateStatus::Pass);
        assert!(result.conditions.iter().all(|c| c.passed));
    }

    #[test]
    fn test_evaluate_any_fail_means_overall_fail() {
        let conditions = vec![
            condition("coverage", GateOperator::Gte, 80.0),
            condition("blocker_issues", GateOperator::Eq, 0.0),
        ];
        let m = metrics(&[("coverage", 92.5), ("blocker_issues", 3.0)]);

        let result = evaluate(&conditions, &m);
        assert_eq!(result.overall, GateStatus::Fail);
        assert!(result.conditions[0].passed);
        assert!(!result.conditions[1].passed);
    }

    #[test]
    fn test_evaluate_missing_metric_fails_condition() {
        let conditions = vec![condition("coverage", GateOperator::Gte, 80.0)];
        let m = metrics(&[("issues", 5.0)]);

        let result = evaluate(&conditions, &m);
        assert_eq!(result.overall, GateStatus::Fail);
        assert!(!result.conditions[0].passed);
        assert_eq!(result.conditions[0].actual, None);
    }

    #[test]
    fn test_evaluate_empty_conditions_pass() {
        let result = evaluate(&[], &metrics(&[("coverage", 10.0)]));
        assert_eq!(result.overall, GateStatus::Pass);
        assert!(result.conditions.is_empty());
    }

    #[test]
    fn test_evaluate_is_pure_and_deterministic() {
        let conditions = vec![
            condition("coverage", GateOperator::Gte, 80.0),
            condition("duplicated_lines", GateOperator::Lte, 100.0),
        ];
        let m = metrics(&[("coverage", 79.9), ("duplicated_lines", 50.0)]);

        let first = evaluate(&conditions, &m);
        let second = evaluate(&conditions, &m);
        assert_eq!(first, second);
        assert_eq!(first.overall, GateStatus::Fail);
    }

    #[test]
    fn test_evaluate_boundary_values() {
        let m = metrics(&[("coverage", 80.0)]);

        let gte = evaluate(&[condition("coverage", GateOperator::Gte, 80.0)], &m);
        assert_eq!(gte.overall, GateStatus::Pass);

        let gt = evaluate(&[condition("coverage", GateOperator::Gt, 80.0)], &m);
        assert_eq!(gt.overall, GateStatus::Fail);
    }

    #[test]
    fn test_evaluate_records_actual_values() {
        let conditions = vec![condition("issues", GateOperator::Lte, 10.0)];
        let m = metrics(&[("issues", 4.0)]);

        let result = evaluate(&conditions, &m);
        assert_eq!(result.conditions[0].actual, Some(4.0));
    }

    #[test]
    fn test_result_serialization() {
        let conditions = vec![condition("coverage", GateOperator::Gte, 80.0)];
        let m = metrics(&[("coverage", 85.0)]);
        let result = evaluate(&conditions, &m);

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"overall\":\"PASS\""));
        assert!(json.contains("\"metric_key\":\"coverage\""));
        assert!(json.contains("\"operator\":\"GTE\""));

        let deserialized: QualityGateResult = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, result);
    }

    #[test]
    fn test_gate_status_serialization() {
        assert_eq!(serde_json::to_string(&GateStatus::Pass).unwrap(), "\"PASS\"");
        assert_eq!(serde_json::to_string(&GateStatus::Fail).unwrap(), "\"FAIL\"");
        assert_eq!(GateStatus::Pass.as_str(), "PASS");
        assert_eq!(GateStatus::Fail.as_str(), "FAIL");
    }
}
