//! 模型与 DTO 的验证测试

use common::gate::{GateCondition, GateOperator};
use common::messages::PullRequestInfo;
use quality_service::models::analysis::{AnalysisStatus, NewAnalysis};
use quality_service::models::gate::default_conditions;
use quality_service::models::project::validate_project_key;

fn base_analysis() -> NewAnalysis {
    NewAnalysis {
        project_key: "platform-api".to_string(),
        branch: Some("main".to_string()),
        pull_request: None,
        commit_sha: "deadbeef".to_string(),
        analyzers: vec![],
        max_attempts: 3,
        uploaded_coverage: None,
    }
}

#[test]
fn test_analysis_status_wire_strings() {
    assert_eq!(AnalysisStatus::Pending.as_wire_str(), "PENDING");
    assert_eq!(AnalysisStatus::Running.as_wire_str(), "RUNNING");
    assert_eq!(AnalysisStatus::Success.as_wire_str(), "SUCCESS");
    assert_eq!(AnalysisStatus::Failed.as_wire_str(), "FAILED");
}

#[test]
fn test_analysis_status_json_matches_wire() {
    let json = serde_json::to_string(&AnalysisStatus::Success).unwrap();
    assert_eq!(json, "\"SUCCESS\"");

    let parsed: AnalysisStatus = serde_json::from_str("\"FAILED\"").unwrap();
    assert_eq!(parsed, AnalysisStatus::Failed);
}

#[test]
fn test_branch_and_pr_mutually_exclusive() {
    let mut analysis = base_analysis();
    assert!(analysis.validate_target().is_ok());

    analysis.pull_request = Some(PullRequestInfo {
        provider: "github".to_string(),
        repo: "acme/platform".to_string(),
        pr_number: 3,
        source_branch: "feature".to_string(),
        target_branch: "main".to_string(),
    });
    assert!(analysis.validate_target().is_err());

    analysis.branch = None;
    assert!(analysis.validate_target().is_ok());

    analysis.pull_request = None;
    assert!(analysis.validate_target().is_err());
}

#[test]
fn test_project_key_rules() {
    assert!(validate_project_key("acme:billing").is_ok());
    assert!(validate_project_key("a-b_c.d").is_ok());
    assert!(validate_project_key("").is_err());
    assert!(validate_project_key("has space").is_err());
    assert!(validate_project_key("emoji😀").is_err());
}

#[test]
fn test_default_gate_conditions_shape() {
    let conditions = default_conditions();

    let coverage = conditions.iter().find(|c| c.metric_key == "coverage").unwrap();
    assert_eq!(coverage.operator, GateOperator::Gte);
    assert!(coverage.threshold > 0.0);

    let blockers = conditions
        .iter()
        .find(|c| c.metric_key == "blocker_issues")
        .unwrap();
    assert_eq!(blockers.operator, GateOperator::Eq);
    assert_eq!(blockers.threshold, 0.0);
}

#[test]
fn test_default_conditions_evaluate_cleanly() {
    use std::collections::HashMap;

    let conditions: Vec<GateCondition> = default_conditions();
    let mut metrics = HashMap::new();
    metrics.insert("coverage".to_string(), 95.0);
    metrics.insert("blocker_issues".to_string(), 0.0);

    let result = common::gate::evaluate(&conditions, &metrics);
    assert_eq!(result.overall, common::gate::GateStatus::Pass);

    metrics.insert("blocker_issues".to_string(), 1.0);
    let result = common::gate::evaluate(&conditions, &metrics);
    assert_eq!(result.overall, common::gate::GateStatus::Fail);
}
