//! 分析器报告摄取
//! 将沙箱内分析器产出的原始 JSON 报告转换为规范化记录
//!
//! 分析器在工作区根目录写出一份报告文件（issues/duplications/
//! coverage 引用），摄取逻辑对字段拼写宽容：严重级别与类别
//! 使用各分析器自己的叫法也能正确归一。

use serde::Deserialize;

use crate::coverage::Format;
use crate::duplication::{BlockSide, DuplicationBlock};
use crate::error::AppError;
use crate::model::{Issue, IssueKind, Severity};

/// 分析器报告文件的约定文件名（相对工作区根目录）
///
/// 按分析器 key 区分，同一工作区内并发运行的分析器互不覆盖。
pub fn report_file_name(analyzer_key: &str) -> String {
    format!(".quality-report.{}.json", analyzer_key)
}

/// 摄取后的分析器报告
#[derive(Debug, Clone, Default)]
pub struct AnalyzerReport {
    /// 规范化后的问题列表
    pub issues: Vec<Issue>,

    /// 重复块列表
    pub duplications: Vec<DuplicationBlock>,

    /// 覆盖率文件引用（相对工作区根目录）
    pub coverage: Option<CoverageRef>,
}

/// 覆盖率文件引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRef {
    /// 覆盖率文件路径
    pub path: String,

    /// 格式提示；缺失时按内容探测
    pub format: Option<Format>,
}

// ---------------------------------------------------------------------------
// 原始报告结构（分析器写出的 JSON）
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawReport {
    #[serde(default)]
    issues: Vec<RawIssue>,

    #[serde(default)]
    duplications: Vec<RawDuplication>,

    #[serde(default)]
    coverage: Option<RawCoverageRef>,
}

#[derive(Deserialize)]
struct RawIssue {
    rule: String,

    #[serde(default)]
    severity: Option<String>,

    #[serde(default, rename = "type")]
    kind: Option<String>,

    file: String,

    #[serde(default)]
    line: Option<u32>,

    message: String,
}

#[derive(Deserialize)]
struct RawDuplication {
    first: RawBlockSide,
    second: RawBlockSide,
    lines: u32,

    #[serde(default)]
    tokens: u32,

    #[serde(default)]
    excerpt: String,
}

#[derive(Deserialize)]
struct RawBlockSide {
    file: String,
    start_line: u32,
    end_line: u32,
}

#[derive(Deserialize)]
struct RawCoverageRef {
    path: String,

    #[serde(default)]
    format: Option<String>,
}

/// 解析分析器报告 JSON
///
/// `analyzer_key` 记在每条问题上，并参与指纹计算。
pub fn parse_report(analyzer_key: &str, raw: &str) -> Result<AnalyzerReport, AppError> {
    let report: RawReport = serde_json::from_str(raw)
        .map_err(|e| AppError::Parse(format!("analyzer report: {}", e)))?;

    let issues = report
        .issues
        .into_iter()
        .map(|raw_issue| {
            let severity = raw_issue
                .severity
                .as_deref()
                .map(Severity::from_raw)
                .unwrap_or(Severity::Major);
            let kind = raw_issue
                .kind
                .as_deref()
                .map(IssueKind::from_raw)
                .unwrap_or(IssueKind::CodeSmell);

            Issue::new(
                analyzer_key,
                raw_issue.rule,
                severity,
                kind,
                raw_issue.file,
                raw_issue.line,
                raw_issue.message,
            )
        })
        .collect();

    let duplications = report
        .duplications
        .into_iter()
        .map(|raw_dup| DuplicationBlock {
            first: BlockSide {
                file_path: raw_dup.first.file,
                start_line: raw_dup.first.start_line,
                end_line: raw_dup.first.end_line,
            },
            second: BlockSide {
                file_path: raw_dup.second.file,
                start_line: raw_dup.second.start_line,
                end_line: raw_dup.second.end_line,
            },
            lines: raw_dup.lines,
            tokens: raw_dup.tokens,
            excerpt: raw_dup.excerpt,
        })
        .collect();

    let coverage = match report.coverage {
        Some(raw_cov) => {
            let format = match raw_cov.format.as_deref() {
                Some(f) => Some(
                    f.parse::<Format>()
                        .map_err(|e| AppError::Parse(e.to_string()))?,
                ),
                None => None,
            };
            Some(CoverageRef {
                path: raw_cov.path,
                format,
            })
        }
        None => None,
    };

    Ok(AnalyzerReport {
        issues,
        duplications,
        coverage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_REPORT: &str = r#"{
        "issues": [
            { "rule": "no-unwrap", "severity": "critical", "type": "bug",
              "file": "src/main.rs", "line": 10, "message": "unwrap on Result" },
            { "rule": "long-fn", "severity": "warning",
              "file": "src/worker.rs", "message": "function too long" }
        ],
        "duplications": [
            { "first": { "file": "src/a.rs", "start_line": 1, "end_line": 20 },
              "second": { "file": "src/b.rs", "start_line": 40, "end_line": 59 },
              "lines": 20, "tokens": 180, "excerpt": "fn compute() {" }
        ],
        "coverage": { "path": "coverage/lcov.info", "format": "lcov" }
    }"#;

    #[test]
    fn test_parse_full_report() {
        let report = parse_report("lint", FULL_REPORT).unwrap();

        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.duplications.len(), 1);
        assert_eq!(
            report.coverage,
            Some(CoverageRef {
                path: "coverage/lcov.info".to_string(),
                format: Some(Format::Lcov),
            })
        );
    }

    #[test]
    fn test_issue_normalization() {
        let report = parse_report("lint", FULL_REPORT).unwrap();

        let first = &report.issues[0];
        assert_eq!(first.analyzer_key, "lint");
        assert_eq!(first.rule_key, "no-unwrap");
        assert_eq!(first.severity, Severity::Critical);
        assert_eq!(first.kind, IssueKind::Bug);
        assert_eq!(first.line, Some(10));
        assert_eq!(first.fingerprint.len(), 64);

        // "warning" 归一为 MINOR，缺失 type 归一为 CODE_SMELL
        let second = &report.issues[1];
        assert_eq!(second.severity, Severity::Minor);
        assert_eq!(second.kind, IssueKind::CodeSmell);
        assert_eq!(second.line, None);
    }

    #[test]
    fn test_duplication_mapping() {
        let report = parse_report("cpd", FULL_REPORT).unwrap();
        let dup = &report.duplications[0];

        assert_eq!(dup.first.file_path, "src/a.rs");
        assert_eq!(dup.second.file_path, "src/b.rs");
        assert_eq!(dup.lines, 20);
        assert_eq!(dup.tokens, 180);
    }

    #[test]
    fn test_empty_report_sections_default() {
        let report = parse_report("lint", "{}").unwrap();
        assert!(report.issues.is_empty());
        assert!(report.duplications.is_empty());
        assert!(report.coverage.is_none());
    }

    #[test]
    fn test_coverage_without_format_hint() {
        let raw = r#"{ "coverage": { "path": "cover.out" } }"#;
        let report = parse_report("go-cover", raw).unwrap();
        let cov = report.coverage.unwrap();

        assert_eq!(cov.path, "cover.out");
        assert_eq!(cov.format, None);
    }

    #[test]
    fn test_malformed_report_rejected() {
        assert!(parse_report("lint", "not json").is_err());
        assert!(parse_report("lint", r#"{"issues": "nope"}"#).is_err());
    }

    #[test]
    fn test_unknown_coverage_format_rejected() {
        let raw = r#"{ "coverage": { "path": "x", "format": "cobertura" } }"#;
        let err = parse_report("lint", raw).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn test_report_file_name_per_analyzer() {
        assert_eq!(report_file_name("lint"), ".quality-report.lint.json");
        assert_ne!(report_file_name("lint"), report_file_name("dup"));
    }
}
