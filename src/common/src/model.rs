//! 规范化分析模型
//! 定义问题（Issue）、严重级别与分析器调用结果的统一表示
//!
//! 所有分析器的异构输出最终都收敛到这里定义的类型

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 问题严重级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// 提示
    Info,
    /// 次要
    Minor,
    /// 主要
    Major,
    /// 严重
    Critical,
    /// 阻断
    Blocker,
}

impl Severity {
    /// 返回协议中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Minor => "MINOR",
            Severity::Major => "MAJOR",
            Severity::Critical => "CRITICAL",
            Severity::Blocker => "BLOCKER",
        }
    }

    /// 从分析器输出中的字符串解析严重级别
    ///
    /// 分析器的写法各不相同（"warning"、"error"、"blocker"...），
    /// 未知值归入 `Major`，保证问题不会因为级别拼写而丢失。
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "info" | "information" | "note" => Severity::Info,
            "minor" | "warning" | "warn" | "low" => Severity::Minor,
            "major" | "medium" | "error" => Severity::Major,
            "critical" | "high" => Severity::Critical,
            "blocker" | "fatal" => Severity::Blocker,
            _ => Severity::Major,
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "MINOR" => Ok(Severity::Minor),
            "MAJOR" => Ok(Severity::Major),
            "CRITICAL" => Ok(Severity::Critical),
            "BLOCKER" => Ok(Severity::Blocker),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// 问题类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    /// 缺陷
    Bug,
    /// 代码坏味道
    CodeSmell,
    /// 安全漏洞
    Vulnerability,
}

impl IssueKind {
    /// 返回协议中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Bug => "BUG",
            IssueKind::CodeSmell => "CODE_SMELL",
            IssueKind::Vulnerability => "VULNERABILITY",
        }
    }

    /// 从分析器输出中的字符串解析问题类别，未知值归入 `CodeSmell`
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "bug" | "defect" => IssueKind::Bug,
            "vulnerability" | "security" => IssueKind::Vulnerability,
            _ => IssueKind::CodeSmell,
        }
    }
}

impl std::str::FromStr for IssueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUG" => Ok(IssueKind::Bug),
            "CODE_SMELL" => Ok(IssueKind::CodeSmell),
            "VULNERABILITY" => Ok(IssueKind::Vulnerability),
            other => Err(format!("Unknown issue kind: {}", other)),
        }
    }
}

/// 规范化后的单条问题记录
///
/// 一旦写入即不可变。`fingerprint` 由内容派生，用于
/// 同一项目连续分析之间的去重与新旧对比。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    /// 产生此问题的分析器 key
    pub analyzer_key: String,

    /// 规则 key
    pub rule_key: String,

    /// 严重级别
    pub severity: Severity,

    /// 问题类别
    pub kind: IssueKind,

    /// 文件路径（相对工作区根目录）
    pub file_path: String,

    /// 行号（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// 问题描述
    pub message: String,

    /// 内容派生指纹（SHA-256 hex）
    pub fingerprint: String,
}

impl Issue {
    /// 构造问题记录并计算指纹
    pub fn new(
        analyzer_key: impl Into<String>,
        rule_key: impl Into<String>,
        severity: Severity,
        kind: IssueKind,
        file_path: impl Into<String>,
        line: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        let analyzer_key = analyzer_key.into();
        let rule_key = rule_key.into();
        let file_path = file_path.into();
        let message = message.into();
        let fingerprint = compute_fingerprint(&analyzer_key, &rule_key, &file_path, &message);

        Self {
            analyzer_key,
            rule_key,
            severity,
            kind,
            file_path,
            line,
            message,
            fingerprint,
        }
    }
}

/// 计算问题指纹
///
/// 刻意不包含行号：问题在文件内移动时指纹保持稳定，
/// 这样跨分析对比才能识别"同一个问题"。
pub fn compute_fingerprint(
    analyzer_key: &str,
    rule_key: &str,
    file_path: &str,
    message: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(analyzer_key.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(rule_key.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(file_path.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}

/// 分析器调用结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalyzerOutcome {
    /// 正常结束，退出码 0
    Ok,
    /// 非零退出码
    Error,
    /// 超时被终止
    Timeout,
    /// 被 OOM 杀死
    Oom,
}

impl AnalyzerOutcome {
    /// 返回协议中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerOutcome::Ok => "OK",
            AnalyzerOutcome::Error => "ERROR",
            AnalyzerOutcome::Timeout => "TIMEOUT",
            AnalyzerOutcome::Oom => "OOM",
        }
    }

    /// 该结果是否产出了可用报告
    pub fn is_usable(&self) -> bool {
        matches!(self, AnalyzerOutcome::Ok)
    }
}

impl std::str::FromStr for AnalyzerOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(AnalyzerOutcome::Ok),
            "ERROR" => Ok(AnalyzerOutcome::Error),
            "TIMEOUT" => Ok(AnalyzerOutcome::Timeout),
            "OOM" => Ok(AnalyzerOutcome::Oom),
            other => Err(format!("Unknown analyzer outcome: {}", other)),
        }
    }
}
