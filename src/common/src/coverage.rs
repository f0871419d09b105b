//! 覆盖率归一化
//! 将多种覆盖率报告格式解析为统一的逐文件命中结构
//!
//! 支持三种格式：LCOV 文本、JSON 汇总、Go cover profile。
//! 所有解析函数均为纯函数，不做任何 I/O。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 覆盖率报告格式（封闭集合，解析器按此分派）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// LCOV 文本格式（SF:/DA:/BRDA: 行语法）
    Lcov,
    /// JSON 汇总格式（路径 -> lines/branches 对象）
    CoverageJson,
    /// Go cover profile（mode: 头 + 语句块行）
    GoCover,
}

impl Format {
    /// 返回协议中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Lcov => "lcov",
            Format::CoverageJson => "coverage_json",
            Format::GoCover => "go_cover",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lcov" => Ok(Format::Lcov),
            "coverage_json" | "json" => Ok(Format::CoverageJson),
            "go_cover" | "gocover" => Ok(Format::GoCover),
            other => Err(ParseError::UnknownFormat(other.to_string())),
        }
    }
}

/// 覆盖率解析错误
///
/// 解析失败只导致该报告的贡献被丢弃，不会使所属作业失败。
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Unknown coverage format: {0}")]
    UnknownFormat(String),

    #[error("Malformed coverage input: {0}")]
    Malformed(String),
}

/// 单个文件的覆盖率数据
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCoverage {
    pub lines_found: u64,
    pub lines_hit: u64,
    pub branches_found: u64,
    pub branches_hit: u64,
}

/// 规范化覆盖率：文件路径 -> 命中数据
///
/// 聚合百分比总是由逐文件数据推导，从不冗余存储。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalCoverage {
    pub files: BTreeMap<String, FileCoverage>,
}

impl CanonicalCoverage {
    /// 所有文件的（行数、命中数）总和
    pub fn totals(&self) -> (u64, u64) {
        let found = self.files.values().map(|f| f.lines_found).sum();
        let hit = self.files.values().map(|f| f.lines_hit).sum();
        (found, hit)
    }

    /// 聚合覆盖率百分比
    ///
    /// `total_found == 0` 时定义为 `0.0`，永远不产生 NaN。
    pub fn aggregate_percentage(&self) -> f64 {
        let (found, hit) = self.totals();
        if found == 0 {
            0.0
        } else {
            100.0 * hit as f64 / found as f64
        }
    }

    /// 合并另一份覆盖率（同一文件按字段相加）
    pub fn merge(&mut self, other: CanonicalCoverage) {
        for (path, cov) in other.files {
            let entry = self.files.entry(path).or_default();
            entry.lines_found += cov.lines_found;
            entry.lines_hit += cov.lines_hit;
            entry.branches_found += cov.branches_found;
            entry.branches_hit += cov.branches_hit;
        }
    }
}

/// 根据内容探测覆盖率格式
pub fn detect_format(raw: &str) -> Result<Format, ParseError> {
    let trimmed = raw.trim_start();

    if trimmed.starts_with("mode:") {
        return Ok(Format::GoCover);
    }
    if trimmed.starts_with('{') {
        return Ok(Format::CoverageJson);
    }
    if trimmed
        .lines()
        .take(10)
        .any(|l| l.starts_with("TN:") || l.starts_with("SF:"))
    {
        return Ok(Format::Lcov);
    }

    Err(ParseError::UnknownFormat("unrecognized content".to_string()))
}

/// 按指定格式解析覆盖率报告
pub fn parse(raw: &str, format: Format) -> Result<CanonicalCoverage, ParseError> {
    match format {
        Format::Lcov => parse_lcov(raw),
        Format::CoverageJson => parse_coverage_json(raw),
        Format::GoCover => parse_go_cover(raw),
    }
}

/// 探测格式并解析
pub fn detect_and_parse(raw: &str) -> Result<CanonicalCoverage, ParseError> {
    let format = detect_format(raw)?;
    parse(raw, format)
}

// ---------------------------------------------------------------------------
// LCOV
// ---------------------------------------------------------------------------

/// LCOV 单文件记录的解析累积状态
#[derive(Default)]
struct LcovRecord {
    da_found: u64,
    da_hit: u64,
    brda_found: u64,
    brda_hit: u64,
    lf: Option<u64>,
    lh: Option<u64>,
    brf: Option<u64>,
    brh: Option<u64>,
}

impl LcovRecord {
    /// 汇总记录：优先使用 LF/LH/BRF/BRH 汇总行，缺失时回退到逐行计数
    fn finish(self) -> FileCoverage {
        FileCoverage {
            lines_found: self.lf.unwrap_or(self.da_found),
            lines_hit: self.lh.unwrap_or(self.da_hit),
            branches_found: self.brf.unwrap_or(self.brda_found),
            branches_hit: self.brh.unwrap_or(self.brda_hit),
        }
    }
}

fn parse_lcov(raw: &str) -> Result<CanonicalCoverage, ParseError> {
    let mut coverage = CanonicalCoverage::default();
    let mut current_file: Option<String> = None;
    let mut record = LcovRecord::default();
    let mut saw_any_section = false;

    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("TN:") {
            continue;
        }

        if let Some(path) = line.strip_prefix("SF:") {
            if path.is_empty() {
                return Err(ParseError::Malformed(format!("empty SF: path at line {}", idx + 1)));
            }
            current_file = Some(path.to_string());
            record = LcovRecord::default();
            saw_any_section = true;
            continue;
        }

        if line == "end_of_record" {
            let path = current_file.take().ok_or_else(|| {
                ParseError::Malformed(format!("end_of_record without SF: at line {}", idx + 1))
            })?;
            coverage.files.insert(path, std::mem::take(&mut record).finish());
            continue;
        }

        // SF: 之外的数据行只在记录内有意义
        if current_file.is_none() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("DA:") {
            let mut parts = rest.splitn(3, ',');
            let _line_no = parts.next();
            let count: u64 = parts
                .next()
                .and_then(|c| c.trim().parse().ok())
                .ok_or_else(|| ParseError::Malformed(format!("bad DA: at line {}", idx + 1)))?;
            record.da_found += 1;
            if count > 0 {
                record.da_hit += 1;
            }
        } else if let Some(rest) = line.strip_prefix("BRDA:") {
            // BRDA:<line>,<block>,<branch>,<taken>；taken 为 "-" 表示未执行
            let taken = rest.rsplit(',').next().unwrap_or("-").trim();
            record.brda_found += 1;
            if taken != "-" && taken.parse::<u64>().map(|t| t > 0).unwrap_or(false) {
                record.brda_hit += 1;
            }
        } else if let Some(v) = line.strip_prefix("LF:") {
            record.lf = Some(parse_lcov_count(v, "LF", idx)?);
        } else if let Some(v) = line.strip_prefix("LH:") {
            record.lh = Some(parse_lcov_count(v, "LH", idx)?);
        } else if let Some(v) = line.strip_prefix("BRF:") {
            record.brf = Some(parse_lcov_count(v, "BRF", idx)?);
        } else if let Some(v) = line.strip_prefix("BRH:") {
            record.brh = Some(parse_lcov_count(v, "BRH", idx)?);
        }
        // 其它指令（FN:/FNDA:/...）与行覆盖无关，跳过
    }

    if !saw_any_section {
        return Err(ParseError::Malformed("no SF: section found".to_string()));
    }

    // 未以 end_of_record 结束的尾部记录仍然计入
    if let Some(path) = current_file {
        coverage.files.insert(path, record.finish());
    }

    Ok(coverage)
}

fn parse_lcov_count(value: &str, directive: &str, idx: usize) -> Result<u64, ParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::Malformed(format!("bad {}: at line {}", directive, idx + 1)))
}

// ---------------------------------------------------------------------------
// JSON 汇总
// ---------------------------------------------------------------------------

/// JSON 汇总中单文件条目的计数对象
#[derive(Deserialize)]
struct JsonCounter {
    total: u64,
    covered: u64,
}

/// JSON 汇总中单文件条目
#[derive(Deserialize)]
struct JsonFileEntry {
    lines: JsonCounter,
    #[serde(default)]
    branches: Option<JsonCounter>,
}

fn parse_coverage_json(raw: &str) -> Result<CanonicalCoverage, ParseError> {
    let entries: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let mut coverage = CanonicalCoverage::default();

    for (path, value) in entries {
        // 汇总条目 "total" 不是文件，跳过
        if path == "total" {
            continue;
        }

        let entry: JsonFileEntry = serde_json::from_value(value)
            .map_err(|e| ParseError::Malformed(format!("entry {}: {}", path, e)))?;

        let (branches_found, branches_hit) = entry
            .branches
            .map(|b| (b.total, b.covered))
            .unwrap_or((0, 0));

        coverage.files.insert(
            path,
            FileCoverage {
                lines_found: entry.lines.total,
                lines_hit: entry.lines.covered,
                branches_found,
                branches_hit,
            },
        );
    }

    Ok(coverage)
}

// ---------------------------------------------------------------------------
// Go cover profile
// ---------------------------------------------------------------------------

fn parse_go_cover(raw: &str) -> Result<CanonicalCoverage, ParseError> {
    let mut lines = raw.lines();

    let header = lines.next().unwrap_or("").trim();
    if !header.starts_with("mode:") {
        return Err(ParseError::Malformed("missing mode: header".to_string()));
    }

    let mut coverage = CanonicalCoverage::default();

    for (idx, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // <file>:<start>.<col>,<end>.<col> <statements> <count>
        let (location, rest) = line
            .rsplit_once(' ')
            .and_then(|(left, count)| left.rsplit_once(' ').map(|(loc, stmts)| (loc, (stmts, count))))
            .ok_or_else(|| ParseError::Malformed(format!("bad block at line {}", idx + 2)))?;

        let (stmts_str, count_str) = rest;
        let statements: u64 = stmts_str
            .parse()
            .map_err(|_| ParseError::Malformed(format!("bad statement count at line {}", idx + 2)))?;
        let count: u64 = count_str
            .parse()
            .map_err(|_| ParseError::Malformed(format!("bad hit count at line {}", idx + 2)))?;

        let path = location
            .rsplit_once(':')
            .map(|(file, _span)| file)
            .ok_or_else(|| ParseError::Malformed(format!("bad location at line {}", idx + 2)))?;

        let entry = coverage.files.entry(path.to_string()).or_default();
        entry.lines_found += statements;
        if count > 0 {
            entry.lines_hit += statements;
        }
    }

    Ok(coverage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const LCOV_SAMPLE: &str = "\
TN:
SF:src/main.rs
DA:1,1
DA:2,0
DA:3,5
BRDA:2,0,0,1
BRDA:2,0,1,-
LF:3
LH:2
BRF:2
BRH:1
end_of_record
SF:src/lib.rs
DA:1,1
end_of_record
";

    const JSON_SAMPLE: &str = r#"{
        "total": { "lines": { "total": 13, "covered": 9 } },
        "src/app.js": { "lines": { "total": 10, "covered": 7 }, "branches": { "total": 4, "covered": 2 } },
        "src/util.js": { "lines": { "total": 3, "covered": 2 } }
    }"#;

    const GO_SAMPLE: &str = "\
mode: set
example.com/pkg/a.go:10.2,12.3 2 1
example.com/pkg/a.go:14.2,16.3 3 0
example.com/pkg/b.go:5.1,9.2 4 7
";

    // -- detect_format --------------------------------------------------------

    #[test]
    fn test_detect_lcov() {
        assert_eq!(detect_format(LCOV_SAMPLE).unwrap(), Format::Lcov);
    }

    #[test]
    fn test_detect_json() {
        assert_eq!(detect_format(JSON_SAMPLE).unwrap(), Format::CoverageJson);
    }

    #[test]
    fn test_detect_go_cover() {
        assert_eq!(detect_format(GO_SAMPLE).unwrap(), Format::GoCover);
    }

    #[test]
    fn test_detect_unknown() {
        assert!(detect_format("hello world").is_err());
        assert!(detect_format("").is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(Format::from_str("lcov").unwrap(), Format::Lcov);
        assert_eq!(Format::from_str("json").unwrap(), Format::CoverageJson);
        assert_eq!(Format::from_str("coverage_json").unwrap(), Format::CoverageJson);
        assert_eq!(Format::from_str("go_cover").unwrap(), Format::GoCover);
        assert!(Format::from_str("cobertura").is_err());
    }

    // -- LCOV -----------------------------------------------------------------

    #[test]
    fn test_parse_lcov() {
        let cov = parse(LCOV_SAMPLE, Format::Lcov).unwrap();
        assert_eq!(cov.files.len(), 2);

        let main = &cov.files["src/main.rs"];
        assert_eq!(main.lines_found, 3);
        assert_eq!(main.lines_hit, 2);
        assert_eq!(main.branches_found, 2);
        assert_eq!(main.branches_hit, 1);

        let lib = &cov.files["src/lib.rs"];
        assert_eq!(lib.lines_found, 1);
        assert_eq!(lib.lines_hit, 1);
        assert_eq!(lib.branches_found, 0);
    }

    #[test]
    fn test_parse_lcov_without_summary_lines() {
        // 无 LF/LH 时回退到 DA 计数
        let input = "SF:a.rs\nDA:1,1\nDA:2,0\nend_of_record\n";
        let cov = parse(input, Format::Lcov).unwrap();
        let f = &cov.files["a.rs"];
        assert_eq!(f.lines_found, 2);
        assert_eq!(f.lines_hit, 1);
    }

    #[test]
    fn test_parse_lcov_trailing_record_without_end() {
        let input = "SF:a.rs\nDA:1,1\n";
        let cov = parse(input, Format::Lcov).unwrap();
        assert_eq!(cov.files["a.rs"].lines_hit, 1);
    }

    #[test]
    fn test_parse_lcov_malformed() {
        assert!(parse("not lcov at all", Format::Lcov).is_err());
        assert!(parse("SF:a.rs\nDA:broken\n", Format::Lcov).is_err());
        assert!(parse("end_of_record\n", Format::Lcov).is_err());
    }

    // -- JSON -----------------------------------------------------------------

    #[test]
    fn test_parse_json() {
        let cov = parse(JSON_SAMPLE, Format::CoverageJson).unwrap();
        assert_eq!(cov.files.len(), 2);
        assert!(!cov.files.contains_key("total"));

        let app = &cov.files["src/app.js"];
        assert_eq!(app.lines_found, 10);
        assert_eq!(app.lines_hit, 7);
        assert_eq!(app.branches_found, 4);
        assert_eq!(app.branches_hit, 2);

        let util = &cov.files["src/util.js"];
        assert_eq!(util.branches_found, 0);
    }

    #[test]
    fn test_parse_json_malformed() {
        assert!(parse("{ broken", Format::CoverageJson).is_err());
        assert!(parse(r#"{"a.js": {"lines": "nope"}}"#, Format::CoverageJson).is_err());
    }

    // -- Go cover -------------------------------------------------------------

    #[test]
    fn test_parse_go_cover() {
        let cov = parse(GO_SAMPLE, Format::GoCover).unwrap();
        assert_eq!(cov.files.len(), 2);

        let a = &cov.files["example.com/pkg/a.go"];
        assert_eq!(a.lines_found, 5);
        assert_eq!(a.lines_hit, 2);

        let b = &cov.files["example.com/pkg/b.go"];
        assert_eq!(b.lines_found, 4);
        assert_eq!(b.lines_hit, 4);
    }

    #[test]
    fn test_parse_go_cover_missing_header() {
        assert!(parse("a.go:1.1,2.2 1 1\n", Format::GoCover).is_err());
    }

    #[test]
    fn test_parse_go_cover_bad_block() {
        assert!(parse("mode: set\ngarbage\n", Format::GoCover).is_err());
    }

    // -- 聚合 ------------------------------------------------------------------

    #[test]
    fn test_aggregate_percentage_bounds() {
        let cov = parse(LCOV_SAMPLE, Format::Lcov).unwrap();
        let pct = cov.aggregate_percentage();
        assert!((0.0..=100.0).contains(&pct));
        // (2 + 1) / (3 + 1) = 75%
        assert!((pct - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_percentage_zero_found() {
        let cov = CanonicalCoverage::default();
        assert_eq!(cov.aggregate_percentage(), 0.0);
        assert!(!cov.aggregate_percentage().is_nan());

        let mut cov = CanonicalCoverage::default();
        cov.files.insert("a.rs".to_string(), FileCoverage::default());
        assert_eq!(cov.aggregate_percentage(), 0.0);
    }

    #[test]
    fn test_aggregate_percentage_full() {
        let mut cov = CanonicalCoverage::default();
        cov.files.insert(
            "a.rs".to_string(),
            FileCoverage { lines_found: 10, lines_hit: 10, branches_found: 0, branches_hit: 0 },
        );
        assert_eq!(cov.aggregate_percentage(), 100.0);
    }

    #[test]
    fn test_merge() {
        let mut first = parse(GO_SAMPLE, Format::GoCover).unwrap();
        let second = parse(LCOV_SAMPLE, Format::Lcov).unwrap();
        first.merge(second);

        assert_eq!(first.files.len(), 4);
        assert_eq!(first.files["src/main.rs"].lines_found, 3);
    }

    #[test]
    fn test_merge_same_file_adds() {
        let mut a = CanonicalCoverage::default();
        a.files.insert(
            "x.rs".to_string(),
            FileCoverage { lines_found: 5, lines_hit: 3, branches_found: 2, branches_hit: 1 },
        );
        let mut b = CanonicalCoverage::default();
        b.files.insert(
            "x.rs".to_string(),
            FileCoverage { lines_found: 5, lines_hit: 4, branches_found: 0, branches_hit: 0 },
        );

        a.merge(b);
        let x = &a.files["x.rs"];
        assert_eq!(x.lines_found, 10);
        assert_eq!(x.lines_hit, 7);
        assert_eq!(x.branches_found, 2);
    }

    #[test]
    fn test_detect_and_parse_dispatch() {
        assert!(detect_and_parse(LCOV_SAMPLE).is_ok());
        assert!(detect_and_parse(JSON_SAMPLE).is_ok());
        assert!(detect_and_parse(GO_SAMPLE).is_ok());
        assert!(detect_and_parse("???").is_err());
    }

    #[test]
    fn test_format_serialization() {
        assert_eq!(serde_json::to_string(&Format::Lcov).unwrap(), "\"lcov\"");
        assert_eq!(serde_json::to_string(&Format::CoverageJson).unwrap(), "\"coverage_json\"");
        assert_eq!(serde_json::to_string(&Format::GoCover).unwrap(), "\"go_cover\"");
    }
}
