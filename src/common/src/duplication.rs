//! 重复代码模型
//! 重复块记录与聚合指标的推导

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 重复块的一侧：文件 + 行区间
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockSide {
    /// 文件路径（相对工作区根目录）
    pub file_path: String,

    /// 起始行（含）
    pub start_line: u32,

    /// 结束行（含）
    pub end_line: u32,
}

/// 一条重复块记录：两处位置 + 规模信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicationBlock {
    /// 第一处位置
    pub first: BlockSide,

    /// 第二处位置
    pub second: BlockSide,

    /// 重复的行数
    pub lines: u32,

    /// 重复的 token 数
    pub tokens: u32,

    /// 代码摘录
    pub excerpt: String,
}

/// 由重复块集合推导的聚合指标
///
/// 总是按需计算，从不独立于块数据存储。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicationSummary {
    /// 重复行总数 = sum(block.lines)
    pub duplicated_lines: u64,

    /// 克隆数 = count(blocks)
    pub total_clones: u64,

    /// 涉及的不同源文件数（两侧合并去重）
    pub total_sources: u64,
}

/// 汇总一组重复块
pub fn summarize(blocks: &[DuplicationBlock]) -> DuplicationSummary {
    let duplicated_lines = blocks.iter().map(|b| b.lines as u64).sum();
    let total_clones = blocks.len() as u64;

    let mut sources: BTreeSet<&str> = BTreeSet::new();
    for block in blocks {
        sources.insert(block.first.file_path.as_str());
        sources.insert(block.second.file_path.as_str());
    }

    DuplicationSummary {
        duplicated_lines,
        total_clones,
        total_sources: sources.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(first: &str, second: &str, lines: u32) -> DuplicationBlock {
        DuplicationBlock {
            first: BlockSide {
                file_path: first.to_string(),
                start_line: 1,
                end_line: lines,
            },
            second: BlockSide {
                file_path: second.to_string(),
                start_line: 100,
                end_line: 100 + lines - 1,
            },
            lines,
            tokens: lines * 10,
            excerpt: "let x = compute();".to_string(),
        }
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary, DuplicationSummary::default());
    }

    #[test]
    fn test_summarize_lines_and_clones() {
        let blocks = vec![block("a.rs", "b.rs", 10), block("a.rs", "c.rs", 5)];
        let summary = summarize(&blocks);

        assert_eq!(summary.duplicated_lines, 15);
        assert_eq!(summary.total_clones, 2);
    }

    #[test]
    fn test_summarize_unique_sources() {
        // a.rs 出现在两个块中，只计一次
        let blocks = vec![block("a.rs", "b.rs", 10), block("a.rs", "c.rs", 5)];
        assert_eq!(summarize(&blocks).total_sources, 3);
    }

    #[test]
    fn test_summarize_self_duplication() {
        // 同一文件内的重复：两侧是同一路径，计一个源
        let blocks = vec![block("a.rs", "a.rs", 8)];
        let summary = summarize(&blocks);

        assert_eq!(summary.duplicated_lines, 8);
        assert_eq!(summary.total_clones, 1);
        assert_eq!(summary.total_sources, 1);
    }

    #[test]
    fn test_block_serialization_roundtrip() {
        let b = block("src/a.rs", "src/b.rs", 12);
        let json = serde_json::to_string(&b).unwrap();

        assert!(json.contains("\"lines\":12"));
        assert!(json.contains("\"tokens\":120"));

        let deserialized: DuplicationBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, b);
    }

    #[test]
    fn test_summary_matches_identities() {
        // duplicated_lines == sum(lines)，total_clones == count(blocks)
        let blocks: Vec<_> = (1..=7u32).map(|i| block(&format!("f{}.rs", i), "g.rs", i)).collect();
        let summary = summarize(&blocks);

        assert_eq!(summary.duplicated_lines, (1..=7u64).sum::<u64>());
        assert_eq!(summary.total_clones, 7);
        assert_eq!(summary.total_sources, 8);
    }
}
