//! 分析产物行类型
//! 调用记录、问题、覆盖率与重复块的数据库表示

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::duplication::{BlockSide, DuplicationBlock};

/// 分析器调用记录行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvocationRow {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub analyzer_key: String,
    pub attempt: i32,
    /// OK / ERROR / TIMEOUT / OOM
    pub outcome: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
    pub oom_killed: bool,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub created_at: DateTime<Utc>,
}

/// 问题行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IssueRow {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub analyzer_key: String,
    pub rule_key: String,
    /// INFO / MINOR / MAJOR / CRITICAL / BLOCKER
    pub severity: String,
    /// BUG / CODE_SMELL / VULNERABILITY
    pub kind: String,
    pub file_path: String,
    pub line: Option<i32>,
    pub message: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// 覆盖率文件行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CoverageFileRow {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub format: String,
    pub file_path: String,
    pub lines_found: i64,
    pub lines_hit: i64,
    pub branches_found: i64,
    pub branches_hit: i64,
}

/// 重复块行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DuplicationBlockRow {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub first_file: String,
    pub first_start_line: i32,
    pub first_end_line: i32,
    pub second_file: String,
    pub second_start_line: i32,
    pub second_end_line: i32,
    pub lines: i32,
    pub tokens: i32,
    pub excerpt: String,
}

impl DuplicationBlockRow {
    /// 还原为协议结构
    pub fn to_block(&self) -> DuplicationBlock {
        DuplicationBlock {
            first: BlockSide {
                file_path: self.first_file.clone(),
                start_line: self.first_start_line as u32,
                end_line: self.first_end_line as u32,
            },
            second: BlockSide {
                file_path: self.second_file.clone(),
                start_line: self.second_start_line as u32,
                end_line: self.second_end_line as u32,
            },
            lines: self.lines as u32,
            tokens: self.tokens as u32,
            excerpt: self.excerpt.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplication_row_to_block() {
        let row = DuplicationBlockRow {
            id: Uuid::new_v4(),
            analysis_id: Uuid::new_v4(),
            first_file: "src/a.rs".to_string(),
            first_start_line: 1,
            first_end_line: 20,
            second_file: "src/b.rs".to_string(),
            second_start_line: 30,
            second_end_line: 49,
            lines: 20,
            tokens: 150,
            excerpt: "fn shared() {".to_string(),
        };

        let block = row.to_block();
        assert_eq!(block.first.file_path, "src/a.rs");
        assert_eq!(block.second.start_line, 30);
        assert_eq!(block.lines, 20);
        assert_eq!(block.tokens, 150);
    }
}
