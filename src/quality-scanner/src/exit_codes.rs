//! quality-scanner CLI 退出码
//!
//! 为 CI/脚本自动化提供标准化退出码。
//!
//! | 退出码 | 含义                                 |
//! |--------|--------------------------------------|
//! | 0      | 成功 / 质量门通过                    |
//! | 1      | 失败、质量门结果未知或轮询超时       |
//! | 2      | 质量门未通过                         |

/// 操作成功 / 质量门通过
pub const SUCCESS: i32 = 0;

/// 一般失败：分析失败、质量门结果未知、超时、协议错误
pub const FAILURE: i32 = 1;

/// 质量门评估为 FAIL
pub const GATE_FAILED: i32 = 2;

/// 获取退出码的可读描述
pub fn describe(code: i32) -> &'static str {
    match code {
        SUCCESS => "Success",
        FAILURE => "Failure, unknown gate result, or timeout",
        GATE_FAILED => "Quality gate failed",
        _ => "Unknown exit code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_values() {
        assert_eq!(SUCCESS, 0);
        assert_eq!(FAILURE, 1);
        assert_eq!(GATE_FAILED, 2);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(SUCCESS), "Success");
        assert_eq!(describe(GATE_FAILED), "Quality gate failed");
        assert_eq!(describe(99), "Unknown exit code");
    }
}
