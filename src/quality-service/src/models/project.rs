//! 项目模型
//! ensure 端点所需的最小项目持久化

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 项目记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建项目请求
#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 128))]
    pub key: String,

    #[validate(length(min = 1, max = 256))]
    pub name: String,
}

/// 项目 key 合法性校验
///
/// 只允许字母、数字、连字符、下划线、点和冒号。
pub fn validate_project_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("Project key must not be empty".to_string());
    }
    if key.len() > 128 {
        return Err("Project key must not exceed 128 characters".to_string());
    }
    if !key
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(
            "Project key may only contain alphanumeric, hyphen, underscore, dot, or colon".to_string()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_project_keys() {
        assert!(validate_project_key("platform-api").is_ok());
        assert!(validate_project_key("acme:billing_v2.1").is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(validate_project_key("").is_err());
    }

    #[test]
    fn test_key_with_spaces_rejected() {
        assert!(validate_project_key("my project").is_err());
    }

    #[test]
    fn test_key_too_long_rejected() {
        let key = "a".repeat(129);
        assert!(validate_project_key(&key).is_err());
    }

    #[test]
    fn test_create_request_deserialization() {
        let json = r#"{"key": "platform-api", "name": "Platform API"}"#;
        let request: CreateProjectRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.key, "platform-api");
        assert_eq!(request.name, "Platform API");
    }
}
