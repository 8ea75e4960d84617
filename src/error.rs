//! 错误处理模块
//!
//! 定义配置存储的统一错误类型和字段级校验错误批次

use crate::config::encryption::EncryptionError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// EnvKeeper 的主要错误类型
#[derive(Error, Debug)]
pub enum EnvStoreError {
    /// 字段校验失败（批量）
    #[error("配置校验失败: {0}")]
    Validation(ValidationErrors),

    /// 字段未在 schema 中声明
    #[error("未知配置字段: {key}")]
    UnknownField { key: String },

    /// schema 定义错误
    #[error("schema 定义错误: {0}")]
    Schema(#[from] SchemaError),

    /// 加解密错误
    #[error("加密错误: {0}")]
    Encryption(#[from] EncryptionError),

    /// 文件读写错误
    #[error("文件读写失败 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 文件监控错误
    #[error("文件监控错误: {0}")]
    Watch(#[from] notify::Error),

    /// 构造参数错误
    #[error("配置选项错误: {0}")]
    Options(String),
}

impl EnvStoreError {
    /// 构造 IO 错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 若为校验错误，返回错误批次
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// schema 构建错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// 字段名重复
    #[error("字段重复定义: {0}")]
    DuplicateField(String),

    /// 字段名为空或包含非法字符
    #[error("非法字段名: {0:?}")]
    InvalidName(String),

    /// enum 类型缺少可选值
    #[error("enum 字段 {0} 未声明可选值")]
    MissingEnumValues(String),

    /// 正则表达式无法编译
    #[error("字段 {field} 的正则表达式无效: {message}")]
    InvalidPattern { field: String, message: String },
}

/// 字段级错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 必填字段缺失
    Missing,
    /// 约束、正则、枚举、自定义校验或严格模式未知字段
    Invalid,
    /// 原始值无法解析为声明的类型
    TypeError,
    /// 认证标签不匹配或密文格式错误
    DecryptionFailure,
    /// 配置文件不可读写
    IoFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Missing => "missing",
            ErrorKind::Invalid => "invalid",
            ErrorKind::TypeError => "type_error",
            ErrorKind::DecryptionFailure => "decryption_failure",
            ErrorKind::IoFailure => "io_failure",
        };
        f.write_str(name)
    }
}

/// 单个字段的校验错误
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    /// 字段名（文件级错误时为文件路径）
    pub field: String,
    /// 错误描述
    pub message: String,
    /// 错误类别
    pub kind: ErrorKind,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind,
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, ErrorKind::Missing, "必填字段缺失")
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ErrorKind::Invalid, message)
    }

    pub fn type_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ErrorKind::TypeError, message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.field, self.message)
    }
}

/// 一次解析过程中收集到的全部字段错误
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ValidationError] {
        &self.0
    }

    /// 指定字段的错误
    pub fn for_field(&self, field: &str) -> Vec<&ValidationError> {
        self.0.iter().filter(|e| e.field == field).collect()
    }

    /// 仅保留指定字段的错误
    pub fn only_field(&self, field: &str) -> Self {
        Self(self.0.iter().filter(|e| e.field == field).cloned().collect())
    }
}

impl From<Vec<ValidationError>> for ValidationErrors {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self(errors)
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} 个字段错误", self.0.len())?;
        for error in &self.0 {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, EnvStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_display_lists_every_field() {
        let errors = ValidationErrors::from(vec![
            ValidationError::missing("DATABASE_URL"),
            ValidationError::type_error("PORT", "不是数字"),
        ]);

        let text = errors.to_string();
        assert!(text.contains("DATABASE_URL"));
        assert!(text.contains("PORT"));
        assert!(text.contains("type_error"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let error = ValidationError::type_error("PORT", "bad");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "type_error");
    }

    #[test]
    fn test_only_field_filters_batch() {
        let errors = ValidationErrors::from(vec![
            ValidationError::missing("A"),
            ValidationError::invalid("B", "x"),
            ValidationError::invalid("A", "y"),
        ]);
        let only = errors.only_field("A");
        assert_eq!(only.len(), 2);
        assert!(only.iter().all(|e| e.field == "A"));
    }
}
