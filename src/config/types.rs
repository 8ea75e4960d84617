//! 配置数据结构定义
//!
//! 定义字段 schema、类型化配置值以及 schema 构建器

use crate::error::SchemaError;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// 字段默认分组
pub const DEFAULT_GROUP: &str = "General";

/// 字段声明类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Enum,
    Url,
    Email,
    Port,
    Json,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Enum => "enum",
            FieldType::Url => "url",
            FieldType::Email => "email",
            FieldType::Port => "port",
            FieldType::Json => "json",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 类型化后的配置值
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// string / enum / email
    String(String),
    /// number
    Number(f64),
    /// boolean
    Boolean(bool),
    /// port
    Port(u16),
    /// url
    Url(Url),
    /// json
    Json(serde_json::Value),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            ConfigValue::Url(u) => Some(u.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(n) => Some(*n),
            ConfigValue::Port(p) => Some(f64::from(*p)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<u16> {
        match self {
            ConfigValue::Port(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            ConfigValue::Url(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ConfigValue::Json(v) => Some(v),
            _ => None,
        }
    }

    /// 写入配置文件时使用的字符串形式
    pub fn to_persisted_string(&self) -> String {
        match self {
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Number(n) => format_number(*n),
            ConfigValue::Boolean(b) => b.to_string(),
            ConfigValue::Port(p) => p.to_string(),
            ConfigValue::Url(u) => u.to_string(),
            ConfigValue::Json(v) => v.to_string(),
        }
    }

    /// 转换为 JSON 值，便于序列化整个配置
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConfigValue::String(s) => serde_json::Value::String(s.clone()),
            ConfigValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ConfigValue::Boolean(b) => serde_json::Value::Bool(*b),
            ConfigValue::Port(p) => serde_json::Value::from(*p),
            ConfigValue::Url(u) => serde_json::Value::String(u.to_string()),
            ConfigValue::Json(v) => v.clone(),
        }
    }
}

// 整数值不带小数点输出
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_persisted_string())
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Boolean(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Number(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Number(value as f64)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Number(f64::from(value))
    }
}

impl From<u16> for ConfigValue {
    fn from(value: u16) -> Self {
        ConfigValue::Port(value)
    }
}

impl From<Url> for ConfigValue {
    fn from(value: Url) -> Self {
        ConfigValue::Url(value)
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        ConfigValue::Json(value)
    }
}

/// 自定义校验结果
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    /// 通过
    Pass,
    /// 失败，使用通用错误信息
    Fail,
    /// 失败，附带具体错误信息
    Message(String),
}

impl From<bool> for CheckResult {
    fn from(ok: bool) -> Self {
        if ok {
            CheckResult::Pass
        } else {
            CheckResult::Fail
        }
    }
}

impl From<String> for CheckResult {
    fn from(message: String) -> Self {
        CheckResult::Message(message)
    }
}

impl From<&str> for CheckResult {
    fn from(message: &str) -> Self {
        CheckResult::Message(message.to_string())
    }
}

impl<E: fmt::Display> From<Result<(), E>> for CheckResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => CheckResult::Pass,
            Err(e) => CheckResult::Message(e.to_string()),
        }
    }
}

/// 自定义校验函数
pub type CustomValidator = Arc<dyn Fn(&ConfigValue) -> CheckResult + Send + Sync>;

/// 值转换函数，仅在全部校验通过后执行
pub type Transform = Arc<dyn Fn(ConfigValue) -> Result<ConfigValue, String> + Send + Sync>;

/// 字段废弃标记
#[derive(Debug, Clone, PartialEq)]
pub enum Deprecation {
    /// 已废弃，无迁移提示
    Deprecated,
    /// 已废弃，附带迁移提示
    Hint(String),
}

impl Deprecation {
    pub fn message(&self, field: &str) -> String {
        match self {
            Deprecation::Deprecated => format!("配置字段 {field} 已废弃"),
            Deprecation::Hint(hint) => format!("配置字段 {field} 已废弃: {hint}"),
        }
    }
}

/// 单个字段的 schema
#[derive(Clone)]
pub struct FieldSchema {
    /// 字段名（同时是环境变量名）
    pub name: String,
    /// 声明类型
    pub field_type: FieldType,
    /// 是否必填
    pub required: bool,
    /// 默认值
    pub default: Option<ConfigValue>,
    /// 下界：string 为长度，number/port 为数值
    pub min: Option<f64>,
    /// 上界：string 为长度，number/port 为数值
    pub max: Option<f64>,
    /// 正则约束
    pub pattern: Option<Regex>,
    /// enum 可选值（有序）
    pub enum_values: Vec<String>,
    /// 值转换
    pub transform: Option<Transform>,
    /// 自定义校验
    pub custom_validate: Option<CustomValidator>,
    /// 是否敏感（加密存储、文档中隐藏）
    pub sensitive: bool,
    /// 废弃标记
    pub deprecated: Option<Deprecation>,
    /// 展示分组
    pub group: String,
    /// 字段说明
    pub description: Option<String>,
    pattern_source: Option<String>,
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("pattern", &self.pattern_source)
            .field("enum_values", &self.enum_values)
            .field("sensitive", &self.sensitive)
            .field("deprecated", &self.deprecated)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl FieldSchema {
    /// 创建指定类型的字段
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default: None,
            min: None,
            max: None,
            pattern: None,
            enum_values: Vec::new(),
            transform: None,
            custom_validate: None,
            sensitive: false,
            deprecated: None,
            group: DEFAULT_GROUP.to_string(),
            description: None,
            pattern_source: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn url(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Url)
    }

    pub fn email(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Email)
    }

    pub fn port(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Port)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    /// enum 字段，`values` 为有序可选值
    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut field = Self::new(name, FieldType::Enum);
        field.enum_values = values.into_iter().map(Into::into).collect();
        field
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<ConfigValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// 正则约束；表达式在 [`SchemaBuilder::build`] 时编译
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern_source = Some(pattern.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = Some(Deprecation::Deprecated);
        self
    }

    pub fn deprecated_with(mut self, hint: impl Into<String>) -> Self {
        self.deprecated = Some(Deprecation::Hint(hint.into()));
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate<F, R>(mut self, check: F) -> Self
    where
        F: Fn(&ConfigValue) -> R + Send + Sync + 'static,
        R: Into<CheckResult>,
    {
        self.custom_validate = Some(Arc::new(move |value| check(value).into()));
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(ConfigValue) -> Result<ConfigValue, String> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// 正则源码
    pub fn pattern_source(&self) -> Option<&str> {
        self.pattern_source.as_deref()
    }

    /// 必填且没有默认值
    pub fn requires_value(&self) -> bool {
        self.required && self.default.is_none()
    }

    fn finalize(mut self) -> Result<Self, SchemaError> {
        let valid_name = !self.name.is_empty()
            && !self.name.contains('=')
            && !self.name.chars().any(char::is_whitespace);
        if !valid_name {
            return Err(SchemaError::InvalidName(self.name));
        }

        if self.field_type == FieldType::Enum && self.enum_values.is_empty() {
            return Err(SchemaError::MissingEnumValues(self.name));
        }

        if let Some(source) = &self.pattern_source {
            let regex = Regex::new(source).map_err(|e| SchemaError::InvalidPattern {
                field: self.name.clone(),
                message: e.to_string(),
            })?;
            self.pattern = Some(regex);
        }

        Ok(self)
    }
}

/// 不可变的字段 schema 集合，保持声明顺序
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldSchema>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 按声明顺序遍历字段
    pub fn fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 按分组聚合字段，分组顺序为首次出现顺序
    pub fn groups(&self) -> Vec<(&str, Vec<&FieldSchema>)> {
        let mut groups: Vec<(&str, Vec<&FieldSchema>)> = Vec::new();
        for field in &self.fields {
            match groups.iter_mut().find(|(name, _)| *name == field.group) {
                Some((_, members)) => members.push(field),
                None => groups.push((field.group.as_str(), vec![field])),
            }
        }
        groups
    }
}

/// schema 构建器
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldSchema>,
}

impl SchemaBuilder {
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields<I: IntoIterator<Item = FieldSchema>>(mut self, fields: I) -> Self {
        self.fields.extend(fields);
        self
    }

    /// 校验字段名唯一性、enum 可选值和正则后生成 schema
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut schema = Schema::default();
        for field in self.fields {
            let field = field.finalize()?;
            if schema.index.contains_key(&field.name) {
                return Err(SchemaError::DuplicateField(field.name));
            }
            schema.index.insert(field.name.clone(), schema.fields.len());
            schema.fields.push(field);
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_preserves_insertion_order() {
        let schema = Schema::builder()
            .field(FieldSchema::port("PORT"))
            .field(FieldSchema::string("APP_NAME"))
            .field(FieldSchema::boolean("DEBUG"))
            .build()
            .unwrap();

        let names: Vec<&str> = schema.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["PORT", "APP_NAME", "DEBUG"]);
        assert!(schema.contains("DEBUG"));
        assert_eq!(schema.get("PORT").unwrap().field_type, FieldType::Port);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = Schema::builder()
            .field(FieldSchema::port("PORT"))
            .field(FieldSchema::number("PORT"))
            .build();

        assert_eq!(
            result.unwrap_err(),
            SchemaError::DuplicateField("PORT".to_string())
        );
    }

    #[test]
    fn test_enum_requires_values() {
        let result = Schema::builder()
            .field(FieldSchema::enumeration("MODE", Vec::<String>::new()))
            .build();
        assert!(matches!(result, Err(SchemaError::MissingEnumValues(_))));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = Schema::builder()
            .field(FieldSchema::string("NAME").pattern("(unclosed"))
            .build();
        assert!(matches!(result, Err(SchemaError::InvalidPattern { .. })));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let result = Schema::builder()
            .field(FieldSchema::string("BAD NAME"))
            .build();
        assert!(matches!(result, Err(SchemaError::InvalidName(_))));
    }

    #[test]
    fn test_groups_follow_first_appearance() {
        let schema = Schema::builder()
            .field(FieldSchema::port("PORT").group("Server"))
            .field(FieldSchema::url("DATABASE_URL").group("Database"))
            .field(FieldSchema::string("HOST").group("Server"))
            .field(FieldSchema::boolean("DEBUG"))
            .build()
            .unwrap();

        let groups = schema.groups();
        let names: Vec<&str> = groups.iter().map(|(g, _)| *g).collect();
        assert_eq!(names, vec!["Server", "Database", DEFAULT_GROUP]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn test_persisted_string_forms() {
        assert_eq!(ConfigValue::Number(8080.0).to_persisted_string(), "8080");
        assert_eq!(ConfigValue::Number(1.5).to_persisted_string(), "1.5");
        assert_eq!(ConfigValue::Boolean(true).to_persisted_string(), "true");
        assert_eq!(ConfigValue::Port(443).to_persisted_string(), "443");
        assert_eq!(
            ConfigValue::Json(serde_json::json!({"a": 1})).to_persisted_string(),
            r#"{"a":1}"#
        );
        // JSON 字符串保留引号，读回时仍是合法 JSON
        assert_eq!(
            ConfigValue::Json(serde_json::json!("fast")).to_persisted_string(),
            r#""fast""#
        );
    }

    #[test]
    fn test_check_result_conversions() {
        assert_eq!(CheckResult::from(true), CheckResult::Pass);
        assert_eq!(CheckResult::from(false), CheckResult::Fail);
        assert_eq!(
            CheckResult::from("too short"),
            CheckResult::Message("too short".to_string())
        );
    }
}
