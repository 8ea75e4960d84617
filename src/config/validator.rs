//! 类型转换与校验
//!
//! 将原始字符串按字段声明类型转换为 [`ConfigValue`]，并依次执行约束检查、
//! 自定义校验和值转换

use crate::config::types::{CheckResult, ConfigValue, FieldSchema, FieldType};
use crate::error::ValidationError;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn email_regex() -> Result<&'static Regex, &'static regex::Error> {
    static EMAIL: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"))
        .as_ref()
}

/// 将原始值转换为字段的类型化值
///
/// 顺序：类型解析 -> 约束 -> 自定义校验 -> transform。
/// 类型无法解析时返回 `type_error`，其余失败返回 `invalid`。
pub fn coerce(field: &FieldSchema, raw: &str) -> Result<ConfigValue, ValidationError> {
    let value = parse_typed(field, raw)?;
    check_constraints(field, &value)?;
    run_custom_validation(field, &value)?;
    apply_transform(field, value)
}

/// 直接校验已类型化的值（默认值为结构化 JSON 时使用）
pub fn check_typed(field: &FieldSchema, value: ConfigValue) -> Result<ConfigValue, ValidationError> {
    check_constraints(field, &value)?;
    run_custom_validation(field, &value)?;
    apply_transform(field, value)
}

fn parse_typed(field: &FieldSchema, raw: &str) -> Result<ConfigValue, ValidationError> {
    let name = field.name.as_str();
    match field.field_type {
        FieldType::String => Ok(ConfigValue::String(raw.to_string())),
        FieldType::Number => {
            let number: f64 = raw
                .trim()
                .parse()
                .map_err(|_| ValidationError::type_error(name, format!("{raw:?} 不是有效数字")))?;
            if number.is_nan() {
                return Err(ValidationError::type_error(name, "数值不能为 NaN"));
            }
            Ok(ConfigValue::Number(number))
        }
        FieldType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(ConfigValue::Boolean(true)),
            "false" | "0" | "no" => Ok(ConfigValue::Boolean(false)),
            _ => Err(ValidationError::type_error(
                name,
                format!("{raw:?} 不是有效布尔值，支持 true/false/1/0/yes/no"),
            )),
        },
        FieldType::Enum => {
            if field.enum_values.iter().any(|v| v == raw) {
                Ok(ConfigValue::String(raw.to_string()))
            } else {
                Err(ValidationError::invalid(
                    name,
                    format!("{raw:?} 不在可选值中: {:?}", field.enum_values),
                ))
            }
        }
        FieldType::Url => Url::parse(raw.trim())
            .map(ConfigValue::Url)
            .map_err(|e| ValidationError::invalid(name, format!("无效的 URL {raw:?}: {e}"))),
        FieldType::Email => {
            let regex = email_regex()
                .map_err(|e| ValidationError::invalid(name, format!("邮箱正则无效: {e}")))?;
            if regex.is_match(raw) {
                Ok(ConfigValue::String(raw.to_string()))
            } else {
                Err(ValidationError::invalid(name, format!("无效的邮箱地址: {raw:?}")))
            }
        }
        FieldType::Port => {
            let number: f64 = raw
                .trim()
                .parse()
                .map_err(|_| ValidationError::type_error(name, format!("{raw:?} 不是有效端口")))?;
            if number.fract() != 0.0 || !(1.0..=65535.0).contains(&number) {
                return Err(ValidationError::invalid(
                    name,
                    format!("端口 {raw} 超出范围 [1, 65535]"),
                ));
            }
            Ok(ConfigValue::Port(number as u16))
        }
        FieldType::Json => serde_json::from_str(raw)
            .map(ConfigValue::Json)
            .map_err(|e| ValidationError::invalid(name, format!("JSON 解析失败: {e}"))),
    }
}

fn check_constraints(field: &FieldSchema, value: &ConfigValue) -> Result<(), ValidationError> {
    let name = field.name.as_str();

    if let (Some(pattern), ConfigValue::String(s)) = (&field.pattern, value) {
        if !pattern.is_match(s) {
            return Err(ValidationError::invalid(
                name,
                format!("值不匹配正则 {}", pattern.as_str()),
            ));
        }
    }

    let measured = match (field.field_type, value) {
        (FieldType::String, ConfigValue::String(s)) => Some((s.chars().count() as f64, "长度")),
        (FieldType::Number, ConfigValue::Number(n)) => Some((*n, "数值")),
        (FieldType::Port, ConfigValue::Port(p)) => Some((f64::from(*p), "端口")),
        _ => None,
    };

    if let Some((measure, what)) = measured {
        if let Some(min) = field.min {
            if measure < min {
                return Err(ValidationError::invalid(
                    name,
                    format!("{what} {measure} 小于最小值 {min}"),
                ));
            }
        }
        if let Some(max) = field.max {
            if measure > max {
                return Err(ValidationError::invalid(
                    name,
                    format!("{what} {measure} 大于最大值 {max}"),
                ));
            }
        }
    }

    Ok(())
}

fn run_custom_validation(field: &FieldSchema, value: &ConfigValue) -> Result<(), ValidationError> {
    let Some(check) = &field.custom_validate else {
        return Ok(());
    };
    match check(value) {
        CheckResult::Pass => Ok(()),
        CheckResult::Fail => Err(ValidationError::invalid(&field.name, "自定义校验未通过")),
        CheckResult::Message(message) => Err(ValidationError::invalid(&field.name, message)),
    }
}

fn apply_transform(field: &FieldSchema, value: ConfigValue) -> Result<ConfigValue, ValidationError> {
    match &field.transform {
        Some(transform) => transform(value)
            .map_err(|e| ValidationError::invalid(&field.name, format!("transform 失败: {e}"))),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Schema;
    use crate::error::ErrorKind;

    fn build(field: FieldSchema) -> FieldSchema {
        let name = field.name.clone();
        let schema = Schema::builder().field(field).build().unwrap();
        schema.get(&name).unwrap().clone()
    }

    fn kind_of(field: &FieldSchema, raw: &str) -> ErrorKind {
        coerce(field, raw).unwrap_err().kind
    }

    #[test]
    fn test_port_bounds() {
        let field = build(FieldSchema::port("PORT"));

        assert_eq!(kind_of(&field, "0"), ErrorKind::Invalid);
        assert_eq!(kind_of(&field, "65536"), ErrorKind::Invalid);
        assert_eq!(kind_of(&field, "80.5"), ErrorKind::Invalid);
        assert_eq!(kind_of(&field, "abc"), ErrorKind::TypeError);

        for (raw, port) in [("1", 1u16), ("80", 80), ("65535", 65535)] {
            assert_eq!(coerce(&field, raw).unwrap(), ConfigValue::Port(port));
        }
    }

    #[test]
    fn test_number_parse_and_range() {
        let field = build(FieldSchema::number("RATIO").min(0.0).max(1.0));

        assert_eq!(coerce(&field, "0.25").unwrap(), ConfigValue::Number(0.25));
        assert_eq!(kind_of(&field, "NaN"), ErrorKind::TypeError);
        assert_eq!(kind_of(&field, "nope"), ErrorKind::TypeError);
        assert_eq!(kind_of(&field, "1.5"), ErrorKind::Invalid);
        assert_eq!(kind_of(&field, "-1"), ErrorKind::Invalid);
    }

    #[test]
    fn test_boolean_variants() {
        let field = build(FieldSchema::boolean("DEBUG"));

        for raw in ["true", "TRUE", "1", "Yes"] {
            assert_eq!(coerce(&field, raw).unwrap(), ConfigValue::Boolean(true));
        }
        for raw in ["false", "0", "NO"] {
            assert_eq!(coerce(&field, raw).unwrap(), ConfigValue::Boolean(false));
        }
        assert_eq!(kind_of(&field, "maybe"), ErrorKind::TypeError);
    }

    #[test]
    fn test_string_pattern_and_length() {
        let field = build(FieldSchema::string("CODE").pattern("^[A-Z]+$").min(2.0).max(4.0));

        assert_eq!(coerce(&field, "ABC").unwrap(), ConfigValue::from("ABC"));
        assert_eq!(kind_of(&field, "abc"), ErrorKind::Invalid);
        assert_eq!(kind_of(&field, "A"), ErrorKind::Invalid);
        assert_eq!(kind_of(&field, "ABCDE"), ErrorKind::Invalid);
    }

    #[test]
    fn test_enum_membership() {
        let field = build(FieldSchema::enumeration(
            "NODE_ENV",
            ["development", "production", "test"],
        ));

        assert_eq!(
            coerce(&field, "production").unwrap(),
            ConfigValue::from("production")
        );
        assert_eq!(kind_of(&field, "staging"), ErrorKind::Invalid);
    }

    #[test]
    fn test_url_and_email() {
        let url = build(FieldSchema::url("DATABASE_URL"));
        let parsed = coerce(&url, "postgres://user:pw@localhost:5432/app").unwrap();
        assert_eq!(parsed.as_url().unwrap().scheme(), "postgres");
        assert_eq!(kind_of(&url, "not a url"), ErrorKind::Invalid);
        assert_eq!(kind_of(&url, "/relative/path"), ErrorKind::Invalid);

        let email = build(FieldSchema::email("ADMIN_EMAIL"));
        assert!(coerce(&email, "ops@example.com").is_ok());
        assert_eq!(kind_of(&email, "ops@example"), ErrorKind::Invalid);
        assert_eq!(kind_of(&email, "ops example.com"), ErrorKind::Invalid);
    }

    #[test]
    fn test_json_parse() {
        let field = build(FieldSchema::json("FEATURES"));

        let value = coerce(&field, r#"{"beta": true, "limits": [1, 2]}"#).unwrap();
        assert_eq!(value.as_json().unwrap()["limits"][1], 2);
        assert_eq!(kind_of(&field, "{broken"), ErrorKind::Invalid);

        let structured = check_typed(&field, ConfigValue::Json(serde_json::json!([1, 2]))).unwrap();
        assert_eq!(structured, ConfigValue::Json(serde_json::json!([1, 2])));
    }

    #[test]
    fn test_custom_validation_results() {
        let generic = build(FieldSchema::number("WORKERS").validate(|v| v.as_f64() != Some(3.0)));
        assert!(coerce(&generic, "4").is_ok());
        let err = coerce(&generic, "3").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);

        let specific = build(FieldSchema::string("SECRET").validate(|v| {
            if v.as_str().is_some_and(|s| s.len() >= 8) {
                CheckResult::Pass
            } else {
                CheckResult::from("至少 8 个字符")
            }
        }));
        let err = coerce(&specific, "short").unwrap_err();
        assert_eq!(err.message, "至少 8 个字符");
    }

    #[test]
    fn test_transform_runs_last() {
        let field = build(
            FieldSchema::string("NAME")
                .min(3.0)
                .transform(|v| Ok(ConfigValue::String(v.to_persisted_string().to_uppercase()))),
        );

        assert_eq!(coerce(&field, "abc").unwrap(), ConfigValue::from("ABC"));
        // 校验失败时不执行 transform
        assert_eq!(kind_of(&field, "ab"), ErrorKind::Invalid);

        let failing = build(FieldSchema::string("NAME").transform(|_| Err("boom".to_string())));
        let err = coerce(&failing, "x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(err.message.contains("boom"));
    }
}
