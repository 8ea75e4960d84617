//! 类型声明生成
//!
//! 仅依赖 schema（字段名、是否必填、声明类型），与已解析的值无关

use crate::config::types::{FieldSchema, FieldType, Schema};

const HEADER: &str = "由 envkeeper 根据 schema 生成，请勿手动修改";

/// 输出的语言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingLanguage {
    TypeScript,
    Rust,
}

impl BindingLanguage {
    /// 根据输出文件扩展名选择语言，`.rs` 为 Rust，其余为 TypeScript
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("rs") => BindingLanguage::Rust,
            _ => BindingLanguage::TypeScript,
        }
    }
}

/// 生成指定语言的类型声明
pub fn render(schema: &Schema, language: BindingLanguage) -> String {
    match language {
        BindingLanguage::TypeScript => render_typescript(schema),
        BindingLanguage::Rust => render_rust(schema),
    }
}

/// 字段在运行时可能缺失（非必填且无默认值）
fn is_optional(field: &FieldSchema) -> bool {
    !field.required && field.default.is_none()
}

fn doc_lines(field: &FieldSchema) -> Vec<String> {
    let mut lines: Vec<String> = field
        .description
        .as_deref()
        .map(|d| d.lines().map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(deprecation) = &field.deprecated {
        lines.push(format!("@deprecated {}", deprecation.message(&field.name)));
    }
    lines
}

fn typescript_type(field: &FieldSchema) -> String {
    match field.field_type {
        FieldType::String | FieldType::Url | FieldType::Email => "string".to_string(),
        FieldType::Number | FieldType::Port => "number".to_string(),
        FieldType::Boolean => "boolean".to_string(),
        FieldType::Json => "unknown".to_string(),
        FieldType::Enum => field
            .enum_values
            .iter()
            .map(|v| format!("{v:?}"))
            .collect::<Vec<_>>()
            .join(" | "),
    }
}

/// TypeScript 接口声明
pub fn render_typescript(schema: &Schema) -> String {
    let mut out = format!("// {HEADER}\n\nexport interface Config {{\n");
    for field in schema.fields() {
        let docs = doc_lines(field);
        if !docs.is_empty() {
            out.push_str("  /**\n");
            for line in docs {
                out.push_str(&format!("   * {line}\n"));
            }
            out.push_str("   */\n");
        }
        let optional = if is_optional(field) { "?" } else { "" };
        out.push_str(&format!(
            "  {}{optional}: {};\n",
            field.name,
            typescript_type(field)
        ));
    }
    out.push_str("}\n");
    out
}

fn rust_type(field: &FieldSchema) -> &'static str {
    match field.field_type {
        FieldType::String | FieldType::Url | FieldType::Email | FieldType::Enum => "String",
        FieldType::Number => "f64",
        FieldType::Boolean => "bool",
        FieldType::Port => "u16",
        FieldType::Json => "serde_json::Value",
    }
}

fn rust_ident(name: &str) -> String {
    let ident: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{ident}")
    } else {
        ident
    }
}

/// Rust 结构体声明
pub fn render_rust(schema: &Schema) -> String {
    let mut out = format!("// {HEADER}\n\n#[derive(Debug, Clone)]\npub struct Config {{\n");
    for field in schema.fields() {
        for line in doc_lines(field) {
            out.push_str(&format!("    /// {line}\n"));
        }
        let ty = rust_type(field);
        let ty = if is_optional(field) {
            format!("Option<{ty}>")
        } else {
            ty.to_string()
        };
        out.push_str(&format!("    pub {}: {ty},\n", rust_ident(&field.name)));
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn schema() -> Schema {
        Schema::builder()
            .field(FieldSchema::port("PORT").default_value(3000u16).description("监听端口"))
            .field(FieldSchema::url("DATABASE_URL").required())
            .field(FieldSchema::enumeration("NODE_ENV", ["development", "production"]).required())
            .field(FieldSchema::json("FEATURES"))
            .field(FieldSchema::boolean("LEGACY_MODE").deprecated_with("改用 NODE_ENV"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_typescript_interface() {
        let ts = render_typescript(&schema());

        assert!(ts.contains("export interface Config {"));
        assert!(ts.contains("  PORT: number;"));
        assert!(ts.contains("  DATABASE_URL: string;"));
        assert!(ts.contains(r#"  NODE_ENV: "development" | "production";"#));
        assert!(ts.contains("  FEATURES?: unknown;"));
        assert!(ts.contains("   * 监听端口"));
        assert!(ts.contains("@deprecated"));
    }

    #[test]
    fn test_rust_struct() {
        let rs = render_rust(&schema());

        assert!(rs.contains("pub struct Config {"));
        assert!(rs.contains("    pub port: u16,"));
        assert!(rs.contains("    pub database_url: String,"));
        assert!(rs.contains("    pub features: Option<serde_json::Value>,"));
        assert!(rs.contains("    pub legacy_mode: Option<bool>,"));
    }

    #[test]
    fn test_language_from_path() {
        assert_eq!(
            BindingLanguage::from_path(Path::new("out/config.rs")),
            BindingLanguage::Rust
        );
        assert_eq!(
            BindingLanguage::from_path(Path::new("env.d.ts")),
            BindingLanguage::TypeScript
        );
    }
}
