//! 配置来源解析
//!
//! 解析 key=value 文件内容，并按优先级合并进程环境、文件和 schema 默认值

use crate::config::env::EnvSource;
use crate::config::types::Schema;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// 原始值来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// 进程环境变量
    ProcessEnv,
    /// 配置文件
    File,
    /// schema 默认值
    Default,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::ProcessEnv => "process-environment",
            Origin::File => "file",
            Origin::Default => "default",
        };
        f.write_str(name)
    }
}

/// 带来源标记的原始字符串值
#[derive(Debug, Clone, PartialEq)]
pub struct RawValue {
    pub value: String,
    pub origin: Origin,
}

impl RawValue {
    pub fn new(value: impl Into<String>, origin: Origin) -> Self {
        Self {
            value: value.into(),
            origin,
        }
    }
}

/// 配置文件解析结果，保持文件中的出现顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMap {
    entries: Vec<(String, String)>,
}

impl FileMap {
    pub fn get(&self, key: &str) -> Option<&str> {
        // 重复键以最后一次出现为准
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: String, value: String) {
        self.entries.push((key, value));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FileMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// 解析 key=value 文件内容
///
/// 规则：
/// - 每行先 trim，空行和 `#` 开头的行跳过
/// - 可选的 `export ` 前缀
/// - 第一个 `=` 分隔键和值
/// - 值两端成对的 `"` 或 `'` 被去除
/// - 行尾未转义的 `\` 将值与下一行用换行符连接
pub fn parse_env_content(content: &str) -> FileMap {
    let mut map = FileMap::default();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            debug!("跳过无法解析的行: {}", line);
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = value.trim().to_string();
        while let Some(stripped) = strip_continuation(&value) {
            value = stripped;
            match lines.next() {
                Some(next) => {
                    value.push('\n');
                    value.push_str(next.trim_end());
                }
                None => break,
            }
        }

        map.insert(key.to_string(), strip_quotes(&value).to_string());
    }

    map
}

/// 行尾为奇数个 `\` 时视为续行，返回去掉续行符的值
fn strip_continuation(value: &str) -> Option<String> {
    let trailing = value.chars().rev().take_while(|&c| c == '\\').count();
    if trailing % 2 == 1 {
        Some(value[..value.len() - 1].to_string())
    } else {
        None
    }
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// 值能否写入文件后原样读回
///
/// 续行语法无法表达以 `\` 结尾的中间行，这类值不可编码。
pub fn is_encodable(value: &str) -> bool {
    let lines: Vec<&str> = value.split('\n').collect();
    lines[..lines.len() - 1]
        .iter()
        .all(|line| !line.ends_with('\\'))
}

/// 将值编码为可写入文件的单行或多行形式
///
/// 调用方需先用 [`is_encodable`] 检查。
pub fn encode_env_value(value: &str) -> String {
    let needs_quotes = value != value.trim()
        || value.contains('#')
        || value.ends_with('\\')
        || value.starts_with('"')
        || value.starts_with('\'');

    let body = if needs_quotes {
        format!("\"{value}\"")
    } else {
        value.to_string()
    };

    body.replace('\n', "\\\n")
}

/// 按优先级合并各来源的原始值
pub struct SourceResolver<'a> {
    schema: &'a Schema,
    env: &'a dyn EnvSource,
    skip_os_env: bool,
}

impl<'a> SourceResolver<'a> {
    pub fn new(schema: &'a Schema, env: &'a dyn EnvSource, skip_os_env: bool) -> Self {
        Self {
            schema,
            env,
            skip_os_env,
        }
    }

    /// 解析单个字段：进程环境 > 文件 > 默认值；空字符串视为未设置
    pub fn resolve_field(&self, name: &str, file_map: &FileMap) -> Option<RawValue> {
        if !self.skip_os_env {
            if let Some(value) = self.env.read(name).filter(|v| !v.is_empty()) {
                return Some(RawValue::new(value, Origin::ProcessEnv));
            }
        }

        if let Some(value) = file_map.get(name).filter(|v| !v.is_empty()) {
            return Some(RawValue::new(value, Origin::File));
        }

        self.schema
            .get(name)
            .and_then(|field| field.default.as_ref())
            .map(|default| RawValue::new(default.to_persisted_string(), Origin::Default))
    }

    /// 解析 schema 中全部字段
    pub fn resolve(&self, file_map: &FileMap) -> HashMap<String, Option<RawValue>> {
        self.schema
            .fields()
            .map(|field| (field.name.clone(), self.resolve_field(&field.name, file_map)))
            .collect()
    }

    /// 文件中出现但 schema 未声明的键（按出现顺序去重）
    pub fn unknown_keys(&self, file_map: &FileMap) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        for key in file_map.keys() {
            if !self.schema.contains(key) && !unknown.iter().any(|k| k == key) {
                unknown.push(key.to_string());
            }
        }
        unknown
    }
}
