//! 配置文件存储
//!
//! 读取和写入 key=value 配置文件，支持自动创建、按 schema 生成模板以及
//! 单键原地更新

use crate::config::loader::{encode_env_value, parse_env_content, FileMap};
use crate::config::types::{FieldSchema, Schema};
use crate::error::{EnvStoreError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 配置文件存储接口
#[async_trait]
pub trait EnvFileStore: Send + Sync {
    /// 文件路径
    fn path(&self) -> &Path;

    /// 文件是否存在
    async fn exists(&self) -> bool;

    /// 读取并解析文件；文件不存在时返回空映射
    async fn load(&self) -> Result<FileMap>;

    /// 创建文件并写入初始内容
    async fn create(&self, content: &str) -> Result<()>;

    /// 替换已存在的 `KEY=` 行，不存在则追加
    async fn update_key(&self, key: &str, value: &str) -> Result<()>;
}

/// 基于本地文件系统的 dotenv 文件存储
#[derive(Debug, Clone)]
pub struct DotenvFileStore {
    path: PathBuf,
}

impl DotenvFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read_to_string(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EnvStoreError::io(&self.path, e)),
        }
    }

    /// 先写临时文件再重命名，避免读者看到写了一半的内容
    async fn write_atomic(&self, content: &str) -> Result<()> {
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| EnvStoreError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| EnvStoreError::io(&self.path, e))
    }
}

#[async_trait]
impl EnvFileStore for DotenvFileStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn load(&self) -> Result<FileMap> {
        let content = self.read_to_string().await?.unwrap_or_default();
        let map = parse_env_content(&content);
        debug!("读取配置文件 {}，共 {} 项", self.path.display(), map.len());
        Ok(map)
    }

    async fn create(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EnvStoreError::io(parent, e))?;
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| EnvStoreError::io(&self.path, e))?;
        info!("已创建配置文件: {}", self.path.display());
        Ok(())
    }

    async fn update_key(&self, key: &str, value: &str) -> Result<()> {
        let content = self.read_to_string().await?.unwrap_or_default();
        let updated = replace_or_append(&content, key, value);
        self.write_atomic(&updated).await?;
        debug!("已更新配置文件 {} 中的 {}", self.path.display(), key);
        Ok(())
    }
}

/// 替换 `KEY=` 行（含其续行），没有则追加到文件末尾
pub fn replace_or_append(content: &str, key: &str, value: &str) -> String {
    let new_line = format!("{key}={}", encode_env_value(value));
    let mut output: Vec<String> = Vec::new();
    let mut replaced = false;
    let mut skipping_continuation = false;

    for line in content.lines() {
        if skipping_continuation {
            skipping_continuation = ends_with_continuation(line.trim());
            continue;
        }

        if line_defines_key(line, key) {
            if !replaced {
                output.push(new_line.clone());
                replaced = true;
            }
            skipping_continuation = ends_with_continuation(line.trim());
            continue;
        }

        output.push(line.to_string());
    }

    if !replaced {
        output.push(new_line);
    }

    let mut result = output.join("\n");
    result.push('\n');
    result
}

fn line_defines_key(line: &str, key: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return false;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    trimmed
        .split_once('=')
        .is_some_and(|(k, _)| k.trim() == key)
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// 根据 schema 生成初始文件内容
///
/// `encrypt` 用于敏感字段的默认值；未提供时敏感字段只写注释行。
pub fn render_template<F>(schema: &Schema, mut encrypt: Option<F>) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut out = String::from("# 由 envkeeper 根据 schema 生成\n");

    for (group, fields) in schema.groups() {
        out.push_str(&format!("\n# [{group}]\n"));
        for field in fields {
            render_field(&mut out, field, encrypt.as_mut())?;
        }
    }

    Ok(out)
}

fn render_field<F>(out: &mut String, field: &FieldSchema, encrypt: Option<&mut F>) -> Result<()>
where
    F: FnMut(&str) -> Result<String>,
{
    if let Some(description) = &field.description {
        for line in description.lines() {
            out.push_str(&format!("# {line}\n"));
        }
    }

    let mut hint = format!("# type: {}", field.field_type);
    if field.required {
        hint.push_str(", required");
    }
    if field.sensitive {
        hint.push_str(", sensitive");
    }
    if !field.enum_values.is_empty() {
        hint.push_str(&format!(", one of: {}", field.enum_values.join("|")));
    }
    out.push_str(&hint);
    out.push('\n');

    let default = field.default.as_ref().map(|d| d.to_persisted_string());
    match (default, field.sensitive, encrypt) {
        (Some(value), false, _) => {
            out.push_str(&format!("{}={}\n", field.name, encode_env_value(&value)));
        }
        (Some(value), true, Some(encrypt)) => {
            out.push_str(&format!("{}={}\n", field.name, encrypt(&value)?));
        }
        _ => out.push_str(&format!("# {}=\n", field.name)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FieldSchema;
    use tempfile::TempDir;

    #[test]
    fn test_replace_existing_line_in_place() {
        let content = "# header\nPORT=3000\nHOST=localhost\n";
        let updated = replace_or_append(content, "PORT", "8080");
        assert_eq!(updated, "# header\nPORT=8080\nHOST=localhost\n");
    }

    #[test]
    fn test_append_missing_key() {
        let updated = replace_or_append("HOST=localhost", "PORT", "8080");
        assert_eq!(updated, "HOST=localhost\nPORT=8080\n");
    }

    #[test]
    fn test_replace_is_idempotent() {
        let once = replace_or_append("PORT=1\n", "PORT", "2");
        let twice = replace_or_append(&once, "PORT", "2");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_replace_skips_comments_and_prefix_matches() {
        let content = "# PORT=1\nPORTAL=x\nPORT=1\n";
        let updated = replace_or_append(content, "PORT", "2");
        assert_eq!(updated, "# PORT=1\nPORTAL=x\nPORT=2\n");
    }

    #[test]
    fn test_replace_drops_old_continuation_lines() {
        let content = "CERT=a\\\nb\\\nc\nNEXT=1\n";
        let updated = replace_or_append(content, "CERT", "new");
        assert_eq!(updated, "CERT=new\nNEXT=1\n");
    }

    #[test]
    fn test_replace_collapses_duplicates() {
        let updated = replace_or_append("A=1\nA=2\n", "A", "3");
        assert_eq!(updated, "A=3\n");
    }

    #[test]
    fn test_template_groups_and_defaults() {
        let schema = Schema::builder()
            .field(
                FieldSchema::port("PORT")
                    .default_value(3000u16)
                    .group("Server")
                    .description("HTTP 监听端口"),
            )
            .field(FieldSchema::url("DATABASE_URL").required().group("Database"))
            .field(
                FieldSchema::string("API_KEY")
                    .sensitive()
                    .default_value("dev-key")
                    .group("Server"),
            )
            .build()
            .unwrap();

        let plain = render_template::<fn(&str) -> Result<String>>(&schema, None).unwrap();
        assert!(plain.contains("# [Server]"));
        assert!(plain.contains("# HTTP 监听端口"));
        assert!(plain.contains("PORT=3000"));
        assert!(plain.contains("# DATABASE_URL="));
        assert!(plain.contains("# API_KEY="));
        assert!(!plain.contains("dev-key"));
        assert!(plain.find("# [Server]").unwrap() < plain.find("# [Database]").unwrap());

        let encrypted =
            render_template(&schema, Some(|v: &str| Ok(format!("enc({v})")))).unwrap();
        assert!(encrypted.contains("API_KEY=enc(dev-key)"));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = DotenvFileStore::new(dir.path().join(".env"));

        assert!(!store.exists().await);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_key_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "PORT=3000\n").unwrap();
        let store = DotenvFileStore::new(&path);

        store.update_key("PORT", "8080").await.unwrap();
        store.update_key("HOST", "example.com").await.unwrap();

        let map = store.load().await.unwrap();
        assert_eq!(map.get("PORT"), Some("8080"));
        assert_eq!(map.get("HOST"), Some("example.com"));
        assert!(!dir.path().join(".env.tmp").exists());
    }

    #[tokio::test]
    async fn test_create_makes_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(".env");
        let store = DotenvFileStore::new(&path);

        store.create("A=1\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1\n");
    }
}
