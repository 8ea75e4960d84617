//! 配置存储模块
//!
//! 提供 schema 定义、多来源解析、类型校验、敏感值加密、文件持久化、
//! 快照缓存和热重载功能

pub mod cache;
pub mod codegen;
pub mod encryption;
pub mod env;
pub mod events;
pub mod file_store;
pub mod loader;
pub mod manager;
pub mod types;
pub mod validator;
pub mod watcher;

// 重新导出主要类型
pub use cache::{ResolvedCache, ResolvedConfig, REDACTED};
pub use codegen::BindingLanguage;
pub use encryption::{EncryptionCodec, EncryptionError};
pub use env::{EnvSource, MemoryEnv, ProcessEnv};
pub use events::{ConfigEvent, EventKind};
pub use file_store::{DotenvFileStore, EnvFileStore};
pub use loader::{FileMap, Origin, RawValue, SourceResolver};
pub use manager::{ConfigStore, DeprecationWarning, StoreOptions, WeakConfigStore};
pub use types::{CheckResult, ConfigValue, Deprecation, FieldSchema, FieldType, Schema};
pub use watcher::ChangeWatcher;
