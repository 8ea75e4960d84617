//! EnvKeeper - 基于 schema 的运行时配置存储
//!
//! 这是一个用 Rust 编写的类型化配置库，支持：
//! - 进程环境变量 > 配置文件 > 默认值 的多来源解析
//! - 字段类型转换与批量校验
//! - 敏感字段 AES-256-GCM 加密存储
//! - 配置文件自动生成与单字段原子更新
//! - 配置热重载与事件通知
//! - 类型声明生成
//! - 结构化日志记录

pub mod config;
pub mod error;
pub mod logging;

// 重新导出主要类型
pub use config::{
    BindingLanguage, ConfigEvent, ConfigStore, ConfigValue, EventKind, FieldSchema, FieldType,
    Schema, StoreOptions,
};
pub use error::{EnvStoreError, ErrorKind, Result, ValidationError, ValidationErrors};

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
