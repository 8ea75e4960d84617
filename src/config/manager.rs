//! 配置存储管理器
//!
//! 组合 schema、来源解析、类型校验、加解密、文件存储、缓存和文件监控，
//! 对外提供 `get` / `get_all` / `update` / `reload` / `generate_types` 与事件订阅

use crate::config::cache::{ResolvedCache, ResolvedConfig};
use crate::config::codegen::{self, BindingLanguage};
use crate::config::encryption::EncryptionCodec;
use crate::config::env::{EnvSource, ProcessEnv};
use crate::config::events::{ConfigEvent, EventBus, EventKind};
use crate::config::file_store::{render_template, DotenvFileStore, EnvFileStore};
use crate::config::loader::{is_encodable, FileMap, Origin, SourceResolver};
use crate::config::types::{ConfigValue, FieldSchema, FieldType, Schema};
use crate::config::validator;
use crate::config::watcher::ChangeWatcher;
use crate::error::{EnvStoreError, ErrorKind, Result, ValidationError, ValidationErrors};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// 默认配置文件路径
pub const DEFAULT_ENV_PATH: &str = ".env";

/// 默认防抖动延迟
pub const DEFAULT_WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// 错误批次回调
pub type ErrorCallback = Arc<dyn Fn(&ValidationErrors) + Send + Sync>;

/// 废弃警告回调
pub type WarningCallback = Arc<dyn Fn(&DeprecationWarning) + Send + Sync>;

/// 废弃字段警告
#[derive(Debug, Clone, PartialEq)]
pub struct DeprecationWarning {
    /// 字段名
    pub field: String,
    /// 警告内容（含迁移提示）
    pub message: String,
}

/// 配置存储构造选项
pub struct StoreOptions {
    schema: Schema,
    env_path: PathBuf,
    skip_os_env: bool,
    auto_create: bool,
    auto_populate: bool,
    strict: bool,
    cache: bool,
    watch: bool,
    watch_debounce: Duration,
    encrypt: bool,
    encryption_key: Option<SecretString>,
    encryption_salt: Option<Vec<u8>>,
    on_error: Option<ErrorCallback>,
    on_warning: Option<WarningCallback>,
    env_source: Option<Arc<dyn EnvSource>>,
    file_store: Option<Arc<dyn EnvFileStore>>,
}

impl StoreOptions {
    /// 使用默认选项创建
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            env_path: PathBuf::from(DEFAULT_ENV_PATH),
            skip_os_env: false,
            auto_create: true,
            auto_populate: true,
            strict: false,
            cache: true,
            watch: false,
            watch_debounce: DEFAULT_WATCH_DEBOUNCE,
            encrypt: false,
            encryption_key: None,
            encryption_salt: None,
            on_error: None,
            on_warning: None,
            env_source: None,
            file_store: None,
        }
    }

    pub fn env_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.env_path = path.as_ref().to_path_buf();
        self
    }

    pub fn skip_os_env(mut self, skip: bool) -> Self {
        self.skip_os_env = skip;
        self
    }

    pub fn auto_create(mut self, enabled: bool) -> Self {
        self.auto_create = enabled;
        self
    }

    pub fn auto_populate(mut self, enabled: bool) -> Self {
        self.auto_populate = enabled;
        self
    }

    pub fn strict(mut self, enabled: bool) -> Self {
        self.strict = enabled;
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    pub fn watch(mut self, enabled: bool) -> Self {
        self.watch = enabled;
        self
    }

    pub fn watch_debounce(mut self, debounce: Duration) -> Self {
        self.watch_debounce = debounce;
        self
    }

    pub fn encrypt(mut self, enabled: bool) -> Self {
        self.encrypt = enabled;
        self
    }

    pub fn encryption_key(mut self, key: SecretString) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// 替换默认的固定盐值
    pub fn encryption_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.encryption_salt = Some(salt.into());
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ValidationErrors) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_warning<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DeprecationWarning) + Send + Sync + 'static,
    {
        self.on_warning = Some(Arc::new(callback));
        self
    }

    /// 注入环境变量来源，默认为真实进程环境
    pub fn env_source(mut self, source: Arc<dyn EnvSource>) -> Self {
        self.env_source = Some(source);
        self
    }

    /// 注入文件存储，默认为 `env_path` 上的 dotenv 文件
    pub fn file_store(mut self, store: Arc<dyn EnvFileStore>) -> Self {
        self.file_store = Some(store);
        self
    }
}

/// 一次解析的完整结果：成功字段与错误批次
struct Resolution {
    config: ResolvedConfig,
    errors: ValidationErrors,
}

struct StoreInner {
    schema: Schema,
    skip_os_env: bool,
    strict: bool,
    cache_enabled: bool,
    watch_debounce: Duration,
    env: Arc<dyn EnvSource>,
    files: Arc<dyn EnvFileStore>,
    codec: Option<EncryptionCodec>,
    cache: ResolvedCache,
    events: EventBus,
    on_error: Option<ErrorCallback>,
    on_warning: Option<WarningCallback>,
    /// 串行化 update、reload 与缓存填充
    write_lock: tokio::sync::Mutex<()>,
    version: AtomicU64,
    watcher: Mutex<Option<ChangeWatcher>>,
}

/// 配置存储
///
/// 克隆开销很小，所有克隆共享同一份缓存与事件处理器。
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

/// 不持有所有权的存储引用，供后台监控任务使用
#[derive(Clone)]
pub struct WeakConfigStore {
    inner: Weak<StoreInner>,
}

impl WeakConfigStore {
    pub fn upgrade(&self) -> Option<ConfigStore> {
        self.inner.upgrade().map(|inner| ConfigStore { inner })
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("env_path", &self.inner.files.path())
            .field("fields", &self.inner.schema.len())
            .field("strict", &self.inner.strict)
            .field("cache", &self.inner.cache_enabled)
            .field("encrypt", &self.inner.codec.is_some())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// 创建配置存储
    ///
    /// 按选项自动创建（并填充）配置文件，必要时启动文件监控。
    pub async fn new(options: StoreOptions) -> Result<Self> {
        let codec = if options.encrypt {
            let key = options.encryption_key.as_ref().ok_or_else(|| {
                EnvStoreError::Options("启用加密时必须提供 encryption_key".to_string())
            })?;
            let codec = match &options.encryption_salt {
                Some(salt) => EncryptionCodec::with_salt(key, salt)?,
                None => EncryptionCodec::from_passphrase(key)?,
            };
            Some(codec)
        } else {
            None
        };

        let files = options
            .file_store
            .unwrap_or_else(|| Arc::new(DotenvFileStore::new(&options.env_path)));
        let env = options.env_source.unwrap_or_else(|| Arc::new(ProcessEnv));

        let store = Self {
            inner: Arc::new(StoreInner {
                schema: options.schema,
                skip_os_env: options.skip_os_env,
                strict: options.strict,
                cache_enabled: options.cache,
                watch_debounce: options.watch_debounce,
                env,
                files,
                codec,
                cache: ResolvedCache::new(),
                events: EventBus::new(),
                on_error: options.on_error,
                on_warning: options.on_warning,
                write_lock: tokio::sync::Mutex::new(()),
                version: AtomicU64::new(0),
                watcher: Mutex::new(None),
            }),
        };

        if options.auto_create {
            store.ensure_file(options.auto_populate).await?;
        }

        if options.watch {
            store.start_watching()?;
        }

        debug!("配置存储已创建: {:?}", store);
        Ok(store)
    }

    /// 字段 schema
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// 配置文件路径
    pub fn env_path(&self) -> &Path {
        self.inner.files.path()
    }

    pub fn downgrade(&self) -> WeakConfigStore {
        WeakConfigStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// 文件不存在时创建，`populate` 为真时按 schema 写入模板
    async fn ensure_file(&self, populate: bool) -> Result<()> {
        let files = &self.inner.files;
        if files.exists().await {
            return Ok(());
        }

        let content = if populate {
            match &self.inner.codec {
                Some(codec) => render_template(
                    &self.inner.schema,
                    Some(|value: &str| codec.encrypt(value).map_err(EnvStoreError::from)),
                )?,
                None => render_template::<fn(&str) -> Result<String>>(&self.inner.schema, None)?,
            }
        } else {
            String::new()
        };

        files.create(&content).await?;
        info!("已自动创建配置文件: {}", files.path().display());
        Ok(())
    }

    /// 获取单个字段
    ///
    /// 非严格模式下，其他字段的错误不影响本字段的读取；字段本身无效时返回
    /// 该字段的错误。可选且未设置的字段返回 `None`。
    pub async fn get(&self, key: &str) -> Result<Option<ConfigValue>> {
        if !self.inner.schema.contains(key) {
            return Err(EnvStoreError::UnknownField {
                key: key.to_string(),
            });
        }

        match self.resolve_and_cache().await {
            Ok(config) => Ok(config.get(key).cloned()),
            Err(resolution) if self.inner.strict => {
                self.report_errors(&resolution.errors);
                Err(EnvStoreError::Validation(resolution.errors))
            }
            Err(resolution) => {
                let mut own = resolution.errors.only_field(key);
                // 文件读取失败不能退回默认值
                for io_error in resolution
                    .errors
                    .iter()
                    .filter(|e| e.kind == ErrorKind::IoFailure && e.field != key)
                {
                    own.push(io_error.clone());
                }
                if own.is_empty() {
                    debug!("其他字段存在错误，仍返回字段 {}", key);
                    Ok(resolution.config.get(key).cloned())
                } else {
                    self.report_errors(&own);
                    Err(EnvStoreError::Validation(own))
                }
            }
        }
    }

    /// 获取完整配置
    ///
    /// 缓存开启时，连续调用返回同一个快照（`Arc::ptr_eq` 成立）。
    pub async fn get_all(&self) -> Result<Arc<ResolvedConfig>> {
        self.resolve_and_cache().await.map_err(|resolution| {
            self.report_errors(&resolution.errors);
            EnvStoreError::Validation(resolution.errors)
        })
    }

    /// 更新单个字段：写文件 -> 设置环境变量覆盖 -> 失效缓存 -> 触发 `update` 事件
    ///
    /// 值先经过完整校验，失败时文件、环境和缓存均保持不变。文件写入与环境
    /// 变量设置是两个独立步骤，进程在两者之间崩溃会留下不一致。
    pub async fn update(&self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let field = self
            .inner
            .schema
            .get(key)
            .ok_or_else(|| EnvStoreError::UnknownField {
                key: key.to_string(),
            })?;

        let value: ConfigValue = value.into();
        let plain = value.to_persisted_string();
        let typed = validator::coerce(field, &plain)
            .map_err(|e| EnvStoreError::Validation(ValidationErrors::from(vec![e])))?;

        let persisted = match (&self.inner.codec, field.sensitive) {
            (Some(codec), true) => codec.encrypt(&plain)?,
            _ => plain,
        };
        if !is_encodable(&persisted) {
            return Err(EnvStoreError::Validation(ValidationErrors::from(vec![
                ValidationError::invalid(key, "中间行以 \\ 结尾的多行值无法写入配置文件"),
            ])));
        }

        {
            let _guard = self.inner.write_lock.lock().await;
            self.inner.files.update_key(key, &persisted).await?;
            self.inner.env.write(key, &persisted);
            self.inner.cache.invalidate();
        }

        if field.sensitive {
            info!("配置项 {} 已更新（敏感字段）", key);
        } else {
            info!("配置项 {} 已更新为 {}", key, typed);
        }

        self.inner.events.emit(ConfigEvent::Update {
            key: key.to_string(),
            value: typed,
        });
        Ok(())
    }

    /// 重新从来源解析并替换缓存
    ///
    /// 失败时保留上一次有效的快照，错误批次交给 `on_error` 和 `error` 事件。
    pub async fn reload(&self) -> Result<Arc<ResolvedConfig>> {
        let outcome = {
            let _guard = self.inner.write_lock.lock().await;
            let resolution = self.resolve_fresh().await;
            if resolution.errors.is_empty() {
                let config = Arc::new(self.stamp(resolution.config));
                if self.inner.cache_enabled {
                    self.inner.cache.store(Arc::clone(&config));
                }
                Ok(config)
            } else {
                Err(resolution.errors)
            }
        };

        match outcome {
            Ok(config) => {
                info!("配置重载成功，版本: {}", config.version);
                self.inner.events.emit(ConfigEvent::Reload(Arc::clone(&config)));
                Ok(config)
            }
            Err(errors) => {
                warn!("配置重载失败，保留上一次有效配置: {}", errors);
                self.report_errors(&errors);
                Err(EnvStoreError::Validation(errors))
            }
        }
    }

    /// 根据 schema 生成类型声明文件，`.rs` 输出 Rust 结构体，其余输出 TypeScript
    pub async fn generate_types<P: AsRef<Path>>(&self, output_path: P) -> Result<()> {
        let path = output_path.as_ref();
        let content = self.render_types(BindingLanguage::from_path(path));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EnvStoreError::io(parent, e))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| EnvStoreError::io(path, e))?;

        info!("已生成类型声明: {}", path.display());
        Ok(())
    }

    /// 生成类型声明文本
    pub fn render_types(&self, language: BindingLanguage) -> String {
        codegen::render(&self.inner.schema, language)
    }

    /// 注册事件处理器，按注册顺序同步调用
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler);
    }

    /// 以广播通道订阅全部事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.inner.events.subscribe()
    }

    /// 启动配置文件监控；已在监控时直接返回
    pub fn start_watching(&self) -> Result<()> {
        let mut slot = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        let watcher = ChangeWatcher::start(
            self.inner.files.path(),
            self.inner.watch_debounce,
            self.downgrade(),
        )?;
        *slot = Some(watcher);
        Ok(())
    }

    /// 停止配置文件监控
    pub fn unwatch(&self) {
        let watcher = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner
            .watcher
            .lock()
            .map(|w| w.is_some())
            .unwrap_or(false)
    }

    /// 命中缓存直接返回，否则在写锁内解析并填充缓存
    async fn resolve_and_cache(&self) -> std::result::Result<Arc<ResolvedConfig>, Resolution> {
        if !self.inner.cache_enabled {
            let resolution = self.resolve_fresh().await;
            return if resolution.errors.is_empty() {
                Ok(Arc::new(self.stamp(resolution.config)))
            } else {
                Err(resolution)
            };
        }

        if let Some(config) = self.inner.cache.load() {
            return Ok(config);
        }

        let _guard = self.inner.write_lock.lock().await;
        // 等锁期间可能已被其他调用填充
        if let Some(config) = self.inner.cache.load() {
            return Ok(config);
        }

        debug!("缓存未命中，开始解析配置");
        let resolution = self.resolve_fresh().await;
        if !resolution.errors.is_empty() {
            return Err(resolution);
        }

        let config = Arc::new(self.stamp(resolution.config));
        self.inner.cache.store(Arc::clone(&config));
        Ok(config)
    }

    fn stamp(&self, mut config: ResolvedConfig) -> ResolvedConfig {
        config.version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        config
    }

    /// 完整解析一次，收集全部字段错误而不短路
    async fn resolve_fresh(&self) -> Resolution {
        let inner = &self.inner;
        let mut errors = ValidationErrors::new();
        let mut config = ResolvedConfig::new(0);
        let mut warnings = Vec::new();

        let file_map = match inner.files.load().await {
            Ok(map) => map,
            Err(e) => {
                error!("读取配置文件失败: {}", e);
                errors.push(ValidationError::new(
                    inner.files.path().display().to_string(),
                    ErrorKind::IoFailure,
                    e.to_string(),
                ));
                FileMap::default()
            }
        };

        let resolver = SourceResolver::new(&inner.schema, inner.env.as_ref(), inner.skip_os_env);

        if inner.strict {
            for key in resolver.unknown_keys(&file_map) {
                errors.push(ValidationError::invalid(key, "未知字段，schema 中未声明"));
            }
        }

        for field in inner.schema.fields() {
            let Some(raw) = resolver.resolve_field(&field.name, &file_map) else {
                if field.required {
                    errors.push(ValidationError::missing(&field.name));
                }
                continue;
            };

            match self.coerce_raw(field, &raw.value, raw.origin) {
                Ok(value) => {
                    if let (Some(deprecation), false) =
                        (&field.deprecated, raw.origin == Origin::Default)
                    {
                        warnings.push(DeprecationWarning {
                            field: field.name.clone(),
                            message: deprecation.message(&field.name),
                        });
                    }
                    config.insert(&field.name, value, raw.origin, field.sensitive);
                }
                Err(e) => errors.push(e),
            }
        }

        for warning in &warnings {
            self.report_warning(warning);
        }

        Resolution { config, errors }
    }

    /// 敏感字段先解密再做类型转换；结构化 JSON 默认值直接校验
    fn coerce_raw(
        &self,
        field: &FieldSchema,
        raw: &str,
        origin: Origin,
    ) -> std::result::Result<ConfigValue, ValidationError> {
        if origin == Origin::Default && field.field_type == FieldType::Json {
            if let Some(default @ ConfigValue::Json(_)) = &field.default {
                return validator::check_typed(field, default.clone());
            }
        }

        match (&self.inner.codec, field.sensitive) {
            (Some(codec), true) if EncryptionCodec::is_encrypted(raw) => {
                let plain = codec.decrypt(raw).map_err(|e| {
                    ValidationError::new(&field.name, ErrorKind::DecryptionFailure, e.to_string())
                })?;
                validator::coerce(field, &plain)
            }
            _ => validator::coerce(field, raw),
        }
    }

    fn report_errors(&self, errors: &ValidationErrors) {
        error!("配置校验失败: {}", errors);
        if let Some(callback) = &self.inner.on_error {
            callback(errors);
        }
        self.inner.events.emit(ConfigEvent::Error(errors.clone()));
    }

    fn report_warning(&self, warning: &DeprecationWarning) {
        warn!("{}", warning.message);
        if let Some(callback) = &self.inner.on_warning {
            callback(warning);
        }
    }
}
