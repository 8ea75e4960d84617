//! 已解析配置快照与缓存
//!
//! 缓存槽只做整体替换：新快照在槽外完整计算后一次性换入，读者永远不会
//! 看到半更新状态

use crate::config::loader::Origin;
use crate::config::types::ConfigValue;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// 敏感字段在诊断输出中的占位符
pub const REDACTED: &str = "******";

/// 一次完整解析得到的类型化配置
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    values: HashMap<String, ConfigValue>,
    origins: HashMap<String, Origin>,
    sensitive: HashSet<String>,
    order: Vec<String>,
    /// 快照版本号，每次成功解析递增
    pub version: u64,
    /// 解析完成时间
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedConfig {
    pub(crate) fn new(version: u64) -> Self {
        Self {
            values: HashMap::new(),
            origins: HashMap::new(),
            sensitive: HashSet::new(),
            order: Vec::new(),
            version,
            resolved_at: Utc::now(),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, value: ConfigValue, origin: Origin, sensitive: bool) {
        if !self.values.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.values.insert(key.to_string(), value);
        self.origins.insert(key.to_string(), origin);
        if sensitive {
            self.sensitive.insert(key.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// 字段值的来源
    pub fn origin(&self, key: &str) -> Option<Origin> {
        self.origins.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按 schema 顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.order
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v)))
    }

    /// 转换为 JSON 对象
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// 敏感字段打码后的字符串映射，用于日志和诊断
    pub fn redacted(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| {
                let shown = if self.sensitive.contains(k) {
                    REDACTED.to_string()
                } else {
                    v.to_persisted_string()
                };
                (k.to_string(), shown)
            })
            .collect()
    }
}

/// 单槽缓存
#[derive(Debug, Default)]
pub struct ResolvedCache {
    slot: ArcSwapOption<ResolvedConfig>,
}

impl ResolvedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前快照
    pub fn load(&self) -> Option<Arc<ResolvedConfig>> {
        self.slot.load_full()
    }

    /// 换入新快照
    pub fn store(&self, config: Arc<ResolvedConfig>) {
        debug!("缓存快照已替换，版本: {}", config.version);
        self.slot.store(Some(config));
    }

    /// 清空缓存
    pub fn invalidate(&self) {
        if self.slot.swap(None).is_some() {
            debug!("缓存已失效");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.load().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(version: u64) -> Arc<ResolvedConfig> {
        let mut config = ResolvedConfig::new(version);
        config.insert("PORT", ConfigValue::Port(80), Origin::File, false);
        config.insert("API_KEY", ConfigValue::from("secret"), Origin::ProcessEnv, true);
        Arc::new(config)
    }

    #[test]
    fn test_cache_store_load_invalidate() {
        let cache = ResolvedCache::new();
        assert!(cache.is_empty());

        let first = snapshot(1);
        cache.store(Arc::clone(&first));
        assert!(Arc::ptr_eq(&cache.load().unwrap(), &first));
        assert!(Arc::ptr_eq(&cache.load().unwrap(), &cache.load().unwrap()));

        cache.invalidate();
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_redacted_masks_sensitive() {
        let config = snapshot(1);
        let redacted = config.redacted();

        assert_eq!(redacted[0], ("PORT".to_string(), "80".to_string()));
        assert_eq!(redacted[1], ("API_KEY".to_string(), REDACTED.to_string()));
        assert_eq!(config.origin("API_KEY"), Some(Origin::ProcessEnv));
    }

    #[test]
    fn test_to_json_keeps_types() {
        let json = snapshot(1).to_json();
        assert_eq!(json["PORT"], 80);
        assert_eq!(json["API_KEY"], "secret");
    }
}
