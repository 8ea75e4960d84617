//! 环境变量来源
//!
//! 将进程级环境变量抽象为可注入的读写接口，便于测试时替换

use std::collections::HashMap;
use std::sync::RwLock;

/// 环境变量读写接口
///
/// `update()` 写入的覆盖值在进程生命周期内保留，本库只增不删。
pub trait EnvSource: Send + Sync {
    /// 读取变量，未设置时返回 `None`
    fn read(&self, key: &str) -> Option<String>;

    /// 写入变量
    fn write(&self, key: &str, value: &str);
}

/// 真实进程环境
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn read(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn write(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

/// 内存环境，用于测试或隔离运行
#[derive(Debug, Default)]
pub struct MemoryEnv {
    vars: RwLock<HashMap<String, String>>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: RwLock::new(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl EnvSource for MemoryEnv {
    fn read(&self, key: &str) -> Option<String> {
        let vars = self.vars.read().unwrap_or_else(|e| e.into_inner());
        vars.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) {
        let mut vars = self.vars.write().unwrap_or_else(|e| e.into_inner());
        vars.insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_memory_env_read_write() {
        let env = MemoryEnv::with_vars([("A", "1")]);
        assert_eq!(env.read("A"), Some("1".to_string()));
        assert_eq!(env.read("B"), None);

        env.write("B", "2");
        assert_eq!(env.read("B"), Some("2".to_string()));
    }

    #[test]
    #[serial]
    fn test_process_env_write_visible() {
        let env = ProcessEnv;
        env.write("ENVKEEPER_TEST_PROCESS_ENV", "on");
        assert_eq!(
            std::env::var("ENVKEEPER_TEST_PROCESS_ENV").unwrap(),
            "on".to_string()
        );
        assert_eq!(env.read("ENVKEEPER_TEST_PROCESS_ENV"), Some("on".to_string()));
        std::env::remove_var("ENVKEEPER_TEST_PROCESS_ENV");
    }
}
