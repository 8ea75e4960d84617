//! 配置事件分发
//!
//! 处理器按注册顺序同步调用，且只在状态变更完成（缓存已替换、文件已写入）
//! 之后触发；同时通过 broadcast 通道向异步订阅者转发

use crate::config::cache::ResolvedConfig;
use crate::config::types::ConfigValue;
use crate::error::ValidationErrors;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Reload,
    Update,
    Error,
}

/// 配置事件
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// 热重载成功
    Reload(Arc<ResolvedConfig>),
    /// 单字段更新成功
    Update { key: String, value: ConfigValue },
    /// 解析失败的错误批次
    Error(ValidationErrors),
}

impl ConfigEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConfigEvent::Reload(_) => EventKind::Reload,
            ConfigEvent::Update { .. } => EventKind::Update,
            ConfigEvent::Error(_) => EventKind::Error,
        }
    }
}

/// 事件处理器
pub type EventHandler = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

/// 事件总线
pub struct EventBus {
    handlers: RwLock<Vec<(EventKind, EventHandler)>>,
    sender: broadcast::Sender<ConfigEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("handlers", &count).finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(32);
        Self {
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// 注册处理器
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push((kind, Arc::new(handler)));
    }

    /// 订阅全部事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.sender.subscribe()
    }

    /// 按注册顺序调用匹配的处理器，然后广播
    pub fn emit(&self, event: ConfigEvent) {
        let kind = event.kind();
        // 先复制处理器列表，处理器内部可以继续注册
        let matching: Vec<EventHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };

        debug!("分发事件 {:?} 给 {} 个处理器", kind, matching.len());
        for handler in matching {
            handler(&event);
        }

        if self.sender.receiver_count() > 0 {
            if let Err(e) = self.sender.send(event) {
                warn!("广播配置事件失败: {}", e);
            }
        }
    }
}
