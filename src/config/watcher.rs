//! 配置文件监控模块
//!
//! 监控配置文件所在目录，文件变更经防抖动合并后触发存储重载

use crate::config::manager::WeakConfigStore;
use crate::error::{EnvStoreError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 事件通道容量，溢出的事件会被丢弃（防抖窗口内本就会合并）
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 配置文件监控器
///
/// 后台任务只持有存储的弱引用，存储释放后任务自行退出。
pub struct ChangeWatcher {
    /// 被监控的配置文件
    config_path: PathBuf,
    /// 文件系统监控器
    watcher: Option<RecommendedWatcher>,
    /// 事件处理任务
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("config_path", &self.config_path)
            .field("active", &self.watcher.is_some())
            .finish()
    }
}

impl ChangeWatcher {
    /// 启动配置文件监控
    ///
    /// # 参数
    /// * `config_path` - 配置文件路径，文件本身可以暂不存在
    /// * `debounce` - 防抖动窗口
    /// * `store` - 变更后需要重载的存储
    pub fn start(config_path: &Path, debounce: Duration, store: WeakConfigStore) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EnvStoreError::Options(format!("文件监控需要 tokio 运行时: {e}")))?;

        let config_path = absolute_path(config_path)?;
        let file_name = config_path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| {
                EnvStoreError::Options(format!("无效的配置文件路径: {}", config_path.display()))
            })?;

        // 监控配置文件所在目录，原子替换（rename）也能被捕获
        let watch_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.try_send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        let task = runtime.spawn(Self::handle_file_events(rx, file_name, debounce, store));

        info!("配置文件监控已启动: {}", config_path.display());
        Ok(Self {
            config_path,
            watcher: Some(watcher),
            task: Some(task),
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 处理文件系统事件
    async fn handle_file_events(
        mut rx: mpsc::Receiver<notify::Result<Event>>,
        file_name: OsString,
        debounce: Duration,
        store: WeakConfigStore,
    ) {
        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("文件监控事件错误: {}", e);
                    continue;
                }
            };

            if !is_target_file_event(&event, &file_name) {
                continue;
            }
            debug!("检测到配置文件变更事件: {:?}", event.kind);

            // 窗口内持续有事件则继续等待，直到安静一个完整窗口
            loop {
                match tokio::time::timeout(debounce, rx.recv()).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            let Some(store) = store.upgrade() else {
                debug!("配置存储已释放，监控任务退出");
                return;
            };
            if let Err(e) = store.reload().await {
                warn!("文件变更后重载失败: {}", e);
            }
        }
        debug!("文件监控事件通道已关闭");
    }

    /// 停止监控
    pub fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            info!("配置文件监控已停止: {}", self.config_path.display());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| EnvStoreError::io(path, e))?;
    Ok(cwd.join(path))
}

/// 是否为目标文件的内容变更
fn is_target_file_event(event: &Event, file_name: &OsString) -> bool {
    match &event.kind {
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str())),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_target_file_event_filter() {
        let name = OsString::from(".env");

        assert!(is_target_file_event(
            &event(EventKind::Modify(ModifyKind::Any), "/app/.env"),
            &name
        ));
        assert!(is_target_file_event(
            &event(EventKind::Create(CreateKind::File), "/app/.env"),
            &name
        ));
        assert!(!is_target_file_event(
            &event(EventKind::Modify(ModifyKind::Any), "/app/.env.tmp"),
            &name
        ));
        assert!(!is_target_file_event(
            &event(EventKind::Access(AccessKind::Any), "/app/.env"),
            &name
        ));
    }

    #[test]
    fn test_absolute_path() {
        let abs = absolute_path(Path::new("config/.env")).unwrap();
        assert!(abs.is_absolute());
        assert!(abs.ends_with("config/.env"));
    }
}
