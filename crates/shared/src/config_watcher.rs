//! 配置热更新模块
//!
//! 提供 `ConfigWatcher` trait 和基于文件系统事件的实现，支持运行时重新加载
//! 规则集目录、元数据或事实文件。
//!
//! ## 架构设计
//!
//! ```text
//! ConfigWatcher trait
//!  └── FileWatcher — 基于 notify 的文件事件，debounce 后调用 reload 回调
//! ```
//!
//! 回调失败时保留当前生效的内容，由调用方决定如何原子替换。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 重新加载回调
pub type ReloadFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// 配置监听器抽象
#[async_trait]
pub trait ConfigWatcher: Send + Sync {
    /// 启动监听，内容变更时触发重新加载
    async fn start(&self) -> Result<()>;

    /// 停止监听并释放资源
    async fn stop(&self) -> Result<()>;
}

/// 基于文件系统事件的监听器
///
/// 使用 `notify` crate 监听文件所在目录（编辑器常以 rename 方式写入），
/// 只对目标文件的事件做出反应，经 debounce 窗口去抖后调用回调。
pub struct FileWatcher {
    /// 监听名称，用于日志
    name: String,
    /// 监听的文件路径
    watch_path: PathBuf,
    /// debounce 窗口，避免文件连续写入触发多次重载
    debounce: Duration,
    /// 变更回调
    on_change: ReloadFn,
    /// 持有原生 watcher，drop 即停止监听
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FileWatcher {
    pub fn new(
        name: impl Into<String>,
        watch_path: impl AsRef<Path>,
        debounce: Duration,
        on_change: ReloadFn,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            name: name.into(),
            watch_path: watch_path.as_ref().to_path_buf(),
            debounce,
            on_change,
            watcher: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// 监听的文件路径
    pub fn path(&self) -> &Path {
        &self.watch_path
    }

    /// 是否处于监听状态
    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    fn watch_dir(&self) -> PathBuf {
        match self.watch_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl ConfigWatcher for FileWatcher {
    async fn start(&self) -> Result<()> {
        use notify::{EventKind, RecursiveMode, Watcher};

        if self.is_watching() {
            warn!(watcher = %self.name, "文件监听已在运行");
            return Ok(());
        }

        // notify 事件通过 channel 转发到 tokio 异步任务
        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<()>(16);
        let target = self.watch_path.file_name().map(|n| n.to_os_string());
        let name = self.name.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let relevant = matches!(
                            event.kind,
                            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                        );
                        let touches_target = event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == target);
                        if relevant && touches_target {
                            let _ = event_tx.try_send(());
                        }
                    }
                    Err(e) => {
                        warn!(watcher = %name, error = %e, "文件监听器事件错误");
                    }
                }
            })
            .context("创建文件监听器失败")?;

        let watch_dir = self.watch_dir();
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("启动文件监听失败: {}", watch_dir.display()))?;
        *self.watcher.lock() = Some(watcher);

        info!(watcher = %self.name, path = %self.watch_path.display(), "文件监听已启动");

        let name = self.name.clone();
        let debounce = self.debounce;
        let on_change = self.on_change.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        // 异步 debounce 循环：收到文件事件后等待 debounce 窗口再重载
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(()) = event_rx.recv() => {
                        tokio::time::sleep(debounce).await;
                        // 清空积压的重复事件
                        while event_rx.try_recv().is_ok() {}

                        match on_change() {
                            Ok(()) => info!(watcher = %name, "文件变更，已重新加载"),
                            Err(e) => error!(
                                watcher = %name,
                                error = %e,
                                "文件重新加载失败，保留当前内容"
                            ),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(watcher = %name, "文件监听已停止");
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.watcher.lock().take();
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }
}
