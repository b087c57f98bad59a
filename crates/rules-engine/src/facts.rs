//! 事实注册表
//!
//! 每个事实对应一个槽位：ArcSwap 保存最新值，watch channel 通知订阅者。
//! - 新值与旧值结构相等时不会发出通知
//! - 新订阅者先拿到当前值（若已有值），之后只收到变化
//! - 尚无值的事实订阅后不会发出任何值，不视为错误
//!
//! 事实提供者在事实首次被订阅时惰性激活，其产出的值经 [`FactRegistry::publish`] 写入。

use arc_swap::ArcSwapOption;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use rules_shared::observability::metrics;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast, watch};
use tracing::{debug, info, warn};

use crate::models::FactSnapshot;

/// 事实提供者
///
/// `open` 在事实首次被订阅时调用一次，返回的流中每个值都会发布到注册表。
pub trait FactProvider: Send + Sync {
    fn open(&self, fact_name: &str) -> BoxStream<'static, Value>;
}

struct FactSlot {
    name: String,
    value: ArcSwapOption<Value>,
    version: watch::Sender<u64>,
    /// 串行化同一事实的比较和写入
    write: Mutex<()>,
    activated: AtomicBool,
}

impl FactSlot {
    fn new(name: &str) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            name: name.to_string(),
            value: ArcSwapOption::empty(),
            version,
            write: Mutex::new(()),
            activated: AtomicBool::new(false),
        }
    }
}

struct RegistryInner {
    slots: DashMap<String, Arc<FactSlot>>,
    providers: DashMap<String, Arc<dyn FactProvider>>,
    changes: broadcast::Sender<String>,
    wake: Arc<Notify>,
}

/// 事实注册表
#[derive(Clone)]
pub struct FactRegistry {
    inner: Arc<RegistryInner>,
}

impl FactRegistry {
    /// `capacity` 为变更通知 channel 容量，溢出时订阅方会收到 Lagged
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(RegistryInner {
                slots: DashMap::new(),
                providers: DashMap::new(),
                changes,
                wake: Arc::new(Notify::new()),
            }),
        }
    }

    /// 发布事实新值，返回值是否发生变化
    pub fn publish(&self, name: &str, value: Value) -> bool {
        let slot = self.slot(name);
        {
            let _guard = slot.write.lock();
            let current = slot.value.load();
            if current.as_deref() == Some(&value) {
                return false;
            }
            slot.value.store(Some(Arc::new(value)));
            slot.version.send_modify(|version| *version += 1);
        }

        // 没有订阅者时发送失败，忽略即可
        let _ = self.inner.changes.send(name.to_string());
        self.inner.wake.notify_one();
        metrics::record_fact_update();
        debug!(fact = name, "事实已更新");
        true
    }

    /// 获取事实流，必要时创建槽位并激活提供者
    pub fn retrieve_or_create_fact_stream(&self, name: &str) -> FactStream {
        let slot = self.ensure_slot(name);
        let version = slot.version.subscribe();
        FactStream { slot, version }
    }

    /// 注册事实提供者；事实已被订阅时立即激活
    pub fn register_fact_provider(&self, name: &str, provider: Arc<dyn FactProvider>) {
        if self.inner.providers.insert(name.to_string(), provider).is_some() {
            warn!(fact = name, "事实提供者被替换，已激活的旧提供者不会停止");
        }
        let slot = self.inner.slots.get(name).map(|s| s.value().clone());
        if let Some(slot) = slot {
            self.activate(&slot);
        }
    }

    /// 确保事实槽位存在（视作一次订阅）
    pub fn ensure(&self, name: &str) {
        self.ensure_slot(name);
    }

    /// 事实当前值
    pub fn get(&self, name: &str) -> Option<Arc<Value>> {
        self.inner
            .slots
            .get(name)
            .and_then(|slot| slot.value.load_full())
    }

    /// 读取一组事实的一致快照，尚无值的事实不出现在结果中
    pub fn snapshot<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> FactSnapshot {
        names
            .into_iter()
            .filter_map(|name| self.get(name).map(|v| (name.clone(), (*v).clone())))
            .collect()
    }

    /// 已知事实名（排序）
    pub fn fact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.slots.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// 订阅事实变更（事实名）
    pub fn subscribe_changes(&self) -> broadcast::Receiver<String> {
        self.inner.changes.subscribe()
    }

    pub(crate) fn notifier(&self) -> Arc<Notify> {
        self.inner.wake.clone()
    }

    fn slot(&self, name: &str) -> Arc<FactSlot> {
        self.inner
            .slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FactSlot::new(name)))
            .value()
            .clone()
    }

    fn ensure_slot(&self, name: &str) -> Arc<FactSlot> {
        let slot = self.slot(name);
        self.activate(&slot);
        slot
    }

    fn activate(&self, slot: &Arc<FactSlot>) {
        let provider = match self.inner.providers.get(&slot.name) {
            Some(provider) => provider.value().clone(),
            None => return,
        };
        if slot.activated.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                slot.activated.store(false, Ordering::SeqCst);
                warn!(fact = %slot.name, "当前不在 tokio 运行时中，事实提供者延后激活");
                return;
            }
        };

        let mut values = provider.open(&slot.name);
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let name = slot.name.clone();
        info!(fact = %name, "事实提供者已激活");

        handle.spawn(async move {
            while let Some(value) = values.next().await {
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                FactRegistry { inner }.publish(&name, value);
            }
            debug!(fact = %name, "事实提供者流已结束");
        });
    }
}

impl Default for FactRegistry {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// 单个事实的订阅句柄
pub struct FactStream {
    slot: Arc<FactSlot>,
    version: watch::Receiver<u64>,
}

impl FactStream {
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// 当前值
    pub fn latest(&self) -> Option<Arc<Value>> {
        self.slot.value.load_full()
    }

    /// 等待下一次变化并返回新值
    pub async fn changed(&mut self) -> Option<Arc<Value>> {
        loop {
            self.version.changed().await.ok()?;
            if let Some(value) = self.latest() {
                return Some(value);
            }
        }
    }

    /// 转换为值流：先重放当前值，之后只在值变化时产出
    pub fn into_stream(self) -> BoxStream<'static, Arc<Value>> {
        let pending = self.latest();
        futures::stream::unfold(
            (self, pending, None::<Arc<Value>>),
            |(mut stream, pending, last)| async move {
                if let Some(value) = pending {
                    return Some((value.clone(), (stream, None, Some(value))));
                }
                loop {
                    let value = stream.changed().await?;
                    if last.as_deref() != Some(value.as_ref()) {
                        return Some((value.clone(), (stream, None, Some(value))));
                    }
                }
            },
        )
        .boxed()
    }
}

/// `currentTime` 提供者：按固定周期产出 epoch 毫秒
pub struct ClockFactProvider {
    period: Duration,
}

impl ClockFactProvider {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl FactProvider for ClockFactProvider {
    fn open(&self, _fact_name: &str) -> BoxStream<'static, Value> {
        let period = self.period;
        futures::stream::unfold(None, move |interval: Option<tokio::time::Interval>| async move {
            let mut interval = interval.unwrap_or_else(|| tokio::time::interval(period));
            interval.tick().await;
            Some((Value::from(Utc::now().timestamp_millis()), Some(interval)))
        })
        .boxed()
    }
}
