//! 规则目录存储
//!
//! 当前生效的目录通过 ArcSwap 原子替换：读取方拿到的始终是完整的一版目录，
//! 加载失败时旧目录保持不变。

use crate::compiler::{CompiledRuleset, RuleCatalog};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, instrument};

/// 规则目录存储
pub struct CatalogStore {
    current: ArcSwap<RuleCatalog>,
    version: AtomicU64,
}

impl CatalogStore {
    /// 以空目录（版本 0）初始化
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleCatalog::default()),
            version: AtomicU64::new(0),
        }
    }

    /// 当前目录
    pub fn load(&self) -> Arc<RuleCatalog> {
        self.current.load_full()
    }

    /// 安装新目录，分配递增版本号
    #[instrument(skip(self, catalog), fields(rulesets = catalog.len()))]
    pub fn install(&self, mut catalog: RuleCatalog) -> Arc<RuleCatalog> {
        catalog.version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let catalog = Arc::new(catalog);
        self.current.store(catalog.clone());
        info!("规则目录已切换: 版本 {}", catalog.version);
        catalog
    }

    /// 当前版本号
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// 按 ID 查找当前目录中的规则集
    pub fn ruleset(&self, ruleset_id: &str) -> Option<Arc<CompiledRuleset>> {
        self.current.load().get(ruleset_id).cloned()
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}
