//! 规则目录和事实文件的热更新
//!
//! 基于共享库的 [`FileWatcher`]：文件变化（debounce 之后）时重新加载。
//! 目录重新加载失败时引擎继续使用旧目录。

use crate::engine::RulesEngine;
use anyhow::Context;
use rules_shared::config_watcher::FileWatcher;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 监听规则目录文件
pub fn catalog_watcher(engine: RulesEngine, path: impl AsRef<Path>, debounce: Duration) -> FileWatcher {
    let catalog_path: PathBuf = path.as_ref().to_path_buf();
    FileWatcher::new(
        "rule-catalog",
        path.as_ref(),
        debounce,
        Arc::new(move || -> anyhow::Result<()> {
            let catalog = engine
                .load_catalog_file(&catalog_path)
                .with_context(|| format!("重新加载规则目录失败: {}", catalog_path.display()))?;
            info!(version = catalog.version, "规则目录已热更新");
            Ok(())
        }),
    )
}

/// 监听事实文件
pub fn facts_watcher(engine: RulesEngine, path: impl AsRef<Path>, debounce: Duration) -> FileWatcher {
    let facts_path: PathBuf = path.as_ref().to_path_buf();
    FileWatcher::new(
        "facts",
        path.as_ref(),
        debounce,
        Arc::new(move || -> anyhow::Result<()> {
            let changed = load_facts_file(&engine, &facts_path)?;
            info!(changed, "事实文件已重新加载");
            Ok(())
        }),
    )
}

/// 从 JSON 对象文件（事实名 -> 值）发布事实，返回发生变化的事实数量
pub fn load_facts_file(engine: &RulesEngine, path: impl AsRef<Path>) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取事实文件失败: {}", path.display()))?;
    let facts: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("事实文件必须是 JSON 对象: {}", path.display()))?;

    Ok(facts
        .into_iter()
        .filter(|(name, value)| engine.publish_fact(name, value.clone()))
        .count())
}
