//! 规则引擎服务
//!
//! 加载配置、元数据和规则目录，运行调度循环并输出动作变化，文件变化时热更新。

use anyhow::{Context, Result};
use rules_engine::facts::ClockFactProvider;
use rules_engine::operators::{self, CURRENT_TIME_FACT};
use rules_engine::watcher::{self, load_facts_file};
use rules_engine::{EngineMetadata, EngineOptions, RulesEngine};
use rules_shared::config::AppConfig;
use rules_shared::config_watcher::{ConfigWatcher, FileWatcher};
use rules_shared::observability;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 配置加载顺序：config/default.toml -> config/{env}.toml -> config/rules-engine.toml -> RULES_* 环境变量
    let config = AppConfig::load("rules-engine").context("加载配置失败")?;
    let _guard = observability::init(&config.observability, &config.service_name)?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        "Starting rules-engine service..."
    );

    let metadata = match &config.engine.metadata_path {
        Some(path) => EngineMetadata::from_file(path)
            .with_context(|| format!("加载元数据失败: {}", path.display()))?,
        None => {
            warn!("未配置元数据文件，动作类型不做校验");
            EngineMetadata::default()
        }
    };
    info!(
        actions = metadata.actions.len(),
        facts = metadata.facts.len(),
        "Metadata loaded"
    );

    let engine = RulesEngine::with_catalogs(
        EngineOptions::from(&config.engine),
        operators::global(),
        Arc::new(metadata),
    );
    engine.register_fact_provider(
        CURRENT_TIME_FACT,
        Arc::new(ClockFactProvider::new(Duration::from_secs(1))),
    );

    if let Some(path) = &config.engine.facts_path {
        let count = load_facts_file(&engine, path)?;
        info!(count, "Seed facts loaded");
    }

    match &config.engine.catalog_path {
        Some(path) => {
            let catalog = engine
                .load_catalog_file(path)
                .with_context(|| format!("加载规则目录失败: {}", path.display()))?;
            info!(rulesets = catalog.len(), "Rule catalog loaded");
        }
        None => warn!("未配置规则目录，引擎以空目录启动"),
    }

    let mut watchers: Vec<FileWatcher> = Vec::new();
    if config.engine.watch_files {
        let debounce = config.watch_debounce();
        if let Some(path) = &config.engine.catalog_path {
            watchers.push(watcher::catalog_watcher(engine.clone(), path, debounce));
        }
        if let Some(path) = &config.engine.facts_path {
            watchers.push(watcher::facts_watcher(engine.clone(), path, debounce));
        }
        for watcher in &watchers {
            watcher.start().await?;
        }
    }

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    // 输出动作由宿主分发，这里只记录变化
    let mut actions = engine.subscribe_actions();
    let dispatcher = tokio::spawn(async move {
        while actions.changed().await.is_ok() {
            let current = actions.borrow_and_update().clone();
            match serde_json::to_string(current.as_ref()) {
                Ok(json) => info!(count = current.len(), actions = %json, "Output actions updated"),
                Err(e) => error!(error = %e, "输出动作序列化失败"),
            }
        }
    });

    shutdown_signal().await;

    for watcher in &watchers {
        if let Err(e) = watcher.stop().await {
            warn!(error = %e, "停止文件监听失败");
        }
    }
    engine.stop();
    if let Err(e) = runner.await {
        error!(error = %e, "调度循环异常退出");
    }
    dispatcher.abort();

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
