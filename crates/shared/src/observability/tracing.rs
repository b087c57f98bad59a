//! 日志初始化模块
//!
//! 基于 tracing-subscriber，支持 JSON 结构化输出和人类可读输出两种格式。
//! `RUST_LOG` 优先于配置文件中的 `log_level`。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// Tracing 资源守卫
///
/// 全局 subscriber 只能安装一次，守卫标记当前进程已完成安装。
pub struct TracingGuard {
    _private: (),
}

/// 构建环境过滤器
pub fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化 tracing（日志）
pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let env_filter = build_filter(config);

    let fmt_layer = if config.json_logs() {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(TracingGuard { _private: () })
}
