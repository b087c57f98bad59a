//! 统一可观测性模块
//!
//! 提供 metrics 和 logging 的统一初始化。
//! 引擎进程通过单一入口点配置可观测性，确保一致的指标命名。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
///
/// 持有各种可观测性资源的生命周期，drop 时记录关闭日志。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
    _tracing_guard: Option<tracing::TracingGuard>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            _metrics_handle: None,
            _tracing_guard: None,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if self._tracing_guard.is_some() {
            info!("Shutting down observability...");
        }
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（Prometheus 指标，仅当 `metrics_enabled` 时）
///
/// # Example
///
/// ```ignore
/// use rules_shared::{config::AppConfig, observability};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("rules-engine")?;
///     let _guard = observability::init(&config.observability, &config.service_name)?;
///     Ok(())
/// }
/// ```
pub fn init(config: &ObservabilityConfig, service_name: &str) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(config, service_name)?)
    } else {
        None
    };

    info!(
        service = %service_name,
        metrics_enabled = config.metrics_enabled,
        metrics_port = config.metrics_port,
        json_logs = config.json_logs(),
        "Observability initialized"
    );

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
        _tracing_guard: Some(tracing_guard),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_guard_drops_quietly() {
        let guard = ObservabilityGuard::empty();
        drop(guard);
    }
}
