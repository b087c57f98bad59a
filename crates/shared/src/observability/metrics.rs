//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时，下面的记录函数均为空操作。

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::config::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    pub addr: SocketAddr,
}

/// 初始化 Prometheus 指标导出
///
/// exporter 自带 HTTP listener，在指定端口暴露抓取端点。需在 tokio 运行时内调用。
pub fn init(config: &ObservabilityConfig, service_name: &str) -> Result<MetricsHandle> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_common_metrics(service_name);
    info!("Metrics exporter listening on {}", addr);

    Ok(MetricsHandle { addr })
}

/// 注册引擎指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "rules_engine_ruleset_executions_total",
        "Total number of ruleset executions"
    );
    metrics::describe_histogram!(
        "rules_engine_ruleset_execution_duration_seconds",
        "Ruleset execution duration in seconds"
    );
    metrics::describe_counter!(
        "rules_engine_fact_updates_total",
        "Total number of accepted fact updates"
    );
    metrics::describe_counter!(
        "rules_engine_catalog_loads_total",
        "Total number of catalog load attempts"
    );
    metrics::describe_gauge!(
        "rules_engine_active_rulesets",
        "Number of rulesets currently producing actions"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次规则集执行
#[inline]
pub fn record_ruleset_execution(status: &str, duration: Duration) {
    metrics::counter!(
        "rules_engine_ruleset_executions_total",
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!("rules_engine_ruleset_execution_duration_seconds")
        .record(duration.as_secs_f64());
}

/// 记录事实更新
#[inline]
pub fn record_fact_update() {
    metrics::counter!("rules_engine_fact_updates_total").increment(1);
}

/// 记录规则目录加载结果（ok / rejected）
#[inline]
pub fn record_catalog_load(result: &str) {
    metrics::counter!("rules_engine_catalog_loads_total", "result" => result.to_string())
        .increment(1);
}

/// 更新活跃规则集数量
#[inline]
pub fn set_active_rulesets(count: usize) {
    metrics::gauge!("rules_engine_active_rulesets").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_ruleset_execution("ok", Duration::from_millis(3));
        record_fact_update();
        record_catalog_load("rejected");
        set_active_rulesets(2);
    }
}
