//! 规则引擎
//!
//! 组装事实注册表、目录编译器、调度器、执行器和调试记录器，对外提供：
//! - 规则目录加载（原子替换，失败时保留旧目录）
//! - 事实发布与订阅
//! - 输出动作流（watch channel，始终是按声明顺序拼接的最新结果）
//! - 调试/历史查询

use crate::compiler::{CatalogCompiler, RuleCatalog};
use crate::debug::{
    DebugEvent, DebugEventKind, EngineDebugger, RulesetExecutionDebug, RulesetSummary,
};
use crate::error::{Result, RuleError};
use crate::executor::ActionExecutor;
use crate::facts::{FactProvider, FactRegistry, FactStream};
use crate::metadata::EngineMetadata;
use crate::models::{OutputAction, RuleCatalogDefinition};
use crate::operators::{self, CURRENT_TIME_FACT, OperatorCatalog};
use crate::scheduler::{ExecutionJob, JobResult, RulesetScheduler, RulesetState};
use crate::store::CatalogStore;
use parking_lot::Mutex;
use rules_shared::config::EngineConfig;
use rules_shared::observability::metrics;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

/// 单次 `run_until_idle` 最多执行的轮次
const MAX_TICKS_PER_RUN: usize = 64;

/// 引擎选项
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 保留的执行事件上限，None 表示不限制
    pub history_limit: Option<usize>,
    /// 同一轮次内并行执行规则集
    pub parallel_evaluation: bool,
    pub fact_channel_capacity: usize,
    /// 在执行结果中记录块遍历追踪
    pub trace_rules: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            history_limit: None,
            parallel_evaluation: false,
            fact_channel_capacity: 1024,
            trace_rules: false,
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            parallel_evaluation: config.parallel_evaluation,
            fact_channel_capacity: config.fact_channel_capacity,
            trace_rules: false,
        }
    }
}

/// 调度轮次统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub executed: usize,
    pub errors: usize,
    /// 仍有规则集等待执行
    pub pending: bool,
}

struct EngineInner {
    options: EngineOptions,
    facts: FactRegistry,
    compiler: CatalogCompiler,
    store: CatalogStore,
    scheduler: Mutex<RulesetScheduler>,
    executor: ActionExecutor,
    debugger: EngineDebugger,
    actions_tx: watch::Sender<Arc<Vec<OutputAction>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// 规则引擎
#[derive(Clone)]
pub struct RulesEngine {
    inner: Arc<EngineInner>,
}

impl RulesEngine {
    /// 使用内置操作符、开放模式元数据创建引擎
    pub fn new(options: EngineOptions) -> Self {
        Self::with_catalogs(options, operators::global(), Arc::new(EngineMetadata::default()))
    }

    /// 使用指定的操作符目录和元数据创建引擎
    pub fn with_catalogs(
        options: EngineOptions,
        operators: Arc<OperatorCatalog>,
        metadata: Arc<EngineMetadata>,
    ) -> Self {
        let facts = FactRegistry::new(options.fact_channel_capacity);
        let scheduler = RulesetScheduler::new(facts.subscribe_changes());
        let executor = if options.trace_rules {
            ActionExecutor::new().with_trace()
        } else {
            ActionExecutor::new()
        };
        let (actions_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(EngineInner {
                debugger: EngineDebugger::new(options.history_limit),
                options,
                facts,
                compiler: CatalogCompiler::new(operators, metadata),
                store: CatalogStore::new(),
                scheduler: Mutex::new(scheduler),
                executor,
                actions_tx,
                shutdown_tx,
            }),
        }
    }

    // ==================== 规则目录 ====================

    /// 加载规则目录；校验失败时整个目录被拒绝，当前目录保持不变
    #[instrument(skip(self, definition), fields(rulesets = definition.rulesets.len()))]
    pub fn load_catalog(&self, definition: &RuleCatalogDefinition) -> Result<Arc<RuleCatalog>> {
        let compiled = self
            .inner
            .compiler
            .compile(definition)
            .map_err(|e| self.rejected(e))?;
        Ok(self.install(compiled))
    }

    /// 从 JSON 字符串加载规则目录
    pub fn load_catalog_json(&self, json: &str) -> Result<Arc<RuleCatalog>> {
        let definition =
            RuleCatalogDefinition::from_json(json).map_err(|e| self.rejected(e.into()))?;
        self.load_catalog(&definition)
    }

    /// 从文件加载规则目录
    pub fn load_catalog_file(&self, path: impl AsRef<Path>) -> Result<Arc<RuleCatalog>> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| self.rejected(e.into()))?;
        self.load_catalog_json(&content)
    }

    /// 当前生效的目录
    pub fn catalog(&self) -> Arc<RuleCatalog> {
        self.inner.store.load()
    }

    fn rejected(&self, err: RuleError) -> RuleError {
        metrics::record_catalog_load("rejected");
        warn!(
            code = err.code(),
            error = %err,
            version = self.inner.store.version(),
            "规则目录被拒绝，继续使用当前目录"
        );
        err
    }

    fn install(&self, compiled: RuleCatalog) -> Arc<RuleCatalog> {
        let catalog = {
            let mut scheduler = self.inner.scheduler.lock();
            let catalog = self.inner.store.install(compiled);
            scheduler.install_catalog(&catalog);
            for fact in scheduler.watched_facts() {
                self.inner.facts.ensure(&fact);
            }
            // 时间窗口随 currentTime 更新重新检查
            if scheduler.has_validity_windows() {
                self.inner.facts.ensure(CURRENT_TIME_FACT);
            }
            self.inner.debugger.append(DebugEventKind::AvailableRulesets(
                catalog
                    .rulesets()
                    .iter()
                    .map(|r| RulesetSummary::from(r.as_ref()))
                    .collect(),
            ));
            catalog
        };

        metrics::record_catalog_load("ok");
        info!(
            version = catalog.version,
            rulesets = catalog.len(),
            "规则目录已加载"
        );
        self.inner.facts.notifier().notify_one();
        catalog
    }

    // ==================== 事实 ====================

    /// 发布事实值，返回值是否发生变化
    pub fn publish_fact(&self, name: &str, value: Value) -> bool {
        self.inner.facts.publish(name, value)
    }

    pub fn retrieve_or_create_fact_stream(&self, name: &str) -> FactStream {
        self.inner.facts.retrieve_or_create_fact_stream(name)
    }

    pub fn register_fact_provider(&self, name: &str, provider: Arc<dyn FactProvider>) {
        self.inner.facts.register_fact_provider(name, provider);
    }

    pub fn facts(&self) -> &FactRegistry {
        &self.inner.facts
    }

    // ==================== 调度 ====================

    /// 执行一轮调度
    pub fn tick(&self) -> TickSummary {
        let jobs = self.inner.scheduler.lock().begin_tick(&self.inner.facts);
        let results = self.run_jobs(jobs);

        let mut report = {
            let mut scheduler = self.inner.scheduler.lock();
            let mut report = scheduler.complete_tick(results);
            // 持锁追加，保证调试日志顺序与调度顺序一致
            for event in std::mem::take(&mut report.events) {
                self.record_execution(&event);
                self.inner.debugger.append(event);
            }
            if let Some(active) = report.active_rulesets.take() {
                metrics::set_active_rulesets(active.len());
                self.inner
                    .debugger
                    .append(DebugEventKind::ActiveRulesets(active));
            }
            report
        };

        let output_actions = std::mem::take(&mut report.output_actions);
        self.inner.actions_tx.send_if_modified(|current| {
            if current.as_slice() == output_actions.as_slice() {
                return false;
            }
            *current = Arc::new(output_actions);
            true
        });

        TickSummary {
            executed: report.executed,
            errors: report.errors,
            pending: report.more_pending,
        }
    }

    /// 连续调度直到没有待执行的规则集
    pub fn run_until_idle(&self) -> TickSummary {
        let mut total = TickSummary::default();
        for _ in 0..MAX_TICKS_PER_RUN {
            let summary = self.tick();
            total.executed += summary.executed;
            total.errors += summary.errors;
            total.pending = summary.pending;
            if !summary.pending {
                break;
            }
        }
        total
    }

    /// 调度循环：事实变化或目录加载时唤醒，直到 [`RulesEngine::stop`]
    pub async fn run(&self) {
        let wake = self.inner.facts.notifier();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        info!(
            parallel = self.inner.options.parallel_evaluation,
            "规则引擎调度循环已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // 让出一次，同一批事实变化合并到同一轮
            tokio::task::yield_now().await;

            let engine = self.clone();
            let pending = match tokio::task::spawn_blocking(move || engine.run_until_idle()).await {
                Ok(summary) => {
                    if summary.executed > 0 {
                        debug!(
                            executed = summary.executed,
                            errors = summary.errors,
                            "调度完成"
                        );
                    }
                    summary.pending
                }
                Err(e) => {
                    error!(error = %e, "调度任务异常退出");
                    false
                }
            };
            if pending {
                continue;
            }

            tokio::select! {
                _ = wake.notified() => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("规则引擎调度循环已停止");
    }

    /// 停止调度循环
    pub fn stop(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }

    fn run_jobs(&self, jobs: Vec<ExecutionJob>) -> Vec<JobResult> {
        let executor = &self.inner.executor;
        if self.inner.options.parallel_evaluation && jobs.len() > 1 {
            // 完成顺序不影响结果顺序，complete_tick 会按声明顺序重排
            std::thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .into_iter()
                    .map(|job| {
                        let fallback = job.clone();
                        (fallback, scope.spawn(move || RulesetScheduler::execute_job(executor, job)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(fallback, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            error!(ruleset = %fallback.ruleset.id, "规则集工作线程异常退出");
                            JobResult::worker_failed(fallback, "worker thread failed")
                        })
                    })
                    .collect()
            })
        } else {
            jobs.into_iter()
                .map(|job| RulesetScheduler::execute_job(executor, job))
                .collect()
        }
    }

    fn record_execution(&self, event: &DebugEventKind) {
        let Some((execution, is_error)) = event.execution() else {
            return;
        };
        let duration = Duration::from_secs_f64(execution.duration_ms / 1000.0);

        if is_error {
            metrics::record_ruleset_execution("error", duration);
            warn!(
                ruleset = %execution.ruleset_id,
                execution_id = %execution.execution_id,
                rules = ?execution.rules_causing_the_error,
                errors = ?execution.errors,
                "规则集执行失败"
            );
        } else {
            metrics::record_ruleset_execution("ok", duration);
            debug!(
                ruleset = %execution.ruleset_id,
                execution_id = %execution.execution_id,
                actions = execution.output_actions.len(),
                duration_ms = execution.duration_ms,
                "规则集执行完成"
            );
        }
    }

    // ==================== 输出与调试 ====================

    /// 订阅输出动作
    pub fn subscribe_actions(&self) -> watch::Receiver<Arc<Vec<OutputAction>>> {
        self.inner.actions_tx.subscribe()
    }

    /// 当前输出动作
    pub fn current_actions(&self) -> Arc<Vec<OutputAction>> {
        self.inner.actions_tx.borrow().clone()
    }

    // ==================== 按需激活 ====================

    /// 组件开始使用，关联该组件（`library#name`）的规则集在下一轮生效
    pub fn activate_component(&self, key: &str) {
        let count = self.inner.scheduler.lock().activate_component(key);
        debug!(component = key, count, "组件已激活");
        self.inner.facts.notifier().notify_one();
    }

    /// 组件停止使用；计数归零后关联的规则集停止生效并撤回输出动作
    pub fn deactivate_component(&self, key: &str) {
        let count = self.inner.scheduler.lock().deactivate_component(key);
        debug!(component = key, count, "组件已停用");
        self.inner.facts.notifier().notify_one();
    }

    /// 当前参与调度的规则集（时间窗口内或关联组件已激活）
    pub fn enabled_rulesets(&self) -> Vec<String> {
        self.inner.scheduler.lock().enabled_rulesets()
    }

    pub fn ruleset_state(&self, ruleset_id: &str) -> Option<RulesetState> {
        self.inner.scheduler.lock().state(ruleset_id)
    }

    pub fn debugger(&self) -> &EngineDebugger {
        &self.inner.debugger
    }

    pub fn subscribe_debug_events(&self) -> broadcast::Receiver<Arc<DebugEvent>> {
        self.inner.debugger.subscribe()
    }

    pub fn available_rulesets(&self) -> Vec<RulesetSummary> {
        self.inner.debugger.available_rulesets()
    }

    pub fn active_rulesets(&self) -> Vec<String> {
        self.inner.debugger.active_rulesets()
    }

    pub fn history(&self, ruleset_id: Option<&str>) -> Vec<RulesetExecutionDebug> {
        self.inner.debugger.history(ruleset_id)
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}
