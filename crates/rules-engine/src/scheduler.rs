//! 规则集调度器
//!
//! 每个规则集一个状态机：`Idle -> Scheduled -> Evaluating -> Idle`（失败时停在 `Errored`）。
//!
//! 调度以"轮次"为单位：
//! 1. `begin_tick` 取走所有待执行的规则集，对每个规则集读取其监听事实的一致快照
//! 2. 调用方执行返回的任务（可并行，不持有调度器锁）
//! 3. `complete_tick` 按目录声明顺序回收结果，生成调试事件并汇总输出动作
//!
//! 同一轮次内到达的多次事实变化合并为一次执行；执行期间到达的变化只会再触发一次后续执行。
//!
//! 每轮开始时按当前时间（`currentTime` 事实，缺失时取系统时间）和组件激活计数重新计算
//! 规则集是否生效；不生效的规则集停在 `Disabled`，不执行也不贡献输出动作。

use crate::compiler::{CompiledRuleset, RuleCatalog};
use crate::debug::{DebugEventKind, FactTrigger, RulesetExecutionEvent};
use crate::executor::{ActionExecutor, RuleFailure, RulesetOutcome};
use crate::facts::FactRegistry;
use crate::models::{FactSnapshot, OutputAction};
use crate::operators::{CURRENT_TIME_FACT, parse_datetime};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

/// 规则集调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RulesetState {
    Idle,
    Scheduled,
    Evaluating,
    /// 最近一次执行失败，等待下一次触发
    Errored,
    /// 不在生效时间窗口内，或关联组件均未激活
    Disabled,
}

struct RulesetSlot {
    ruleset: Arc<CompiledRuleset>,
    state: RulesetState,
    /// 执行期间有新的事实变化
    dirty: bool,
    /// 即使输入未变化也要执行（目录刚加载）
    force: bool,
    counter: u64,
    last_inputs: Option<FactSnapshot>,
    output_actions: Vec<OutputAction>,
    active: bool,
    /// 最近一次执行是否失败
    errored: bool,
    enabled: bool,
}

impl RulesetSlot {
    fn settled_state(&self) -> RulesetState {
        if self.errored {
            RulesetState::Errored
        } else {
            RulesetState::Idle
        }
    }

    fn mark(&mut self) {
        match self.state {
            RulesetState::Idle | RulesetState::Errored => self.state = RulesetState::Scheduled,
            RulesetState::Evaluating => self.dirty = true,
            RulesetState::Scheduled | RulesetState::Disabled => {}
        }
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.state = RulesetState::Disabled;
        self.dirty = false;
        self.errored = false;
        self.active = false;
        self.output_actions.clear();
    }

    /// 重新生效时强制执行一次
    fn enable(&mut self) {
        self.enabled = true;
        self.force = true;
        self.state = RulesetState::Scheduled;
    }
}

/// 一次待执行的规则集
#[derive(Clone)]
pub struct ExecutionJob {
    pub index: usize,
    pub catalog_version: u64,
    pub ruleset: Arc<CompiledRuleset>,
    pub counter: u64,
    pub snapshot: FactSnapshot,
    pub triggers: Vec<FactTrigger>,
}

/// 任务执行结果
pub struct JobResult {
    pub job: ExecutionJob,
    pub outcome: RulesetOutcome,
    /// 执行过程中发生 panic 时的信息
    pub panic: Option<String>,
    pub duration: Duration,
}

impl JobResult {
    /// 工作线程异常退出、没有返回结果的任务
    pub fn worker_failed(job: ExecutionJob, message: impl Into<String>) -> Self {
        Self {
            job,
            outcome: RulesetOutcome::default(),
            panic: Some(message.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn is_error(&self) -> bool {
        self.panic.is_some() || self.outcome.is_error()
    }
}

/// 一轮调度的结果
#[derive(Debug, Default)]
pub struct TickReport {
    /// 按声明顺序排列的执行事件
    pub events: Vec<DebugEventKind>,
    /// 活跃规则集列表发生变化（或目录刚加载）时给出
    pub active_rulesets: Option<Vec<String>>,
    /// 所有规则集当前输出动作的拼接
    pub output_actions: Vec<OutputAction>,
    pub executed: usize,
    pub errors: usize,
    /// 仍有规则集等待执行
    pub more_pending: bool,
}

/// 规则集调度器
pub struct RulesetScheduler {
    slots: Vec<RulesetSlot>,
    by_fact: HashMap<String, Vec<usize>>,
    changes: broadcast::Receiver<String>,
    catalog_version: u64,
    last_active: Vec<String>,
    announce_active: bool,
    /// 组件键 -> 激活计数
    components: HashMap<String, usize>,
}

impl RulesetScheduler {
    /// `changes` 为事实注册表的变更订阅
    pub fn new(changes: broadcast::Receiver<String>) -> Self {
        Self {
            slots: Vec::new(),
            by_fact: HashMap::new(),
            changes,
            catalog_version: 0,
            last_active: Vec::new(),
            announce_active: false,
            components: HashMap::new(),
        }
    }

    /// 切换目录，所有规则集在下一轮强制执行一次
    pub fn install_catalog(&mut self, catalog: &RuleCatalog) {
        let mut previous: HashMap<String, RulesetSlot> = self
            .slots
            .drain(..)
            .map(|slot| (slot.ruleset.id.clone(), slot))
            .collect();

        self.slots = catalog
            .rulesets()
            .iter()
            .map(|ruleset| {
                let kept = previous.remove(&ruleset.id);
                RulesetSlot {
                    ruleset: ruleset.clone(),
                    state: RulesetState::Scheduled,
                    dirty: false,
                    force: true,
                    counter: kept.as_ref().map_or(0, |s| s.counter),
                    last_inputs: kept.as_ref().and_then(|s| s.last_inputs.clone()),
                    output_actions: kept.as_ref().map(|s| s.output_actions.clone()).unwrap_or_default(),
                    active: kept.as_ref().is_some_and(|s| s.active),
                    errored: kept.is_some_and(|s| s.errored),
                    enabled: true,
                }
            })
            .collect();

        self.by_fact.clear();
        for (index, slot) in self.slots.iter().enumerate() {
            for fact in &slot.ruleset.watched_facts {
                self.by_fact.entry(fact.clone()).or_default().push(index);
            }
        }

        // 旧的变更通知已被强制执行覆盖
        while !matches!(self.changes.try_recv(), Err(TryRecvError::Empty | TryRecvError::Closed)) {}

        self.catalog_version = catalog.version;
        self.announce_active = true;
    }

    /// 所有规则集监听的事实并集
    pub fn watched_facts(&self) -> BTreeSet<String> {
        self.by_fact.keys().cloned().collect()
    }

    pub fn state(&self, ruleset_id: &str) -> Option<RulesetState> {
        self.slots
            .iter()
            .find(|s| s.ruleset.id == ruleset_id)
            .map(|s| s.state)
    }

    pub fn has_pending(&self) -> bool {
        self.slots.iter().any(|s| s.state == RulesetState::Scheduled)
    }

    /// 当前生效（参与调度）的规则集（声明顺序）
    pub fn enabled_rulesets(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.ruleset.id.clone())
            .collect()
    }

    /// 组件激活计数加一，返回新的计数
    pub fn activate_component(&mut self, key: &str) -> usize {
        let count = self.components.entry(key.to_string()).or_default();
        *count += 1;
        *count
    }

    /// 组件激活计数减一（不低于零），返回新的计数
    pub fn deactivate_component(&mut self, key: &str) -> usize {
        match self.components.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                self.components.remove(key);
                0
            }
            None => 0,
        }
    }

    /// 是否有规则集依赖时间窗口
    pub fn has_validity_windows(&self) -> bool {
        self.slots.iter().any(|s| s.ruleset.validity.is_some())
    }

    /// 按时间窗口和组件激活计数更新规则集是否生效
    pub fn refresh_enabled(&mut self, now: DateTime<Utc>) {
        for slot in self.slots.iter_mut() {
            // 按需激活的规则集只看关联组件，不再检查时间窗口
            let enabled = if slot.ruleset.is_on_demand() {
                slot.ruleset
                    .linked_components
                    .iter()
                    .any(|key| self.components.get(key).is_some_and(|count| *count > 0))
            } else {
                slot.ruleset.is_valid_at(now)
            };

            if enabled == slot.enabled {
                continue;
            }
            if enabled {
                debug!(ruleset = %slot.ruleset.id, "规则集开始生效");
                slot.enable();
            } else {
                debug!(ruleset = %slot.ruleset.id, "规则集停止生效");
                slot.disable();
            }
        }
    }

    /// 当前活跃的规则集（声明顺序）
    pub fn active_rulesets(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.active)
            .map(|s| s.ruleset.id.clone())
            .collect()
    }

    /// 所有规则集当前输出动作，按规则集声明顺序拼接
    pub fn output_actions(&self) -> Vec<OutputAction> {
        self.slots
            .iter()
            .flat_map(|s| s.output_actions.iter().cloned())
            .collect()
    }

    /// 处理积压的事实变更通知
    pub fn drain_changes(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(fact) => {
                    if let Some(indexes) = self.by_fact.get(&fact) {
                        for index in indexes {
                            self.slots[*index].mark();
                        }
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "事实变更通知溢出，全部规则集重新调度");
                    self.slots.iter_mut().for_each(RulesetSlot::mark);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// 开始一轮调度，返回需要执行的任务（声明顺序）
    pub fn begin_tick(&mut self, facts: &FactRegistry) -> Vec<ExecutionJob> {
        self.drain_changes();
        let now = facts
            .get(CURRENT_TIME_FACT)
            .and_then(|value| parse_datetime(&value))
            .unwrap_or_else(Utc::now);
        self.refresh_enabled(now);

        let mut jobs = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != RulesetState::Scheduled {
                continue;
            }

            let snapshot = facts.snapshot(&slot.ruleset.watched_facts);
            if !slot.force && slot.last_inputs.as_ref() == Some(&snapshot) {
                // 通知到达时值已经变回原样
                slot.state = slot.settled_state();
                continue;
            }

            slot.force = false;
            slot.counter += 1;
            slot.state = RulesetState::Evaluating;
            jobs.push(ExecutionJob {
                index,
                catalog_version: self.catalog_version,
                ruleset: slot.ruleset.clone(),
                counter: slot.counter,
                triggers: triggers(slot.last_inputs.as_ref(), &snapshot),
                snapshot,
            });
        }
        jobs
    }

    /// 结束一轮调度
    pub fn complete_tick(&mut self, mut results: Vec<JobResult>) -> TickReport {
        // 执行期间到达的变化标记为 dirty
        self.drain_changes();
        results.sort_by_key(|r| r.job.index);

        let mut report = TickReport::default();
        for result in results {
            if result.job.catalog_version != self.catalog_version {
                debug!(ruleset = %result.job.ruleset.id, "目录已切换，丢弃过期的执行结果");
                continue;
            }
            let Some(slot) = self.slots.get_mut(result.job.index) else {
                continue;
            };
            if !slot.enabled {
                debug!(ruleset = %result.job.ruleset.id, "规则集已停止生效，丢弃执行结果");
                continue;
            }

            let failed = result.is_error();
            slot.errored = failed;
            if failed {
                slot.output_actions.clear();
                slot.active = false;
                report.errors += 1;
            } else {
                slot.output_actions = result.outcome.output_actions.clone();
                slot.active = !slot.output_actions.is_empty();
            }
            slot.last_inputs = Some(result.job.snapshot.clone());
            slot.state = if slot.dirty {
                slot.dirty = false;
                RulesetState::Scheduled
            } else {
                slot.settled_state()
            };

            report.executed += 1;
            report.events.push(execution_event(result));
        }

        let active = self.active_rulesets();
        if self.announce_active || active != self.last_active {
            self.announce_active = false;
            self.last_active = active.clone();
            report.active_rulesets = Some(active);
        }

        report.output_actions = self.output_actions();
        report.more_pending = self.has_pending();
        report
    }

    /// 执行单个任务，panic 被转换为错误结果
    pub fn execute_job(executor: &ActionExecutor, job: ExecutionJob) -> JobResult {
        let start = Instant::now();
        let run = catch_unwind(AssertUnwindSafe(|| {
            executor.execute_ruleset(&job.ruleset, &job.snapshot)
        }));
        let duration = start.elapsed();

        match run {
            Ok(outcome) => JobResult {
                job,
                outcome,
                panic: None,
                duration,
            },
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                JobResult {
                    job,
                    outcome: RulesetOutcome::default(),
                    panic: Some(message),
                    duration,
                }
            }
        }
    }
}

/// 与上一次执行相比发生变化的事实
fn triggers(previous: Option<&FactSnapshot>, current: &FactSnapshot) -> Vec<FactTrigger> {
    let empty = FactSnapshot::new();
    let previous = previous.unwrap_or(&empty);

    let names: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let old_value = previous.get(name);
            let new_value = current.get(name);
            (old_value != new_value).then(|| FactTrigger {
                fact_name: name.clone(),
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
            })
        })
        .collect()
}

fn execution_event(result: JobResult) -> DebugEventKind {
    let failed = result.is_error();
    let JobResult {
        job,
        outcome,
        panic,
        duration,
    } = result;

    let (rules_causing_the_error, errors) = match panic {
        Some(message) => (
            job.ruleset.rule_ids(),
            vec![RuleFailure {
                code: "EXECUTION_PANIC",
                message,
            }],
        ),
        None => (outcome.rules_causing_the_error(), outcome.errors()),
    };

    let event = RulesetExecutionEvent {
        ruleset_id: job.ruleset.id.clone(),
        ruleset_name: job.ruleset.name.clone(),
        execution_id: format!("{}-{}", job.ruleset.id, job.counter),
        execution_counter: job.counter,
        input_facts: job.snapshot,
        triggers: job.triggers,
        rule_evaluations: outcome.evaluations,
        output_actions: outcome.output_actions,
        temporary_facts: outcome.temporary_facts,
        runtime_outputs: outcome.runtime_outputs,
        rules_causing_the_error,
        errors,
        duration_ms: duration.as_secs_f64() * 1000.0,
    };

    if failed {
        DebugEventKind::RulesetExecutionError(event)
    } else {
        DebugEventKind::RulesetExecution(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CatalogCompiler;
    use crate::metadata::EngineMetadata;
    use crate::operators::OperatorCatalog;
    use crate::store::CatalogStore;
    use serde_json::{Value, json};

    fn equals_rule(ruleset: &str, fact: &str, value: &str, action: &str) -> Value {
        json!({
            "id": ruleset,
            "rules": [{
                "id": format!("{}-rule", ruleset),
                "rootElement": {
                    "blockType": "IF_ELSE",
                    "condition": {
                        "operator": "equals",
                        "lhs": {"type": "FACT", "factName": fact},
                        "rhs": {"type": "LITERAL", "value": value}
                    },
                    "successElements": [{"blockType": "ACTION", "action": {"type": action}}]
                }
            }]
        })
    }

    fn setup(rulesets: Vec<Value>) -> (FactRegistry, RulesetScheduler) {
        let compiler = CatalogCompiler::new(
            Arc::new(OperatorCatalog::builtin()),
            Arc::new(EngineMetadata::default()),
        );
        let catalog = compiler
            .compile_json(&json!({ "rulesets": rulesets }).to_string())
            .unwrap();
        let catalog = CatalogStore::new().install(catalog);

        let facts = FactRegistry::default();
        let mut scheduler = RulesetScheduler::new(facts.subscribe_changes());
        scheduler.install_catalog(&catalog);
        (facts, scheduler)
    }

    fn run_tick(facts: &FactRegistry, scheduler: &mut RulesetScheduler) -> TickReport {
        let executor = ActionExecutor::new();
        let jobs = scheduler.begin_tick(facts);
        let results = jobs
            .into_iter()
            .map(|job| RulesetScheduler::execute_job(&executor, job))
            .collect();
        scheduler.complete_tick(results)
    }

    #[test]
    fn test_catalog_load_schedules_every_ruleset() {
        let (facts, mut scheduler) = setup(vec![
            equals_rule("a", "destination", "PAR", "french"),
            equals_rule("b", "origin", "NCE", "riviera"),
        ]);
        assert_eq!(scheduler.state("a"), Some(RulesetState::Scheduled));

        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.executed, 2);
        assert_eq!(report.active_rulesets, Some(Vec::new()));
        assert!(!report.more_pending);
        assert_eq!(scheduler.state("a"), Some(RulesetState::Idle));

        // 没有事实变化时不再执行
        let idle = run_tick(&facts, &mut scheduler);
        assert_eq!(idle.executed, 0);
        assert!(idle.active_rulesets.is_none());
    }

    #[test]
    fn test_only_affected_rulesets_rerun() {
        let (facts, mut scheduler) = setup(vec![
            equals_rule("a", "destination", "PAR", "french"),
            equals_rule("b", "origin", "NCE", "riviera"),
        ]);
        run_tick(&facts, &mut scheduler);

        facts.publish("destination", json!("PAR"));
        assert_eq!(scheduler.begin_tick(&facts).len(), 1);
    }

    #[test]
    fn test_changes_coalesce_into_one_execution() {
        let (facts, mut scheduler) = setup(vec![json!({
            "id": "pair",
            "rules": [{
                "id": "r",
                "rootElement": {
                    "blockType": "IF_ELSE",
                    "condition": {"all": [
                        {"operator": "isDefined", "lhs": {"type": "FACT", "factName": "A"}},
                        {"operator": "isDefined", "lhs": {"type": "FACT", "factName": "B"}}
                    ]},
                    "successElements": [{"blockType": "ACTION", "action": {"type": "both"}}]
                }
            }]
        })]);
        run_tick(&facts, &mut scheduler);

        facts.publish("A", json!(1));
        facts.publish("B", json!(2));
        let report = run_tick(&facts, &mut scheduler);

        assert_eq!(report.events.len(), 1);
        let DebugEventKind::RulesetExecution(event) = &report.events[0] else {
            panic!("expected execution event");
        };
        assert_eq!(event.input_facts["A"], json!(1));
        assert_eq!(event.input_facts["B"], json!(2));
        assert_eq!(event.triggers.len(), 2);
        assert_eq!(event.execution_id, "pair-2");
        assert_eq!(report.output_actions, vec![OutputAction::new("both")]);
    }

    #[test]
    fn test_change_during_evaluation_triggers_one_followup() {
        let (facts, mut scheduler) = setup(vec![equals_rule("a", "destination", "PAR", "french")]);
        let executor = ActionExecutor::new();

        let jobs = scheduler.begin_tick(&facts);
        assert_eq!(scheduler.state("a"), Some(RulesetState::Evaluating));

        facts.publish("destination", json!("NYC"));
        facts.publish("destination", json!("PAR"));
        let results = jobs
            .into_iter()
            .map(|job| RulesetScheduler::execute_job(&executor, job))
            .collect();
        let report = scheduler.complete_tick(results);

        assert!(report.more_pending);
        assert_eq!(scheduler.state("a"), Some(RulesetState::Scheduled));

        let followup = run_tick(&facts, &mut scheduler);
        assert_eq!(followup.executed, 1);
        assert_eq!(followup.active_rulesets, Some(vec!["a".to_string()]));
        assert!(!followup.more_pending);
    }

    #[test]
    fn test_output_actions_follow_declaration_order() {
        let (facts, mut scheduler) = setup(vec![
            equals_rule("first", "destination", "PAR", "one"),
            equals_rule("second", "destination", "PAR", "two"),
        ]);
        facts.publish("destination", json!("PAR"));

        let executor = ActionExecutor::new();
        let mut results: Vec<JobResult> = scheduler
            .begin_tick(&facts)
            .into_iter()
            .map(|job| RulesetScheduler::execute_job(&executor, job))
            .collect();
        // 完成顺序与声明顺序相反
        results.reverse();
        let report = scheduler.complete_tick(results);

        let types: Vec<_> = report
            .output_actions
            .iter()
            .map(|a| a.action_type.as_str())
            .collect();
        assert_eq!(types, vec!["one", "two"]);
        assert_eq!(report.active_rulesets, Some(vec!["first".to_string(), "second".to_string()]));
    }

    #[test]
    fn test_errored_ruleset_is_isolated() {
        let (facts, mut scheduler) = setup(vec![
            json!({
                "id": "fragile",
                "rules": [{
                    "id": "r",
                    "rootElement": {
                        "blockType": "IF_ELSE",
                        "condition": {
                            "operator": "greaterThan",
                            "lhs": {"type": "FACT", "factName": "passengers"},
                            "rhs": {"type": "LITERAL", "value": 2}
                        },
                        "successElements": [{"blockType": "ACTION", "action": {"type": "group"}}]
                    }
                }]
            }),
            equals_rule("steady", "destination", "PAR", "french"),
        ]);
        facts.publish("passengers", json!("many"));
        facts.publish("destination", json!("PAR"));

        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.errors, 1);
        assert!(matches!(report.events[0], DebugEventKind::RulesetExecutionError(_)));
        assert!(matches!(report.events[1], DebugEventKind::RulesetExecution(_)));
        assert_eq!(scheduler.state("fragile"), Some(RulesetState::Errored));
        assert_eq!(report.output_actions, vec![OutputAction::new("french")]);

        // 失败的规则集在下一次触发时恢复
        facts.publish("passengers", json!(3));
        let recovered = run_tick(&facts, &mut scheduler);
        assert_eq!(recovered.errors, 0);
        assert_eq!(scheduler.state("fragile"), Some(RulesetState::Idle));
        assert_eq!(recovered.output_actions.len(), 2);
    }

    #[test]
    fn test_failed_worker_settles_slot_as_errored() {
        let (facts, mut scheduler) = setup(vec![
            equals_rule("lost", "destination", "PAR", "french"),
            equals_rule("kept", "destination", "PAR", "paris"),
        ]);
        facts.publish("destination", json!("PAR"));

        let executor = ActionExecutor::new();
        let results = scheduler
            .begin_tick(&facts)
            .into_iter()
            .map(|job| {
                if job.ruleset.id == "lost" {
                    JobResult::worker_failed(job, "worker thread failed")
                } else {
                    RulesetScheduler::execute_job(&executor, job)
                }
            })
            .collect();
        let report = scheduler.complete_tick(results);

        assert_eq!(report.errors, 1);
        let DebugEventKind::RulesetExecutionError(event) = &report.events[0] else {
            panic!("expected execution error event");
        };
        assert_eq!(event.errors[0].code, "EXECUTION_PANIC");
        assert_eq!(scheduler.state("lost"), Some(RulesetState::Errored));
        assert_eq!(scheduler.state("kept"), Some(RulesetState::Idle));
        assert_eq!(report.output_actions, vec![OutputAction::new("paris")]);
    }

    fn with_activation(mut ruleset: Value, settings: Value) -> Value {
        if let (Some(target), Some(extra)) = (ruleset.as_object_mut(), settings.as_object()) {
            target.extend(extra.clone());
        }
        ruleset
    }

    #[test]
    fn test_validity_window_follows_current_time() {
        let (facts, mut scheduler) = setup(vec![
            with_activation(
                equals_rule("summer", "destination", "PAR", "beach"),
                json!({"validityRange": {"from": "2024-06-01", "to": "2024-08-31"}}),
            ),
            equals_rule("always", "destination", "PAR", "french"),
        ]);
        facts.publish("destination", json!("PAR"));
        facts.publish(CURRENT_TIME_FACT, json!("2024-05-01T00:00:00Z"));

        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.executed, 1);
        assert_eq!(scheduler.state("summer"), Some(RulesetState::Disabled));
        assert_eq!(scheduler.enabled_rulesets(), vec!["always"]);
        assert_eq!(report.output_actions, vec![OutputAction::new("french")]);

        // 进入时间窗口后强制执行一次
        facts.publish(CURRENT_TIME_FACT, json!("2024-07-01T00:00:00Z"));
        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.executed, 1);
        assert_eq!(scheduler.state("summer"), Some(RulesetState::Idle));
        assert_eq!(
            report.output_actions,
            vec![OutputAction::new("beach"), OutputAction::new("french")]
        );
        assert_eq!(scheduler.active_rulesets(), vec!["summer", "always"]);

        // 离开时间窗口后撤回输出动作，事实变化也不再触发执行
        facts.publish(CURRENT_TIME_FACT, json!("2024-09-15T00:00:00Z"));
        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.executed, 0);
        assert_eq!(report.active_rulesets, Some(vec!["always".to_string()]));
        assert_eq!(report.output_actions, vec![OutputAction::new("french")]);

        facts.publish("destination", json!("NCE"));
        run_tick(&facts, &mut scheduler);
        assert_eq!(scheduler.state("summer"), Some(RulesetState::Disabled));
    }

    #[test]
    fn test_linked_ruleset_waits_for_component() {
        let (facts, mut scheduler) = setup(vec![with_activation(
            equals_rule("basket", "destination", "PAR", "upsell"),
            json!({
                "validityRange": {"from": "2024-01-01"},
                "linkedComponents": {"or": [{"library": "@shop/ui", "name": "Basket"}]}
            }),
        )]);
        facts.publish("destination", json!("PAR"));
        facts.publish(CURRENT_TIME_FACT, json!("2024-07-01T00:00:00Z"));

        // 时间窗口内但组件未激活
        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.executed, 0);
        assert_eq!(scheduler.state("basket"), Some(RulesetState::Disabled));
        assert!(scheduler.enabled_rulesets().is_empty());

        assert_eq!(scheduler.activate_component("@shop/ui#Basket"), 1);
        assert_eq!(scheduler.activate_component("@shop/ui#Basket"), 2);
        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.executed, 1);
        assert_eq!(report.output_actions, vec![OutputAction::new("upsell")]);

        assert_eq!(scheduler.deactivate_component("@shop/ui#Basket"), 1);
        run_tick(&facts, &mut scheduler);
        assert_eq!(scheduler.enabled_rulesets(), vec!["basket"]);

        assert_eq!(scheduler.deactivate_component("@shop/ui#Basket"), 0);
        assert_eq!(scheduler.deactivate_component("@shop/ui#Basket"), 0);
        let report = run_tick(&facts, &mut scheduler);
        assert!(report.output_actions.is_empty());
        assert_eq!(report.active_rulesets, Some(vec![]));
        assert_eq!(scheduler.state("basket"), Some(RulesetState::Disabled));
    }

    #[test]
    fn test_result_discarded_when_disabled_during_evaluation() {
        let (facts, mut scheduler) = setup(vec![with_activation(
            equals_rule("basket", "destination", "PAR", "upsell"),
            json!({"linkedComponents": {"or": [{"name": "Basket"}]}}),
        )]);
        facts.publish("destination", json!("PAR"));
        scheduler.activate_component("#Basket");

        let executor = ActionExecutor::new();
        let jobs = scheduler.begin_tick(&facts);
        assert_eq!(jobs.len(), 1);
        let results = jobs
            .into_iter()
            .map(|job| RulesetScheduler::execute_job(&executor, job))
            .collect();

        scheduler.deactivate_component("#Basket");
        scheduler.refresh_enabled(Utc::now());
        let report = scheduler.complete_tick(results);
        assert_eq!(report.executed, 0);
        assert!(report.output_actions.is_empty());
        assert_eq!(scheduler.state("basket"), Some(RulesetState::Disabled));
    }

    #[test]
    fn test_unchanged_inputs_are_skipped() {
        let (facts, mut scheduler) = setup(vec![equals_rule("a", "destination", "PAR", "french")]);
        facts.publish("destination", json!("PAR"));
        run_tick(&facts, &mut scheduler);

        facts.publish("destination", json!("NYC"));
        facts.publish("destination", json!("PAR"));
        let report = run_tick(&facts, &mut scheduler);
        assert_eq!(report.executed, 0);
        assert_eq!(scheduler.state("a"), Some(RulesetState::Idle));
    }

    #[test]
    fn test_reinstall_keeps_counters_and_drops_stale_results() {
        let compiler = CatalogCompiler::new(
            Arc::new(OperatorCatalog::builtin()),
            Arc::new(EngineMetadata::default()),
        );
        let store = CatalogStore::new();
        let json = json!({ "rulesets": [equals_rule("a", "destination", "PAR", "french")] }).to_string();

        let facts = FactRegistry::default();
        let mut scheduler = RulesetScheduler::new(facts.subscribe_changes());
        scheduler.install_catalog(&store.install(compiler.compile_json(&json).unwrap()));
        run_tick(&facts, &mut scheduler);

        let executor = ActionExecutor::new();
        let stale: Vec<_> = {
            facts.publish("destination", json!("PAR"));
            scheduler
                .begin_tick(&facts)
                .into_iter()
                .map(|job| RulesetScheduler::execute_job(&executor, job))
                .collect()
        };
        scheduler.install_catalog(&store.install(compiler.compile_json(&json).unwrap()));
        let report = scheduler.complete_tick(stale);
        assert!(report.events.is_empty());

        let fresh = run_tick(&facts, &mut scheduler);
        let DebugEventKind::RulesetExecution(event) = &fresh.events[0] else {
            panic!("expected execution event");
        };
        assert_eq!(event.execution_counter, 3);
    }

    #[test]
    fn test_triggers_compare_with_previous_inputs() {
        let previous: FactSnapshot = serde_json::from_value(json!({"a": 1, "b": 2})).unwrap();
        let current: FactSnapshot = serde_json::from_value(json!({"a": 1, "b": 3, "c": 4})).unwrap();

        let changed = triggers(Some(&previous), &current);
        let names: Vec<_> = changed.iter().map(|t| t.fact_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(changed[1].old_value, None);
        assert_eq!(changed[0].new_value, Some(json!(3)));
    }
}
