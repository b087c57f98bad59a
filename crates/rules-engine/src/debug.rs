//! 调试事件记录
//!
//! 只追加的事件日志，记录引擎做过的每一件事：
//! - `AvailableRulesets`：目录加载后可用的规则集
//! - `ActiveRulesets`：最近一次执行产出了动作的规则集
//! - `RulesetExecution` / `RulesetExecutionError`：规则集的每次执行
//!
//! 事件按序号和单调递增的时间戳排序；查询接口都是从日志即时推导出来的。

use crate::compiler::CompiledRuleset;
use crate::executor::{RuleEvaluation, RuleFailure, RuntimeOutput};
use crate::models::{FactSnapshot, OutputAction};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

/// 可用规则集概要
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 规则声明顺序
    pub rule_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub linked_components: Vec<String>,
}

impl From<&CompiledRuleset> for RulesetSummary {
    fn from(ruleset: &CompiledRuleset) -> Self {
        Self {
            id: ruleset.id.clone(),
            name: ruleset.name.clone(),
            rule_ids: ruleset.rule_ids(),
            linked_components: ruleset.linked_components.clone(),
        }
    }
}

/// 触发本次执行的事实变化
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactTrigger {
    pub fact_name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// 规则集执行事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetExecutionEvent {
    pub ruleset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruleset_name: Option<String>,
    /// `{rulesetId}-{executionCounter}`
    pub execution_id: String,
    pub execution_counter: u64,
    pub input_facts: FactSnapshot,
    pub triggers: Vec<FactTrigger>,
    pub rule_evaluations: Vec<RuleEvaluation>,
    pub output_actions: Vec<OutputAction>,
    pub temporary_facts: FactSnapshot,
    pub runtime_outputs: Vec<RuntimeOutput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules_causing_the_error: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RuleFailure>,
    pub duration_ms: f64,
}

/// 调试事件负载
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum DebugEventKind {
    AvailableRulesets(Vec<RulesetSummary>),
    ActiveRulesets(Vec<String>),
    RulesetExecution(RulesetExecutionEvent),
    RulesetExecutionError(RulesetExecutionEvent),
}

impl DebugEventKind {
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Self::RulesetExecution(_) | Self::RulesetExecutionError(_)
        )
    }

    /// 执行事件的内容及是否为错误事件
    pub fn execution(&self) -> Option<(&RulesetExecutionEvent, bool)> {
        match self {
            Self::RulesetExecution(event) => Some((event, false)),
            Self::RulesetExecutionError(event) => Some((event, true)),
            _ => None,
        }
    }
}

/// 调试事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DebugEventKind,
}

/// 历史记录中执行的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    Error,
    NoEffect,
    Active,
    Deactivated,
}

/// 历史查询结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetExecutionDebug {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub is_active: bool,
    #[serde(flatten)]
    pub execution: RulesetExecutionEvent,
}

#[derive(Default)]
struct DebugLog {
    events: VecDeque<Arc<DebugEvent>>,
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl DebugLog {
    fn latest<T>(&self, pick: impl Fn(&DebugEventKind) -> Option<&T>) -> Option<&T> {
        self.events.iter().rev().find_map(|e| pick(&e.event))
    }

    fn available(&self) -> Vec<RulesetSummary> {
        self.latest(|e| match e {
            DebugEventKind::AvailableRulesets(rulesets) => Some(rulesets),
            _ => None,
        })
        .cloned()
        .unwrap_or_default()
    }

    fn active(&self) -> Vec<String> {
        self.latest(|e| match e {
            DebugEventKind::ActiveRulesets(ids) => Some(ids),
            _ => None,
        })
        .cloned()
        .unwrap_or_default()
    }

    /// 只保留最近 `limit` 个执行事件以及最新的两类快照事件
    fn trim(&mut self, limit: usize) {
        let latest_available = self
            .events
            .iter()
            .rposition(|e| matches!(e.event, DebugEventKind::AvailableRulesets(_)));
        let latest_active = self
            .events
            .iter()
            .rposition(|e| matches!(e.event, DebugEventKind::ActiveRulesets(_)));
        let executions = self.events.iter().filter(|e| e.event.is_execution()).count();
        let mut excess = executions.saturating_sub(limit);

        let mut index = 0;
        self.events.retain(|e| {
            let position = index;
            index += 1;
            match &e.event {
                DebugEventKind::AvailableRulesets(_) => Some(position) == latest_available,
                DebugEventKind::ActiveRulesets(_) => Some(position) == latest_active,
                _ if excess > 0 => {
                    excess -= 1;
                    false
                }
                _ => true,
            }
        });
    }
}

/// 引擎调试记录器
pub struct EngineDebugger {
    log: RwLock<DebugLog>,
    events_tx: broadcast::Sender<Arc<DebugEvent>>,
    history_limit: Option<usize>,
}

impl EngineDebugger {
    /// `history_limit` 为保留的执行事件上限，None 表示不限制
    pub fn new(history_limit: Option<usize>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            log: RwLock::new(DebugLog::default()),
            events_tx,
            history_limit,
        }
    }

    /// 追加事件，分配序号和单调时间戳
    pub fn append(&self, event: DebugEventKind) -> Arc<DebugEvent> {
        let appended = {
            let mut log = self.log.write();

            let now = Utc::now();
            let timestamp = match log.last_timestamp {
                Some(last) if now <= last => last + chrono::Duration::nanoseconds(1),
                _ => now,
            };
            let sequence = log.next_sequence;
            log.next_sequence += 1;
            log.last_timestamp = Some(timestamp);

            let appended = Arc::new(DebugEvent {
                sequence,
                timestamp,
                event,
            });
            log.events.push_back(appended.clone());
            if let Some(limit) = self.history_limit {
                log.trim(limit);
            }
            appended
        };

        // 没有订阅者时发送失败，忽略即可
        let _ = self.events_tx.send(appended.clone());
        appended
    }

    /// 订阅之后追加的事件
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DebugEvent>> {
        self.events_tx.subscribe()
    }

    /// 当前保留的全部事件（追加顺序）
    pub fn events(&self) -> Vec<Arc<DebugEvent>> {
        self.log.read().events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().events.is_empty()
    }

    /// 最近一次 AvailableRulesets 事件的内容
    pub fn available_rulesets(&self) -> Vec<RulesetSummary> {
        self.log.read().available()
    }

    /// 最近一次 ActiveRulesets 事件的内容
    pub fn active_rulesets(&self) -> Vec<String> {
        self.log.read().active()
    }

    /// 执行历史，按时间倒序；每个事件中的规则结果按规则声明顺序排列
    pub fn history(&self, ruleset_id: Option<&str>) -> Vec<RulesetExecutionDebug> {
        let log = self.log.read();
        let available = log.available();
        let active = log.active();

        let mut history: Vec<RulesetExecutionDebug> = log
            .events
            .iter()
            .filter_map(|e| {
                let (execution, is_error) = e.event.execution()?;
                if ruleset_id.is_some_and(|id| id != execution.ruleset_id) {
                    return None;
                }

                let is_active = active.contains(&execution.ruleset_id);
                let status = if is_error {
                    ExecutionStatus::Error
                } else if execution.output_actions.is_empty() {
                    ExecutionStatus::NoEffect
                } else if is_active {
                    ExecutionStatus::Active
                } else {
                    ExecutionStatus::Deactivated
                };

                let mut execution = execution.clone();
                if let Some(summary) = available.iter().find(|r| r.id == execution.ruleset_id) {
                    execution.rule_evaluations.sort_by_key(|evaluation| {
                        summary
                            .rule_ids
                            .iter()
                            .position(|id| *id == evaluation.rule_id)
                            .unwrap_or(usize::MAX)
                    });
                }

                Some(RulesetExecutionDebug {
                    sequence: e.sequence,
                    timestamp: e.timestamp,
                    status,
                    is_active,
                    execution,
                })
            })
            .collect();

        history.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.sequence.cmp(&a.sequence))
        });
        history
    }
}

impl Default for EngineDebugger {
    fn default() -> Self {
        Self::new(None)
    }
}
