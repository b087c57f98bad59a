//! 动作执行器
//!
//! 深度优先遍历规则的块树，收集输出动作和临时事实。
//! 一次规则集执行内，规则按声明顺序依次执行并共享临时事实作用域；
//! 单条规则失败不会中断其余规则，所有失败的规则都会被报告。

use crate::compiler::{BlockId, BlockNode, CompiledRule, CompiledRuleset};
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::models::{FactSnapshot, OutputAction};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;

/// 规则执行失败信息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFailure {
    pub code: &'static str,
    pub message: String,
}

impl From<&RuleError> for RuleFailure {
    fn from(err: &RuleError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// SET_FACT 写入的临时事实
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOutput {
    pub rule_id: String,
    pub fact: String,
    pub value: Value,
}

/// 单条规则的执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub rule_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    /// 遍历是否到达了至少一个 ACTION 块
    pub matched: bool,
    pub output_actions: Vec<OutputAction>,
    /// 本条规则结束时的临时事实
    pub temporary_facts: FactSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RuleFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evaluation_trace: Vec<String>,
}

/// 规则集一次执行的汇总结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetOutcome {
    /// 按规则声明顺序
    pub evaluations: Vec<RuleEvaluation>,
    /// 执行出错时为空
    pub output_actions: Vec<OutputAction>,
    pub temporary_facts: FactSnapshot,
    pub runtime_outputs: Vec<RuntimeOutput>,
}

impl RulesetOutcome {
    pub fn is_error(&self) -> bool {
        self.evaluations.iter().any(|e| e.error.is_some())
    }

    /// 出错的规则 ID
    pub fn rules_causing_the_error(&self) -> Vec<String> {
        self.evaluations
            .iter()
            .filter(|e| e.error.is_some())
            .map(|e| e.rule_id.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<RuleFailure> {
        self.evaluations
            .iter()
            .filter_map(|e| e.error.clone())
            .collect()
    }
}

/// 单条规则遍历过程中的可变状态
struct RuleRun<'a> {
    rule_id: &'a str,
    facts: &'a FactSnapshot,
    temporary: &'a mut FactSnapshot,
    actions: Vec<OutputAction>,
    runtime_outputs: Vec<RuntimeOutput>,
    matched: bool,
    trace: Option<Vec<String>>,
}

/// 动作执行器
#[derive(Debug, Default)]
pub struct ActionExecutor {
    /// 是否记录块遍历追踪
    trace_enabled: bool,
}

impl ActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用遍历追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 以空的临时事实作用域执行单条规则
    pub fn execute_rule(
        &self,
        ruleset: &CompiledRuleset,
        rule: &CompiledRule,
        facts: &FactSnapshot,
    ) -> Result<RuleEvaluation> {
        let mut temporary = FactSnapshot::new();
        let (evaluation, _, result) = self.run_rule(ruleset, rule, facts, &mut temporary);
        result.map(|_| evaluation)
    }

    /// 执行整个规则集
    ///
    /// 每次执行都从空的临时事实开始；任一规则出错时整个执行视为出错，不产出动作。
    pub fn execute_ruleset(&self, ruleset: &CompiledRuleset, facts: &FactSnapshot) -> RulesetOutcome {
        let mut temporary = FactSnapshot::new();
        let mut outcome = RulesetOutcome::default();

        for rule in &ruleset.rules {
            let (evaluation, runtime_outputs, _) =
                self.run_rule(ruleset, rule, facts, &mut temporary);
            outcome
                .output_actions
                .extend(evaluation.output_actions.iter().cloned());
            outcome.runtime_outputs.extend(runtime_outputs);
            outcome.evaluations.push(evaluation);
        }

        if outcome.is_error() {
            outcome.output_actions.clear();
        }
        outcome.temporary_facts = temporary;
        outcome
    }

    fn run_rule(
        &self,
        ruleset: &CompiledRuleset,
        rule: &CompiledRule,
        facts: &FactSnapshot,
        temporary: &mut FactSnapshot,
    ) -> (RuleEvaluation, Vec<RuntimeOutput>, Result<()>) {
        let mut run = RuleRun {
            rule_id: &rule.id,
            facts,
            temporary,
            actions: Vec::new(),
            runtime_outputs: Vec::new(),
            matched: false,
            trace: self.trace_enabled.then(Vec::new),
        };

        let result = Self::visit(ruleset, rule.root, &mut run);
        let error = result.as_ref().err().map(RuleFailure::from);
        let failed = error.is_some();

        let evaluation = RuleEvaluation {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            matched: run.matched && !failed,
            output_actions: if failed { Vec::new() } else { run.actions },
            temporary_facts: run.temporary.clone(),
            error,
            evaluation_trace: run.trace.unwrap_or_default(),
        };
        (evaluation, run.runtime_outputs, result)
    }

    fn visit(ruleset: &CompiledRuleset, id: BlockId, run: &mut RuleRun<'_>) -> Result<()> {
        let node = ruleset
            .block(id)
            .ok_or_else(|| RuleError::ExecutionError(format!("块 #{} 不存在", id)))?;

        match node {
            BlockNode::Action(action) => {
                run.matched = true;
                run.actions.push(action.clone());
                if let Some(trace) = run.trace.as_mut() {
                    trace.push(format!("#{}: ACTION {}", id, action.action_type));
                }
            }
            BlockNode::IfElse {
                condition,
                success,
                failure,
            } => {
                let passed = match condition {
                    Some(condition) => {
                        ConditionEvaluator::evaluate_with_temporary(condition, run.facts, run.temporary)?
                    }
                    None => true,
                };
                if let Some(trace) = run.trace.as_mut() {
                    trace.push(format!(
                        "#{}: IF_ELSE => {}",
                        id,
                        if passed { "SUCCESS" } else { "FAILURE" }
                    ));
                }

                let branch = if passed { success } else { failure };
                for child in branch {
                    Self::visit(ruleset, *child, run)?;
                }
            }
            BlockNode::SetTemporaryFact { name, value } => {
                if run.temporary.contains_key(name) {
                    return Err(RuleError::TemporaryFactOverwrite(name.clone()));
                }
                let resolved = ConditionEvaluator::resolve(value, run.facts, run.temporary)
                    .map(Cow::into_owned)
                    .unwrap_or(Value::Null);
                if let Some(trace) = run.trace.as_mut() {
                    trace.push(format!("#{}: SET_FACT {} = {}", id, name, resolved));
                }
                run.temporary.insert(name.clone(), resolved.clone());
                run.runtime_outputs.push(RuntimeOutput {
                    rule_id: run.rule_id.to_string(),
                    fact: name.clone(),
                    value: resolved,
                });
            }
        }
        Ok(())
    }
}
