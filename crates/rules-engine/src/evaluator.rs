//! 条件评估器
//!
//! 对事实快照求值编译后的条件树。求值是纯函数：不做 I/O，不修改输入，
//! 相同输入总是得到相同结果。

use crate::compiler::{CompiledCondition, CompiledOperand};
use crate::error::Result;
use crate::models::FactSnapshot;
use crate::operators::OperatorContext;
use serde_json::Value;
use std::borrow::Cow;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件
    ///
    /// 操作数未定义时对应操作符返回 false；只有操作数值非法或操作符内部失败时才返回错误。
    pub fn evaluate(condition: &CompiledCondition, facts: &FactSnapshot) -> Result<bool> {
        Self::evaluate_with_temporary(condition, facts, &FactSnapshot::new())
    }

    /// 评估条件，`temporary` 为本次规则集执行中写入的临时事实
    pub fn evaluate_with_temporary(
        condition: &CompiledCondition,
        facts: &FactSnapshot,
        temporary: &FactSnapshot,
    ) -> Result<bool> {
        match condition {
            CompiledCondition::All(children) => {
                // AND 短路
                for child in children {
                    if !Self::evaluate_with_temporary(child, facts, temporary)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CompiledCondition::Any(children) => {
                for child in children {
                    if Self::evaluate_with_temporary(child, facts, temporary)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            CompiledCondition::Not(inner) => {
                Ok(!Self::evaluate_with_temporary(inner, facts, temporary)?)
            }
            CompiledCondition::Operation { operator, lhs, rhs } => {
                let lhs = Self::resolve(lhs, facts, temporary);
                let rhs = rhs
                    .as_ref()
                    .and_then(|operand| Self::resolve(operand, facts, temporary));
                operator.execute(lhs.as_deref(), rhs.as_deref(), &OperatorContext::new(facts))
            }
        }
    }

    /// 解析操作数，None 表示未定义
    pub fn resolve<'a>(
        operand: &'a CompiledOperand,
        facts: &'a FactSnapshot,
        temporary: &'a FactSnapshot,
    ) -> Option<Cow<'a, Value>> {
        let (source, name, path) = match operand {
            CompiledOperand::Literal(value) => return Some(Cow::Borrowed(value)),
            CompiledOperand::Fact { name, path } => (facts, name, path),
            CompiledOperand::TemporaryFact { name, path } => (temporary, name, path),
        };

        let value = source.get(name)?;
        match path {
            None => Some(Cow::Borrowed(value)),
            Some(path) => path.resolve(value).map(Cow::Owned),
        }
    }
}
