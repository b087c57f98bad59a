//! 数组操作符：包含、全部/任一满足、长度比较

use super::{
    OperandConstraint, OperatorDefinition, as_f64, compile_pattern, strict_eq, text,
};
use crate::error::{Result, RuleError};
use crate::models::FactType;
use serde_json::Value;

const SIMPLE_TYPES: &[FactType] = &[FactType::String, FactType::Number, FactType::Boolean];

/// 数组元素的量词
#[derive(Clone, Copy)]
enum Quantifier {
    All,
    One,
}

impl Quantifier {
    fn check<F>(self, items: &[Value], predicate: F) -> bool
    where
        F: FnMut(&Value) -> bool,
    {
        match self {
            Self::All => items.iter().all(predicate),
            Self::One => items.iter().any(predicate),
        }
    }
}

pub(crate) fn definitions() -> Vec<OperatorDefinition> {
    vec![
        OperatorDefinition::binary(
            "arrayContains",
            OperandConstraint::array(SIMPLE_TYPES),
            OperandConstraint::simple(),
            |lhs, rhs, _| Ok(contains(lhs, rhs)),
        ),
        OperatorDefinition::binary(
            "notArrayContains",
            OperandConstraint::array(SIMPLE_TYPES),
            OperandConstraint::simple(),
            |lhs, rhs, _| Ok(!contains(lhs, rhs)),
        ),
        OperatorDefinition::binary(
            "stringContains",
            OperandConstraint::string(),
            OperandConstraint::string(),
            |lhs, rhs, _| Ok(text(lhs).contains(text(rhs))),
        ),
        OperatorDefinition::binary(
            "notStringContains",
            OperandConstraint::string(),
            OperandConstraint::string(),
            |lhs, rhs, _| Ok(!text(lhs).contains(text(rhs))),
        ),
        equal("allEqual", Quantifier::All),
        equal("oneEquals", Quantifier::One),
        threshold("allGreater", Quantifier::All, |a, b| a > b),
        threshold("oneGreater", Quantifier::One, |a, b| a > b),
        threshold("allLower", Quantifier::All, |a, b| a < b),
        threshold("oneLower", Quantifier::One, |a, b| a < b),
        membership("allIn", Quantifier::All, true),
        membership("oneIn", Quantifier::One, true),
        // 没有任何元素在列表中
        membership("allNotIn", Quantifier::All, false),
        pattern("allMatch", Quantifier::All),
        pattern("oneMatches", Quantifier::One),
        range("allRangeNumber", Quantifier::All),
        range("oneRangeNumber", Quantifier::One),
        length("lengthEquals", |len, n| len == n),
        length("lengthNotEquals", |len, n| len != n),
        length("lengthLessThan", |len, n| len < n),
        length("lengthLessThanOrEquals", |len, n| len <= n),
        length("lengthGreaterThan", |len, n| len > n),
        length("lengthGreaterThanOrEquals", |len, n| len >= n),
    ]
}

fn items(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn contains(array: &Value, value: &Value) -> bool {
    items(array).iter().any(|item| strict_eq(item, value))
}

fn equal(id: &'static str, quantifier: Quantifier) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::array(SIMPLE_TYPES),
        OperandConstraint::simple(),
        move |lhs: &Value, rhs: &Value, _| {
            Ok(quantifier.check(items(lhs), |item| strict_eq(item, rhs)))
        },
    )
}

fn threshold(
    id: &'static str,
    quantifier: Quantifier,
    cmp: fn(f64, f64) -> bool,
) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::array(&[FactType::Number]),
        OperandConstraint::number(),
        move |lhs: &Value, rhs: &Value, _| {
            let Some(bound) = as_f64(rhs) else {
                return Ok(false);
            };
            Ok(quantifier.check(items(lhs), |item| {
                as_f64(item).is_some_and(|n| cmp(n, bound))
            }))
        },
    )
}

fn membership(id: &'static str, quantifier: Quantifier, expected: bool) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::array(SIMPLE_TYPES),
        OperandConstraint::array(SIMPLE_TYPES),
        move |lhs: &Value, rhs: &Value, _| {
            Ok(quantifier.check(items(lhs), |item| contains(rhs, item) == expected))
        },
    )
}

fn pattern(id: &'static str, quantifier: Quantifier) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::array(&[FactType::String]),
        OperandConstraint::string(),
        move |lhs: &Value, rhs: &Value, _| -> Result<bool> {
            let regex = compile_pattern(text(rhs)).map_err(|e| RuleError::OperatorFailed {
                operator: id.to_string(),
                message: format!("无效的正则表达式 '{}': {}", text(rhs), e),
            })?;
            Ok(quantifier.check(items(lhs), |item| {
                item.as_str().is_some_and(|s| regex.is_match(s))
            }))
        },
    )
}

fn range(id: &'static str, quantifier: Quantifier) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::array(&[FactType::Number]),
        OperandConstraint::number_range(),
        move |lhs: &Value, rhs: &Value, _| {
            let bounds = items(rhs);
            let (Some(from), Some(to)) = (
                bounds.first().and_then(as_f64),
                bounds.get(1).and_then(as_f64),
            ) else {
                return Ok(false);
            };
            Ok(quantifier.check(items(lhs), |item| {
                as_f64(item).is_some_and(|n| n >= from && n <= to)
            }))
        },
    )
}

fn length(id: &'static str, cmp: fn(f64, f64) -> bool) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::array(&[]),
        OperandConstraint::number(),
        move |lhs: &Value, rhs: &Value, _| {
            Ok(as_f64(rhs).is_some_and(|n| cmp(items(lhs).len() as f64, n)))
        },
    )
}
