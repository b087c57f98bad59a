//! 数值比较操作符

use super::{OperandConstraint, OperatorDefinition, as_f64};
use serde_json::Value;

pub(crate) fn definitions() -> Vec<OperatorDefinition> {
    vec![
        compare("greaterThan", |a, b| a > b),
        compare("greaterThanOrEqual", |a, b| a >= b),
        compare("lessThan", |a, b| a < b),
        compare("lessOrEqual", |a, b| a <= b),
    ]
}

fn compare(id: &'static str, cmp: fn(f64, f64) -> bool) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::number(),
        OperandConstraint::number(),
        move |lhs: &Value, rhs: &Value, _| match (as_f64(lhs), as_f64(rhs)) {
            (Some(a), Some(b)) => Ok(cmp(a, b)),
            _ => Ok(false),
        },
    )
}
